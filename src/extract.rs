use tracing::{debug, warn};

use crate::snapshot::{TicketRecord, TicketStatus};
use crate::surface::{ExtractionSurface, SurfaceError, TicketCandidate, TicketSelectors};
use crate::utils::{is_excluded, normalize_label};

/// Availability from the most specific signal present. An enabled purchase
/// control reflects remaining inventory directly, so it wins over the
/// sold-out marker class, which can lag behind the real state.
pub fn classify(candidate: &TicketCandidate, sold_out_class: &str) -> TicketStatus {
    match candidate.add_control {
        Some(true) => TicketStatus::Available,
        Some(false) => TicketStatus::SoldOut,
        None => {
            let marked = candidate
                .classes
                .iter()
                .any(|class| class.contains(sold_out_class));
            if marked {
                TicketStatus::SoldOut
            } else {
                TicketStatus::Available
            }
        }
    }
}

/// Turns raw candidates into records: normalize the name, drop excluded
/// prefixes, classify availability. Elements without a readable name are
/// skipped so one malformed row cannot abort extraction of the rest.
/// Output order follows candidate order; callers impose canonical ordering.
pub fn leaf_records(
    candidates: Vec<TicketCandidate>,
    sold_out_class: &str,
    exclude_prefixes: &[String],
) -> Vec<TicketRecord> {
    let mut records = Vec::new();
    for candidate in candidates {
        let name = match &candidate.name {
            Some(raw) => normalize_label(raw),
            None => {
                warn!("Skipping ticket element without a readable name");
                continue;
            }
        };
        if name.is_empty() {
            warn!("Skipping ticket element with blank name");
            continue;
        }
        if is_excluded(&name, exclude_prefixes) {
            debug!("Excluding ticket '{}' by configured prefix", name);
            continue;
        }

        let status = classify(&candidate, sold_out_class);
        records.push(TicketRecord {
            name,
            price: candidate.price.clone(),
            status,
        });
    }
    records
}

/// Extracts ticket records from the currently rendered view. An empty result
/// means this view is not a leaf view (or genuinely has no tickets); the
/// navigator decides which.
pub async fn extract_leaves(
    surface: &dyn ExtractionSurface,
    selectors: &TicketSelectors,
    exclude_prefixes: &[String],
) -> Result<Vec<TicketRecord>, SurfaceError> {
    let candidates = surface.find_tickets(selectors).await?;
    Ok(leaf_records(
        candidates,
        &selectors.sold_out_class,
        exclude_prefixes,
    ))
}
