use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::extract::extract_leaves;
use crate::snapshot::{CategorySnapshot, SiteSnapshot, TicketRecord};
use crate::surface::{ExtractionSurface, SurfaceError, TicketSelectors};
use crate::utils::{is_excluded, matches_keyword, normalize_label};

/// How selectable options present themselves at one level of the hierarchy.
/// Card tiles enumerate by visible text; link lists enumerate through their
/// anchors. Activation is by label either way, so the traversal never holds
/// an element handle across an interaction.
#[derive(Debug, Clone)]
pub enum OptionLocator {
    Cards { selector: String },
    Links { selector: String },
}

impl OptionLocator {
    pub fn selector(&self) -> &str {
        match self {
            OptionLocator::Cards { selector } | OptionLocator::Links { selector } => selector,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackAffordance {
    pub selector: String,
    pub label: String,
}

/// Structural description of the navigable widget, supplied by the site
/// adapter. The navigator only ever talks to the page through these
/// selectors and the `ExtractionSurface` capability.
#[derive(Debug, Clone)]
pub struct ViewShape {
    pub options: OptionLocator,
    pub tickets: TicketSelectors,
    /// Absent when the widget offers no way back up the hierarchy. Without
    /// it, backtracking is a no-op and siblings below root depth become
    /// unreachable once a branch has been entered.
    pub back: Option<BackAffordance>,
    /// Presence of this selector marks the view as settled after an
    /// interaction.
    pub settle: String,
}

/// Per-crawl configuration, passed explicitly so traversal stays
/// referentially transparent and testable without a live page.
#[derive(Debug, Clone)]
pub struct CrawlContext {
    pub keywords: Vec<String>,
    pub exclude_prefixes: Vec<String>,
    pub settle_timeout: Duration,
    pub poll_interval: Duration,
    pub max_depth: usize,
}

impl CrawlContext {
    pub fn new(keywords: Vec<String>, exclude_prefixes: Vec<String>) -> Self {
        CrawlContext {
            keywords,
            exclude_prefixes,
            settle_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(250),
            max_depth: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrawlOutcome {
    pub snapshot: SiteSnapshot,
    /// Whether navigation reached a scrape-able state at all. Callers use
    /// this, not emptiness of the result, to tell "zero tickets" apart from
    /// "extraction never got anywhere".
    pub reached: bool,
}

/// First occurrence wins, then sort by normalized name. Sorting is the
/// canonicalization step that makes the diff deterministic regardless of
/// DOM enumeration order.
pub fn dedup_sorted(records: Vec<TicketRecord>) -> Vec<TicketRecord> {
    let mut seen = HashSet::new();
    let mut unique: Vec<TicketRecord> = records
        .into_iter()
        .filter(|record| seen.insert(record.name.clone()))
        .collect();
    unique.sort_by(|a, b| a.name.cmp(&b.name));
    unique
}

/// Distinct, visible, non-excluded option labels at the current level.
pub async fn enumerate_options(
    surface: &dyn ExtractionSurface,
    shape: &ViewShape,
    ctx: &CrawlContext,
) -> Result<Vec<String>, SurfaceError> {
    let raw = match &shape.options {
        OptionLocator::Cards { selector } => surface.find_visible(selector).await?,
        OptionLocator::Links { selector } => surface
            .find_links(selector)
            .await?
            .into_iter()
            .map(|link| link.text)
            .collect(),
    };

    let mut seen = HashSet::new();
    Ok(raw
        .into_iter()
        .map(|label| normalize_label(&label))
        .filter(|label| !label.is_empty())
        .filter(|label| seen.insert(label.clone()))
        .filter(|label| !is_excluded(label, &ctx.exclude_prefixes))
        .collect())
}

/// Invokes the back affordance and waits for the parent option list to be
/// observably restored. Returns false when there is no affordance or the
/// parent never reappeared within the bounded wait.
async fn backtrack(
    surface: &dyn ExtractionSurface,
    shape: &ViewShape,
    ctx: &CrawlContext,
) -> bool {
    let Some(back) = &shape.back else {
        return false;
    };
    match surface.activate(&back.selector, &back.label).await {
        Ok(()) => {
            let restored = surface
                .wait_for_visible(
                    shape.options.selector(),
                    ctx.settle_timeout,
                    ctx.poll_interval,
                )
                .await;
            if !restored {
                warn!("Parent view not restored after backtracking");
            }
            restored
        }
        Err(err) => {
            warn!("Back affordance could not be activated: {}", err);
            false
        }
    }
}

/// Depth-first traversal of the option hierarchy below the current view.
///
/// Each level first attempts leaf extraction and returns immediately on a
/// hit. Otherwise every option label is re-resolved live right before
/// activation, the subtree is traversed, and the back affordance restores
/// the parent before the next sibling. A failure inside one branch is
/// logged and skipped; the remaining siblings are still visited.
pub fn traverse<'a>(
    surface: &'a dyn ExtractionSurface,
    shape: &'a ViewShape,
    ctx: &'a CrawlContext,
    depth: usize,
) -> Pin<Box<dyn Future<Output = Vec<TicketRecord>> + Send + 'a>> {
    Box::pin(async move {
        let leaves = match extract_leaves(surface, &shape.tickets, &ctx.exclude_prefixes).await {
            Ok(leaves) => leaves,
            Err(err) => {
                warn!("Leaf extraction failed at depth {}: {}", depth, err);
                Vec::new()
            }
        };
        if !leaves.is_empty() {
            return dedup_sorted(leaves);
        }

        if depth >= ctx.max_depth {
            warn!("Maximum traversal depth {} reached; not descending", depth);
            return Vec::new();
        }

        let labels = match enumerate_options(surface, shape, ctx).await {
            Ok(labels) => labels,
            Err(err) => {
                warn!("Could not enumerate options at depth {}: {}", depth, err);
                return Vec::new();
            }
        };
        debug!("Depth {}: {} branch option(s)", depth, labels.len());

        let mut accumulated = Vec::new();
        for label in labels {
            if let Err(err) = surface.activate(shape.options.selector(), &label).await {
                warn!("Skipping branch '{}': {}", label, err);
                continue;
            }
            if let Err(err) = surface
                .require_visible(&shape.settle, ctx.settle_timeout, ctx.poll_interval)
                .await
            {
                warn!("Branch '{}' abandoned: {}", label, err);
                backtrack(surface, shape, ctx).await;
                continue;
            }

            let mut subtree = traverse(surface, shape, ctx, depth + 1).await;
            accumulated.append(&mut subtree);

            if !backtrack(surface, shape, ctx).await && shape.back.is_none() && depth > 0 {
                // Known boundary condition: with no way back up, siblings
                // below root depth cannot be re-resolved once a branch has
                // been entered.
                debug!("No back affordance at depth {}; remaining siblings skipped", depth);
                break;
            }
        }

        dedup_sorted(accumulated)
    })
}

/// Runs one full crawl from the prepared entry view.
///
/// With configured keywords the top level is treated as the category level:
/// each keyword is matched against the enumerated options, matched branches
/// are traversed, and options matching no keyword are recorded as drift.
/// Without keywords the variant is flat and everything lands under the
/// implicit category.
pub async fn crawl_site(
    surface: &dyn ExtractionSurface,
    shape: &ViewShape,
    ctx: &CrawlContext,
) -> CrawlOutcome {
    if !surface
        .wait_for_visible(&shape.settle, ctx.settle_timeout, ctx.poll_interval)
        .await
    {
        warn!("Entry view never reached a scrape-able state");
        return CrawlOutcome {
            snapshot: SiteSnapshot::default(),
            reached: false,
        };
    }

    if ctx.keywords.is_empty() {
        let records = traverse(surface, shape, ctx, 0).await;
        return CrawlOutcome {
            snapshot: SiteSnapshot::general(records),
            reached: true,
        };
    }

    let options = match enumerate_options(surface, shape, ctx).await {
        Ok(options) => options,
        Err(err) => {
            warn!("Could not enumerate categories: {}", err);
            return CrawlOutcome {
                snapshot: SiteSnapshot::default(),
                reached: false,
            };
        }
    };

    let mut snapshot = SiteSnapshot::seeded(&ctx.keywords);

    // Uniqueness is per category: duplicates within one category collapse
    // inside traverse, while the same name may legitimately appear under
    // several categories (the same ticket types sold on different days).
    for keyword in &ctx.keywords {
        let Some(label) = options
            .iter()
            .find(|option| matches_keyword(option, keyword))
            .cloned()
        else {
            debug!("Category '{}' not present on page", keyword);
            continue;
        };

        snapshot
            .categories
            .insert(keyword.clone(), CategorySnapshot::found_with(Vec::new()));

        if let Err(err) = surface.activate(shape.options.selector(), &label).await {
            warn!("Could not enter category '{}': {}", label, err);
            continue;
        }
        // The back affordance appearing is the surest sign the detail view
        // has rendered; fall back to the settle selector without one.
        let settled = match &shape.back {
            Some(back) => {
                surface
                    .wait_for_labeled(
                        &back.selector,
                        &back.label,
                        ctx.settle_timeout,
                        ctx.poll_interval,
                    )
                    .await
            }
            None => {
                surface
                    .wait_for_visible(&shape.settle, ctx.settle_timeout, ctx.poll_interval)
                    .await
            }
        };
        if !settled {
            warn!("Category '{}' never settled; left empty", label);
            backtrack(surface, shape, ctx).await;
            continue;
        }

        let records = traverse(surface, shape, ctx, 1).await;
        snapshot
            .categories
            .insert(keyword.clone(), CategorySnapshot::found_with(records));

        backtrack(surface, shape, ctx).await;
    }

    for option in &options {
        let matched = ctx
            .keywords
            .iter()
            .any(|keyword| matches_keyword(option, keyword));
        if !matched {
            info!("Unmatched category on page: {}", option);
            snapshot.unmatched_categories.insert(option.clone());
        }
    }

    CrawlOutcome {
        snapshot,
        reached: true,
    }
}
