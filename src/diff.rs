use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use crate::snapshot::{SiteSnapshot, TicketStatus};

/// Comparison policy. The canonical mode is `IgnorePrice`: price movements
/// alone never signal a change. Field-ignoring works by stripping the field
/// from both sides before the plain structural equality, keeping the
/// comparator itself trivial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffMode {
    #[default]
    IgnorePrice,
    PriceSensitive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffRow {
    pub category: String,
    pub name: String,
    pub previous: Option<TicketStatus>,
    pub current: Option<TicketStatus>,
}

impl DiffRow {
    /// True when the ticket exists on both sides with a different status.
    /// Additions and removals are not flips; they sync the store without
    /// raising a notification.
    pub fn status_flip(&self) -> bool {
        matches!(
            (self.previous, self.current),
            (Some(prev), Some(curr)) if prev != curr
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffOutcome {
    /// At least one row's status flipped: a notification is warranted.
    pub changed: bool,
    /// The snapshots differ structurally under the comparison mode: the
    /// store should be overwritten even when no notification goes out.
    pub store_update: bool,
    pub rows: Vec<DiffRow>,
    pub report: String,
}

/// Compares the previous and current snapshot under `mode`.
///
/// Pure over its inputs: diffing the same pair twice yields the identical
/// outcome. Authoritativeness of `curr` is the caller's concern; a snapshot
/// from a failed cycle must not be passed here at all.
pub fn diff(prev: &SiteSnapshot, curr: &SiteSnapshot, mode: DiffMode) -> DiffOutcome {
    let (prev, curr) = match mode {
        DiffMode::IgnorePrice => (prev.without_prices(), curr.without_prices()),
        DiffMode::PriceSensitive => (prev.clone(), curr.clone()),
    };

    let store_update = prev != curr;
    let rows = build_rows(&prev, &curr);
    let changed = rows.iter().any(DiffRow::status_flip);
    let report = render_report(&prev, &curr, &rows);

    DiffOutcome {
        changed,
        store_update,
        rows,
        report,
    }
}

/// One row per ticket name in the union of both sides' detail sets, grouped
/// by category, ordered by category key then name.
fn build_rows(prev: &SiteSnapshot, curr: &SiteSnapshot) -> Vec<DiffRow> {
    let category_keys: BTreeSet<&String> = prev
        .categories
        .keys()
        .chain(curr.categories.keys())
        .collect();

    let mut rows = Vec::new();
    for key in category_keys {
        let mut by_name: BTreeMap<&str, (Option<TicketStatus>, Option<TicketStatus>)> =
            BTreeMap::new();
        if let Some(category) = prev.categories.get(key.as_str()) {
            for record in &category.details {
                by_name.entry(&record.name).or_default().0 = Some(record.status);
            }
        }
        if let Some(category) = curr.categories.get(key.as_str()) {
            for record in &category.details {
                by_name.entry(&record.name).or_default().1 = Some(record.status);
            }
        }
        for (name, (previous, current)) in by_name {
            rows.push(DiffRow {
                category: key.clone(),
                name: name.to_string(),
                previous,
                current,
            });
        }
    }
    rows
}

fn status_label(status: Option<TicketStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "-".to_string(),
    }
}

/// Human-readable change report: every union row with prior vs. current
/// status, flipped rows marked.
fn render_report(prev: &SiteSnapshot, curr: &SiteSnapshot, rows: &[DiffRow]) -> String {
    let mut report = String::new();
    let mut last_category: Option<&str> = None;

    for row in rows {
        if last_category != Some(row.category.as_str()) {
            let was_found = prev
                .categories
                .get(&row.category)
                .map(|c| c.found)
                .unwrap_or(false);
            let is_found = curr
                .categories
                .get(&row.category)
                .map(|c| c.found)
                .unwrap_or(false);
            let note = match (was_found, is_found) {
                (false, true) => " (newly present)",
                (true, false) => " (no longer present)",
                _ => "",
            };
            let _ = writeln!(report, "[{}]{}", row.category, note);
            last_category = Some(row.category.as_str());
        }

        let marker = if row.status_flip() { "*" } else { " " };
        if row.previous == row.current {
            let _ = writeln!(
                report,
                "  {} {}: {}",
                marker,
                row.name,
                status_label(row.current)
            );
        } else {
            let _ = writeln!(
                report,
                "  {} {}: {} -> {}",
                marker,
                row.name,
                status_label(row.previous),
                status_label(row.current)
            );
        }
    }

    if report.is_empty() {
        report.push_str("No ticket details on either side.\n");
    }
    report
}
