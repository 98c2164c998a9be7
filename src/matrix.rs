use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::snapshot::{SiteSnapshot, StoreError, TicketStatus};
use crate::utils::normalize_label;

/// Category-by-site availability grid: site name -> category label -> "any
/// matching ticket is available".
pub type MatrixGrid = BTreeMap<String, BTreeMap<String, bool>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellFlip {
    pub site: String,
    pub category: String,
    pub now: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatrixDiff {
    pub changed: bool,
    pub flips: Vec<CellFlip>,
}

/// Folds per-site snapshots into the boolean grid. A record counts toward
/// the longest display-category label contained in its normalized name, so
/// a specific category is not shadowed by a shorter substring of another.
pub fn aggregate(
    snapshots: &BTreeMap<String, SiteSnapshot>,
    display_categories: &[String],
) -> MatrixGrid {
    let mut by_length: Vec<String> = display_categories
        .iter()
        .map(|label| normalize_label(label))
        .filter(|label| !label.is_empty())
        .collect();
    by_length.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut grid = MatrixGrid::new();
    for (site, snapshot) in snapshots {
        let mut row: BTreeMap<String, bool> = by_length
            .iter()
            .map(|label| (label.clone(), false))
            .collect();

        for category in snapshot.categories.values() {
            for record in &category.details {
                let name = normalize_label(&record.name).to_lowercase();
                let matched = by_length
                    .iter()
                    .find(|label| name.contains(&label.to_lowercase()));
                if let Some(label) = matched {
                    if record.status == TicketStatus::Available {
                        row.insert(label.clone(), true);
                    }
                }
            }
        }
        grid.insert(site.clone(), row);
    }
    grid
}

/// Cell-by-cell comparison over the union of both grids. A missing cell
/// counts as false, so appearing and disappearing sites register as flips
/// on their true cells.
pub fn diff_grids(prev: &MatrixGrid, curr: &MatrixGrid) -> MatrixDiff {
    let sites: BTreeSet<&String> = prev.keys().chain(curr.keys()).collect();
    let mut flips = Vec::new();

    for site in sites {
        let empty = BTreeMap::new();
        let prev_row = prev.get(site.as_str()).unwrap_or(&empty);
        let curr_row = curr.get(site.as_str()).unwrap_or(&empty);
        let categories: BTreeSet<&String> = prev_row.keys().chain(curr_row.keys()).collect();

        for category in categories {
            let before = prev_row.get(category.as_str()).copied().unwrap_or(false);
            let now = curr_row.get(category.as_str()).copied().unwrap_or(false);
            if before != now {
                flips.push(CellFlip {
                    site: site.clone(),
                    category: category.clone(),
                    now,
                });
            }
        }
    }

    MatrixDiff {
        changed: !flips.is_empty(),
        flips,
    }
}

/// Text rendering of the grid; flipped cells carry a `*`.
pub fn render(grid: &MatrixGrid, flips: &[CellFlip]) -> String {
    let categories: BTreeSet<&String> = grid.values().flat_map(|row| row.keys()).collect();
    let site_width = grid
        .keys()
        .map(|site| site.len())
        .max()
        .unwrap_or(4)
        .max(4);

    let mut out = String::new();
    let _ = write!(out, "{:<site_width$}", "Site");
    for category in &categories {
        let _ = write!(out, " | {category}");
    }
    let _ = writeln!(out);

    for (site, row) in grid {
        let _ = write!(out, "{site:<site_width$}");
        for category in &categories {
            let available = row.get(category.as_str()).copied().unwrap_or(false);
            let flipped = flips
                .iter()
                .any(|flip| flip.site == *site && flip.category == **category);
            let cell = match (available, flipped) {
                (true, true) => "yes*",
                (true, false) => "yes",
                (false, true) => "no*",
                (false, false) => "no",
            };
            let _ = write!(out, " | {cell:<width$}", width = category.len().max(4));
        }
        let _ = writeln!(out);
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixOutcome {
    pub grid: MatrixGrid,
    pub diff: MatrixDiff,
    pub report: String,
}

/// Persists the grid between runs. An unreadable prior grid degrades to
/// "no prior grid" instead of failing the cycle.
#[derive(Debug, Clone)]
pub struct GridStore {
    path: PathBuf,
}

impl GridStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        GridStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<MatrixGrid>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::IoError(err)),
        }
    }

    pub fn save(&self, grid: &MatrixGrid) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(grid)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

/// One aggregator cycle: rebuild the grid from the given snapshots, diff it
/// against the stored one, persist on change.
pub fn refresh(
    store: &GridStore,
    snapshots: &BTreeMap<String, SiteSnapshot>,
    display_categories: &[String],
) -> Result<MatrixOutcome, StoreError> {
    let prev = match store.load() {
        Ok(grid) => grid.unwrap_or_default(),
        Err(err) => {
            warn!(
                "Prior grid at {} unreadable ({}); treating as empty",
                store.path().display(),
                err
            );
            MatrixGrid::default()
        }
    };

    let grid = aggregate(snapshots, display_categories);
    let diff = diff_grids(&prev, &grid);
    if diff.changed {
        store.save(&grid)?;
    }
    let report = render(&grid, &diff.flips);

    Ok(MatrixOutcome { grid, diff, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CategorySnapshot, TicketRecord};

    fn snapshot_with(details: Vec<(&str, TicketStatus)>) -> SiteSnapshot {
        let records = details
            .into_iter()
            .map(|(name, status)| TicketRecord {
                name: name.to_string(),
                price: None,
                status,
            })
            .collect();
        let mut snapshot = SiteSnapshot::default();
        snapshot
            .categories
            .insert("General".to_string(), CategorySnapshot::found_with(records));
        snapshot
    }

    fn categories(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|label| label.to_string()).collect()
    }

    #[test]
    fn test_longest_label_wins() {
        let mut snapshots = BTreeMap::new();
        snapshots.insert(
            "siteA".to_string(),
            snapshot_with(vec![("HYROX PRO MEN", TicketStatus::Available)]),
        );
        let grid = aggregate(&snapshots, &categories(&["HYROX", "HYROX PRO"]));
        let row = &grid["siteA"];
        assert!(row["HYROX PRO"]);
        assert!(!row["HYROX"]);
    }

    #[test]
    fn test_any_available_match_marks_cell() {
        let mut snapshots = BTreeMap::new();
        snapshots.insert(
            "siteA".to_string(),
            snapshot_with(vec![
                ("HYROX MEN EARLY BIRD", TicketStatus::SoldOut),
                ("HYROX MEN REGULAR", TicketStatus::Available),
            ]),
        );
        let grid = aggregate(&snapshots, &categories(&["HYROX MEN"]));
        assert!(grid["siteA"]["HYROX MEN"]);
    }

    #[test]
    fn test_sold_out_only_leaves_cell_false() {
        let mut snapshots = BTreeMap::new();
        snapshots.insert(
            "siteA".to_string(),
            snapshot_with(vec![("HYROX MEN", TicketStatus::SoldOut)]),
        );
        let grid = aggregate(&snapshots, &categories(&["HYROX MEN"]));
        assert!(!grid["siteA"]["HYROX MEN"]);
    }

    #[test]
    fn test_cell_flip_marks_grid_changed() {
        let mut snapshots = BTreeMap::new();
        snapshots.insert(
            "siteA".to_string(),
            snapshot_with(vec![("HYROX MEN", TicketStatus::SoldOut)]),
        );
        let labels = categories(&["HYROX MEN"]);
        let before = aggregate(&snapshots, &labels);

        snapshots.insert(
            "siteA".to_string(),
            snapshot_with(vec![("HYROX MEN", TicketStatus::Available)]),
        );
        let after = aggregate(&snapshots, &labels);

        let diff = diff_grids(&before, &after);
        assert!(diff.changed);
        assert_eq!(
            diff.flips,
            vec![CellFlip {
                site: "siteA".to_string(),
                category: "HYROX MEN".to_string(),
                now: true,
            }]
        );

        let report = render(&after, &diff.flips);
        assert!(report.contains("yes*"));
    }

    #[test]
    fn test_identical_grids_do_not_change() {
        let mut snapshots = BTreeMap::new();
        snapshots.insert(
            "siteA".to_string(),
            snapshot_with(vec![("HYROX MEN", TicketStatus::Available)]),
        );
        let labels = categories(&["HYROX MEN"]);
        let grid = aggregate(&snapshots, &labels);
        assert!(!diff_grids(&grid, &grid.clone()).changed);
    }

    #[test]
    fn test_refresh_persists_on_flip() {
        let dir = tempfile::tempdir().unwrap();
        let store = GridStore::new(dir.path().join("grid.json"));
        let labels = categories(&["HYROX MEN"]);

        let mut snapshots = BTreeMap::new();
        snapshots.insert(
            "siteA".to_string(),
            snapshot_with(vec![("HYROX MEN", TicketStatus::Available)]),
        );

        let first = refresh(&store, &snapshots, &labels).unwrap();
        assert!(first.diff.changed);
        assert_eq!(store.load().unwrap(), Some(first.grid.clone()));

        let second = refresh(&store, &snapshots, &labels).unwrap();
        assert!(!second.diff.changed);
    }
}
