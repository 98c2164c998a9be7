use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Category key used by flat site variants, which have no category level of
/// their own.
pub const GENERAL_CATEGORY: &str = "General";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    #[serde(rename = "Available")]
    Available,
    #[serde(rename = "Sold out")]
    SoldOut,
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketStatus::Available => write!(f, "Available"),
            TicketStatus::SoldOut => write!(f, "Sold out"),
        }
    }
}

/// One extracted ticket row. `name` is already normalized; equality is
/// structural over all fields, so comparison modes that ignore price strip
/// it before comparing rather than special-casing equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    pub status: TicketStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySnapshot {
    pub found: bool,
    pub details: Vec<TicketRecord>,
}

impl CategorySnapshot {
    /// State recorded for a configured keyword that was not seen on the page.
    pub fn missing() -> Self {
        CategorySnapshot {
            found: false,
            details: Vec::new(),
        }
    }

    pub fn found_with(details: Vec<TicketRecord>) -> Self {
        CategorySnapshot {
            found: true,
            details,
        }
    }
}

/// Complete structured result of one crawl cycle for one site. Constructed
/// fresh every cycle and replaced wholesale in the store; never mutated
/// incrementally across cycles.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SiteSnapshot {
    #[serde(flatten)]
    pub categories: BTreeMap<String, CategorySnapshot>,
    /// Category labels seen on the page but absent from the configured
    /// keyword list. Surfaced for drift detection; never a change signal on
    /// its own.
    #[serde(
        rename = "unmatchedCategories",
        default,
        skip_serializing_if = "BTreeSet::is_empty"
    )]
    pub unmatched_categories: BTreeSet<String>,
}

impl SiteSnapshot {
    /// Baseline snapshot for a site with no stored state: every configured
    /// keyword present as not-found, mirroring what the first observation
    /// will be diffed against.
    pub fn seeded(keywords: &[String]) -> Self {
        let categories = keywords
            .iter()
            .map(|keyword| (keyword.clone(), CategorySnapshot::missing()))
            .collect();
        SiteSnapshot {
            categories,
            unmatched_categories: BTreeSet::new(),
        }
    }

    /// Snapshot for flat variants: everything under the implicit category.
    pub fn general(details: Vec<TicketRecord>) -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            GENERAL_CATEGORY.to_string(),
            CategorySnapshot::found_with(details),
        );
        SiteSnapshot {
            categories,
            unmatched_categories: BTreeSet::new(),
        }
    }

    /// Copy with every price dropped; used by price-insensitive comparison.
    pub fn without_prices(&self) -> Self {
        let mut stripped = self.clone();
        for category in stripped.categories.values_mut() {
            for record in &mut category.details {
                record.price = None;
            }
        }
        stripped
    }
}

/// Tracked state for on-sale watch sites: a single boolean that latches true.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OnSaleState {
    pub on_sale: bool,
}

/// Persists the last-known snapshot for one monitored site. Written at most
/// once per cycle, after traversal for that site has fully completed.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SnapshotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Previous snapshot, or `None` when no state has been written yet.
    /// Corrupt content surfaces as an error; the caller decides whether to
    /// degrade to "no prior snapshot".
    pub fn load(&self) -> Result<Option<SiteSnapshot>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::IoError(err)),
        }
    }

    pub fn save(&self, snapshot: &SiteSnapshot) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn load_on_sale(&self) -> Result<Option<OnSaleState>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::IoError(err)),
        }
    }

    pub fn save_on_sale(&self, state: &OnSaleState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
