use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::adapters::{adapter_for, on_sale_is_live, AdapterError};
use crate::config::{SiteConfig, SiteType};
use crate::diff::{diff, DiffMode};
use crate::navigator::{crawl_site, CrawlContext};
use crate::snapshot::{OnSaleState, SiteSnapshot, SnapshotStore, StoreError};
use crate::surface::{ExtractionSurface, SurfaceError};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Adapter error: {0}")]
    AdapterError(#[from] AdapterError),
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Surface error: {0}")]
    SurfaceError(#[from] SurfaceError),
}

/// Emitted once per site whose observation warrants a notification. The
/// notifier consuming these is external; this is the whole contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub site_name: String,
    pub url: String,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteStatus {
    /// A status flip was observed; a change event was emitted.
    Changed,
    /// The snapshot moved structurally but nothing flipped; the store was
    /// updated without an alert.
    Synced,
    Unchanged,
    /// Nothing to do this cycle (e.g. an on-sale site already marked live).
    Skipped,
    /// The cycle could not produce an authoritative snapshot; the prior one
    /// remains the reference.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SiteReport {
    pub site_name: String,
    pub status: SiteStatus,
}

/// Result of one full cycle for one site.
#[derive(Debug)]
pub struct SiteCycle {
    pub status: SiteStatus,
    pub event: Option<ChangeEvent>,
    /// Last-known authoritative snapshot for this site, fed to the matrix
    /// aggregator. `None` for on-sale sites, which have no snapshot.
    pub snapshot: Option<SiteSnapshot>,
}

#[derive(Debug)]
pub struct BatchSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reports: Vec<SiteReport>,
    pub events: Vec<ChangeEvent>,
    pub snapshots: BTreeMap<String, SiteSnapshot>,
}

impl BatchSummary {
    pub fn changed(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| report.status == SiteStatus::Changed)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.reports
            .iter()
            .filter(|report| matches!(report.status, SiteStatus::Failed(_)))
            .count()
    }
}

/// Serializes the batch's change events for downstream consumers.
pub fn write_events(path: &Path, events: &[ChangeEvent]) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(events)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Drives monitoring cycles over one shared page surface, one site at a
/// time. A failure in one site never aborts the rest of the batch.
pub struct Monitor {
    surface: Box<dyn ExtractionSurface>,
    diff_mode: DiffMode,
}

impl Monitor {
    pub fn new(surface: Box<dyn ExtractionSurface>, diff_mode: DiffMode) -> Self {
        Monitor { surface, diff_mode }
    }

    pub async fn run_all(&self, sites: &[SiteConfig]) -> BatchSummary {
        let started_at = Utc::now();
        let mut reports = Vec::new();
        let mut events = Vec::new();
        let mut snapshots = BTreeMap::new();

        for site in sites {
            info!("--- Processing site: {} ---", site.name);
            match self.run_site(site).await {
                Ok(cycle) => {
                    if let Some(event) = cycle.event {
                        events.push(event);
                    }
                    if let Some(snapshot) = cycle.snapshot {
                        snapshots.insert(site.name.clone(), snapshot);
                    }
                    reports.push(SiteReport {
                        site_name: site.name.clone(),
                        status: cycle.status,
                    });
                }
                Err(err) => {
                    error!("Failed to process site {}: {}", site.name, err);
                    reports.push(SiteReport {
                        site_name: site.name.clone(),
                        status: SiteStatus::Failed(err.to_string()),
                    });
                }
            }
        }

        BatchSummary {
            started_at,
            finished_at: Utc::now(),
            reports,
            events,
            snapshots,
        }
    }

    /// Releases the underlying page surface (e.g. the WebDriver session).
    pub async fn shutdown(self) {
        if let Err(err) = self.surface.dispose().await {
            warn!("Could not release page surface cleanly: {}", err);
        }
    }

    pub async fn run_site(&self, config: &SiteConfig) -> Result<SiteCycle, MonitorError> {
        match config.site_type {
            SiteType::OnSale => self.run_on_sale(config).await,
            SiteType::Checkout | SiteType::EventPage => self.run_tree(config).await,
        }
    }

    async fn run_tree(&self, config: &SiteConfig) -> Result<SiteCycle, MonitorError> {
        let store = SnapshotStore::new(&config.status_file);
        let prev = match store.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!(
                    "No prior snapshot at {}; starting from seeded baseline",
                    store.path().display()
                );
                SiteSnapshot::seeded(&config.keywords)
            }
            Err(err) => {
                warn!(
                    "Prior snapshot at {} unreadable ({}); treating as no prior snapshot",
                    store.path().display(),
                    err
                );
                SiteSnapshot::seeded(&config.keywords)
            }
        };

        // run_site routes on-sale sites elsewhere; both tree variants have
        // an adapter.
        let Some(adapter) = adapter_for(config.site_type) else {
            unreachable!("tree site type without an adapter");
        };

        let entry = match adapter.prepare(self.surface.as_ref(), config).await {
            Ok(entry) => entry,
            Err(AdapterError::EntryNotFound { .. }) => {
                warn!(
                    "No entry point found for '{}'; site skipped, prior snapshot retained",
                    config.name
                );
                return Ok(SiteCycle {
                    status: SiteStatus::Failed("entry point not found".to_string()),
                    event: None,
                    snapshot: Some(prev),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let ctx = CrawlContext::new(config.keywords.clone(), config.exclude_prefixes.clone());
        let outcome = crawl_site(self.surface.as_ref(), &entry.shape, &ctx).await;
        if let Err(err) = self.surface.exit_frame().await {
            warn!("Could not restore top browsing context: {}", err);
        }

        if !outcome.reached {
            warn!(
                "Site '{}' never reached a scrape-able state; snapshot discarded",
                config.name
            );
            return Ok(SiteCycle {
                status: SiteStatus::Failed(
                    "navigation never reached a scrape-able state".to_string(),
                ),
                event: None,
                snapshot: Some(prev),
            });
        }

        let curr = outcome.snapshot;
        if !curr.unmatched_categories.is_empty() {
            info!(
                "Structural drift on '{}': unmatched categories {:?}",
                config.name, curr.unmatched_categories
            );
        }

        let result = diff(&prev, &curr, self.diff_mode);
        let status = if result.changed {
            store.save(&curr)?;
            info!("CHANGE DETECTED for {}!", config.name);
            SiteStatus::Changed
        } else if result.store_update {
            store.save(&curr)?;
            info!("Snapshot for {} updated without alert", config.name);
            SiteStatus::Synced
        } else {
            info!("No changes detected for {}.", config.name);
            SiteStatus::Unchanged
        };

        let event = result.changed.then(|| ChangeEvent {
            site_name: config.name.clone(),
            url: config.url.clone(),
            changed: true,
            report: Some(result.report.clone()),
            detected_at: Utc::now(),
        });

        Ok(SiteCycle {
            status,
            event,
            snapshot: Some(curr),
        })
    }

    async fn run_on_sale(&self, config: &SiteConfig) -> Result<SiteCycle, MonitorError> {
        let store = SnapshotStore::new(&config.status_file);
        let state = match store.load_on_sale() {
            Ok(Some(state)) => state,
            Ok(None) => OnSaleState::default(),
            Err(err) => {
                warn!(
                    "On-sale state at {} unreadable ({}); assuming not yet on sale",
                    store.path().display(),
                    err
                );
                OnSaleState::default()
            }
        };

        if state.on_sale {
            info!("Skipping '{}', already marked as on sale", config.name);
            return Ok(SiteCycle {
                status: SiteStatus::Skipped,
                event: None,
                snapshot: None,
            });
        }

        let live = on_sale_is_live(self.surface.as_ref(), config).await?;
        if !live {
            info!("Tickets not yet on sale for {}.", config.name);
            return Ok(SiteCycle {
                status: SiteStatus::Unchanged,
                event: None,
                snapshot: None,
            });
        }

        store.save_on_sale(&OnSaleState { on_sale: true })?;
        info!("ON-SALE DETECTED for {}!", config.name);
        Ok(SiteCycle {
            status: SiteStatus::Changed,
            event: Some(ChangeEvent {
                site_name: config.name.clone(),
                url: config.url.clone(),
                changed: true,
                report: Some(format!(
                    "Tickets for {} are now on sale: {}",
                    config.name, config.url
                )),
                detected_at: Utc::now(),
            }),
            snapshot: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{LinkFacts, TicketCandidate, TicketSelectors};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn on_sale_site(status_file: PathBuf, source: &str) -> (SiteConfig, StaticPage) {
        let config = SiteConfig {
            name: "vienna".to_string(),
            url: "https://example.com/events/vienna".to_string(),
            site_type: SiteType::OnSale,
            keywords: Vec::new(),
            exclude_prefixes: Vec::new(),
            status_file,
            email_to: None,
            on_sale_marker: None,
        };
        let page = StaticPage {
            source: source.to_string(),
            navigations: Mutex::new(Vec::new()),
        };
        (config, page)
    }

    /// Inert page: nothing visible, nothing clickable, fixed source.
    struct StaticPage {
        source: String,
        navigations: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExtractionSurface for StaticPage {
        async fn find_visible(&self, _selector: &str) -> Result<Vec<String>, SurfaceError> {
            Ok(Vec::new())
        }

        async fn find_links(&self, _selector: &str) -> Result<Vec<LinkFacts>, SurfaceError> {
            Ok(Vec::new())
        }

        async fn find_tickets(
            &self,
            _selectors: &TicketSelectors,
        ) -> Result<Vec<TicketCandidate>, SurfaceError> {
            Ok(Vec::new())
        }

        async fn activate(&self, selector: &str, label: &str) -> Result<(), SurfaceError> {
            Err(SurfaceError::ElementNotFound {
                selector: selector.to_string(),
                label: label.to_string(),
            })
        }

        async fn current_location(&self) -> Result<String, SurfaceError> {
            Ok(String::new())
        }

        async fn navigate_to(&self, url: &str) -> Result<(), SurfaceError> {
            self.navigations.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn enter_frame(&self, _selector: &str) -> Result<bool, SurfaceError> {
            Ok(false)
        }

        async fn exit_frame(&self) -> Result<(), SurfaceError> {
            Ok(())
        }

        async fn page_source(&self) -> Result<String, SurfaceError> {
            Ok(self.source.clone())
        }
    }

    #[tokio::test]
    async fn test_on_sale_transition_latches_and_emits() {
        let dir = tempfile::tempdir().unwrap();
        let status_file = dir.path().join("vienna.json");
        let (config, page) = on_sale_site(status_file.clone(), "… Buy Tickets here …");

        let monitor = Monitor::new(Box::new(page), DiffMode::IgnorePrice);
        let cycle = monitor.run_site(&config).await.unwrap();
        assert_eq!(cycle.status, SiteStatus::Changed);
        assert!(cycle.event.is_some());

        // Once latched, the site is skipped without another probe.
        let (config, page) = on_sale_site(status_file, "anything");
        let monitor = Monitor::new(Box::new(page), DiffMode::IgnorePrice);
        let cycle = monitor.run_site(&config).await.unwrap();
        assert_eq!(cycle.status, SiteStatus::Skipped);
    }

    #[tokio::test]
    async fn test_on_sale_not_live_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (config, page) = on_sale_site(dir.path().join("vienna.json"), "Coming soon");
        let monitor = Monitor::new(Box::new(page), DiffMode::IgnorePrice);
        let cycle = monitor.run_site(&config).await.unwrap();
        assert_eq!(cycle.status, SiteStatus::Unchanged);
        assert!(cycle.event.is_none());
    }

    #[tokio::test]
    async fn test_entry_not_found_retains_prior_snapshot() {
        tokio::time::pause();

        let dir = tempfile::tempdir().unwrap();
        let status_file = dir.path().join("site.json");

        // Seed a prior snapshot on disk.
        let store = SnapshotStore::new(&status_file);
        let prior = SiteSnapshot::seeded(&["A".to_string()]);
        store.save(&prior).unwrap();

        let config = SiteConfig {
            name: "site".to_string(),
            url: "https://example.com/checkout/x".to_string(),
            site_type: SiteType::Checkout,
            keywords: vec!["A".to_string()],
            exclude_prefixes: Vec::new(),
            status_file: status_file.clone(),
            email_to: None,
            on_sale_marker: None,
        };
        let page = StaticPage {
            source: String::new(),
            navigations: Mutex::new(Vec::new()),
        };

        let monitor = Monitor::new(Box::new(page), DiffMode::IgnorePrice);
        let cycle = monitor.run_site(&config).await.unwrap();
        assert!(matches!(cycle.status, SiteStatus::Failed(_)));
        assert!(cycle.event.is_none());
        assert_eq!(store.load().unwrap(), Some(prior));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        tokio::time::pause();

        let dir = tempfile::tempdir().unwrap();
        let sites = vec![
            SiteConfig {
                name: "broken".to_string(),
                url: "https://example.com/checkout/a".to_string(),
                site_type: SiteType::Checkout,
                keywords: Vec::new(),
                exclude_prefixes: Vec::new(),
                status_file: dir.path().join("a.json"),
                email_to: None,
                on_sale_marker: None,
            },
            SiteConfig {
                name: "vienna".to_string(),
                url: "https://example.com/events/vienna".to_string(),
                site_type: SiteType::OnSale,
                keywords: Vec::new(),
                exclude_prefixes: Vec::new(),
                status_file: dir.path().join("vienna.json"),
                email_to: None,
                on_sale_marker: None,
            },
        ];
        let page = StaticPage {
            source: "Buy Tickets here".to_string(),
            navigations: Mutex::new(Vec::new()),
        };

        let monitor = Monitor::new(Box::new(page), DiffMode::IgnorePrice);
        let summary = monitor.run_all(&sites).await;
        assert_eq!(summary.reports.len(), 2);
        assert!(matches!(summary.reports[0].status, SiteStatus::Failed(_)));
        assert_eq!(summary.reports[1].status, SiteStatus::Changed);
        assert_eq!(summary.changed(), 1);
        assert_eq!(summary.failed(), 1);
    }
}
