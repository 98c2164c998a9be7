use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{SiteConfig, SiteType};
use crate::navigator::{BackAffordance, OptionLocator, ViewShape};
use crate::surface::{ExtractionSurface, SurfaceError, TicketSelectors};
use crate::utils::{canonical_checkout_url, matches_keyword};

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("No entry point into the ticket widget for '{site}'")]
    EntryNotFound { site: String },
    #[error("Surface error: {0}")]
    SurfaceError(#[from] SurfaceError),
}

/// A prepared page, ready for traversal: the widget is rendered (in the
/// current browsing context) and its structural shape is known.
#[derive(Debug)]
pub struct EntryView {
    pub shape: ViewShape,
}

/// Per-variant logic that drives a site from its landing state to the point
/// where traversal can begin. Variants that cannot resolve an entry point
/// return `EntryNotFound`; nothing panics past this boundary.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    async fn prepare(
        &self,
        surface: &dyn ExtractionSurface,
        config: &SiteConfig,
    ) -> Result<EntryView, AdapterError>;
}

/// Adapter for the given variant. On-sale sites do not navigate a tree and
/// have no adapter; the monitor probes them via [`on_sale_is_live`].
pub fn adapter_for(site_type: SiteType) -> Option<Box<dyn SiteAdapter>> {
    match site_type {
        SiteType::Checkout => Some(Box::new(CheckoutAdapter::default())),
        SiteType::EventPage => Some(Box::new(EventPageAdapter::default())),
        SiteType::OnSale => None,
    }
}

/// Structural shape of the checkout widget both tree variants end up in.
fn widget_shape() -> ViewShape {
    ViewShape {
        options: OptionLocator::Cards {
            selector: "div.vi-text".to_string(),
        },
        tickets: TicketSelectors {
            root: "div.ticket-type".to_string(),
            name: ".vi-font-semibold".to_string(),
            price: ".price".to_string(),
            add_control: "button[class*='add']".to_string(),
            sold_out_class: "sold-out".to_string(),
        },
        back: Some(BackAffordance {
            selector: "button".to_string(),
            label: "Back to categories".to_string(),
        }),
        settle: ".categories, div.ticket-type".to_string(),
    }
}

const WIDGET_FRAME_SELECTOR: &str = "iframe[src*='vivenu'], iframe[src*='checkout']";

/// Labels tried when hunting for the purchase entry point on a landing page.
const ENTRY_KEYWORDS: &[&str] = &["Buy Tickets", "Tickets", "Book now", "Register"];

/// Consent banners differ per region; each strategy is a selector plus an
/// optional label filter, tried in sequence until one visible match is
/// clicked. Banners can render late, hence the bounded retry.
const CONSENT_STRATEGIES: &[(&str, &str)] = &[
    ("#onetrust-accept-btn-handler", ""),
    ("button#cookie-accept", ""),
    (".cc-allow", ""),
    ("button", "Accept all"),
    ("button", "Accept"),
];

async fn dismiss_consent(surface: &dyn ExtractionSurface, attempts: usize, delay: Duration) {
    for attempt in 0..attempts {
        for (selector, label) in CONSENT_STRATEGIES {
            if surface.activate(selector, label).await.is_ok() {
                debug!("Dismissed consent overlay via '{}'", selector);
                return;
            }
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    debug!("No consent overlay found");
}

/// Waits for the widget in the top context, then behind the known frame.
/// Leaves the surface inside the frame on success there; otherwise restores
/// the top context.
async fn settle_into_widget(
    surface: &dyn ExtractionSurface,
    shape: &ViewShape,
    timeout: Duration,
    frame_timeout: Duration,
    poll: Duration,
) -> Result<bool, SurfaceError> {
    if surface.wait_for_visible(&shape.settle, timeout, poll).await {
        return Ok(true);
    }
    if surface.enter_frame(WIDGET_FRAME_SELECTOR).await? {
        if surface
            .wait_for_visible(&shape.settle, frame_timeout, poll)
            .await
        {
            return Ok(true);
        }
        surface.exit_frame().await?;
    }
    Ok(false)
}

/// Direct checkout pages: the widget is the page, give or take a consent
/// overlay and an occasional isolating frame.
pub struct CheckoutAdapter {
    pub entry_timeout: Duration,
    pub frame_timeout: Duration,
    pub poll_interval: Duration,
    pub consent_attempts: usize,
    pub consent_delay: Duration,
}

impl Default for CheckoutAdapter {
    fn default() -> Self {
        CheckoutAdapter {
            entry_timeout: Duration::from_secs(20),
            frame_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
            consent_attempts: 3,
            consent_delay: Duration::from_millis(300),
        }
    }
}

#[async_trait]
impl SiteAdapter for CheckoutAdapter {
    async fn prepare(
        &self,
        surface: &dyn ExtractionSurface,
        config: &SiteConfig,
    ) -> Result<EntryView, AdapterError> {
        surface.navigate_to(&config.url).await?;
        dismiss_consent(surface, self.consent_attempts, self.consent_delay).await;

        let shape = widget_shape();
        if settle_into_widget(
            surface,
            &shape,
            self.entry_timeout,
            self.frame_timeout,
            self.poll_interval,
        )
        .await?
        {
            return Ok(EntryView { shape });
        }

        Err(AdapterError::EntryNotFound {
            site: config.name.clone(),
        })
    }
}

/// Event landing pages: the checkout entry point has to be discovered.
/// A resolved deep link is normalized and navigated to directly before
/// falling back to clicking through the page.
pub struct EventPageAdapter {
    pub entry_timeout: Duration,
    pub frame_timeout: Duration,
    pub poll_interval: Duration,
    pub consent_attempts: usize,
    pub consent_delay: Duration,
}

impl Default for EventPageAdapter {
    fn default() -> Self {
        EventPageAdapter {
            entry_timeout: Duration::from_secs(20),
            frame_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
            consent_attempts: 3,
            consent_delay: Duration::from_millis(300),
        }
    }
}

impl EventPageAdapter {
    /// Scans the page's anchors for a checkout deep link: href signals
    /// first, then the entry keywords over link texts.
    async fn resolve_checkout_link(
        &self,
        surface: &dyn ExtractionSurface,
        base: &str,
    ) -> Result<Option<String>, SurfaceError> {
        let links = surface.find_links("a[href]").await?;

        for link in &links {
            if link.href.contains("checkout") || link.href.contains("/tickets") {
                if let Some(canonical) = canonical_checkout_url(&link.href, base) {
                    return Ok(Some(canonical));
                }
            }
        }
        for keyword in ENTRY_KEYWORDS {
            for link in &links {
                if matches_keyword(&link.text, keyword) {
                    if let Some(canonical) = canonical_checkout_url(&link.href, base) {
                        return Ok(Some(canonical));
                    }
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl SiteAdapter for EventPageAdapter {
    async fn prepare(
        &self,
        surface: &dyn ExtractionSurface,
        config: &SiteConfig,
    ) -> Result<EntryView, AdapterError> {
        surface.navigate_to(&config.url).await?;
        dismiss_consent(surface, self.consent_attempts, self.consent_delay).await;

        let shape = widget_shape();

        if let Some(canonical) = self.resolve_checkout_link(surface, &config.url).await? {
            info!("Resolved checkout URL for '{}': {}", config.name, canonical);
            surface.navigate_to(&canonical).await?;
            dismiss_consent(surface, self.consent_attempts, self.consent_delay).await;
            if settle_into_widget(
                surface,
                &shape,
                self.entry_timeout,
                self.frame_timeout,
                self.poll_interval,
            )
            .await?
            {
                return Ok(EntryView { shape });
            }
            // The resolved link went nowhere useful; retry on the page.
            surface.navigate_to(&config.url).await?;
        }

        for keyword in ENTRY_KEYWORDS {
            if surface.activate("a, button", keyword).await.is_err() {
                continue;
            }
            debug!("Entered widget via in-page control '{}'", keyword);
            if settle_into_widget(
                surface,
                &shape,
                self.entry_timeout,
                self.frame_timeout,
                self.poll_interval,
            )
            .await?
            {
                return Ok(EntryView { shape });
            }
        }

        Err(AdapterError::EntryNotFound {
            site: config.name.clone(),
        })
    }
}

/// On-sale probe: the landing page is checked for the configured marker
/// phrase. No tree, no snapshot; just a boolean.
pub async fn on_sale_is_live(
    surface: &dyn ExtractionSurface,
    config: &SiteConfig,
) -> Result<bool, AdapterError> {
    surface.navigate_to(&config.url).await?;
    let source = surface.page_source().await?;
    Ok(source.contains(config.on_sale_marker()))
}
