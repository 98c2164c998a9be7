use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::utils::{matches_keyword, normalize_label};

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("Browser error: {0}")]
    BrowserError(#[from] fantoccini::error::CmdError),
    #[error("New session error: {0}")]
    NewSessionError(#[from] fantoccini::error::NewSessionError),
    #[error("TLS connector error: {0}")]
    TlsError(#[from] std::io::Error),
    #[error("Timed out waiting for: {0}")]
    Timeout(String),
    #[error("No visible element for selector '{selector}' with label '{label}'")]
    ElementNotFound { selector: String, label: String },
}

/// Sub-selectors used to pull one ticket row apart. The `root` selector
/// locates candidate elements; the rest resolve inside each candidate.
#[derive(Debug, Clone)]
pub struct TicketSelectors {
    pub root: String,
    pub name: String,
    pub price: String,
    pub add_control: String,
    pub sold_out_class: String,
}

/// Point-in-time facts about one ticket-like element. Snapshots, not live
/// handles: the DOM may invalidate the element right after the query.
#[derive(Debug, Clone, Default)]
pub struct TicketCandidate {
    pub name: Option<String>,
    pub price: Option<String>,
    pub classes: Vec<String>,
    /// `Some(enabled)` when a purchase control exists inside the element.
    pub add_control: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct LinkFacts {
    pub text: String,
    pub href: String,
}

/// Polls `probe` until it reports true or `timeout` elapses. Every wait in
/// the crawler goes through this so tests can exercise timing behavior with
/// plain closures instead of a live page.
pub async fn wait_until<F, Fut>(mut probe: F, timeout: Duration, interval: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return true;
        }
        if tokio::time::Instant::now() + interval > deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}

/// The rendered-page capability the crawler is written against. The
/// production implementation drives a WebDriver session; tests substitute a
/// scripted fake. Handles are never held across interactions: queries return
/// plain data and `activate` re-resolves its target by label at call time.
#[async_trait]
pub trait ExtractionSurface: Send + Sync {
    /// Visible text of every element matching `selector`, in DOM order.
    async fn find_visible(&self, selector: &str) -> Result<Vec<String>, SurfaceError>;

    /// Visible anchors matching `selector`, with their targets.
    async fn find_links(&self, selector: &str) -> Result<Vec<LinkFacts>, SurfaceError>;

    /// Ticket-like elements currently visible, decomposed per `selectors`.
    async fn find_tickets(
        &self,
        selectors: &TicketSelectors,
    ) -> Result<Vec<TicketCandidate>, SurfaceError>;

    /// Re-resolves the first visible element matching `selector` whose text
    /// contains `label` (any visible match when `label` is empty) and clicks
    /// it. Resolution happens here, at interaction time, so callers never
    /// act on a stale handle.
    async fn activate(&self, selector: &str, label: &str) -> Result<(), SurfaceError>;

    async fn current_location(&self) -> Result<String, SurfaceError>;

    async fn navigate_to(&self, url: &str) -> Result<(), SurfaceError>;

    /// Switches into the first visible frame matching `selector`. Returns
    /// false when no such frame is attached.
    async fn enter_frame(&self, selector: &str) -> Result<bool, SurfaceError>;

    /// Returns to the top-level browsing context.
    async fn exit_frame(&self) -> Result<(), SurfaceError>;

    async fn page_source(&self) -> Result<String, SurfaceError>;

    /// Releases whatever session backs the surface. No-op by default.
    async fn dispose(&self) -> Result<(), SurfaceError> {
        Ok(())
    }

    /// Bounded poll until at least one element matching `selector` is
    /// visible. False means the timeout elapsed, not an error.
    async fn wait_for_visible(
        &self,
        selector: &str,
        timeout: Duration,
        interval: Duration,
    ) -> bool {
        wait_until(
            move || async move {
                matches!(self.find_visible(selector).await, Ok(texts) if !texts.is_empty())
            },
            timeout,
            interval,
        )
        .await
    }

    /// Like [`ExtractionSurface::wait_for_visible`], but an elapsed timeout
    /// surfaces as a typed failure.
    async fn require_visible(
        &self,
        selector: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<(), SurfaceError> {
        if self.wait_for_visible(selector, timeout, interval).await {
            Ok(())
        } else {
            Err(SurfaceError::Timeout(format!(
                "visible element for '{selector}'"
            )))
        }
    }

    /// Bounded poll until an element matching `selector` carries `label`.
    async fn wait_for_labeled(
        &self,
        selector: &str,
        label: &str,
        timeout: Duration,
        interval: Duration,
    ) -> bool {
        wait_until(
            move || async move {
                match self.find_visible(selector).await {
                    Ok(texts) => texts.iter().any(|text| matches_keyword(text, label)),
                    Err(_) => false,
                }
            },
            timeout,
            interval,
        )
        .await
    }
}

/// WebDriver-backed surface. One session per run; the monitor loop drives
/// one site at a time through it.
pub struct WebDriverSurface {
    client: Client,
}

impl WebDriverSurface {
    pub async fn connect(webdriver_url: &str) -> Result<Self, SurfaceError> {
        let client = ClientBuilder::rustls()?.connect(webdriver_url).await?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ExtractionSurface for WebDriverSurface {
    async fn find_visible(&self, selector: &str) -> Result<Vec<String>, SurfaceError> {
        let elements = self.client.find_all(Locator::Css(selector)).await?;
        let mut texts = Vec::new();
        for element in elements {
            // Elements can go stale between find_all and the queries below;
            // such elements are skipped, not errors.
            if !element.is_displayed().await.unwrap_or(false) {
                continue;
            }
            if let Ok(text) = element.text().await {
                let text = normalize_label(&text);
                if !text.is_empty() {
                    texts.push(text);
                }
            }
        }
        Ok(texts)
    }

    async fn find_links(&self, selector: &str) -> Result<Vec<LinkFacts>, SurfaceError> {
        let elements = self.client.find_all(Locator::Css(selector)).await?;
        let mut links = Vec::new();
        for element in elements {
            if !element.is_displayed().await.unwrap_or(false) {
                continue;
            }
            let href = match element.attr("href").await {
                Ok(Some(href)) => href.trim().to_string(),
                _ => continue,
            };
            if href.is_empty() {
                continue;
            }
            let text = element
                .text()
                .await
                .map(|text| normalize_label(&text))
                .unwrap_or_default();
            links.push(LinkFacts { text, href });
        }
        Ok(links)
    }

    async fn find_tickets(
        &self,
        selectors: &TicketSelectors,
    ) -> Result<Vec<TicketCandidate>, SurfaceError> {
        let elements = self
            .client
            .find_all(Locator::Css(&selectors.root))
            .await?;
        let mut candidates = Vec::new();
        for element in elements {
            if !element.is_displayed().await.unwrap_or(false) {
                continue;
            }

            let name = match element.find(Locator::Css(&selectors.name)).await {
                Ok(part) => part
                    .text()
                    .await
                    .ok()
                    .map(|text| normalize_label(&text))
                    .filter(|text| !text.is_empty()),
                Err(_) => None,
            };

            let price = match element.find(Locator::Css(&selectors.price)).await {
                Ok(part) => part
                    .text()
                    .await
                    .ok()
                    .map(|text| normalize_label(&text))
                    .filter(|text| !text.is_empty()),
                Err(_) => None,
            };

            let classes = element
                .attr("class")
                .await
                .ok()
                .flatten()
                .unwrap_or_default()
                .split_whitespace()
                .map(|class| class.to_string())
                .collect();

            let add_control = match element.find(Locator::Css(&selectors.add_control)).await {
                Ok(control) => Some(control.is_enabled().await.unwrap_or(false)),
                Err(_) => None,
            };

            candidates.push(TicketCandidate {
                name,
                price,
                classes,
                add_control,
            });
        }
        Ok(candidates)
    }

    async fn activate(&self, selector: &str, label: &str) -> Result<(), SurfaceError> {
        let elements = self.client.find_all(Locator::Css(selector)).await?;
        for element in elements {
            if !element.is_displayed().await.unwrap_or(false) {
                continue;
            }
            let matched = if label.is_empty() {
                true
            } else {
                match element.text().await {
                    Ok(text) => matches_keyword(&text, label),
                    Err(_) => false,
                }
            };
            if matched {
                element.click().await?;
                return Ok(());
            }
        }
        Err(SurfaceError::ElementNotFound {
            selector: selector.to_string(),
            label: label.to_string(),
        })
    }

    async fn current_location(&self) -> Result<String, SurfaceError> {
        let url = self.client.current_url().await?;
        Ok(url.to_string())
    }

    async fn navigate_to(&self, url: &str) -> Result<(), SurfaceError> {
        self.client.goto(url).await?;
        Ok(())
    }

    async fn enter_frame(&self, selector: &str) -> Result<bool, SurfaceError> {
        let frames = self.client.find_all(Locator::Css(selector)).await?;
        for frame in frames {
            if frame.is_displayed().await.unwrap_or(false) {
                frame.enter_frame().await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn exit_frame(&self) -> Result<(), SurfaceError> {
        self.client.clone().enter_parent_frame().await?;
        Ok(())
    }

    async fn page_source(&self) -> Result<String, SurfaceError> {
        let source = self.client.source().await?;
        Ok(source)
    }

    async fn dispose(&self) -> Result<(), SurfaceError> {
        self.client.clone().close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_wait_until_succeeds_before_timeout() {
        let calls = AtomicUsize::new(0);
        let ok = wait_until(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                calls.load(Ordering::SeqCst) >= 3
            },
            Duration::from_millis(500),
            Duration::from_millis(1),
        )
        .await;
        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let ok = wait_until(
            || async { false },
            Duration::from_millis(10),
            Duration::from_millis(2),
        )
        .await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_wait_until_probes_at_least_once() {
        let ok = wait_until(|| async { true }, Duration::ZERO, Duration::from_millis(1)).await;
        assert!(ok);
    }
}
