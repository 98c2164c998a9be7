use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid site '{name}': {reason}")]
    InvalidSite { name: String, reason: String },
}

/// Which adapter drives the site from its landing state. Closed set: a new
/// ticketing platform means a new variant and a new adapter, never a branch
/// inside the navigator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteType {
    /// Direct checkout page; the ticket widget is the page.
    #[default]
    Checkout,
    /// Event landing page; the checkout entry point must be discovered.
    EventPage,
    /// Landing page watched only for the tickets-on-sale marker.
    OnSale,
}

pub const DEFAULT_ON_SALE_MARKER: &str = "Buy Tickets here";

/// One monitored site, as declared in the sites config file. Read-only to
/// the crawler core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub site_type: SiteType,
    /// Category labels to track. Empty means the site is a flat variant and
    /// everything lands under the implicit "General" category.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub exclude_prefixes: Vec<String>,
    pub status_file: PathBuf,
    #[serde(default)]
    pub email_to: Option<String>,
    /// Phrase whose presence in the page source marks tickets as on sale.
    /// Only meaningful for `on_sale` sites.
    #[serde(default)]
    pub on_sale_marker: Option<String>,
}

impl SiteConfig {
    pub fn on_sale_marker(&self) -> &str {
        self.on_sale_marker
            .as_deref()
            .unwrap_or(DEFAULT_ON_SALE_MARKER)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidSite {
                name: self.name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }
        if Url::parse(&self.url).is_err() {
            return Err(ConfigError::InvalidSite {
                name: self.name.clone(),
                reason: format!("invalid url: {}", self.url),
            });
        }
        if self.status_file.as_os_str().is_empty() {
            return Err(ConfigError::InvalidSite {
                name: self.name.clone(),
                reason: "status_file must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Loads and validates the ordered site list.
pub fn load_sites(path: &Path) -> Result<Vec<SiteConfig>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let sites: Vec<SiteConfig> = serde_json::from_str(&content)?;
    for site in &sites {
        site.validate()?;
    }
    Ok(sites)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_site_list() {
        let json = r#"[
            {
                "name": "hyrox-singapore",
                "url": "https://singapore.example.com/checkout/expo",
                "keywords": ["SATURDAY | 29.11.2025", "SUNDAY | 30.11.2025"],
                "status_file": "sg_status.json",
                "email_to": "me@example.com"
            },
            {
                "name": "hyrox-oslo",
                "url": "https://example.com/events/oslo",
                "site_type": "event_page",
                "exclude_prefixes": ["VIP"],
                "status_file": "oslo_status.json"
            },
            {
                "name": "hyrox-vienna",
                "url": "https://example.com/events/vienna",
                "site_type": "on_sale",
                "status_file": "vienna_onsale.json"
            }
        ]"#;
        let sites: Vec<SiteConfig> = serde_json::from_str(json).unwrap();
        assert_eq!(sites.len(), 3);

        assert_eq!(sites[0].site_type, SiteType::Checkout);
        assert_eq!(sites[0].keywords.len(), 2);
        assert!(sites[0].exclude_prefixes.is_empty());

        assert_eq!(sites[1].site_type, SiteType::EventPage);
        assert_eq!(sites[1].exclude_prefixes, vec!["VIP".to_string()]);
        assert!(sites[1].keywords.is_empty());

        assert_eq!(sites[2].site_type, SiteType::OnSale);
        assert_eq!(sites[2].on_sale_marker(), DEFAULT_ON_SALE_MARKER);

        for site in &sites {
            site.validate().unwrap();
        }
    }

    #[test]
    fn test_unknown_site_type_is_rejected() {
        let json = r#"{
            "name": "x",
            "url": "https://example.com",
            "site_type": "mystery",
            "status_file": "x.json"
        }"#;
        assert!(serde_json::from_str::<SiteConfig>(json).is_err());
    }

    #[test]
    fn test_invalid_url_fails_validation() {
        let site = SiteConfig {
            name: "x".to_string(),
            url: "not a url".to_string(),
            site_type: SiteType::Checkout,
            keywords: Vec::new(),
            exclude_prefixes: Vec::new(),
            status_file: PathBuf::from("x.json"),
            email_to: None,
            on_sale_marker: None,
        };
        assert!(site.validate().is_err());
    }

    #[test]
    fn test_custom_on_sale_marker() {
        let site = SiteConfig {
            name: "x".to_string(),
            url: "https://example.com".to_string(),
            site_type: SiteType::OnSale,
            keywords: Vec::new(),
            exclude_prefixes: Vec::new(),
            status_file: PathBuf::from("x.json"),
            email_to: None,
            on_sale_marker: Some("Register now".to_string()),
        };
        assert_eq!(site.on_sale_marker(), "Register now");
    }
}
