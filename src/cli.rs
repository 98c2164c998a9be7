use clap::{Arg, Command};
use std::path::PathBuf;

use crate::diff::DiffMode;

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config: PathBuf,
    pub sites: Vec<String>,
    pub events_out: Option<PathBuf>,
    pub matrix: Option<PathBuf>,
    pub matrix_categories: Vec<String>,
    pub webdriver_url: String,
    pub price_sensitive: bool,
    pub verbose: bool,
}

impl CliArgs {
    pub fn parse() -> Result<Self, String> {
        let matches = Command::new("ticket-watch")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Monitors ticketing pages and reports availability changes")
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_name("FILE")
                    .help("Path to the sites configuration file (JSON)")
                    .required(true),
            )
            .arg(
                Arg::new("site")
                    .long("site")
                    .value_name("NAME")
                    .help("Only process the named site (can be specified multiple times)")
                    .action(clap::ArgAction::Append),
            )
            .arg(
                Arg::new("events-out")
                    .long("events-out")
                    .value_name("FILE")
                    .help("Write emitted change events to this file as JSON"),
            )
            .arg(
                Arg::new("matrix")
                    .long("matrix")
                    .value_name("FILE")
                    .help("Path of the persisted category-by-site availability grid"),
            )
            .arg(
                Arg::new("matrix-category")
                    .long("matrix-category")
                    .value_name("LABEL")
                    .help("Display category for the grid (can be specified multiple times)")
                    .action(clap::ArgAction::Append),
            )
            .arg(
                Arg::new("webdriver-url")
                    .long("webdriver-url")
                    .value_name("URL")
                    .help("WebDriver endpoint (default: WEBDRIVER_URL env var or http://localhost:4444)"),
            )
            .arg(
                Arg::new("price-sensitive")
                    .long("price-sensitive")
                    .help("Compare snapshots including prices (default ignores them)")
                    .action(clap::ArgAction::SetTrue),
            )
            .arg(
                Arg::new("verbose")
                    .long("verbose")
                    .help("Enable verbose output")
                    .action(clap::ArgAction::SetTrue),
            )
            .get_matches();

        let config = matches
            .get_one::<String>("config")
            .map(PathBuf::from)
            .ok_or_else(|| "Missing --config".to_string())?;

        let sites: Vec<String> = matches
            .get_many::<String>("site")
            .unwrap_or_default()
            .cloned()
            .collect();

        let matrix_categories: Vec<String> = matches
            .get_many::<String>("matrix-category")
            .unwrap_or_default()
            .cloned()
            .collect();

        let webdriver_url = matches
            .get_one::<String>("webdriver-url")
            .cloned()
            .or_else(|| std::env::var("WEBDRIVER_URL").ok())
            .unwrap_or_else(|| "http://localhost:4444".to_string());

        let args = CliArgs {
            config,
            sites,
            events_out: matches.get_one::<String>("events-out").map(PathBuf::from),
            matrix: matches.get_one::<String>("matrix").map(PathBuf::from),
            matrix_categories,
            webdriver_url,
            price_sensitive: matches.get_flag("price-sensitive"),
            verbose: matches.get_flag("verbose"),
        };
        args.validate()?;
        Ok(args)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.matrix.is_some() && self.matrix_categories.is_empty() {
            return Err(
                "--matrix requires at least one --matrix-category".to_string(),
            );
        }
        if self.matrix.is_none() && !self.matrix_categories.is_empty() {
            return Err("--matrix-category requires --matrix".to_string());
        }
        Ok(())
    }

    pub fn diff_mode(&self) -> DiffMode {
        if self.price_sensitive {
            DiffMode::PriceSensitive
        } else {
            DiffMode::IgnorePrice
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs {
            config: PathBuf::from("config.json"),
            sites: Vec::new(),
            events_out: None,
            matrix: None,
            matrix_categories: Vec::new(),
            webdriver_url: "http://localhost:4444".to_string(),
            price_sensitive: false,
            verbose: false,
        }
    }

    #[test]
    fn test_validate_matrix_requires_categories() {
        let mut args = base_args();
        args.matrix = Some(PathBuf::from("grid.json"));
        assert!(args.validate().is_err());

        args.matrix_categories = vec!["HYROX MEN".to_string()];
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validate_categories_require_matrix() {
        let mut args = base_args();
        args.matrix_categories = vec!["HYROX MEN".to_string()];
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_diff_mode_default_ignores_price() {
        let mut args = base_args();
        assert_eq!(args.diff_mode(), DiffMode::IgnorePrice);
        args.price_sensitive = true;
        assert_eq!(args.diff_mode(), DiffMode::PriceSensitive);
    }
}
