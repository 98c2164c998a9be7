use dotenv::dotenv;
use ticket_watch::cli::CliArgs;
use ticket_watch::config;
use ticket_watch::matrix::{self, GridStore};
use ticket_watch::monitor::{write_events, Monitor, SiteStatus};
use ticket_watch::surface::WebDriverSurface;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenv().ok();

    let args = match CliArgs::parse() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(2);
        }
    };

    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    // rustls needs a process-wide crypto provider before the first TLS
    // connection.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut sites = match config::load_sites(&args.config) {
        Ok(sites) => sites,
        Err(err) => {
            error!("Configuration error: {}", err);
            std::process::exit(1);
        }
    };
    if !args.sites.is_empty() {
        sites.retain(|site| args.sites.contains(&site.name));
        if sites.is_empty() {
            error!("No configured site matches the requested --site filter");
            std::process::exit(1);
        }
    }

    info!("Starting ticket watch");
    info!("Sites to monitor: {}", sites.len());
    info!("WebDriver endpoint: {}", args.webdriver_url);

    let surface = match WebDriverSurface::connect(&args.webdriver_url).await {
        Ok(surface) => surface,
        Err(err) => {
            error!("Failed to connect to WebDriver: {}", err);
            std::process::exit(1);
        }
    };

    let monitor = Monitor::new(Box::new(surface), args.diff_mode());
    let summary = monitor.run_all(&sites).await;
    monitor.shutdown().await;

    let matrix_outcome = args.matrix.as_ref().map(|path| {
        let store = GridStore::new(path);
        matrix::refresh(&store, &summary.snapshots, &args.matrix_categories)
    });

    if let Some(path) = &args.events_out {
        if let Err(err) = write_events(path, &summary.events) {
            error!("Failed to write change events: {}", err);
        } else {
            info!("Change events written to {}", path.display());
        }
    }

    println!("\n{:=^80}", " MONITORING SUMMARY ");
    println!(
        "Started:  {}\nFinished: {}",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        summary.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("\n{:-^80}", " SITES ");
    for report in &summary.reports {
        let status = match &report.status {
            SiteStatus::Changed => "CHANGED".to_string(),
            SiteStatus::Synced => "synced".to_string(),
            SiteStatus::Unchanged => "unchanged".to_string(),
            SiteStatus::Skipped => "skipped".to_string(),
            SiteStatus::Failed(reason) => format!("FAILED ({reason})"),
        };
        println!("{:<40} {}", report.site_name, status);
    }

    if !summary.events.is_empty() {
        println!("\n{:-^80}", " CHANGE EVENTS ");
        for event in &summary.events {
            println!("\n[{}] {}", event.site_name, event.url);
            if let Some(report) = &event.report {
                println!("{report}");
            }
        }
    }

    match matrix_outcome {
        Some(Ok(outcome)) => {
            println!("\n{:-^80}", " AVAILABILITY MATRIX ");
            print!("{}", outcome.report);
            if outcome.diff.changed {
                info!(
                    "Matrix changed: {} cell(s) flipped",
                    outcome.diff.flips.len()
                );
            }
        }
        Some(Err(err)) => error!("Matrix aggregation failed: {}", err),
        None => {}
    }

    let failed = summary.failed();
    if failed > 0 {
        warn!("{} site(s) failed this cycle", failed);
    }
    if failed == summary.reports.len() && !summary.reports.is_empty() {
        std::process::exit(1);
    }
}
