use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use clap::Parser;
use tracing::{info, warn};

use super::crawl::{CrawlOutcome, run_pages};
use super::data_io::{self, DatasetSummary};
use super::error::Result;
use super::extract::ListingExtractor;
use super::fetch::PageFetcher;
use super::types::{Cli, RunConfig};
use super::webdriver::{BrowserSession, open_session};

/// What a finished run did, for the closing report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub pages_attempted: usize,
    pub pages_succeeded: usize,
    pub failed_pages: Vec<u32>,
    pub blank_listings: usize,
    pub interrupted: bool,
    pub summary: DatasetSummary,
    /// `None` when nothing was scraped and no file was written.
    pub output: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    /// First Ctrl-C: finish the current page, then stop.
    Finish,
    /// Ctrl-C again while the run is still winding down.
    ForceQuit,
}

fn on_interrupt(shutdown: &AtomicBool) -> InterruptAction {
    if shutdown.swap(true, Ordering::Relaxed) {
        InterruptAction::ForceQuit
    } else {
        InterruptAction::Finish
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    let t0 = Instant::now();
    let cli = Cli::parse();
    let config = RunConfig::from_cli(cli)?;
    let extractor = ListingExtractor::new(config.markup.clone())?;

    info!(
        start = config.range.start(),
        end = config.range.end(),
        pages = config.range.page_count(),
        headless = config.webdriver.headless,
        browser = ?config.webdriver.browser,
        output = %config.output_path,
        "car scraper starting"
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match on_interrupt(&flag) {
                InterruptAction::Finish => {
                    warn!("interrupt received, finishing current page (Ctrl-C again to quit now)");
                }
                InterruptAction::ForceQuit => {
                    warn!("second interrupt, exiting without saving");
                    std::process::exit(130);
                }
            }
        }
    });

    let (mut session, mut driver) = open_session(&config.webdriver).await?;
    let report = execute(&config, &extractor, &mut session, &shutdown).await;
    if let Some(driver) = driver.as_mut() {
        driver.stop();
    }
    let report = report?;

    print_report(&report);
    info!(elapsed_secs = t0.elapsed().as_secs_f64(), "run finished");
    Ok(())
}

/// Scrapes the configured range with `session`, releases it, then builds
/// and persists the dataset.
pub async fn execute<S>(
    config: &RunConfig,
    extractor: &ListingExtractor,
    session: &mut S,
    shutdown: &AtomicBool,
) -> Result<RunReport>
where
    S: BrowserSession + ?Sized,
{
    let outcome = scrape(config, extractor, session, shutdown).await;
    release_session(session).await;
    persist(outcome, config)
}

async fn scrape<S>(
    config: &RunConfig,
    extractor: &ListingExtractor,
    session: &mut S,
    shutdown: &AtomicBool,
) -> CrawlOutcome
where
    S: BrowserSession + ?Sized,
{
    let mut fetcher = PageFetcher::new(
        session,
        config.target.clone(),
        config.policy.clone(),
        shutdown,
    );
    run_pages(
        config.range,
        &mut fetcher,
        |html| extractor.extract(html),
        config.pacing,
        shutdown,
    )
    .await
}

async fn release_session<S: BrowserSession + ?Sized>(session: &mut S) {
    if let Err(err) = session.close().await {
        warn!(%err, "failed to close browser session");
    }
}

fn persist(outcome: CrawlOutcome, config: &RunConfig) -> Result<RunReport> {
    let pages_attempted = outcome.pages.len();
    let pages_succeeded = outcome.pages_succeeded();
    let failed_pages = outcome.failed_pages();
    let blank_listings = outcome.blank_listings();
    let interrupted = outcome.interrupted;

    let (dataset, summary) = data_io::build(outcome.listings);
    let output = if dataset.is_empty() {
        warn!("no data scraped, nothing written");
        None
    } else {
        data_io::write_dataset(&dataset, &config.output_path, config.output_format)?;
        Some(config.output_path.clone())
    };

    Ok(RunReport {
        pages_attempted,
        pages_succeeded,
        failed_pages,
        blank_listings,
        interrupted,
        summary,
        output,
    })
}

fn print_report(report: &RunReport) {
    if report.interrupted {
        println!("Scraping interrupted by user; keeping partial results.");
    }
    println!(
        "Pages: {} attempted, {} ok, {} failed{}",
        report.pages_attempted,
        report.pages_succeeded,
        report.failed_pages.len(),
        if report.failed_pages.is_empty() {
            String::new()
        } else {
            format!(" ({:?})", report.failed_pages)
        }
    );
    if report.blank_listings > 0 {
        println!("Listings with no fields: {}", report.blank_listings);
    }
    match &report.output {
        Some(path) => {
            println!("Total cars:        {}", report.summary.total);
            println!("Cars with prices:  {}", report.summary.with_price);
            println!("Cars with mileage: {}", report.summary.with_mileage);
            println!("Unique brands:     {}", report.summary.distinct_brands);
            println!("Data saved to {path}");
        }
        None => println!("No data was scraped."),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::app::extract::SiteMarkup;
    use crate::app::fetch::tests::{FakeBrowser, instant_policy, target};
    use crate::app::types::{
        BrowserArg, DataFormat, Pacing, PageRange, WebDriverConfig,
    };

    fn config(range: PageRange, output_path: &Path) -> RunConfig {
        RunConfig {
            range,
            target: target(),
            policy: instant_policy(2),
            pacing: Pacing {
                page_delay: Duration::ZERO,
            },
            markup: SiteMarkup::default(),
            webdriver: WebDriverConfig {
                endpoint: "http://localhost:4444".to_string(),
                driver_binary: None,
                start_timeout: Duration::ZERO,
                browser: BrowserArg::Chrome,
                browser_binary: None,
                headless: true,
            },
            output_path: output_path.to_string_lossy().to_string(),
            output_format: DataFormat::Csv,
        }
    }

    fn extractor() -> ListingExtractor {
        ListingExtractor::new(SiteMarkup::default()).expect("markup parses")
    }

    #[tokio::test]
    async fn full_run_writes_dataset_and_closes_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("cars.csv");
        let t = target();
        let mut browser = FakeBrowser::default();
        browser.pages.insert(
            t.url(1),
            r#"<article class="listing" data-display-title="2020 Toyota Corolla Sedan"
                        data-mileage="45,000 km">
                 <div class="listing__price">฿ 450,000</div>
               </article>"#
                .to_string(),
        );
        let shutdown = AtomicBool::new(false);
        let cfg = config(PageRange::new(1, 2).expect("valid range"), &out);

        let report = execute(&cfg, &extractor(), &mut browser, &shutdown)
            .await
            .expect("run succeeds");

        assert!(browser.closed);
        assert_eq!(report.pages_attempted, 2);
        assert_eq!(report.failed_pages, vec![2]);
        assert_eq!(report.summary.total, 1);
        assert_eq!(report.summary.with_price, 1);
        assert_eq!(report.output.as_deref(), Some(cfg.output_path.as_str()));
        let content = std::fs::read_to_string(&out).expect("file written");
        assert!(content.contains("450000"));
    }

    #[tokio::test]
    async fn empty_run_writes_nothing_and_tolerates_close_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("cars.csv");
        let mut browser = FakeBrowser {
            fail_close: true,
            ..FakeBrowser::default()
        };
        let shutdown = AtomicBool::new(false);
        let cfg = config(PageRange::new(1, 3).expect("valid range"), &out);

        let report = execute(&cfg, &extractor(), &mut browser, &shutdown)
            .await
            .expect("run still succeeds");

        assert!(browser.closed);
        assert_eq!(report.failed_pages, vec![1, 2, 3]);
        assert_eq!(report.output, None);
        assert!(!out.exists());
    }

    #[test]
    fn second_interrupt_forces_quit() {
        let shutdown = AtomicBool::new(false);
        assert_eq!(on_interrupt(&shutdown), InterruptAction::Finish);
        assert!(shutdown.load(Ordering::Relaxed));
        assert_eq!(on_interrupt(&shutdown), InterruptAction::ForceQuit);
    }

    #[tokio::test]
    async fn interrupted_before_start_still_releases_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("cars.csv");
        let mut browser = FakeBrowser::default();
        let shutdown = AtomicBool::new(true);
        let cfg = config(PageRange::new(1, 3).expect("valid range"), &out);

        let report = execute(&cfg, &extractor(), &mut browser, &shutdown)
            .await
            .expect("run succeeds");

        assert!(report.interrupted);
        assert!(browser.navigations.is_empty());
        assert!(browser.closed);
    }
}
