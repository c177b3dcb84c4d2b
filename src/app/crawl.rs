use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use super::extract::Extraction;
use super::fetch::{PageFetch, PageSource, pause};
use super::types::{Pacing, PageRange, RawListing};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageReport {
    pub page: u32,
    pub attempts: u32,
    pub succeeded: bool,
    pub listings: usize,
    pub blank: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlOutcome {
    pub listings: Vec<RawListing>,
    pub pages: Vec<PageReport>,
    /// The operator stopped the run before the last page.
    pub interrupted: bool,
}

impl CrawlOutcome {
    pub fn failed_pages(&self) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|report| !report.succeeded)
            .map(|report| report.page)
            .collect()
    }

    pub fn pages_succeeded(&self) -> usize {
        self.pages.iter().filter(|report| report.succeeded).count()
    }

    pub fn blank_listings(&self) -> usize {
        self.pages.iter().map(|report| report.blank).sum()
    }
}

/// Walks `range` one page at a time, appending whatever each page yields.
/// A page that cannot be loaded contributes nothing; the run carries on.
pub async fn run_pages<P, E>(
    range: PageRange,
    source: &mut P,
    extract: E,
    pacing: Pacing,
    shutdown: &AtomicBool,
) -> CrawlOutcome
where
    P: PageSource + ?Sized,
    E: Fn(&str) -> Extraction,
{
    let mut outcome = CrawlOutcome::default();

    for page in range.pages() {
        if shutdown.load(Ordering::Relaxed) {
            outcome.interrupted = true;
            break;
        }

        info!(page, last = range.end(), "scraping page");
        let report = match source.fetch_page(page).await {
            PageFetch::Loaded { html, attempts } => {
                let Extraction { listings, blank } = extract(&html);
                let report = PageReport {
                    page,
                    attempts,
                    succeeded: true,
                    listings: listings.len(),
                    blank,
                };
                outcome.listings.extend(listings);
                report
            }
            PageFetch::Unavailable { attempts, .. } => PageReport {
                page,
                attempts,
                succeeded: false,
                listings: 0,
                blank: 0,
            },
        };
        info!(
            page,
            attempts = report.attempts,
            succeeded = report.succeeded,
            listings = report.listings,
            blank = report.blank,
            total = outcome.listings.len(),
            "page done"
        );
        outcome.pages.push(report);

        if page < range.end() && pause(pacing.page_delay, shutdown).await {
            outcome.interrupted = true;
            break;
        }
    }

    // A stop requested during the last page still counts.
    outcome.interrupted |= shutdown.load(Ordering::Relaxed);
    if outcome.interrupted {
        info!(
            pages = outcome.pages.len(),
            listings = outcome.listings.len(),
            "scraping interrupted, keeping partial results"
        );
    }
    outcome
}
