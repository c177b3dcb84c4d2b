use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use super::error::{Result, ScrapeError};
use super::webdriver::BrowserSession;

/// Longest single sleep before the interrupt flag is checked again.
const PAUSE_SLICE: Duration = Duration::from_millis(120);

/// Listing page address, e.g. `...?page_number={page}&page_size={page_size}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTarget {
    template: String,
    page_size: u32,
}

impl PageTarget {
    pub fn new(template: &str, page_size: u32) -> Result<Self> {
        if !template.contains("{page}") {
            return Err(ScrapeError::InvalidConfig(format!(
                "url template '{template}' has no {{page}} placeholder"
            )));
        }
        if page_size == 0 {
            return Err(ScrapeError::InvalidConfig("page size must be at least 1".to_string()));
        }
        let target = Self {
            template: template.to_string(),
            page_size,
        };
        let sample = target.url(1);
        match Url::parse(&sample) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(target),
            Ok(url) => Err(ScrapeError::InvalidConfig(format!(
                "url template must be http/https, got {}",
                url.scheme()
            ))),
            Err(e) => Err(ScrapeError::InvalidConfig(format!(
                "url template does not produce a valid url ({sample}): {e}"
            ))),
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn url(&self, page: u32) -> String {
        self.template
            .replace("{page}", &page.to_string())
            .replace("{page_size}", &self.page_size.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub ready_selector: String,
    pub ready_timeout: Duration,
    /// Fixed wait after navigation, before looking for the ready signal.
    pub settle_delay: Duration,
    pub retry_delay: Duration,
}

impl FetchPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageFetch {
    Loaded { html: String, attempts: u32 },
    Unavailable { attempts: u32, last_error: String },
}

impl PageFetch {
    pub fn attempts(&self) -> u32 {
        match self {
            PageFetch::Loaded { attempts, .. } | PageFetch::Unavailable { attempts, .. } => *attempts,
        }
    }
}

/// Anything that can hand the pagination driver one page of markup.
#[async_trait]
pub trait PageSource: Send {
    async fn fetch_page(&mut self, page: u32) -> PageFetch;
}

/// Loads listing pages through a browser session, retrying failed attempts.
pub struct PageFetcher<'a, S: BrowserSession + ?Sized> {
    session: &'a mut S,
    target: PageTarget,
    policy: FetchPolicy,
    shutdown: &'a AtomicBool,
}

impl<'a, S: BrowserSession + ?Sized> PageFetcher<'a, S> {
    pub fn new(
        session: &'a mut S,
        target: PageTarget,
        policy: FetchPolicy,
        shutdown: &'a AtomicBool,
    ) -> Self {
        Self {
            session,
            target,
            policy,
            shutdown,
        }
    }

    async fn attempt(&mut self, url: &str) -> Result<String> {
        self.session.navigate(url).await?;
        pause(self.policy.settle_delay, self.shutdown).await;
        self.session
            .wait_for_selector(&self.policy.ready_selector, self.policy.ready_timeout)
            .await?;
        self.session.document_html().await
    }

    /// Never fails: exhausting every attempt yields [`PageFetch::Unavailable`].
    pub async fn fetch(&mut self, page: u32) -> PageFetch {
        let url = self.target.url(page);
        let max_attempts = self.policy.attempts();
        let mut attempts = 0;
        let mut last_error = String::new();

        while attempts < max_attempts {
            attempts += 1;
            debug!(page, attempt = attempts, %url, "fetching page");
            match self.attempt(&url).await {
                Ok(html) => return PageFetch::Loaded { html, attempts },
                Err(err) => {
                    warn!(page, attempt = attempts, max_attempts, %err, "page attempt failed");
                    last_error = err.to_string();
                }
            }

            if attempts == max_attempts {
                break;
            }
            if self.shutdown.load(Ordering::Relaxed)
                || pause(self.policy.retry_delay, self.shutdown).await
            {
                info!(page, "interrupt requested, not retrying page");
                break;
            }
        }

        warn!(page, attempts, %last_error, "page unavailable");
        PageFetch::Unavailable {
            attempts,
            last_error,
        }
    }
}

#[async_trait]
impl<S: BrowserSession + ?Sized> PageSource for PageFetcher<'_, S> {
    async fn fetch_page(&mut self, page: u32) -> PageFetch {
        self.fetch(page).await
    }
}

/// Sleeps for `duration` in short slices. Returns true when the interrupt
/// flag cut the wait short.
pub async fn pause(duration: Duration, shutdown: &AtomicBool) -> bool {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if shutdown.load(Ordering::Relaxed) {
            return true;
        }
        let step = remaining.min(PAUSE_SLICE);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    shutdown.load(Ordering::Relaxed)
}
