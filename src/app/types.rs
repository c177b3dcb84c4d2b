use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

use super::error::{Result, ScrapeError};
use super::extract::SiteMarkup;
use super::fetch::{FetchPolicy, PageTarget};

pub const DEFAULT_URL_TEMPLATE: &str =
    "https://www.one2car.com/en/cars-for-sale?page_number={page}&page_size={page_size}";

#[derive(Debug, Parser, Clone)]
#[command(
    name = "carlist",
    version,
    about = "Scrape paginated car listings through a WebDriver browser into CSV/JSON"
)]
pub struct Cli {
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub start_page: u32,

    #[arg(long, value_name = "N", default_value_t = 10)]
    pub end_page: u32,

    #[arg(short, long, value_name = "FILE")]
    pub output: Option<String>,

    #[arg(long, value_enum, default_value_t = FileFormatArg::Csv)]
    pub format: FileFormatArg,

    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub headless: bool,

    #[arg(long, value_name = "N", default_value_t = 3)]
    pub max_attempts: u32,

    #[arg(long, value_name = "MS", default_value_t = 2000)]
    pub page_delay_ms: u64,

    #[arg(long, value_name = "MS", default_value_t = 5000)]
    pub retry_delay_ms: u64,

    #[arg(long, value_name = "MS", default_value_t = 15000)]
    pub ready_timeout_ms: u64,

    #[arg(long, value_name = "MS", default_value_t = 3000)]
    pub settle_delay_ms: u64,

    #[arg(long, value_name = "N", default_value_t = 26)]
    pub page_size: u32,

    #[arg(long, value_name = "TEMPLATE", default_value = DEFAULT_URL_TEMPLATE)]
    pub url_template: String,

    #[arg(long, value_name = "URL", default_value = "http://localhost:4444")]
    pub webdriver_url: String,

    #[arg(long, value_name = "PATH")]
    pub webdriver_binary: Option<String>,

    #[arg(long, value_name = "MS", default_value_t = 12000)]
    pub webdriver_start_timeout_ms: u64,

    #[arg(long, value_enum, default_value_t = BrowserArg::Chrome)]
    pub browser: BrowserArg,

    #[arg(long, value_name = "PATH")]
    pub browser_binary: Option<String>,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum BrowserArg {
    Chrome,
    Firefox,
    Edge,
}

#[derive(Debug, Copy, Clone, ValueEnum, PartialEq, Eq)]
pub enum FileFormatArg {
    Csv,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataFormat {
    Csv,
    Json,
}

impl From<FileFormatArg> for DataFormat {
    fn from(value: FileFormatArg) -> Self {
        match value {
            FileFormatArg::Csv => DataFormat::Csv,
            FileFormatArg::Json => DataFormat::Json,
        }
    }
}

/// Inclusive page span. Only constructible through [`PageRange::new`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PageRange {
    start: u32,
    end: u32,
}

impl PageRange {
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start == 0 || start > end {
            return Err(ScrapeError::InvalidPageRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn page_count(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn pages(self) -> impl Iterator<Item = u32> {
        self.start..=self.end
    }
}

/// One listing as it appears in the markup. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawListing {
    pub title: Option<String>,
    pub year_text: Option<String>,
    pub mileage_text: Option<String>,
    pub transmission: Option<String>,
    pub price_text: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
}

impl RawListing {
    pub fn is_empty(&self) -> bool {
        self == &RawListing::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedListing {
    pub raw: RawListing,
    pub parsed_year: Option<i32>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub vehicle_type: Option<String>,
    pub price_numeric: Option<u64>,
    pub mileage_numeric: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub page_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    pub endpoint: String,
    pub driver_binary: Option<String>,
    pub start_timeout: Duration,
    pub browser: BrowserArg,
    pub browser_binary: Option<String>,
    pub headless: bool,
}

/// Everything a run needs, detached from how it was supplied.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub range: PageRange,
    pub target: PageTarget,
    pub policy: FetchPolicy,
    pub pacing: Pacing,
    pub markup: SiteMarkup,
    pub webdriver: WebDriverConfig,
    pub output_path: String,
    pub output_format: DataFormat,
}

impl RunConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let range = PageRange::new(cli.start_page, cli.end_page)?;
        let target = PageTarget::new(&cli.url_template, cli.page_size)?;
        let configured_format: DataFormat = cli.format.into();
        let output_format = cli
            .output
            .as_deref()
            .map(|path| super::data_io::detect_data_format(path, configured_format))
            .unwrap_or(configured_format);
        let output_path = cli.output.clone().unwrap_or_else(|| {
            super::data_io::default_output_path(target.template(), output_format)
        });
        let markup = SiteMarkup::default();

        Ok(Self {
            range,
            target,
            policy: FetchPolicy {
                max_attempts: cli.max_attempts,
                ready_selector: markup.container.clone(),
                ready_timeout: Duration::from_millis(cli.ready_timeout_ms),
                settle_delay: Duration::from_millis(cli.settle_delay_ms),
                retry_delay: Duration::from_millis(cli.retry_delay_ms),
            },
            pacing: Pacing {
                page_delay: Duration::from_millis(cli.page_delay_ms),
            },
            markup,
            webdriver: WebDriverConfig {
                endpoint: cli.webdriver_url,
                driver_binary: cli.webdriver_binary,
                start_timeout: Duration::from_millis(cli.webdriver_start_timeout_ms),
                browser: cli.browser,
                browser_binary: cli.browser_binary,
                headless: cli.headless,
            },
            output_path,
            output_format,
        })
    }
}
