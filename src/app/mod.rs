pub mod crawl;
pub mod data_io;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod normalize;
pub mod runtime;
pub mod types;
pub mod webdriver;

pub use error::{Result, ScrapeError};
pub use runtime::run;
