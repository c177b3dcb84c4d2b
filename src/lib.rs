//! Scrapes paginated car listings through a WebDriver-controlled browser,
//! normalizes price, mileage and title fields, and writes one CSV or JSON
//! table per run.

pub mod app;
