use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};

use chrono::Utc;
use serde::Serialize;
use tracing::info;
use url::Url;

use super::error::Result;
use super::normalize::normalize;
use super::types::{DataFormat, NormalizedListing, RawListing};

/// One output row. Field order is the column order of the file.
#[derive(Debug, Clone, Serialize)]
struct ExportRecord<'a> {
    #[serde(rename = "Title")]
    title: Option<&'a str>,
    #[serde(rename = "Year")]
    year: Option<&'a str>,
    #[serde(rename = "Mileage")]
    mileage: Option<&'a str>,
    #[serde(rename = "Transmission")]
    transmission: Option<&'a str>,
    #[serde(rename = "Price")]
    price: Option<&'a str>,
    #[serde(rename = "URL")]
    url: Option<&'a str>,
    #[serde(rename = "Image")]
    image: Option<&'a str>,
    #[serde(rename = "Year_parsed")]
    year_parsed: Option<i32>,
    #[serde(rename = "Brand")]
    brand: Option<&'a str>,
    #[serde(rename = "Model")]
    model: Option<&'a str>,
    #[serde(rename = "Vehicle_type")]
    vehicle_type: Option<&'a str>,
    #[serde(rename = "Price_numeric")]
    price_numeric: Option<u64>,
    #[serde(rename = "Mileage_numeric")]
    mileage_numeric: Option<u64>,
}

fn row_to_export_record(row: &NormalizedListing) -> ExportRecord<'_> {
    let raw = &row.raw;
    ExportRecord {
        title: raw.title.as_deref(),
        year: raw.year_text.as_deref(),
        mileage: raw.mileage_text.as_deref(),
        transmission: raw.transmission.as_deref(),
        price: raw.price_text.as_deref(),
        url: raw.url.as_deref(),
        image: raw.image_url.as_deref(),
        year_parsed: row.parsed_year,
        brand: row.brand.as_deref(),
        model: row.model.as_deref(),
        vehicle_type: row.vehicle_type.as_deref(),
        price_numeric: row.price_numeric,
        mileage_numeric: row.mileage_numeric,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    rows: Vec<NormalizedListing>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetSummary {
    pub total: usize,
    pub with_price: usize,
    pub with_mileage: usize,
    pub distinct_brands: usize,
}

impl Dataset {
    pub fn rows(&self) -> &[NormalizedListing] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn summary(&self) -> DatasetSummary {
        let brands = self
            .rows
            .iter()
            .filter_map(|row| row.brand.as_deref())
            .collect::<HashSet<_>>();
        DatasetSummary {
            total: self.rows.len(),
            with_price: self.rows.iter().filter(|r| r.price_numeric.is_some()).count(),
            with_mileage: self.rows.iter().filter(|r| r.mileage_numeric.is_some()).count(),
            distinct_brands: brands.len(),
        }
    }
}

/// Normalizes every record in scrape order. Rows are never dropped.
pub fn build(raw: Vec<RawListing>) -> (Dataset, DatasetSummary) {
    let dataset = Dataset {
        rows: raw.into_iter().map(normalize).collect(),
    };
    let summary = dataset.summary();
    (dataset, summary)
}

/// Writes the whole dataset in one go, replacing any existing file.
pub fn write_dataset(dataset: &Dataset, output_path: &str, format: DataFormat) -> Result<()> {
    let file = File::create(output_path)?;
    match format {
        DataFormat::Csv => {
            let mut writer = csv::Writer::from_writer(file);
            for row in dataset.rows() {
                writer.serialize(row_to_export_record(row))?;
            }
            writer.flush()?;
        }
        DataFormat::Json => {
            let mut writer = BufWriter::new(file);
            let records = dataset
                .rows()
                .iter()
                .map(row_to_export_record)
                .collect::<Vec<_>>();
            serde_json::to_writer_pretty(&mut writer, &records)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
    }
    info!(rows = dataset.len(), path = output_path, format = ?format, "dataset written");
    Ok(())
}

pub fn detect_data_format(path: &str, fallback: DataFormat) -> DataFormat {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".json") {
        DataFormat::Json
    } else if lower.ends_with(".csv") {
        DataFormat::Csv
    } else {
        fallback
    }
}

pub fn default_output_path(url: &str, format: DataFormat) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| "listings".to_string());
    let host = host
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    let ts = Utc::now().format("%Y%m%d_%H%M%S");
    match format {
        DataFormat::Csv => format!("{host}_{ts}.csv"),
        DataFormat::Json => format!("{host}_{ts}.json"),
    }
}
