use std::sync::LazyLock;

use regex::Regex;

use super::types::{NormalizedListing, RawListing};

// A digit followed by any mix of digits and thousands separators.
static PRICE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d,]*").expect("valid price pattern"));
static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("valid digit pattern"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTitle {
    pub year: Option<i32>,
    pub brand: Option<String>,
    pub model: Option<String>,
    pub vehicle_type: Option<String>,
}

/// Right-most number in the text, separators removed. The site prints the
/// amount after any currency symbol or prefix, so the last run is the price.
pub fn extract_price(text: Option<&str>) -> Option<u64> {
    let text = text?;
    let run = PRICE_RUN.find_iter(text).last()?;
    run.as_str().replace(',', "").parse().ok()
}

/// First number in the text once separators are removed.
pub fn extract_mileage(text: Option<&str>) -> Option<u64> {
    let cleaned = text?.replace(',', "");
    let run = DIGIT_RUN.find(&cleaned)?;
    run.as_str().parse().ok()
}

/// Splits a display title such as `2020 Toyota Corolla Altis Sedan` into
/// year, brand, model and body type.
pub fn parse_title(text: Option<&str>) -> ParsedTitle {
    let Some(text) = text else {
        return ParsedTitle::default();
    };
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.len() < 2 {
        return ParsedTitle::default();
    }

    let year = Some(tokens[0])
        .filter(|t| t.chars().all(|c| c.is_ascii_digit()))
        .and_then(|t| t.parse::<i32>().ok());
    let brand = Some(tokens[1].to_string());
    let (model, vehicle_type) = match tokens.len() {
        2 => (None, None),
        3 => (Some(tokens[2].to_string()), None),
        n => (
            Some(tokens[2..n - 1].join(" ")),
            Some(tokens[n - 1].to_string()),
        ),
    };

    ParsedTitle {
        year,
        brand,
        model,
        vehicle_type,
    }
}

pub fn normalize(raw: RawListing) -> NormalizedListing {
    let title = parse_title(raw.title.as_deref());
    let price_numeric = extract_price(raw.price_text.as_deref());
    let mileage_numeric = extract_mileage(raw.mileage_text.as_deref());
    NormalizedListing {
        raw,
        parsed_year: title.year,
        brand: title.brand,
        model: title.model,
        vehicle_type: title.vehicle_type,
        price_numeric,
        mileage_numeric,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_takes_last_run_and_mileage_takes_first() {
        assert_eq!(extract_price(Some("1,234 - 2,345")), Some(2345));
        assert_eq!(extract_mileage(Some("1,234 - 2,345")), Some(1234));
    }

    #[test]
    fn price_after_currency_prefix() {
        assert_eq!(extract_price(Some("฿ 450,000")), Some(450_000));
        assert_eq!(extract_price(Some("Save 20,000 now 399,000 Baht")), Some(399_000));
        assert_eq!(extract_price(Some("1,234,")), Some(1234));
    }

    #[test]
    fn price_absent_without_digits() {
        assert_eq!(extract_price(None), None);
        assert_eq!(extract_price(Some("no digits")), None);
        assert_eq!(extract_price(Some("")), None);
        assert_eq!(extract_price(Some("99999999999999999999999")), None);
    }

    #[test]
    fn mileage_handles_units_and_absence() {
        assert_eq!(extract_mileage(Some("45,000 km")), Some(45_000));
        assert_eq!(extract_mileage(Some("120000")), Some(120_000));
        assert_eq!(extract_mileage(Some("km")), None);
        assert_eq!(extract_mileage(None), None);
    }

    #[test]
    fn normalizers_are_idempotent_on_their_output() {
        for input in ["฿ 450,000", "1,234 - 2,345", "0", "7 seats 12,500"] {
            if let Some(price) = extract_price(Some(input)) {
                assert_eq!(extract_price(Some(&price.to_string())), Some(price));
            }
            if let Some(mileage) = extract_mileage(Some(input)) {
                assert_eq!(extract_mileage(Some(&mileage.to_string())), Some(mileage));
            }
        }
    }

    #[test]
    fn title_with_body_type() {
        let parsed = parse_title(Some("2020 Toyota Corolla Sedan"));
        assert_eq!(parsed.year, Some(2020));
        assert_eq!(parsed.brand.as_deref(), Some("Toyota"));
        assert_eq!(parsed.model.as_deref(), Some("Corolla"));
        assert_eq!(parsed.vehicle_type.as_deref(), Some("Sedan"));
    }

    #[test]
    fn title_model_spans_middle_tokens() {
        let parsed = parse_title(Some("  2018 Honda  Civic  1.8 EL   Sedan "));
        assert_eq!(parsed.model.as_deref(), Some("Civic 1.8 EL"));
        assert_eq!(parsed.vehicle_type.as_deref(), Some("Sedan"));
    }

    #[test]
    fn title_short_forms() {
        let two = parse_title(Some("2020 Toyota"));
        assert_eq!(two.year, Some(2020));
        assert_eq!(two.brand.as_deref(), Some("Toyota"));
        assert_eq!(two.model, None);
        assert_eq!(two.vehicle_type, None);

        let three = parse_title(Some("Used Mazda CX-5"));
        assert_eq!(three.year, None);
        assert_eq!(three.brand.as_deref(), Some("Mazda"));
        assert_eq!(three.model.as_deref(), Some("CX-5"));
        assert_eq!(three.vehicle_type, None);

        assert_eq!(parse_title(Some("OnlyOneWord")), ParsedTitle::default());
        assert_eq!(parse_title(Some("   ")), ParsedTitle::default());
        assert_eq!(parse_title(None), ParsedTitle::default());
    }

    #[test]
    fn normalize_is_deterministic() {
        let raw = RawListing {
            title: Some("2019 Nissan Almera 1.0 Turbo Sedan".into()),
            mileage_text: Some("61,200 km".into()),
            price_text: Some("฿ 389,000".into()),
            ..RawListing::default()
        };
        let a = normalize(raw.clone());
        let b = normalize(raw);
        assert_eq!(a, b);
        assert_eq!(a.parsed_year, Some(2019));
        assert_eq!(a.model.as_deref(), Some("Almera 1.0 Turbo"));
        assert_eq!(a.price_numeric, Some(389_000));
        assert_eq!(a.mileage_numeric, Some(61_200));
    }
}
