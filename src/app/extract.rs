use scraper::{ElementRef, Html, Selector};

use super::error::{Result, ScrapeError};
use super::types::RawListing;

/// Where the listings site keeps each field in its markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteMarkup {
    pub container: String,
    pub price: String,
    pub title_attr: String,
    pub year_attr: String,
    pub mileage_attr: String,
    pub transmission_attr: String,
    pub url_attr: String,
    pub image_attr: String,
}

impl Default for SiteMarkup {
    fn default() -> Self {
        Self {
            container: "article.listing".to_string(),
            price: "div.listing__price".to_string(),
            title_attr: "data-display-title".to_string(),
            year_attr: "data-year".to_string(),
            mileage_attr: "data-mileage".to_string(),
            transmission_attr: "data-transmission".to_string(),
            url_attr: "data-url".to_string(),
            image_attr: "data-image-src".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub listings: Vec<RawListing>,
    /// Containers that carried none of the fields. They are still listed.
    pub blank: usize,
}

#[derive(Debug, Clone)]
pub struct ListingExtractor {
    markup: SiteMarkup,
    container: Selector,
    price: Selector,
}

impl ListingExtractor {
    pub fn new(markup: SiteMarkup) -> Result<Self> {
        let container = parse_selector(&markup.container)?;
        let price = parse_selector(&markup.price)?;
        Ok(Self {
            markup,
            container,
            price,
        })
    }

    /// Reads every listing container in document order. An empty page is a
    /// valid result.
    pub fn extract(&self, html: &str) -> Extraction {
        let doc = Html::parse_document(html);
        let mut out = Extraction::default();

        for el in doc.select(&self.container) {
            let listing = self.read_listing(el);
            if listing.is_empty() {
                out.blank += 1;
            }
            out.listings.push(listing);
        }

        out
    }

    fn read_listing(&self, el: ElementRef<'_>) -> RawListing {
        let m = &self.markup;
        RawListing {
            title: attr_value(el, &m.title_attr),
            year_text: attr_value(el, &m.year_attr),
            mileage_text: attr_value(el, &m.mileage_attr),
            transmission: attr_value(el, &m.transmission_attr),
            price_text: self.price_text(el),
            url: attr_value(el, &m.url_attr),
            image_url: attr_value(el, &m.image_attr),
        }
    }

    /// Text pieces of the price node, each trimmed, joined without a
    /// separator. A number split across child elements stays one number.
    fn price_text(&self, el: ElementRef<'_>) -> Option<String> {
        let node = el.select(&self.price).next()?;
        let text = node.text().map(str::trim).collect::<String>();
        (!text.is_empty()).then_some(text)
    }
}

fn parse_selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw)
        .map_err(|e| ScrapeError::InvalidConfig(format!("bad selector '{raw}': {e}")))
}

fn attr_value(el: ElementRef<'_>, name: &str) -> Option<String> {
    el.value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::normalize::normalize;

    fn extractor() -> ListingExtractor {
        ListingExtractor::new(SiteMarkup::default()).expect("default markup parses")
    }

    const PAGE: &str = r#"
        <html><body>
          <div class="results">
            <article class="listing"
                     data-display-title="2020 Toyota Corolla Altis Sedan"
                     data-year="2020"
                     data-mileage="45,000 km"
                     data-transmission="Automatic"
                     data-url="https://www.one2car.com/en/for-sale/toyota-corolla/1"
                     data-image-src="https://img.example/1.jpg">
              <div class="listing__price">
                  ฿ <span>589,000</span>
              </div>
            </article>
            <article class="listing" data-display-title="2017 Honda City" data-year="2017">
            </article>
            <article class="listing"></article>
            <article class="listing featured" data-url="  " data-mileage="12,000">
              <div class="listing__price">   </div>
            </article>
          </div>
        </body></html>
    "#;

    #[test]
    fn reads_attributes_and_price_in_document_order() {
        let out = extractor().extract(PAGE);
        assert_eq!(out.listings.len(), 4);
        assert_eq!(out.blank, 1);

        let first = &out.listings[0];
        assert_eq!(first.title.as_deref(), Some("2020 Toyota Corolla Altis Sedan"));
        assert_eq!(first.year_text.as_deref(), Some("2020"));
        assert_eq!(first.mileage_text.as_deref(), Some("45,000 km"));
        assert_eq!(first.transmission.as_deref(), Some("Automatic"));
        assert_eq!(first.price_text.as_deref(), Some("฿589,000"));
        assert_eq!(
            first.url.as_deref(),
            Some("https://www.one2car.com/en/for-sale/toyota-corolla/1")
        );
        assert_eq!(first.image_url.as_deref(), Some("https://img.example/1.jpg"));
    }

    #[test]
    fn missing_fields_stay_absent() {
        let out = extractor().extract(PAGE);
        let second = &out.listings[1];
        assert_eq!(second.title.as_deref(), Some("2017 Honda City"));
        assert_eq!(second.price_text, None);
        assert_eq!(second.mileage_text, None);

        assert_eq!(out.listings[2], RawListing::default());

        let fourth = &out.listings[3];
        assert_eq!(fourth.url, None);
        assert_eq!(fourth.price_text, None);
        assert_eq!(fourth.mileage_text.as_deref(), Some("12,000"));
    }

    #[test]
    fn price_split_across_child_nodes() {
        let out = extractor().extract(
            r#"<article class="listing" data-display-title="2019 Isuzu D-Max Pickup">
                 <div class="listing__price"><span>450</span>,000</div>
               </article>
               <article class="listing">
                 <div class="listing__price">
                   ฿<span> 1,</span><b>299,000 </b>
                 </div>
               </article>"#,
        );
        let prices = out
            .listings
            .iter()
            .map(|l| l.price_text.as_deref())
            .collect::<Vec<_>>();
        assert_eq!(prices, vec![Some("450,000"), Some("฿1,299,000")]);

        let numeric = out
            .listings
            .into_iter()
            .map(|l| normalize(l).price_numeric)
            .collect::<Vec<_>>();
        assert_eq!(numeric, vec![Some(450_000), Some(1_299_000)]);
    }

    #[test]
    fn page_without_listings_is_empty_not_error() {
        let out = extractor().extract("<html><body><p>No cars</p></body></html>");
        assert_eq!(out, Extraction::default());
        assert_eq!(extractor().extract("").listings.len(), 0);
    }

    #[test]
    fn markup_is_configurable() {
        let markup = SiteMarkup {
            container: "li.car".to_string(),
            price: ".cost".to_string(),
            title_attr: "data-name".to_string(),
            ..SiteMarkup::default()
        };
        let out = ListingExtractor::new(markup)
            .expect("valid selectors")
            .extract(r#"<ul><li class="car" data-name="2015 Ford Ranger"><b class="cost">450,000</b></li></ul>"#);
        assert_eq!(out.listings.len(), 1);
        assert_eq!(out.listings[0].title.as_deref(), Some("2015 Ford Ranger"));
        assert_eq!(out.listings[0].price_text.as_deref(), Some("450,000"));
    }

    #[test]
    fn invalid_selector_is_config_error() {
        let markup = SiteMarkup {
            container: "article[".to_string(),
            ..SiteMarkup::default()
        };
        assert!(matches!(
            ListingExtractor::new(markup),
            Err(ScrapeError::InvalidConfig(_))
        ));
    }
}
