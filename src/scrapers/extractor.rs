//! Listing card extraction.
//!
//! Every field is located through a priority list of selectors, tried in order
//! until one yields a non-empty value, so the same extractor handles the
//! krisha.kz and olx.kz card layouts. A card that cannot produce a title and a
//! positive price is skipped without affecting its siblings.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::error::PageError;
use crate::models::ListingRecord;

const IMAGE_HOST: &str = "https://krisha-photos.kcdn.online";

fn compile(list: &[&str]) -> Vec<Selector> {
    list.iter().filter_map(|s| Selector::parse(s).ok()).collect()
}

static CARD: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".a-card",
        ".ddl_product",
        "[data-cy='l-card']",
        "[data-testid='l-card']",
        ".offer-wrapper",
    ])
});
static LIST_CONTAINER: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".a-search-list",
        ".a-list",
        "[data-testid='listing-grid']",
        ".listing-grid",
    ])
});
static AD_CONTAINER: Lazy<Vec<Selector>> = Lazy::new(|| compile(&[".adfox", "[id^='adfox']"]));
static TITLE: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".a-card__title",
        "[data-cy='ad-card-title'] h6",
        "h6",
        "h3",
        ".title",
    ])
});
static PRICE: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".a-card__price",
        "[data-testid='ad-price']",
        "[data-cy='card.price']",
        ".ddl_price",
        ".price",
    ])
});
static ADDRESS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".a-card__subtitle",
        "[data-testid='location-date']",
        ".location",
    ])
});
static DESCRIPTION: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".a-card__text-preview",
        ".a-card__text",
        "[data-testid='ad-description']",
    ])
});
static OWNER: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[".a-card__owner", ".owners__label", ".a-card__user", ".label--owner"])
});
static PHONE: Lazy<Vec<Selector>> = Lazy::new(|| compile(&[".seller-phone"]));
static LINK: Lazy<Vec<Selector>> = Lazy::new(|| compile(&["a.a-card__title[href]", "a[href]"]));
static IMAGE: Lazy<Vec<Selector>> = Lazy::new(|| compile(&["img"]));
static PICTURE: Lazy<Vec<Selector>> = Lazy::new(|| compile(&["picture[data-photo-id]"]));

static ROOMS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*-?\s*комн").unwrap());
static AREA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)\s*м(?:²|2)").unwrap());
static FLOOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*/\s*(\d+)\s*эт").unwrap());
static KITCHEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)кухн[а-я]*\s*[—–:-]?\s*(\d+(?:[.,]\d+)?)").unwrap()
});
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"((?:19|20)\d{2})\s*г\.\s*п").unwrap());
static COMPLEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ЖК\s+«?([^,«»·\n]+?)»?(?:,|·|$)").unwrap());

const BUILDING_TYPES: [&str; 5] = [
    "монолитный",
    "кирпичный",
    "панельный",
    "каркасно-камышитовый",
    "блочный",
];

/// Turns one listing page into an ordered batch of records
#[derive(Debug, Clone)]
pub struct CardExtractor {
    origin: Url,
    source: &'static str,
    max_cards: usize,
    max_images: usize,
}

impl CardExtractor {
    pub fn new(origin: Url, source: &'static str, max_cards: usize, max_images: usize) -> Self {
        Self {
            origin,
            source,
            max_cards: max_cards.max(1),
            max_images,
        }
    }

    /// Extract retained records from `document` in document order.
    ///
    /// Returns [`PageError::NoListings`] when the page has neither listing
    /// cards nor an (empty) result container.
    pub fn extract(&self, document: &Html, page: u32) -> Result<Vec<ListingRecord>, PageError> {
        let cards = CARD
            .iter()
            .map(|selector| document.select(selector).collect::<Vec<_>>())
            .find(|cards| !cards.is_empty());

        let Some(cards) = cards else {
            let has_container = LIST_CONTAINER
                .iter()
                .any(|selector| document.select(selector).next().is_some());
            return if has_container {
                Ok(Vec::new())
            } else {
                Err(PageError::NoListings { page })
            };
        };

        debug!("Found {} property cards on page {}", cards.len(), page);

        let records = cards
            .iter()
            .filter(|card| !is_advertising(card))
            .enumerate()
            .filter_map(|(index, card)| self.extract_card(card, page, index))
            .take(self.max_cards)
            .collect();

        Ok(records)
    }

    fn extract_card(&self, card: &ElementRef, page: u32, index: usize) -> Option<ListingRecord> {
        let title = first_text(card, &TITLE)?;
        let price_text = first_text(card, &PRICE).unwrap_or_default();
        let Some(price) = parse_price(&price_text) else {
            debug!("Skipped card {} on page {}: price '{}'", index, page, price_text);
            return None;
        };

        let address = first_text(card, &ADDRESS).unwrap_or_default();
        let description = first_text(card, &DESCRIPTION).unwrap_or_default();
        let full_text = collapse(card.text());
        // Title first, then the detail line, then everything else on the card
        let sources = [title.as_str(), description.as_str(), full_text.as_str()];

        let url = self.listing_url(card);
        let id = card
            .value()
            .attr("data-id")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| id_from_url(&url))
            .unwrap_or_else(|| format!("{}-{}-{}", self.source, page, index + 1));

        let (floor, total_floors) = match first_captures(&FLOOR_RE, &sources) {
            Some(caps) => (parse_num(caps.get(1)), parse_num(caps.get(2))),
            None => (None, None),
        };
        let lower = full_text.to_lowercase();

        let record = ListingRecord {
            id,
            currency: detect_currency(&price_text).to_string(),
            price,
            address,
            rooms: first_captures(&ROOMS_RE, &sources).and_then(|c| parse_num(c.get(1))),
            area: first_captures(&AREA_RE, &sources).and_then(|c| parse_decimal(c.get(1))),
            floor,
            total_floors,
            build_year: first_captures(&YEAR_RE, &sources).and_then(|c| parse_num(c.get(1))),
            images: self.images(card),
            url,
            phone: first_text(card, &PHONE).unwrap_or_default(),
            is_new_building: lower.contains("новостройк"),
            building_type: BUILDING_TYPES
                .iter()
                .find(|kind| lower.contains(*kind))
                .map(|kind| kind.to_string())
                .unwrap_or_default(),
            seller_type: seller_type(card).to_string(),
            kitchen_area: first_captures(&KITCHEN_RE, &sources)
                .and_then(|c| parse_decimal(c.get(1))),
            residential_complex: first_captures(&COMPLEX_RE, &sources)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
            description,
            title,
        };

        record.is_retainable().then_some(record)
    }

    fn listing_url(&self, card: &ElementRef) -> String {
        let href = LINK.iter().find_map(|selector| {
            card.select(selector)
                .filter_map(|a| a.value().attr("href"))
                .map(str::trim)
                .find(|href| !href.is_empty() && !href.starts_with('#'))
        });
        href.and_then(|href| self.origin.join(href).ok())
            .map(|url| url.to_string())
            .unwrap_or_default()
    }

    fn images(&self, card: &ElementRef) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();
        for img in IMAGE.iter().flat_map(|selector| card.select(selector)) {
            let src = ["data-src", "src"]
                .iter()
                .filter_map(|attr| img.value().attr(attr))
                .map(str::trim)
                .find(|src| !src.is_empty() && !src.starts_with("data:"));
            let Some(absolute) = src.and_then(|src| self.origin.join(src).ok()) else {
                continue;
            };
            let absolute = enhance_image_quality(absolute.as_str());
            if !images.contains(&absolute) {
                images.push(absolute);
            }
            if images.len() >= self.max_images {
                break;
            }
        }

        if images.is_empty() {
            if let Some(uuid) = card.value().attr("data-uuid") {
                let photo_id = PICTURE
                    .iter()
                    .find_map(|selector| card.select(selector).next())
                    .and_then(|picture| picture.value().attr("data-photo-id"))
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or("1");
                if let Some(url) = image_from_uuid(uuid, photo_id) {
                    images.push(url);
                }
            }
        }

        images
    }
}

/// Sponsored blocks are marked by class or carry an embedded ad slot
fn is_advertising(card: &ElementRef) -> bool {
    card.value()
        .classes()
        .any(|class| class == "ddl_campaign" || class == "a-card--ad")
        || AD_CONTAINER
            .iter()
            .any(|selector| card.select(selector).next().is_some())
}

fn collapse<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(card: &ElementRef, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|selector| card.select(selector).next())
        .map(|element| collapse(element.text()))
        .find(|text| !text.is_empty())
}

fn first_captures<'t>(re: &Regex, sources: &[&'t str]) -> Option<regex::Captures<'t>> {
    sources.iter().find_map(|text| re.captures(text))
}

fn parse_num<T: std::str::FromStr>(m: Option<regex::Match>) -> Option<T> {
    m.and_then(|m| m.as_str().parse().ok())
}

fn parse_decimal(m: Option<regex::Match>) -> Option<f64> {
    m.and_then(|m| m.as_str().replace(',', ".").parse().ok())
}

/// Keep only the digits of a price label. Empty, zero or out-of-range
/// values mean the price is absent.
pub fn parse_price(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse::<i64>().ok().filter(|price| *price > 0)
}

/// ISO code for the currency shown in a price label, tenge by default
pub fn detect_currency(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if text.contains('$') || lower.contains("usd") || lower.contains("у.е") {
        "USD"
    } else if text.contains('€') || lower.contains("eur") {
        "EUR"
    } else {
        "KZT"
    }
}

/// Last path segment of a listing URL, without query or `.html` suffix
fn id_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let id = segment.trim_end_matches(".html");
    (!id.is_empty()).then(|| id.to_string())
}

/// Single preview image synthesized from a card's photo UUID
pub fn image_from_uuid(uuid: &str, photo_id: &str) -> Option<String> {
    let uuid = uuid.trim();
    let prefix: String = uuid.chars().take(2).collect();
    if prefix.chars().count() < 2 {
        return None;
    }
    Some(format!(
        "{}/webp/{}/{}/{}-400x300.webp",
        IMAGE_HOST, prefix, uuid, photo_id
    ))
}

/// Rewrite known photo CDN thumbnails to the `750x470` variant.
///
/// `https://krisha-photos.kcdn.online/webp/a0/<uuid>/15-400x300.jpg` becomes
/// `.../15-750x470.webp`; other hosts are returned unchanged.
pub fn enhance_image_quality(src: &str) -> String {
    if src.contains("alakcell-photos") {
        return src.replace("-280x175.webp", "-750x470.webp");
    }
    if !src.contains("krisha-photos.kcdn.online") {
        return src.to_string();
    }
    let Some((base, file)) = src.rsplit_once('/') else {
        return src.to_string();
    };
    match file.split_once('-') {
        Some((number, _)) => format!("{}/{}-750x470.webp", base, number),
        None => src.to_string(),
    }
}

fn seller_type(card: &ElementRef) -> &'static str {
    let label = first_text(card, &OWNER).unwrap_or_default().to_lowercase();
    if label.contains("хозя") || label.contains("собственник") || label.contains("частное") {
        "owner"
    } else if label.contains("застройщик") {
        "developer"
    } else if label.contains("агент") || label.contains("риелтор") || label.contains("агентств") {
        "agent"
    } else {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> CardExtractor {
        CardExtractor::new(Url::parse("https://krisha.kz").unwrap(), "krisha", 20, 10)
    }

    fn card(id: &str, title: &str, price: &str) -> String {
        format!(
            r#"<div class="a-card" data-id="{id}">
                 <a class="a-card__title" href="/a/show/{id}">{title}</a>
                 <div class="a-card__price">{price}</div>
                 <div class="a-card__subtitle">Алматы, Бостандыкский р-н</div>
               </div>"#
        )
    }

    fn page(cards: &[String]) -> Html {
        Html::parse_document(&format!(
            "<html><body><section class=\"a-search-list\">{}</section></body></html>",
            cards.join("\n")
        ))
    }

    #[test]
    fn static_selectors_all_compile() {
        assert_eq!(CARD.len(), 5);
        assert_eq!(TITLE.len(), 5);
        assert_eq!(PRICE.len(), 5);
        assert_eq!(LINK.len(), 2);
    }

    #[test]
    fn parses_spaced_tenge_price() {
        assert_eq!(parse_price("25 000 000 ₸"), Some(25_000_000));
        assert_eq!(detect_currency("25 000 000 ₸"), "KZT");
        assert_eq!(parse_price("25\u{a0}000\u{a0}000 〒"), Some(25_000_000));
    }

    #[test]
    fn unpriced_labels_are_absent() {
        assert_eq!(parse_price("Цена не указана"), None);
        assert_eq!(parse_price(""), None);
        assert_eq!(parse_price("0 ₸"), None);
        assert_eq!(parse_price("99999999999999999999999 ₸"), None);
    }

    #[test]
    fn detects_foreign_currency() {
        assert_eq!(detect_currency("$ 120 000"), "USD");
        assert_eq!(detect_currency("95 000 €"), "EUR");
    }

    #[test]
    fn extracts_fields_from_krisha_card() {
        let html = r#"<div class="a-card" data-id="681234567" data-uuid="a0c8b561-ca6d-43c9-9376-41ba9f99e074">
            <picture data-photo-id="3"></picture>
            <a class="a-card__title" href="/a/show/681234567">2-комнатная квартира · 54.5 м² · 5/9 этаж</a>
            <div class="a-card__price">25 000 000 ₸</div>
            <div class="a-card__subtitle">Алматы, Бостандыкский р-н, Розыбакиева 247</div>
            <div class="a-card__text-preview">монолитный дом, 2019 г.п., кухня — 12 м², ЖК Orion, новостройка</div>
            <div class="a-card__owner">Хозяин недвижимости</div>
            <div class="seller-phone">+7 701 000 00 00</div>
        </div>"#;
        let records = extractor().extract(&page(&[html.to_string()]), 1).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];

        assert_eq!(r.id, "681234567");
        assert_eq!(r.title, "2-комнатная квартира · 54.5 м² · 5/9 этаж");
        assert_eq!(r.price, 25_000_000);
        assert_eq!(r.currency, "KZT");
        assert_eq!(r.url, "https://krisha.kz/a/show/681234567");
        assert_eq!(r.rooms, Some(2));
        assert_eq!(r.area, Some(54.5));
        assert_eq!(r.floor, Some(5));
        assert_eq!(r.total_floors, Some(9));
        assert_eq!(r.build_year, Some(2019));
        assert_eq!(r.kitchen_area, Some(12.0));
        assert_eq!(r.building_type, "монолитный");
        assert_eq!(r.residential_complex, "Orion");
        assert!(r.is_new_building);
        assert_eq!(r.seller_type, "owner");
        assert_eq!(r.phone, "+7 701 000 00 00");
        assert_eq!(
            r.images,
            vec![
                "https://krisha-photos.kcdn.online/webp/a0/a0c8b561-ca6d-43c9-9376-41ba9f99e074/3-400x300.webp"
            ]
        );
    }

    #[test]
    fn drops_cards_without_title_or_price() {
        let doc = page(&[
            card("1", "1-комнатная квартира", "15 000 000 ₸"),
            card("2", "2-комнатная квартира", "Цена не указана"),
            card("3", "   ", "30 000 000 ₸"),
            card("4", "3-комнатная квартира", "45 000 000 ₸"),
        ]);
        let ids: Vec<_> = extractor()
            .extract(&doc, 1)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["1", "4"]);
    }

    #[test]
    fn skips_advertising_cards() {
        let ad = r#"<div class="a-card ddl_campaign"><a class="a-card__title" href="/promo">Promo</a><div class="a-card__price">1 ₸</div></div>"#;
        let embedded = r#"<div class="a-card"><div class="adfox"></div><a class="a-card__title" href="/x">Banner</a><div class="a-card__price">5 ₸</div></div>"#;
        let doc = page(&[
            ad.to_string(),
            card("10", "Квартира", "10 000 000 ₸"),
            embedded.to_string(),
        ]);
        let records = extractor().extract(&doc, 1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "10");
    }

    #[test]
    fn preserves_document_order_and_is_repeatable() {
        let doc = page(&[
            card("c", "Квартира C", "3 ₸"),
            card("a", "Квартира A", "1 ₸"),
            card("b", "Квартира B", "2 ₸"),
        ]);
        let first = extractor().extract(&doc, 1).unwrap();
        let second = extractor().extract(&doc, 1).unwrap();
        let ids: Vec<_> = first.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(first, second);
    }

    #[test]
    fn bounds_records_per_page() {
        let cards: Vec<_> = (0..30)
            .map(|i| card(&i.to_string(), "Квартира", "10 000 000 ₸"))
            .collect();
        let records = extractor().extract(&page(&cards), 1).unwrap();
        assert_eq!(records.len(), 20);
    }

    #[test]
    fn falls_back_to_url_then_position_for_ids() {
        let olx = r#"<div data-cy="l-card">
            <a href="/d/obyavlenie/kvartira-IDm2xQ1.html"><h6>Квартира у метро</h6></a>
            <p data-testid="ad-price">18 500 000 тг.</p>
            <p data-testid="location-date">Алматы, Алмалинский район</p>
        </div>"#;
        let bare = r#"<div data-cy="l-card"><h6>Квартира без ссылки</h6><p data-testid="ad-price">9 000 000 тг.</p></div>"#;
        let doc = page(&[olx.to_string(), bare.to_string()]);
        let olx_origin = Url::parse("https://www.olx.kz").unwrap();
        let olx_extractor = CardExtractor::new(olx_origin, "olx", 20, 10);
        let records = olx_extractor.extract(&doc, 3).unwrap();

        assert_eq!(records[0].id, "kvartira-IDm2xQ1");
        assert_eq!(records[0].address, "Алматы, Алмалинский район");
        assert_eq!(records[1].id, "olx-3-2");
        assert!(records[1].url.is_empty());
    }

    #[test]
    fn keeps_real_images_before_synthesizing() {
        let html = r#"<div class="a-card" data-id="7" data-uuid="ffeeddcc">
            <a class="a-card__title" href="/a/show/7">Квартира</a>
            <div class="a-card__price">7 ₸</div>
            <img src="data:image/gif;base64,R0lGOD">
            <img data-src="https://alakcell-photos.kcdn.kz/webp/1-280x175.webp">
            <img src="/static/2.jpg">
            <img src="/static/2.jpg">
        </div>"#;
        let records = extractor().extract(&page(&[html.to_string()]), 1).unwrap();
        assert_eq!(
            records[0].images,
            vec![
                "https://alakcell-photos.kcdn.kz/webp/1-750x470.webp",
                "https://krisha.kz/static/2.jpg"
            ]
        );
    }

    #[test]
    fn zero_card_limit_still_yields_a_record() {
        let extractor =
            CardExtractor::new(Url::parse("https://krisha.kz").unwrap(), "krisha", 0, 10);
        let cards: Vec<String> = ["1", "2", "3"]
            .iter()
            .map(|id| card(id, "Квартира", "5 000 000 ₸"))
            .collect();
        let records = extractor.extract(&page(&cards), 1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "1");
    }

    #[test]
    fn upgrades_cdn_thumbnails_to_full_size() {
        assert_eq!(
            enhance_image_quality(
                "https://krisha-photos.kcdn.online/webp/a0/a0c8b561-ca6d/15-400x300.jpg"
            ),
            "https://krisha-photos.kcdn.online/webp/a0/a0c8b561-ca6d/15-750x470.webp"
        );
        assert_eq!(
            enhance_image_quality("https://alakcell-photos.kcdn.kz/webp/3-280x175.webp"),
            "https://alakcell-photos.kcdn.kz/webp/3-750x470.webp"
        );
        // Unknown size on the new CDN and foreign hosts are left alone
        assert_eq!(
            enhance_image_quality("https://alakcell-photos.kcdn.kz/webp/3-120x90.webp"),
            "https://alakcell-photos.kcdn.kz/webp/3-120x90.webp"
        );
        assert_eq!(
            enhance_image_quality("https://krisha.kz/static/2.jpg"),
            "https://krisha.kz/static/2.jpg"
        );
        assert_eq!(
            enhance_image_quality("https://krisha-photos.kcdn.online/webp/a0/x/cover.jpg"),
            "https://krisha-photos.kcdn.online/webp/a0/x/cover.jpg"
        );
    }

    #[test]
    fn thumbnail_sizes_of_one_photo_collapse_to_one_image() {
        let html = r#"<div class="a-card" data-id="8" data-uuid="ffeeddcc">
            <a class="a-card__title" href="/a/show/8">Квартира</a>
            <div class="a-card__price">8 ₸</div>
            <img src="https://krisha-photos.kcdn.online/webp/ff/ffeeddcc/1-400x300.jpg">
            <img src="https://krisha-photos.kcdn.online/webp/ff/ffeeddcc/1-120x90.jpg">
        </div>"#;
        let records = extractor().extract(&page(&[html.to_string()]), 1).unwrap();
        assert_eq!(
            records[0].images,
            vec!["https://krisha-photos.kcdn.online/webp/ff/ffeeddcc/1-750x470.webp"]
        );
    }

    #[test]
    fn uuid_synthesis_needs_two_characters() {
        assert_eq!(image_from_uuid("a", "1"), None);
        assert_eq!(
            image_from_uuid("ab12", "1").as_deref(),
            Some("https://krisha-photos.kcdn.online/webp/ab/ab12/1-400x300.webp")
        );
    }

    #[test]
    fn empty_result_container_is_not_an_error() {
        let doc =
            Html::parse_document(r#"<div class="a-search-list"><p>Ничего не найдено</p></div>"#);
        assert!(extractor().extract(&doc, 2).unwrap().is_empty());
    }

    #[test]
    fn page_without_listing_markup_is_page_fatal() {
        let doc = Html::parse_document("<html><body><h1>Captcha</h1></body></html>");
        assert!(matches!(
            extractor().extract(&doc, 4),
            Err(PageError::NoListings { page: 4 })
        ));
    }
}
