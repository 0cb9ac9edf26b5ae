use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::PageInfo;

/// Listings per page assumed when extrapolating a total from page count
pub const TYPICAL_PAGE_SIZE: u64 = 20;

fn compile(list: &[&str]) -> Vec<Selector> {
    list.iter().filter_map(|s| Selector::parse(s).ok()).collect()
}

static PAGINATOR: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".paginator",
        ".pagination",
        "nav.paginator",
        "[data-testid='pagination-wrapper']",
    ])
});
static PAGE_BUTTON: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".paginator__btn",
        ".pagination__btn",
        ".page-btn",
        "[data-page]",
        "[data-testid='pagination-list-item']",
    ])
});
static PAGE_LINK: Lazy<Vec<Selector>> = Lazy::new(|| compile(&["a[href*='page=']"]));
static NEXT_BUTTON: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".paginator__btn--next",
        ".pagination__btn--next",
        ".next",
        ".page-next",
        "[data-testid='pagination-forward']",
    ])
});
static SUBTITLE: Lazy<Vec<Selector>> =
    Lazy::new(|| compile(&[".a-search-subtitle", ".search-results-nb"]));
static HEADERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile(&[
        ".search-results-header",
        ".results-count",
        ".found-count",
        ".search-results__count",
        ".listing-header",
        "h1",
        ".search-summary",
        ".page-title",
    ])
});

static PAGE_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]page=(\d+)").unwrap());
static FOUND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Найдено\s+(\d+(?:[\s\u{a0}]+\d+)*)\s+объявлени").unwrap());
static COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+(?:[\s\u{a0}]+\d+)*)\s*(?:объявлени|результат|найден)").unwrap()
});

/// Read total page count and next-page presence from a results page.
///
/// Only the first page of a run is reliable; later pages may render a
/// truncated paginator.
pub fn analyze(document: &Html) -> PageInfo {
    let paginators: Vec<ElementRef> = PAGINATOR
        .iter()
        .flat_map(|selector| document.select(selector))
        .collect();
    if paginators.is_empty() {
        return PageInfo::default();
    }

    let mut total_pages = 1;
    let mut has_next = false;

    for paginator in &paginators {
        for button in PAGE_BUTTON.iter().flat_map(|s| paginator.select(s)) {
            if let Some(n) = button.value().attr("data-page").and_then(page_number) {
                total_pages = total_pages.max(n);
            }
            let text: String = button.text().collect();
            if let Some(n) = page_number(&text) {
                total_pages = total_pages.max(n);
            }
        }

        for link in PAGE_LINK.iter().flat_map(|s| paginator.select(s)) {
            let page = link
                .value()
                .attr("href")
                .and_then(|href| PAGE_PARAM_RE.captures(href))
                .and_then(|caps| caps.get(1))
                .and_then(|m| page_number(m.as_str()));
            if let Some(n) = page {
                total_pages = total_pages.max(n);
            }
        }

        has_next |= NEXT_BUTTON
            .iter()
            .any(|selector| paginator.select(selector).next().is_some());
    }

    PageInfo {
        total_pages,
        has_next,
    }
}

fn page_number(text: &str) -> Option<u32> {
    text.trim().parse::<u32>().ok().filter(|n| *n > 0)
}

fn grouped_number(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Advertised number of matching listings, if the page states one
pub fn advertised_total(document: &Html) -> Option<u64> {
    let subtitle: String = SUBTITLE
        .iter()
        .flat_map(|selector| document.select(selector))
        .flat_map(|element| element.text())
        .collect();
    if let Some(total) = FOUND_RE
        .captures(&subtitle)
        .and_then(|caps| caps.get(1))
        .and_then(|m| grouped_number(m.as_str()))
    {
        return Some(total);
    }

    HEADERS
        .iter()
        .flat_map(|selector| document.select(selector))
        .find_map(|element| {
            let text: String = element.text().collect();
            COUNT_RE
                .captures(&text)
                .and_then(|caps| caps.get(1))
                .and_then(|m| grouped_number(m.as_str()))
                .filter(|total| *total > 0)
        })
}

/// Total estimate: advertised count, else pages times a typical page size,
/// else what was actually collected
pub fn estimate_total(advertised: Option<u64>, info: Option<PageInfo>, collected: usize) -> u64 {
    if let Some(total) = advertised.filter(|t| *t > 0) {
        return total;
    }
    match info {
        Some(info) if info.total_pages > 1 => u64::from(info.total_pages) * TYPICAL_PAGE_SIZE,
        _ => collected as u64,
    }
}
