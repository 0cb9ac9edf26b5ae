//! Shared fixtures for the integration tests

use std::time::Duration;

use estate_scout::scrapers::site::Site;
use estate_scout::ScraperConfig;

/// Wraps listing markup in a results page
#[allow(dead_code)]
pub fn results_page(cards: &str, paginator: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="ru">
<head><meta charset="UTF-8"><title>Продажа квартир</title></head>
<body>
    <div class="a-search-subtitle">Найдено {} объявлений</div>
    <section class="a-search-list">
        {}
    </section>
    {}
</body>
</html>"#,
        cards.matches("class=\"a-card\"").count(),
        cards,
        paginator
    )
}

/// One well-formed krisha-style card
#[allow(dead_code)]
pub fn card(id: &str, price: i64) -> String {
    format!(
        r#"<div class="a-card" data-id="{id}" data-uuid="ab{id}cdef">
            <a class="a-card__title" href="/a/show/{id}">2-комнатная квартира · 54 м² · 5/9 этаж</a>
            <div class="a-card__price">{price} ₸</div>
            <div class="a-card__subtitle">Алмалинский р-н, Абая 10</div>
            <div class="a-card__text-preview">монолитный дом, 2015 г.п.</div>
        </div>"#
    )
}

/// `count` cards with ids `{prefix}-1..={prefix}-{count}`
#[allow(dead_code)]
pub fn cards(prefix: &str, count: usize) -> String {
    (1..=count)
        .map(|n| card(&format!("{}{}", prefix, n), 20_000_000 + n as i64))
        .collect()
}

/// Paginator advertising `total` numbered pages and a next control
#[allow(dead_code)]
pub fn paginator(total: u32) -> String {
    let buttons: String = (1..=total)
        .map(|n| format!(r#"<a class="paginator__btn" data-page="{n}" href="?page={n}">{n}</a>"#))
        .collect();
    format!(
        r#"<nav class="paginator">{}<a class="paginator__btn--next" href="?page=2">Дальше</a></nav>"#,
        buttons
    )
}

/// Results page whose list container is present but empty
#[allow(dead_code)]
pub fn empty_page() -> String {
    results_page("", "")
}

/// Config tuned for tests: small pool, millisecond backoff, short deadline
#[allow(dead_code)]
pub fn test_config(base_url: &str) -> ScraperConfig {
    ScraperConfig {
        site: Site::Krisha,
        base_url: Some(base_url.to_string()),
        workers: 3,
        deadline: Duration::from_secs(10),
        retry_backoff: Duration::from_millis(5),
        request_timeout: Duration::from_secs(5),
        ..ScraperConfig::default()
    }
}
