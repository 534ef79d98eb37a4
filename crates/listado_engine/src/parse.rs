use listado_core::{Condition, RawListing};
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// What one search-results page yields after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPage {
    pub listings: Vec<RawListing>,
    pub declared_total: Option<u64>,
    pub next_url: Option<String>,
}

struct PageSelectors {
    card: Selector,
    title: Selector,
    price_current: Selector,
    price_previous: Selector,
    any_fraction: Selector,
    image: Selector,
    quantity: Selector,
    next_rel: Selector,
    next_title: Selector,
}

impl PageSelectors {
    fn new() -> Option<Self> {
        Some(Self {
            card: Selector::parse("div.poly-card").ok()?,
            title: Selector::parse("a.poly-component__title").ok()?,
            price_current: Selector::parse(".poly-price__current .andes-money-amount__fraction")
                .ok()?,
            price_previous: Selector::parse(
                "s.andes-money-amount--previous .andes-money-amount__fraction",
            )
            .ok()?,
            any_fraction: Selector::parse(".andes-money-amount__fraction").ok()?,
            image: Selector::parse("img.poly-component__picture").ok()?,
            quantity: Selector::parse("span.ui-search-search-result__quantity-results").ok()?,
            next_rel: Selector::parse("a[rel=next]").ok()?,
            next_title: Selector::parse("a[title=Siguiente]").ok()?,
        })
    }
}

/// Parses a search-results page into raw listings.
///
/// Cards missing a title or pointing at tracking redirects are skipped, the
/// way the source's own shell entries are. An empty listing vector is a
/// valid outcome (zero results), not an error; blocked-page detection
/// happens before parsing.
pub fn parse_search_page(
    html: &str,
    page_index: u32,
    currency: &str,
    base_url: &str,
) -> ParsedPage {
    let Some(selectors) = PageSelectors::new() else {
        return ParsedPage {
            listings: Vec::new(),
            declared_total: None,
            next_url: None,
        };
    };
    let doc = Html::parse_document(html);

    let mut listings = Vec::new();
    for card in doc.select(&selectors.card) {
        let Some(anchor) = card.select(&selectors.title).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let permalink = href.split('#').next().unwrap_or(href).trim().to_string();
        if permalink.is_empty() || permalink.contains("mclics") || permalink.contains("mclicks") {
            continue;
        }
        let title = collect_text(anchor);
        if title.is_empty() {
            continue;
        }

        let price = card
            .select(&selectors.price_current)
            .next()
            .or_else(|| card.select(&selectors.any_fraction).next())
            .and_then(|el| parse_digits(&collect_text(el)));
        let original_price = card
            .select(&selectors.price_previous)
            .next()
            .and_then(|el| parse_digits(&collect_text(el)));

        let thumbnail = card.select(&selectors.image).next().and_then(|img| {
            img.value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"))
                .map(|s| s.to_string())
        });

        let card_text = collect_text(card);
        let card_condition = Condition::from_card_text(&card_text).unwrap_or(Condition::Unknown);
        let international = card_text.to_lowercase().contains("internacional");

        let position = listings.len() as u32;
        listings.push(RawListing {
            id: listing_id(&permalink),
            title,
            price,
            original_price,
            currency: currency.to_string(),
            permalink,
            thumbnail,
            international,
            page_index,
            position,
            card_condition,
        });
    }

    let declared_total = doc
        .select(&selectors.quantity)
        .next()
        .and_then(|el| parse_digits(&collect_text(el)));

    let next_url = doc
        .select(&selectors.next_rel)
        .next()
        .or_else(|| doc.select(&selectors.next_title).next())
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| resolve_href(href, base_url));

    ParsedPage {
        listings,
        declared_total,
        next_url,
    }
}

/// Reads the product condition from a detail page: JSON-LD first, falling
/// back to a raw scan for the `itemCondition` key when the value is embedded
/// in preloaded state instead.
pub fn parse_detail_condition(html: &str) -> Option<Condition> {
    let doc = Html::parse_document(html);
    if let Ok(selector) = Selector::parse("script[type='application/ld+json']") {
        for script in doc.select(&selector) {
            let raw = script.text().collect::<String>();
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
                if let Some(condition) = find_item_condition(&value) {
                    return Some(condition);
                }
            }
        }
    }
    scan_item_condition(html)
}

fn find_item_condition(value: &serde_json::Value) -> Option<Condition> {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(s)) = map.get("itemCondition") {
                if let Some(condition) = Condition::from_schema_value(s) {
                    return Some(condition);
                }
            }
            map.values().find_map(find_item_condition)
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_item_condition),
        _ => None,
    }
}

fn scan_item_condition(html: &str) -> Option<Condition> {
    let key_at = html.find("\"itemCondition\"")?;
    let rest = &html[key_at + "\"itemCondition\"".len()..];
    let colon = rest.find(':')?;
    let after = rest[colon + 1..].trim_start();
    let quoted = after.strip_prefix('"')?;
    let end = quoted.find('"')?;
    Condition::from_schema_value(&quoted[..end])
}

fn collect_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Digit-only numeric parse; thousands separators and currency text fall
/// away ("1.204 resultados" -> 1204).
pub fn parse_digits(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn resolve_href(href: &str, base_url: &str) -> Option<String> {
    let trimmed = href.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(trimmed) {
        return Some(url.into());
    }
    Url::parse(base_url)
        .ok()?
        .join(trimmed)
        .ok()
        .map(Into::into)
}

fn listing_id(permalink: &str) -> String {
    if let Ok(url) = Url::parse(permalink) {
        if let Some(segments) = url.path_segments() {
            for seg in segments {
                // "MLC-123456789-notebook-..." article style.
                let mut parts = seg.splitn(3, '-');
                if let (Some(site), Some(number)) = (parts.next(), parts.next()) {
                    if site.len() == 3
                        && site.bytes().all(|b| b.is_ascii_uppercase())
                        && !number.is_empty()
                        && number.bytes().all(|b| b.is_ascii_digit())
                    {
                        return format!("{site}-{number}");
                    }
                }
                // "/p/MLC12345678" catalog style.
                if seg.len() > 3
                    && seg.as_bytes()[..3].iter().all(u8::is_ascii_uppercase)
                    && seg.as_bytes()[3..].iter().all(u8::is_ascii_digit)
                {
                    return seg.to_string();
                }
            }
        }
    }
    permalink.to_string()
}

#[cfg(test)]
mod tests {
    use super::{parse_detail_condition, parse_digits, parse_search_page};
    use listado_core::Condition;

    fn card(permalink: &str, title: &str, price: &str, extra: &str) -> String {
        format!(
            r#"<div class="poly-card"><div class="poly-card__content">
            <h3 class="poly-component__title-wrapper">
            <a class="poly-component__title" href="{permalink}">{title}</a></h3>
            <div class="poly-price__current">
            <span class="andes-money-amount__currency-symbol">$</span>
            <span class="andes-money-amount__fraction">{price}</span></div>
            {extra}
            <img class="poly-component__picture" src="https://http2.mlstatic.com/D_1.jpg">
            </div></div>"#
        )
    }

    fn results_page(cards: &str, quantity: &str, next: &str) -> String {
        format!(
            r#"<html><body><div class="ui-search-layout">
            <span class="ui-search-search-result__quantity-results">{quantity}</span>
            {cards}{next}</div></body></html>"#
        )
    }

    #[test]
    fn parses_cards_totals_and_next_link() {
        let cards = [
            card(
                "https://articulo.mercadolibre.cl/MLC-111222333-notebook-gamer#tracking",
                "Notebook Gamer RTX 4060",
                "899.990",
                r#"<s class="andes-money-amount--previous">
                   <span class="andes-money-amount__fraction">1.099.990</span></s>"#,
            ),
            card(
                "https://www.mercadolibre.cl/p/MLC20544761",
                "Notebook Victus 16GB",
                "649.990",
                "",
            ),
        ]
        .join("\n");
        let html = results_page(
            &cards,
            "1.204 resultados",
            r#"<a title="Siguiente" href="/notebook_Desde_49_NoIndex_True">Siguiente</a>"#,
        );

        let page = parse_search_page(&html, 0, "CLP", "https://listado.mercadolibre.cl/notebook");
        assert_eq!(page.declared_total, Some(1204));
        assert_eq!(
            page.next_url.as_deref(),
            Some("https://listado.mercadolibre.cl/notebook_Desde_49_NoIndex_True")
        );
        assert_eq!(page.listings.len(), 2);

        let first = &page.listings[0];
        assert_eq!(first.id, "MLC-111222333");
        assert_eq!(first.title, "Notebook Gamer RTX 4060");
        assert_eq!(first.price, Some(899_990));
        assert_eq!(first.original_price, Some(1_099_990));
        assert_eq!(
            first.permalink,
            "https://articulo.mercadolibre.cl/MLC-111222333-notebook-gamer"
        );
        assert_eq!(first.page_index, 0);
        assert_eq!(first.position, 0);
        assert!(first.thumbnail.is_some());

        let second = &page.listings[1];
        assert_eq!(second.id, "MLC20544761");
        assert_eq!(second.original_price, None);
        assert_eq!(second.position, 1);
    }

    #[test]
    fn card_condition_and_international_markers() {
        let cards = [
            card(
                "https://articulo.mercadolibre.cl/MLC-1-notebook",
                "Notebook Thinkpad",
                "249.990",
                r#"<span class="poly-component__item-condition">Usado</span>"#,
            ),
            card(
                "https://articulo.mercadolibre.cl/MLC-2-mouse",
                "Mouse inalambrico",
                "9.990",
                r#"<span class="poly-component__shipped-from">Internacional</span>"#,
            ),
        ]
        .join("\n");
        let html = results_page(&cards, "2 resultados", "");

        let page = parse_search_page(&html, 3, "CLP", "https://listado.mercadolibre.cl/x");
        assert_eq!(page.listings[0].card_condition, Condition::Used);
        assert!(!page.listings[0].international);
        assert_eq!(page.listings[1].card_condition, Condition::Unknown);
        assert!(page.listings[1].international);
        assert_eq!(page.listings[0].page_index, 3);
        assert_eq!(page.next_url, None);
    }

    #[test]
    fn tracking_links_and_untitled_cards_are_skipped() {
        let cards = [
            card(
                "https://mclics.mercadolibre.cl/jump?ad=1",
                "Promocionado",
                "1.000",
                "",
            ),
            card("https://articulo.mercadolibre.cl/MLC-3-ok", "", "2.000", ""),
        ]
        .join("\n");
        let html = results_page(&cards, "2 resultados", "");
        let page = parse_search_page(&html, 0, "CLP", "https://listado.mercadolibre.cl/x");
        assert!(page.listings.is_empty());
    }

    #[test]
    fn detail_condition_from_json_ld() {
        let html = r#"<html><head><script type="application/ld+json">
        {"@context":"https://schema.org","@type":"Product",
         "offers":{"@type":"Offer","price":"649990",
                   "itemCondition":"https://schema.org/NewCondition"}}
        </script></head><body></body></html>"#;
        assert_eq!(parse_detail_condition(html), Some(Condition::New));
    }

    #[test]
    fn detail_condition_from_preloaded_state() {
        let html = r#"<script>window.__PRELOADED_STATE__ =
        {"item":{"itemCondition" : "https://schema.org/UsedCondition"}};</script>"#;
        assert_eq!(parse_detail_condition(html), Some(Condition::Used));
    }

    #[test]
    fn detail_condition_absent() {
        assert_eq!(parse_detail_condition("<html><body>nada</body></html>"), None);
    }

    #[test]
    fn digit_parse() {
        assert_eq!(parse_digits("1.204 resultados"), Some(1204));
        assert_eq!(parse_digits("$ 649.990"), Some(649_990));
        assert_eq!(parse_digits("sin precio"), None);
    }
}
