use std::sync::LazyLock;

use mirador_core::models::PageLinks;
use mirador_core::traits::LinkExtractor;
use scraper::{Html, Selector};

static ANCHORS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector"));
static IMAGES: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img[src]").expect("img selector"));
static SCRIPTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script[src]").expect("script selector"));
static LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("link[href]").expect("link selector"));

/// Link extractor backed by `scraper`'s HTML5 parser.
///
/// Returns raw attribute values in document order; resolution and
/// origin filtering happen in the frontier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScraperLinkExtractor;

impl LinkExtractor for ScraperLinkExtractor {
    fn extract(&self, html: &str) -> PageLinks {
        let document = Html::parse_document(html);

        let attr_values = |selector: &Selector, attr: &str| -> Vec<String> {
            document
                .select(selector)
                .filter_map(|el| el.value().attr(attr))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect()
        };

        let anchors = attr_values(&ANCHORS, "href");
        let mut resources = attr_values(&IMAGES, "src");
        resources.extend(attr_values(&SCRIPTS, "src"));
        resources.extend(attr_values(&LINKS, "href"));

        PageLinks { anchors, resources }
    }
}
