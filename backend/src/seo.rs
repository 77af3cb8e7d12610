//! Sitemap and RSS feed over active listings.

use crate::i18n::Language;
use crate::models::Product;

const FEED_TITLE: &str = "Mercadito";

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // XML 1.0 allows only tab, newline and carriage return below U+0020.
            '\t' | '\n' | '\r' => out.push(c),
            c if c < '\u{0020}' => {}
            '\u{FFFE}' | '\u{FFFF}' => {}
            _ => out.push(c),
        }
    }
    out
}

/**
 * listing_url
 * 生成商品详情页链接（前端路由：/{locale}/listings/{id}）。
 */
pub fn listing_url(site_url: &str, language: Language, product_id: &str) -> String {
    format!(
        "{}/{}/listings/{}",
        site_url.trim().trim_end_matches('/'),
        language.code(),
        urlencoding::encode(product_id)
    )
}

/// One `<url>` per listing and language.
pub fn build_sitemap(site_url: &str, products: &[Product]) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    for product in products {
        for language in Language::ALL {
            xml.push_str(&format!(
                "  <url><loc>{}</loc><lastmod>{}</lastmod></url>\n",
                escape_xml(&listing_url(site_url, language, &product.id)),
                product.updated_at.format("%Y-%m-%d")
            ));
        }
    }
    xml.push_str("</urlset>\n");
    xml
}

pub fn build_rss(site_url: &str, language: Language, products: &[Product]) -> String {
    let site = site_url.trim().trim_end_matches('/');
    let mut xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\">\n<channel>\n  <title>{}</title>\n  <link>{}</link>\n  <description>{}</description>\n  <language>{}</language>\n",
        FEED_TITLE,
        escape_xml(site),
        FEED_TITLE,
        language.code()
    );
    for product in products {
        let product = product.clone().localized(language);
        let link = escape_xml(&listing_url(site, language, &product.id));
        xml.push_str(&format!(
            "  <item>\n    <title>{}</title>\n    <link>{}</link>\n    <guid>{}</guid>\n    <description>{}</description>\n    <pubDate>{}</pubDate>\n  </item>\n",
            escape_xml(&product.title),
            link,
            link,
            escape_xml(&product.description),
            product.created_at.to_rfc2822()
        ));
    }
    xml.push_str("</channel>\n</rss>\n");
    xml
}
