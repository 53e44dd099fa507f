//! Media link discovery in HTML pages.

use url::Url;

/// Finds downloadable media links in an HTML document.
pub trait LinkExtractor: Send + Sync {
    fn extract(&self, page: &Url, html: &str) -> Vec<Url>;
}

/// Collects `src` attributes of `img`, `video` and `source` tags.
///
/// Relative links are resolved against the page URL. Only http(s) links are
/// kept, each once, in document order.
#[derive(Debug, Clone, Default)]
pub struct MediaTagExtractor;

const MEDIA_TAGS: [&str; 3] = ["img", "video", "source"];

impl LinkExtractor for MediaTagExtractor {
    fn extract(&self, page: &Url, html: &str) -> Vec<Url> {
        let mut links: Vec<Url> = Vec::new();
        let mut rest = html;

        while let Some(open) = rest.find('<') {
            rest = &rest[open + 1..];
            let end = rest.find('>').unwrap_or(rest.len());
            let tag = &rest[..end];
            rest = &rest[end..];

            let name: String = tag
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
                .to_ascii_lowercase();
            if !MEDIA_TAGS.contains(&name.as_str()) {
                continue;
            }

            let Some(src) = attribute(tag, "src") else {
                continue;
            };
            let Ok(url) = page.join(src.trim()) else {
                continue;
            };
            if matches!(url.scheme(), "http" | "https") && !links.contains(&url) {
                links.push(url);
            }
        }

        links
    }
}

/// Value of `name=...` inside a tag body, quoted or bare.
fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let lower = tag.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find(name) {
        let start = from + pos;
        from = start + name.len();

        // Must be a whole attribute name, not the tail of e.g. `data-src`.
        let preceded_ok = lower[..start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_whitespace());
        if !preceded_ok {
            continue;
        }

        let after = tag[from..].trim_start();
        let Some(value) = after.strip_prefix('=') else {
            continue;
        };
        let value = value.trim_start();
        return match value.chars().next() {
            Some(quote @ ('"' | '\'')) => {
                let inner = &value[1..];
                inner.find(quote).map(|end| &inner[..end])
            }
            Some(_) => {
                let end = value
                    .find(|c: char| c.is_ascii_whitespace())
                    .unwrap_or(value.len());
                Some(&value[..end])
            }
            None => None,
        };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://example.com/gallery/index.html").unwrap()
    }

    #[test]
    fn finds_media_tags_and_resolves_relative_links() {
        let html = r#"
            <html><body>
              <IMG class="hero" SRC="/images/a.jpg">
              <video controls><source src='clips/b.mp4' type="video/mp4"></video>
              <img src=https://cdn.example.net/c.png />
              <a href="/not-media.html">link</a>
            </body></html>
        "#;

        let links = MediaTagExtractor.extract(&page(), html);
        let links: Vec<&str> = links.iter().map(Url::as_str).collect();
        assert_eq!(
            links,
            vec![
                "https://example.com/images/a.jpg",
                "https://example.com/gallery/clips/b.mp4",
                "https://cdn.example.net/c.png",
            ]
        );
    }

    #[test]
    fn skips_duplicates_and_non_http_links() {
        let html = r#"<img src="a.jpg"><img src="a.jpg"><img src="data:image/png;base64,xx">"#;
        let links = MediaTagExtractor.extract(&page(), html);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].as_str(), "https://example.com/gallery/a.jpg");
    }

    #[test]
    fn ignores_lookalike_attributes() {
        let html = r#"<img data-src="lazy.jpg" src="real.jpg">"#;
        let links = MediaTagExtractor.extract(&page(), html);
        assert_eq!(links[0].as_str(), "https://example.com/gallery/real.jpg");

        assert!(MediaTagExtractor.extract(&page(), r#"<img alt="x">"#).is_empty());
        assert!(MediaTagExtractor.extract(&page(), "no tags at all").is_empty());
    }
}
