use scraper::{ElementRef, Html, Selector};

/// Tags whose text is treated as page content. Text outside these (bare divs,
/// menus, widgets) is ignored.
const CONTENT_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre", "td", "th", "figcaption",
    "title",
];

/// Containers that hold navigation/ad chrome rather than article text. A
/// content tag nested anywhere inside one of these is dropped.
const CHROME_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "form", "script", "style", "noscript", "svg",
];

/// Extract readable text from HTML: collect the content-bearing elements,
/// drop any that sit inside navigation or ad chrome, and join their text.
pub fn extract_html_content(html: &str) -> String {
    let document = Html::parse_document(html);
    let content = Selector::parse(&CONTENT_TAGS.join(", ")).unwrap();

    let mut blocks: Vec<String> = Vec::new();

    for element in document.select(&content) {
        if has_ancestor_tag(&element, CHROME_TAGS) {
            continue;
        }
        // Nested content tags (a list inside a quote, headings in a cell)
        // are already covered by their outermost match.
        if has_ancestor_tag(&element, CONTENT_TAGS) {
            continue;
        }

        let text = squash_spaces(&element.text().collect::<Vec<_>>().join(" "));
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    blocks.join(" ")
}

fn has_ancestor_tag(element: &ElementRef<'_>, tags: &[&str]) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|ancestor| tags.contains(&ancestor.value().name()))
}

/// Collapse all runs of whitespace to single spaces.
pub(crate) fn squash_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Host portion of a URL, used as the politeness key. Strips scheme,
/// userinfo, path, query and fragment; lowercased.
pub fn host_of(url: &str) -> String {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = host.rsplit_once('@').map(|(_, h)| h).unwrap_or(host);

    if host.is_empty() {
        "unknown".to_string()
    } else {
        host.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_strips_chrome() {
        let html = r#"
            <html>
            <head><title>Test</title></head>
            <body>
                <nav>Navigation here</nav>
                <aside>Sponsored links</aside>
                <main>
                    <h1>Article Title</h1>
                    <p>This is the main content of the article.</p>
                    <p>Second paragraph with more information.</p>
                </main>
                <footer>Footer content</footer>
                <script>alert('bad');</script>
            </body>
            </html>
        "#;

        let text = extract_html_content(html);
        assert!(text.contains("Article Title"));
        assert!(text.contains("main content"));
        assert!(!text.contains("Navigation here"));
        assert!(!text.contains("Sponsored links"));
        assert!(!text.contains("Footer content"));
        assert!(!text.contains("alert"));
    }

    #[test]
    fn test_list_items_in_nav_excluded() {
        let html = r#"
            <body>
                <nav><ul><li>Home</li><li>About</li></ul></nav>
                <ul><li>Wheat yields fell</li></ul>
            </body>
        "#;

        let text = extract_html_content(html);
        assert!(text.contains("Wheat yields fell"));
        assert!(!text.contains("Home"));
        assert!(!text.contains("About"));
    }

    #[test]
    fn test_nested_content_not_duplicated() {
        let html = "<body><blockquote><p>Quoted claim</p></blockquote></body>";
        assert_eq!(extract_html_content(html), "Quoted claim");
    }

    #[test]
    fn test_bare_div_text_ignored() {
        let html = "<body><div>cookie banner text</div><p>Real sentence.</p></body>";
        assert_eq!(extract_html_content(html), "Real sentence.");
    }

    #[test]
    fn test_squash_spaces() {
        assert_eq!(squash_spaces("hello   world"), "hello world");
        assert_eq!(squash_spaces("  hello\n\n  world  "), "hello world");
    }

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("https://Example.com/path"), "example.com");
        assert_eq!(host_of("http://www.test.org/a/b"), "www.test.org");
        assert_eq!(host_of("https://user:pw@private.example/x"), "private.example");
        assert_eq!(host_of("https://example.com?q=1"), "example.com");
    }
}
