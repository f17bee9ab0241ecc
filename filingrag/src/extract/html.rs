//! HTML to plain text.
//!
//! Parses with `scraper` (which decodes entities), drops text under
//! `<script>` and `<style>`, collapses whitespace runs to a single space, and
//! trims.

use scraper::Html;

/// Extract visible text from an HTML document.
pub fn extract_html(raw: &str) -> String {
    let document = Html::parse_document(raw);

    let mut pieces: Vec<&str> = Vec::new();
    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let excluded = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|element| matches!(element.name(), "script" | "style"))
        });
        if !excluded {
            pieces.push(&**text);
        }
    }

    collapse_whitespace(pieces)
}

fn collapse_whitespace<'a>(pieces: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for piece in pieces {
        for word in piece.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(word);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_collapses_whitespace() {
        let html = "<html><body><h1>Item 1A.</h1>\n  <p>Risk   Factors</p></body></html>";
        assert_eq!(extract_html(html), "Item 1A. Risk Factors");
    }

    #[test]
    fn drops_script_and_style_blocks() {
        let html = r#"<html><head>
            <style>body { color: red }</style>
            <script>var tracked = true;</script>
        </head><body><p>visible</p></body></html>"#;
        assert_eq!(extract_html(html), "visible");
    }

    #[test]
    fn decodes_entities() {
        let html = "<p>Research &amp; Development &mdash; 2024</p>";
        assert_eq!(extract_html(html), "Research & Development \u{2014} 2024");
    }

    #[test]
    fn empty_document_yields_empty_string() {
        assert_eq!(extract_html("<html><body></body></html>"), "");
    }
}
