//! HTML event bodies to Markdown.
//!
//! Graph returns meeting bodies as Outlook-flavoured HTML. Only the structure
//! that survives in plain text is kept: paragraphs, line breaks, links, bold
//! and italic. Everything else is stripped.

use once_cell::sync::Lazy;
use regex::Regex;

static HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(head|style|script)[^>]*>.*?</(head|style|script)>").unwrap());
static BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br[^>]*>").unwrap());
static PARAGRAPH_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</(p|div)>").unwrap());
static LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a[^>]*href=["']([^"']*)["'][^>]*>(.*?)</a>"#).unwrap()
});
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<(strong|b)>(.*?)</(strong|b)>").unwrap());
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<(em|i)>(.*?)</(em|i)>").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());

/// Convert an HTML body to basic Markdown
pub fn html_to_markdown(html: &str) -> String {
    let md = html.replace("\r\n", "\n");
    let md = HEAD.replace_all(&md, "");
    let md = BREAK.replace_all(&md, "\n");
    let md = PARAGRAPH_END.replace_all(&md, "\n\n");
    let md = LINK.replace_all(&md, |caps: &regex::Captures| {
        let href = &caps[1];
        let text = TAG.replace_all(&caps[2], "");
        let text = text.trim();
        if text.is_empty() || text == href {
            href.to_string()
        } else {
            format!("[{}]({})", text, href)
        }
    });
    let md = BOLD.replace_all(&md, "**$2**");
    let md = ITALIC.replace_all(&md, "*$2*");
    let md = TAG.replace_all(&md, "");
    let md = decode_entities(&md);
    let md = BLANK_LINES.replace_all(&md, "\n\n");

    md.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Plain-text bodies pass through unchanged apart from trimming
pub fn body_to_markdown(content_type: &str, content: &str) -> String {
    if content_type.eq_ignore_ascii_case("html") {
        html_to_markdown(content)
    } else {
        content.replace("\r\n", "\n").trim().to_string()
    }
}

fn decode_entities(s: &str) -> String {
    // &amp; last so "&amp;lt;" stays "&lt;"
    s.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paragraphs_and_breaks() {
        let html = "<p>Hello</p><p>Line one<br>Line two</p>";
        assert_eq!(html_to_markdown(html), "Hello\n\nLine one\nLine two");
    }

    #[test]
    fn test_links() {
        assert_eq!(
            html_to_markdown(r#"Join <a href="https://example.com/join">here</a>"#),
            "Join [here](https://example.com/join)"
        );
        assert_eq!(
            html_to_markdown(r#"<a href='https://x.test'>https://x.test</a>"#),
            "https://x.test"
        );
    }

    #[test]
    fn test_emphasis() {
        assert_eq!(
            html_to_markdown("<b>Bold</b>, <strong>strong</strong> and <em>em</em> <i>i</i>"),
            "**Bold**, **strong** and *em* *i*"
        );
    }

    #[test]
    fn test_strips_head_and_unknown_tags() {
        let html = "<html><head><style>p { color: red; }</style></head>\
                    <body><div><span>Agenda</span></div></body></html>";
        assert_eq!(html_to_markdown(html), "Agenda");
    }

    #[test]
    fn test_entities() {
        assert_eq!(
            html_to_markdown("Tom &amp; Jerry&nbsp;&lt;3 &quot;hi&quot; &amp;lt;"),
            "Tom & Jerry <3 \"hi\" &lt;"
        );
    }

    #[test]
    fn test_collapses_blank_lines() {
        let html = "<p>One</p>\r\n<p>&nbsp;</p>\r\n<p>Two</p>";
        assert_eq!(html_to_markdown(html), "One\n\nTwo");
    }

    #[test]
    fn test_plain_text_body() {
        assert_eq!(body_to_markdown("text", "  a\r\nb  "), "a\nb");
        assert_eq!(body_to_markdown("HTML", "<p>a</p>"), "a");
    }
}
