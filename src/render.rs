//! Digest rendering.
//!
//! Summary entries arrive as `"<url>\n<text>"`, where the text may end with a
//! `## <title>:` section listing sources as `- [text](url)` items. Entries are
//! parsed into a [`Digest`] first and then emitted as HTML or plain text.

use chrono::{DateTime, Utc};
use std::fmt::Write;

const LINK_STYLE: &str = "color: #0366d6; text-decoration: none;";

/// A piece of summary text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Link { text: String, url: String },
}

/// One item of a sources section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLink {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sources {
    pub title: String,
    pub links: Vec<SourceLink>,
}

/// The parsed summary of one submitted link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    pub url: String,
    pub body: Vec<Segment>,
    pub sources: Option<Sources>,
}

/// All entries of one email, in submission order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Digest {
    pub entries: Vec<DigestEntry>,
}

impl Digest {
    /// Parse raw entries, dropping the ones without a `url\ntext` shape
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Self {
        Self {
            entries: raw.iter().filter_map(|r| parse_entry(r.as_ref())).collect(),
        }
    }

    /// HTML fragment with one styled block per entry
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        for entry in &self.entries {
            write_entry_html(&mut html, entry);
        }
        html
    }

    /// Plain-text rendering for the text/plain alternative of the mail
    pub fn to_text(&self) -> String {
        let mut text = String::new();
        for entry in &self.entries {
            let _ = writeln!(text, "{}", entry.url);
            for segment in &entry.body {
                match segment {
                    Segment::Text(t) => text.push_str(t),
                    Segment::Link { text: label, url } => {
                        let _ = write!(text, "{label} <{url}>");
                    }
                }
            }
            text.push('\n');
            if let Some(sources) = &entry.sources {
                let _ = writeln!(text, "\n{}:", sources.title);
                for link in &sources.links {
                    let _ = writeln!(text, "  - {} <{}>", link.text, link.url);
                }
            }
            text.push_str("\n---\n\n");
        }
        text
    }
}

/// Split a file of entries separated by lines holding only `---`
pub fn split_entries(content: &str) -> Vec<&str> {
    content
        .split("\n---\n")
        .map(str::trim)
        .filter(|e| !e.is_empty() && *e != "---")
        .collect()
}

/// Render raw summary entries to the HTML body fragment
pub fn render_html<S: AsRef<str>>(raw: &[S]) -> String {
    Digest::parse(raw).to_html()
}

/// Wrap a rendered fragment in the full email document
pub fn wrap_document(title: &str, body: &str, generated_at: DateTime<Utc>) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Helvetica, Arial, sans-serif; line-height: 1.6; color: #333; max-width: 800px; margin: 0 auto; padding: 20px;">
    <div style="background-color: #f8f9fa; padding: 20px; border-radius: 8px; margin-bottom: 30px; text-align: center;">
        <h1 style="margin: 0; color: #333;">{title}</h1>
        <p style="margin: 10px 0 0; color: #666;">Here are the summaries of the articles you requested:</p>
    </div>
{body}
    <p style="color: #6b7280; font-size: 12px; text-align: center;">Generated {date}</p>
</body>
</html>
"#,
        title = html_escape(title),
        date = generated_at.format("%B %d, %Y %H:%M UTC"),
    )
}

fn parse_entry(raw: &str) -> Option<DigestEntry> {
    let (url, content) = raw.split_once('\n')?;
    let (main, sources) = match content.split_once("\n\n##") {
        Some((main, rest)) => (main, parse_sources(rest)),
        None => (content, None),
    };
    Some(DigestEntry {
        url: url.trim().to_string(),
        body: parse_segments(main),
        sources,
    })
}

/// Parse the text following a `\n\n##` marker
fn parse_sources(rest: &str) -> Option<Sources> {
    let section = rest.strip_prefix(' ').unwrap_or(rest);
    let (title, raw_links) = section.split_once(":\n")?;
    let links = raw_links
        .split("\n- ")
        .filter_map(|item| {
            let item = item.trim();
            let item = item.strip_prefix("- ").unwrap_or(item);
            if item.is_empty() {
                return None;
            }
            let (text, url) = item.split_once(']')?;
            let text = text.strip_prefix('[').unwrap_or(text);
            let url = url.strip_prefix('(').unwrap_or(url).trim_end_matches(')');
            Some(SourceLink {
                text: text.trim().to_string(),
                url: url.trim().to_string(),
            })
        })
        .collect();
    Some(Sources {
        title: title.trim().to_string(),
        links,
    })
}

/// Split text into plain runs and `[text](url)` links.
///
/// Brackets or parentheses that are not part of a well-formed link stay literal.
fn parse_segments(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut plain = String::new();
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        plain.push_str(&rest[..open]);
        let candidate = &rest[open..];
        match parse_link(candidate) {
            Some((link, consumed)) => {
                if !plain.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut plain)));
                }
                segments.push(link);
                rest = &candidate[consumed..];
            }
            None => {
                plain.push('[');
                rest = &candidate[1..];
            }
        }
    }
    plain.push_str(rest);
    if !plain.is_empty() {
        segments.push(Segment::Text(plain));
    }
    segments
}

/// Parse a link at the start of `s` (which begins with `[`), returning it and
/// the number of bytes it spans
fn parse_link(s: &str) -> Option<(Segment, usize)> {
    let close = s.find(']')?;
    let label = &s[1..close];
    if label.contains('[') || label.contains('\n') {
        return None;
    }
    let target = s[close + 1..].strip_prefix('(')?;

    // urls may contain balanced parentheses, but no whitespace
    let mut depth = 0usize;
    for (i, c) in target.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => {
                if i == 0 {
                    return None;
                }
                let url = &target[..i];
                let label = if label.is_empty() { url } else { label };
                let link = Segment::Link {
                    text: label.to_string(),
                    url: url.to_string(),
                };
                return Some((link, close + 3 + i));
            }
            ')' => depth -= 1,
            c if c.is_whitespace() => return None,
            _ => {}
        }
    }
    None
}

fn write_entry_html(html: &mut String, entry: &DigestEntry) {
    let mut body = String::new();
    for segment in &entry.body {
        match segment {
            Segment::Text(t) => body.push_str(&html_escape(t)),
            Segment::Link { text, url } => {
                let _ = write!(
                    body,
                    r#"<a style="{LINK_STYLE}" href="{}">{}</a>"#,
                    html_escape(url),
                    html_escape(text)
                );
            }
        }
    }

    let _ = write!(
        html,
        r#"
    <div style="background-color: white; border: 1px solid #e9ecef; border-radius: 8px; padding: 20px; margin-bottom: 20px; box-shadow: 0 2px 4px rgba(0,0,0,0.05);">
        <a href="{url}" style="color: #0366d6; text-decoration: none; font-weight: 500; display: block; margin-bottom: 10px; word-break: break-all;">{url}</a>
        <div style="color: #24292e; margin: 15px 0; font-size: 16px;">{body}</div>"#,
        url = html_escape(&entry.url),
    );

    if let Some(sources) = &entry.sources {
        let _ = write!(
            html,
            r#"
        <div style="background-color: #f8f9fa; padding: 15px; border-radius: 6px; margin-top: 15px;">
            <h3 style="margin-top: 0; color: #24292e; font-size: 1.1em;">{}</h3>
            <ul style="margin: 0; padding-left: 20px;">"#,
            html_escape(&sources.title)
        );
        for link in &sources.links {
            let _ = write!(
                html,
                r#"
                <li style="margin: 5px 0;"><a style="{LINK_STYLE}" href="{}">{}</a></li>"#,
                html_escape(&link.url),
                html_escape(&link.text)
            );
        }
        html.push_str(
            r#"
            </ul>
        </div>"#,
        );
    }

    html.push_str(
        r#"
    </div>
"#,
    );
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_with_sources() {
        let raw = "http://a.test\nSummary one.\n\n## Sources:\n- [Foo](http://foo.test)";
        let digest = Digest::parse(&[raw]);

        assert_eq!(digest.entries.len(), 1);
        let entry = &digest.entries[0];
        assert_eq!(entry.url, "http://a.test");
        assert_eq!(entry.body, vec![Segment::Text("Summary one.".to_string())]);
        assert_eq!(
            entry.sources,
            Some(Sources {
                title: "Sources".to_string(),
                links: vec![SourceLink {
                    text: "Foo".to_string(),
                    url: "http://foo.test".to_string(),
                }],
            })
        );

        let html = digest.to_html();
        assert!(html.contains(r#"href="http://a.test""#));
        assert!(html.contains("Summary one."));
        assert!(html.contains(">Sources</h3>"));
        assert!(html.contains(r#"href="http://foo.test">Foo</a></li>"#));
    }

    #[test]
    fn test_entry_without_newline_is_dropped() {
        let html = render_html(&["no newline here", "http://b.test\nKept."]);
        assert!(!html.contains("no newline here"));
        assert!(html.contains("http://b.test"));
        assert!(html.contains("Kept."));
        assert_eq!(html.matches("border-radius: 8px").count(), 1);
    }

    #[test]
    fn test_inline_links() {
        let segments = parse_segments("See [the post](https://x.test/a) for more.");
        assert_eq!(
            segments,
            vec![
                Segment::Text("See ".to_string()),
                Segment::Link {
                    text: "the post".to_string(),
                    url: "https://x.test/a".to_string(),
                },
                Segment::Text(" for more.".to_string()),
            ]
        );
    }

    #[test]
    fn test_literal_parentheses_and_brackets_survive() {
        let text = "Revenue grew (about 10%) in [Q3] and [a] (b).";
        assert_eq!(parse_segments(text), vec![Segment::Text(text.to_string())]);

        let html = render_html(&[format!("http://a.test\n{text}")]);
        assert!(html.contains(text));
        assert!(!html.contains("</a>\""));
    }

    #[test]
    fn test_link_url_with_balanced_parentheses() {
        let segments = parse_segments("[Rust](https://en.wikipedia.org/wiki/Rust_(language)).");
        assert_eq!(
            segments,
            vec![
                Segment::Link {
                    text: "Rust".to_string(),
                    url: "https://en.wikipedia.org/wiki/Rust_(language)".to_string(),
                },
                Segment::Text(".".to_string()),
            ]
        );
    }

    #[test]
    fn test_text_is_escaped() {
        let html = render_html(&["http://a.test\n<script>alert(1)</script> & more"]);
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt; &amp; more"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_malformed_source_items_are_skipped() {
        let raw = "http://a.test\nBody.\n\n## Sources:\n- [Good](http://g.test)\n- no bracket\n- [Also](http://h.test)";
        let digest = Digest::parse(&[raw]);
        let sources = digest.entries[0].sources.as_ref().unwrap();
        let urls: Vec<_> = sources.links.iter().map(|l| l.url.as_str()).collect();
        assert_eq!(urls, vec!["http://g.test", "http://h.test"]);
    }

    #[test]
    fn test_sources_without_colon_line_render_no_box() {
        let digest = Digest::parse(&["http://a.test\nBody.\n\n## Notes"]);
        assert_eq!(digest.entries[0].sources, None);
        assert!(!digest.to_html().contains("<ul"));
    }

    #[test]
    fn test_error_entry_renders_as_text() {
        let html = render_html(&["http://a.test\nError summarizing: timed out"]);
        assert!(html.contains("Error summarizing: timed out"));
    }

    #[test]
    fn test_entries_keep_input_order() {
        let html = render_html(&["http://1.test\nOne.", "http://2.test\nTwo."]);
        let first = html.find("http://1.test").unwrap();
        let second = html.find("http://2.test").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_plain_text_rendering() {
        let digest = Digest::parse(&[
            "http://a.test\nSee [post](http://p.test).\n\n## Sources:\n- [Foo](http://foo.test)",
        ]);
        let text = digest.to_text();
        assert!(text.starts_with("http://a.test\nSee post <http://p.test>.\n"));
        assert!(text.contains("Sources:\n  - Foo <http://foo.test>"));
    }

    #[test]
    fn test_wrap_document() {
        let at = DateTime::parse_from_rfc3339("2026-10-17T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let doc = wrap_document("Your Article Summaries", "<p>x</p>", at);
        assert!(doc.starts_with("<!DOCTYPE html>"));
        assert!(doc.contains(">Your Article Summaries</h1>"));
        assert!(doc.contains("<p>x</p>"));
        assert!(doc.contains("Generated October 17, 2026 08:30 UTC"));
    }

    #[test]
    fn test_split_entries_on_separator_lines() {
        let content = "http://1.test\nOne.\n---\nhttp://2.test\nTwo.\n\n---\n\nhttp://3.test\nThree --- and more.\n";
        assert_eq!(
            split_entries(content),
            vec!["http://1.test\nOne.", "http://2.test\nTwo.", "http://3.test\nThree --- and more."]
        );
        assert!(split_entries("\n---\n").is_empty());
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("a & b"), "a &amp; b");
    }
}
