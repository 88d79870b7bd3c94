//! YAML header blocks for mirrored record files
//!
//! Every record file starts with a YAML block delimited by `---` lines:
//! ```markdown
//! ---
//! id: AAMkAGI2
//! account: work
//! subject: Weekly sync
//! ---
//!
//! # Weekly sync
//!
//! Agenda...
//! ```

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontmatterError {
    #[error("No frontmatter block found")]
    Missing,

    #[error("Invalid frontmatter: {0}")]
    Invalid(#[source] serde_yaml::Error),

    #[error("Failed to serialize frontmatter: {0}")]
    Serialization(#[source] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, FrontmatterError>;

/// Split a file into its frontmatter YAML string and body, without parsing the YAML.
///
/// Returns (frontmatter_yaml, body) where frontmatter_yaml is None if
/// no complete frontmatter block was found.
pub fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    // Frontmatter must start at the very beginning with ---
    let Some(after_opening) = raw.strip_prefix("---") else {
        return (None, raw);
    };

    let content_start = if let Some(rest) = after_opening.strip_prefix('\n') {
        rest
    } else if let Some(rest) = after_opening.strip_prefix("\r\n") {
        rest
    } else {
        // "----" or "--- text" is not a delimiter
        return (None, raw);
    };

    match find_closing_delimiter(content_start) {
        Some(close_pos) => {
            let yaml = &content_start[..close_pos];
            let after_close = &content_start[close_pos + 3..];
            let body = after_close
                .strip_prefix('\n')
                .or_else(|| after_close.strip_prefix("\r\n"))
                .unwrap_or(after_close);
            (Some(yaml), body)
        }
        None => (None, raw),
    }
}

/// Byte offset of the closing `---` line (must be a whole line)
fn find_closing_delimiter(s: &str) -> Option<usize> {
    let mut pos = 0;
    for line in s.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']) == "---" {
            return Some(pos);
        }
        pos += line.len();
    }
    None
}

/// Parse the frontmatter block into `T` and return it alongside the body.
///
/// `T` only needs to declare the fields it cares about; unknown keys are ignored,
/// which is what lets identity scans decode just `id` and `account`.
pub fn parse_header<T: DeserializeOwned>(raw: &str) -> Result<(T, &str)> {
    let (yaml, body) = split_frontmatter(raw);
    let yaml = yaml.ok_or(FrontmatterError::Missing)?;
    let header = serde_yaml::from_str(yaml).map_err(FrontmatterError::Invalid)?;
    Ok((header, body))
}

/// Build a complete file: `---\n<header>---\n\n<content>`.
///
/// Field order follows the serialization order of `T`, so struct headers
/// always produce byte-identical output for identical input.
pub fn build_document<T: Serialize>(header: &T, content: &str) -> Result<String> {
    let yaml = serde_yaml::to_string(header).map_err(FrontmatterError::Serialization)?;
    Ok(format!("---\n{}---\n\n{}", yaml, content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Header {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    }

    #[test]
    fn split_note_with_frontmatter() {
        let raw = "---\nid: abc\n---\n\nContent here";
        let (yaml, content) = split_frontmatter(raw);
        assert_eq!(yaml, Some("id: abc\n"));
        assert_eq!(content, "\nContent here");
    }

    #[test]
    fn split_note_without_frontmatter() {
        let raw = "Just content, no frontmatter";
        let (yaml, content) = split_frontmatter(raw);
        assert!(yaml.is_none());
        assert_eq!(content, raw);
    }

    #[test]
    fn split_note_with_incomplete_frontmatter() {
        let raw = "---\nid: abc\nNo closing delimiter";
        let (yaml, content) = split_frontmatter(raw);
        assert!(yaml.is_none());
        assert_eq!(content, raw);
    }

    #[test]
    fn split_ignores_dashes_inside_lines() {
        let raw = "---\nid: a---b\n---\nbody";
        let (yaml, content) = split_frontmatter(raw);
        assert_eq!(yaml, Some("id: a---b\n"));
        assert_eq!(content, "body");
    }

    #[test]
    fn split_handles_crlf() {
        let raw = "---\r\nid: abc\r\n---\r\nbody";
        let (yaml, content) = split_frontmatter(raw);
        assert_eq!(yaml, Some("id: abc\r\n"));
        assert_eq!(content, "body");
    }

    #[test]
    fn parse_header_ignores_unknown_keys() {
        let raw = "---\nid: abc\nsubject: Hello\nattendees:\n  - a@example.com\n---\n\n# Hello\n";
        let (header, body): (Header, _) = parse_header(raw).unwrap();
        assert_eq!(header.id, "abc");
        assert_eq!(header.title, None);
        assert_eq!(body, "\n# Hello\n");
    }

    #[test]
    fn parse_header_missing_block() {
        let result: Result<(Header, &str)> = parse_header("# No header");
        assert!(matches!(result, Err(FrontmatterError::Missing)));
    }

    #[test]
    fn parse_header_invalid_yaml() {
        let result: Result<(Header, &str)> = parse_header("---\nid: [unclosed\n---\n");
        assert!(matches!(result, Err(FrontmatterError::Invalid(_))));
    }

    #[test]
    fn parse_header_requires_declared_fields() {
        let result: Result<(Header, &str)> = parse_header("---\ntitle: no id\n---\n");
        assert!(matches!(result, Err(FrontmatterError::Invalid(_))));
    }

    #[test]
    fn build_document_layout() {
        let header = Header {
            id: "abc".to_string(),
            title: None,
        };
        let doc = build_document(&header, "# Title\n\nBody\n").unwrap();
        assert_eq!(doc, "---\nid: abc\n---\n\n# Title\n\nBody\n");
    }

    #[test]
    fn build_then_parse() {
        let header = Header {
            id: "abc".to_string(),
            title: Some("Line: with colon".to_string()),
        };
        let doc = build_document(&header, "# T\n").unwrap();
        let (parsed, body): (Header, _) = parse_header(&doc).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(body, "\n# T\n");
    }
}
