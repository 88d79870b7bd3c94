//! File naming and frontmatter utilities for mirrored record files
//!
//! Handles slug derivation, collision suffixes, relative path validation,
//! and YAML frontmatter parsing. These are pure functions with no I/O -
//! actual filesystem operations live behind `sync_core::fs::FileSystem`.

mod frontmatter;

pub use frontmatter::{
    FrontmatterError, build_document, parse_header, split_frontmatter,
};

use thiserror::Error;

/// Extension of every record file
pub const MARKDOWN_EXT: &str = "md";

/// Default cap on slug length (in characters)
pub const MAX_SLUG_LEN: usize = 60;

/// Derive a filesystem-friendly slug from free text.
///
/// Lower-cases, replaces every run of non-alphanumeric characters with a
/// single `-`, trims dashes at both ends and caps the result at `max_len`
/// characters. Returns an empty string when nothing alphanumeric is left.
pub fn slugify(text: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    // Truncate on a char boundary, never ending on a dash
    let mut capped: String = slug.chars().take(max_len).collect();
    while capped.ends_with('-') {
        capped.pop();
    }
    capped
}

/// File name for the `n`-th candidate of a stem.
///
/// Candidate 1 is the bare name (`stem.md`), candidate 2 is `stem-2.md`, and so on.
pub fn suffixed_file_name(stem: &str, n: usize) -> String {
    if n <= 1 {
        format!("{}.{}", stem, MARKDOWN_EXT)
    } else {
        format!("{}-{}.{}", stem, n, MARKDOWN_EXT)
    }
}

/// Whether a directory entry name looks like a record file
pub fn is_record_file(name: &str) -> bool {
    !name.starts_with('.')
        && name
            .strip_suffix(MARKDOWN_EXT)
            .and_then(|rest| rest.strip_suffix('.'))
            .is_some_and(|stem| !stem.is_empty())
}

/// Validate that a relative path is safe to join onto a base directory.
///
/// Strips a single leading `/` and rejects traversal, empty segments and
/// null bytes. Returns the cleaned path.
pub fn validate_relative_path(path: &str) -> Result<String, PathError> {
    let clean_path = path.strip_prefix('/').unwrap_or(path);

    if clean_path.contains('\0') {
        return Err(PathError::NullByte);
    }
    if clean_path.starts_with('/') {
        return Err(PathError::AbsolutePath);
    }
    if clean_path.is_empty() {
        return Ok(String::new());
    }
    for segment in clean_path.split('/') {
        match segment {
            "" => return Err(PathError::EmptySegment),
            "." | ".." => return Err(PathError::DirectoryTraversal),
            _ => {}
        }
    }

    Ok(clean_path.to_string())
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathError {
    #[error("Path contains directory traversal")]
    DirectoryTraversal,

    #[error("Path is absolute")]
    AbsolutePath,

    #[error("Path contains an empty segment")]
    EmptySegment,

    #[error("Path contains a null byte")]
    NullByte,
}

#[cfg(test)]
mod tests {
    use super::*;

    // slugify tests
    #[test]
    fn slugify_lowercases_and_dashes() {
        assert_eq!(slugify("Weekly Team Sync", 60), "weekly-team-sync");
    }

    #[test]
    fn slugify_strips_punctuation_runs() {
        assert_eq!(slugify("  Q3 -- Planning!!! (draft) ", 60), "q3-planning-draft");
    }

    #[test]
    fn slugify_keeps_unicode_letters() {
        assert_eq!(slugify("Müller, Jörg", 60), "müller-jörg");
    }

    #[test]
    fn slugify_empty_when_no_alphanumerics() {
        assert_eq!(slugify("!!! ---", 60), "");
        assert_eq!(slugify("", 60), "");
    }

    #[test]
    fn slugify_caps_length_without_trailing_dash() {
        let slug = slugify("abcd efgh", 5);
        assert_eq!(slug, "abcd");
        assert_eq!(slugify(&"x".repeat(100), 60).chars().count(), 60);
    }

    #[test]
    fn slugify_is_deterministic() {
        let title = "Design Review: Sync Engine";
        assert_eq!(slugify(title, 60), slugify(title, 60));
        assert_ne!(slugify(title, 60), slugify("Design Review: Index", 60));
    }

    // suffixed_file_name tests
    #[test]
    fn suffixes_start_at_two() {
        assert_eq!(suffixed_file_name("standup", 1), "standup.md");
        assert_eq!(suffixed_file_name("standup", 2), "standup-2.md");
        assert_eq!(suffixed_file_name("standup", 10), "standup-10.md");
    }

    #[test]
    fn record_file_detection() {
        assert!(is_record_file("standup.md"));
        assert!(!is_record_file(".md"));
        assert!(!is_record_file("notes.txt"));
        assert!(!is_record_file("standup.md.3f2a.tmp"));
        assert!(!is_record_file(".hidden.md"));
        assert!(!is_record_file("standupmd"));
    }

    // validate_relative_path tests
    #[test]
    fn validate_rejects_directory_traversal() {
        assert_eq!(
            validate_relative_path("../secret"),
            Err(PathError::DirectoryTraversal)
        );
        assert_eq!(
            validate_relative_path("work/../../etc"),
            Err(PathError::DirectoryTraversal)
        );
    }

    #[test]
    fn validate_strips_leading_slash() {
        assert_eq!(
            validate_relative_path("/work/calendar"),
            Ok("work/calendar".to_string())
        );
    }

    #[test]
    fn validate_rejects_empty_segments_and_nulls() {
        assert_eq!(
            validate_relative_path("work//calendar"),
            Err(PathError::EmptySegment)
        );
        assert_eq!(validate_relative_path("foo\0.md"), Err(PathError::NullByte));
        assert_eq!(validate_relative_path("//etc"), Err(PathError::AbsolutePath));
    }

    #[test]
    fn validate_accepts_normal_path() {
        assert_eq!(
            validate_relative_path("work/contacts/jane-doe.md"),
            Ok("work/contacts/jane-doe.md".to_string())
        );
        assert_eq!(validate_relative_path(""), Ok(String::new()));
    }
}
