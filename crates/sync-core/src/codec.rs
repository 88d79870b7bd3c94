//! Record <-> file encoding
//!
//! A record file is a YAML header followed by a `# title` line and the body:
//! ```markdown
//! ---
//! id: AAMkAGI2
//! account: work
//! subject: Weekly sync
//! start: 2026-10-14T09:00:00+02:00
//! ...
//! ---
//!
//! # Weekly sync
//!
//! Agenda...
//! ```
//!
//! Encoding is a pure function of the record, the account and the codec options.
//! It never reads the previous content of the file it replaces.

use crate::record::{Contact, Event, SyncRecord};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use record_fs::{FrontmatterError, MAX_SLUG_LEN, build_document, parse_header, slugify};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Frontmatter(#[from] FrontmatterError),

    #[error("File is not valid UTF-8")]
    NotUtf8,

    #[error("Header has an empty id")]
    MissingId,
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Rendering options shared by every record of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// Zone that header timestamps and file-name dates are rendered in
    pub time_zone: Tz,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self { time_zone: Tz::UTC }
    }
}

/// A record type that knows how to lay itself out as a file.
pub trait RecordCodec: SyncRecord {
    /// Serialized header. Field order is the on-disk key order.
    type Header: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static;

    fn header(&self, account: &str, opts: &CodecOptions) -> Self::Header;

    /// File name without extension or collision suffix, derived from the natural key
    fn file_stem(&self, opts: &CodecOptions) -> String;

    /// Markdown below the title line (may be empty)
    fn body(&self) -> String;
}

/// The part of every header the identity scan needs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityHeader {
    pub id: String,
    pub account: String,
}

/// Encode a record as a complete file
pub fn encode<R: RecordCodec>(record: &R, account: &str, opts: &CodecOptions) -> Result<String> {
    let header = record.header(account, opts);
    let body = record.body();
    let content = if body.trim().is_empty() {
        format!("# {}\n", record.title())
    } else {
        format!("# {}\n\n{}\n", record.title(), body.trim_end())
    };
    Ok(build_document(&header, &content)?)
}

/// Decode just enough of a file to recover its identity
pub fn decode_identity(raw: &[u8]) -> Result<IdentityHeader> {
    let text = std::str::from_utf8(raw).map_err(|_| CodecError::NotUtf8)?;
    let (identity, _): (IdentityHeader, _) = parse_header(text)?;
    if identity.id.trim().is_empty() {
        return Err(CodecError::MissingId);
    }
    Ok(identity)
}

/// Decode a full header and return it with the content below it
pub fn decode_header<H: DeserializeOwned>(raw: &[u8]) -> Result<(H, String)> {
    let text = std::str::from_utf8(raw).map_err(|_| CodecError::NotUtf8)?;
    let (header, body) = parse_header(text)?;
    let body = body.strip_prefix('\n').unwrap_or(body);
    Ok((header, body.to_string()))
}

fn slug_or(title: &str, fallback: &str) -> String {
    let slug = slugify(title, MAX_SLUG_LEN);
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

fn in_zone(t: DateTime<Utc>, tz: Tz) -> DateTime<FixedOffset> {
    t.with_timezone(&tz).fixed_offset()
}

/// All-day boundaries arrive as midnight UTC; they mean midnight in the local zone.
fn all_day_in_zone(t: DateTime<Utc>, tz: Tz) -> DateTime<FixedOffset> {
    match tz.from_local_datetime(&t.naive_utc()).earliest() {
        Some(local) => local.fixed_offset(),
        None => t.fixed_offset(),
    }
}

// ==================== Events ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    pub id: String,
    pub account: String,
    pub subject: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub all_day: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default)]
    pub online_meeting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<FixedOffset>>,
}

impl Event {
    fn local_bounds(&self, tz: Tz) -> (DateTime<FixedOffset>, DateTime<FixedOffset>) {
        if self.all_day {
            (all_day_in_zone(self.start, tz), all_day_in_zone(self.end, tz))
        } else {
            (in_zone(self.start, tz), in_zone(self.end, tz))
        }
    }
}

impl RecordCodec for Event {
    type Header = EventHeader;

    fn header(&self, account: &str, opts: &CodecOptions) -> EventHeader {
        let (start, end) = self.local_bounds(opts.time_zone);
        EventHeader {
            id: self.id.clone(),
            account: account.to_string(),
            subject: self.subject.clone(),
            start,
            end,
            all_day: self.all_day,
            location: self.location.clone(),
            response: self.response.clone(),
            online_meeting: self.online_meeting,
            meeting_url: self.meeting_url.clone(),
            organizer: self.organizer.clone(),
            attendees: self.attendees.clone(),
            categories: self.categories.clone(),
            sensitivity: self.sensitivity.clone(),
            last_modified: self.last_modified.map(|t| in_zone(t, opts.time_zone)),
        }
    }

    fn file_stem(&self, opts: &CodecOptions) -> String {
        let (start, _) = self.local_bounds(opts.time_zone);
        format!(
            "{}-{}",
            start.format("%Y-%m-%d"),
            slug_or(&self.subject, "untitled")
        )
    }

    fn body(&self) -> String {
        self.body.clone()
    }
}

// ==================== Contacts ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactHeader {
    pub id: String,
    pub account: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phones: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birthday: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<FixedOffset>>,
}

impl RecordCodec for Contact {
    type Header = ContactHeader;

    fn header(&self, account: &str, opts: &CodecOptions) -> ContactHeader {
        ContactHeader {
            id: self.id.clone(),
            account: account.to_string(),
            display_name: self.display_name.clone(),
            given_name: self.given_name.clone(),
            surname: self.surname.clone(),
            emails: self.emails.clone(),
            phones: self.phones.clone(),
            company: self.company.clone(),
            job_title: self.job_title.clone(),
            birthday: self.birthday,
            last_modified: self.last_modified.map(|t| in_zone(t, opts.time_zone)),
        }
    }

    fn file_stem(&self, _opts: &CodecOptions) -> String {
        slug_or(&self.display_name, "unnamed")
    }

    /// One line per contact channel: emails, then each phone, then employer
    fn body(&self) -> String {
        let mut lines = Vec::new();
        if !self.emails.is_empty() {
            lines.push(format!("📧 {}", self.emails.join(", ")));
        }
        for phone in &self.phones {
            lines.push(format!("📱 {}", phone));
        }
        let employer: Vec<&str> = [self.company.as_deref(), self.job_title.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect();
        if !employer.is_empty() {
            lines.push(format!("🏢 {}", employer.join(", ")));
        }
        lines.join("\n")
    }
}
