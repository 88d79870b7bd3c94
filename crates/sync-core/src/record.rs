//! Remote record model
//!
//! A record is the unit the mirror converges on: one remote calendar event or
//! contact, identified by the opaque id the service assigned to it. Records are
//! plain values; everything they carry is overwritten on every observation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Kind of record mirrored into one directory per account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Calendar,
    Contacts,
}

/// How a category is fetched from the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Complete snapshot of a bounded time window; absence means deletion
    FullWindow,
    /// Incremental changes since a cursor; deletions arrive as tombstones
    Delta,
}

impl Category {
    /// Directory (and state file) name for this category
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Calendar => "calendar",
            Category::Contacts => "contacts",
        }
    }

    pub fn strategy(self) -> Strategy {
        match self {
            Category::Calendar => Strategy::FullWindow,
            Category::Contacts => Strategy::Delta,
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Strategy::FullWindow => "full-window",
            Strategy::Delta => "delta",
        })
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A record that can be mirrored.
pub trait SyncRecord: Clone + Send + Sync + 'static {
    /// Category directory this record type lives in
    const CATEGORY: Category;

    /// Stable remote id. Never reused for a different record.
    fn id(&self) -> &str;

    /// Human-readable title, used for the `# title` line and the slug
    fn title(&self) -> &str;
}

/// Calendar event as observed from the remote service.
///
/// Times are kept in UTC here; the codec renders them in the configured zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: String,
    pub subject: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub location: Option<String>,
    /// The owner's response (`accepted`, `tentativelyAccepted`, ...)
    pub response: Option<String>,
    pub online_meeting: bool,
    pub meeting_url: Option<String>,
    pub organizer: Option<String>,
    pub attendees: Vec<String>,
    pub categories: Vec<String>,
    pub sensitivity: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Markdown body (already converted from the remote format)
    pub body: String,
}

impl Event {
    /// Minimal event with every optional attribute absent
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            start,
            end,
            all_day: false,
            location: None,
            response: None,
            online_meeting: false,
            meeting_url: None,
            organizer: None,
            attendees: Vec::new(),
            categories: Vec::new(),
            sensitivity: None,
            last_modified: None,
            body: String::new(),
        }
    }
}

impl SyncRecord for Event {
    const CATEGORY: Category = Category::Calendar;

    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.subject
    }
}

/// Address-book contact as observed from the remote service
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Contact {
    pub id: String,
    pub display_name: String,
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub emails: Vec<String>,
    /// Business, home and mobile numbers, in that order
    pub phones: Vec<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            ..Default::default()
        }
    }
}

impl SyncRecord for Contact {
    const CATEGORY: Category = Category::Contacts;

    fn id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.display_name
    }
}
