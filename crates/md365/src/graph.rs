//! Microsoft Graph client for calendar views and contact deltas.
//!
//! Every request asks Graph to report times in UTC, so event times arrive as
//! naive timestamps that are read as UTC. Paged responses are followed until
//! exhausted; a failure on any page fails the whole call.

use crate::html::body_to_markdown;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use sync_core::{Contact, DeltaBatch, DeltaSource, Event, RemoteError, TimeWindow, WindowSource};
use tracing::debug;

pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

const PREFER: &str = r#"outlook.timezone="UTC", odata.maxpagesize=100"#;
const PAGE_SIZE: &str = "100";

type Result<T> = std::result::Result<T, RemoteError>;

/// Graph API client bound to one account's bearer token
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl GraphClient {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: GRAPH_BASE_URL.to_string(),
            token: token.into(),
        })
    }

    /// Point the client at a different API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_page<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<Page<T>> {
        let response = request
            .bearer_auth(&self.token)
            .header("Prefer", PREFER)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(http_error(status.as_u16(), &body));
        }
        parse_page(&body)
    }
}

#[async_trait]
impl WindowSource<Event> for GraphClient {
    async fn full_window(&self, window: &TimeWindow) -> Result<Vec<Event>> {
        let start = window.start.format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let end = window.end.format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let mut request = self
            .http
            .get(format!("{}/me/calendarview", self.base_url))
            .query(&[
                ("startDateTime", start.as_str()),
                ("endDateTime", end.as_str()),
                ("$top", PAGE_SIZE),
            ]);

        let mut events: Vec<Event> = Vec::new();
        let mut pages = 0;
        loop {
            let page: Page<GraphEvent> = self.get_page(request).await?;
            pages += 1;
            for raw in page.value {
                let event = raw.into_event()?;
                events.retain(|e| e.id != event.id);
                events.push(event);
            }
            match page.next_link {
                Some(next) => request = self.http.get(next),
                None => break,
            }
        }

        debug!("Fetched {} events in {} page(s)", events.len(), pages);
        Ok(events)
    }
}

#[async_trait]
impl DeltaSource<Contact> for GraphClient {
    /// The cursor is the opaque delta link Graph handed out last time
    async fn delta(&self, cursor: Option<&str>) -> Result<DeltaBatch<Contact>> {
        let mut request = match cursor {
            Some(link) => self.http.get(link),
            None => self.http.get(format!("{}/me/contacts/delta", self.base_url)),
        };

        let mut batch = DeltaBatch::new();
        let mut pages = 0;
        loop {
            let page: Page<GraphContact> = self.get_page(request).await?;
            pages += 1;
            apply_contact_page(&mut batch, page.value)?;

            if let Some(delta_link) = page.delta_link {
                batch.next_cursor = delta_link;
                break;
            }
            match page.next_link {
                Some(next) => request = self.http.get(next),
                None => {
                    return Err(RemoteError::InvalidResponse(
                        "delta response ended without a delta link".to_string(),
                    ));
                }
            }
        }

        debug!(
            "Contact delta: {} changed, {} removed in {} page(s)",
            batch.records.len(),
            batch.tombstones.len(),
            pages
        );
        Ok(batch)
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
struct Page<T> {
    #[serde(default)]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

fn parse_page<T: DeserializeOwned>(body: &str) -> Result<Page<T>> {
    serde_json::from_str(body).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Map a non-success response to the error the engine understands
fn http_error(status: u16, body: &str) -> RemoteError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_default();

    let code = detail.code.to_ascii_lowercase();
    if status == 410 || code == "syncstatenotfound" || code == "resyncrequired" {
        return RemoteError::CursorExpired;
    }

    let message = if detail.message.is_empty() {
        format!("HTTP {}", status)
    } else {
        detail.message
    };
    match status {
        401 | 403 => RemoteError::Auth(message),
        _ => RemoteError::Http { status, message },
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GraphEvent {
    id: String,
    subject: Option<String>,
    start: Option<GraphDateTime>,
    end: Option<GraphDateTime>,
    is_all_day: bool,
    location: Option<GraphLocation>,
    organizer: Option<Recipient>,
    attendees: Vec<Recipient>,
    response_status: Option<GraphResponse>,
    is_online_meeting: bool,
    online_meeting: Option<OnlineMeeting>,
    categories: Vec<String>,
    sensitivity: Option<String>,
    last_modified_date_time: Option<String>,
    body: Option<GraphBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GraphDateTime {
    date_time: String,
    time_zone: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GraphLocation {
    display_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Recipient {
    email_address: EmailAddress,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EmailAddress {
    name: String,
    address: String,
}

impl EmailAddress {
    /// `Name <address>`, or just the address when the name adds nothing
    fn format(&self) -> String {
        if !self.name.is_empty() && self.name != self.address {
            if self.address.is_empty() {
                self.name.clone()
            } else {
                format!("{} <{}>", self.name, self.address)
            }
        } else {
            self.address.clone()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GraphResponse {
    response: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct OnlineMeeting {
    join_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GraphBody {
    content_type: String,
    content: String,
}

impl GraphEvent {
    fn into_event(self) -> Result<Event> {
        if self.id.is_empty() {
            return Err(RemoteError::InvalidResponse("event without id".to_string()));
        }
        let start = parse_event_time(self.start.as_ref(), "start")?;
        let end = parse_event_time(self.end.as_ref(), "end")?;

        let mut event = Event::new(self.id, self.subject.unwrap_or_default(), start, end);
        event.all_day = self.is_all_day;
        event.location = self
            .location
            .map(|l| l.display_name)
            .filter(|name| !name.trim().is_empty());
        event.response = self
            .response_status
            .map(|r| r.response)
            .filter(|r| !r.is_empty());
        event.online_meeting = self.is_online_meeting;
        event.meeting_url = self
            .online_meeting
            .map(|m| m.join_url)
            .filter(|url| !url.is_empty());
        event.organizer = self
            .organizer
            .map(|o| o.email_address.format())
            .filter(|o| !o.is_empty());
        event.attendees = self
            .attendees
            .iter()
            .map(|a| a.email_address.format())
            .filter(|a| !a.is_empty())
            .collect();
        event.categories = self.categories;
        event.sensitivity = self.sensitivity.filter(|s| !s.is_empty());
        event.last_modified = self.last_modified_date_time.as_deref().and_then(parse_timestamp);
        event.body = self
            .body
            .map(|b| body_to_markdown(&b.content_type, &b.content))
            .unwrap_or_default();
        Ok(event)
    }
}

fn parse_event_time(value: Option<&GraphDateTime>, field: &str) -> Result<DateTime<Utc>> {
    let value = value
        .ok_or_else(|| RemoteError::InvalidResponse(format!("event without {}", field)))?;
    parse_graph_datetime(value).ok_or_else(|| {
        RemoteError::InvalidResponse(format!(
            "unreadable {} time '{}' ({})",
            field, value.date_time, value.time_zone
        ))
    })
}

/// Graph reports `{dateTime, timeZone}` with a naive timestamp
fn parse_graph_datetime(value: &GraphDateTime) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&value.date_time) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(&value.date_time, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    match value.time_zone.as_str() {
        "" | "UTC" | "Etc/UTC" => Some(Utc.from_utc_datetime(&naive)),
        name => {
            let tz: Tz = name.parse().ok()?;
            tz.from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
        }
    }
}

/// Full timestamps such as `lastModifiedDateTime`
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct GraphContact {
    id: String,
    display_name: Option<String>,
    given_name: Option<String>,
    surname: Option<String>,
    email_addresses: Vec<EmailAddress>,
    business_phones: Vec<String>,
    home_phones: Vec<String>,
    mobile_phone: Option<String>,
    company_name: Option<String>,
    job_title: Option<String>,
    birthday: Option<String>,
    last_modified_date_time: Option<String>,
    #[serde(rename = "@removed")]
    removed: Option<Removed>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Removed {
    #[allow(dead_code)]
    reason: String,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl GraphContact {
    fn into_contact(self) -> Contact {
        let given_name = non_empty(self.given_name);
        let surname = non_empty(self.surname);
        let display_name = non_empty(self.display_name).unwrap_or_else(|| {
            [given_name.as_deref(), surname.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
        });

        let mut contact = Contact::new(self.id, display_name);
        contact.given_name = given_name;
        contact.surname = surname;
        contact.emails = self
            .email_addresses
            .into_iter()
            .map(|e| e.address)
            .filter(|a| !a.is_empty())
            .collect();
        contact.phones = self
            .business_phones
            .into_iter()
            .chain(self.home_phones)
            .chain(self.mobile_phone)
            .filter(|p| !p.trim().is_empty())
            .collect();
        contact.company = non_empty(self.company_name);
        contact.job_title = non_empty(self.job_title);
        contact.birthday = self
            .birthday
            .as_deref()
            .and_then(|b| b.get(..10))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        contact.last_modified = self.last_modified_date_time.as_deref().and_then(parse_timestamp);
        contact
    }
}

fn apply_contact_page(batch: &mut DeltaBatch<Contact>, contacts: Vec<GraphContact>) -> Result<()> {
    for raw in contacts {
        if raw.id.is_empty() {
            return Err(RemoteError::InvalidResponse("contact without id".to_string()));
        }
        if raw.removed.is_some() {
            batch.remove(raw.id);
        } else {
            batch.upsert(raw.into_contact());
        }
    }
    Ok(())
}
