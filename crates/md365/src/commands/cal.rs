//! `md365 cal list`: agenda view over the local event files.

use super::{App, matches_query, searchable_text};
use anyhow::{Context, Result, bail};
use chrono::{Days, NaiveDate, Utc};
use chrono_tz::Tz;
use sync_core::fs::FileSystem;
use sync_core::{Event, EventHeader, Reconciler, SyncError};

const SUBJECT_WIDTH: usize = 30;
const DEFAULT_DAYS: u64 = 14;

/// Inclusive range of local start dates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// Missing bounds default to today and 14 days after today
    pub fn resolve(from: Option<NaiveDate>, to: Option<NaiveDate>, today: NaiveDate) -> Self {
        let default_to = today.checked_add_days(Days::new(DEFAULT_DAYS)).unwrap_or(today);
        Self {
            from: from.unwrap_or(today),
            to: to.unwrap_or(default_to),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && date <= self.to
    }
}

#[derive(Debug, Clone)]
pub struct ListedEvent {
    pub account: String,
    pub header: EventHeader,
}

/// Events of `accounts` starting within `range`, sorted by start time
pub async fn collect_events<F: FileSystem>(
    reconciler: &Reconciler<F>,
    accounts: &[String],
    range: DateRange,
    search: Option<&str>,
    tz: Tz,
) -> std::result::Result<Vec<ListedEvent>, SyncError> {
    let mut events = Vec::new();
    for account in accounts {
        for record in reconciler.list_local_records::<Event>(account).await? {
            let start_date = record.header.start.with_timezone(&tz).date_naive();
            if !range.contains(start_date) {
                continue;
            }
            if !matches_query(&searchable_text(&record.header, &record.body), search) {
                continue;
            }
            events.push(ListedEvent {
                account: account.clone(),
                header: record.header,
            });
        }
    }
    events.sort_by(|a, b| {
        a.header
            .start
            .cmp(&b.header.start)
            .then_with(|| a.account.cmp(&b.account))
    });
    Ok(events)
}

/// `2024-05-01 Wed 09:00-09:30 Weekly Sync                    [work] 📍 Room 4`
pub fn format_event(event: &ListedEvent, tz: Tz) -> String {
    let start = event.header.start.with_timezone(&tz);
    let end = event.header.end.with_timezone(&tz);
    let subject: String = event.header.subject.chars().take(SUBJECT_WIDTH).collect();

    let mut line = format!(
        "{} {}-{} {:<width$} [{}]",
        start.format("%Y-%m-%d %a"),
        start.format("%H:%M"),
        end.format("%H:%M"),
        subject,
        event.account,
        width = SUBJECT_WIDTH
    );
    if let Some(location) = event.header.location.as_deref().filter(|l| !l.is_empty()) {
        line.push_str(" 📍 ");
        line.push_str(location);
    }
    line
}

pub async fn list(
    app: &App,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    search: Option<&str>,
    account: Option<&str>,
) -> Result<Vec<String>> {
    let tz = app.config.time_zone;
    let today = Utc::now().with_timezone(&tz).date_naive();
    let range = DateRange::resolve(from, to, today);
    if range.from > range.to {
        bail!("--from {} is after --to {}", range.from, range.to);
    }

    let accounts = app.config.select_accounts(account)?;
    let events = collect_events(&app.reconciler, &accounts, range, search, tz)
        .await
        .context("Failed to read local calendar")?;

    Ok(events.iter().map(|e| format_event(e, tz)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use std::sync::Arc;
    use sync_core::{CodecOptions, InMemoryFs, MemorySource, RecordCodec, TimeWindow};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn seeded() -> Reconciler<InMemoryFs> {
        let reconciler = Reconciler::new(
            Arc::new(InMemoryFs::new()),
            CodecOptions {
                time_zone: chrono_tz::Europe::Berlin,
            },
        );
        let window = TimeWindow::new(at(2024, 1, 1, 0, 0), at(2025, 1, 1, 0, 0));

        let mut sync = Event::new("w1", "Weekly Sync", at(2024, 5, 1, 7, 0), at(2024, 5, 1, 7, 30));
        sync.location = Some("Room 4".to_string());
        let mut review = Event::new("w2", "Design Review", at(2024, 5, 3, 12, 0), at(2024, 5, 3, 13, 0));
        review.body = "Bring the ferris mockups".to_string();
        let later = Event::new("w3", "Quarterly Planning", at(2024, 6, 20, 8, 0), at(2024, 6, 20, 9, 0));
        let work = MemorySource::with_records([review, sync, later]);
        reconciler
            .run_full_window_sync(&work, "work", &window)
            .await
            .unwrap();

        let dentist = Event::new("h1", "Dentist", at(2024, 5, 1, 6, 0), at(2024, 5, 1, 6, 45));
        let home = MemorySource::with_records([dentist]);
        reconciler
            .run_full_window_sync(&home, "home", &window)
            .await
            .unwrap();

        reconciler
    }

    #[test]
    fn test_date_range_defaults() {
        let range = DateRange::resolve(None, None, date(2024, 5, 1));
        assert_eq!(range.from, date(2024, 5, 1));
        assert_eq!(range.to, date(2024, 5, 15));
        assert!(range.contains(date(2024, 5, 15)));
        assert!(!range.contains(date(2024, 5, 16)));

        let range = DateRange::resolve(Some(date(2024, 6, 1)), None, date(2024, 5, 1));
        assert_eq!(range.from, date(2024, 6, 1));
        assert_eq!(range.to, date(2024, 5, 15));
    }

    #[tokio::test]
    async fn test_lists_across_accounts_sorted_by_start() {
        let reconciler = seeded().await;
        let tz = chrono_tz::Europe::Berlin;
        let accounts = vec!["home".to_string(), "work".to_string()];
        let range = DateRange::resolve(Some(date(2024, 5, 1)), Some(date(2024, 5, 31)), date(2024, 5, 1));

        let events = collect_events(&reconciler, &accounts, range, None, tz).await.unwrap();
        let lines: Vec<String> = events.iter().map(|e| format_event(e, tz)).collect();

        assert_eq!(
            lines,
            vec![
                "2024-05-01 Wed 08:00-08:45 Dentist                        [home]".to_string(),
                "2024-05-01 Wed 09:00-09:30 Weekly Sync                    [work] 📍 Room 4"
                    .to_string(),
                "2024-05-03 Fri 14:00-15:00 Design Review                  [work]".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_search_covers_body_and_header() {
        let reconciler = seeded().await;
        let tz = chrono_tz::Europe::Berlin;
        let accounts = vec!["home".to_string(), "work".to_string()];
        let range = DateRange::resolve(Some(date(2024, 1, 1)), Some(date(2024, 12, 31)), date(2024, 5, 1));

        let by_body = collect_events(&reconciler, &accounts, range, Some("FERRIS"), tz)
            .await
            .unwrap();
        assert_eq!(by_body.len(), 1);
        assert_eq!(by_body[0].header.id, "w2");

        let by_location = collect_events(&reconciler, &accounts, range, Some("room 4"), tz)
            .await
            .unwrap();
        assert_eq!(by_location.len(), 1);
        assert_eq!(by_location[0].header.id, "w1");
    }

    #[test]
    fn test_long_subject_is_truncated() {
        let tz = chrono_tz::UTC;
        let event = Event::new(
            "x",
            "An extremely long meeting subject that keeps going",
            at(2024, 5, 1, 9, 0),
            at(2024, 5, 1, 10, 0),
        );
        let header = event.header("work", &CodecOptions::default());
        let line = format_event(
            &ListedEvent {
                account: "work".to_string(),
                header,
            },
            tz,
        );
        assert_eq!(
            line,
            "2024-05-01 Wed 09:00-10:00 An extremely long meeting subj [work]"
        );
    }
}
