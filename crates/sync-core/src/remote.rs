//! Remote source abstractions.
//!
//! A source offers the two read shapes the engine understands:
//! - `WindowSource` - one complete snapshot of a bounded time window
//! - `DeltaSource` - changes since a cursor, with tombstones for deletions
//!
//! Implementations drain every page before returning. A failure on any page
//! fails the whole call: there is no partial batch and no cursor.

use crate::record::SyncRecord;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The delta cursor is no longer accepted; enumerate again without one
    #[error("Delta cursor expired")]
    CursorExpired,

    #[error("Authentication failed: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Half-open time range `[start, end)` for full-window queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `past_days` before `now` up to `future_days` after it
    pub fn around(now: DateTime<Utc>, past_days: u32, future_days: u32) -> Self {
        Self {
            start: now - Duration::days(i64::from(past_days)),
            end: now + Duration::days(i64::from(future_days)),
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }
}

/// Result of one delta call
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaBatch<R> {
    /// Created or changed records, in discovery order, at most one per id
    pub records: Vec<R>,
    /// Ids deleted since the prior cursor
    pub tombstones: Vec<String>,
    /// Cursor to resume from once this batch is fully applied
    pub next_cursor: String,
}

impl<R: SyncRecord> DeltaBatch<R> {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            tombstones: Vec::new(),
            next_cursor: String::new(),
        }
    }

    /// Add a changed record. A later observation of the same id replaces the
    /// earlier one (and cancels an earlier tombstone).
    pub fn upsert(&mut self, record: R) {
        self.tombstones.retain(|id| id != record.id());
        self.records.retain(|r| r.id() != record.id());
        self.records.push(record);
    }

    /// Add a tombstone. Cancels an earlier observation of the same id.
    pub fn remove(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.records.retain(|r| r.id() != id);
        if !self.tombstones.contains(&id) {
            self.tombstones.push(id);
        }
    }
}

impl<R: SyncRecord> Default for DeltaBatch<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded full-window query
#[async_trait]
pub trait WindowSource<R: Send + 'static>: Send + Sync {
    async fn full_window(&self, window: &TimeWindow) -> Result<Vec<R>>;
}

/// Incremental query. `None` enumerates everything and seeds a cursor.
#[async_trait]
pub trait DeltaSource<R: Send + 'static>: Send + Sync {
    async fn delta(&self, cursor: Option<&str>) -> Result<DeltaBatch<R>>;
}

#[async_trait]
impl<R: Send + 'static, T: WindowSource<R> + ?Sized> WindowSource<R> for std::sync::Arc<T> {
    async fn full_window(&self, window: &TimeWindow) -> Result<Vec<R>> {
        (**self).full_window(window).await
    }
}

#[async_trait]
impl<R: Send + 'static, T: DeltaSource<R> + ?Sized> DeltaSource<R> for std::sync::Arc<T> {
    async fn delta(&self, cursor: Option<&str>) -> Result<DeltaBatch<R>> {
        (**self).delta(cursor).await
    }
}

enum Change<R> {
    Upsert(R),
    Remove(String),
}

/// In-memory remote for testing.
///
/// Keeps the current record set in insertion order plus a change log. Delta
/// cursors are `<epoch>:<log position>`; `full_window` returns every current
/// record regardless of the window.
pub struct MemorySource<R> {
    records: Mutex<Vec<R>>,
    log: Mutex<Vec<Change<R>>>,
    /// Cursors from an older epoch are rejected as expired
    epoch: AtomicUsize,
    failures: AtomicUsize,
    calls: AtomicUsize,
}

impl<R: SyncRecord> MemorySource<R> {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            epoch: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        let source = Self::new();
        for record in records {
            source.upsert(record);
        }
        source
    }

    /// Create or replace a record
    pub fn upsert(&self, record: R) {
        let mut log = self.log.lock().unwrap();
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        log.push(Change::Upsert(record));
    }

    /// Delete a record
    pub fn remove(&self, id: &str) {
        let mut log = self.log.lock().unwrap();
        self.records.lock().unwrap().retain(|r| r.id() != id);
        log.push(Change::Remove(id.to_string()));
    }

    /// Fail the next `n` calls with an HTTP 503
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Reject every cursor handed out so far
    pub fn expire_cursors(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of calls made, failed ones included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn parse_cursor(&self, cursor: &str) -> Option<usize> {
        let (epoch, position) = cursor.split_once(':')?;
        if epoch.parse::<usize>().ok()? != self.epoch.load(Ordering::SeqCst) {
            return None;
        }
        position.parse().ok()
    }

    fn begin_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(RemoteError::Http {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl<R: SyncRecord> Default for MemorySource<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: SyncRecord> WindowSource<R> for MemorySource<R> {
    async fn full_window(&self, _window: &TimeWindow) -> Result<Vec<R>> {
        self.begin_call()?;
        Ok(self.records.lock().unwrap().clone())
    }
}

#[async_trait]
impl<R: SyncRecord> DeltaSource<R> for MemorySource<R> {
    async fn delta(&self, cursor: Option<&str>) -> Result<DeltaBatch<R>> {
        self.begin_call()?;
        let log = self.log.lock().unwrap();
        let mut batch = DeltaBatch::new();

        match cursor {
            None => {
                for record in self.records.lock().unwrap().iter() {
                    batch.upsert(record.clone());
                }
            }
            Some(cursor) => {
                let position = self
                    .parse_cursor(cursor)
                    .filter(|position| *position <= log.len())
                    .ok_or(RemoteError::CursorExpired)?;
                for change in &log[position..] {
                    match change {
                        Change::Upsert(record) => batch.upsert(record.clone()),
                        Change::Remove(id) => batch.remove(id.clone()),
                    }
                }
            }
        }

        batch.next_cursor = format!("{}:{}", self.epoch.load(Ordering::SeqCst), log.len());
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Contact;

    #[test]
    fn test_time_window_around() {
        let now = DateTime::parse_from_rfc3339("2026-10-14T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let window = TimeWindow::around(now, 30, 90);

        assert_eq!(window.start, now - Duration::days(30));
        assert_eq!(window.end, now + Duration::days(90));
        assert!(window.contains(now));
        assert!(!window.contains(window.end));
    }

    #[test]
    fn test_delta_batch_last_observation_wins() {
        let mut batch = DeltaBatch::new();
        batch.upsert(Contact::new("c1", "Old"));
        batch.upsert(Contact::new("c2", "Two"));
        batch.upsert(Contact::new("c1", "New"));
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[1].display_name, "New");

        batch.remove("c2");
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.tombstones, vec!["c2".to_string()]);

        batch.upsert(Contact::new("c2", "Back"));
        assert!(batch.tombstones.is_empty());
    }

    #[tokio::test]
    async fn test_memory_source_delta_since_cursor() {
        let source = MemorySource::with_records([Contact::new("c1", "One")]);

        let first = source.delta(None).await.unwrap();
        assert_eq!(first.records.len(), 1);
        assert!(first.tombstones.is_empty());

        source.upsert(Contact::new("c2", "Two"));
        source.remove("c1");

        let second = source.delta(Some(&first.next_cursor)).await.unwrap();
        assert_eq!(second.records, vec![Contact::new("c2", "Two")]);
        assert_eq!(second.tombstones, vec!["c1".to_string()]);

        let third = source.delta(Some(&second.next_cursor)).await.unwrap();
        assert!(third.records.is_empty());
        assert!(third.tombstones.is_empty());
    }

    #[tokio::test]
    async fn test_memory_source_failures_and_expiry() {
        let source = MemorySource::with_records([Contact::new("c1", "One")]);
        source.fail_next(1);

        assert!(matches!(
            source.full_window(&TimeWindow::new(Utc::now(), Utc::now())).await,
            Err(RemoteError::Http { status: 503, .. })
        ));
        let batch = source.delta(None).await.unwrap();
        assert_eq!(source.calls(), 2);

        source.expire_cursors();
        assert!(matches!(
            source.delta(Some(&batch.next_cursor)).await,
            Err(RemoteError::CursorExpired)
        ));
        // A fresh enumeration hands out a cursor that works again
        let fresh = source.delta(None).await.unwrap();
        assert!(source.delta(Some(&fresh.next_cursor)).await.is_ok());
        assert!(matches!(
            source.delta(Some("garbage")).await,
            Err(RemoteError::CursorExpired)
        ));
    }
}
