//! Reconciliation engine: converges one account/category directory onto a
//! batch of remote records.
//!
//! A pass runs in five steps:
//! 1. Scan the directory into an [`IdentityIndex`]
//! 2. Fetch from the remote (any failure ends the pass, nothing is touched)
//! 3. Apply tombstones (delta) or sweep unseen ids (full window), releasing
//!    their names
//! 4. Plan a name for every record in batch order, move files to their
//!    planned names, then create or rewrite each file
//! 5. Commit sync state
//!
//! Failures of single records are collected as [`Warning`]s. They never stop
//! the pass and never prevent the commit.

use crate::codec::{CodecOptions, RecordCodec, decode_header, decode_identity, encode};
use crate::fs::{FileSystem, FsError};
use crate::index::IdentityIndex;
use crate::record::Category;
use crate::remote::{DeltaSource, RemoteError, TimeWindow, WindowSource};
use crate::state::{SyncState, SyncStateStore};
use chrono::Utc;
use futures::lock::Mutex as AsyncMutex;
use record_fs::{is_record_file, suffixed_file_name, validate_relative_path};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Remote fetch failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Failed to scan {dir}: {source}")]
    Index {
        dir: String,
        #[source]
        source: FsError,
    },

    #[error("Invalid account name '{0}'")]
    InvalidAccount(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Non-fatal problem encountered during a pass
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    #[error("Failed to write record {id} to {path}: {reason}")]
    RecordWrite {
        id: String,
        path: String,
        reason: String,
    },

    #[error("Failed to delete {path} (record {id}): {reason}")]
    Delete {
        id: String,
        path: String,
        reason: String,
    },

    #[error("Skipped unidentifiable file {path}: {reason}")]
    Unidentified { path: String, reason: String },

    #[error("Failed to persist sync state: {reason}")]
    StatePersist { reason: String },
}

/// A file moved to follow its record's natural key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMove {
    pub from: String,
    pub to: String,
}

/// Outcome of one pass. Paths are relative to the data directory.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Files written for ids seen for the first time
    pub created: Vec<String>,
    /// Files rewritten in place
    pub updated: Vec<String>,
    /// Files moved because the record's natural key changed
    pub renamed: Vec<FileMove>,
    /// Files removed (tombstones, sweep, duplicate ids)
    pub deleted: Vec<String>,
    pub warnings: Vec<Warning>,
    /// Whether the sync state was persisted at the end of the pass
    pub state_committed: bool,
}

impl SyncReport {
    /// Check if any files were changed
    pub fn has_changes(&self) -> bool {
        !self.created.is_empty()
            || !self.updated.is_empty()
            || !self.renamed.is_empty()
            || !self.deleted.is_empty()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

/// A decoded local file, as returned by [`Reconciler::list_local_records`]
#[derive(Debug, Clone)]
pub struct LocalRecord<H> {
    pub file_name: String,
    /// Path relative to the data directory
    pub path: String,
    pub header: H,
    /// Content below the header (title line and body)
    pub body: String,
}

/// Per-directory pass locks
#[derive(Default)]
struct PassLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PassLocks {
    fn get(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }
}

/// Runs sync passes against one data directory.
///
/// At most one pass per account/category directory runs at a time; passes
/// for different directories do not wait for each other.
pub struct Reconciler<F> {
    fs: Arc<F>,
    state: SyncStateStore<Arc<F>>,
    codec: CodecOptions,
    locks: PassLocks,
}

impl<F: FileSystem> Reconciler<F> {
    pub fn new(fs: Arc<F>, codec: CodecOptions) -> Self {
        Self {
            state: SyncStateStore::new(fs.clone()),
            fs,
            codec,
            locks: PassLocks::default(),
        }
    }

    pub fn state_store(&self) -> &SyncStateStore<Arc<F>> {
        &self.state
    }

    /// Directory of an account's category, relative to the data directory
    pub fn category_dir(account: &str, category: Category) -> String {
        format!("{}/{}", account, category.dir_name())
    }

    /// Full-window pass: write every record of the snapshot, delete every
    /// indexed file whose id is absent from it.
    pub async fn run_full_window_sync<R, S>(
        &self,
        source: &S,
        account: &str,
        window: &TimeWindow,
    ) -> Result<SyncReport>
    where
        R: RecordCodec,
        S: WindowSource<R> + ?Sized,
    {
        validate_account(account)?;
        let dir = Self::category_dir(account, R::CATEGORY);
        let lock = self.locks.get(&dir);
        let _guard = lock.lock().await;

        info!(
            "Starting {} sync of {} ({} to {})",
            R::CATEGORY.strategy(),
            dir,
            window.start,
            window.end
        );

        let index = self.scan(&dir, account).await?;
        let state_warning = self.check_state(account, R::CATEGORY, &dir).await;
        let records = source.full_window(window).await?;
        debug!("Fetched {} records for {}", records.len(), dir);

        let mut pass = Pass::new(self.fs.as_ref(), &dir, account, &self.codec, index);
        pass.report.warnings.extend(state_warning);
        let seen: HashSet<&str> = records.iter().map(|r| r.id()).collect();
        pass.sweep(&seen).await;
        pass.apply_all(&records).await;

        let mut report = pass.finish();
        match self
            .state
            .commit_full_window(account, R::CATEGORY, Utc::now())
            .await
        {
            Ok(_) => report.state_committed = true,
            Err(e) => {
                warn!("Failed to persist sync state for {}: {}", dir, e);
                report.warnings.push(Warning::StatePersist {
                    reason: e.to_string(),
                });
            }
        }

        log_summary(&dir, &report);
        Ok(report)
    }

    /// Delta pass: apply changes since the stored cursor, delete tombstoned
    /// ids, and advance the cursor. Never sweeps.
    pub async fn run_delta_sync<R, S>(&self, source: &S, account: &str) -> Result<SyncReport>
    where
        R: RecordCodec,
        S: DeltaSource<R> + ?Sized,
    {
        validate_account(account)?;
        let dir = Self::category_dir(account, R::CATEGORY);
        let lock = self.locks.get(&dir);
        let _guard = lock.lock().await;

        let index = self.scan(&dir, account).await?;

        let mut state_warning = None;
        let state = match self.state.load(account, R::CATEGORY).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Ignoring unreadable sync state for {}: {}", dir, e);
                state_warning = Some(Warning::StatePersist {
                    reason: e.to_string(),
                });
                SyncState::default()
            }
        };

        info!(
            "Starting {} sync of {} ({})",
            R::CATEGORY.strategy(),
            dir,
            if state.delta_cursor.is_some() {
                "incremental"
            } else {
                "full enumeration"
            }
        );

        let batch = source.delta(state.delta_cursor.as_deref()).await?;
        debug!(
            "Fetched {} changes and {} tombstones for {}",
            batch.records.len(),
            batch.tombstones.len(),
            dir
        );

        let mut pass = Pass::new(self.fs.as_ref(), &dir, account, &self.codec, index);
        pass.report.warnings.extend(state_warning);
        for id in &batch.tombstones {
            pass.tombstone(id).await;
        }
        pass.apply_all(&batch.records).await;

        let mut report = pass.finish();
        match self
            .state
            .commit_delta(account, R::CATEGORY, batch.next_cursor, Utc::now())
            .await
        {
            Ok(_) => report.state_committed = true,
            Err(e) => {
                warn!("Failed to persist sync state for {}: {}", dir, e);
                report.warnings.push(Warning::StatePersist {
                    reason: e.to_string(),
                });
            }
        }

        log_summary(&dir, &report);
        Ok(report)
    }

    /// Decode every record file of an account's category, in file-name order.
    ///
    /// Files that do not decode or belong to another account are skipped.
    pub async fn list_local_records<R: RecordCodec>(
        &self,
        account: &str,
    ) -> Result<Vec<LocalRecord<R::Header>>> {
        validate_account(account)?;
        let dir = Self::category_dir(account, R::CATEGORY);

        let entries = match self.fs.list(&dir).await {
            Ok(entries) => entries,
            Err(FsError::NotFound(_)) => return Ok(Vec::new()),
            Err(source) => return Err(SyncError::Index { dir, source }),
        };

        let mut names: Vec<String> = entries
            .into_iter()
            .filter(|e| !e.is_dir && is_record_file(&e.name))
            .map(|e| e.name)
            .collect();
        names.sort();

        let mut records = Vec::with_capacity(names.len());
        for file_name in names {
            let path = format!("{}/{}", dir, file_name);
            let raw = match self.fs.read(&path).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Failed to read {}: {}", path, e);
                    continue;
                }
            };

            match decode_identity(&raw) {
                Ok(identity) if identity.account == account => {}
                Ok(_) => continue,
                Err(e) => {
                    debug!("Skipping {}: {}", path, e);
                    continue;
                }
            }

            match decode_header::<R::Header>(&raw) {
                Ok((header, body)) => records.push(LocalRecord {
                    file_name,
                    path,
                    header,
                    body,
                }),
                Err(e) => debug!("Skipping {}: {}", path, e),
            }
        }

        Ok(records)
    }

    /// Warning for a state file that exists but cannot be read
    async fn check_state(&self, account: &str, category: Category, dir: &str) -> Option<Warning> {
        match self.state.load(account, category).await {
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring unreadable sync state for {}: {}", dir, e);
                Some(Warning::StatePersist {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn scan(&self, dir: &str, account: &str) -> Result<IdentityIndex> {
        IdentityIndex::scan(self.fs.as_ref(), dir, account)
            .await
            .map_err(|source| SyncError::Index {
                dir: dir.to_string(),
                source,
            })
    }
}

/// Account names become a single directory component
fn validate_account(account: &str) -> Result<()> {
    let valid = !account.starts_with('.')
        && !account.contains('/')
        && validate_relative_path(account).is_ok_and(|clean| !clean.is_empty());
    if valid {
        Ok(())
    } else {
        Err(SyncError::InvalidAccount(account.to_string()))
    }
}

fn log_summary(dir: &str, report: &SyncReport) {
    info!(
        "Finished sync of {}: {} created, {} updated, {} renamed, {} deleted, {} warnings",
        dir,
        report.created.len(),
        report.updated.len(),
        report.renamed.len(),
        report.deleted.len(),
        report.warnings.len()
    );
}

/// Who holds a file name in the directory during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
    Record(String),
    /// Unidentifiable file or not-yet-removed duplicate; never reused
    Stray,
}

/// An encoded record and the file name planned for it
struct Planned {
    id: String,
    stem: String,
    content: String,
    target: String,
}

/// Working state of one pass over one directory
struct Pass<'a, F: ?Sized> {
    fs: &'a F,
    dir: &'a str,
    account: &'a str,
    codec: &'a CodecOptions,
    index: IdentityIndex,
    /// id -> current file name, updated as files move
    current: HashMap<String, String>,
    /// file name -> owner
    occupied: HashMap<String, Owner>,
    /// Ids whose duplicate files were already handled
    deduplicated: HashSet<String>,
    report: SyncReport,
}

impl<'a, F: FileSystem + ?Sized> Pass<'a, F> {
    fn new(
        fs: &'a F,
        dir: &'a str,
        account: &'a str,
        codec: &'a CodecOptions,
        index: IdentityIndex,
    ) -> Self {
        let mut current = HashMap::new();
        let mut occupied = HashMap::new();
        let mut report = SyncReport::default();

        for (id, name) in index.entries() {
            current.insert(id.to_string(), name.to_string());
            occupied.insert(name.to_string(), Owner::Record(id.to_string()));
            for duplicate in index.duplicates_of(id) {
                occupied.insert(duplicate.clone(), Owner::Stray);
            }
        }
        for file in index.unidentified() {
            occupied.insert(file.file_name.clone(), Owner::Stray);
            report.warnings.push(Warning::Unidentified {
                path: format!("{}/{}", dir, file.file_name),
                reason: file.reason.clone(),
            });
        }

        Self {
            fs,
            dir,
            account,
            codec,
            index,
            current,
            occupied,
            deduplicated: HashSet::new(),
            report,
        }
    }

    fn path(&self, name: &str) -> String {
        format!("{}/{}", self.dir, name)
    }

    /// Lowest candidate name nobody holds right now
    fn free_name(&self, stem: &str) -> String {
        let mut n = 1;
        loop {
            let candidate = suffixed_file_name(stem, n);
            if !self.occupied.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Converge the directory on `records`, in batch order.
    ///
    /// Target names are planned for the whole batch before any file moves, so
    /// a name held by a batch member counts as free. Only strays and indexed
    /// ids outside the batch keep their names reserved.
    async fn apply_all<R: RecordCodec>(&mut self, records: &[R]) {
        let mut planned = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id().to_string();
            self.remove_duplicates(&id).await;

            let stem = record.file_stem(self.codec);
            match encode(record, self.account, self.codec) {
                Ok(content) => planned.push(Planned {
                    id,
                    stem,
                    content,
                    target: String::new(),
                }),
                Err(e) => {
                    let path = self.path(&suffixed_file_name(&stem, 1));
                    self.record_write_failed(&id, &path, e.to_string());
                }
            }
        }

        self.plan(&mut planned);
        let blocked = self.move_files(&planned).await;
        for entry in &planned {
            if !blocked.contains(&entry.id) {
                self.write_planned(entry).await;
            }
        }
    }

    fn plan(&self, planned: &mut [Planned]) {
        let members: HashSet<String> = planned.iter().map(|p| p.id.clone()).collect();
        let mut taken: HashSet<String> = self
            .occupied
            .iter()
            .filter(|(_, owner)| match owner {
                Owner::Record(id) => !members.contains(id),
                Owner::Stray => true,
            })
            .map(|(name, _)| name.clone())
            .collect();

        for entry in planned.iter_mut() {
            let mut n = 1;
            let target = loop {
                let candidate = suffixed_file_name(&entry.stem, n);
                if !taken.contains(&candidate) {
                    break candidate;
                }
                n += 1;
            };
            taken.insert(target.clone());
            entry.target = target;
        }
    }

    /// Move every indexed file whose planned name differs from its current
    /// one. Returns the ids whose file could not be moved.
    async fn move_files(&mut self, planned: &[Planned]) -> HashSet<String> {
        let targets: HashSet<&str> = planned.iter().map(|p| p.target.as_str()).collect();
        let mut origins = HashMap::new();
        let mut pending: Vec<(&str, &str)> = Vec::new();
        for entry in planned {
            if let Some(name) = self.current.get(&entry.id) {
                if *name != entry.target {
                    origins.insert(entry.id.clone(), self.path(name));
                    pending.push((entry.id.as_str(), entry.target.as_str()));
                }
            }
        }

        let mut blocked = HashSet::new();
        while !pending.is_empty() {
            let before = pending.len();
            let mut waiting = Vec::new();
            for (id, target) in pending {
                if self.occupied.contains_key(target) {
                    waiting.push((id, target));
                    continue;
                }
                let to = self.path(target);
                match self.move_to(id, target).await {
                    Ok(()) => {
                        let from = origins.remove(id).unwrap_or_default();
                        info!("Renamed {} -> {}", from, to);
                        self.report.renamed.push(FileMove { from, to });
                    }
                    Err(e) => {
                        self.record_write_failed(id, &to, e.to_string());
                        blocked.insert(id.to_string());
                    }
                }
            }
            pending = waiting;
            if pending.len() < before {
                continue;
            }

            // Every remaining target is held. A holder that is itself waiting
            // to move is a cycle: park it under a temporary name.
            let (id, target) = pending.remove(0);
            let holder = match self.occupied.get(target) {
                Some(Owner::Record(holder)) if pending.iter().any(|(p, _)| *p == holder.as_str()) => {
                    Some(holder.clone())
                }
                _ => None,
            };
            match holder {
                Some(holder) => {
                    let parked = self.parking_name(&holder, &targets);
                    match self.move_to(&holder, &parked).await {
                        Ok(()) => debug!("Parked {} at {}", holder, self.path(&parked)),
                        Err(e) => {
                            let path = self.path(&parked);
                            self.record_write_failed(&holder, &path, e.to_string());
                            blocked.insert(holder.clone());
                            pending.retain(|(p, _)| *p != holder.as_str());
                        }
                    }
                    pending.insert(0, (id, target));
                }
                None => {
                    let to = self.path(target);
                    let reason = format!("{} is still held by another file", to);
                    self.record_write_failed(id, &to, reason);
                    blocked.insert(id.to_string());
                }
            }
        }
        blocked
    }

    /// Temporary record-file name outside every planned target
    fn parking_name(&self, id: &str, targets: &HashSet<&str>) -> String {
        let base = self
            .current
            .get(id)
            .and_then(|name| name.strip_suffix(".md"))
            .unwrap_or(id);
        let stem = format!("{}-moving", base);
        let mut n = 1;
        loop {
            let candidate = suffixed_file_name(&stem, n);
            if !self.occupied.contains_key(&candidate) && !targets.contains(candidate.as_str()) {
                return candidate;
            }
            n += 1;
        }
    }

    async fn move_to(&mut self, id: &str, name: &str) -> std::result::Result<(), FsError> {
        let Some(existing) = self.current.get(id).cloned() else {
            return Err(FsError::NotFound(id.to_string()));
        };
        self.fs
            .rename(&self.path(&existing), &self.path(name))
            .await?;
        self.occupied.remove(&existing);
        self.claim(id, name);
        Ok(())
    }

    async fn write_planned(&mut self, entry: &Planned) {
        match self.current.get(&entry.id).cloned() {
            None => {
                // A file that failed to move away may still hold the target
                let name = if self.occupied.contains_key(&entry.target) {
                    self.free_name(&entry.stem)
                } else {
                    entry.target.clone()
                };
                let path = self.path(&name);
                if self.write(&entry.id, &path, &entry.content).await {
                    debug!("Created {}", path);
                    self.claim(&entry.id, &name);
                    self.report.created.push(path);
                }
            }
            Some(name) => {
                let path = self.path(&name);
                if self.write(&entry.id, &path, &entry.content).await {
                    self.report.updated.push(path);
                }
            }
        }
    }

    async fn tombstone(&mut self, id: &str) {
        self.remove_duplicates(id).await;
        match self.current.get(id).cloned() {
            Some(name) => self.delete(id, &name).await,
            None => debug!("Tombstone for unknown id {} in {}", id, self.dir),
        }
    }

    /// Delete every indexed file whose id is not in `seen`
    async fn sweep(&mut self, seen: &HashSet<&str>) {
        let mut unseen: Vec<(String, String)> = self
            .current
            .iter()
            .filter(|(id, _)| !seen.contains(id.as_str()))
            .map(|(id, name)| (id.clone(), name.clone()))
            .collect();
        unseen.sort();

        for (id, name) in unseen {
            self.remove_duplicates(&id).await;
            self.delete(&id, &name).await;
        }
    }

    fn finish(self) -> SyncReport {
        self.report
    }

    fn claim(&mut self, id: &str, name: &str) {
        self.current.insert(id.to_string(), name.to_string());
        self.occupied
            .insert(name.to_string(), Owner::Record(id.to_string()));
    }

    async fn write(&mut self, id: &str, path: &str, content: &str) -> bool {
        match self.fs.write(path, content.as_bytes()).await {
            Ok(()) => true,
            Err(e) => {
                self.record_write_failed(id, path, e.to_string());
                false
            }
        }
    }

    fn record_write_failed(&mut self, id: &str, path: &str, reason: String) {
        warn!("Failed to write record {} to {}: {}", id, path, reason);
        self.report.warnings.push(Warning::RecordWrite {
            id: id.to_string(),
            path: path.to_string(),
            reason,
        });
    }

    async fn delete(&mut self, id: &str, name: &str) {
        let path = self.path(name);
        match self.fs.delete(&path).await {
            Ok(()) => {
                info!("Deleted {}", path);
                self.occupied.remove(name);
                self.current.remove(id);
                self.report.deleted.push(path);
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", path, e);
                self.report.warnings.push(Warning::Delete {
                    id: id.to_string(),
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn remove_duplicates(&mut self, id: &str) {
        if !self.deduplicated.insert(id.to_string()) {
            return;
        }
        let duplicates = self.index.duplicates_of(id).to_vec();
        for name in duplicates {
            let path = self.path(&name);
            match self.fs.delete(&path).await {
                Ok(()) => {
                    info!("Deleted duplicate {} of record {}", path, id);
                    self.occupied.remove(&name);
                    self.report.deleted.push(path);
                }
                Err(e) => {
                    warn!("Failed to delete duplicate {}: {}", path, e);
                    self.report.warnings.push(Warning::Delete {
                        id: id.to_string(),
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
