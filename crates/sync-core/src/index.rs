//! Identity index: which local file holds which remote id
//!
//! Built by scanning a category directory at the start of every pass and never
//! kept across passes, so renames or deletions made by hand between passes are
//! always picked up.

use crate::codec::decode_identity;
use crate::fs::{FileSystem, FsError};
use record_fs::is_record_file;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A file that could not be tied to a record of this directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnidentifiedFile {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IdentityIndex {
    /// id -> file name (within the scanned directory)
    by_id: BTreeMap<String, String>,
    /// id -> further files carrying the same id
    duplicates: BTreeMap<String, Vec<String>>,
    unidentified: Vec<UnidentifiedFile>,
}

impl IdentityIndex {
    /// Scan `dir` and decode each record file's header far enough to recover its id.
    ///
    /// A missing directory is an empty index. Files that fail to read or decode,
    /// lack an id, or belong to another account are excluded and reported in
    /// [`IdentityIndex::unidentified`]. When several files carry the same id the
    /// first in file-name order is indexed and the rest are duplicates.
    pub async fn scan<F: FileSystem + ?Sized>(
        fs: &F,
        dir: &str,
        account: &str,
    ) -> Result<Self, FsError> {
        let entries = match fs.list(dir).await {
            Ok(entries) => entries,
            Err(FsError::NotFound(_)) => {
                debug!("Directory {} does not exist yet, empty index", dir);
                return Ok(Self::default());
            }
            Err(e) => return Err(e),
        };

        let mut names: Vec<String> = entries
            .into_iter()
            .filter(|e| !e.is_dir && is_record_file(&e.name))
            .map(|e| e.name)
            .collect();
        names.sort();

        let mut index = Self::default();
        for name in names {
            let path = format!("{}/{}", dir, name);
            let identity = match fs.read(&path).await {
                Ok(raw) => decode_identity(&raw).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match identity {
                Ok(identity) if identity.account != account => {
                    index.exclude(
                        name,
                        format!("belongs to account '{}'", identity.account),
                    );
                }
                Ok(identity) => index.insert(identity.id, name),
                Err(reason) => index.exclude(name, reason),
            }
        }

        debug!(
            "Indexed {} files in {} ({} unidentified)",
            index.by_id.len(),
            dir,
            index.unidentified.len()
        );
        Ok(index)
    }

    fn insert(&mut self, id: String, name: String) {
        if self.by_id.contains_key(&id) {
            warn!("Duplicate id {} in {}", id, name);
            self.duplicates.entry(id).or_default().push(name);
        } else {
            self.by_id.insert(id, name);
        }
    }

    fn exclude(&mut self, file_name: String, reason: String) {
        warn!("Skipping unidentifiable file {}: {}", file_name, reason);
        self.unidentified.push(UnidentifiedFile { file_name, reason });
    }

    /// File name of the indexed file for `id`
    pub fn get(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Extra files that carry `id` besides the indexed one
    pub fn duplicates_of(&self, id: &str) -> &[String] {
        self.duplicates.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// (id, file name) pairs in id order
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_id.iter().map(|(id, name)| (id.as_str(), name.as_str()))
    }

    pub fn unidentified(&self) -> &[UnidentifiedFile] {
        &self.unidentified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;

    fn doc(id: &str, account: &str) -> String {
        format!("---\nid: {}\naccount: {}\n---\n\n# T\n", id, account)
    }

    #[tokio::test]
    async fn test_scan_missing_directory_is_empty() {
        let fs = InMemoryFs::new();
        let index = IdentityIndex::scan(&fs, "work/calendar", "work").await.unwrap();
        assert!(index.is_empty());
        assert!(index.unidentified().is_empty());
    }

    #[tokio::test]
    async fn test_scan_maps_ids_to_files() {
        let fs = InMemoryFs::new();
        fs.write("work/contacts/jane.md", doc("c1", "work").as_bytes())
            .await
            .unwrap();
        fs.write("work/contacts/renamed-by-hand.md", doc("c2", "work").as_bytes())
            .await
            .unwrap();

        let index = IdentityIndex::scan(&fs, "work/contacts", "work").await.unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("c1"), Some("jane.md"));
        assert_eq!(index.get("c2"), Some("renamed-by-hand.md"));
        assert_eq!(index.get("c3"), None);
    }

    #[tokio::test]
    async fn test_scan_excludes_unidentifiable_files() {
        let fs = InMemoryFs::new();
        let dir = "work/contacts";
        fs.write(&format!("{}/ok.md", dir), doc("c1", "work").as_bytes())
            .await
            .unwrap();
        fs.write(&format!("{}/notes.md", dir), b"# my own notes\n")
            .await
            .unwrap();
        fs.write(&format!("{}/broken.md", dir), b"---\nid: [\n---\n")
            .await
            .unwrap();
        fs.write(&format!("{}/other.md", dir), doc("c9", "home").as_bytes())
            .await
            .unwrap();
        // Not record files at all
        fs.write(&format!("{}/readme.txt", dir), b"hello").await.unwrap();
        fs.write(&format!("{}/ok.md.ab12.tmp", dir), b"partial")
            .await
            .unwrap();

        let index = IdentityIndex::scan(&fs, dir, "work").await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("c9"), None);

        let mut skipped: Vec<&str> = index
            .unidentified()
            .iter()
            .map(|u| u.file_name.as_str())
            .collect();
        skipped.sort();
        assert_eq!(skipped, vec!["broken.md", "notes.md", "other.md"]);
    }

    #[tokio::test]
    async fn test_scan_records_duplicates_in_name_order() {
        let fs = InMemoryFs::new();
        fs.write("work/contacts/b.md", doc("c1", "work").as_bytes())
            .await
            .unwrap();
        fs.write("work/contacts/a.md", doc("c1", "work").as_bytes())
            .await
            .unwrap();

        let index = IdentityIndex::scan(&fs, "work/contacts", "work").await.unwrap();
        assert_eq!(index.get("c1"), Some("a.md"));
        assert_eq!(index.duplicates_of("c1"), ["b.md".to_string()]);
        assert!(index.duplicates_of("c2").is_empty());
    }
}
