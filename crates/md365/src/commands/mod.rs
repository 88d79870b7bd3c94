//! CLI command implementations.
//!
//! Each command computes its output as lines so it can be tested without a
//! terminal; `main` prints them to stdout.

pub mod cal;
pub mod contacts;
pub mod sync;

use crate::config::Config;
use crate::native_fs::NativeFs;
use std::sync::Arc;
use sync_core::{CodecOptions, Reconciler};

/// Everything a command needs: configuration plus the reconciler over the
/// data directory.
pub struct App {
    pub config: Config,
    pub reconciler: Reconciler<NativeFs>,
}

impl App {
    pub fn new(config: Config) -> Self {
        let fs = Arc::new(NativeFs::new(config.data_dir.clone()));
        let reconciler = Reconciler::new(
            fs,
            CodecOptions {
                time_zone: config.time_zone,
            },
        );
        Self { config, reconciler }
    }
}

/// Case-insensitive substring match; an empty query matches everything
pub(crate) fn matches_query(haystack: &str, query: Option<&str>) -> bool {
    match query {
        None => true,
        Some(q) if q.is_empty() => true,
        Some(q) => haystack.to_lowercase().contains(&q.to_lowercase()),
    }
}

/// Header and body as they appear in the file, for content search
pub(crate) fn searchable_text<H: serde::Serialize>(header: &H, body: &str) -> String {
    let mut text = serde_yaml::to_string(header).unwrap_or_default();
    text.push('\n');
    text.push_str(body);
    text
}
