//! md365: Markdown mirror of Microsoft 365 calendars and contacts.
//!
//! Library half of the `md365` binary: configuration, the native filesystem,
//! the Graph adapter and the command implementations.

pub mod commands;
pub mod config;
pub mod graph;
pub mod html;
pub mod native_fs;
pub mod token;

pub use config::{AccountConfig, CalendarConfig, Config, ConfigError};
pub use graph::GraphClient;
pub use html::{body_to_markdown, html_to_markdown};
pub use native_fs::NativeFs;
pub use token::{EnvTokenProvider, TokenProvider};
