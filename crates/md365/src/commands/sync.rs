//! `md365 sync`: calendar full-window pass, then contacts delta pass, per account.

use super::App;
use crate::graph::GraphClient;
use crate::token::TokenProvider;
use anyhow::{Result, bail};
use chrono::Utc;
use sync_core::fs::FileSystem;
use sync_core::{
    Category, Contact, DeltaSource, Event, Reconciler, RemoteError, SyncError, SyncReport,
    TimeWindow, WindowSource,
};
use tracing::{error, info, warn};

/// What happened to one account
#[derive(Debug, Default)]
pub struct AccountSummary {
    pub account: String,
    pub calendar: Option<SyncReport>,
    pub contacts: Option<SyncReport>,
    /// Failures that aborted a pass (or the whole account)
    pub errors: Vec<String>,
}

impl AccountSummary {
    fn failed(account: &str, error: String) -> Self {
        Self {
            account: account.to_string(),
            errors: vec![error],
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Human-readable summary, one line per completed pass
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(report) = &self.calendar {
            lines.push(format!(
                "Synced calendar for '{}': {}",
                self.account,
                describe(report)
            ));
        }
        if let Some(report) = &self.contacts {
            lines.push(format!(
                "Synced contacts for '{}': {}",
                self.account,
                describe(report)
            ));
        }
        lines
    }
}

fn describe(report: &SyncReport) -> String {
    let mut text = format!(
        "{} new, {} updated, {} renamed, {} deleted",
        report.created.len(),
        report.updated.len(),
        report.renamed.len(),
        report.deleted.len()
    );
    if report.warning_count() > 0 {
        text.push_str(&format!(" ({} warning(s))", report.warning_count()));
    }
    text
}

/// Run both passes for one account. A failed calendar pass does not prevent
/// the contacts pass.
pub async fn sync_account<F, W, D>(
    reconciler: &Reconciler<F>,
    calendar: &W,
    contacts: &D,
    account: &str,
    window: &TimeWindow,
) -> AccountSummary
where
    F: FileSystem,
    W: WindowSource<Event> + ?Sized,
    D: DeltaSource<Contact> + ?Sized,
{
    let mut summary = AccountSummary {
        account: account.to_string(),
        ..Default::default()
    };

    match reconciler
        .run_full_window_sync::<Event, _>(calendar, account, window)
        .await
    {
        Ok(report) => summary.calendar = Some(report),
        Err(e) => {
            error!("Calendar sync failed for {}: {}", account, e);
            summary.errors.push(format!("calendar: {}", e));
        }
    }

    match sync_contacts(reconciler, contacts, account).await {
        Ok(report) => summary.contacts = Some(report),
        Err(e) => {
            error!("Contacts sync failed for {}: {}", account, e);
            summary.errors.push(format!("contacts: {}", e));
        }
    }

    summary
}

/// Delta pass that falls back to a full enumeration once when the stored
/// cursor has expired
async fn sync_contacts<F, D>(
    reconciler: &Reconciler<F>,
    source: &D,
    account: &str,
) -> std::result::Result<SyncReport, SyncError>
where
    F: FileSystem,
    D: DeltaSource<Contact> + ?Sized,
{
    match reconciler.run_delta_sync::<Contact, _>(source, account).await {
        Err(SyncError::Remote(RemoteError::CursorExpired)) => {
            warn!(
                "Delta cursor for {}/{} expired, re-enumerating",
                account,
                Category::Contacts
            );
            if let Err(e) = reconciler
                .state_store()
                .clear_cursor(account, Category::Contacts)
                .await
            {
                warn!("Failed to clear delta cursor for {}: {}", account, e);
                return Err(SyncError::Remote(RemoteError::CursorExpired));
            }
            reconciler.run_delta_sync::<Contact, _>(source, account).await
        }
        result => result,
    }
}

/// Sync the selected accounts against Microsoft Graph
pub async fn run(
    app: &App,
    tokens: &dyn TokenProvider,
    selector: Option<&str>,
) -> Result<Vec<AccountSummary>> {
    let accounts = app.config.select_accounts(selector)?;
    if accounts.is_empty() {
        bail!("No accounts configured");
    }

    let window = TimeWindow::around(
        Utc::now(),
        app.config.calendar.past_days,
        app.config.calendar.future_days,
    );

    let mut summaries = Vec::with_capacity(accounts.len());
    for account in &accounts {
        info!("Syncing account {}", account);

        let token = match tokens.bearer_token(account).await {
            Ok(token) => token,
            Err(e) => {
                error!("Skipping account {}: {}", account, e);
                summaries.push(AccountSummary::failed(account, e.to_string()));
                continue;
            }
        };
        let client = match GraphClient::new(token, app.config.request_timeout) {
            Ok(client) => client,
            Err(e) => {
                summaries.push(AccountSummary::failed(account, e.to_string()));
                continue;
            }
        };

        summaries.push(sync_account(&app.reconciler, &client, &client, account, &window).await);
    }

    Ok(summaries)
}
