//! `md365 contacts search`

use super::{App, matches_query, searchable_text};
use anyhow::{Context, Result};
use sync_core::fs::FileSystem;
use sync_core::{Contact, ContactHeader, Reconciler, SyncError};

/// Contacts whose file content contains `query`, per account in file order
pub async fn find_contacts<F: FileSystem>(
    reconciler: &Reconciler<F>,
    accounts: &[String],
    query: &str,
) -> std::result::Result<Vec<(String, ContactHeader)>, SyncError> {
    let mut found = Vec::new();
    for account in accounts {
        for record in reconciler.list_local_records::<Contact>(account).await? {
            if matches_query(&searchable_text(&record.header, &record.body), Some(query)) {
                found.push((account.clone(), record.header));
            }
        }
    }
    Ok(found)
}

/// `[work] Ada Lovelace <ada@example.com>`
pub fn format_contact(account: &str, contact: &ContactHeader) -> String {
    match contact.emails.first() {
        Some(email) => format!("[{}] {} <{}>", account, contact.display_name, email),
        None => format!("[{}] {}", account, contact.display_name),
    }
}

pub async fn search(app: &App, query: &str, account: Option<&str>) -> Result<Vec<String>> {
    let accounts = app.config.select_accounts(account)?;
    let found = find_contacts(&app.reconciler, &accounts, query)
        .await
        .context("Failed to read local contacts")?;

    Ok(found
        .iter()
        .map(|(account, contact)| format_contact(account, contact))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sync_core::{CodecOptions, InMemoryFs, MemorySource};

    async fn seeded() -> Reconciler<InMemoryFs> {
        let reconciler = Reconciler::new(Arc::new(InMemoryFs::new()), CodecOptions::default());

        let mut ada = Contact::new("c1", "Ada Lovelace");
        ada.emails = vec!["ada@example.com".to_string(), "ada@home.test".to_string()];
        ada.company = Some("Analytical Engines".to_string());
        let grace = Contact::new("c2", "Grace Hopper");
        let work = MemorySource::with_records([ada, grace]);
        reconciler.run_delta_sync(&work, "work").await.unwrap();

        let mut alan = Contact::new("c9", "Alan Turing");
        alan.phones = vec!["+44 555 0101".to_string()];
        let home = MemorySource::with_records([alan]);
        reconciler.run_delta_sync(&home, "home").await.unwrap();

        reconciler
    }

    fn lines(found: &[(String, ContactHeader)]) -> Vec<String> {
        found.iter().map(|(a, c)| format_contact(a, c)).collect()
    }

    #[tokio::test]
    async fn test_search_by_name_and_content() {
        let reconciler = seeded().await;
        let accounts = vec!["home".to_string(), "work".to_string()];

        let found = find_contacts(&reconciler, &accounts, "LOVELACE").await.unwrap();
        assert_eq!(lines(&found), vec!["[work] Ada Lovelace <ada@example.com>"]);

        let found = find_contacts(&reconciler, &accounts, "analytical").await.unwrap();
        assert_eq!(found.len(), 1);

        let found = find_contacts(&reconciler, &accounts, "0101").await.unwrap();
        assert_eq!(lines(&found), vec!["[home] Alan Turing"]);
    }

    #[tokio::test]
    async fn test_search_respects_account_selection() {
        let reconciler = seeded().await;

        let found = find_contacts(&reconciler, &["home".to_string()], "a").await.unwrap();
        assert!(found.iter().all(|(account, _)| account == "home"));

        let found = find_contacts(&reconciler, &["missing".to_string()], "a").await.unwrap();
        assert!(found.is_empty());
    }
}
