//! JsonCredentialStore against real files

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;
use tests::fixtures::CredentialFile;

use hassbridge_core::{CredentialRecord, CredentialRepository};
use hassbridge_storage::JsonCredentialStore;

#[tokio::test]
async fn test_load_reads_record_and_extras() {
    let file = CredentialFile::expiring_in(60);
    let store = JsonCredentialStore::new(file.path());

    let record = store.load().await.unwrap().unwrap();
    assert_eq!(record.access_token, "old-access");
    assert_eq!(record.refresh_token.as_deref(), Some("old-refresh"));
    assert_eq!(record.expires_at, file.expires_at());
    assert_eq!(record.extra.get("subscriptionType"), Some(&json!("max")));
}

#[tokio::test]
async fn test_save_rewrites_only_the_record() {
    let file = CredentialFile::expiring_in(60);
    let store = JsonCredentialStore::new(file.path());

    let mut record = store.load().await.unwrap().unwrap();
    record.access_token = "rotated".into();
    record.expires_at = 1_900_000_000_000;
    store.save(&record).await.unwrap();

    let document = file.read();
    assert_eq!(document["claudeAiOauth"]["accessToken"], "rotated");
    assert_eq!(document["claudeAiOauth"]["expiresAt"], 1_900_000_000_000i64);
    assert_eq!(document["claudeAiOauth"]["rateLimitTier"], "default_claude_max_20x");
    assert_eq!(document["mcpOAuth"], json!({ "server": { "token": "keep-me" } }));
}

#[tokio::test]
async fn test_save_creates_missing_directories_privately() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("claude").join("config").join(".credentials.json");
    let store = JsonCredentialStore::new(&path);
    assert!(store.load().await.unwrap().is_none());

    let record = CredentialRecord {
        access_token: "fresh".into(),
        refresh_token: Some("refresh".into()),
        expires_at: 1_900_000_000_000,
        extra: Default::default(),
    };
    store.save(&record).await.unwrap();
    assert_eq!(store.load().await.unwrap(), Some(record));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn test_malformed_file_is_an_error_not_missing() {
    let file = CredentialFile::empty();
    std::fs::write(file.path(), "{ not json").unwrap();
    let store = JsonCredentialStore::new(file.path());
    assert!(store.load().await.is_err());

    file.write(&json!({ "otherTool": {} }));
    assert!(store.load().await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_from_separate_stores() {
    let file = CredentialFile::expiring_in(60);

    let saves: Vec<_> = (0..40)
        .map(|i| {
            let store = JsonCredentialStore::new(file.path());
            tokio::spawn(async move {
                let record = CredentialRecord {
                    access_token: format!("access-{}", i),
                    refresh_token: Some(format!("refresh-{}", i)),
                    expires_at: 1_900_000_000_000 + i,
                    extra: Default::default(),
                };
                store.save(&record).await
            })
        })
        .collect();

    let mut failed = 0;
    for save in saves {
        if save.await.unwrap().is_err() {
            failed += 1;
        }
    }
    assert_eq!(failed, 0);

    let document = file.read();
    assert!(document["claudeAiOauth"]["accessToken"]
        .as_str()
        .unwrap()
        .starts_with("access-"));
    assert_eq!(document["mcpOAuth"], json!({ "server": { "token": "keep-me" } }));
}

#[tokio::test]
async fn test_save_refuses_truncated_file() {
    let file = CredentialFile::empty();
    let truncated = r#"{"mcpOAuth":{"server":{"token":"keep-me"}},"claudeAiOauth":{"accessToken":"a""#;
    std::fs::write(file.path(), truncated).unwrap();
    let store = JsonCredentialStore::new(file.path());

    let record = CredentialRecord {
        access_token: "new".into(),
        refresh_token: None,
        expires_at: 0,
        extra: Default::default(),
    };
    assert!(store.save(&record).await.is_err());
    assert_eq!(std::fs::read_to_string(file.path()).unwrap(), truncated);
}
