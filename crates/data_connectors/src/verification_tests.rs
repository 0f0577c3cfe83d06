//! End-to-end checks of the connector guarantees.
//!
//! - Prefix listings are idempotent and partition directories from files
//! - Empty prefixes list as None
//! - Upload then download returns the same bytes
//! - Module fetch leaves a hyphenated package directory and no archive
//! - Tabular reads fail cleanly on missing keys and corrupt bodies
//! - Uploads without a key transfer nothing
//! - Secrets never appear in Debug output
//!
//! Warehouse checks need a live server and are skipped unless
//! `CONNECTORS_TEST_PG_HOST` is set (plus `CONNECTORS_TEST_SSH_HOST` for the
//! tunnel comparison).

#[cfg(test)]
mod tests {
    use crate::models::{
        AccessKeys, DbCredentials, SshAuth, SslMode, StorageConfig, TabularFormat, TabularOptions,
        TunnelConfig,
    };
    use crate::services::{MemoryStore, ObjectStorage, WarehouseService, PACKAGE_MARKER};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::sync::Arc;

    const BUCKET: &str = "lake";

    fn lake() -> (Arc<MemoryStore>, ObjectStorage) {
        let store = Arc::new(MemoryStore::new());
        for key in [
            "exports/2024/jan.csv",
            "exports/2024/feb.csv",
            "exports/2023/dec.csv",
            "exports/summary.csv",
            "exports/raw/",
            "exports/readme.txt",
            "models/churn.tar.gz",
            "top-level.json",
        ] {
            store.insert(BUCKET, key, format!("body of {key}"));
        }
        let storage = ObjectStorage::with_store(store.clone(), BUCKET);
        (store, storage)
    }

    fn gzip_tar(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, format!("{root}/{name}"), data.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    // =========================================================================
    // Prefix listing
    // =========================================================================

    #[tokio::test]
    async fn test_list_prefix_is_idempotent() {
        let (_, storage) = lake();
        let first = storage.list_prefix("exports").await.unwrap();
        let second = storage.list_prefix("exports/").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.unwrap(),
            vec!["2023/", "2024/", "raw/", "readme.txt", "summary.csv"]
        );
    }

    #[tokio::test]
    async fn test_list_prefix_partitions_entries() {
        let (_, storage) = lake();
        for prefix in ["", "exports", "exports/2024", "models"] {
            let entries = storage.list_prefix(prefix).await.unwrap().unwrap();
            let (dirs, files): (Vec<_>, Vec<_>) = entries.iter().partition(|e| e.ends_with('/'));

            for dir in &dirs {
                assert_eq!(dir.matches('/').count(), 1, "{prefix}: {dir}");
                assert!(!files.contains(dir));
            }
            for file in &files {
                assert!(!file.contains('/'), "{prefix}: {file}");
            }

            // Directories come first
            let first_file =
                entries.iter().position(|e| !e.ends_with('/')).unwrap_or(entries.len());
            assert!(entries[first_file..].iter().all(|e| !e.ends_with('/')));
        }
    }

    #[tokio::test]
    async fn test_list_prefix_none_vs_empty() {
        let (_, storage) = lake();
        assert_eq!(storage.list_prefix("imports").await.unwrap(), None);
        assert_eq!(storage.list_prefix("exports/raw").await.unwrap(), Some(Vec::new()));
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let (_, storage) = lake();
        let dir = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let source = dir.path().join("blob.bin");
        std::fs::write(&source, &payload).unwrap();

        let key = storage.upload(&source, Some("uploads/blob 1.bin")).await.unwrap();
        let target = dir.path().join("copy.bin");
        storage.download(&key, &target).await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_upload_without_key_is_rejected() {
        let (store, storage) = lake();
        let before = store.keys(BUCKET);
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("orphan.csv");
        std::fs::write(&source, "a\n1\n").unwrap();

        let err = storage.upload(&source, None).await.unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(err.hint().is_some());
        assert_eq!(store.keys(BUCKET), before);
    }

    // =========================================================================
    // Module fetch
    // =========================================================================

    #[tokio::test]
    async fn test_fetch_module_layout() {
        let (store, storage) = lake();
        let archive = gzip_tar("feature-store", &[("client.py", "def get(): pass\n")]);
        store.insert(BUCKET, "modules/feature-store.tar.gz", archive);

        let dir = tempfile::tempdir().unwrap();
        let module = storage
            .fetch_module_into("modules/", "feature-store.tar.gz", dir.path())
            .await
            .unwrap();

        assert_eq!(module.file_name().unwrap(), "feature-store");
        assert!(module.join(PACKAGE_MARKER).is_file());
        assert!(module.join("client.py").is_file());
        assert!(!dir.path().join("feature-store.tar.gz").exists());
        assert!(!dir.path().join("feature_store").exists());
    }

    // =========================================================================
    // Tabular reads
    // =========================================================================

    #[tokio::test]
    async fn test_read_tabular_failures() {
        let (store, storage) = lake();
        let options = TabularOptions::default();

        let err = storage.read_tabular("exports/missing.csv", TabularFormat::Csv, &options).await;
        assert!(err.unwrap_err().is_not_found());

        store.insert(BUCKET, "bad/book.xlsx", b"PK\x03\x04 truncated".to_vec());
        let err = storage.read_tabular("bad/book.xlsx", TabularFormat::Spreadsheet, &options).await;
        assert_eq!(err.unwrap_err().category(), "Parse");

        store.insert(BUCKET, "bad/rows.csv", b"a,b\n1,2\n3,4,5\n".to_vec());
        let err = storage.read_tabular("bad/rows.csv", TabularFormat::Csv, &options).await;
        assert_eq!(err.unwrap_err().category(), "Parse");
    }

    #[tokio::test]
    async fn test_read_tabular_with_forwarded_options() {
        let (store, storage) = lake();
        store.insert(BUCKET, "exports/eu.csv", "id;city\n1;Lyon\n2;NULL\n");

        let options = TabularOptions::from_json(serde_json::json!({ "delimiter": ";" })).unwrap();
        let table = storage.read_csv("exports/eu.csv", &options).await.unwrap();

        assert_eq!(table.column_names(), vec!["id", "city"]);
        assert_eq!(table.row_count(), 2);
        assert!(table.cell(1, "city").unwrap().is_null());
    }

    // =========================================================================
    // Secrets
    // =========================================================================

    #[test]
    fn test_no_secrets_in_debug_output() {
        let creds = DbCredentials::new("dw", "etl", "hunter2-db", "warehouse");
        let tunnel = TunnelConfig::new("bastion", "etl", SshAuth::password("hunter2-ssh"));
        let keyed = TunnelConfig::new(
            "bastion",
            "etl",
            SshAuth::key_file_with_passphrase("/keys/id_ed25519", "hunter2-phrase"),
        );
        let storage = StorageConfig::signed("lake", AccessKeys::new("AKIAEXAMPLE", "hunter2-aws"));

        let rendered = format!("{creds:?} {tunnel:?} {keyed:?} {storage:?}");
        assert!(!rendered.contains("hunter2"), "secret leaked: {rendered}");
    }

    // =========================================================================
    // Warehouse (live server)
    // =========================================================================

    fn env(name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    fn live_credentials() -> Option<DbCredentials> {
        let host = env("CONNECTORS_TEST_PG_HOST")?;
        let port = env("CONNECTORS_TEST_PG_PORT").and_then(|p| p.parse().ok()).unwrap_or(5432);
        Some(
            DbCredentials::new(
                env("CONNECTORS_TEST_PG_DATABASE").unwrap_or_else(|| "postgres".into()),
                env("CONNECTORS_TEST_PG_USER").unwrap_or_else(|| "postgres".into()),
                env("CONNECTORS_TEST_PG_PASSWORD").unwrap_or_default(),
                host,
            )
            .with_port(port)
            .with_ssl_mode(SslMode::Disable),
        )
    }

    fn live_tunnel(creds: &DbCredentials) -> Option<TunnelConfig> {
        let ssh_host = env("CONNECTORS_TEST_SSH_HOST")?;
        let user = env("CONNECTORS_TEST_SSH_USER").unwrap_or_else(|| "root".into());
        let auth = match env("CONNECTORS_TEST_SSH_KEY") {
            Some(path) => SshAuth::key_file(path),
            None => SshAuth::password(env("CONNECTORS_TEST_SSH_PASSWORD").unwrap_or_default()),
        };
        let remote_host =
            env("CONNECTORS_TEST_SSH_REMOTE_HOST").unwrap_or_else(|| creds.host.clone());
        Some(
            TunnelConfig::new(ssh_host, user, auth)
                .with_remote_bind(remote_host, creds.port)
                .with_local_bind("127.0.0.1", 0),
        )
    }

    const REFERENCE_QUERY: &str = concat!(
        "SELECT g AS id, g * 1.5::numeric AS amount, 'row ' || g AS label ",
        "FROM generate_series(1, 25) g"
    );

    #[tokio::test]
    async fn test_live_query_matches_reference_shape() {
        let Some(creds) = live_credentials() else {
            return;
        };

        let table = WarehouseService::execute(REFERENCE_QUERY, &creds, None).await.unwrap();
        assert_eq!(table.column_names(), vec!["id", "amount", "label"]);
        assert_eq!(table.row_count(), 25);
        assert_eq!(table.cell(1, "amount"), Some(&serde_json::json!("3.0")));

        let empty =
            WarehouseService::execute("SELECT 1 AS one WHERE false", &creds, None).await.unwrap();
        assert_eq!(empty.column_names(), vec!["one"]);
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_live_query_error_is_verbatim() {
        let Some(creds) = live_credentials() else {
            return;
        };

        let err = WarehouseService::execute("SELECT * FROM no_such_table_xyz", &creds, None)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "Query");
        assert_eq!(err.sql_state(), Some("42P01"));
        assert!(err.to_string().contains("no_such_table_xyz"));
    }

    #[tokio::test]
    async fn test_live_query_reads_unmapped_types_as_text() {
        let Some(creds) = live_credentials() else {
            return;
        };

        let sql = concat!(
            "SELECT 7 AS n, interval '1 day' AS span, '\\x01ff'::bytea AS raw, ",
            "'10.0.0.1'::inet AS addr, ARRAY[1.5, 2]::numeric[] AS amounts, NULL::money AS fee"
        );
        let table = WarehouseService::execute(sql, &creds, None).await.unwrap();

        assert_eq!(table.cell(0, "n"), Some(&serde_json::json!(7)));
        assert_eq!(table.cell(0, "span"), Some(&serde_json::json!("1 day")));
        assert_eq!(table.cell(0, "raw"), Some(&serde_json::json!("\\x01ff")));
        assert_eq!(table.cell(0, "addr"), Some(&serde_json::json!("10.0.0.1")));
        assert_eq!(table.cell(0, "amounts"), Some(&serde_json::json!("{1.5,2}")));
        assert!(table.cell(0, "fee").unwrap().is_null());
    }

    #[tokio::test]
    async fn test_live_tunneled_matches_direct() {
        let Some(creds) = live_credentials() else {
            return;
        };
        let Some(tunnel) = live_tunnel(&creds) else {
            return;
        };

        let direct = WarehouseService::execute(REFERENCE_QUERY, &creds, None).await.unwrap();
        let tunneled =
            WarehouseService::execute(REFERENCE_QUERY, &creds, Some(&tunnel)).await.unwrap();
        assert_eq!(direct, tunneled);
    }
}
