use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use inkbook_core::backup::checksum::sha256_file;
use inkbook_core::storage::schema::count_admins;
use inkbook_core::{
    CancelToken, Capability, Config, Extension, Principal, RestoreOptions, RestoreReport,
    RestoreRequest, RetentionPolicy, Snapshot, Vault, VaultError,
};
use parking_lot::Mutex;
use rusqlite::Connection;
use tempfile::TempDir;

fn open_vault(temp: &TempDir) -> Vault {
    let mut config = Config::with_data_dir(temp.path());
    config.admin_password = Some("tattoo-parlour".to_string());
    config.lock_timeout_secs = 2;
    Vault::open(config).unwrap()
}

fn add_client(vault: &Vault, name: &str) {
    vault
        .engine()
        .with_connection(|conn| {
            conn.execute("INSERT INTO clients (name) VALUES (?1)", [name])?;
            Ok(())
        })
        .unwrap();
}

fn client_names(vault: &Vault) -> Vec<String> {
    vault
        .engine()
        .with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM clients ORDER BY id")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
        .unwrap()
}

fn corrupt_in_place(path: &Path) {
    let len = fs::metadata(path).unwrap().len() as usize;
    fs::write(path, vec![0xA5u8; len.max(4096)]).unwrap();
}

fn pause() {
    thread::sleep(Duration::from_millis(1_100));
}

#[test]
fn restore_recovers_corrupted_live_database() {
    let temp = TempDir::new().unwrap();
    let vault = open_vault(&temp);
    let admin = Principal::system();
    assert!(vault.startup_init().unwrap().created);

    add_client(&vault, "Ada");
    let snapshot = vault.create_snapshot(&admin).unwrap();

    vault.engine().checkpoint().unwrap();
    corrupt_in_place(vault.engine().path());
    let fresh = Connection::open(vault.engine().path()).unwrap();
    assert!(fresh
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get::<_, i64>(0))
        .is_err());
    drop(fresh);

    let report = vault
        .restore(
            &admin,
            &RestoreRequest::snapshot(&snapshot.id),
            RestoreOptions::default(),
        )
        .unwrap();
    assert_eq!(report.snapshot_id, snapshot.id);
    // Nothing to snapshot in a damaged file; the file itself is kept
    assert!(report.safety_snapshot.is_none());
    let kept = report.previous_database.clone().unwrap();
    assert!(kept.exists());
    assert_eq!(vault.list_snapshots(&admin).unwrap().len(), 1);

    let init = vault.initialize_database(&admin).unwrap();
    assert!(!init.created);
    assert!(vault.is_ready());
    assert_eq!(client_names(&vault), vec!["Ada".to_string()]);
    let admins = vault
        .engine()
        .with_connection(|conn| Ok(count_admins(conn)?))
        .unwrap();
    assert_eq!(admins, 1);
}

#[test]
fn fresh_process_recovers_corrupted_live_database() {
    let temp = TempDir::new().unwrap();
    let admin = Principal::system();
    let snapshot = {
        let vault = open_vault(&temp);
        add_client(&vault, "Ada");
        add_client(&vault, "Grace");
        let snapshot = vault.create_snapshot(&admin).unwrap();
        vault.shutdown().unwrap();
        snapshot
    };

    let mut config = Config::with_data_dir(temp.path());
    config.admin_password = Some("tattoo-parlour".to_string());
    corrupt_in_place(&config.database_path());

    assert!(Vault::open(config.clone()).is_err());
    let vault = Vault::open_for_recovery(config.clone()).unwrap();
    assert!(!vault.is_ready());

    let report = vault
        .restore(&admin, &RestoreRequest::snapshot("latest"), RestoreOptions::default())
        .unwrap();
    assert_eq!(report.snapshot_id, snapshot.id);
    assert!(report.previous_database.is_some());
    assert!(vault.is_ready());
    assert_eq!(
        client_names(&vault),
        vec!["Ada".to_string(), "Grace".to_string()]
    );
    vault.shutdown().unwrap();

    // The next ordinary start finds a healthy database
    let vault = Vault::open(config).unwrap();
    assert!(!vault.startup_init().unwrap().created);
    assert_eq!(client_names(&vault).len(), 2);
}

#[test]
fn unversioned_tables_are_a_schema_conflict() {
    let temp = TempDir::new().unwrap();
    let config = Config::with_data_dir(temp.path());
    let db = config.database_path();
    fs::create_dir_all(db.parent().unwrap()).unwrap();
    Connection::open(&db)
        .unwrap()
        .execute_batch("CREATE TABLE clients (id INTEGER PRIMARY KEY);")
        .unwrap();

    let err = Vault::open(config).err().unwrap();
    assert!(matches!(err, VaultError::SchemaConflict { .. }));
    assert_eq!(err.kind().as_str(), "schema_conflict");
}

#[test]
fn snapshots_a_second_apart_sort_chronologically() {
    let temp = TempDir::new().unwrap();
    let vault = open_vault(&temp);
    let admin = Principal::system();

    let mut created = Vec::new();
    for i in 0..3 {
        if i > 0 {
            pause();
        }
        add_client(&vault, &format!("client-{}", i));
        created.push(vault.create_snapshot(&admin).unwrap());
    }

    let ids: Vec<&str> = created.iter().map(|s| s.id.as_str()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);

    let file_names: Vec<String> = created
        .iter()
        .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    let mut sorted_names = file_names.clone();
    sorted_names.sort();
    assert_eq!(file_names, sorted_names);

    for snapshot in &created {
        assert_eq!(sha256_file(&snapshot.path).unwrap(), snapshot.checksum);
        vault.verify_snapshot(&admin, &snapshot.id).unwrap();
    }
}

#[test]
fn export_skips_corrupt_snapshot() {
    let temp = TempDir::new().unwrap();
    let vault = open_vault(&temp);
    let admin = Principal::system();

    let mut snapshots = Vec::new();
    for i in 0..3 {
        if i > 0 {
            pause();
        }
        snapshots.push(vault.create_snapshot(&admin).unwrap());
    }
    fs::write(&snapshots[1].path, b"bit rot").unwrap();

    let ids: Vec<String> = snapshots.iter().map(|s| s.id.clone()).collect();
    let report = vault
        .export_archive(&admin, &ids, None, &CancelToken::new())
        .unwrap();

    assert_eq!(report.included, vec![ids[0].clone(), ids[2].clone()]);
    assert_eq!(report.excluded.len(), 1);
    assert_eq!(report.excluded[0].id, ids[1]);
    assert!(report.excluded[0].reason.contains("checksum mismatch"));

    let manifest = inkbook_core::backup::read_manifest(&report.path).unwrap();
    let in_manifest: Vec<&str> = manifest.snapshots.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(in_manifest, vec![ids[0].as_str(), ids[2].as_str()]);

    // The archive can be restored from on its own
    let restored = vault
        .restore(
            &admin,
            &RestoreRequest::archive(&report.path, None),
            RestoreOptions {
                safety_snapshot: false,
            },
        )
        .unwrap();
    assert_eq!(restored.snapshot_id, ids[2]);
}

#[test]
fn snapshot_under_concurrent_writes_is_consistent() {
    let temp = TempDir::new().unwrap();
    let vault = Arc::new(open_vault(&temp));

    let writer = {
        let vault = Arc::clone(&vault);
        thread::spawn(move || {
            for i in 0..300 {
                add_client(&vault, &format!("walk-in {}", i));
            }
        })
    };

    let snapshot = vault.create_snapshot(&Principal::system()).unwrap();
    writer.join().unwrap();

    let copy = temp.path().join("inspect.db");
    fs::copy(&snapshot.path, &copy).unwrap();
    let conn = Connection::open(&copy).unwrap();
    let check: String = conn
        .query_row("PRAGMA integrity_check", [], |row| row.get(0))
        .unwrap();
    assert_eq!(check, "ok");
    assert_eq!(client_names(&vault).len(), 300);
}

#[test]
fn retention_never_deletes_newest() {
    let temp = TempDir::new().unwrap();
    let vault = open_vault(&temp);
    let admin = Principal::system();

    vault.create_snapshot(&admin).unwrap();
    pause();
    let newest = vault.create_snapshot(&admin).unwrap();

    let report = vault
        .apply_retention(
            &admin,
            Some(RetentionPolicy {
                max_count: 0,
                max_age_days: 0,
            }),
        )
        .unwrap();

    assert_eq!(report.kept.len(), 1);
    assert_eq!(report.kept[0].id, newest.id);
    assert_eq!(report.deleted.len(), 1);
    assert_eq!(vault.list_snapshots(&admin).unwrap(), vec![newest]);
}

#[test]
fn restore_rejects_corrupt_snapshot_without_touching_live() {
    let temp = TempDir::new().unwrap();
    let vault = open_vault(&temp);
    let admin = Principal::system();

    add_client(&vault, "Ada");
    let snapshot = vault.create_snapshot(&admin).unwrap();
    fs::write(&snapshot.path, b"definitely not sqlite").unwrap();
    vault.engine().checkpoint().unwrap();
    let before = fs::read(vault.engine().path()).unwrap();

    let err = vault
        .restore(
            &admin,
            &RestoreRequest::snapshot(&snapshot.id),
            RestoreOptions {
                safety_snapshot: false,
            },
        )
        .unwrap_err();

    assert!(matches!(err, VaultError::CorruptSnapshot { .. }));
    assert_eq!(fs::read(vault.engine().path()).unwrap(), before);
    assert_eq!(client_names(&vault), vec!["Ada".to_string()]);
}

struct Journal {
    events: Mutex<Vec<String>>,
}

impl Extension for Journal {
    fn name(&self) -> &str {
        "journal"
    }

    fn capabilities(&self) -> BTreeSet<Capability> {
        [Capability::SnapshotObserver, Capability::RestoreObserver]
            .into_iter()
            .collect()
    }

    fn on_snapshot_created(&self, snapshot: &Snapshot) {
        self.events.lock().push(format!("snapshot {}", snapshot.id));
    }

    fn on_restore_completed(&self, report: &RestoreReport) {
        self.events.lock().push(format!("restore {}", report.snapshot_id));
    }
}

#[test]
fn extensions_observe_snapshot_and_restore() {
    let temp = TempDir::new().unwrap();
    let journal = Arc::new(Journal {
        events: Mutex::new(Vec::new()),
    });
    let vault = Vault::open_with_extensions(
        Config::with_data_dir(temp.path()),
        vec![journal.clone() as Arc<dyn Extension>],
    )
    .unwrap();
    let admin = Principal::system();

    let snapshot = vault.create_snapshot(&admin).unwrap();
    vault
        .restore(
            &admin,
            &RestoreRequest::snapshot(&snapshot.id),
            RestoreOptions {
                safety_snapshot: false,
            },
        )
        .unwrap();

    assert_eq!(
        *journal.events.lock(),
        vec![
            format!("snapshot {}", snapshot.id),
            format!("restore {}", snapshot.id)
        ]
    );
    assert_eq!(vault.extensions().names(), vec!["journal"]);
}
