//! SQLite schema and the idempotent database initializer
//!
//! Only the tables the studio application cannot start without are defined
//! here: users (with the seeded administrator), clients, artists and
//! sessions. `schema_info` records the version so an incompatible database is
//! detected before anything is written to it.

use std::path::Path;

use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::Argon2;
use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{VaultError, VaultResult};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Tables that must exist in a compatible database
pub const EXPECTED_TABLES: &[&str] = &["users", "clients", "artists", "sessions"];

const SCHEMA_SQL: &str = r#"
    -- Schema version tracking
    CREATE TABLE IF NOT EXISTS schema_info (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    -- Login accounts
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL CHECK (role IN ('admin', 'staff', 'artist')),
        birth INTEGER,
        active INTEGER NOT NULL DEFAULT 1,
        must_change_password INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );

    -- Studio clients
    CREATE TABLE IF NOT EXISTS clients (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        phone TEXT,
        address TEXT,
        allergies TEXT,
        medical_info TEXT,
        qr_id TEXT UNIQUE
    );

    -- Artists
    CREATE TABLE IF NOT EXISTS artists (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        phone TEXT,
        email TEXT UNIQUE,
        bio TEXT,
        portfolio TEXT
    );

    -- Tattoo sessions (appointments)
    CREATE TABLE IF NOT EXISTS sessions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id INTEGER NOT NULL,
        artist_id INTEGER NOT NULL,
        date TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'planned',
        notes TEXT,
        FOREIGN KEY (client_id) REFERENCES clients(id),
        FOREIGN KEY (artist_id) REFERENCES artists(id)
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_date ON sessions(date);
    CREATE INDEX IF NOT EXISTS idx_sessions_client_id ON sessions(client_id);
    CREATE INDEX IF NOT EXISTS idx_sessions_artist_id ON sessions(artist_id);
"#;

/// Result of initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitResult {
    /// Whether the schema was created by this call
    pub created: bool,
    /// Schema version now present in the database
    pub schema_version: i32,
}

/// What the initializer found in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaState {
    /// No schema yet; safe to create
    Empty,
    /// Schema matches this version
    Current,
    /// Existing schema cannot be used
    Conflict(String),
}

/// Credentials for the administrator seeded into a fresh database
#[derive(Clone)]
pub struct AdminSeed {
    pub username: String,
    pub password: String,
}

impl AdminSeed {
    /// Seed taken from configuration
    ///
    /// Without a configured password the administrator is created with the
    /// username as password and flagged to change it on first login.
    pub fn from_config(config: &Config) -> Self {
        let password = config.admin_password.clone().unwrap_or_else(|| {
            warn!("No admin_password configured; seeding administrator with default password");
            config.admin_username.clone()
        });
        Self {
            username: config.admin_username.clone(),
            password,
        }
    }
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Create the schema and seed data if absent
///
/// No-op when the schema already matches `SCHEMA_VERSION`. Fails with
/// `SchemaConflict` when the database holds an incompatible schema. Schema
/// creation and seeding run in one transaction.
pub fn initialize_database(
    conn: &mut Connection,
    path: &Path,
    seed: &AdminSeed,
) -> VaultResult<InitResult> {
    match inspect_schema(conn)? {
        SchemaState::Current => {
            debug!("Schema version {} already present in {:?}", SCHEMA_VERSION, path);
            Ok(InitResult {
                created: false,
                schema_version: SCHEMA_VERSION,
            })
        }
        SchemaState::Conflict(details) => Err(VaultError::SchemaConflict {
            path: path.to_path_buf(),
            details,
        }),
        SchemaState::Empty => {
            let password_hash = hash_password(&seed.password)?;

            let tx = conn.transaction()?;
            tx.execute_batch(SCHEMA_SQL)?;
            tx.execute(
                "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?1)",
                [SCHEMA_VERSION.to_string()],
            )?;
            tx.execute(
                "INSERT INTO users (name, password_hash, role, active, must_change_password, created_at)
                 VALUES (?1, ?2, 'admin', 1, ?3, ?4)",
                params![
                    seed.username,
                    password_hash,
                    seed.password == seed.username,
                    chrono::Utc::now().to_rfc3339(),
                ],
            )?;
            tx.commit()?;

            info!(
                "Created schema version {} in {:?} with administrator '{}'",
                SCHEMA_VERSION, path, seed.username
            );
            Ok(InitResult {
                created: true,
                schema_version: SCHEMA_VERSION,
            })
        }
    }
}

/// Classify the schema currently in the database
pub fn inspect_schema(conn: &Connection) -> Result<SchemaState> {
    let tables = user_tables(conn)?;

    if !tables.iter().any(|t| t == "schema_info") {
        let unversioned: Vec<&str> = EXPECTED_TABLES
            .iter()
            .copied()
            .filter(|expected| tables.iter().any(|t| t == expected))
            .collect();
        if !unversioned.is_empty() {
            return Ok(SchemaState::Conflict(format!(
                "no schema version recorded but tables already exist: {}",
                unversioned.join(", ")
            )));
        }

        let mut populated = Vec::new();
        for table in &tables {
            if table_has_rows(conn, table)? {
                populated.push(table.clone());
            }
        }

        if populated.is_empty() {
            return Ok(SchemaState::Empty);
        }
        return Ok(SchemaState::Conflict(format!(
            "no schema version recorded but tables hold data: {}",
            populated.join(", ")
        )));
    }

    let version = match get_schema_version(conn)? {
        Some(v) => v,
        None => {
            return Ok(SchemaState::Conflict(
                "schema_info exists but has no version".to_string(),
            ))
        }
    };

    if version != SCHEMA_VERSION {
        return Ok(SchemaState::Conflict(format!(
            "unknown schema version {} (this build supports {})",
            version, SCHEMA_VERSION
        )));
    }

    let missing: Vec<&str> = EXPECTED_TABLES
        .iter()
        .copied()
        .filter(|expected| !tables.iter().any(|t| t == expected))
        .collect();
    if !missing.is_empty() {
        return Ok(SchemaState::Conflict(format!(
            "schema version {} is missing tables: {}",
            version,
            missing.join(", ")
        )));
    }

    Ok(SchemaState::Current)
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")?
        .exists([])?;
    if !table_exists {
        return Ok(None);
    }

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(version.and_then(|v| v.parse().ok()))
}

/// Number of active administrator accounts
pub fn count_admins(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = 'admin' AND active = 1",
        [],
        |row| row.get(0),
    )
}

fn user_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>>>()?;
    Ok(tables)
}

fn table_has_rows(conn: &Connection, table: &str) -> Result<bool> {
    let sql = format!("SELECT EXISTS (SELECT 1 FROM \"{}\")", table.replace('"', "\"\""));
    conn.query_row(&sql, [], |row| row.get(0))
}

fn hash_password(password: &str) -> VaultResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| VaultError::Seed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> AdminSeed {
        AdminSeed {
            username: "admin".to_string(),
            password: "correct horse".to_string(),
        }
    }

    fn path() -> &'static Path {
        Path::new(":memory:")
    }

    #[test]
    fn test_initialize_fresh_database() {
        let mut conn = Connection::open_in_memory().unwrap();

        let result = initialize_database(&mut conn, path(), &seed()).unwrap();
        assert!(result.created);
        assert_eq!(result.schema_version, SCHEMA_VERSION);

        let tables = user_tables(&conn).unwrap();
        for expected in EXPECTED_TABLES {
            assert!(tables.contains(&expected.to_string()), "missing {}", expected);
        }
        assert_eq!(count_admins(&conn).unwrap(), 1);
    }

    #[test]
    fn test_initialize_twice_is_noop() {
        let mut conn = Connection::open_in_memory().unwrap();

        initialize_database(&mut conn, path(), &seed()).unwrap();
        let second = initialize_database(&mut conn, path(), &seed()).unwrap();

        assert!(!second.created);
        assert_eq!(second.schema_version, SCHEMA_VERSION);
        let users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(users, 1);
    }

    #[test]
    fn test_seeds_no_business_data() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize_database(&mut conn, path(), &seed()).unwrap();

        for table in ["clients", "artists", "sessions"] {
            assert!(!table_has_rows(&conn, table).unwrap(), "{} not empty", table);
        }
    }

    #[test]
    fn test_password_is_hashed() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize_database(&mut conn, path(), &seed()).unwrap();

        let (hash, must_change): (String, bool) = conn
            .query_row(
                "SELECT password_hash, must_change_password FROM users WHERE name = 'admin'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(!hash.contains("correct horse"));
        assert!(!must_change);
    }

    #[test]
    fn test_default_password_must_change() {
        let mut conn = Connection::open_in_memory().unwrap();
        let seed = AdminSeed::from_config(&Config::with_data_dir("/unused"));
        initialize_database(&mut conn, path(), &seed).unwrap();

        let must_change: bool = conn
            .query_row("SELECT must_change_password FROM users", [], |row| row.get(0))
            .unwrap();
        assert!(must_change);
    }

    #[test]
    fn test_unknown_version_conflicts() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize_database(&mut conn, path(), &seed()).unwrap();
        conn.execute(
            "UPDATE schema_info SET value = '99' WHERE key = 'version'",
            [],
        )
        .unwrap();

        let err = initialize_database(&mut conn, path(), &seed()).unwrap_err();
        assert!(matches!(err, VaultError::SchemaConflict { .. }));
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn test_foreign_tables_with_data_conflict() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE clients (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO clients (name) VALUES ('Existing client');",
        )
        .unwrap();

        let err = initialize_database(&mut conn, path(), &seed()).unwrap_err();
        assert!(matches!(err, VaultError::SchemaConflict { .. }));

        // Nothing was written
        assert_eq!(get_schema_version(&conn).unwrap(), None);
    }

    #[test]
    fn test_empty_foreign_table_conflicts() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE clients (id INTEGER PRIMARY KEY);")
            .unwrap();

        assert_eq!(
            inspect_schema(&conn).unwrap(),
            SchemaState::Conflict(
                "no schema version recorded but tables already exist: clients".to_string()
            )
        );
        let err = initialize_database(&mut conn, path(), &seed()).unwrap_err();
        assert!(matches!(err, VaultError::SchemaConflict { .. }));
        assert_eq!(get_schema_version(&conn).unwrap(), None);
    }

    #[test]
    fn test_unrelated_empty_table_is_initialized() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE scratch (id INTEGER PRIMARY KEY);")
            .unwrap();

        let result = initialize_database(&mut conn, path(), &seed()).unwrap();
        assert!(result.created);
        assert_eq!(inspect_schema(&conn).unwrap(), SchemaState::Current);
    }

    #[test]
    fn test_missing_expected_table_conflicts() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize_database(&mut conn, path(), &seed()).unwrap();
        conn.execute_batch("DROP TABLE sessions;").unwrap();

        assert_eq!(
            inspect_schema(&conn).unwrap(),
            SchemaState::Conflict(format!(
                "schema version {} is missing tables: sessions",
                SCHEMA_VERSION
            ))
        );
    }

    #[test]
    fn test_schema_version() {
        let mut conn = Connection::open_in_memory().unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), None);
        assert_eq!(inspect_schema(&conn).unwrap(), SchemaState::Empty);

        initialize_database(&mut conn, path(), &seed()).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
        assert_eq!(inspect_schema(&conn).unwrap(), SchemaState::Current);
    }

    #[test]
    fn test_seed_debug_redacts_password() {
        let rendered = format!("{:?}", seed());
        assert!(!rendered.contains("correct horse"));
    }
}
