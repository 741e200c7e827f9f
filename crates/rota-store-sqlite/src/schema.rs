//! SQL schema and migrations for the SQLite store.
//!
//! `SCHEMA` is idempotent thanks to `CREATE ... IF NOT EXISTS`. Columns that
//! were added after the first deployment are applied afterwards by
//! [`migrate`]; a column that already exists counts as applied.
//! `PRAGMA user_version` records the resulting schema version.

use rusqlite::Connection;

pub const SCHEMA_VERSION: i32 = 2;

/// Base DDL.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per route and service date. Rows are only ever removed by the
-- reconciler.
CREATE TABLE IF NOT EXISTS trip_history (
    id                     INTEGER PRIMARY KEY AUTOINCREMENT,
    route_integration_code TEXT NOT NULL,
    service_date           TEXT NOT NULL,   -- YYYY-MM-DD
    line                   TEXT,
    estimated_departure    TEXT,            -- YYYY-MM-DD HH:MM:SS, local
    estimated_arrival      TEXT,
    real_departure         TEXT,
    real_arrival           TEXT,            -- set => trip is completed
    route_name             TEXT,
    direction_name         TEXT,
    shift                  TEXT,
    estimated_vehicle      TEXT,
    real_vehicle           TEXT,
    estimated_distance     REAL,
    travelled_distance     REAL,
    client_name            TEXT,
    UNIQUE (route_integration_code, service_date)
);

CREATE INDEX IF NOT EXISTS trip_history_name_date_idx
    ON trip_history (TRIM(LOWER(route_name)), service_date);

-- Maintained outside the pipeline; read-only here.
CREATE TABLE IF NOT EXISTS canonical_routes (
    route_integration_code TEXT PRIMARY KEY,
    route_name             TEXT NOT NULL,
    client_name            TEXT
);

CREATE TABLE IF NOT EXISTS violations (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    line_name    TEXT,
    route_name   TEXT NOT NULL,
    direction    TEXT,
    real_vehicle TEXT,
    service_date TEXT NOT NULL,
    UNIQUE (route_name, service_date)
);

-- Derived; truncated and rebuilt wholesale.
CREATE TABLE IF NOT EXISTS enriched_violations (
    violation_id   INTEGER PRIMARY KEY,
    line_name      TEXT,
    route_name     TEXT NOT NULL,
    direction      TEXT,
    real_vehicle   TEXT,
    service_date   TEXT NOT NULL,
    url            TEXT,
    violation_type TEXT,
    client_name    TEXT,
    real_departure TEXT,
    real_arrival   TEXT,
    trip_id        INTEGER
);

CREATE TABLE IF NOT EXISTS last_execution (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    executed_at TEXT NOT NULL
);
";

/// A column added to an existing table after the base schema shipped.
pub struct ColumnMigration {
  pub table:       &'static str,
  pub column:      &'static str,
  pub declaration: &'static str,
}

pub const COLUMN_MIGRATIONS: &[ColumnMigration] = &[
  ColumnMigration { table: "violations", column: "url", declaration: "TEXT" },
  ColumnMigration { table: "violations", column: "violation_type", declaration: "TEXT" },
];

/// What happened to one column migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
  Added { table: &'static str, column: &'static str },
  AlreadyPresent { table: &'static str, column: &'static str },
}

/// Apply the base schema and every column migration.
pub fn migrate(conn: &Connection) -> rusqlite::Result<Vec<MigrationOutcome>> {
  conn.execute_batch(SCHEMA)?;

  let mut outcomes = Vec::with_capacity(COLUMN_MIGRATIONS.len());
  for m in COLUMN_MIGRATIONS {
    let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", m.table, m.column, m.declaration);
    match conn.execute(&sql, []) {
      Ok(_) => outcomes.push(MigrationOutcome::Added { table: m.table, column: m.column }),
      Err(rusqlite::Error::SqliteFailure(_, Some(msg)))
        if msg.contains("duplicate column name") =>
      {
        outcomes.push(MigrationOutcome::AlreadyPresent { table: m.table, column: m.column })
      }
      Err(e) => return Err(e),
    }
  }

  conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
  Ok(outcomes)
}
