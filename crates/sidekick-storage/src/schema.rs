//! Explicit schema definitions.
//!
//! Every table, column and index the store has ever had is declared here,
//! tagged with the schema version that introduced it. DDL for a fresh store
//! and for each migration step is generated from these definitions, so the
//! two paths can never drift apart.

use rusqlite::Connection;

use sidekick_core::error::{Result, SidekickError};

/// SQLite storage class of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnType,
    pub not_null: bool,
    /// Integer primary key. Combined with `autoincrement`, ids are never reused.
    pub primary_key: bool,
    pub autoincrement: bool,
    /// SQL literal used as the column default.
    pub default: Option<&'static str>,
    /// Schema version that introduced the column.
    pub since: u32,
}

impl ColumnDef {
    const fn new(name: &'static str, kind: ColumnType, since: u32) -> Self {
        Self {
            name,
            kind,
            not_null: false,
            primary_key: false,
            autoincrement: false,
            default: None,
            since,
        }
    }

    const fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    const fn with_default(mut self, literal: &'static str) -> Self {
        self.default = Some(literal);
        self
    }

    const fn primary_key(mut self, autoincrement: bool) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self.autoincrement = autoincrement;
        self
    }

    /// Column definition as it appears in `CREATE TABLE` / `ADD COLUMN`.
    pub fn definition_sql(&self) -> String {
        let mut sql = format!("\"{}\" {}", self.name, self.kind.sql());
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.autoincrement {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub unique: bool,
    pub since: u32,
}

impl IndexDef {
    pub fn create_sql(&self, table: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE {}INDEX IF NOT EXISTS \"{}\" ON \"{}\" ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            table,
            columns
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub indices: &'static [IndexDef],
    /// Schema version that introduced the table.
    pub since: u32,
}

impl TableDef {
    pub fn exists_at(&self, version: u32) -> bool {
        self.since <= version
    }

    /// Columns present in the table at `version`, in declaration order.
    pub fn columns_at(&self, version: u32) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(move |c| c.since <= version)
    }

    /// `CREATE TABLE` statement for the table as it looked at `version`.
    pub fn create_sql(&self, version: u32) -> String {
        let columns = self
            .columns_at(version)
            .map(ColumnDef::definition_sql)
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", self.name, columns)
    }

    /// Index statements for the table as it looked at `version`.
    pub fn index_sql(&self, version: u32) -> Vec<String> {
        self.indices
            .iter()
            .filter(|i| i.since <= version)
            .map(|i| i.create_sql(self.name))
            .collect()
    }
}

// ============================================================================
// Tables
// ============================================================================

/// Recordings downloaded from devices and not yet cleared locally.
pub mod recording {
    use super::{ColumnDef, ColumnType, IndexDef, TableDef};

    pub const ID: ColumnDef = ColumnDef::new("id", ColumnType::Integer, 1).primary_key(true);
    pub const DEVICE_NAME: ColumnDef =
        ColumnDef::new("device_name", ColumnType::Text, 1).not_null();
    pub const RECORDING_PATH: ColumnDef =
        ColumnDef::new("recording_path", ColumnType::Text, 1).not_null();
    pub const UPLOADED: ColumnDef = ColumnDef::new("uploaded", ColumnType::Integer, 1)
        .not_null()
        .with_default("0");
    pub const SIZE: ColumnDef = ColumnDef::new("size", ColumnType::Integer, 1);
    pub const NAME: ColumnDef = ColumnDef::new("name", ColumnType::Text, 1).not_null();
    pub const GROUP_NAME: ColumnDef = ColumnDef::new("group_name", ColumnType::Text, 3);
    pub const DEVICE_ID: ColumnDef = ColumnDef::new("device_id", ColumnType::Integer, 3)
        .not_null()
        .with_default("0");

    pub const PATH_INDEX: IndexDef = IndexDef {
        name: "index_recording_recording_path",
        columns: &["recording_path"],
        unique: true,
        since: 1,
    };

    pub const TABLE: TableDef = TableDef {
        name: "recording",
        columns: &[
            ID,
            DEVICE_NAME,
            RECORDING_PATH,
            UPLOADED,
            SIZE,
            NAME,
            GROUP_NAME,
            DEVICE_ID,
        ],
        indices: &[PATH_INDEX],
        since: 1,
    };
}

/// Device events. Rows are owned by the event uploader; the store only
/// guarantees the table exists from version 4 on.
pub mod event {
    use super::{ColumnDef, ColumnType, TableDef};

    pub const TABLE: TableDef = TableDef {
        name: "event",
        columns: &[
            ColumnDef::new("id", ColumnType::Integer, 4).primary_key(false),
            ColumnDef::new("device_id", ColumnType::Integer, 4).not_null(),
            ColumnDef::new("event_id", ColumnType::Integer, 4).not_null(),
            ColumnDef::new("timestamp", ColumnType::Text, 4).not_null(),
            ColumnDef::new("type", ColumnType::Text, 4).not_null(),
            ColumnDef::new("details", ColumnType::Text, 4).not_null(),
            ColumnDef::new("uploaded", ColumnType::Integer, 4)
                .not_null()
                .with_default("0"),
        ],
        indices: &[],
        since: 4,
    };
}

/// Every table the store knows about.
pub const TABLES: &[TableDef] = &[recording::TABLE, event::TABLE];

// ============================================================================
// Whole-schema operations
// ============================================================================

/// Create every table and index that exists at `version`.
///
/// Does not touch the persisted version tag; callers run this inside the
/// transaction that also records the version.
pub fn create_schema(conn: &Connection, version: u32) -> Result<()> {
    for table in TABLES.iter().filter(|t| t.exists_at(version)) {
        conn.execute_batch(&table.create_sql(version)).map_err(|e| {
            SidekickError::StorageUnavailable(format!(
                "Failed to create table {}: {}",
                table.name, e
            ))
        })?;
        for sql in table.index_sql(version) {
            conn.execute_batch(&sql).map_err(|e| {
                SidekickError::StorageUnavailable(format!(
                    "Failed to create index on {}: {}",
                    table.name, e
                ))
            })?;
        }
    }
    Ok(())
}

/// Names of all non-internal tables currently in the database.
pub fn user_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| SidekickError::StorageUnavailable(e.to_string()))?;
    Ok(names)
}

/// Drop every non-internal table (and with them, their indices).
pub fn drop_all_tables(conn: &Connection) -> Result<()> {
    for name in user_tables(conn)? {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\"", name))
            .map_err(|e| {
                SidekickError::StorageUnavailable(format!("Failed to drop table {}: {}", name, e))
            })?;
    }
    Ok(())
}

/// Read the persisted schema version tag exactly as stored.
///
/// SQLite keeps `user_version` as a signed 32-bit integer, so a store written
/// by something else can carry a negative tag.
pub fn read_raw_version(conn: &Connection) -> Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
        .map_err(|e| {
            SidekickError::StorageUnavailable(format!("Failed to read schema version: {}", e))
        })
}

/// Read the persisted schema version tag of a store this build manages.
pub fn read_version(conn: &Connection) -> Result<u32> {
    let raw = read_raw_version(conn)?;
    u32::try_from(raw).map_err(|_| {
        SidekickError::StorageUnavailable(format!("Schema version {} out of range", raw))
    })
}

/// Persist the schema version tag. Transactional like any other write.
pub fn write_version(conn: &Connection, version: u32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)
        .map_err(|e| {
            SidekickError::StorageUnavailable(format!("Failed to write schema version: {}", e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_test_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_column_definition_sql() {
        assert_eq!(
            recording::ID.definition_sql(),
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL"
        );
        assert_eq!(
            recording::DEVICE_ID.definition_sql(),
            "\"device_id\" INTEGER NOT NULL DEFAULT 0"
        );
        assert_eq!(recording::GROUP_NAME.definition_sql(), "\"group_name\" TEXT");
    }

    #[test]
    fn test_recording_columns_by_version() {
        let v1: Vec<_> = recording::TABLE.columns_at(1).map(|c| c.name).collect();
        assert_eq!(
            v1,
            vec!["id", "device_name", "recording_path", "uploaded", "size", "name"]
        );

        let v3: Vec<_> = recording::TABLE.columns_at(3).map(|c| c.name).collect();
        assert_eq!(v3.len(), 8);
        assert_eq!(&v3[6..], &["group_name", "device_id"]);
    }

    #[test]
    fn test_unique_index_sql() {
        assert_eq!(
            recording::PATH_INDEX.create_sql("recording"),
            concat!(
                "CREATE UNIQUE INDEX IF NOT EXISTS \"index_recording_recording_path\" ",
                "ON \"recording\" (\"recording_path\")"
            )
        );
    }

    #[test]
    fn test_event_table_only_from_v4() {
        assert!(!event::TABLE.exists_at(3));
        assert!(event::TABLE.exists_at(4));
    }

    #[test]
    fn test_create_schema_v1_has_no_event_table() {
        let conn = open_test_conn();
        create_schema(&conn, 1).unwrap();
        assert_eq!(user_tables(&conn).unwrap(), vec!["recording"]);
    }

    #[test]
    fn test_create_schema_v4() {
        let conn = open_test_conn();
        create_schema(&conn, 4).unwrap();
        let tables = user_tables(&conn).unwrap();
        assert!(tables.contains(&"recording".to_string()));
        assert!(tables.contains(&"event".to_string()));

        conn.execute(
            "INSERT INTO recording (device_name, recording_path, name) VALUES ('cam1', '/a', 'a')",
            [],
        )
        .unwrap();
        let (uploaded, device_id): (i64, i64) = conn
            .query_row("SELECT uploaded, device_id FROM recording", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(uploaded, 0);
        assert_eq!(device_id, 0);
    }

    #[test]
    fn test_unique_path_enforced() {
        let conn = open_test_conn();
        create_schema(&conn, 4).unwrap();
        conn.execute(
            "INSERT INTO recording (device_name, recording_path, name) VALUES ('cam1', '/a', 'a')",
            [],
        )
        .unwrap();
        let result = conn.execute(
            "INSERT INTO recording (device_name, recording_path, name) VALUES ('cam2', '/a', 'b')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_all_tables() {
        let conn = open_test_conn();
        create_schema(&conn, 4).unwrap();
        drop_all_tables(&conn).unwrap();
        assert!(user_tables(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_version_roundtrip() {
        let conn = open_test_conn();
        assert_eq!(read_version(&conn).unwrap(), 0);
        write_version(&conn, 3).unwrap();
        assert_eq!(read_version(&conn).unwrap(), 3);
    }

    #[test]
    fn test_negative_version_is_read_raw() {
        let conn = open_test_conn();
        conn.pragma_update(None, "user_version", -1).unwrap();
        assert_eq!(read_raw_version(&conn).unwrap(), -1);
        assert!(matches!(
            read_version(&conn),
            Err(SidekickError::StorageUnavailable(_))
        ));
    }
}
