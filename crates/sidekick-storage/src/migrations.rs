//! Database schema migrations.
//!
//! A migration is a pure description of additive schema changes between two
//! versions. The engine finds a registered chain from the on-disk version to
//! the target and applies each step in its own transaction, bumping the
//! persisted version in that same transaction.

use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use sidekick_core::error::{Result, SidekickError};

use crate::schema::{self, ColumnDef, TableDef};

/// Schema version written by this build.
pub const CURRENT_VERSION: u32 = 4;

/// One additive schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChange {
    /// `ALTER TABLE .. ADD COLUMN` with the column's default.
    AddColumn {
        table: &'static str,
        column: &'static ColumnDef,
    },
    /// Create an independent table (and its indices) as of the step's target
    /// version.
    CreateTable(&'static TableDef),
}

impl SchemaChange {
    fn statements(&self, version: u32) -> Vec<String> {
        match self {
            SchemaChange::AddColumn { table, column } => vec![format!(
                "ALTER TABLE \"{}\" ADD COLUMN {}",
                table,
                column.definition_sql()
            )],
            SchemaChange::CreateTable(table) => {
                let mut sql = vec![table.create_sql(version)];
                sql.extend(table.index_sql(version));
                sql
            }
        }
    }
}

/// Transformation from one schema version to a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    pub from: u32,
    pub to: u32,
    pub name: &'static str,
    pub changes: &'static [SchemaChange],
}

/// Migrations shipped with this build. Version 2 never reached devices, so
/// there is no path out of it.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        from: 1,
        to: 3,
        name: "recording_device_group",
        changes: &[
            SchemaChange::AddColumn {
                table: schema::recording::TABLE.name,
                column: &schema::recording::GROUP_NAME,
            },
            SchemaChange::AddColumn {
                table: schema::recording::TABLE.name,
                column: &schema::recording::DEVICE_ID,
            },
        ],
    },
    Migration {
        from: 3,
        to: 4,
        name: "event_table",
        changes: &[SchemaChange::CreateTable(&schema::event::TABLE)],
    },
];

/// Ordered registry of migrations towards a target version.
#[derive(Debug, Clone)]
pub struct MigrationEngine {
    target: u32,
    migrations: Vec<Migration>,
}

impl Default for MigrationEngine {
    fn default() -> Self {
        Self::new(CURRENT_VERSION).with_migrations(MIGRATIONS)
    }
}

impl MigrationEngine {
    /// An engine with no registered migrations.
    pub fn new(target: u32) -> Self {
        Self {
            target,
            migrations: Vec::new(),
        }
    }

    pub fn with_migrations(mut self, migrations: &[Migration]) -> Self {
        for migration in migrations {
            self.register(*migration);
        }
        self
    }

    /// Register a migration. A later registration for the same
    /// `(from, to)` pair replaces the earlier one.
    pub fn register(&mut self, migration: Migration) -> &mut Self {
        self.migrations
            .retain(|m| !(m.from == migration.from && m.to == migration.to));
        self.migrations.push(migration);
        self.migrations.sort_by_key(|m| (m.from, m.to));
        self
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// The chain of migrations leading from `from` to the target version.
    ///
    /// Larger steps are preferred; smaller ones are tried when a larger step
    /// leads to a dead end. Downgrades are never planned.
    pub fn plan(&self, from: u32) -> Result<Vec<&Migration>> {
        let mut chain = Vec::new();
        if self.find_chain(from, &mut chain) {
            Ok(chain)
        } else {
            Err(SidekickError::NoMigrationPath {
                from: i64::from(from),
                to: self.target,
            })
        }
    }

    fn find_chain<'a>(&'a self, current: u32, chain: &mut Vec<&'a Migration>) -> bool {
        if current == self.target {
            return true;
        }
        let mut candidates: Vec<&Migration> = self
            .migrations
            .iter()
            .filter(|m| m.from == current && m.to > current && m.to <= self.target)
            .collect();
        candidates.sort_by(|a, b| b.to.cmp(&a.to));

        for step in candidates {
            chain.push(step);
            if self.find_chain(step.to, chain) {
                return true;
            }
            chain.pop();
        }
        false
    }

    /// Bring a store at version `from` up to the target version.
    ///
    /// Each step commits on its own; a failure leaves the store at the last
    /// completed step. Returns the resulting version.
    pub fn migrate(&self, conn: &mut Connection, from: u32) -> Result<u32> {
        let chain = self.plan(from)?;
        let mut version = from;
        for step in chain {
            apply_step(conn, step)?;
            version = step.to;
            info!(
                from = step.from,
                to = step.to,
                name = step.name,
                "Applied migration"
            );
        }
        Ok(version)
    }
}

fn apply_step(conn: &mut Connection, step: &Migration) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| {
            SidekickError::StorageUnavailable(format!(
                "Failed to begin migration {}: {}",
                step.name, e
            ))
        })?;

    let on_disk = schema::read_version(&tx)?;
    if on_disk != step.from {
        return Err(SidekickError::StorageUnavailable(format!(
            "Migration {} expects version {}, store is at {}",
            step.name, step.from, on_disk
        )));
    }

    for change in step.changes {
        for sql in change.statements(step.to) {
            tx.execute_batch(&sql).map_err(|e| {
                SidekickError::StorageUnavailable(format!(
                    "Failed to apply migration {}: {}",
                    step.name, e
                ))
            })?;
        }
    }
    schema::write_version(&tx, step.to)?;

    tx.commit().map_err(|e| {
        SidekickError::StorageUnavailable(format!(
            "Failed to commit migration {}: {}",
            step.name, e
        ))
    })
}
