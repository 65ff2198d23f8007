//! Row Schema Module
//!
//! Statement templates for the cache table, built once per table identifier,
//! and the column-ordinal lookup used to decode rows.

use std::sync::OnceLock;

use rusqlite::{params, Connection, Row, RowIndex};
use tracing::{debug, info};

use crate::cache::entry::{decode_timestamp, ticks_to_duration, CacheRow};
use crate::error::{CacheError, Result};

// == Column Names ==
pub const ID_COLUMN: &str = "Id";
pub const VALUE_COLUMN: &str = "Value";
pub const EXPIRES_AT_COLUMN: &str = "ExpiresAtTime";
pub const SLIDING_COLUMN: &str = "SlidingExpirationTicks";
pub const ABSOLUTE_COLUMN: &str = "AbsoluteExpiration";

/// Maximum key length enforced by the provisioned table.
pub const MAX_ID_LENGTH: usize = 100;

// == Column Ordinals ==
/// Positions of each column in the select-alive result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnOrdinals {
    pub id: usize,
    pub value: usize,
    pub expires_at: usize,
    pub sliding: usize,
    pub absolute: usize,
}

// == Row Schema ==
/// Statement templates bound to one cache table.
#[derive(Debug)]
pub struct RowSchema {
    table_name: String,
    schema_name: Option<String>,
    select_alive: String,
    select_by_id: String,
    insert: String,
    update_entry: String,
    update_expiry: String,
    delete_by_id: String,
    delete_expired: String,
    ordinals: OnceLock<ColumnOrdinals>,
}

impl RowSchema {
    // == Constructor ==
    /// Builds every statement for `table_name`, optionally qualified by an
    /// attached database name. Identifiers are quoted here and nowhere else.
    pub fn new(table_name: &str, schema_name: Option<&str>) -> Result<Self> {
        if table_name.trim().is_empty() {
            return Err(CacheError::InvalidConfig(
                "cache table name must not be empty".to_string(),
            ));
        }
        if matches!(schema_name, Some(s) if s.trim().is_empty()) {
            return Err(CacheError::InvalidConfig(
                "cache schema name must not be empty when set".to_string(),
            ));
        }

        let table = qualified_name(schema_name, table_name);
        let (id, value, expires, sliding, absolute) = (
            quote_identifier(ID_COLUMN),
            quote_identifier(VALUE_COLUMN),
            quote_identifier(EXPIRES_AT_COLUMN),
            quote_identifier(SLIDING_COLUMN),
            quote_identifier(ABSOLUTE_COLUMN),
        );

        Ok(Self {
            table_name: table_name.to_string(),
            schema_name: schema_name.map(str::to_string),
            select_alive: format!(
                "SELECT {id}, {value}, {expires}, {sliding}, {absolute} FROM {table} \
                 WHERE {id} = ?1 AND {expires} >= ?2"
            ),
            select_by_id: format!(
                "SELECT {id}, {value}, {expires}, {sliding}, {absolute} FROM {table} WHERE {id} = ?1"
            ),
            insert: format!(
                "INSERT INTO {table} ({id}, {value}, {expires}, {sliding}, {absolute}) \
                 VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            update_entry: format!(
                "UPDATE {table} SET {value} = ?2, {expires} = ?3, {sliding} = ?4, {absolute} = ?5 \
                 WHERE {id} = ?1"
            ),
            update_expiry: format!("UPDATE {table} SET {expires} = ?2 WHERE {id} = ?1"),
            delete_by_id: format!("DELETE FROM {table} WHERE {id} = ?1"),
            delete_expired: format!("DELETE FROM {table} WHERE {expires} < ?1"),
            ordinals: OnceLock::new(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn schema_name(&self) -> Option<&str> {
        self.schema_name.as_deref()
    }

    // == Statement Templates ==
    /// `?1` id, `?2` now.
    pub fn select_alive_sql(&self) -> &str {
        &self.select_alive
    }

    /// `?1` id. Same columns as the select-alive statement, expired or not.
    pub fn select_by_id_sql(&self) -> &str {
        &self.select_by_id
    }

    /// `?1` id, `?2` value, `?3` expires, `?4` sliding ticks, `?5` absolute.
    pub fn insert_sql(&self) -> &str {
        &self.insert
    }

    /// Same parameters as [`RowSchema::insert_sql`].
    pub fn update_entry_sql(&self) -> &str {
        &self.update_entry
    }

    /// `?1` id, `?2` expires.
    pub fn update_expiry_sql(&self) -> &str {
        &self.update_expiry
    }

    /// `?1` id.
    pub fn delete_by_id_sql(&self) -> &str {
        &self.delete_by_id
    }

    /// `?1` now.
    pub fn delete_expired_sql(&self) -> &str {
        &self.delete_expired
    }

    // == Provisioning DDL ==
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\n\
             \x20   {id} TEXT NOT NULL PRIMARY KEY CHECK (length({id}) <= {max}),\n\
             \x20   {value} BLOB NOT NULL,\n\
             \x20   {expires} TEXT NOT NULL,\n\
             \x20   {sliding} INTEGER NULL,\n\
             \x20   {absolute} TEXT NULL\n\
             )",
            table = qualified_name(self.schema_name(), &self.table_name),
            id = quote_identifier(ID_COLUMN),
            max = MAX_ID_LENGTH,
            value = quote_identifier(VALUE_COLUMN),
            expires = quote_identifier(EXPIRES_AT_COLUMN),
            sliding = quote_identifier(SLIDING_COLUMN),
            absolute = quote_identifier(ABSOLUTE_COLUMN),
        )
    }

    /// SQLite takes the database qualifier on the index name, not the table.
    pub fn create_index_sql(&self) -> String {
        let index = format!("Index_{}_{}", self.table_name, EXPIRES_AT_COLUMN);
        format!(
            "CREATE INDEX IF NOT EXISTS {index} ON {table} ({expires})",
            index = qualified_name(self.schema_name(), &index),
            table = quote_identifier(&self.table_name),
            expires = quote_identifier(EXPIRES_AT_COLUMN),
        )
    }

    fn table_exists_sql(&self) -> String {
        let master = match self.schema_name() {
            Some(schema) => format!("{}.sqlite_master", quote_identifier(schema)),
            None => "sqlite_master".to_string(),
        };
        format!("SELECT COUNT(*) FROM {master} WHERE type = 'table' AND name = ?1")
    }

    /// Returns true if the cache table is present.
    pub fn table_exists(&self, conn: &Connection) -> Result<bool> {
        let count: i64 =
            conn.query_row(&self.table_exists_sql(), params![self.table_name], |row| row.get(0))?;
        Ok(count > 0)
    }

    // == Provision ==
    /// Creates the table and its expiry index. Returns false if the table
    /// already existed, in which case nothing is changed.
    pub fn provision(&self, conn: &Connection) -> Result<bool> {
        if self.table_exists(conn)? {
            info!("Table {} already exists", self.table_name);
            return Ok(false);
        }

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(&self.create_table_sql())?;
        tx.execute_batch(&self.create_index_sql())?;
        tx.commit()?;

        info!("Created table {} and its expiration index", self.table_name);
        Ok(true)
    }

    // == Column Ordinals ==
    /// Resolves column positions from the select statement. Only the first
    /// successful resolution is kept.
    pub fn prime_ordinals(&self, conn: &Connection) -> Result<ColumnOrdinals> {
        if let Some(ordinals) = self.ordinals.get() {
            return Ok(*ordinals);
        }

        let stmt = conn.prepare_cached(&self.select_alive)?;
        let resolved = ColumnOrdinals {
            id: stmt.column_index(ID_COLUMN)?,
            value: stmt.column_index(VALUE_COLUMN)?,
            expires_at: stmt.column_index(EXPIRES_AT_COLUMN)?,
            sliding: stmt.column_index(SLIDING_COLUMN)?,
            absolute: stmt.column_index(ABSOLUTE_COLUMN)?,
        };
        debug!("Primed column ordinals for {}: {:?}", self.table_name, resolved);

        Ok(*self.ordinals.get_or_init(|| resolved))
    }

    pub fn ordinals(&self) -> Option<ColumnOrdinals> {
        self.ordinals.get().copied()
    }

    // == Row Decoding ==
    /// Decodes a select-alive row, by ordinal when primed and by name
    /// otherwise.
    pub fn read_row(&self, row: &Row<'_>) -> Result<CacheRow> {
        match self.ordinals.get() {
            Some(o) => read_columns(row, o.id, o.value, o.expires_at, o.sliding, o.absolute),
            None => read_columns(
                row,
                ID_COLUMN,
                VALUE_COLUMN,
                EXPIRES_AT_COLUMN,
                SLIDING_COLUMN,
                ABSOLUTE_COLUMN,
            ),
        }
    }
}

fn read_columns<I: RowIndex>(
    row: &Row<'_>,
    id: I,
    value: I,
    expires_at: I,
    sliding: I,
    absolute: I,
) -> Result<CacheRow> {
    let expires_at: String = row.get(expires_at)?;
    let sliding: Option<i64> = row.get(sliding)?;
    let absolute: Option<String> = row.get(absolute)?;

    Ok(CacheRow {
        id: row.get(id)?,
        value: row.get(value)?,
        expires_at: decode_timestamp(&expires_at)?,
        sliding: sliding.map(ticks_to_duration).transpose()?,
        absolute: absolute.as_deref().map(decode_timestamp).transpose()?,
    })
}

// == Identifier Quoting ==
/// Wraps an identifier in double quotes, doubling any embedded quote.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified_name(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(schema) => format!("{}.{}", quote_identifier(schema), quote_identifier(name)),
        None => quote_identifier(name),
    }
}
