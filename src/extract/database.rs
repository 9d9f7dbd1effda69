//! SQLite capability: every text cell of every user table, one row per line.

use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use super::{ExtractionError, Extractor};

pub const EXTENSIONS: &[&str] = &["sqlite", "sqlite3", "db"];

const MAX_ROWS_PER_TABLE: usize = 100_000;

pub struct DatabaseExtractor;

impl Extractor for DatabaseExtractor {
    fn capability(&self) -> &str {
        "database"
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let conn = open_immutable(path)
            .map_err(|err| ExtractionError::ReadFailure(format!("cannot open database: {err}")))?;
        let tables = list_tables(&conn)
            .map_err(|err| ExtractionError::ReadFailure(format!("not a readable database: {err}")))?;

        let mut lines = Vec::new();
        for table in tables {
            if let Err(err) = dump_table(&conn, &table, &mut lines) {
                debug!("skipping table {table}: {err}");
            }
        }
        Ok(lines.join("\n"))
    }
}

/// Open read-only and immutable so SQLite never touches journals or WAL
/// files next to the evidence.
pub fn open_immutable(path: &Path) -> rusqlite::Result<Connection> {
    let uri = format!("file:{}?immutable=1", uri_escape(&path.to_string_lossy()));
    Connection::open_with_flags(
        uri,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
}

fn uri_escape(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for ch in path.chars() {
        match ch {
            '%' | '?' | '#' | ' ' => out.push_str(&format!("%{:02X}", ch as u32)),
            _ => out.push(ch),
        }
    }
    out
}

fn list_tables(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect()
}

fn dump_table(conn: &Connection, table: &str, lines: &mut Vec<String>) -> rusqlite::Result<()> {
    let sql = format!("SELECT * FROM \"{}\"", table.replace('"', "\"\""));
    let mut stmt = conn.prepare(&sql)?;
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut count = 0usize;
    while let Some(row) = rows.next()? {
        let mut cells = Vec::new();
        for idx in 0..columns {
            if let ValueRef::Text(bytes) = row.get_ref(idx)? {
                let text = String::from_utf8_lossy(bytes);
                let text = text.trim();
                if !text.is_empty() {
                    cells.push(text.to_string());
                }
            }
        }
        if !cells.is_empty() {
            lines.push(cells.join(" "));
        }
        count += 1;
        if count >= MAX_ROWS_PER_TABLE {
            debug!("table {table} truncated at {MAX_ROWS_PER_TABLE} rows");
            break;
        }
    }
    Ok(())
}
