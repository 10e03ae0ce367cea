//! Opening the catalog file and checking it before first use.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens (creating if needed) the catalog database file and applies pending
/// migrations.
///
/// # Side effects
/// - Emits `catalog_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    open_with("file", || Connection::open(path))
}

/// Opens an in-memory catalog database and applies all migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_with("memory", Connection::open_in_memory)
}

fn open_with(
    mode: &'static str,
    connect: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=catalog_open module=db status=start mode={mode}");

    let mut conn = match connect() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=catalog_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn) {
        Ok(()) => {
            info!(
                "event=catalog_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=catalog_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    verify_cascade(conn)
}

/// Refuses catalogs where deleting a subject would strand its notes.
fn verify_cascade(conn: &Connection) -> DbResult<()> {
    let enforced: bool = conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))?;
    if !enforced {
        return Err(DbError::BrokenCatalog(
            "foreign key enforcement is off".to_string(),
        ));
    }

    let mut stmt = conn.prepare(
        "SELECT \"table\", \"from\", on_delete FROM pragma_foreign_key_list('notes');",
    )?;
    let keys = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let cascades = keys.iter().any(|(table, column, on_delete)| {
        table == "subjects" && column == "subject_id" && on_delete.eq_ignore_ascii_case("CASCADE")
    });
    if !cascades {
        return Err(DbError::BrokenCatalog(
            "notes.subject_id does not cascade on subject delete".to_string(),
        ));
    }
    Ok(())
}
