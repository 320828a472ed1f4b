//! Note repository
//!
//! Notes are append-only: the CRM never edits a note in place, so inserts
//! ignore identifiers the cache already holds.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use dealflow_core::NoteRepository;
use dealflow_domain::{Note, Result as DomainResult};
use rusqlite::{params, Row};
use tokio::task;

use super::manager::DbManager;
use super::{map_join_error, map_sql_error};

/// SQLite implementation of [`NoteRepository`]
pub struct SqliteNoteRepository {
    db: Arc<DbManager>,
}

impl SqliteNoteRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NoteRepository for SqliteNoteRepository {
    async fn insert_notes(&self, notes: &[Note]) -> DomainResult<usize> {
        let db = Arc::clone(&self.db);
        let notes = notes.to_vec();

        task::spawn_blocking(move || -> DomainResult<usize> {
            let mut conn = db.get_connection()?;
            let tx = conn.transaction().map_err(map_sql_error)?;

            let mut inserted = 0;
            for note in &notes {
                inserted += tx
                    .execute(
                        "INSERT OR IGNORE INTO notes (id, deal_id, author, content, noted_at)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![
                            note.id,
                            note.deal_id,
                            note.author,
                            note.content,
                            note.noted_at.timestamp()
                        ],
                    )
                    .map_err(map_sql_error)?;
            }

            tx.commit().map_err(map_sql_error)?;
            Ok(inserted)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn recent_notes(&self, deal_id: i64, limit: usize) -> DomainResult<Vec<Note>> {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<Vec<Note>> {
            let conn = db.get_connection()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, deal_id, author, content, noted_at FROM notes
                     WHERE deal_id = ?1 ORDER BY noted_at DESC, id DESC LIMIT ?2",
                )
                .map_err(map_sql_error)?;

            let notes = stmt
                .query_map(params![deal_id, limit as i64], map_note_row)
                .map_err(map_sql_error)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(map_sql_error)?;

            Ok(notes)
        })
        .await
        .map_err(map_join_error)?
    }
}

fn map_note_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    let noted_at_secs: i64 = row.get(4)?;
    let noted_at = DateTime::from_timestamp(noted_at_secs, 0).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Integer,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("timestamp out of range: {noted_at_secs}"),
            )),
        )
    })?;

    Ok(Note {
        id: row.get(0)?,
        deal_id: row.get(1)?,
        author: row.get(2)?,
        content: row.get(3)?,
        noted_at,
    })
}
