//! Document record operations.

use rusqlite::{OptionalExtension, params};

use super::Database;
use super::models::{Document, format_timestamp};
use crate::error::{DatabaseError, ServiceResult};

const DOCUMENT_COLUMNS: &str = "id, name, user_id, file_extension, size_bytes, created_at";

impl Database {
    /// Insert a new document
    pub fn insert_document(&self, doc: &Document) -> ServiceResult<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO documents (id, name, user_id, file_extension, size_bytes, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                doc.id,
                doc.name,
                doc.user_id,
                doc.file_extension,
                doc.size_bytes as i64,
                format_timestamp(&doc.created_at),
            ],
        )
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    /// Get a document by ID
    pub fn get_document(&self, id: &str) -> ServiceResult<Option<Document>> {
        let conn = self.conn()?;

        let doc = conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
                Document::from_row,
            )
            .optional()
            .map_err(DatabaseError::Query)?;

        Ok(doc)
    }

    /// List documents, newest first, optionally restricted to one owner
    pub fn list_documents(&self, user_id: Option<&str>) -> ServiceResult<Vec<Document>> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents \
                 WHERE (?1 IS NULL OR user_id = ?1) ORDER BY created_at DESC"
            ))
            .map_err(DatabaseError::Query)?;

        let rows = stmt
            .query_map(params![user_id], Document::from_row)
            .map_err(DatabaseError::Query)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row.map_err(DatabaseError::Query)?);
        }

        Ok(docs)
    }
}
