//! SQLite storage for enrolled faces and attendance rows.

use attendo_core::{decode_gallery, Descriptor, DescriptorError, FaceRow, Identity};
use chrono::NaiveDate;
use rusqlite::params;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS faces (
    face_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name       TEXT NOT NULL,
    details    TEXT NOT NULL,
    descriptor TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    face_id INTEGER NOT NULL REFERENCES faces(face_id),
    date    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS attendance_date ON attendance(date);
";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("could not create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

/// Public view of an enrolled person.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub face_id: i64,
    pub name: String,
    pub details: String,
}

/// Handle to the attendance database.
///
/// Cheap to clone; every clone talks to the same background connection, so
/// calls from concurrent requests are serialized.
#[derive(Clone)]
pub struct FaceStore {
    conn: Connection,
}

impl FaceStore {
    /// Open (creating if needed) the database at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        Self::with_connection(conn).await
    }

    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        let version = conn
            .call(|conn| {
                conn.pragma_update(None, "foreign_keys", true)?;
                let version: i64 =
                    conn.query_row("SELECT user_version FROM pragma_user_version", [], |row| {
                        row.get(0)
                    })?;
                if version < 1 {
                    conn.execute_batch(SCHEMA_V1)?;
                    conn.pragma_update(None, "user_version", 1)?;
                }
                Ok(version)
            })
            .await?;
        tracing::debug!(from_version = version, "database schema ready");
        Ok(Self { conn })
    }

    /// Insert a newly registered face, returning its id.
    pub async fn insert_face(
        &self,
        name: String,
        details: String,
        descriptor: &Descriptor,
    ) -> Result<i64, StoreError> {
        let encoded = descriptor.encode()?;
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO faces (name, details, descriptor) VALUES (?1, ?2, ?3)",
                    params![name, details, encoded],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// Every enrolled face whose stored descriptor is valid, in id order.
    pub async fn load_gallery(&self) -> Result<Vec<Identity>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT face_id, name, details, descriptor FROM faces ORDER BY face_id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(FaceRow {
                            face_id: row.get(0)?,
                            name: row.get(1)?,
                            details: row.get(2)?,
                            descriptor: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let total = rows.len();
        let gallery = decode_gallery(rows);
        if gallery.len() < total {
            tracing::warn!(total, usable = gallery.len(), "some stored descriptors were skipped");
        }
        Ok(gallery)
    }

    pub async fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let students = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT face_id, name, details FROM faces ORDER BY face_id")?;
                let students = stmt
                    .query_map([], |row| {
                        Ok(Student {
                            face_id: row.get(0)?,
                            name: row.get(1)?,
                            details: row.get(2)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(students)
            })
            .await?;
        Ok(students)
    }

    pub async fn count_faces(&self) -> Result<i64, StoreError> {
        let count = self
            .conn
            .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM faces", [], |row| row.get(0))?))
            .await?;
        Ok(count)
    }

    /// Append one attendance row. Repeat entries for the same day are kept.
    pub async fn record_attendance(&self, face_id: i64, date: NaiveDate) -> Result<(), StoreError> {
        let date = date.format(DATE_FORMAT).to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO attendance (face_id, date) VALUES (?1, ?2)",
                    params![face_id, date],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Append one attendance row per id, all or nothing.
    pub async fn record_many(&self, face_ids: Vec<i64>, date: NaiveDate) -> Result<usize, StoreError> {
        let date = date.format(DATE_FORMAT).to_string();
        let inserted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt =
                        tx.prepare("INSERT INTO attendance (face_id, date) VALUES (?1, ?2)")?;
                    for id in &face_ids {
                        stmt.execute(params![id, date])?;
                    }
                }
                tx.commit()?;
                Ok(face_ids.len())
            })
            .await?;
        Ok(inserted)
    }

    /// Face ids recorded on `date`, in insertion order.
    #[cfg(test)]
    pub async fn attendance_on(&self, date: NaiveDate) -> Result<Vec<i64>, StoreError> {
        let date = date.format(DATE_FORMAT).to_string();
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT face_id FROM attendance WHERE date = ?1 ORDER BY id")?;
                let ids = stmt
                    .query_map([date], |row| row.get(0))?
                    .collect::<Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Overwrite a stored descriptor with raw text, bypassing validation.
    #[cfg(test)]
    pub async fn corrupt_descriptor(&self, face_id: i64, raw: &str) -> Result<(), StoreError> {
        let raw = raw.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE faces SET descriptor = ?1 WHERE face_id = ?2",
                    params![raw, face_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendo_core::DESCRIPTOR_DIM;

    fn descriptor(v: f32) -> Descriptor {
        Descriptor::try_from(vec![v; DESCRIPTOR_DIM]).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_list_students() {
        let store = FaceStore::open_in_memory().await.unwrap();
        let a = store.insert_face("Ada".into(), "CS-1".into(), &descriptor(0.1)).await.unwrap();
        let b = store.insert_face("Bob".into(), "CS-2".into(), &descriptor(0.2)).await.unwrap();
        assert!(b > a);

        let students = store.list_students().await.unwrap();
        assert_eq!(
            students,
            vec![
                Student { face_id: a, name: "Ada".into(), details: "CS-1".into() },
                Student { face_id: b, name: "Bob".into(), details: "CS-2".into() },
            ]
        );
        assert_eq!(store.count_faces().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_gallery_roundtrips_descriptors() {
        let store = FaceStore::open_in_memory().await.unwrap();
        let d = descriptor(0.25);
        let id = store.insert_face("Ada".into(), "".into(), &d).await.unwrap();
        let gallery = store.load_gallery().await.unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].id, id);
        assert_eq!(gallery[0].descriptor, d);
    }

    #[tokio::test]
    async fn test_gallery_skips_corrupt_rows() {
        let store = FaceStore::open_in_memory().await.unwrap();
        let bad = store.insert_face("Bad".into(), "".into(), &descriptor(0.0)).await.unwrap();
        let good = store.insert_face("Good".into(), "".into(), &descriptor(0.0)).await.unwrap();
        store.corrupt_descriptor(bad, "[1, 2, 3]").await.unwrap();

        let gallery = store.load_gallery().await.unwrap();
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].id, good);
        // Corrupt rows are still listed as students.
        assert_eq!(store.list_students().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_attendance_is_not_deduplicated() {
        let store = FaceStore::open_in_memory().await.unwrap();
        let id = store.insert_face("Ada".into(), "".into(), &descriptor(0.0)).await.unwrap();
        store.record_attendance(id, day()).await.unwrap();
        store.record_attendance(id, day()).await.unwrap();
        assert_eq!(store.attendance_on(day()).await.unwrap(), vec![id, id]);
    }

    #[tokio::test]
    async fn test_record_many_inserts_each_id() {
        let store = FaceStore::open_in_memory().await.unwrap();
        let a = store.insert_face("A".into(), "".into(), &descriptor(0.0)).await.unwrap();
        let b = store.insert_face("B".into(), "".into(), &descriptor(0.0)).await.unwrap();
        let n = store.record_many(vec![b, a], day()).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.attendance_on(day()).await.unwrap(), vec![b, a]);
    }

    #[tokio::test]
    async fn test_record_many_unknown_id_writes_nothing() {
        let store = FaceStore::open_in_memory().await.unwrap();
        let a = store.insert_face("A".into(), "".into(), &descriptor(0.0)).await.unwrap();
        let result = store.record_many(vec![a, 9999], day()).await;
        assert!(matches!(result, Err(StoreError::Database(_))));
        assert!(store.attendance_on(day()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_creates_file_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("attendance.db");
        {
            let store = FaceStore::open(&path).await.unwrap();
            store.insert_face("Ada".into(), "".into(), &descriptor(0.0)).await.unwrap();
        }
        let store = FaceStore::open(&path).await.unwrap();
        assert_eq!(store.count_faces().await.unwrap(), 1);
    }
}
