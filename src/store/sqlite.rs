//! SQLite-backed repository.
//!
//! One connection guarded by a mutex. Every public method takes the lock
//! once, so readers always see whole committed writes and audit ids are
//! handed out in commit order.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, SubsecRound};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;

use super::{Repository, StoreError};
use crate::domain::{AuditEvent, EventType, Image, NewAuditEvent, Order, Patient, PendingOrder};

/// Fixed-width so text ordering matches time ordering
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS patients (
    patient_id    TEXT PRIMARY KEY,
    mrn           TEXT NOT NULL,
    first_name    TEXT NOT NULL,
    last_name     TEXT NOT NULL,
    date_of_birth TEXT NOT NULL,
    gender        TEXT NOT NULL,
    allergies     TEXT
);

CREATE TABLE IF NOT EXISTS orders (
    order_id       TEXT PRIMARY KEY,
    patient_id     TEXT NOT NULL REFERENCES patients(patient_id),
    procedure_code TEXT NOT NULL,
    priority       TEXT NOT NULL,
    created_at     TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS images (
    image_id   TEXT PRIMARY KEY,
    order_id   TEXT NOT NULL REFERENCES orders(order_id),
    patient_id TEXT NOT NULL REFERENCES patients(patient_id),
    file_path  TEXT NOT NULL,
    study_date TEXT NOT NULL,
    modality   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_images_order ON images(order_id);
CREATE INDEX IF NOT EXISTS idx_images_patient ON images(patient_id, study_date);

CREATE TABLE IF NOT EXISTS audit_events (
    event_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp  TEXT NOT NULL,
    event_type TEXT NOT NULL,
    ref_id     TEXT NOT NULL,
    order_id   TEXT,
    detail     TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_order ON audit_events(order_id);
"#;

const AUDIT_COLUMNS: &str = "event_id, timestamp, event_type, ref_id, order_id, detail";
const IMAGE_COLUMNS: &str = "image_id, order_id, patient_id, file_path, study_date, modality";
const PATIENT_COLUMNS: &str =
    "patient_id, mrn, first_name, last_name, date_of_birth, gender, allergies";

/// Repository over a single SQLite database
pub struct SqliteRepository {
    conn: Mutex<Connection>,

    /// Database file (None for in-memory)
    path: Option<PathBuf>,
}

impl SqliteRepository {
    /// Open (or create) a database file and apply the schema
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // journal_mode returns a row, so it cannot go through execute
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.execute_batch(SCHEMA)?;

        debug!(path = %path.display(), "Opened order database");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl Repository for SqliteRepository {
    fn insert_patient(&self, patient: &Patient) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO patients
                 (patient_id, mrn, first_name, last_name, date_of_birth, gender, allergies)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                patient.patient_id,
                patient.mrn,
                patient.first_name,
                patient.last_name,
                patient.date_of_birth.format(DATE_FORMAT).to_string(),
                patient.gender,
                patient.allergies,
            ],
        )
        .map_err(|e| map_insert_error(e, &patient.patient_id))?;
        Ok(())
    }

    fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>, StoreError> {
        let conn = self.lock()?;
        let patient = conn
            .query_row(
                &format!("SELECT {} FROM patients WHERE patient_id = ?1", PATIENT_COLUMNS),
                params![patient_id],
                patient_from_row,
            )
            .optional()?;
        Ok(patient)
    }

    fn query_all_patients(&self) -> Result<Vec<Patient>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM patients ORDER BY last_name, first_name, patient_id",
            PATIENT_COLUMNS
        ))?;
        let patients = stmt
            .query_map([], patient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patients)
    }

    fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let conn = self.lock()?;

        let patient_exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM patients WHERE patient_id = ?1)",
            params![order.patient_id],
            |row| row.get(0),
        )?;
        if !patient_exists {
            return Err(StoreError::UnknownPatient(order.patient_id.clone()));
        }

        conn.execute(
            "INSERT INTO orders (order_id, patient_id, procedure_code, priority, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                order.order_id,
                order.patient_id,
                order.procedure_code,
                order.priority,
                format_timestamp(order.created_at),
            ],
        )
        .map_err(|e| map_insert_error(e, &order.order_id))?;
        Ok(())
    }

    fn get_order(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let conn = self.lock()?;
        let order = conn
            .query_row(
                "SELECT order_id, patient_id, procedure_code, priority, created_at
                 FROM orders WHERE order_id = ?1",
                params![order_id],
                order_from_row,
            )
            .optional()?;
        Ok(order)
    }

    fn insert_image(&self, image: &Image) -> Result<(), StoreError> {
        let conn = self.lock()?;

        let owner: Option<String> = conn
            .query_row(
                "SELECT patient_id FROM orders WHERE order_id = ?1",
                params![image.order_id],
                |row| row.get(0),
            )
            .optional()?;

        match owner {
            None => return Err(StoreError::UnknownOrder(image.order_id.clone())),
            Some(expected) if expected != image.patient_id => {
                return Err(StoreError::PatientMismatch {
                    order_id: image.order_id.clone(),
                    expected,
                    actual: image.patient_id.clone(),
                });
            }
            Some(_) => {}
        }

        conn.execute(
            "INSERT INTO images (image_id, order_id, patient_id, file_path, study_date, modality)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                image.image_id,
                image.order_id,
                image.patient_id,
                image.file_path.to_string_lossy().into_owned(),
                format_timestamp(image.study_date),
                image.modality,
            ],
        )
        .map_err(|e| map_insert_error(e, &image.image_id))?;
        Ok(())
    }

    fn has_images(&self, order_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM images WHERE order_id = ?1)",
            params![order_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn append_audit(
        &self,
        timestamp: NaiveDateTime,
        event: &NewAuditEvent,
    ) -> Result<AuditEvent, StoreError> {
        let conn = self.lock()?;
        insert_audit(&conn, timestamp, event)
    }

    fn append_audit_batch(
        &self,
        timestamp: NaiveDateTime,
        events: &[NewAuditEvent],
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut committed = Vec::with_capacity(events.len());
        for event in events {
            committed.push(insert_audit(&tx, timestamp, event)?);
        }

        tx.commit()?;
        Ok(committed)
    }

    fn query_pending_orders(&self) -> Result<Vec<PendingOrder>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT o.order_id, o.patient_id, o.procedure_code, o.priority, o.created_at,
                    p.first_name, p.last_name
             FROM orders o
             JOIN patients p ON p.patient_id = o.patient_id
             WHERE NOT EXISTS (SELECT 1 FROM images i WHERE i.order_id = o.order_id)
             ORDER BY o.created_at DESC, o.rowid DESC",
        )?;

        let pending = stmt
            .query_map([], |row| {
                let order = order_from_row(row)?;
                let first: String = row.get(5)?;
                let last: String = row.get(6)?;
                Ok(PendingOrder {
                    order,
                    patient_name: format!("{} {}", first, last),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pending)
    }

    fn query_images_by_patient(&self, patient_id: &str) -> Result<Vec<Image>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM images WHERE patient_id = ?1 ORDER BY study_date ASC, rowid ASC",
            IMAGE_COLUMNS
        ))?;
        let images = stmt
            .query_map(params![patient_id], image_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(images)
    }

    fn query_audit_tail(&self, limit: usize) -> Result<Vec<AuditEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {cols} FROM (
                 SELECT {cols} FROM audit_events ORDER BY event_id DESC LIMIT ?1
             ) ORDER BY event_id ASC",
            cols = AUDIT_COLUMNS
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let events = stmt
            .query_map(params![limit], audit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn query_audit_for_order(&self, order_id: &str) -> Result<Vec<AuditEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM audit_events WHERE order_id = ?1 ORDER BY event_id ASC",
            AUDIT_COLUMNS
        ))?;
        let events = stmt
            .query_map(params![order_id], audit_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

fn insert_audit(
    conn: &Connection,
    timestamp: NaiveDateTime,
    event: &NewAuditEvent,
) -> Result<AuditEvent, StoreError> {
    // Stored precision, so the returned event equals what readers load
    let timestamp = timestamp.trunc_subsecs(6);

    conn.execute(
        "INSERT INTO audit_events (timestamp, event_type, ref_id, order_id, detail)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            format_timestamp(timestamp),
            event.event_type.as_str(),
            event.ref_id,
            event.order_id,
            event.detail,
        ],
    )?;

    Ok(AuditEvent {
        event_id: conn.last_insert_rowid(),
        timestamp,
        event_type: event.event_type.clone(),
        ref_id: event.ref_id.clone(),
        order_id: event.order_id.clone(),
        detail: event.detail.clone(),
    })
}

fn map_insert_error(err: rusqlite::Error, id: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            StoreError::DuplicateId(id.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let text: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&text, TIMESTAMP_PARSE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn patient_from_row(row: &Row<'_>) -> rusqlite::Result<Patient> {
    let dob: String = row.get(4)?;
    let date_of_birth = NaiveDate::parse_from_str(&dob, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(Patient {
        patient_id: row.get(0)?,
        mrn: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        date_of_birth,
        gender: row.get(5)?,
        allergies: row.get(6)?,
    })
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        order_id: row.get(0)?,
        patient_id: row.get(1)?,
        procedure_code: row.get(2)?,
        priority: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
    })
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<Image> {
    let path: String = row.get(3)?;
    Ok(Image {
        image_id: row.get(0)?,
        order_id: row.get(1)?,
        patient_id: row.get(2)?,
        file_path: PathBuf::from(path),
        study_date: timestamp_column(row, 4)?,
        modality: row.get(5)?,
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let event_type: String = row.get(2)?;
    Ok(AuditEvent {
        event_id: row.get(0)?,
        timestamp: timestamp_column(row, 1)?,
        event_type: EventType::from(event_type),
        ref_id: row.get(3)?,
        order_id: row.get(4)?,
        detail: row.get(5)?,
    })
}
