use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{parse_date, parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

const EXAM_COLUMNS: &str = "id, patient_id, uploaded_by, storage_key, storage_file_name,
     exam_date, processing_status, processed_at, laboratory, patient_name_extracted,
     total_biomarkers, raw_payload, matching_kind, created_at, updated_at";

/// Create an exam in state `uploading`.
pub fn insert_exam(conn: &Connection, exam: &NewExam) -> Result<ExamRecord, DatabaseError> {
    let id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO exams (id, patient_id, uploaded_by, storage_key, storage_file_name,
         exam_date, processing_status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id.to_string(),
            exam.patient_id.map(|p| p.to_string()),
            exam.uploaded_by,
            exam.storage_key,
            exam.storage_file_name,
            exam.exam_date.map(|d| d.format("%Y-%m-%d").to_string()),
            ProcessingStatus::Uploading.as_str(),
            now,
        ],
    )?;
    require_exam(conn, &id)
}

pub fn get_exam(conn: &Connection, id: &Uuid) -> Result<Option<ExamRecord>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = ?1"),
            params![id.to_string()],
            exam_row_from_rusqlite,
        )
        .optional()?;
    row.map(exam_from_row).transpose()
}

pub fn get_exam_by_storage_key(
    conn: &Connection,
    storage_key: &str,
) -> Result<Option<ExamRecord>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {EXAM_COLUMNS} FROM exams WHERE storage_key = ?1
                 ORDER BY created_at DESC LIMIT 1"
            ),
            params![storage_key],
            exam_row_from_rusqlite,
        )
        .optional()?;
    row.map(exam_from_row).transpose()
}

/// All exams, oldest first.
pub fn list_exams(conn: &Connection) -> Result<Vec<ExamRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EXAM_COLUMNS} FROM exams ORDER BY created_at ASC, rowid ASC"
    ))?;
    let rows = stmt
        .query_map([], exam_row_from_rusqlite)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(exam_from_row).collect()
}

pub fn require_exam(conn: &Connection, id: &Uuid) -> Result<ExamRecord, DatabaseError> {
    get_exam(conn, id)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "exam".into(),
        id: id.to_string(),
    })
}

pub fn update_exam_status(
    conn: &Connection,
    id: &Uuid,
    status: ProcessingStatus,
) -> Result<ExamRecord, DatabaseError> {
    let changed = conn.execute(
        "UPDATE exams SET processing_status = ?1, updated_at = ?2 WHERE id = ?3",
        params![status.as_str(), Utc::now().to_rfc3339(), id.to_string()],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "exam".into(),
            id: id.to_string(),
        });
    }
    require_exam(conn, id)
}

/// Mark an exam completed and store its extraction metadata and raw payload.
pub fn complete_exam(
    conn: &Connection,
    id: &Uuid,
    metadata: &ExtractionMetadata,
    raw_payload: &serde_json::Value,
) -> Result<ExamRecord, DatabaseError> {
    let raw = serde_json::to_string(raw_payload)?;
    let changed = conn.execute(
        "UPDATE exams SET processing_status = ?1, processed_at = ?2, laboratory = ?3,
         patient_name_extracted = ?4, total_biomarkers = ?5, raw_payload = ?6, updated_at = ?7,
         exam_date = COALESCE(exam_date, ?9)
         WHERE id = ?8",
        params![
            ProcessingStatus::Completed.as_str(),
            metadata.processed_at.to_rfc3339(),
            metadata.laboratory,
            metadata.patient_name,
            metadata.total_biomarkers,
            raw,
            Utc::now().to_rfc3339(),
            id.to_string(),
            metadata.exam_date.map(|d| d.format("%Y-%m-%d").to_string()),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "exam".into(),
            id: id.to_string(),
        });
    }
    require_exam(conn, id)
}

pub fn assign_exam_patient(
    conn: &Connection,
    id: &Uuid,
    patient_id: &Uuid,
    kind: MatchingKind,
) -> Result<ExamRecord, DatabaseError> {
    let changed = conn.execute(
        "UPDATE exams SET patient_id = ?1, matching_kind = ?2, updated_at = ?3 WHERE id = ?4",
        params![
            patient_id.to_string(),
            kind.as_str(),
            Utc::now().to_rfc3339(),
            id.to_string()
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "exam".into(),
            id: id.to_string(),
        });
    }
    require_exam(conn, id)
}

// Internal row type for ExamRecord mapping
struct ExamRow {
    id: String,
    patient_id: Option<String>,
    uploaded_by: Option<String>,
    storage_key: String,
    storage_file_name: String,
    exam_date: Option<String>,
    processing_status: String,
    processed_at: Option<String>,
    laboratory: Option<String>,
    patient_name_extracted: Option<String>,
    total_biomarkers: Option<u32>,
    raw_payload: Option<String>,
    matching_kind: Option<String>,
    created_at: String,
    updated_at: String,
}

fn exam_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<ExamRow, rusqlite::Error> {
    Ok(ExamRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        uploaded_by: row.get(2)?,
        storage_key: row.get(3)?,
        storage_file_name: row.get(4)?,
        exam_date: row.get(5)?,
        processing_status: row.get(6)?,
        processed_at: row.get(7)?,
        laboratory: row.get(8)?,
        patient_name_extracted: row.get(9)?,
        total_biomarkers: row.get(10)?,
        raw_payload: row.get(11)?,
        matching_kind: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn exam_from_row(row: ExamRow) -> Result<ExamRecord, DatabaseError> {
    Ok(ExamRecord {
        id: parse_uuid(&row.id)?,
        patient_id: row.patient_id.as_deref().map(parse_uuid).transpose()?,
        uploaded_by: row.uploaded_by,
        storage_key: row.storage_key,
        storage_file_name: row.storage_file_name,
        exam_date: row.exam_date.as_deref().and_then(parse_date),
        processing_status: ProcessingStatus::from_str(&row.processing_status)?,
        processed_at: row.processed_at.as_deref().map(parse_timestamp).transpose()?,
        laboratory: row.laboratory,
        patient_name_extracted: row.patient_name_extracted,
        total_biomarkers: row.total_biomarkers,
        raw_payload: row
            .raw_payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        matching_kind: row
            .matching_kind
            .as_deref()
            .map(MatchingKind::from_str)
            .transpose()?,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}
