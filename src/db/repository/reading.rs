use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::*;

pub fn delete_readings_for_exam(conn: &Connection, exam_id: &Uuid) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM exam_readings WHERE exam_id = ?1",
        params![exam_id.to_string()],
    )?;
    Ok(deleted)
}

/// Insert all readings in one transaction; either every row lands or none.
pub fn insert_readings(conn: &Connection, readings: &[NormalizedReading]) -> Result<usize, DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO exam_readings
             (id, exam_id, name, category, display_value, value, unit, reference_min,
              reference_max, status, deviation, observation, layman_explanation,
              possible_causes, original_name, normalization_confidence, normalization_kind,
              rescaled_by, derived_from, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20)",
        )?;
        for r in readings {
            let causes = serde_json::to_string(&r.possible_causes)?;
            stmt.execute(params![
                r.id.to_string(),
                r.exam_id.to_string(),
                r.name,
                r.category,
                r.display_value,
                r.value,
                r.unit,
                r.reference_min,
                r.reference_max,
                r.status.as_str(),
                r.deviation,
                r.observation,
                r.layman_explanation,
                causes,
                r.original_name,
                r.normalization_confidence,
                r.normalization_kind.map(|k| k.as_str()),
                r.rescaled_by,
                r.derived_from,
                r.created_at.to_rfc3339(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(readings.len())
}

pub fn get_readings_for_exam(
    conn: &Connection,
    exam_id: &Uuid,
) -> Result<Vec<NormalizedReading>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, exam_id, name, category, display_value, value, unit, reference_min,
         reference_max, status, deviation, observation, layman_explanation, possible_causes,
         original_name, normalization_confidence, normalization_kind, rescaled_by,
         derived_from, created_at
         FROM exam_readings WHERE exam_id = ?1 ORDER BY rowid ASC",
    )?;

    let rows = stmt.query_map(params![exam_id.to_string()], |row| {
        Ok(ReadingRow {
            id: row.get(0)?,
            exam_id: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            display_value: row.get(4)?,
            value: row.get(5)?,
            unit: row.get(6)?,
            reference_min: row.get(7)?,
            reference_max: row.get(8)?,
            status: row.get(9)?,
            deviation: row.get(10)?,
            observation: row.get(11)?,
            layman_explanation: row.get(12)?,
            possible_causes: row.get(13)?,
            original_name: row.get(14)?,
            normalization_confidence: row.get(15)?,
            normalization_kind: row.get(16)?,
            rescaled_by: row.get(17)?,
            derived_from: row.get(18)?,
            created_at: row.get(19)?,
        })
    })?;

    let mut readings = Vec::new();
    for row in rows {
        readings.push(reading_from_row(row?)?);
    }
    Ok(readings)
}

pub fn replace_rejected_readings(
    conn: &Connection,
    exam_id: &Uuid,
    rejected: &[RejectedReading],
) -> Result<usize, DatabaseError> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM rejected_readings WHERE exam_id = ?1",
        params![exam_id.to_string()],
    )?;
    for r in rejected {
        tx.execute(
            "INSERT INTO rejected_readings
             (id, exam_id, original_name, original_value, reason, suggestions, similarity, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                r.id.to_string(),
                r.exam_id.to_string(),
                r.original_name,
                r.original_value,
                r.reason,
                serde_json::to_string(&r.suggestions)?,
                r.similarity,
                r.created_at.to_rfc3339(),
            ],
        )?;
    }
    tx.commit()?;
    Ok(rejected.len())
}

pub fn get_rejected_for_exam(
    conn: &Connection,
    exam_id: &Uuid,
) -> Result<Vec<RejectedReading>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, exam_id, original_name, original_value, reason, suggestions, similarity, created_at
         FROM rejected_readings WHERE exam_id = ?1 ORDER BY rowid ASC",
    )?;
    let rows = stmt.query_map(params![exam_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, Option<f64>>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut out = Vec::new();
    for row in rows {
        let (id, exam_id, original_name, original_value, reason, suggestions, similarity, created_at) = row?;
        out.push(RejectedReading {
            id: parse_uuid(&id)?,
            exam_id: parse_uuid(&exam_id)?,
            original_name,
            original_value,
            reason,
            suggestions: serde_json::from_str(&suggestions)?,
            similarity,
            created_at: parse_timestamp(&created_at)?,
        });
    }
    Ok(out)
}

// Internal row type for NormalizedReading mapping
struct ReadingRow {
    id: String,
    exam_id: String,
    name: String,
    category: Option<String>,
    display_value: String,
    value: Option<f64>,
    unit: Option<String>,
    reference_min: Option<f64>,
    reference_max: Option<f64>,
    status: String,
    deviation: Option<f64>,
    observation: Option<String>,
    layman_explanation: Option<String>,
    possible_causes: String,
    original_name: Option<String>,
    normalization_confidence: Option<f64>,
    normalization_kind: Option<String>,
    rescaled_by: Option<f64>,
    derived_from: Option<String>,
    created_at: String,
}

fn reading_from_row(row: ReadingRow) -> Result<NormalizedReading, DatabaseError> {
    Ok(NormalizedReading {
        id: parse_uuid(&row.id)?,
        exam_id: parse_uuid(&row.exam_id)?,
        name: row.name,
        category: row.category,
        display_value: row.display_value,
        value: row.value,
        unit: row.unit,
        reference_min: row.reference_min,
        reference_max: row.reference_max,
        status: ReadingStatus::from_str(&row.status)?,
        deviation: row.deviation,
        observation: row.observation,
        layman_explanation: row.layman_explanation,
        possible_causes: serde_json::from_str(&row.possible_causes)?,
        original_name: row.original_name,
        normalization_confidence: row.normalization_confidence,
        normalization_kind: row
            .normalization_kind
            .as_deref()
            .map(NormalizationKind::from_str)
            .transpose()?,
        rescaled_by: row.rescaled_by,
        derived_from: row.derived_from,
        created_at: parse_timestamp(&row.created_at)?,
    })
}
