use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::db::DatabaseError;
use crate::models::Patient;

pub fn insert_patient(
    conn: &Connection,
    full_name: &str,
    owner_id: Option<&str>,
) -> Result<Patient, DatabaseError> {
    let patient = Patient {
        id: Uuid::new_v4(),
        full_name: full_name.trim().to_string(),
        owner_id: owner_id.map(str::to_string),
        created_at: Utc::now(),
    };
    conn.execute(
        "INSERT INTO patients (id, full_name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            patient.id.to_string(),
            patient.full_name,
            patient.owner_id,
            patient.created_at.to_rfc3339(),
        ],
    )?;
    Ok(patient)
}

/// Patients visible to `owner_id`, or all patients when no owner is given.
pub fn list_patients(
    conn: &Connection,
    owner_id: Option<&str>,
) -> Result<Vec<Patient>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, full_name, owner_id, created_at FROM patients
         WHERE ?1 IS NULL OR owner_id = ?1
         ORDER BY full_name ASC",
    )?;
    let rows = stmt.query_map(params![owner_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
        ))
    })?;

    let mut patients = Vec::new();
    for row in rows {
        let (id, full_name, owner_id, created_at) = row?;
        patients.push(Patient {
            id: parse_uuid(&id)?,
            full_name,
            owner_id,
            created_at: parse_timestamp(&created_at)?,
        });
    }
    Ok(patients)
}
