use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::reading::{lenient, ExtractedReading, RejectedEntry};

/// Terminal and non-terminal states reported by the extraction service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
    #[serde(other)]
    Processing,
}

/// Answer of a status query (and body of a completion webhook).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(rename = "s3Key", default)]
    pub storage_key: Option<String>,
}

/// Structured extraction output. Two historical shapes exist: a nested
/// `dados_basicos` block and flat top-level fields; both are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionPayload {
    #[serde(rename = "dados_basicos", default, deserialize_with = "lenient::optional_block")]
    pub basic_data: Option<BasicData>,
    #[serde(rename = "laboratorio", default, deserialize_with = "lenient::optional_text")]
    pub laboratory: Option<String>,
    #[serde(rename = "paciente", default, deserialize_with = "lenient::optional_text")]
    pub patient_name: Option<String>,
    #[serde(rename = "data_exame", default, deserialize_with = "lenient::optional_text")]
    pub exam_date: Option<String>,
    #[serde(rename = "total_exames", default, deserialize_with = "lenient::number")]
    pub total_readings: Option<f64>,
    #[serde(rename = "exames", default, deserialize_with = "lenient::entries")]
    pub readings: Vec<ExtractedReading>,
    #[serde(default, deserialize_with = "lenient::optional_block")]
    pub metadata: Option<PayloadMetadata>,
    #[serde(rename = "biomarcadores_rejeitados", default, deserialize_with = "lenient::entries")]
    pub rejected: Vec<RejectedEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicData {
    #[serde(rename = "laboratorio", default, deserialize_with = "lenient::optional_text")]
    pub laboratory: Option<String>,
    #[serde(rename = "paciente", default, deserialize_with = "lenient::optional_text")]
    pub patient_name: Option<String>,
    #[serde(rename = "data_exame", default, deserialize_with = "lenient::optional_text")]
    pub exam_date: Option<String>,
    #[serde(rename = "medico_solicitante", default, deserialize_with = "lenient::optional_text")]
    pub requesting_physician: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    #[serde(rename = "total_exames", default, deserialize_with = "lenient::number")]
    pub total_readings: Option<f64>,
    #[serde(rename = "total_rejeitados", default, deserialize_with = "lenient::number")]
    pub total_rejected: Option<f64>,
}

impl ExtractionPayload {
    pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    pub fn laboratory(&self) -> Option<&str> {
        self.basic_data
            .as_ref()
            .and_then(|b| b.laboratory.as_deref())
            .or(self.laboratory.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn patient_name(&self) -> Option<&str> {
        self.basic_data
            .as_ref()
            .and_then(|b| b.patient_name.as_deref())
            .or(self.patient_name.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// Printed exam date, ISO or day-first (`01/03/2024`). Unparseable dates are dropped.
    pub fn exam_date(&self) -> Option<NaiveDate> {
        let raw = self
            .basic_data
            .as_ref()
            .and_then(|b| b.exam_date.as_deref())
            .or(self.exam_date.as_deref())?
            .trim();
        ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"]
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
    }

    /// `metadata.total_exames`, else top-level `total_exames`, else 0.
    pub fn biomarker_count(&self) -> u32 {
        self.metadata
            .as_ref()
            .and_then(|m| m.total_readings)
            .or(self.total_readings)
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n.round() as u32)
            .unwrap_or(0)
    }
}
