use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::enums::{NormalizationKind, ReadingStatus};

/// One biomarker entry as returned by the extraction service.
///
/// Untrusted: any field may be missing, duplicated across entries or typed
/// inconsistently (numbers as strings, strings as numbers).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedReading {
    #[serde(rename = "nome", default, deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(rename = "categoria", default, deserialize_with = "lenient::optional_text")]
    pub category: Option<String>,
    #[serde(rename = "resultado", default, deserialize_with = "lenient::text")]
    pub value: String,
    #[serde(rename = "unidade", default, deserialize_with = "lenient::optional_text")]
    pub unit: Option<String>,
    #[serde(
        rename = "referencia_min",
        default,
        deserialize_with = "lenient::number"
    )]
    pub reference_min: Option<f64>,
    #[serde(
        rename = "referencia_max",
        default,
        deserialize_with = "lenient::number"
    )]
    pub reference_max: Option<f64>,
    #[serde(default, deserialize_with = "lenient::optional_text")]
    pub status: Option<String>,
    #[serde(
        rename = "desvio_percentual",
        default,
        deserialize_with = "lenient::number"
    )]
    pub deviation: Option<f64>,
    #[serde(rename = "observacao", default, deserialize_with = "lenient::optional_text")]
    pub observation: Option<String>,
    #[serde(rename = "explicacao_leiga", default, deserialize_with = "lenient::optional_text")]
    pub layman_explanation: Option<String>,
    #[serde(
        rename = "possiveis_causas_alteracao",
        default,
        deserialize_with = "lenient::optional_strings"
    )]
    pub possible_causes: Option<Vec<String>>,
    #[serde(rename = "nome_original", default, deserialize_with = "lenient::optional_text")]
    pub original_name: Option<String>,
    #[serde(
        rename = "confianca_normalizacao",
        default,
        deserialize_with = "lenient::number"
    )]
    pub normalization_confidence: Option<f64>,
    #[serde(rename = "tipo_normalizacao", default, deserialize_with = "lenient::optional_text")]
    pub normalization_kind: Option<String>,
}

impl ExtractedReading {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_reference(mut self, min: f64, max: f64) -> Self {
        self.reference_min = Some(min);
        self.reference_max = Some(max);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.normalization_confidence = Some(confidence);
        self
    }
}

/// A reading ready for persistence: canonical name, numeric value and bounds
/// on the same scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedReading {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub display_value: String,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub reference_min: Option<f64>,
    pub reference_max: Option<f64>,
    pub status: ReadingStatus,
    pub deviation: Option<f64>,
    pub observation: Option<String>,
    pub layman_explanation: Option<String>,
    pub possible_causes: Vec<String>,
    pub original_name: Option<String>,
    pub normalization_confidence: Option<f64>,
    pub normalization_kind: Option<NormalizationKind>,
    /// Factor the raw value was divided by, when a magnitude mismatch was corrected.
    pub rescaled_by: Option<f64>,
    /// Canonical name of the source reading for derived rows.
    pub derived_from: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Diagnostic entry the extraction service could not map to a known biomarker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RejectedEntry {
    #[serde(rename = "nome_original", default, deserialize_with = "lenient::text")]
    pub original_name: String,
    #[serde(rename = "valor_original", default, deserialize_with = "lenient::text")]
    pub original_value: String,
    #[serde(rename = "motivo", default, deserialize_with = "lenient::optional_text")]
    pub reason: Option<String>,
    #[serde(rename = "motivo_rejeicao", default, deserialize_with = "lenient::optional_text")]
    pub rejection_reason: Option<String>,
    #[serde(rename = "sugestoes", default, deserialize_with = "lenient::strings")]
    pub suggestions: Vec<String>,
    #[serde(rename = "similaridade", default, deserialize_with = "lenient::number")]
    pub similarity: Option<f64>,
}

impl RejectedEntry {
    /// Either reason field; the service has emitted both spellings.
    pub fn effective_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref().or(self.reason.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedReading {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub original_name: String,
    pub original_value: String,
    pub reason: Option<String>,
    pub suggestions: Vec<String>,
    pub similarity: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Deserializers that accept whatever shape the extraction service emits.
pub(crate) mod lenient {
    use super::*;
    use serde_json::Value;

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => other.to_string(),
        })
    }

    /// Like `text`, but absent, null and structured values are `None`.
    pub fn optional_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        })
    }

    /// A list of strings; a lone string becomes a one-element list and
    /// non-string items are dropped.
    pub fn strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        Ok(string_list(Option::<Value>::deserialize(d)?).unwrap_or_default())
    }

    pub fn optional_strings<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
        Ok(string_list(Option::<Value>::deserialize(d)?))
    }

    fn string_list(value: Option<Value>) -> Option<Vec<String>> {
        match value? {
            Value::Array(items) => Some(
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect(),
            ),
            Value::String(s) if !s.trim().is_empty() => Some(vec![s]),
            _ => None,
        }
    }

    /// A nested block that fails to deserialize is treated as absent.
    pub fn optional_block<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: serde::de::DeserializeOwned,
    {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
            _ => None,
        })
    }

    /// Entries that fail to deserialize are dropped one by one instead of
    /// failing the whole list.
    pub fn entries<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: serde::de::DeserializeOwned,
    {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match serde_json::from_value(item) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping malformed extraction entry");
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => crate::pipeline::ingest::normalize::parse_numeric(&s),
            _ => None,
        })
    }
}
