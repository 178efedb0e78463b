//! Absolute leukocyte differential counts computed from percentages.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::catalog::{Differential, MarkerKind};
use super::normalize::Normalized;
use super::text;
use crate::models::{NormalizationKind, NormalizedReading};

pub const ABSOLUTE_UNIT: &str = "/mm³";

/// Non-fatal reason a derivation could not run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivationWarning {
    /// Percentages were present but no total leukocyte reading was.
    MissingTotal { percentages: usize },
    /// The total leukocyte reading had no usable number.
    NonNumericTotal { display_value: String },
}

impl std::fmt::Display for DerivationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingTotal { percentages } => write!(
                f,
                "{percentages} differential percentage(s) without a total leukocyte count"
            ),
            Self::NonNumericTotal { display_value } => {
                write!(f, "total leukocyte count is not numeric: {display_value:?}")
            }
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct Derivation {
    pub readings: Vec<NormalizedReading>,
    pub warnings: Vec<DerivationWarning>,
}

fn differential(n: &Normalized) -> Option<Differential> {
    match n.marker {
        MarkerKind::Differential(d) => Some(d),
        _ => None,
    }
}

/// A differential reported as a share of the total rather than a count.
fn is_percentage(n: &Normalized) -> bool {
    let unit = n.reading.unit.as_deref().map(str::trim).unwrap_or("");
    if unit.contains('%') {
        return true;
    }
    if n.reading.name.contains('%') {
        return true;
    }
    unit.is_empty() && n.reading.value.is_some_and(|v| v <= 100.0)
}

/// The total leukocyte reading, preferring a direct catalog hit over a
/// fuzzy one such as "Leucócitos totais no sangue".
fn leukocyte_total(retained: &[Normalized]) -> Option<&Normalized> {
    let totals = || retained.iter().filter(|n| n.marker == MarkerKind::WhiteCells);
    totals()
        .find(|n| n.catalog_match != Some(NormalizationKind::Fuzzy))
        .or_else(|| totals().next())
}

/// Total leukocytes in cells/mm³, undoing any magnitude correction.
fn absolute_total(n: &Normalized) -> Option<f64> {
    let value = n.reading.value?;
    if let Some(factor) = n.scale.factor() {
        return Some(value * factor);
    }
    let unit = text::fold(n.reading.unit.as_deref().unwrap_or(""));
    let in_thousands = unit.contains("mil")
        || unit.contains("10³")
        || unit.contains("10^3")
        || unit.starts_with("k/");
    if in_thousands && value < 1000.0 {
        Some(value * 1000.0)
    } else {
        Some(value)
    }
}

fn scaled(pct: Option<f64>, total: f64) -> Option<f64> {
    pct.map(|p| (p / 100.0 * total).round())
}

/// Derive absolute counts for every retained percentage differential.
///
/// Derived rows are appended by the caller, never replacing a source row.
/// A subtype whose absolute count is already present is skipped.
pub fn derive_absolute_counts(exam_id: Uuid, retained: &[Normalized]) -> Derivation {
    let percentages: Vec<&Normalized> = retained
        .iter()
        .filter(|n| differential(n).is_some() && is_percentage(n))
        .collect();
    if percentages.is_empty() {
        return Derivation::default();
    }

    let Some(total_reading) = leukocyte_total(retained) else {
        tracing::warn!(%exam_id, count = percentages.len(), "Differential percentages without total leukocytes");
        return Derivation {
            readings: Vec::new(),
            warnings: vec![DerivationWarning::MissingTotal {
                percentages: percentages.len(),
            }],
        };
    };
    let Some(total) = absolute_total(total_reading) else {
        tracing::warn!(
            %exam_id,
            display_value = %total_reading.reading.display_value,
            "Total leukocytes not numeric, skipping absolute counts"
        );
        return Derivation {
            readings: Vec::new(),
            warnings: vec![DerivationWarning::NonNumericTotal {
                display_value: total_reading.reading.display_value.clone(),
            }],
        };
    };

    let has_absolute = |d: Differential| {
        retained
            .iter()
            .any(|n| differential(n) == Some(d) && !is_percentage(n) && n.reading.value.is_some())
    };

    let mut readings = Vec::new();
    for source in percentages {
        let Some(subtype) = differential(source) else { continue };
        if has_absolute(subtype) {
            tracing::debug!(name = %source.reading.name, "Absolute count already reported");
            continue;
        }
        let Some(count) = scaled(source.reading.value, total) else {
            tracing::debug!(name = %source.reading.name, "Percentage not numeric, nothing to derive");
            continue;
        };

        let r = &source.reading;
        readings.push(NormalizedReading {
            id: Uuid::new_v4(),
            exam_id,
            name: format!("{} (absoluto)", r.name),
            category: r.category.clone(),
            display_value: format!("{count:.0}"),
            value: Some(count),
            unit: Some(ABSOLUTE_UNIT.to_string()),
            reference_min: scaled(r.reference_min, total),
            reference_max: scaled(r.reference_max, total),
            status: r.status,
            deviation: None,
            observation: None,
            layman_explanation: None,
            possible_causes: Vec::new(),
            original_name: None,
            normalization_confidence: r.normalization_confidence,
            normalization_kind: r.normalization_kind,
            rescaled_by: None,
            derived_from: Some(r.name.clone()),
            created_at: Utc::now(),
        });
    }

    Derivation {
        readings,
        warnings: Vec::new(),
    }
}
