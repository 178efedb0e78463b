//! Single-reading normalization: canonical name, numeric value, magnitude
//! correction for hematology counts. Pure, no I/O.

use std::str::FromStr;

use chrono::Utc;
use uuid::Uuid;

use super::catalog::{self, MarkerKind};
use crate::models::*;

const RED_CELL_THRESHOLD: f64 = 100.0;
const RED_CELL_FACTOR: f64 = 1_000_000.0;
const RED_CELL_UNIT: &str = "milhões/mm³";
const COUNT_THRESHOLD: f64 = 10_000.0;
const COUNT_FACTOR: f64 = 1_000.0;
const COUNT_UNIT: &str = "mil/mm³";

/// Whether a value was moved to a different magnitude.
///
/// Always explicit: callers never compare values before and after to find out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleOutcome {
    Unchanged,
    Rescaled { factor: f64, unit: &'static str },
}

impl ScaleOutcome {
    pub fn factor(&self) -> Option<f64> {
        match self {
            Self::Unchanged => None,
            Self::Rescaled { factor, .. } => Some(*factor),
        }
    }
}

/// A normalized reading plus what the catalog knows about it.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub reading: NormalizedReading,
    pub scale: ScaleOutcome,
    pub marker: MarkerKind,
    /// How the catalog matched the name, independent of what the service claimed.
    pub catalog_match: Option<NormalizationKind>,
}

/// Parse a lab-printed number. Accepts `,` or `.` decimals, thousands
/// separators, comparison prefixes (`<5`, `>= 10`) and trailing text.
/// Anything without a leading number is `None`.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let trimmed = raw
        .trim()
        .trim_start_matches(['<', '>', '=', '≤', '≥', '~', ' ']);
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();

    let commas = compact.matches(',').count();
    let dots = compact.matches('.').count();
    let unified = match (commas, dots) {
        (0, 0) | (0, 1) => compact,
        (1, 0) => compact.replace(',', "."),
        (_, 0) => compact.replace(',', ""),
        (0, _) => compact.replace('.', ""),
        _ => {
            // Both present: the last one is the decimal mark.
            let last_comma = compact.rfind(',').unwrap_or(0);
            let last_dot = compact.rfind('.').unwrap_or(0);
            if last_comma > last_dot {
                compact.replace('.', "").replace(',', ".")
            } else {
                compact.replace(',', "")
            }
        }
    };

    let prefix = numeric_prefix(&unified);
    if prefix.is_empty() || prefix == "-" || prefix == "+" {
        return None;
    }
    prefix.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn numeric_prefix(s: &str) -> &str {
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    for (i, c) in s.char_indices() {
        match c {
            '-' | '+' if i == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end = i + c.len_utf8();
    }
    let prefix = &s[..end];
    if !seen_digit {
        return "";
    }
    prefix.trim_end_matches('.')
}

/// Magnitude correction for counts reported in absolute units.
pub fn rescale(marker: MarkerKind, value: f64) -> ScaleOutcome {
    match marker {
        MarkerKind::RedCells if value > RED_CELL_THRESHOLD => ScaleOutcome::Rescaled {
            factor: RED_CELL_FACTOR,
            unit: RED_CELL_UNIT,
        },
        MarkerKind::WhiteCells | MarkerKind::Platelets if value > COUNT_THRESHOLD => {
            ScaleOutcome::Rescaled {
                factor: COUNT_FACTOR,
                unit: COUNT_UNIT,
            }
        }
        _ => ScaleOutcome::Unchanged,
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Normalize one extracted reading for `exam_id`.
pub fn normalize_reading(exam_id: Uuid, raw: &ExtractedReading) -> Normalized {
    let found = catalog::lookup(&raw.name);
    let marker = found.map(|m| m.entry.kind).unwrap_or(MarkerKind::Plain);

    let name = match found {
        Some(m) => m.entry.canonical.to_string(),
        None => raw.name.trim().to_string(),
    };
    let category = non_empty(raw.category.as_deref())
        .or_else(|| found.map(|m| m.entry.category.to_string()));
    let mut unit = non_empty(raw.unit.as_deref())
        .or_else(|| found.and_then(|m| non_empty(Some(m.entry.unit))));

    let mut value = parse_numeric(&raw.value);
    let mut reference_min = raw.reference_min;
    let mut reference_max = raw.reference_max;

    let scale = value.map(|v| rescale(marker, v)).unwrap_or(ScaleOutcome::Unchanged);
    if let ScaleOutcome::Rescaled { factor, unit: scaled_unit } = scale {
        value = value.map(|v| v / factor);
        reference_min = reference_min.map(|v| v / factor);
        reference_max = reference_max.map(|v| v / factor);
        unit = Some(scaled_unit.to_string());
        tracing::debug!(name = %name, factor, "Rescaled hematology count");
    }

    let normalization_kind = raw
        .normalization_kind
        .as_deref()
        .and_then(|k| NormalizationKind::from_str(k.trim()).ok())
        .or(Some(found.map(|m| m.kind).unwrap_or(NormalizationKind::Unmatched)));
    let normalization_confidence = raw
        .normalization_confidence
        .or(found.map(|m| m.confidence));

    Normalized {
        reading: NormalizedReading {
            id: Uuid::new_v4(),
            exam_id,
            name,
            category,
            display_value: raw.value.trim().to_string(),
            value,
            unit,
            reference_min,
            reference_max,
            status: ReadingStatus::from_tag(raw.status.as_deref()),
            deviation: raw.deviation,
            observation: non_empty(raw.observation.as_deref()),
            layman_explanation: non_empty(raw.layman_explanation.as_deref()),
            possible_causes: raw.possible_causes.clone().unwrap_or_default(),
            original_name: non_empty(raw.original_name.as_deref())
                .or_else(|| non_empty(Some(raw.name.as_str()))),
            normalization_confidence,
            normalization_kind,
            rescaled_by: scale.factor(),
            derived_from: None,
            created_at: Utc::now(),
        },
        scale,
        marker,
        catalog_match: found.map(|m| m.kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_lab_formats() {
        assert_eq!(parse_numeric("14.2"), Some(14.2));
        assert_eq!(parse_numeric("14,2"), Some(14.2));
        assert_eq!(parse_numeric(" <5 "), Some(5.0));
        assert_eq!(parse_numeric(">= 60"), Some(60.0));
        assert_eq!(parse_numeric("5.250.000"), Some(5_250_000.0));
        assert_eq!(parse_numeric("7.200,50"), Some(7200.5));
        assert_eq!(parse_numeric("1,234.5"), Some(1234.5));
        assert_eq!(parse_numeric("98 mg/dL"), Some(98.0));
        assert_eq!(parse_numeric("-0.5"), Some(-0.5));
    }

    #[test]
    fn malformed_numbers_become_none() {
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric("Negativo"), None);
        assert_eq!(parse_numeric("."), None);
        assert_eq!(parse_numeric("-"), None);
    }

    #[test]
    fn red_cells_in_absolute_units_move_to_millions() {
        let raw = ExtractedReading::new("Hemácias", "5250000")
            .with_unit("/mm³")
            .with_reference(4_500_000.0, 5_900_000.0);
        let n = normalize_reading(Uuid::new_v4(), &raw);

        assert_eq!(
            n.scale,
            ScaleOutcome::Rescaled { factor: 1_000_000.0, unit: "milhões/mm³" }
        );
        assert_eq!(n.reading.value, Some(5.25));
        assert_eq!(n.reading.reference_min, Some(4.5));
        assert_eq!(n.reading.reference_max, Some(5.9));
        assert_eq!(n.reading.unit.as_deref(), Some("milhões/mm³"));
        assert_eq!(n.reading.rescaled_by, Some(1_000_000.0));
    }

    #[test]
    fn rescale_preserves_relative_position_in_range() {
        let raw = ExtractedReading::new("Plaquetas", "250000").with_reference(150_000.0, 450_000.0);
        let n = normalize_reading(Uuid::new_v4(), &raw);
        let k = n.scale.factor().unwrap();
        assert_eq!(k, 1000.0);

        let r = &n.reading;
        let (v, lo, hi) = (r.value.unwrap(), r.reference_min.unwrap(), r.reference_max.unwrap());
        assert!((lo * k - 150_000.0).abs() < 1e-6);
        assert!((hi * k - 450_000.0).abs() < 1e-6);
        let before = (250_000.0 - 150_000.0) / (450_000.0 - 150_000.0);
        let after = (v - lo) / (hi - lo);
        assert!((before - after).abs() < 1e-12);
    }

    #[test]
    fn values_already_in_range_are_unchanged() {
        let n = normalize_reading(Uuid::new_v4(), &ExtractedReading::new("Leucócitos", "7.2"));
        assert_eq!(n.scale, ScaleOutcome::Unchanged);
        assert_eq!(n.reading.value, Some(7.2));
        assert_eq!(n.reading.rescaled_by, None);

        // Same value as a rescale result would be, still reported as unchanged
        let n = normalize_reading(Uuid::new_v4(), &ExtractedReading::new("Hemácias", "5.25"));
        assert_eq!(n.scale, ScaleOutcome::Unchanged);
    }

    #[test]
    fn non_numeric_value_keeps_display_text() {
        let n = normalize_reading(Uuid::new_v4(), &ExtractedReading::new("Hemoglobina", "ilegível"));
        assert_eq!(n.reading.value, None);
        assert_eq!(n.reading.display_value, "ilegível");
        assert_eq!(n.scale, ScaleOutcome::Unchanged);
    }

    #[test]
    fn catalog_fills_name_category_and_unit() {
        let mut raw = ExtractedReading::new("hgb", "14,2");
        raw.status = Some("normal".into());
        let n = normalize_reading(Uuid::new_v4(), &raw);
        assert_eq!(n.reading.name, "Hemoglobina");
        assert_eq!(n.reading.category.as_deref(), Some("hematologico"));
        assert_eq!(n.reading.unit.as_deref(), Some("g/dL"));
        assert_eq!(n.reading.original_name.as_deref(), Some("hgb"));
        assert_eq!(n.reading.normalization_kind, Some(NormalizationKind::Synonym));
        assert_eq!(n.reading.status, ReadingStatus::Normal);
    }

    #[test]
    fn service_supplied_audit_fields_win() {
        let mut raw = ExtractedReading::new("Hemoglobina", "14").with_confidence(0.7);
        raw.normalization_kind = Some("fuzzy".into());
        raw.original_name = Some("Hemoglobina (HB)".into());
        let n = normalize_reading(Uuid::new_v4(), &raw);
        assert_eq!(n.reading.normalization_confidence, Some(0.7));
        assert_eq!(n.reading.normalization_kind, Some(NormalizationKind::Fuzzy));
        assert_eq!(n.reading.original_name.as_deref(), Some("Hemoglobina (HB)"));
    }

    #[test]
    fn unknown_biomarker_is_unmatched() {
        let n = normalize_reading(Uuid::new_v4(), &ExtractedReading::new(" Marcador X ", "3"));
        assert_eq!(n.reading.name, "Marcador X");
        assert_eq!(n.marker, MarkerKind::Plain);
        assert_eq!(n.reading.normalization_kind, Some(NormalizationKind::Unmatched));
    }
}
