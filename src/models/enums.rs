use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(ProcessingStatus {
    Uploading => "uploading",
    Processing => "processing",
    Completed => "completed",
    Error => "error",
});

impl ProcessingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

str_enum!(QueueStatus {
    Pending => "pending",
    Uploading => "uploading",
    Processing => "processing",
    Completed => "completed",
    Error => "error",
});

str_enum!(NormalizationKind {
    Exact => "exact",
    Synonym => "synonym",
    Fuzzy => "fuzzy",
    Unmatched => "unmatched",
});

str_enum!(MatchingKind {
    AutoExact => "auto_exact",
    AutoCreated => "auto_created",
    Manual => "manual",
});

str_enum!(ReadingStatus {
    Normal => "normal",
    High => "alto",
    Low => "baixo",
    Altered => "alterado",
    Indeterminate => "indeterminado",
});

impl ReadingStatus {
    /// Lenient mapping for the untrusted status tag of an extracted reading.
    /// Unknown or missing tags become `Indeterminate`.
    pub fn from_tag(tag: Option<&str>) -> Self {
        let Some(tag) = tag else {
            return Self::Indeterminate;
        };
        match tag.trim().to_lowercase().as_str() {
            "normal" => Self::Normal,
            "alto" | "high" | "elevado" => Self::High,
            "baixo" | "low" => Self::Low,
            "alterado" | "abnormal" => Self::Altered,
            _ => Self::Indeterminate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn processing_status_round_trip() {
        for (variant, s) in [
            (ProcessingStatus::Uploading, "uploading"),
            (ProcessingStatus::Processing, "processing"),
            (ProcessingStatus::Completed, "completed"),
            (ProcessingStatus::Error, "error"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(ProcessingStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn unknown_value_is_invalid_enum() {
        let err = ProcessingStatus::from_str("failed").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }

    #[test]
    fn only_completed_and_error_are_terminal() {
        assert!(!ProcessingStatus::Uploading.is_terminal());
        assert!(!ProcessingStatus::Processing.is_terminal());
        assert!(ProcessingStatus::Completed.is_terminal());
        assert!(ProcessingStatus::Error.is_terminal());
    }

    #[test]
    fn reading_status_tag_is_lenient() {
        assert_eq!(ReadingStatus::from_tag(Some("ALTO")), ReadingStatus::High);
        assert_eq!(ReadingStatus::from_tag(Some(" baixo ")), ReadingStatus::Low);
        assert_eq!(ReadingStatus::from_tag(Some("???")), ReadingStatus::Indeterminate);
        assert_eq!(ReadingStatus::from_tag(None), ReadingStatus::Indeterminate);
    }

    #[test]
    fn queue_status_serializes_snake_case() {
        let json = serde_json::to_string(&QueueStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn matching_kind_display() {
        assert_eq!(MatchingKind::AutoCreated.to_string(), "auto_created");
    }
}
