use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Fatal pipeline failures. Each variant maps to a distinct process exit code.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("required snapshot missing: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("warehouse error: {0:#}")]
    Store(anyhow::Error),

    #[error("snapshot error: {0:#}")]
    Snapshot(anyhow::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EtlError {
    pub fn exit_code(&self) -> i32 {
        match self {
            EtlError::MissingInput { .. } => 2,
            EtlError::Store(_) => 3,
            EtlError::Snapshot(_) | EtlError::Config(_) => 1,
        }
    }
}

/// Non-fatal conditions absorbed at a stage boundary and reported in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Rows dropped during staging preparation for lacking a required key.
    RowValidation { table: String, dropped: usize },
    /// The injury stage failed and was skipped.
    OptionalStage { stage: String, reason: String },
    /// Injury snapshot lacked some of the projected columns.
    DroppedColumns { table: String, columns: Vec<String> },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::RowValidation { table, dropped } => {
                write!(f, "{table}: dropped {dropped} row(s) missing a required key")
            }
            Warning::OptionalStage { stage, reason } => {
                write!(f, "{stage} skipped: {reason}")
            }
            Warning::DroppedColumns { table, columns } => {
                write!(f, "{table}: missing column(s) {}", columns.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_category() {
        let missing = EtlError::MissingInput {
            path: PathBuf::from("transformed/dim_players.parquet"),
        };
        assert_eq!(missing.exit_code(), 2);
        assert_eq!(EtlError::Store(anyhow::anyhow!("locked")).exit_code(), 3);
        assert_eq!(EtlError::Snapshot(anyhow::anyhow!("corrupt")).exit_code(), 1);
        assert_eq!(EtlError::Config("bad url".to_string()).exit_code(), 1);
    }

    #[test]
    fn warnings_serialize_with_kind_tag() {
        let warning = Warning::RowValidation {
            table: "stg_players".to_string(),
            dropped: 3,
        };
        let json = serde_json::to_string(&warning).expect("serialize");
        assert_eq!(json, r#"{"kind":"row_validation","table":"stg_players","dropped":3}"#);
    }
}
