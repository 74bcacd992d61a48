//! Error types for capreg-reconcile.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use capreg_core::{Error, Result};

/// Steps of a reconciliation pass, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Start,
    RegisterCapabilities,
    RegisterNodeOperators,
    BuildNodeParams,
    WriteNodes,
    MatchDon,
    WriteDon,
    Done,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::RegisterCapabilities => write!(f, "RegisterCapabilities"),
            Self::RegisterNodeOperators => write!(f, "RegisterNodeOperators"),
            Self::BuildNodeParams => write!(f, "BuildNodeParams"),
            Self::WriteNodes => write!(f, "WriteNodes"),
            Self::MatchDon => write!(f, "MatchDON"),
            Self::WriteDon => write!(f, "WriteDON"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// A reconciliation pass that stopped early.
///
/// Nothing is rolled back; re-running the pass from the start is safe.
#[derive(Debug, Error)]
#[error("{failed}{} failed after {last_completed}: {source}", don_label(.don))]
pub struct PassError {
    pub last_completed: Step,
    pub failed: Step,
    /// Name of the DON being processed, for per-DON steps.
    pub don: Option<String>,
    #[source]
    pub source: Error,
}

fn don_label(don: &Option<String>) -> String {
    match don {
        Some(name) => format!(" (DON {name})"),
        None => String::new(),
    }
}

impl PassError {
    /// Check whether the pass stopped before touching the ledger.
    pub fn is_validation(&self) -> bool {
        self.source.is_validation()
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {var}={value:?}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
}
