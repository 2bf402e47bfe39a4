use thiserror::Error;

use crate::params::ParameterSet;

/// Main error type for the Sieve system
#[derive(Error, Debug)]
pub enum SvError {
    #[error("Experiment process failed ({}): input {input}, parameters [{parameters}]", describe_exit(.exit_code))]
    ProcessFailed {
        input: String,
        parameters: ParameterSet,
        exit_code: Option<i32>,
    },

    #[error("Not implemented: the experiment type must provide `{operation}()`")]
    NotImplemented { operation: &'static str },

    #[error("Experiment process has not been started")]
    NotStarted,

    #[error("Experiment not finished: cannot {operation} before the process has completed")]
    NotFinished { operation: &'static str },

    #[error("Sample budget exceeded in round {round}: size {size} is larger than the maximum {max_size}")]
    BudgetExceeded {
        round: usize,
        size: usize,
        max_size: usize,
    },

    #[error("Search produced no surviving combination after {rounds} round(s)")]
    NoSurvivors { rounds: usize },

    #[error("Score parse error: {message}")]
    ScoreParse { message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SvError {
    /// Whether this error signals an incomplete integration rather than a
    /// runtime failure. Such errors are never absorbed by the schedulers.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, SvError::NotImplemented { .. })
    }

    pub fn is_process_failure(&self) -> bool {
        matches!(self, SvError::ProcessFailed { .. })
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Result type alias for Sieve operations
pub type SvResult<T> = Result<T, SvError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::SvError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SvError::Config(format!($($arg)*))
    };
}
