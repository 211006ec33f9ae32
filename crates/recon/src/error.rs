use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconError {
    /// The record carries neither an order number nor the
    /// (machine_code, creation_time) fallback pair.
    UnresolvableKey { file: String, row: usize },
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvableKey { file, row } => {
                write!(f, "file '{file}', row {row}: no resolvable business key")
            }
        }
    }
}

impl std::error::Error for ReconError {}
