use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// No adapter recognizes the file's content or extension.
    UnsupportedFormat { name: String },
    /// The format was recognized but the content does not parse.
    Corrupt { name: String, detail: String },
    /// The file (or archive entry) yielded zero data rows.
    Empty { name: String },
    /// Archive nested deeper than the recursion budget allows.
    ArchiveTooDeep { name: String, max_depth: usize },
    /// Archive holds more entries than the budget allows.
    ArchiveTooManyEntries { name: String, max_entries: usize },
    /// A decompressed entry exceeds the per-entry size budget or the
    /// whole-archive expansion ratio.
    ArchiveTooLarge { name: String, detail: String },
    Io { name: String, detail: String },
}

impl AdapterError {
    pub fn io(name: &str, err: std::io::Error) -> Self {
        Self::Io { name: name.to_string(), detail: err.to_string() }
    }

    pub fn corrupt(name: &str, detail: impl Into<String>) -> Self {
        Self::Corrupt { name: name.to_string(), detail: detail.into() }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedFormat { name } => {
                write!(f, "'{name}': unsupported file format")
            }
            Self::Corrupt { name, detail } => write!(f, "'{name}': corrupt file: {detail}"),
            Self::Empty { name } => write!(f, "'{name}': no data rows"),
            Self::ArchiveTooDeep { name, max_depth } => {
                write!(f, "'{name}': archive nesting exceeds {max_depth} levels")
            }
            Self::ArchiveTooManyEntries { name, max_entries } => {
                write!(f, "'{name}': archive holds more than {max_entries} entries")
            }
            Self::ArchiveTooLarge { name, detail } => {
                write!(f, "'{name}': archive exceeds size budget: {detail}")
            }
            Self::Io { name, detail } => write!(f, "'{name}': {detail}"),
        }
    }
}

impl std::error::Error for AdapterError {}
