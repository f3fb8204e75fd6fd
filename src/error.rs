use std::path::PathBuf;
use thiserror::Error;

/// Errors raised inside the locator. Resolution entry points never surface
/// these; they degrade to "not found" at the boundary.
#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parse error in {file} at {line}:{column}: {message}")]
    Parse {
        file: String,
        line: u32,
        column: u32,
        message: String,
    },
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML frontmatter error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LocatorError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LocatorError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn parse(file: &str, line: u32, column: u32, message: impl Into<String>) -> Self {
        LocatorError::Parse {
            file: file.to_string(),
            line,
            column,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LocatorError>;
