use serde::{Deserialize, Serialize};

/// Where a rendered value is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Literal text in the markup.
    Static,
    /// A variable definition (local, imported, or a JSON/script module value).
    Variable,
    /// A prop value at a component call site.
    Prop,
}

/// Result of every resolution query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    /// Path relative to the project root, forward slashes.
    pub file: String,
    pub line: u32,
    /// The trimmed source line.
    pub snippet: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,
    /// Line of the definition when it differs from where the value is used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition_line: Option<u32>,
}

impl SourceLocation {
    pub fn new(
        file: impl Into<String>,
        line: u32,
        snippet: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            file: file.into(),
            line,
            snippet: snippet.into(),
            source_type,
            variable_name: None,
            definition_line: None,
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variable_name = Some(name.into());
        self
    }

    pub fn with_definition_line(mut self, line: u32) -> Self {
        self.definition_line = Some(line);
        self
    }
}
