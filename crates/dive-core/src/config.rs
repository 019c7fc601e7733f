use serde::{Deserialize, Serialize};

/// Format-specific properties handed to the extraction collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableProperties {
    /// Number of rows above the header row (default: 0).
    pub header_level: usize,
    /// Timezone used when interpreting naive datetimes (default: "UTC").
    pub timezone: String,
    /// Locale hint for number/date formats (default: "en").
    pub language: String,
    /// Trim leading/trailing whitespace from string cells (default: false).
    pub trim_whitespaces: bool,
    /// Extra marker treated as a missing value (default: none).
    pub treat_these_as_na: Option<String>,
}

impl Default for TableProperties {
    fn default() -> Self {
        Self {
            header_level: 0,
            timezone: "UTC".to_string(),
            language: "en".to_string(),
            trim_whitespaces: false,
            treat_these_as_na: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rows returned by preview projections (default: 50).
    pub preview_rows: usize,
    /// Properties assigned to tables created without explicit ones.
    pub default_properties: TableProperties,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preview_rows: 50,
            default_properties: TableProperties::default(),
        }
    }
}
