use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};

// ---------------------------------------------------------------------------
// PipelineConfig
// ---------------------------------------------------------------------------

/// Options for one pipeline run. Every field has a default, so a JSON config
/// file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Field delimiter. Must be a single ASCII character.
    pub delimiter: char,
    /// Treat the first row as column names.
    pub has_header: bool,
    /// Abort the run on the first malformed row instead of skipping it.
    pub strict_parsing: bool,
    /// Count empty strings as missing values.
    pub empty_is_missing: bool,
    /// Field texts that are read as an explicit null (e.g. `"NULL"`, `"NA"`).
    pub null_markers: Vec<String>,
    /// Only these columns must be present for a record to survive cleaning.
    /// `None` checks every column.
    pub required_columns: Option<Vec<String>>,
    /// Strip surrounding whitespace from every field before it is inspected.
    pub trim_fields: bool,
    /// Parsed rows between two progress events.
    pub progress_interval: u64,
    /// Capacity of the read-ahead queue. `None` parses on the calling thread.
    pub read_ahead: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_header: true,
            strict_parsing: false,
            empty_is_missing: true,
            null_markers: Vec::new(),
            required_columns: None,
            trim_fields: false,
            progress_interval: 1000,
            read_ahead: None,
        }
    }
}

impl PipelineConfig {
    /// Load a config from a JSON file. Missing keys take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SweepError::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .map_err(|e| SweepError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject option combinations the parser cannot honour.
    pub fn validate(&self) -> Result<()> {
        if !self.delimiter.is_ascii() {
            return Err(SweepError::InvalidConfig(format!(
                "delimiter {:?} is not a single ASCII character",
                self.delimiter
            )));
        }
        if matches!(self.delimiter, '"' | '\r' | '\n') {
            return Err(SweepError::InvalidConfig(format!(
                "delimiter {:?} is reserved",
                self.delimiter
            )));
        }
        if self.progress_interval == 0 {
            return Err(SweepError::InvalidConfig(
                "progress_interval must be at least 1".into(),
            ));
        }
        if self.read_ahead == Some(0) {
            return Err(SweepError::InvalidConfig(
                "read_ahead capacity must be at least 1".into(),
            ));
        }
        if let Some(required) = &self.required_columns {
            if required.is_empty() {
                return Err(SweepError::InvalidConfig(
                    "required_columns is empty; omit it to check every column".into(),
                ));
            }
        }
        Ok(())
    }

    /// The delimiter as the byte the CSV reader/writer expects.
    pub fn delimiter_byte(&self) -> u8 {
        // validate() guarantees ASCII
        self.delimiter as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.delimiter, ',');
        assert!(config.has_header);
        assert!(!config.strict_parsing);
        assert!(config.empty_is_missing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_delimiters() {
        for delimiter in ['"', '\n', 'é'] {
            let config = PipelineConfig {
                delimiter,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(SweepError::InvalidConfig(_))));
        }
    }

    #[test]
    fn rejects_zero_capacities() {
        let config = PipelineConfig {
            read_ahead: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            progress_interval: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "delimiter": ";", "strict_parsing": true }}"#).unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.delimiter, ';');
        assert!(config.strict_parsing);
        assert!(config.has_header);
        assert_eq!(config.progress_interval, 1000);
    }

    #[test]
    fn missing_config_file_is_source_unavailable() {
        let err = PipelineConfig::from_json_file(Path::new("/definitely/not/here.json"))
            .unwrap_err();
        assert!(matches!(err, SweepError::SourceUnavailable { .. }));
    }
}
