//! Read-only view of the worker's own YAML configuration.
//!
//! Only the handful of fields shown before a run are read. Everything else in
//! the file belongs to the worker.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WorkerSummary {
    pub model_name: Option<String>,
    pub temperature: Option<f64>,
    pub num_workers: Option<u32>,
    pub max_personas: Option<serde_yaml::Value>,
}

impl WorkerSummary {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read worker config {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse worker config {}", path.display()))
    }

    /// `None` when the file is missing or unreadable.
    pub fn try_load(path: &Path) -> Option<Self> {
        if !path.is_file() {
            return None;
        }
        match Self::load(path) {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::debug!(error = %e, "worker config summary unavailable");
                None
            }
        }
    }

    /// Display lines for the fields that are present.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(model) = &self.model_name {
            lines.push(format!("Model: {}", model));
        }
        if let Some(t) = self.temperature {
            lines.push(format!("Temperature: {}", t));
        }
        if let Some(w) = self.num_workers {
            lines.push(format!("Workers: {}", w));
        }
        if let Some(max) = &self.max_personas {
            let shown = match max {
                serde_yaml::Value::Null => "all".to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::String(s) => s.clone(),
                other => format!("{:?}", other),
            };
            lines.push(format!("Max personas: {}", shown));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_reads_known_fields_and_ignores_the_rest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("openai_config.yaml");
        std::fs::write(
            &path,
            "model_name: gpt-4.1-mini\ntemperature: 0.0\nnum_workers: 8\nmax_personas: 20\nforce_regenerate: false\n",
        )
        .unwrap();

        let summary = WorkerSummary::load(&path).unwrap();
        assert_eq!(summary.model_name.as_deref(), Some("gpt-4.1-mini"));
        assert_eq!(summary.temperature, Some(0.0));
        assert_eq!(summary.num_workers, Some(8));
        assert_eq!(
            summary.lines(),
            vec![
                "Model: gpt-4.1-mini",
                "Temperature: 0",
                "Workers: 8",
                "Max personas: 20",
            ]
        );
    }

    #[test]
    fn test_try_load_missing_file() {
        let dir = tempdir().unwrap();
        assert!(WorkerSummary::try_load(&dir.path().join("absent.yaml")).is_none());
    }

    #[test]
    fn test_try_load_invalid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "model_name: [unclosed").unwrap();
        assert!(WorkerSummary::try_load(&path).is_none());
    }
}
