//! Rule-set loading.
//!
//! The rule set is a YAML key-value document. Its text is embedded verbatim in
//! both the generation and the judgment prompt, so the judge checks against
//! exactly what the generator was told.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_yaml::Value;
use tracing::debug;

/// Canonical rules shared by the Generator and the Judge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    source: PathBuf,
    payload: String,
}

impl RuleSet {
    /// Load and check a rule set from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let payload = fs::read_to_string(path)
            .with_context(|| format!("read rule set {}", path.display()))?;
        let rules = Self::from_text(path, payload)?;
        debug!(path = %path.display(), bytes = rules.payload.len(), "rule set loaded");
        Ok(rules)
    }

    /// Build a rule set from already loaded text; `source` is only used in messages.
    pub fn from_text(source: impl Into<PathBuf>, payload: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let payload = payload.into();
        let value: Value = serde_yaml::from_str(&payload)
            .with_context(|| format!("parse rule set {}", source.display()))?;
        match value {
            Value::Mapping(map) if !map.is_empty() => {}
            Value::Mapping(_) => bail!("rule set {} is an empty mapping", source.display()),
            _ => bail!(
                "rule set {} must be a key-value mapping at the top level",
                source.display()
            ),
        }
        Ok(Self { source, payload })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Rule text exactly as loaded.
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_mapping_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("rules.yml");
        let text = "rules:\n  - every node needs an id # keep comments\n";
        fs::write(&path, text).expect("write");

        let rules = RuleSet::load(&path).expect("load");
        assert_eq!(rules.payload(), text);
        assert_eq!(rules.source(), path.as_path());
    }

    #[test]
    fn rejects_non_mapping_documents() {
        let err = RuleSet::from_text("rules.yml", "- just\n- a list\n").unwrap_err();
        assert!(err.to_string().contains("key-value mapping"));

        let err = RuleSet::from_text("rules.yml", "{}\n").unwrap_err();
        assert!(err.to_string().contains("empty mapping"));
    }

    #[test]
    fn missing_file_reports_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = RuleSet::load(&temp.path().join("absent.yml")).unwrap_err();
        assert!(err.to_string().contains("absent.yml"));
    }
}
