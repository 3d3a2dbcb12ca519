//! Issuing-agency rules: legacy code renames and division-bearing agencies.
//!
//! The defaults are baked into the binary from `rules/agencies.toml` via
//! [`include_str!`]; `--rules` swaps in a file with the same shape.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;

/// Rules TOML embedded at compile time.
const EMBEDDED_RULES: &str = include_str!("../rules/agencies.toml");

/// Errors loading agency rules.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    /// The rules file could not be read.
    #[error("Failed to read agency rules {path}: {source}")]
    Io {
        /// Path of the rules file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The rules did not parse.
    #[error("Invalid agency rules in {origin}: {source}")]
    Parse {
        /// Path or description of the rules source.
        origin: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// How issuing agencies are normalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgencyRules {
    /// Agencies (canonical names) whose division is kept.
    #[serde(default)]
    pub division_agencies: BTreeSet<String>,
    /// Legacy agency code -> canonical name.
    #[serde(default)]
    pub renames: BTreeMap<String, String>,
}

impl AgencyRules {
    /// The built-in rules.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::Parse`] if the embedded TOML is malformed.
    pub fn embedded() -> Result<Self, RulesError> {
        Self::from_toml_str(EMBEDDED_RULES, "embedded agency rules")
    }

    /// Loads rules from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, RulesError> {
        let text = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let rules = Self::from_toml_str(&text, &path.display().to_string())?;
        log::info!(
            "Loaded agency rules from {}: {} rename(s), {} division agenc(ies)",
            path.display(),
            rules.renames.len(),
            rules.division_agencies.len()
        );
        Ok(rules)
    }

    /// Parses rules from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError::Parse`] if the text is not valid rules TOML.
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, RulesError> {
        toml::from_str(text).map_err(|source| RulesError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Canonical name for an agency code.
    #[must_use]
    pub fn canonical_agency(&self, agency: &str) -> String {
        let agency = agency.trim();
        self.renames
            .get(agency)
            .map_or_else(|| agency.to_string(), Clone::clone)
    }

    /// Whether tickets from `agency` (canonical name) keep their division.
    #[must_use]
    pub fn keeps_division(&self, agency: &str) -> bool {
        self.division_agencies.contains(agency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_rules_parse() {
        let rules = AgencyRules::embedded().unwrap();
        assert_eq!(rules.canonical_agency("RED LI"), "PRISON");
        assert!(rules.keeps_division("POLICE"));
        assert!(!rules.keeps_division("PPA"));
    }

    #[test]
    fn unknown_agencies_pass_through_trimmed() {
        let rules = AgencyRules::embedded().unwrap();
        assert_eq!(rules.canonical_agency(" PPA "), "PPA");
    }

    #[test]
    fn custom_rules_replace_defaults() {
        let rules = AgencyRules::from_toml_str(
            "division_agencies = [\"PPA\"]\n[renames]\nOLD = \"NEW\"\n",
            "test",
        )
        .unwrap();
        assert_eq!(rules.canonical_agency("OLD"), "NEW");
        assert_eq!(rules.canonical_agency("RED LI"), "RED LI");
        assert!(rules.keeps_division("PPA"));
        assert!(!rules.keeps_division("POLICE"));
    }

    #[test]
    fn legacy_behaviour_keeps_every_division_but_ppa() {
        let rules = AgencyRules::from_toml_str(
            "division_agencies = [\"POLICE\", \"SEPTA\", \"TEMPLE\", \"PRISON\"]\n\
             [renames]\n\"RED LI\" = \"PRISON\"\n",
            "test",
        )
        .unwrap();
        let prison = rules.canonical_agency("RED LI");
        assert!(rules.keeps_division(&prison));
        assert!(rules.keeps_division("SEPTA"));
        assert!(!rules.keeps_division("PPA"));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = AgencyRules::from_toml_str("renamez = {}\n", "test").unwrap_err();
        assert!(matches!(err, RulesError::Parse { .. }));
    }

    #[test]
    fn loads_from_file() {
        let path = std::env::temp_dir().join(format!("parking_rules_{}.toml", std::process::id()));
        std::fs::write(&path, "division_agencies = [\"POLICE\", \"SEPTA\"]\n").unwrap();

        let rules = AgencyRules::load(&path).unwrap();
        assert!(rules.keeps_division("SEPTA"));
        assert!(rules.renames.is_empty());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = AgencyRules::load(Path::new("/nonexistent/agencies.toml")).unwrap_err();
        assert!(matches!(err, RulesError::Io { .. }));
    }
}
