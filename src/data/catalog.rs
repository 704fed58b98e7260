//! Check catalog.
//!
//! Maps check IDs to the claim identifier used in reports, plus the
//! descriptive metadata (description, remediation, references and category
//! classification) copied into every result record.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TAG_COMMON: &str = "common";
pub const TAG_EXTENDED: &str = "extended";
pub const TAG_FAREDGE: &str = "faredge";
pub const TAG_TELCO: &str = "telco";

/// Tags the `all` label filter keyword expands to.
pub const DEFAULT_TAGS: [&str; 4] = [TAG_COMMON, TAG_EXTENDED, TAG_FAREDGE, TAG_TELCO];

pub const NO_DOCUMENTED_PROCESS: &str = "There is no documented exception process for this.";
pub const NO_REFERENCE: &str = "No Reference Document Specified";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("check {check_id} has no catalog entry")]
    MissingEntry { check_id: String },
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON catalog {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid TOML catalog {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unsupported catalog format for {path}, expected .json or .toml")]
    UnsupportedFormat { path: PathBuf },
}

/// Stable external identifier of a check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimId {
    pub id: String,
    pub suite: String,
    pub tags: String,
}

/// Whether a check is required for a given deployment category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Mandatory,
    Optional,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryClassification {
    #[serde(rename = "Extended", default, skip_serializing_if = "Option::is_none")]
    pub extended: Option<Classification>,
    #[serde(rename = "FarEdge", default, skip_serializing_if = "Option::is_none")]
    pub far_edge: Option<Classification>,
    #[serde(rename = "NonTelco", default, skip_serializing_if = "Option::is_none")]
    pub non_telco: Option<Classification>,
    #[serde(rename = "Telco", default, skip_serializing_if = "Option::is_none")]
    pub telco: Option<Classification>,
}

impl CategoryClassification {
    /// Same classification for every category.
    pub fn all(classification: Classification) -> Self {
        CategoryClassification {
            extended: Some(classification),
            far_edge: Some(classification),
            non_telco: Some(classification),
            telco: Some(classification),
        }
    }
}

/// Catalog entry as written by hand or in a catalog file.
///
/// Optional fields get their defaults when the entry is added to a
/// [`Catalog`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpec {
    pub test_id: String,
    pub suite: String,
    pub description: String,
    #[serde(default)]
    pub remediation: String,
    #[serde(default)]
    pub exception_process: String,
    #[serde(default)]
    pub best_practice_reference: String,
    #[serde(default)]
    pub qe: bool,
    #[serde(default)]
    pub category_classification: CategoryClassification,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Catalog entry with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub identifier: ClaimId,
    pub description: String,
    pub remediation: String,
    pub best_practice_reference: String,
    pub exception_process: String,
    pub tags: Vec<String>,
    pub qe: bool,
    pub category_classification: CategoryClassification,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "entry")]
    entries: Vec<EntrySpec>,
}

/// Check ID to catalog entry lookup table.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry and return its claim identifier.
    ///
    /// The check ID is `<suite>-<test_id>`. A blank exception process or
    /// reference is replaced by a placeholder text and an entry without tags
    /// is tagged `common`.
    pub fn add_entry(&mut self, spec: EntrySpec) -> ClaimId {
        let exception_process = if spec.exception_process.trim().is_empty() {
            NO_DOCUMENTED_PROCESS.to_string()
        } else {
            spec.exception_process
        };
        let best_practice_reference = if spec.best_practice_reference.trim().is_empty() {
            NO_REFERENCE.to_string()
        } else {
            spec.best_practice_reference
        };
        let tags = if spec.tags.is_empty() {
            vec![TAG_COMMON.to_string()]
        } else {
            spec.tags
        };

        let identifier = ClaimId {
            id: format!("{}-{}", spec.suite, spec.test_id),
            suite: spec.suite,
            tags: tags.join(","),
        };

        self.entries.insert(
            identifier.id.clone(),
            CatalogEntry {
                identifier: identifier.clone(),
                description: spec.description,
                remediation: spec.remediation,
                best_practice_reference,
                exception_process,
                tags,
                qe: spec.qe,
                category_classification: spec.category_classification,
            },
        );

        identifier
    }

    pub fn lookup(&self, check_id: &str) -> Result<&CatalogEntry, CatalogError> {
        self.entries
            .get(check_id)
            .ok_or_else(|| CatalogError::MissingEntry {
                check_id: check_id.to_string(),
            })
    }

    pub fn contains(&self, check_id: &str) -> bool {
        self.entries.contains_key(check_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Add every entry of `other`, replacing entries with the same check ID.
    pub fn merge(&mut self, other: Catalog) {
        self.entries.extend(other.entries);
    }

    pub fn from_json_str(text: &str, path: &Path) -> Result<Self, CatalogError> {
        let file: CatalogFile = serde_json::from_str(text).map_err(|source| CatalogError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_specs(file.entries))
    }

    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(text).map_err(|source| CatalogError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_specs(file.entries))
    }

    /// Load a catalog file, picking the format from the file extension.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text, path),
            Some("toml") => Self::from_toml_str(&text, path),
            _ => Err(CatalogError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    fn from_specs(specs: Vec<EntrySpec>) -> Self {
        let mut catalog = Catalog::new();
        for spec in specs {
            catalog.add_entry(spec);
        }
        catalog
    }
}
