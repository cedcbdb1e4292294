use crate::case::{CaseError, CaseSpec, HarnessCase};
use crate::catalog;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while assembling the list of cases to run.
#[derive(Error, Debug)]
pub enum SuiteError {
    #[error("Suite I/O error: {0}")]
    Io(String),

    #[error("Failed to parse suite file {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid case in {origin}: {source}")]
    Case {
        origin: String,
        #[source]
        source: CaseError,
    },

    #[error("Case id '{0}' is defined more than once")]
    DuplicateCase(String),
}

/// On-disk layout of a suite file: a list of `[[case]]` tables.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct SuiteFile {
    #[serde(default, rename = "case")]
    cases: Vec<CaseSpec>,
}

fn validate_all(specs: Vec<CaseSpec>, origin: &str) -> Result<Vec<HarnessCase>, SuiteError> {
    specs
        .into_iter()
        .map(|spec| {
            HarnessCase::try_from(spec).map_err(|source| SuiteError::Case {
                origin: origin.to_string(),
                source,
            })
        })
        .collect()
}

/// Parses and validates the cases of one suite document.
pub fn parse_suite(text: &str, path: &Path) -> Result<Vec<HarnessCase>, SuiteError> {
    let file: SuiteFile = toml::from_str(text).map_err(|e| SuiteError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    validate_all(file.cases, &format!("{path:?}"))
}

pub fn load_suite_file(path: &Path) -> Result<Vec<HarnessCase>, SuiteError> {
    let text = fs::read_to_string(path)
        .map_err(|e| SuiteError::Io(format!("Failed to read suite file {path:?}: {e}")))?;
    parse_suite(&text, path)
}

/// Loads suites from files, or from every `*.toml` file directly inside a
/// directory (in name order, not recursive).
pub fn load_suites(paths: &[PathBuf]) -> Result<Vec<HarnessCase>, SuiteError> {
    let mut cases = Vec::new();
    for path in paths {
        if path.is_file() {
            cases.extend(load_suite_file(path)?);
        } else if path.is_dir() {
            let mut files = Vec::new();
            for entry in fs::read_dir(path).map_err(|e| {
                SuiteError::Io(format!("Failed to read suite directory {path:?}: {e}"))
            })? {
                let entry = entry.map_err(|e| {
                    SuiteError::Io(format!("Failed to read entry in suite directory {path:?}: {e}"))
                })?;
                let file = entry.path();
                if file.is_file() && file.extension().is_some_and(|ext| ext == "toml") {
                    files.push(file);
                }
            }
            files.sort();
            for file in files {
                let loaded = load_suite_file(&file)?;
                tracing::debug!(file = ?file, cases = loaded.len(), "suite file loaded");
                cases.extend(loaded);
            }
        } else {
            return Err(SuiteError::Io(format!(
                "Suite path {path:?} is neither a file nor a directory"
            )));
        }
    }
    Ok(cases)
}

/// The cases of one invocation: the built-in catalog (optionally), then every
/// suite path, narrowed to ids containing `filter`. Ids must be unique.
pub fn assemble(
    builtin: bool,
    paths: &[PathBuf],
    filter: Option<&str>,
) -> Result<Vec<HarnessCase>, SuiteError> {
    let mut cases = Vec::new();
    if builtin {
        cases.extend(catalog::builtin_cases().map_err(|source| SuiteError::Case {
            origin: "built-in catalog".to_string(),
            source,
        })?);
    }
    cases.extend(load_suites(paths)?);

    let mut seen = HashSet::new();
    for case in &cases {
        if !seen.insert(case.id()) {
            return Err(SuiteError::DuplicateCase(case.id().to_string()));
        }
    }

    if let Some(filter) = filter {
        cases.retain(|case| case.id().contains(filter));
    }
    Ok(cases)
}
