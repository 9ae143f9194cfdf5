//! Case file loader.
//!
//! Loads case files from disk and provides the built-in suite used when no
//! file is given.

use crate::schema::{CaseFile, Defaults, TestCase, lines};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The only case-file version understood.
pub const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported file format: {0} (expected .yaml, .yml, or .toml)")]
    UnsupportedFormat(String),
    #[error(
        "unsupported case file version {0} (expected {expected})",
        expected = SUPPORTED_VERSION
    )]
    UnsupportedVersion(u32),
    #[error("case {index}: timeout must be a positive number of seconds")]
    InvalidTimeout { index: usize },
}

/// A loaded suite together with the directory its relative paths refer to.
#[derive(Debug, Clone)]
pub struct LoadedSuite {
    pub file: CaseFile,
    /// Directory of the case file, `None` for the built-in suite.
    pub base_dir: Option<PathBuf>,
}

/// Load the case file at `path`, or the built-in suite when `path` is `None`.
pub fn load_suite(path: Option<&Path>) -> Result<LoadedSuite, LoadError> {
    match path {
        Some(path) => Ok(LoadedSuite {
            file: load_case_file(path)?,
            base_dir: Some(
                path.parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(Path::new("."))
                    .to_path_buf(),
            ),
        }),
        None => Ok(LoadedSuite {
            file: builtin_suite(),
            base_dir: None,
        }),
    }
}

/// Load and check a case file.
pub fn load_case_file(path: &Path) -> Result<CaseFile, LoadError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let file: CaseFile = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&contents)?,
        "toml" => toml::from_str(&contents)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };
    check(&file)?;
    Ok(file)
}

fn check(file: &CaseFile) -> Result<(), LoadError> {
    if file.version != SUPPORTED_VERSION {
        return Err(LoadError::UnsupportedVersion(file.version));
    }
    for (index, case) in file.cases.iter().enumerate() {
        if let Some(t) = case.timeout
            && !(t.is_finite() && t > 0.0)
        {
            return Err(LoadError::InvalidTimeout { index });
        }
    }
    Ok(())
}

/// The suite run when no case file is given.
pub fn builtin_suite() -> CaseFile {
    CaseFile {
        version: SUPPORTED_VERSION,
        defaults: Defaults::default(),
        cases: vec![
            TestCase::new("print 'hello world'", "hello world").named("literal print"),
            TestCase::new("print 2 +2*2", "6").named("arithmetic precedence"),
            TestCase::new("print 2, 5", lines(["2", "5"])).named("multi-value print"),
            TestCase::new("print 2, 2*25, 1", lines(["2", "50", "1"]))
                .named("mixed expressions"),
            TestCase::new("if true {43} else {21}", "43").named("conditional true branch"),
            TestCase::new("if true and false {43} else {21}", "21")
                .named("conditional with and"),
            TestCase::new(" 'a.txt' {  exists; size }  ", lines(["1", "47"]))
                .named("fixture file attributes"),
        ],
    }
}

/// Render a case file as YAML, for scaffolding.
pub fn to_yaml(file: &CaseFile) -> Result<String, LoadError> {
    Ok(serde_yaml::to_string(file)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn load_valid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
version: 1
cases:
  - code: "print 2, 5"
    expect: ["2", "5"]
"#
        )
        .unwrap();

        let cases = load_case_file(&path).unwrap();
        assert_eq!(cases.cases.len(), 1);
        assert_eq!(cases.cases[0].expected_output, "2\n5");
    }

    #[test]
    fn load_valid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.toml");
        std::fs::write(
            &path,
            r#"
[[cases]]
code = "print 2 +2*2"
expect = "6"
"#,
        )
        .unwrap();

        let cases = load_case_file(&path).unwrap();
        assert_eq!(cases.cases[0].source_code, "print 2 +2*2");
    }

    #[test]
    fn load_invalid_yaml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "invalid: [yaml: {").unwrap();
        assert!(matches!(load_case_file(&path), Err(LoadError::Yaml(_))));
    }

    #[test]
    fn load_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "invalid = [toml").unwrap();
        assert!(matches!(load_case_file(&path), Err(LoadError::Toml(_))));
    }

    #[test]
    fn unsupported_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.txt");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            load_case_file(&path),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn missing_file() {
        let err = load_case_file(Path::new("/no/such/cases.yaml")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
        assert!(err.to_string().contains("/no/such/cases.yaml"));
    }

    #[test]
    fn unsupported_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.yaml");
        std::fs::write(&path, "version: 2\ncases: []\n").unwrap();
        let err = load_case_file(&path).unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedVersion(2)));
        assert_eq!(
            err.to_string(),
            "unsupported case file version 2 (expected 1)"
        );
    }

    #[test]
    fn invalid_case_timeout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.yaml");
        std::fs::write(
            &path,
            "cases:\n  - code: print 1\n    expect: 1\n  - code: print 2\n    expect: 2\n    timeout: 0\n",
        )
        .unwrap();
        assert!(matches!(
            load_case_file(&path),
            Err(LoadError::InvalidTimeout { index: 1 })
        ));
    }

    #[test]
    fn load_suite_records_base_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.yaml");
        std::fs::write(&path, "cases: []\n").unwrap();
        let suite = load_suite(Some(&path)).unwrap();
        assert_eq!(suite.base_dir.as_deref(), Some(dir.path()));

        let builtin = load_suite(None).unwrap();
        assert!(builtin.base_dir.is_none());
        assert_eq!(builtin.file.cases.len(), 7);
    }

    #[test]
    fn builtin_suite_scenarios() {
        let suite = builtin_suite();
        let pairs: Vec<_> = suite
            .cases
            .iter()
            .map(|c| (c.source_code.as_str(), c.expected_output.as_str()))
            .collect();
        assert_eq!(
            pairs,
            [
                ("print 'hello world'", "hello world"),
                ("print 2 +2*2", "6"),
                ("print 2, 5", "2\n5"),
                ("print 2, 2*25, 1", "2\n50\n1"),
                ("if true {43} else {21}", "43"),
                ("if true and false {43} else {21}", "21"),
                (" 'a.txt' {  exists; size }  ", "1\n47"),
            ]
        );
    }

    #[test]
    fn scaffold_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cases.yaml");
        std::fs::write(&path, to_yaml(&builtin_suite()).unwrap()).unwrap();
        let reloaded = load_case_file(&path).unwrap();
        assert_eq!(reloaded.cases, builtin_suite().cases);
    }
}
