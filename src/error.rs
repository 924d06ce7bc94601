//! Error types for ccforge.
//!
//! Library code returns these typed errors; the CLI wraps them in
//! `anyhow` with extra context.

use std::path::PathBuf;
use thiserror::Error;

/// Problems in the manifest or in the project graph it describes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("project '{0}' is declared more than once")]
    DuplicateProject(String),

    #[error("project '{project}' depends on unknown project '{dependency}'")]
    MissingDependency { project: String, dependency: String },

    #[error("unknown project '{0}' in selection")]
    UnknownProject(String),

    #[error("working directory of '{project}' does not exist: {path}")]
    MissingDirectory { project: String, path: PathBuf },
}

/// Failures raised while preparing or running a build.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("could not find library '{library}' for project {project}")]
    MissingLibrary { project: String, library: String },

    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start worker pool: {0}")]
    Pool(String),
}

impl BuildError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dependency_message() {
        let err = ConfigError::MissingDependency {
            project: "app".to_string(),
            dependency: "core".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "project 'app' depends on unknown project 'core'"
        );
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err = BuildError::io(
            "failed to write",
            "/tmp/x.o",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().starts_with("failed to write /tmp/x.o"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
