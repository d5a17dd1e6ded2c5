//! Input gate consulted before database and file operations.

use std::path::Path;

/// What a path is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// A regular, non-empty SQL script.
    SqlScript,
    /// A file or directory that exists.
    File,
}

/// Boolean predicate over an input path.
pub trait InputValidator: Send + Sync {
    fn validate(&self, path: &Path, kind: InputKind) -> bool;
}

/// Filesystem-backed validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsInputValidator;

impl InputValidator for FsInputValidator {
    fn validate(&self, path: &Path, kind: InputKind) -> bool {
        let valid = match (kind, std::fs::metadata(path)) {
            (InputKind::SqlScript, Ok(meta)) => meta.is_file() && meta.len() > 0,
            (InputKind::File, Ok(_)) => true,
            (_, Err(_)) => false,
        };
        if !valid {
            tracing::debug!(path = %path.display(), kind = ?kind, "Input failed validation");
        }
        valid
    }
}
