//! Single file operations: copy, move, delete.
//!
//! Semantics follow `cp -r`, `mv` and `rm -r`: a destination that is an
//! existing directory receives the source inside it, directories are handled
//! recursively, and a move across filesystems falls back to copy-then-delete.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;

use crate::resilience::types::{ActionError, ExitSignal, ResilienceError, ResilienceResult};

/// Cross-device link error (same value on Linux and macOS).
#[cfg(unix)]
const EXDEV: i32 = 18;

/// Supported file operation verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOperationKind {
    Copy,
    Move,
    Delete,
}

impl FileOperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOperationKind::Copy => "copy",
            FileOperationKind::Move => "move",
            FileOperationKind::Delete => "delete",
        }
    }

    pub fn requires_destination(&self) -> bool {
        !matches!(self, FileOperationKind::Delete)
    }
}

impl fmt::Display for FileOperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileOperationKind {
    type Err = ResilienceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" | "cp" => Ok(FileOperationKind::Copy),
            "move" | "mv" => Ok(FileOperationKind::Move),
            "delete" | "rm" | "remove" => Ok(FileOperationKind::Delete),
            other => Err(ResilienceError::InvalidInput(format!(
                "unsupported file operation: {}",
                other
            ))),
        }
    }
}

/// A validated file operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOperation {
    kind: FileOperationKind,
    source: PathBuf,
    destination: Option<PathBuf>,
}

impl FileOperation {
    /// Build an operation, checking required parameters.
    pub fn new(
        kind: FileOperationKind,
        source: impl Into<PathBuf>,
        destination: Option<PathBuf>,
    ) -> ResilienceResult<Self> {
        let source = source.into();
        if source.as_os_str().is_empty() {
            return Err(ResilienceError::InvalidInput(format!(
                "{} requires a source path",
                kind
            )));
        }
        let destination = destination.filter(|d| !d.as_os_str().is_empty());
        if kind.requires_destination() && destination.is_none() {
            return Err(ResilienceError::InvalidInput(format!(
                "{} of {} requires a destination",
                kind,
                source.display()
            )));
        }
        Ok(Self {
            kind,
            source,
            destination: if kind.requires_destination() { destination } else { None },
        })
    }

    pub fn copy(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> ResilienceResult<Self> {
        Self::new(FileOperationKind::Copy, source, Some(destination.into()))
    }

    pub fn move_to(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> ResilienceResult<Self> {
        Self::new(FileOperationKind::Move, source, Some(destination.into()))
    }

    pub fn delete(source: impl Into<PathBuf>) -> ResilienceResult<Self> {
        Self::new(FileOperationKind::Delete, source, None)
    }

    pub fn kind(&self) -> FileOperationKind {
        self.kind
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// Circuit name: `file_operation_<verb>_<source>`.
    pub fn operation_name(&self) -> String {
        format!("file_operation_{}_{}", self.kind, self.source.display())
    }

    /// Perform the operation once.
    pub async fn run(&self) -> Result<(), ActionError> {
        let result = match (self.kind, self.destination.as_deref()) {
            (FileOperationKind::Delete, _) => delete_path(&self.source).await,
            (FileOperationKind::Copy, Some(dest)) => {
                let target = resolve_destination(&self.source, dest).await;
                copy_path(&self.source, &target).await
            }
            (FileOperationKind::Move, Some(dest)) => {
                let target = resolve_destination(&self.source, dest).await;
                move_path(&self.source, &target).await
            }
            (kind, None) => Err(ActionError::new(
                ExitSignal::USAGE,
                format!("{} requires a destination", kind),
            )),
        };
        result.map_err(|e| {
            ActionError::new(
                e.exit_signal,
                format!("{} {}: {}", self.kind, self.source.display(), e.message),
            )
        })
    }
}

/// Existing directory destinations receive the source by name.
async fn resolve_destination(source: &Path, destination: &Path) -> PathBuf {
    match (fs::metadata(destination).await, source.file_name()) {
        (Ok(meta), Some(name)) if meta.is_dir() => destination.join(name),
        _ => destination.to_path_buf(),
    }
}

async fn delete_path(path: &Path) -> Result<(), ActionError> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Nothing to delete");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path).await?;
    } else {
        fs::remove_file(path).await?;
    }
    Ok(())
}

async fn copy_path(source: &Path, destination: &Path) -> Result<(), ActionError> {
    let meta = fs::metadata(source).await?;
    if meta.is_dir() {
        let from = fs::canonicalize(source).await?;
        if canonical_target(destination).await.starts_with(&from) {
            return Err(ActionError::new(
                ExitSignal::USAGE,
                format!(
                    "cannot copy directory {} into itself ({})",
                    source.display(),
                    destination.display()
                ),
            ));
        }
        return copy_dir_recursive(source, destination).await;
    }
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::copy(source, destination).await?;
    Ok(())
}

async fn copy_dir_recursive(source: &Path, destination: &Path) -> Result<(), ActionError> {
    let mut pending = vec![(source.to_path_buf(), destination.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).await?;
        let mut entries = fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push((entry.path(), target));
            } else if file_type.is_symlink() {
                copy_symlink(&entry.path(), &target).await?;
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}

/// Absolute form of `path`, resolving the longest existing prefix.
async fn canonical_target(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing = Vec::new();
    loop {
        let candidate = if existing.as_os_str().is_empty() { Path::new(".") } else { existing };
        if let Ok(base) = fs::canonicalize(candidate).await {
            return missing.iter().rev().fold(base, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

/// Links inside a copied tree are recreated, not followed.
#[cfg(unix)]
async fn copy_symlink(link: &Path, target: &Path) -> Result<(), ActionError> {
    let points_to = fs::read_link(link).await?;
    fs::symlink(points_to, target).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn copy_symlink(link: &Path, target: &Path) -> Result<(), ActionError> {
    fs::copy(link, target).await?;
    Ok(())
}

async fn move_path(source: &Path, destination: &Path) -> Result<(), ActionError> {
    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!(
                source = %source.display(),
                destination = %destination.display(),
                "Rename crosses filesystems, copying instead"
            );
            copy_path(source, destination).await?;
            delete_path(source).await
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_destination_is_precondition_error() {
        let err = FileOperation::new(FileOperationKind::Copy, "/tmp/a", None).unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidInput(_)));
        let err = FileOperation::new(FileOperationKind::Move, "/tmp/a", Some(PathBuf::new())).unwrap_err();
        assert!(matches!(err, ResilienceError::InvalidInput(_)));
        assert!(FileOperation::delete("/tmp/a").is_ok());
        assert!(FileOperation::delete("").is_err());
    }

    #[test]
    fn test_delete_ignores_destination() {
        let op = FileOperation::new(FileOperationKind::Delete, "/tmp/a", Some("/tmp/b".into())).unwrap();
        assert_eq!(op.destination(), None);
    }

    #[test]
    fn test_operation_name() {
        let op = FileOperation::move_to("/data/in.csv", "/data/out.csv").unwrap();
        assert_eq!(op.operation_name(), "file_operation_move_/data/in.csv");
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("COPY".parse::<FileOperationKind>().unwrap(), FileOperationKind::Copy);
        assert_eq!("mv".parse::<FileOperationKind>().unwrap(), FileOperationKind::Move);
        assert!("chmod".parse::<FileOperationKind>().is_err());
    }

    #[tokio::test]
    async fn test_copy_into_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dest_dir = dir.path().join("out");
        std::fs::write(&src, "hello").unwrap();
        std::fs::create_dir(&dest_dir).unwrap();

        FileOperation::copy(&src, &dest_dir).unwrap().run().await.unwrap();
        assert_eq!(std::fs::read_to_string(dest_dir.join("a.txt")).unwrap(), "hello");
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_copy_directory_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("nested/leaf.txt"), "leaf").unwrap();
        let dest = dir.path().join("copy");

        FileOperation::copy(&src, &dest).unwrap().run().await.unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("nested/leaf.txt")).unwrap(), "leaf");
    }

    #[tokio::test]
    async fn test_copy_directory_into_itself_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("leaf.txt"), "leaf").unwrap();

        let err = FileOperation::copy(&src, src.join("sub"))
            .unwrap()
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.exit_signal, ExitSignal::USAGE);
        assert!(!src.join("sub/tree").exists());

        let err = FileOperation::copy(&src, src.join("new/deeper"))
            .unwrap()
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.exit_signal, ExitSignal::USAGE);
        assert!(!src.join("new").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_copy_tree_keeps_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tree");
        std::fs::create_dir_all(src.join("real")).unwrap();
        std::fs::write(src.join("real/leaf.txt"), "leaf").unwrap();
        std::os::unix::fs::symlink("real", src.join("link")).unwrap();
        let dest = dir.path().join("copy");

        FileOperation::copy(&src, &dest).unwrap().run().await.unwrap();
        let link = dest.join("link");
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(std::fs::read_link(&link).unwrap(), PathBuf::from("real"));
        assert_eq!(std::fs::read_to_string(link.join("leaf.txt")).unwrap(), "leaf");
    }

    #[tokio::test]
    async fn test_move_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dest = dir.path().join("b.txt");
        std::fs::write(&src, "x").unwrap();

        FileOperation::move_to(&src, &dest).unwrap().run().await.unwrap();
        assert!(!src.exists());
        assert!(dest.exists());

        FileOperation::delete(&dest).unwrap().run().await.unwrap();
        assert!(!dest.exists());
        // Already gone.
        FileOperation::delete(&dest).unwrap().run().await.unwrap();
    }

    #[tokio::test]
    async fn test_copy_missing_source_fails_with_io_signal() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileOperation::copy(dir.path().join("missing"), dir.path().join("b"))
            .unwrap()
            .run()
            .await
            .unwrap_err();
        assert_eq!(err.exit_signal, ExitSignal::IO_ERROR);
        assert!(err.message.starts_with("copy "));
    }
}
