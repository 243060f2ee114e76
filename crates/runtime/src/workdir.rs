//! Validation of caller-supplied host directories before they are bind-mounted.

use std::path::{Component, Path, PathBuf};

use crate::error::{Result, RuntimeError};

/// Reject parent-directory traversal and resolve `path` to its canonical form.
///
/// `path` may come from untrusted agent input, so any `..` segment is refused
/// outright rather than normalized away.
pub async fn validate_work_dir(path: &Path) -> Result<PathBuf> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(RuntimeError::Unauthorized(format!(
            "work directory {} contains a parent-directory segment",
            path.display()
        )));
    }

    let invalid = |reason: String| RuntimeError::InvalidWorkDir {
        path: path.display().to_string(),
        reason,
    };
    let canonical = tokio::fs::canonicalize(path)
        .await
        .map_err(|e| invalid(e.to_string()))?;
    let metadata = tokio::fs::metadata(&canonical)
        .await
        .map_err(|e| invalid(e.to_string()))?;

    if !metadata.is_dir() {
        return Err(invalid("not a directory".into()));
    }

    Ok(canonical)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, warmbox_common::ErrorKind};

    #[tokio::test]
    async fn accepts_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("work");
        std::fs::create_dir(&nested).unwrap();

        let resolved = validate_work_dir(&nested).await.unwrap();
        assert_eq!(resolved, std::fs::canonicalize(&nested).unwrap());
    }

    #[tokio::test]
    async fn rejects_traversal_even_if_it_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let sneaky = dir.path().join("..").join("etc");

        let err = validate_work_dir(&sneaky).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
    }

    #[tokio::test]
    async fn rejects_missing_and_file_paths() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(
            validate_work_dir(&missing).await.unwrap_err().kind(),
            ErrorKind::Validation
        );

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            validate_work_dir(&file).await,
            Err(RuntimeError::InvalidWorkDir { .. })
        ));
    }
}
