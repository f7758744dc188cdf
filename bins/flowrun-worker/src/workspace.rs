// Sandbox workspace: one throwaway host directory per job, bind-mounted into its container

use flowrun_common::language::{SandboxRuntimeSpec, INPUT_FILE_NAME};
use flowrun_common::types::SubmissionJob;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("failed to create workspace under {root}: {source}")]
    Create {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {file}: {source}")]
    Write {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove workspace {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Directory holding a job's source file and optional input file.
///
/// Removed by `destroy`. If a workspace is dropped without being destroyed
/// (early return, panic, cancelled future) the directory is still removed.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    mount_path: String,
    has_input: bool,
}

impl Workspace {
    /// Create `code-<submission id>-<random>` under `root` and write the job's files into it.
    pub fn create(root: &Path, job: &SubmissionJob, spec: &SandboxRuntimeSpec) -> Result<Self, WorkspaceError> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("code-{}-", job.submission_id))
            .tempdir_in(root)
            .map_err(|source| WorkspaceError::Create {
                root: root.to_path_buf(),
                source,
            })?;

        let source_file = dir.path().join(spec.source_file_name());
        write_file(&source_file, &job.code)?;

        let has_input = match job.stdin.as_deref() {
            Some(input) if !input.is_empty() => {
                write_file(&dir.path().join(INPUT_FILE_NAME), input)?;
                true
            }
            _ => false,
        };

        let mount_path = to_mount_path(dir.path());
        debug!(submission_id = %job.submission_id, workspace = %mount_path, has_input, "Workspace prepared");

        Ok(Self {
            dir,
            mount_path,
            has_input,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Absolute path in the form the container runtime accepts for bind mounts.
    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    pub fn has_input(&self) -> bool {
        self.has_input
    }

    /// Recursively remove the directory.
    pub fn destroy(self) -> Result<(), WorkspaceError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|source| WorkspaceError::Remove { path, source })
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), WorkspaceError> {
    fs::write(path, contents).map_err(|source| WorkspaceError::Write {
        file: path.to_path_buf(),
        source,
    })
}

/// Bind mounts want forward slashes even when the worker runs on Windows.
fn to_mount_path(path: &Path) -> String {
    let absolute = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    absolute.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowrun_common::language::LanguageRegistry;
    use flowrun_common::types::LanguageId;

    fn python_spec() -> SandboxRuntimeSpec {
        LanguageRegistry::builtin().resolve(LanguageId::Python).unwrap().clone()
    }

    #[test]
    fn test_create_writes_source_and_input() {
        let root = tempfile::tempdir().unwrap();
        let job = SubmissionJob::new(LanguageId::Python, "print(input())".to_string(), Some("hello".to_string()));

        let workspace = Workspace::create(root.path(), &job, &python_spec()).unwrap();
        assert!(workspace.has_input());
        assert_eq!(fs::read_to_string(workspace.path().join("code.py")).unwrap(), "print(input())");
        assert_eq!(fs::read_to_string(workspace.path().join("input.txt")).unwrap(), "hello");

        let name = workspace.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("code-{}-", job.submission_id)));
        assert!(!workspace.mount_path().contains('\\'));
    }

    #[test]
    fn test_no_input_file_without_stdin() {
        let root = tempfile::tempdir().unwrap();
        let job = SubmissionJob::new(LanguageId::Python, "print(1)".to_string(), None);

        let workspace = Workspace::create(root.path(), &job, &python_spec()).unwrap();
        assert!(!workspace.has_input());
        assert!(!workspace.path().join("input.txt").exists());
    }

    #[test]
    fn test_same_job_gets_distinct_directories() {
        let root = tempfile::tempdir().unwrap();
        let job = SubmissionJob::new(LanguageId::Python, "print(1)".to_string(), None);

        let first = Workspace::create(root.path(), &job, &python_spec()).unwrap();
        let second = Workspace::create(root.path(), &job, &python_spec()).unwrap();
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn test_destroy_leaves_no_residue() {
        let root = tempfile::tempdir().unwrap();
        let job = SubmissionJob::new(LanguageId::Python, "print(1)".to_string(), Some("x".to_string()));

        let workspace = Workspace::create(root.path(), &job, &python_spec()).unwrap();
        let path = workspace.path().to_path_buf();
        workspace.destroy().unwrap();

        assert!(!path.exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_drop_also_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let job = SubmissionJob::new(LanguageId::Python, "print(1)".to_string(), None);

        let path = {
            let workspace = Workspace::create(root.path(), &job, &python_spec()).unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("does-not-exist");
        let job = SubmissionJob::new(LanguageId::Python, "print(1)".to_string(), None);

        let err = Workspace::create(&missing, &job, &python_spec()).unwrap_err();
        assert!(matches!(err, WorkspaceError::Create { .. }));
    }
}
