//! The out-of-scope Git object-format reader, represented here only as the
//! narrow capability interface the manager needs: `open` a bare repository
//! and answer a couple of cheap, read-only questions about it. The full
//! query surface (browsing trees, diffing commits, …) belongs to the
//! HTTP/WebSocket layer and the real reader collaborator, not this crate.
//!
//! Grounded on `domains/git/service.rs`'s re-export surface
//! (`discover_repository`, `get_default_branch`) and the crate's general
//! `git2` usage elsewhere (`domains/git/worktrees.rs`, `domains/git/stats.rs`).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Capability interface the manager is polymorphic over (`Arc<dyn
/// GitReader>`). A test double that never touches the filesystem is the
/// intended way to unit-test the manager without invoking real `git2`.
pub trait GitReader: Send + Sync {
    fn path(&self) -> &Path;
    fn default_branch(&self) -> Option<String>;
    fn head_oid(&self) -> Option<String>;
}

/// Opens `path` as a bare repository, the contract the manager relies on
/// after a successful clone or fetch.
pub fn open(path: &Path) -> Result<std::sync::Arc<dyn GitReader>> {
    let repo = Git2Reader::open(path)?;
    Ok(std::sync::Arc::new(repo))
}

pub struct Git2Reader {
    path: PathBuf,
    default_branch: Option<String>,
    head_oid: Option<String>,
}

impl Git2Reader {
    pub fn open(path: &Path) -> Result<Self> {
        let repo = git2::Repository::open_bare(path)
            .with_context(|| format!("failed to open bare repository at {}", path.display()))?;

        let default_branch = default_branch_of(&repo);
        let head_oid = repo.head().ok().and_then(|head| head.target()).map(|oid| oid.to_string());

        Ok(Self {
            path: path.to_path_buf(),
            default_branch,
            head_oid,
        })
    }
}

fn default_branch_of(repo: &git2::Repository) -> Option<String> {
    if let Ok(head) = repo.head() {
        if let Some(name) = head.shorthand() {
            return Some(name.to_string());
        }
    }
    for candidate in ["main", "master"] {
        if repo.find_branch(candidate, git2::BranchType::Local).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

impl GitReader for Git2Reader {
    fn path(&self) -> &Path {
        &self.path
    }

    fn default_branch(&self) -> Option<String> {
        self.default_branch.clone()
    }

    fn head_oid(&self) -> Option<String> {
        self.head_oid.clone()
    }
}

#[cfg(test)]
pub mod test_double {
    use super::GitReader;
    use std::path::{Path, PathBuf};

    /// A `GitReader` that never touches the filesystem, for registry unit
    /// tests that must not shell out or invoke `git2` at all.
    pub struct FakeGitReader {
        path: PathBuf,
        default_branch: Option<String>,
    }

    impl FakeGitReader {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                default_branch: Some("main".to_string()),
            }
        }
    }

    impl GitReader for FakeGitReader {
        fn path(&self) -> &Path {
            &self.path
        }

        fn default_branch(&self) -> Option<String> {
            self.default_branch.clone()
        }

        fn head_oid(&self) -> Option<String> {
            Some("0".repeat(40))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_bare_repo_with_commit() -> TempDir {
        let dir = TempDir::new().expect("temp dir");
        let work = TempDir::new().expect("work dir");

        Command::new("git")
            .args(["init", "--initial-branch", "main"])
            .current_dir(work.path())
            .status()
            .expect("git init");
        Command::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(work.path())
            .status()
            .expect("git config email");
        Command::new("git")
            .args(["config", "user.name", "Test User"])
            .current_dir(work.path())
            .status()
            .expect("git config name");
        std::fs::write(work.path().join("README.md"), "# sample").unwrap();
        Command::new("git")
            .args(["add", "."])
            .current_dir(work.path())
            .status()
            .expect("git add");
        Command::new("git")
            .args(["commit", "-m", "initial"])
            .current_dir(work.path())
            .status()
            .expect("git commit");
        Command::new("git")
            .args([
                "clone",
                "--bare",
                work.path().to_str().unwrap(),
                dir.path().to_str().unwrap(),
            ])
            .status()
            .expect("git clone --bare");
        dir
    }

    #[test]
    fn opens_bare_repository_and_reads_default_branch() {
        let dir = init_bare_repo_with_commit();
        let reader = open(dir.path()).expect("open should succeed");
        assert_eq!(reader.default_branch(), Some("main".to_string()));
        assert!(reader.head_oid().is_some());
    }

    #[test]
    fn open_fails_on_non_repository_path() {
        let dir = TempDir::new().unwrap();
        assert!(open(dir.path()).is_err());
    }
}
