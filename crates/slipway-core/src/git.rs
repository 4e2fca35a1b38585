//! Git integration utilities for capturing repository state.

use std::path::Path;
use std::process::Command;

use crate::error::{OrchestratorError, Result};
use crate::version::Version;

fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| OrchestratorError::Internal(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OrchestratorError::Internal(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Capture the HEAD commit SHA from a git repository.
///
/// Runs `git rev-parse HEAD` in the given directory. Returns an error if the
/// directory is not inside a git repository or if git is not available.
pub fn head_sha(repo_dir: &Path) -> Result<String> {
    let sha = run_git(repo_dir, &["rev-parse", "HEAD"])?;

    if sha.is_empty() {
        return Err(OrchestratorError::Internal(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }

    Ok(sha)
}

/// Derive a `Version` from the nearest reachable tag.
///
/// Falls back to the given default label when the repository has no tags.
pub fn describe_version(repo_dir: &Path, default_label: &str) -> Result<Version> {
    match run_git(repo_dir, &["describe", "--tags", "--abbrev=0"]) {
        Ok(tag) => Version::parse(&tag),
        Err(_) => Version::parse(default_label),
    }
}

/// Version-control change detection collaborator.
///
/// Used by the driver to decide whether a change-scoped test run may skip a
/// plan whose source tree is untouched.
pub trait ChangeDetector: Send + Sync {
    /// Whether `path` has uncommitted or unpushed changes relative to the
    /// repository at `repo_dir`.
    fn path_has_changes(&self, repo_dir: &Path, path: &Path) -> Result<bool>;
}

/// `ChangeDetector` backed by `git status --porcelain`.
#[derive(Debug, Default)]
pub struct GitChangeDetector;

impl ChangeDetector for GitChangeDetector {
    fn path_has_changes(&self, repo_dir: &Path, path: &Path) -> Result<bool> {
        let spec = path.to_string_lossy();
        let status = run_git(repo_dir, &["status", "--porcelain", "--", &spec])?;
        Ok(!status.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        git(dir.path(), &["init"]);
        git(dir.path(), &["config", "user.name", "test-user"]);
        git(dir.path(), &["config", "user.email", "test@example.com"]);
        git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[test]
    fn head_sha_returns_40_hex_chars() {
        let repo = make_git_repo();
        let sha = head_sha(repo.path()).unwrap();
        assert_eq!(sha.len(), 40, "SHA should be 40 hex chars, got: {sha}");
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn head_sha_fails_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(head_sha(dir.path()).is_err());
    }

    #[test]
    fn describe_version_falls_back_without_tags() {
        let repo = make_git_repo();
        let version = describe_version(repo.path(), "v0.0.0").unwrap();
        assert_eq!(version, Version::zero());
    }

    #[test]
    fn describe_version_reads_tag() {
        let repo = make_git_repo();
        git(repo.path(), &["tag", "v3.1.4"]);
        let version = describe_version(repo.path(), "v0.0.0").unwrap();
        assert_eq!(version.to_string(), "3.1.4");
    }

    #[test]
    fn detects_changes_under_path() {
        let repo = make_git_repo();
        let module_dir = repo.path().join("module");
        std::fs::create_dir(&module_dir).unwrap();
        std::fs::write(module_dir.join("main.go"), "package main\n").unwrap();

        let detector = GitChangeDetector;
        assert!(detector
            .path_has_changes(repo.path(), Path::new("module"))
            .unwrap());
        assert!(!detector
            .path_has_changes(repo.path(), Path::new("untouched"))
            .unwrap());
    }
}
