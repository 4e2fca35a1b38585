//! Project context: environment, runtime flags, and filesystem layout.
//!
//! A `ProjectContext` is constructed once at process start and threaded
//! through every plan. It owns no plan state; it only answers questions
//! about where things live and how the run was configured.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{OrchestratorError, Result};
use crate::git;
use crate::version::Version;
use crate::workspace::WORKSPACE_DESCRIPTOR;

/// Name of the env var overriding the detected release version.
pub const VERSION_ENV: &str = "VERSION";

/// Name of the env var overriding the detected checkout hash.
pub const CHECKOUT_HASH_ENV: &str = "CHECKOUT_HASH";

/// Name of the env var overriding the work (cache/log) directory root.
pub const WORK_DIR_ENV: &str = "SLIPWAY_WORK_DIR";

/// Name of the env var overriding the artifact output directory.
pub const ARTIFACT_DIR_ENV: &str = "SLIPWAY_ARTIFACT_DIR";

/// Facts about where and what is being built.
#[derive(Debug, Clone)]
pub struct Environment {
    /// True when running on an engineer's machine rather than CI.
    pub local: bool,

    /// Release version embedded into build artifacts.
    pub version: Version,

    /// Source checkout identifier.
    pub checkout_hash: String,
}

/// Per-invocation runtime flags.
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    /// Echo subprocess output to the console.
    pub verbose: bool,

    /// Upload the coverage manifest to remote storage after a test run.
    pub upload_coverage: bool,

    /// Enable integration test suites.
    pub run_integration_tests: bool,

    /// Run code-generation steps during build preparation.
    pub do_code_generation: bool,

    /// Restrict test execution to plans with detected source changes.
    pub scoped: bool,

    /// Target-name allow-list; empty means all plans run.
    pub targets: Vec<String>,
}

/// Resolved directory layout for a run.
#[derive(Debug, Clone)]
pub struct Filesystem {
    project: PathBuf,
    work: PathBuf,
    artifacts: PathBuf,
}

impl Filesystem {
    pub fn new(local: bool, project_root: PathBuf) -> Self {
        Self::with_overrides(
            local,
            project_root,
            std::env::var(WORK_DIR_ENV).ok().map(PathBuf::from),
            std::env::var(ARTIFACT_DIR_ENV).ok().map(PathBuf::from),
        )
    }

    /// Layout with explicit work/artifact overrides, independent of the
    /// ambient environment.
    pub fn with_overrides(
        local: bool,
        project_root: PathBuf,
        work_override: Option<PathBuf>,
        artifact_override: Option<PathBuf>,
    ) -> Self {
        // Default work directory is the invoking shell's cwd; local builds
        // keep everything under the project tree instead.
        let mut work = std::env::current_dir().unwrap_or_else(|_| project_root.clone());
        let mut artifacts = work.join("artifacts");

        if local {
            work = project_root.join(".slipway");
            artifacts = project_root.join("dist");
        }

        if let Some(over) = work_override {
            work = over;
        }
        if let Some(over) = artifact_override {
            artifacts = over;
        }

        Self {
            project: project_root,
            work,
            artifacts,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project
    }

    pub fn project_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.project.join(rel)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.work.join("cache")
    }

    pub fn cache_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.cache_dir().join(rel)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.work.join("logs")
    }

    /// Per-plan log file path.
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir().join(format!("{name}.log"))
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.artifacts.clone()
    }

    pub fn artifact_path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.artifacts.join(rel)
    }

    /// Artifacts carried over from a previous pipeline stage.
    pub fn previous_artifact_dir(&self) -> PathBuf {
        self.work.join("previous_artifacts")
    }

    pub fn ensure_dir(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }
        Ok(())
    }
}

/// Everything a plan needs to know about the run.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub env: Environment,
    pub runtime: Runtime,
    pub fs: Filesystem,
}

impl ProjectContext {
    pub fn new(env: Environment, runtime: Runtime, fs: Filesystem) -> Self {
        Self { env, runtime, fs }
    }

    /// Discover the project rooted above `start_dir` and resolve version
    /// facts from the environment or git.
    pub fn discover(start_dir: &Path, local: bool, foss_only: bool, runtime: Runtime) -> Result<Self> {
        let project_root = find_project_root(start_dir, foss_only)?;

        let version = match std::env::var(VERSION_ENV) {
            Ok(raw) => Version::parse(&raw)?,
            Err(_) => git::describe_version(&project_root, "v0.0.0")?,
        };

        let checkout_hash = match std::env::var(CHECKOUT_HASH_ENV) {
            Ok(hash) => hash,
            Err(_) => git::head_sha(&project_root)?,
        };

        let env = Environment {
            local,
            version,
            checkout_hash,
        };
        let fs = Filesystem::new(env.local, project_root);

        Ok(Self::new(env, runtime, fs))
    }

    /// A copy of the process environment, as the base for subprocess env
    /// customization.
    pub fn base_env(&self) -> HashMap<String, String> {
        std::env::vars().collect()
    }

    /// Create the run's working directories and carry forward previous
    /// artifacts when present.
    pub fn setup(&self) -> Result<()> {
        if !self.runtime.do_code_generation {
            info!("code generation steps are disabled");
        }

        self.fs.ensure_dir(&self.fs.cache_dir())?;
        self.fs.ensure_dir(&self.fs.log_dir())?;
        self.fs.ensure_dir(&self.fs.artifact_dir())?;

        let previous = self.fs.previous_artifact_dir();
        if previous.exists() {
            info!(path = %previous.display(), "previous artifacts found");
            copy_tree(&previous, &self.fs.artifact_dir())?;
        }

        Ok(())
    }
}

/// Walk up from `start_dir` until a directory containing the workspace
/// descriptor is found.
///
/// A community checkout may be embedded inside an enterprise checkout that
/// carries its own descriptor one level up; unless `foss_only` is set, the
/// outermost root wins.
pub fn find_project_root(start_dir: &Path, foss_only: bool) -> Result<PathBuf> {
    let mut current = start_dir.to_path_buf();

    loop {
        let parent = match current.parent() {
            Some(p) => p.to_path_buf(),
            None => break,
        };

        let descriptor = current.join(WORKSPACE_DESCRIPTOR);
        let parent_descriptor = parent.join(WORKSPACE_DESCRIPTOR);

        if descriptor.exists() && (foss_only || !parent_descriptor.exists()) {
            return Ok(current);
        }

        current = parent;
    }

    Err(OrchestratorError::Workspace(format!(
        "unable to find project root; started searching from {}",
        start_dir.display()
    )))
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            std::fs::create_dir_all(&target)?;
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
