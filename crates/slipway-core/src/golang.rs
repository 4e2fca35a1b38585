//! Built-in build and test plans for Go workspaces.
//!
//! Both plans operate on the modules declared by the project's workspace
//! descriptor. The build plan syncs the workspace, fans out code generation,
//! then compiles every executable module; the test plan runs each module's
//! suite with a coverage profile and averages the per-module totals.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::context::ProjectContext;
use crate::coverage;
use crate::error::Result;
use crate::exec;
use crate::generate;
use crate::plan::{BuildPlan, Plan, TestPlan};
use crate::workspace::{self, Module};

/// Build environment defaults for compiled-binary C interop.
const CGO_ENV: &str = "CGO_ENABLED";

fn build_env(ctx: &ProjectContext, mut env: HashMap<String, String>) -> HashMap<String, String> {
    if !ctx.env.local {
        env.insert(
            "GOPATH".to_string(),
            ctx.fs.cache_path("go").to_string_lossy().into_owned(),
        );
    }

    // Interop stays off unless the caller explicitly enabled it.
    env.entry(CGO_ENV.to_string())
        .or_insert_with(|| "0".to_string());

    env
}

/// Linker flags stamping the release version into a version package.
fn version_ldflags(ctx: &ProjectContext, version_package: &str) -> String {
    let version = &ctx.env.version;
    let mut flags = vec![
        format!("-X '{version_package}.majorVersion={}'", version.major),
        format!("-X '{version_package}.minorVersion={}'", version.minor),
        format!("-X '{version_package}.patchVersion={}'", version.patch),
    ];

    if let Some(prerelease) = &version.prerelease {
        flags.push(format!(
            "-X '{version_package}.prereleaseVersion={prerelease}'"
        ));
    }

    flags.join(" ")
}

/// Build plan compiling every executable module in the workspace.
pub struct GoWorkspaceBuildPlan {
    name: String,
    source_path: PathBuf,
    /// Import path of the package receiving version ldflags, when any.
    version_package: Option<String>,
}

impl GoWorkspaceBuildPlan {
    pub fn new(name: &str, ctx: &ProjectContext, version_package: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            source_path: ctx.fs.project_root().to_path_buf(),
            version_package,
        }
    }

    fn ldflags(&self, ctx: &ProjectContext) -> Option<String> {
        self.version_package
            .as_deref()
            .map(|pkg| version_ldflags(ctx, pkg))
    }
}

#[async_trait]
impl Plan for GoWorkspaceBuildPlan {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_path(&self) -> &Path {
        &self.source_path
    }

    async fn prepare(&self, ctx: &ProjectContext) -> Result<()> {
        let log_path = ctx.fs.log_path(&self.name);

        workspace::sync_workspace(ctx.fs.project_root(), &log_path, ctx.runtime.verbose)
            .await?;

        if ctx.runtime.do_code_generation {
            for module in workspace::workspace_modules(ctx)? {
                generate::generate_workspace(ctx, &module, &log_path).await?;
            }
        }

        Ok(())
    }

    async fn cleanup(&self, _ctx: &ProjectContext) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl BuildPlan for GoWorkspaceBuildPlan {
    async fn build(&self, ctx: &ProjectContext) -> Result<()> {
        let environment = build_env(ctx, ctx.base_env());
        let log_path = ctx.fs.log_path(&self.name);

        for root in workspace::workspace_modules(ctx)? {
            for module in Module::main_modules(&root.directory).await? {
                let artifact = ctx.fs.artifact_path(module.artifact_name());

                let mut cmd = vec!["go".to_string(), "build".to_string()];
                if let Some(ldflags) = self.ldflags(ctx) {
                    cmd.push("-ldflags".to_string());
                    cmd.push(ldflags);
                }
                cmd.push("-o".to_string());
                cmd.push(artifact.to_string_lossy().into_owned());

                exec::run_logged(
                    &cmd,
                    &module.directory,
                    Some(environment.clone()),
                    &log_path,
                    ctx.runtime.verbose,
                )
                .await?;
            }
        }

        Ok(())
    }
}

/// Test plan running each workspace module's suite with coverage profiling.
pub struct GoWorkspaceTestPlan {
    name: String,
    source_path: PathBuf,
    /// Import path of the package receiving version ldflags, when any.
    version_package: Option<String>,
}

impl GoWorkspaceTestPlan {
    pub fn new(name: &str, ctx: &ProjectContext, version_package: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            source_path: ctx.fs.project_root().to_path_buf(),
            version_package,
        }
    }

    fn ldflags(&self, ctx: &ProjectContext) -> Option<String> {
        self.version_package
            .as_deref()
            .map(|pkg| version_ldflags(ctx, pkg))
    }

    fn module_coverage_path(&self, ctx: &ProjectContext, module: &Module) -> PathBuf {
        ctx.fs.cache_path(format!("{}.coverage", module.name))
    }

    fn module_log_path(&self, ctx: &ProjectContext, module: &Module) -> PathBuf {
        ctx.fs.log_path(&format!("{}_test", module.name))
    }

    /// Test binaries carry the same version stamps as release builds.
    fn test_command(&self, ctx: &ProjectContext, module: &Module) -> Vec<String> {
        let mut cmd = vec![
            "go".to_string(),
            "test".to_string(),
            "-coverprofile".to_string(),
            self.module_coverage_path(ctx, module)
                .to_string_lossy()
                .into_owned(),
        ];

        if let Some(ldflags) = self.ldflags(ctx) {
            cmd.push("-ldflags".to_string());
            cmd.push(ldflags);
        }

        // Integration suites must run sequentially.
        if ctx.runtime.run_integration_tests {
            cmd.push("-p".to_string());
            cmd.push("1".to_string());
            cmd.push("-tags".to_string());
            cmd.push("integration serial_integration".to_string());
        }

        cmd.push("./...".to_string());
        cmd
    }

    async fn run_module_tests(&self, ctx: &ProjectContext, module: &Module) -> Result<()> {
        exec::run_logged(
            &self.test_command(ctx, module),
            &module.directory,
            Some(build_env(ctx, ctx.base_env())),
            &self.module_log_path(ctx, module),
            ctx.runtime.verbose,
        )
        .await?;

        Ok(())
    }

    async fn fetch_module_coverage(&self, ctx: &ProjectContext, module: &Module) -> Result<f64> {
        let cmd = vec![
            "go".to_string(),
            "tool".to_string(),
            "cover".to_string(),
            "-func".to_string(),
            self.module_coverage_path(ctx, module)
                .to_string_lossy()
                .into_owned(),
        ];

        let output = exec::run_logged(
            &cmd,
            &self.source_path,
            None,
            &ctx.fs.log_path(&self.name),
            false,
        )
        .await?;

        coverage::parse_total_coverage(&self.name, &output)
    }
}

#[async_trait]
impl Plan for GoWorkspaceTestPlan {
    fn name(&self) -> &str {
        &self.name
    }

    fn source_path(&self) -> &Path {
        &self.source_path
    }

    async fn prepare(&self, _ctx: &ProjectContext) -> Result<()> {
        Ok(())
    }

    async fn cleanup(&self, _ctx: &ProjectContext) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl TestPlan for GoWorkspaceTestPlan {
    async fn run_tests(&self, ctx: &ProjectContext) -> Result<()> {
        for module in workspace::workspace_modules(ctx)? {
            self.run_module_tests(ctx, &module).await?;
        }
        Ok(())
    }

    async fn fetch_coverage(&self, ctx: &ProjectContext) -> Result<f64> {
        let mut module_count = 0usize;
        let mut total = 0.0f64;

        for module in workspace::workspace_modules(ctx)? {
            total += self.fetch_module_coverage(ctx, &module).await?;
            module_count += 1;
        }

        if module_count == 0 {
            return Ok(0.0);
        }

        Ok(total / module_count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Environment, Filesystem, Runtime};
    use crate::version::Version;

    fn context_with_version(root: &Path, version: Version) -> ProjectContext {
        ProjectContext::new(
            Environment {
                local: true,
                version,
                checkout_hash: "deadbeef".to_string(),
            },
            Runtime::default(),
            Filesystem::with_overrides(true, root.to_path_buf(), None, None),
        )
    }

    #[test]
    fn ldflags_stamp_all_version_components() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_version(dir.path(), Version::parse("2.5.1-rc2").unwrap());

        let flags = version_ldflags(&ctx, "example.org/app/version");
        assert!(flags.contains("example.org/app/version.majorVersion=2"));
        assert!(flags.contains("minorVersion=5"));
        assert!(flags.contains("patchVersion=1"));
        assert!(flags.contains("prereleaseVersion=rc2"));
    }

    #[test]
    fn ldflags_omit_absent_prerelease() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_version(dir.path(), Version::parse("1.0.0").unwrap());

        let flags = version_ldflags(&ctx, "example.org/app/version");
        assert!(!flags.contains("prereleaseVersion"));
    }

    #[test]
    fn build_env_defaults_cgo_off() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_version(dir.path(), Version::zero());

        let env = build_env(&ctx, HashMap::new());
        assert_eq!(env.get(CGO_ENV).map(String::as_str), Some("0"));
    }

    #[test]
    fn build_env_keeps_explicit_cgo_setting() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_version(dir.path(), Version::zero());

        let mut base = HashMap::new();
        base.insert(CGO_ENV.to_string(), "1".to_string());
        let env = build_env(&ctx, base);
        assert_eq!(env.get(CGO_ENV).map(String::as_str), Some("1"));
    }

    #[test]
    fn test_command_carries_version_ldflags() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_version(dir.path(), Version::parse("2.5.1").unwrap());
        let module = Module {
            name: "api".to_string(),
            module_path: "example.org/api".to_string(),
            directory: dir.path().to_path_buf(),
            source_files: Vec::new(),
        };

        let stamped = GoWorkspaceTestPlan::new(
            "go",
            &ctx,
            Some("example.org/app/version".to_string()),
        );
        let cmd = stamped.test_command(&ctx, &module);
        let flag = cmd.iter().position(|a| a == "-ldflags").unwrap();
        assert!(cmd[flag + 1].contains("example.org/app/version.majorVersion=2"));
        assert_eq!(cmd.last().map(String::as_str), Some("./..."));

        let bare = GoWorkspaceTestPlan::new("go", &ctx, None);
        assert!(!bare
            .test_command(&ctx, &module)
            .iter()
            .any(|a| a == "-ldflags"));
    }

    #[test]
    fn coverage_and_log_paths_are_per_module() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_with_version(dir.path(), Version::zero());
        let plan = GoWorkspaceTestPlan::new("go", &ctx, None);

        let module = Module {
            name: "api".to_string(),
            module_path: "example.org/api".to_string(),
            directory: dir.path().to_path_buf(),
            source_files: Vec::new(),
        };

        assert!(plan
            .module_coverage_path(&ctx, &module)
            .ends_with("api.coverage"));
        assert!(plan
            .module_log_path(&ctx, &module)
            .ends_with("api_test.log"));
    }
}
