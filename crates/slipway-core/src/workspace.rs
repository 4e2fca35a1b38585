//! Workspace and module discovery.
//!
//! A workspace declares its member modules in a `go.work` descriptor; each
//! member carries a `go.mod` manifest naming its fully-qualified module
//! path. Individual compilation units are enumerated by shelling out to
//! `go list -json`, whose concatenated-JSON output is decoded incrementally.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::context::ProjectContext;
use crate::error::{OrchestratorError, Result};
use crate::exec::{self, ExecOptions};
use crate::jsonstream::JsonStream;

/// Workspace descriptor file name.
pub const WORKSPACE_DESCRIPTOR: &str = "go.work";

/// Per-module manifest file name.
pub const MODULE_MANIFEST: &str = "go.mod";

/// Marker string identifying a code-generation directive in source text.
const GENERATION_DIRECTIVE: &str = "go:generate";

/// Module names that never run code generation (mock-only modules).
const GENERATION_EXCLUSIONS: &[&str] = &["mock"];

/// One discovered compilation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Unit identifier; not globally unique.
    pub name: String,

    /// Fully-qualified workspace identifier; unique within a workspace.
    pub module_path: String,

    /// Directory containing the module's sources.
    pub directory: PathBuf,

    /// Relative paths of the module's source files, in listing order.
    pub source_files: Vec<String>,
}

impl Module {
    /// Artifact name derived from the last segment of the module path.
    pub fn artifact_name(&self) -> &str {
        self.module_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.module_path)
    }

    /// Whether this module builds an executable.
    ///
    /// True for a module named `main` with an entry-point signature in one
    /// of its listed source files. Recomputed on demand, never cached.
    pub fn is_executable(&self) -> Result<bool> {
        if self.name != "main" {
            return Ok(false);
        }

        for relative in &self.source_files {
            let contents = std::fs::read_to_string(self.directory.join(relative))?;
            if contents.lines().any(|line| line.starts_with("func main")) {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Whether this module's tree contains a code-generation directive.
    pub async fn requires_code_generation(&self) -> bool {
        if GENERATION_EXCLUSIONS.contains(&self.name.as_str()) {
            return false;
        }

        let probe = [
            "grep".to_string(),
            "-qR".to_string(),
            GENERATION_DIRECTIVE.to_string(),
            "./".to_string(),
        ];
        exec::run_simple(&probe, &self.directory, None).await == 0
    }

    /// Enumerate the compilation units under `path` via `go list -json`.
    ///
    /// Units that report no source files are skipped with a warning.
    pub async fn list(path: &Path, recursive: bool) -> Result<Vec<Module>> {
        let target = if recursive { "./..." } else { "./" };
        let cmd = [
            "go".to_string(),
            "list".to_string(),
            "-json".to_string(),
            target.to_string(),
        ];

        let output = exec::run(
            &cmd,
            path,
            ExecOptions {
                capture_stderr: true,
                ..Default::default()
            },
        )
        .await?;

        let mut modules = Vec::new();

        for value in JsonStream::new(&output) {
            let value = value?;

            let listing = value.as_object().ok_or_else(|| {
                OrchestratorError::Workspace(
                    "unexpected value in module listing: expected an object".to_string(),
                )
            })?;

            let name = listing
                .get("Name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let source_files = match listing.get("GoFiles").and_then(|v| v.as_array()) {
                Some(files) => files
                    .iter()
                    .filter_map(|f| f.as_str())
                    .map(str::to_string)
                    .collect(),
                None => {
                    warn!(module = %name, "module reports no source files, skipping");
                    continue;
                }
            };

            let module_path = listing
                .get("ImportPath")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let directory = listing
                .get("Dir")
                .and_then(|v| v.as_str())
                .map(PathBuf::from)
                .unwrap_or_default();

            modules.push(Module {
                name,
                module_path,
                directory,
                source_files,
            });
        }

        Ok(modules)
    }

    /// The subset of modules under `path` that build executables.
    pub async fn main_modules(path: &Path) -> Result<Vec<Module>> {
        let mut mains = Vec::new();

        for module in Self::list(path, true).await? {
            if module.is_executable()? {
                mains.push(module);
            }
        }

        Ok(mains)
    }
}

/// Parse the relative member paths out of a workspace descriptor's
/// `use ( ... )` block.
///
/// Comment lines (`//`) and blanks are ignored. Fails if the block is
/// absent or unterminated.
fn workspace_member_paths(descriptor: &str, descriptor_path: &Path) -> Result<Vec<String>> {
    let mut member_paths = Vec::new();
    let mut in_use_block = false;
    let mut block_closed = false;

    for line in descriptor.lines() {
        let stripped = line.trim();

        if stripped.is_empty() || stripped.starts_with("//") {
            continue;
        }

        if in_use_block {
            if stripped.ends_with(')') {
                block_closed = true;
                break;
            }
            member_paths.push(stripped.to_string());
        } else if stripped.starts_with("use") {
            in_use_block = true;
        }
    }

    if !in_use_block || !block_closed {
        return Err(OrchestratorError::Workspace(format!(
            "no valid use block in workspace descriptor at path: {}",
            descriptor_path.display()
        )));
    }

    Ok(member_paths)
}

/// Parse the first `module <path>` declaration from a module manifest.
fn module_declaration(manifest: &str, manifest_path: &Path) -> Result<String> {
    for line in manifest.lines() {
        let stripped = line.trim();

        if stripped.is_empty() || stripped.starts_with("//") {
            continue;
        }

        if stripped.starts_with("module") {
            let mut parts = stripped.split_whitespace();
            let _keyword = parts.next();

            let declared = parts.next().ok_or_else(|| {
                OrchestratorError::Workspace(format!(
                    "malformed module line in manifest at path: {}",
                    manifest_path.display()
                ))
            })?;

            if parts.next().is_some() {
                return Err(OrchestratorError::Workspace(format!(
                    "malformed module line in manifest at path: {}",
                    manifest_path.display()
                )));
            }

            return Ok(declared.to_string());
        }
    }

    Err(OrchestratorError::Workspace(format!(
        "no module declaration in manifest at path: {}",
        manifest_path.display()
    )))
}

/// Enumerate the modules declared by the project's workspace descriptor.
///
/// Each declared member must carry a manifest with a `module` line; the
/// module's short name is the last segment of its declared path.
pub fn workspace_modules(ctx: &ProjectContext) -> Result<Vec<Module>> {
    let descriptor_path = ctx.fs.project_path(WORKSPACE_DESCRIPTOR);

    if !descriptor_path.exists() {
        return Err(OrchestratorError::Workspace(format!(
            "unable to find a valid workspace at path: {}",
            descriptor_path.display()
        )));
    }

    let descriptor = std::fs::read_to_string(&descriptor_path)?;
    let mut modules = Vec::new();

    for member in workspace_member_paths(&descriptor, &descriptor_path)? {
        let module_dir = ctx.fs.project_path(&member);
        let manifest_path = module_dir.join(MODULE_MANIFEST);

        if !manifest_path.exists() {
            return Err(OrchestratorError::Workspace(format!(
                "unable to find a valid module at path: {}",
                module_dir.display()
            )));
        }

        let manifest = std::fs::read_to_string(&manifest_path)?;
        let module_path = module_declaration(&manifest, &manifest_path)?;
        let name = module_path
            .rsplit('/')
            .next()
            .unwrap_or(&module_path)
            .to_string();

        modules.push(Module {
            name,
            module_path,
            directory: module_dir,
            source_files: Vec::new(),
        });
    }

    Ok(modules)
}

/// Synchronize workspace dependency state (`go work sync`).
pub async fn sync_workspace(path: &Path, log_path: &Path, verbose: bool) -> Result<()> {
    let cmd = ["go".to_string(), "work".to_string(), "sync".to_string()];
    exec::run_logged(&cmd, path, None, log_path, verbose).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Environment, Filesystem, Runtime};
    use crate::version::Version;

    fn context_at(root: &Path) -> ProjectContext {
        ProjectContext::new(
            Environment {
                local: true,
                version: Version::zero(),
                checkout_hash: "deadbeef".to_string(),
            },
            Runtime::default(),
            Filesystem::with_overrides(true, root.to_path_buf(), None, None),
        )
    }

    fn write_workspace(root: &Path, members: &[&str]) {
        let mut descriptor = String::from("go 1.21\n\nuse (\n");
        for member in members {
            descriptor.push_str(&format!("\t{member}\n"));
        }
        descriptor.push_str(")\n");
        std::fs::write(root.join(WORKSPACE_DESCRIPTOR), descriptor).unwrap();
    }

    fn write_member(root: &Path, member: &str, module_path: &str) {
        let dir = root.join(member);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MODULE_MANIFEST),
            format!("// manifest\nmodule {module_path}\n\ngo 1.21\n"),
        )
        .unwrap();
    }

    #[test]
    fn discovers_all_declared_members() {
        let dir = tempfile::tempdir().unwrap();
        write_workspace(dir.path(), &["api", "tools/gen"]);
        write_member(dir.path(), "api", "example.org/project/api");
        write_member(dir.path(), "tools/gen", "example.org/project/gen");

        let modules = workspace_modules(&context_at(dir.path())).unwrap();

        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].name, "api");
        assert_eq!(modules[0].module_path, "example.org/project/api");
        assert_eq!(modules[1].name, "gen");
        assert!(modules.iter().all(|m| !m.module_path.is_empty()));
    }

    #[test]
    fn missing_descriptor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = workspace_modules(&context_at(dir.path())).unwrap_err();
        assert!(matches!(err, OrchestratorError::Workspace(_)));
    }

    #[test]
    fn missing_member_manifest_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_workspace(dir.path(), &["ghost"]);

        let err = workspace_modules(&context_at(dir.path())).unwrap_err();
        assert!(matches!(err, OrchestratorError::Workspace(_)));
    }

    #[test]
    fn manifest_without_module_line_fails() {
        let dir = tempfile::tempdir().unwrap();
        write_workspace(dir.path(), &["api"]);
        let member = dir.path().join("api");
        std::fs::create_dir_all(&member).unwrap();
        std::fs::write(member.join(MODULE_MANIFEST), "go 1.21\n").unwrap();

        let err = workspace_modules(&context_at(dir.path())).unwrap_err();
        assert!(matches!(err, OrchestratorError::Workspace(_)));
    }

    #[test]
    fn use_block_ignores_comments_and_blanks() {
        let descriptor = "go 1.21\n\nuse (\n\t// a comment\n\n\t./api\n\t./web\n)\n";
        let members =
            workspace_member_paths(descriptor, Path::new("go.work")).unwrap();
        assert_eq!(members, vec!["./api".to_string(), "./web".to_string()]);
    }

    #[test]
    fn unterminated_use_block_fails() {
        let descriptor = "use (\n\t./api\n";
        assert!(workspace_member_paths(descriptor, Path::new("go.work")).is_err());
    }

    #[test]
    fn descriptor_without_use_block_fails() {
        let descriptor = "go 1.21\n";
        assert!(workspace_member_paths(descriptor, Path::new("go.work")).is_err());
    }

    #[test]
    fn module_declaration_rejects_extra_tokens() {
        assert!(module_declaration("module a b\n", Path::new("go.mod")).is_err());
        assert_eq!(
            module_declaration("// c\nmodule example.org/x\n", Path::new("go.mod")).unwrap(),
            "example.org/x"
        );
    }

    fn module_with_source(dir: &Path, name: &str, source: &str) -> Module {
        std::fs::write(dir.join("main.go"), source).unwrap();
        Module {
            name: name.to_string(),
            module_path: format!("example.org/{name}"),
            directory: dir.to_path_buf(),
            source_files: vec!["main.go".to_string()],
        }
    }

    #[test]
    fn main_module_with_entry_point_is_executable() {
        let dir = tempfile::tempdir().unwrap();
        let module = module_with_source(
            dir.path(),
            "main",
            "package main\n\nfunc main() {\n}\n",
        );
        assert!(module.is_executable().unwrap());
    }

    #[test]
    fn main_module_without_entry_point_is_not_executable() {
        let dir = tempfile::tempdir().unwrap();
        let module = module_with_source(dir.path(), "main", "package main\n\nvar x = 1\n");
        assert!(!module.is_executable().unwrap());
    }

    #[test]
    fn non_main_module_is_never_executable() {
        let dir = tempfile::tempdir().unwrap();
        let module = module_with_source(
            dir.path(),
            "api",
            "package api\n\nfunc main() {\n}\n",
        );
        assert!(!module.is_executable().unwrap());
    }

    #[test]
    fn artifact_name_is_last_path_segment() {
        let module = Module {
            name: "main".to_string(),
            module_path: "example.org/project/cmd/apiserver".to_string(),
            directory: PathBuf::new(),
            source_files: Vec::new(),
        };
        assert_eq!(module.artifact_name(), "apiserver");
    }

    #[tokio::test]
    async fn excluded_names_skip_generation_probe() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gen.go"), "//go:generate mockgen\n").unwrap();

        let mock = Module {
            name: "mock".to_string(),
            module_path: "example.org/mock".to_string(),
            directory: dir.path().to_path_buf(),
            source_files: Vec::new(),
        };
        assert!(!mock.requires_code_generation().await);

        let regular = Module {
            name: "api".to_string(),
            module_path: "example.org/api".to_string(),
            directory: dir.path().to_path_buf(),
            source_files: Vec::new(),
        };
        assert!(regular.requires_code_generation().await);
    }

    #[tokio::test]
    async fn tree_without_directive_requires_no_generation() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plain.go"), "package api\n").unwrap();

        let module = Module {
            name: "api".to_string(),
            module_path: "example.org/api".to_string(),
            directory: dir.path().to_path_buf(),
            source_files: Vec::new(),
        };
        assert!(!module.requires_code_generation().await);
    }
}
