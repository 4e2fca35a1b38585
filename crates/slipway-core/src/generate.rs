//! Concurrent code-generation fan-out.
//!
//! Generation runs host-native regardless of any cross-compilation settings
//! configured for the eventual build, so the target-selection variables are
//! stripped from the child environment before dispatch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

use crate::context::ProjectContext;
use crate::error::{OrchestratorError, Result};
use crate::exec;
use crate::workspace::Module;

/// Environment variables forcing a generation target; always removed.
const TARGET_ENV_VARS: &[&str] = &["GOOS", "GOARCH"];

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn generation_env(
    ctx: &ProjectContext,
    mut env: HashMap<String, String>,
) -> HashMap<String, String> {
    for var in TARGET_ENV_VARS {
        env.remove(*var);
    }

    if !ctx.env.local {
        // Outside an engineer's environment the module cache lives under the
        // run's cache directory.
        env.insert(
            "GOPATH".to_string(),
            ctx.fs.cache_path("go").to_string_lossy().into_owned(),
        );
    }

    env
}

async fn generate_module(
    directory: PathBuf,
    environment: HashMap<String, String>,
    log_path: PathBuf,
    echo: bool,
) -> Result<()> {
    let cmd = [
        "go".to_string(),
        "generate".to_string(),
        "./".to_string(),
    ];
    exec::run_logged(&cmd, &directory, Some(environment), &log_path, echo).await?;
    Ok(())
}

/// Run code generation for every module under `root` that carries a
/// generation directive, fanning out over a bounded worker pool.
///
/// All tasks are awaited before returning; if any fail, the first observed
/// failure is surfaced after the join completes. Output from every task is
/// appended to the shared per-plan log at `log_path`.
pub async fn generate_workspace(
    ctx: &ProjectContext,
    root: &Module,
    log_path: &Path,
) -> Result<()> {
    if !root.requires_code_generation().await {
        return Ok(());
    }

    info!(module = %root.module_path, "running code generation");

    let environment = generation_env(ctx, ctx.base_env());

    let mut targets = Vec::new();
    for module in Module::list(&root.directory, true).await? {
        if module.requires_code_generation().await {
            targets.push(module);
        }
    }

    let pool = Arc::new(Semaphore::new(worker_count()));
    let mut tasks = JoinSet::new();

    for module in targets {
        let pool = Arc::clone(&pool);
        let environment = environment.clone();
        let log_path = log_path.to_path_buf();
        let echo = ctx.runtime.verbose;

        tasks.spawn(async move {
            let _permit = pool.acquire_owned().await.map_err(|_| {
                OrchestratorError::Internal("generation worker pool closed".to_string())
            })?;
            generate_module(module.directory, environment, log_path, echo).await
        });
    }

    // First failure wins, but every task is awaited before it surfaces.
    let mut first_failure: Option<OrchestratorError> = None;

    while let Some(joined) = tasks.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => Err(OrchestratorError::Internal(format!(
                "generation task panicked: {e}"
            ))),
        };

        if let Err(e) = outcome {
            first_failure.get_or_insert(e);
        }
    }

    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
