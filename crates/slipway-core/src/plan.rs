//! Build/test plan abstraction and lifecycle contract.
//!
//! A plan is a named, independently runnable unit of build or test work.
//! Every invocation attempt moves through prepare, execute, cleanup;
//! cleanup runs exactly once regardless of how the earlier phases fared.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::context::ProjectContext;
use crate::error::{OrchestratorError, Result};

/// Lifecycle shared by build and test plans.
#[async_trait]
pub trait Plan: Send + Sync {
    /// Plan name; unique within its collection.
    fn name(&self) -> &str;

    /// Root of the source tree this plan covers, relative to the project.
    fn source_path(&self) -> &Path;

    /// Stage external state for execution. May mutate the workspace.
    async fn prepare(&self, ctx: &ProjectContext) -> Result<()>;

    /// Release any state staged by `prepare`. Runs on every exit path.
    async fn cleanup(&self, ctx: &ProjectContext) -> Result<()>;
}

/// A plan that produces build artifacts.
#[async_trait]
pub trait BuildPlan: Plan {
    async fn build(&self, ctx: &ProjectContext) -> Result<()>;
}

/// A plan that runs a test suite and measures its coverage.
#[async_trait]
pub trait TestPlan: Plan {
    async fn run_tests(&self, ctx: &ProjectContext) -> Result<()>;

    /// Aggregate coverage percentage for the suite that just ran.
    async fn fetch_coverage(&self, ctx: &ProjectContext) -> Result<f64>;
}

/// Outcome of one plan invocation.
///
/// Skips are neither pass nor fail; a skip never aborts the run.
#[derive(Debug)]
pub enum PlanOutcome {
    /// The plan did not run; carries the user-visible reason.
    Skipped(String),
    Succeeded,
    Failed(OrchestratorError),
}

/// The plans registered for a run, in registration order.
///
/// Hosts compose this explicitly and hand it to the driver; there is no
/// process-wide registry and no dynamic extension loading.
#[derive(Default)]
pub struct PlanSet {
    build: Vec<Arc<dyn BuildPlan>>,
    test: Vec<Arc<dyn TestPlan>>,
}

impl PlanSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_build(&mut self, plan: Arc<dyn BuildPlan>) {
        self.build.push(plan);
    }

    pub fn register_test(&mut self, plan: Arc<dyn TestPlan>) {
        self.test.push(plan);
    }

    pub fn build_plans(&self) -> &[Arc<dyn BuildPlan>] {
        &self.build
    }

    pub fn test_plans(&self) -> &[Arc<dyn TestPlan>] {
        &self.test
    }
}

/// Resolve a plan body result against its mandatory cleanup.
///
/// Cleanup has already been given its one chance to run by the caller; when
/// both the body and cleanup failed, the body's failure wins and the cleanup
/// failure is logged rather than lost.
pub(crate) fn settle(plan_name: &str, body: Result<()>, cleanup: Result<()>) -> Result<()> {
    match (body, cleanup) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(cleanup_err)) => Err(cleanup_err),
        (Err(body_err), Ok(())) => Err(body_err),
        (Err(body_err), Err(cleanup_err)) => {
            warn!(
                plan = plan_name,
                error = %cleanup_err,
                "cleanup failed while handling an earlier failure"
            );
            Err(body_err)
        }
    }
}

/// Run a plan body with the cleanup-always guarantee.
pub async fn run_with_cleanup<P, F>(plan: &P, ctx: &ProjectContext, body: F) -> Result<()>
where
    P: Plan + ?Sized,
    F: std::future::Future<Output = Result<()>>,
{
    let body_result = body.await;
    let cleanup_result = plan.cleanup(ctx).await;
    settle(plan.name(), body_result, cleanup_result)
}
