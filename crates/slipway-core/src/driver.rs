//! Top-level driver running a registered collection of plans.
//!
//! Plans run sequentially in registration order. A non-empty target
//! allow-list restricts which plans run; change-scoped test runs also skip
//! plans whose source trees show no version-control changes. Skips are
//! always visible and never count as pass or fail. The driver stops at the
//! first real failure; the coverage manifest is persisted only when the run
//! completes.

use std::sync::Arc;

use slipway_store::BlobStore;
use tracing::info;

use crate::context::ProjectContext;
use crate::coverage::{self, CoverageManifest};
use crate::error::Result;
use crate::git::ChangeDetector;
use crate::plan::{run_with_cleanup, PlanOutcome, PlanSet, TestPlan};

/// Summary of one driver invocation.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Plan name paired with its outcome, in execution order.
    pub outcomes: Vec<(String, PlanOutcome)>,
}

impl RunReport {
    fn record(&mut self, name: &str, outcome: PlanOutcome) {
        self.outcomes.push((name.to_string(), outcome));
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PlanOutcome::Succeeded))
            .count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, PlanOutcome::Skipped(_)))
            .count()
    }
}

/// Orchestrates the registered plans for one process invocation.
pub struct Driver {
    ctx: ProjectContext,
    plans: PlanSet,
    store: Arc<dyn BlobStore>,
    detector: Arc<dyn ChangeDetector>,
}

impl Driver {
    pub fn new(
        ctx: ProjectContext,
        plans: PlanSet,
        store: Arc<dyn BlobStore>,
        detector: Arc<dyn ChangeDetector>,
    ) -> Self {
        Self {
            ctx,
            plans,
            store,
            detector,
        }
    }

    pub fn context(&self) -> &ProjectContext {
        &self.ctx
    }

    pub fn plans(&self) -> &PlanSet {
        &self.plans
    }

    fn target_selected(&self, name: &str) -> bool {
        let targets = &self.ctx.runtime.targets;
        targets.is_empty() || targets.iter().any(|t| t == name)
    }

    /// Run every registered build plan.
    pub async fn run_builds(&self) -> Result<RunReport> {
        let mut report = RunReport::default();

        for plan in self.plans.build_plans() {
            if !self.target_selected(plan.name()) {
                info!(plan = plan.name(), "skipping build plan: not in target list");
                report.record(plan.name(), PlanOutcome::Skipped("not targeted".into()));
                continue;
            }

            info!(plan = plan.name(), "running build plan");

            let outcome = run_with_cleanup(plan.as_ref(), &self.ctx, async {
                plan.prepare(&self.ctx).await?;
                plan.build(&self.ctx).await
            })
            .await;

            match outcome {
                Ok(()) => report.record(plan.name(), PlanOutcome::Succeeded),
                Err(e) => {
                    report.record(plan.name(), PlanOutcome::Failed(e));
                    return Self::fail_report(report);
                }
            }
        }

        Ok(report)
    }

    /// Run every registered test plan and apply the coverage gate.
    pub async fn run_tests(&self) -> Result<RunReport> {
        let mut report = RunReport::default();
        let mut manifest = coverage::load_manifest(&self.ctx, self.store.as_ref()).await;

        for plan in self.plans.test_plans() {
            let outcome = self.execute_test_plan(plan.as_ref(), &mut manifest).await;

            match outcome {
                PlanOutcome::Skipped(reason) => {
                    info!(plan = plan.name(), reason, "skipping test plan");
                    report.record(plan.name(), PlanOutcome::Skipped(reason));
                }
                PlanOutcome::Succeeded => {
                    report.record(plan.name(), PlanOutcome::Succeeded);
                }
                PlanOutcome::Failed(e) => {
                    report.record(plan.name(), PlanOutcome::Failed(e));
                    return Self::fail_report(report);
                }
            }
        }

        coverage::persist_manifest(&self.ctx, self.store.as_ref(), &manifest).await?;
        Ok(report)
    }

    async fn execute_test_plan(
        &self,
        plan: &dyn TestPlan,
        manifest: &mut CoverageManifest,
    ) -> PlanOutcome {
        if !self.target_selected(plan.name()) {
            return PlanOutcome::Skipped("not in target list".to_string());
        }

        if self.ctx.runtime.scoped {
            let changed = self
                .detector
                .path_has_changes(self.ctx.fs.project_root(), plan.source_path());

            match changed {
                Ok(false) => {
                    return PlanOutcome::Skipped(
                        "no changes detected under source path".to_string(),
                    );
                }
                Ok(true) => {}
                Err(e) => return PlanOutcome::Failed(e),
            }
        }

        info!(plan = plan.name(), "running test plan");

        let tests = run_with_cleanup(plan, &self.ctx, async {
            plan.prepare(&self.ctx).await?;
            plan.run_tests(&self.ctx).await
        })
        .await;

        if let Err(e) = tests {
            return PlanOutcome::Failed(e);
        }

        let current = match plan.fetch_coverage(&self.ctx).await {
            Ok(value) => value,
            Err(e) => return PlanOutcome::Failed(e),
        };

        match coverage::apply_gate(manifest, plan.name(), current, self.ctx.env.local) {
            Ok(()) => PlanOutcome::Succeeded,
            Err(e) => PlanOutcome::Failed(e),
        }
    }

    fn fail_report(report: RunReport) -> Result<RunReport> {
        // The failed plan's error is the one surfaced to the caller.
        let failure = report
            .outcomes
            .into_iter()
            .rev()
            .find_map(|(_, outcome)| match outcome {
                PlanOutcome::Failed(e) => Some(e),
                _ => None,
            });

        match failure {
            Some(e) => Err(e),
            None => Ok(RunReport::default()),
        }
    }
}
