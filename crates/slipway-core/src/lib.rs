//! Slipway-Core: plan orchestration and coverage gating
//!
//! Discovers the modules of a multi-module workspace, runs registered build
//! and test plans under a common prepare/execute/cleanup lifecycle, and
//! gates test runs on code-coverage regression against a persisted baseline.
//!
//! ## Key Components
//!
//! - `exec`: subprocess execution with multiplexed output capture
//! - `jsonstream`: incremental decoding of concatenated JSON values
//! - `workspace`: workspace descriptor parsing and module discovery
//! - `generate`: bounded concurrent code-generation fan-out
//! - `plan` / `driver`: the plan lifecycle contract and the run driver
//! - `coverage`: coverage manifest persistence and the regression gate

pub mod context;
pub mod coverage;
pub mod driver;
mod error;
pub mod exec;
pub mod generate;
pub mod git;
pub mod golang;
pub mod jsonstream;
pub mod plan;
pub mod version;
pub mod workspace;

pub use context::{Environment, Filesystem, ProjectContext, Runtime};
pub use coverage::{CoverageManifest, ProjectCoverage, REGRESSION_TOLERANCE};
pub use driver::{Driver, RunReport};
pub use error::{OrchestratorError, Result};
pub use git::{ChangeDetector, GitChangeDetector};
pub use golang::{GoWorkspaceBuildPlan, GoWorkspaceTestPlan};
pub use jsonstream::JsonStream;
pub use plan::{BuildPlan, Plan, PlanOutcome, PlanSet, TestPlan};
pub use version::Version;
pub use workspace::{workspace_modules, Module};
