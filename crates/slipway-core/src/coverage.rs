//! Coverage manifest persistence and the regression gate.
//!
//! The manifest maps plan names to their last recorded aggregate coverage
//! percentage. It is loaded once per run, mutated as each test plan
//! completes, and persisted once at the end: to a cache file in local mode,
//! or to the blob store under a well-known key otherwise.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slipway_store::BlobStore;
use tracing::warn;

use crate::context::ProjectContext;
use crate::error::{OrchestratorError, Result};

/// Storage key / cache file name for the persisted manifest.
pub const COVERAGE_MANIFEST_KEY: &str = "coverage_manifest.json";

/// Maximum tolerated drop in coverage, in percentage points.
pub const REGRESSION_TOLERANCE: f64 = 1.5;

/// Recorded coverage for one plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectCoverage {
    pub name: String,

    /// Aggregate coverage percentage (0.0 - 100.0).
    pub coverage: f64,
}

/// Per-plan coverage baseline carried across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageManifest {
    projects: BTreeMap<String, ProjectCoverage>,
}

impl CoverageManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored coverage for `name`; missing entries read as 0.0.
    pub fn get(&self, name: &str) -> f64 {
        self.projects.get(name).map(|p| p.coverage).unwrap_or(0.0)
    }

    /// Record `coverage` for `name`, replacing any previous entry.
    pub fn put(&mut self, name: &str, coverage: f64) {
        self.projects.insert(
            name.to_string(),
            ProjectCoverage {
                name: name.to_string(),
                coverage,
            },
        );
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Extract the aggregate percentage from a coverage tool's `total:` line.
///
/// The summary line is whitespace-delimited with the percentage in the third
/// column (e.g. `total: (statements) 81.4%`). Fails when no such line
/// exists.
pub fn parse_total_coverage(plan: &str, output: &str) -> Result<f64> {
    for line in output.lines() {
        let trimmed = line.trim();

        if trimmed.contains("total:") {
            let columns: Vec<&str> = trimmed.split_whitespace().collect();
            let percent = columns
                .get(2)
                .map(|c| c.trim_end_matches('%'))
                .and_then(|c| c.parse::<f64>().ok());

            if let Some(value) = percent {
                return Ok(value);
            }
        }
    }

    Err(OrchestratorError::CoverageExtraction {
        plan: plan.to_string(),
        reason: "no total: summary line in coverage tool output".to_string(),
    })
}

/// Apply the regression gate for one plan and update the manifest.
///
/// A drop of more than `REGRESSION_TOLERANCE` percentage points trips the
/// gate: fatal in CI context, a warning in local context. In both cases the
/// manifest keeps the previous baseline so a regressed value never becomes
/// the new reference. Otherwise the entry is updated to `current`.
pub fn apply_gate(
    manifest: &mut CoverageManifest,
    plan: &str,
    current: f64,
    local: bool,
) -> Result<()> {
    let previous = manifest.get(plan);

    if current - previous <= -REGRESSION_TOLERANCE {
        if local {
            warn!(
                plan,
                previous, current, "coverage regressed; baseline left unchanged"
            );
            return Ok(());
        }

        return Err(OrchestratorError::CoverageRegression {
            plan: plan.to_string(),
            previous,
            current,
        });
    }

    manifest.put(plan, current);
    Ok(())
}

/// Load the persisted manifest for this run.
///
/// Local mode reads the cache file; otherwise the blob store is consulted.
/// An unreadable manifest degrades to an empty one with a warning, so a
/// format change upstream can never wedge the pipeline.
pub async fn load_manifest(
    ctx: &ProjectContext,
    store: &dyn BlobStore,
) -> CoverageManifest {
    let bytes = if ctx.env.local {
        let path = ctx.fs.cache_path(COVERAGE_MANIFEST_KEY);
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(_) => None,
        }
    } else {
        match store.exists(COVERAGE_MANIFEST_KEY).await {
            Ok(true) => store.read(COVERAGE_MANIFEST_KEY).await.ok(),
            _ => None,
        }
    };

    match bytes {
        Some(bytes) => match CoverageManifest::from_bytes(&bytes) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, "unable to decode coverage manifest, starting fresh");
                CoverageManifest::new()
            }
        },
        None => CoverageManifest::new(),
    }
}

/// Persist the manifest once at the end of a test run.
///
/// Remote upload only happens when the run was configured for it.
pub async fn persist_manifest(
    ctx: &ProjectContext,
    store: &dyn BlobStore,
    manifest: &CoverageManifest,
) -> Result<()> {
    let bytes = manifest.to_bytes()?;

    if ctx.env.local {
        std::fs::write(ctx.fs.cache_path(COVERAGE_MANIFEST_KEY), bytes)?;
    } else if ctx.runtime.upload_coverage {
        store.write(COVERAGE_MANIFEST_KEY, &bytes).await?;
    }

    Ok(())
}
