//! Slipway - workspace build/test orchestration
//!
//! ## Commands
//!
//! - `build`: run the registered build plans
//! - `test`: run the registered test plans and apply the coverage gate
//! - `show`: list the registered plans
//!
//! ## Exit codes
//!
//! - `0`: success
//! - `1`: an external command failed
//! - `2`: internal orchestration failure
//! - `3`: coverage-regression gate tripped

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use slipway_core::{
    Driver, GitChangeDetector, GoWorkspaceBuildPlan, GoWorkspaceTestPlan, OrchestratorError,
    PlanSet, ProjectContext, Runtime,
};
use slipway_store::FsBlobStore;

#[derive(Parser)]
#[command(name = "slipway")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build/test orchestration with coverage gating", long_about = None)]
struct Cli {
    /// Echo subprocess output and include captured output in failures
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Run in CI context (regression gate becomes fatal)
    #[arg(long, global = true)]
    ci: bool,

    /// Treat an embedded community checkout as the project root
    #[arg(long, global = true)]
    foss_only: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run registered build plans
    Build {
        /// Skip code-generation steps during preparation
        #[arg(long)]
        no_generation: bool,

        /// Restrict execution to the named plans
        targets: Vec<String>,
    },

    /// Run registered test plans and apply the coverage gate
    Test {
        /// Skip code-generation steps during preparation
        #[arg(long)]
        no_generation: bool,

        /// Upload the coverage manifest after the run (CI context only)
        #[arg(long)]
        upload_coverage: bool,

        /// Only run plans whose source trees have version-control changes
        #[arg(long)]
        scoped: bool,

        /// Run every plan even when change scoping is requested
        #[arg(long)]
        all: bool,

        /// Enable integration test suites
        #[arg(long)]
        integration: bool,

        /// Restrict execution to the named plans
        targets: Vec<String>,
    },

    /// List registered plans
    Show,
}

fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}

/// Register the plans this host ships with.
///
/// Plans are composed here and handed to the driver; there is no implicit
/// process-wide registry.
fn compose_plans(ctx: &ProjectContext) -> PlanSet {
    let mut plans = PlanSet::new();
    plans.register_build(Arc::new(GoWorkspaceBuildPlan::new("go", ctx, None)));
    plans.register_test(Arc::new(GoWorkspaceTestPlan::new("go", ctx, None)));
    plans
}

fn make_driver(cli: &Cli, runtime: Runtime) -> Result<Driver, OrchestratorError> {
    let start_dir = std::env::current_dir()?;
    let ctx = ProjectContext::discover(&start_dir, !cli.ci, cli.foss_only, runtime)?;
    ctx.setup()?;

    let plans = compose_plans(&ctx);
    let store = Arc::new(FsBlobStore::new(ctx.fs.cache_path("store")));

    Ok(Driver::new(ctx, plans, store, Arc::new(GitChangeDetector)))
}

async fn run(cli: &Cli) -> Result<(), OrchestratorError> {
    match &cli.command {
        Commands::Build {
            no_generation,
            targets,
        } => {
            let runtime = Runtime {
                verbose: cli.verbose,
                do_code_generation: !no_generation,
                targets: targets.clone(),
                ..Default::default()
            };

            let driver = make_driver(cli, runtime)?;
            let report = driver.run_builds().await?;
            println!(
                "build complete: {} succeeded, {} skipped",
                report.succeeded_count(),
                report.skipped_count()
            );
            Ok(())
        }

        Commands::Test {
            no_generation,
            upload_coverage,
            scoped,
            all,
            integration,
            targets,
        } => {
            let runtime = Runtime {
                verbose: cli.verbose,
                upload_coverage: *upload_coverage,
                run_integration_tests: *integration,
                do_code_generation: !no_generation,
                scoped: *scoped && !*all,
                targets: targets.clone(),
            };

            let driver = make_driver(cli, runtime)?;
            let report = driver.run_tests().await?;
            println!(
                "tests complete: {} succeeded, {} skipped",
                report.succeeded_count(),
                report.skipped_count()
            );
            Ok(())
        }

        Commands::Show => {
            let driver = make_driver(cli, Runtime::default())?;

            println!("build plans:");
            for plan in driver.plans().build_plans() {
                println!("  {}", plan.name());
            }
            println!("test plans:");
            for plan in driver.plans().test_plans() {
                println!("  {}", plan.name());
            }
            Ok(())
        }
    }
}

fn exit_code(err: &OrchestratorError) -> i32 {
    match err {
        OrchestratorError::CommandFailed { .. } => 1,
        OrchestratorError::CoverageRegression { .. } => 3,
        _ => 2,
    }
}

fn report_failure(err: &OrchestratorError, verbose: bool) {
    eprintln!("error: {err}");

    if verbose {
        if let Some(output) = err.captured_output() {
            eprintln!("--- captured output ---");
            eprint!("{output}");
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    if let Err(e) = run(&cli).await {
        report_failure(&e, cli.verbose);
        std::process::exit(exit_code(&e));
    }
}
