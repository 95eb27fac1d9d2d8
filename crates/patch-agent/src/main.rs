//! Patch agent spawned by the updater to apply a delta to an installed app bundle.

use clap::Parser;
use patch_agent::{PatchPlan, SystemRunner, DEFAULT_APPS_DIR};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

/// Command-line arguments for the patch agent
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Name of the app, without the `.app` suffix
    app_name: String,

    /// Path to the downloaded delta
    delta_path: PathBuf,

    /// Path to the hpatchz binary
    hpatchz_path: PathBuf,

    /// Directory the app bundle is installed in
    #[arg(long, default_value = DEFAULT_APPS_DIR)]
    apps_dir: PathBuf,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug,patch_agent=debug")
    } else {
        EnvFilter::new("info,patch_agent=info")
    };
    fmt().with_env_filter(filter).init();

    tracing::info!(
        app = %args.app_name,
        delta = %args.delta_path.display(),
        "applying delta"
    );

    let plan = PatchPlan::new(args.app_name, args.delta_path, args.hpatchz_path, args.apps_dir);
    plan.execute(&SystemRunner)?;

    tracing::info!("delta applied");
    Ok(())
}
