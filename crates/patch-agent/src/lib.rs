//! Out-of-process delta application for app bundles.
//!
//! The updater spawns this agent detached and exits. The agent then stops
//! any remaining instance of the app, patches the installed bundle in place
//! with `hpatchz` and opens the app again.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Where app bundles are installed unless told otherwise.
pub const DEFAULT_APPS_DIR: &str = "/Applications";

/// One external command of the patch sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl Step {
    fn new(
        program: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Exit status and output of a finished step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a [`Step`] to completion.
pub trait StepRunner {
    fn run(&self, step: &Step) -> std::io::Result<StepOutput>;
}

/// [`StepRunner`] backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl StepRunner for SystemRunner {
    fn run(&self, step: &Step) -> std::io::Result<StepOutput> {
        let output = Command::new(&step.program).args(&step.args).output()?;
        Ok(StepOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// The stop, patch and relaunch commands for one app bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPlan {
    app_name: String,
    delta: PathBuf,
    hpatchz: PathBuf,
    apps_dir: PathBuf,
}

impl PatchPlan {
    pub fn new(
        app_name: impl Into<String>,
        delta: impl Into<PathBuf>,
        hpatchz: impl Into<PathBuf>,
        apps_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            delta: delta.into(),
            hpatchz: hpatchz.into(),
            apps_dir: apps_dir.into(),
        }
    }

    pub fn bundle_name(&self) -> String {
        format!("{}.app", self.app_name)
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.apps_dir.join(self.bundle_name())
    }

    pub fn stop(&self) -> Step {
        Step::new("killall", [self.app_name.as_str()])
    }

    /// Patch the bundle in place; `-f` overwrites the old bundle.
    pub fn patch(&self) -> Step {
        let bundle = self.bundle_path();
        Step::new(
            &self.hpatchz,
            [
                OsString::from("-C-all"),
                bundle.clone().into_os_string(),
                self.delta.clone().into_os_string(),
                bundle.into_os_string(),
                OsString::from("-f"),
            ],
        )
    }

    pub fn relaunch(&self) -> Step {
        Step::new("open", [OsString::from("-a"), OsString::from(self.bundle_name())])
    }

    /// Validate the inputs and run the three steps in order.
    ///
    /// A failed stop is tolerated since the app has usually exited already.
    /// The relaunch runs even when patching failed; the patch error is
    /// returned afterwards.
    pub fn execute(&self, runner: &dyn StepRunner) -> Result<()> {
        ensure_file(&self.delta, "delta")?;
        ensure_file(&self.hpatchz, "hpatchz")?;

        let stop = self.stop();
        match runner.run(&stop) {
            Ok(output) if output.success => {
                tracing::info!(app = %self.app_name, "stopped running app")
            }
            Ok(output) => tracing::debug!(
                app = %self.app_name,
                stderr = %output.stderr.trim(),
                "app was not running"
            ),
            Err(err) => tracing::warn!(step = %stop, %err, "cannot run stop command"),
        }

        let patch = self.patch();
        tracing::info!(step = %patch, "patching bundle");
        let patched = match runner.run(&patch) {
            Ok(output) if output.success => {
                tracing::debug!(stdout = %output.stdout.trim(), "hpatchz finished");
                Ok(())
            }
            Ok(output) => Err(anyhow::anyhow!(
                "hpatchz failed on {}: {}",
                self.bundle_path().display(),
                output.stderr.trim()
            )),
            Err(err) => {
                Err(err).with_context(|| format!("cannot start {}", self.hpatchz.display()))
            }
        };
        if let Err(err) = &patched {
            tracing::error!(error = %err, "patch failed, relaunching the installed version");
        }

        let relaunch = self.relaunch();
        match runner.run(&relaunch) {
            Ok(output) if output.success => {
                tracing::info!(bundle = %self.bundle_name(), "relaunched app")
            }
            Ok(output) => tracing::error!(stderr = %output.stderr.trim(), "relaunch failed"),
            Err(err) => tracing::error!(step = %relaunch, %err, "cannot run relaunch command"),
        }

        patched
    }
}

fn ensure_file(path: &Path, what: &str) -> Result<()> {
    if !path.is_file() {
        bail!("{what} not found at {}", path.display());
    }
    Ok(())
}
