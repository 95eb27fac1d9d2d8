//! Platform-specific hand-off of a pending update.
//!
//! Full updates go back to the native engine. Deltas are started as detached
//! processes that outlive the app:
//! - **Windows**: the delta artefact is itself a silent installer.
//! - **macOS**: the bundled patch agent stops the app, runs `hpatchz` over the
//!   installed bundle and relaunches it. Both helper binaries are copied out of
//!   the read-only app bundle into a writable directory first.

use crate::context::{AppContext, Platform};
use crate::engine::UpdateEngine;
use crate::error::{Result, UpdaterError};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::task;

/// Flags passed to a delta installer: silent, no automatic restart.
///
/// Used for both the confirmed quit-and-install and the plain-quit paths.
pub const DELTA_INSTALLER_ARGS: &[&str] = &["/S", "--norestart"];

/// File name of the bundled patch agent.
pub const PATCH_AGENT_BINARY: &str = "patch-agent";

/// File name of the bundled binary-diff tool.
pub const HPATCHZ_BINARY: &str = "hpatchz";

/// Starts processes that keep running after the updater's process exits.
pub trait ProcessSpawner: Send + Sync {
    fn spawn_detached(&self, program: &Path, args: &[OsString]) -> io::Result<()>;
}

/// [`ProcessSpawner`] backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedSpawner;

impl ProcessSpawner for DetachedSpawner {
    fn spawn_detached(&self, program: &Path, args: &[OsString]) -> io::Result<()> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so the child survives the parent's exit signals.
            command.process_group(0);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        let child = command.spawn()?;
        tracing::info!(
            target: "updater",
            program = %program.display(),
            pid = child.id(),
            "spawned detached process"
        );
        Ok(())
    }
}

/// Locations of the helper binaries after relocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundledTools {
    pub patch_agent: PathBuf,
    pub hpatchz: PathBuf,
}

/// Applies full and delta updates for one platform.
#[derive(Clone)]
pub struct PatchApplier {
    platform: Platform,
    app_name: String,
    resources_dir: PathBuf,
    tools_dir: PathBuf,
    engine: Arc<dyn UpdateEngine>,
    spawner: Arc<dyn ProcessSpawner>,
}

impl PatchApplier {
    /// `resources_dir` holds the bundled helpers, `tools_dir` is the writable
    /// directory they are copied to before use.
    pub fn new(
        context: &AppContext,
        resources_dir: impl Into<PathBuf>,
        tools_dir: impl Into<PathBuf>,
        engine: Arc<dyn UpdateEngine>,
        spawner: Arc<dyn ProcessSpawner>,
    ) -> Self {
        Self {
            platform: context.platform,
            app_name: context.app_name.clone(),
            resources_dir: resources_dir.into(),
            tools_dir: tools_dir.into(),
            engine,
            spawner,
        }
    }

    /// Hand the downloaded full update to the native engine.
    pub async fn apply_full(&self, force_run_after: bool) -> Result<()> {
        tracing::info!(target: "updater", force_run_after, "installing full update");
        self.engine.quit_and_install(true, force_run_after).await
    }

    /// Start the platform patch mechanism for `artifact` without waiting for it.
    ///
    /// Helper relocation and the spawn run on the blocking pool.
    pub async fn apply_delta(&self, artifact: &Path) -> Result<()> {
        let applier = self.clone();
        let artifact = artifact.to_path_buf();
        task::spawn_blocking(move || applier.hand_off_delta(&artifact))
            .await
            .map_err(|err| UpdaterError::Other(format!("task join error: {err}")))?
    }

    fn hand_off_delta(&self, artifact: &Path) -> Result<()> {
        match self.platform {
            Platform::Windows => {
                let args: Vec<OsString> = DELTA_INSTALLER_ARGS.iter().map(OsString::from).collect();
                self.spawn(artifact, &args)
            }
            Platform::MacOs => {
                let tools = self.relocate_tools()?;
                let args = vec![
                    OsString::from(&self.app_name),
                    artifact.as_os_str().to_owned(),
                    tools.hpatchz.as_os_str().to_owned(),
                ];
                self.spawn(&tools.patch_agent, &args)
            }
            Platform::Linux => Err(UpdaterError::Unsupported("delta updates")),
        }
    }

    /// Copy the patch agent and `hpatchz` out of the app bundle.
    ///
    /// Existing copies are replaced, so calling this repeatedly is safe.
    pub fn relocate_tools(&self) -> Result<BundledTools> {
        fs::create_dir_all(&self.tools_dir).map_err(|err| {
            UpdaterError::PatchApply(format!(
                "cannot create {}: {err}",
                self.tools_dir.display()
            ))
        })?;

        Ok(BundledTools {
            patch_agent: self.relocate(PATCH_AGENT_BINARY)?,
            hpatchz: self.relocate(HPATCHZ_BINARY)?,
        })
    }

    fn relocate(&self, name: &str) -> Result<PathBuf> {
        let source = self.resources_dir.join(name);
        let target = self.tools_dir.join(name);

        copy_executable(&source, &target).map_err(|err| {
            UpdaterError::PatchApply(format!(
                "cannot relocate {} to {}: {err}",
                source.display(),
                target.display()
            ))
        })?;

        tracing::debug!(
            target: "updater",
            from = %source.display(),
            to = %target.display(),
            "relocated helper"
        );
        Ok(target)
    }

    fn spawn(&self, program: &Path, args: &[OsString]) -> Result<()> {
        self.spawner.spawn_detached(program, args).map_err(|err| {
            UpdaterError::PatchApply(format!("cannot start {}: {err}", program.display()))
        })
    }
}

/// Atomically replace `target` with an executable copy of `source`.
fn copy_executable(source: &Path, target: &Path) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent"))?;

    let mut input = File::open(source)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    io::copy(&mut input, temp.as_file_mut())?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = temp.as_file().metadata()?.permissions();
        perms.set_mode(0o755);
        temp.as_file().set_permissions(perms)?;
    }

    temp.persist(target).map_err(|err| err.error)?;
    Ok(())
}
