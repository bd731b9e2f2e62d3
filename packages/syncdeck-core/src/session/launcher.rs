//! Player process launching.
//!
//! [`ProcessLauncher`] turns a [`SessionRequest`] into a fixed argument
//! vector and hands it to a [`ProcessSpawner`]. Arguments are passed to the
//! OS directly and never through a shell, so room and user names cannot
//! inject anything.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, Stream};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio_util::task::TaskTracker;

use super::SessionRequest;
use crate::protocol_constants::{ARG_END_OF_OPTIONS, ARG_HOST, ARG_NAME, ARG_NO_GUI, ARG_ROOM};
use crate::state::Config;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Invalid media path: {0}")]
    InvalidMediaPath(String),
    #[error("Failed to start player: {0}")]
    SpawnFailed(#[from] io::Error),
}

/// Writable end of the player's stdin.
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// The player's output, one item per line (stdout and stderr merged).
pub type OutputLines = BoxStream<'static, io::Result<String>>;

/// Termination handle for a spawned player.
pub trait ProcessControl: Send {
    /// Asks the process to exit and reaps it in the background.
    ///
    /// Signal delivery is best-effort: an error here means the request could
    /// not be sent, not that the caller should keep the session alive.
    fn terminate(self: Box<Self>, grace: Duration) -> io::Result<()>;
}

/// A running player with its piped I/O.
pub struct LaunchedProcess {
    pub pid: Option<u32>,
    pub input: InputSink,
    pub output: OutputLines,
    pub control: Box<dyn ProcessControl>,
}

/// Starts a program with piped stdin/stdout/stderr.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(&self, program: &OsStr, args: &[OsString]) -> Result<LaunchedProcess, LaunchError>;
}

/// Builds the player command line and spawns it.
pub struct ProcessLauncher {
    program: PathBuf,
    extra_args: Vec<String>,
    media_root: PathBuf,
    spawner: Arc<dyn ProcessSpawner>,
}

impl ProcessLauncher {
    pub fn new(config: &Config, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            program: config.player_binary.clone(),
            extra_args: config.player_extra_args.clone(),
            media_root: config.media_root.clone(),
            spawner,
        }
    }

    /// Resolves the media path under the root and starts the player.
    ///
    /// Nothing is spawned when the path does not resolve to an existing file
    /// inside the media root.
    pub fn launch(
        &self,
        request: &SessionRequest,
    ) -> Result<(LaunchedProcess, PathBuf), LaunchError> {
        let media_path = resolve_media_path(&self.media_root, &request.media_path)?;
        let args = build_player_args(&self.extra_args, request, &media_path);

        log::info!(
            "[Launcher] Spawning {} for room '{}' on {} as '{}'",
            self.program.display(),
            request.room,
            request.server,
            request.username
        );
        log::debug!("[Launcher] Arguments: {:?}", args);

        let process = self.spawner.spawn(self.program.as_os_str(), &args)?;
        Ok((process, media_path))
    }
}

/// Builds the player argument vector.
///
/// Order is fixed: extra args, `--no-gui`, host, name, room, then `--` and
/// the media path as the final positional argument.
pub fn build_player_args(
    extra_args: &[String],
    request: &SessionRequest,
    media_path: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = extra_args.iter().map(OsString::from).collect();
    args.extend(
        [
            ARG_NO_GUI,
            ARG_HOST,
            request.server.as_str(),
            ARG_NAME,
            request.username.as_str(),
            ARG_ROOM,
            request.room.as_str(),
            ARG_END_OF_OPTIONS,
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.push(media_path.as_os_str().to_owned());
    args
}

/// Resolves `requested` against `root`, rejecting anything that escapes it.
///
/// Both paths are canonicalized, so `..` segments and symlinks are followed
/// before the containment check. The target must be an existing file.
pub fn resolve_media_path(root: &Path, requested: &str) -> Result<PathBuf, LaunchError> {
    let root = root.canonicalize().map_err(|e| {
        LaunchError::InvalidMediaPath(format!("media root {} unavailable: {}", root.display(), e))
    })?;

    let resolved = root
        .join(requested)
        .canonicalize()
        .map_err(|_| LaunchError::InvalidMediaPath(format!("{} not found", requested)))?;

    if !resolved.starts_with(&root) {
        log::warn!("[Launcher] Rejected path outside media root: {}", requested);
        return Err(LaunchError::InvalidMediaPath(format!(
            "{} is outside the media root",
            requested
        )));
    }
    if !resolved.is_file() {
        return Err(LaunchError::InvalidMediaPath(format!(
            "{} is not a file",
            requested
        )));
    }
    Ok(resolved)
}

/// Spawns real OS processes through `tokio::process`.
///
/// Background reapers of terminated players are tracked so shutdown can wait
/// for them instead of dropping the runtime under a player that is still
/// inside its grace period.
#[derive(Clone, Default)]
pub struct TokioProcessSpawner {
    reapers: TaskTracker,
}

impl TokioProcessSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker of the reaper tasks spawned by [`ProcessControl::terminate`].
    pub fn reapers(&self) -> TaskTracker {
        self.reapers.clone()
    }
}

impl ProcessSpawner for TokioProcessSpawner {
    fn spawn(&self, program: &OsStr, args: &[OsString]) -> Result<LaunchedProcess, LaunchError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let missing =
            |name: &str| LaunchError::SpawnFailed(io::Error::other(format!("{} not captured", name)));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let output = tokio_stream::StreamExt::merge(lossy_lines(stdout), lossy_lines(stderr));

        let pid = child.id();
        log::info!("[Launcher] Player started (pid {:?})", pid);

        Ok(LaunchedProcess {
            pid,
            input: Box::pin(stdin),
            output: Box::pin(output),
            control: Box::new(ChildControl {
                child,
                reapers: self.reapers.clone(),
            }),
        })
    }
}

/// Splits output into lines, replacing invalid UTF-8 instead of failing.
///
/// The terminator (`\n` or `\r\n`) is stripped. A trailing line without a
/// terminator is still yielded.
fn lossy_lines<R>(reader: R) -> impl Stream<Item = io::Result<String>> + Send
where
    R: AsyncRead + Unpin + Send + 'static,
{
    stream::unfold(BufReader::new(reader), |mut reader| async move {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => None,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                Some((Ok(line), reader))
            }
            Err(e) => Some((Err(e), reader)),
        }
    })
}

struct ChildControl {
    child: Child,
    reapers: TaskTracker,
}

impl ProcessControl for ChildControl {
    fn terminate(self: Box<Self>, grace: Duration) -> io::Result<()> {
        let ChildControl { mut child, reapers } = *self;
        let signalled = request_exit(&mut child);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                reapers.spawn_on(reap(child, grace), &handle);
            }
            Err(_) => {
                // No runtime to wait on; kill_on_drop finishes the job.
                let _ = child.start_kill();
            }
        }
        signalled
    }
}

#[cfg(unix)]
fn request_exit(child: &mut Child) -> io::Result<()> {
    // Already reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    // SAFETY: `pid` is our own child and has not been reaped, so it cannot
    // have been recycled for another process.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn request_exit(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

/// Waits for the player to exit, killing it once the grace period is over.
async fn reap(mut child: Child, grace: Duration) {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => log::info!("[Launcher] Player exited: {}", status),
        Ok(Err(e)) => log::warn!("[Launcher] Failed to wait for player: {}", e),
        Err(_) => {
            log::warn!(
                "[Launcher] Player still running after {:?}, killing",
                grace
            );
            if let Err(e) = child.kill().await {
                log::warn!("[Launcher] Failed to kill player: {}", e);
            }
        }
    }
}
