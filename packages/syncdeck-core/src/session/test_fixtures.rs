//! Fake player processes for session tests.
//!
//! Each fake process gets an in-memory stdin pipe the test can read from and
//! an output channel the test feeds lines into. Closing the output channel
//! looks to the relay exactly like the player exiting.

use std::ffi::{OsStr, OsString};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::io::DuplexStream;

use super::launcher::{LaunchError, LaunchedProcess, ProcessControl, ProcessSpawner};
use super::SessionRequest;

pub(crate) fn request(media_path: &str) -> SessionRequest {
    SessionRequest {
        server: "sync.example.com".into(),
        room: "movie-night".into(),
        username: "alice".into(),
        media_path: media_path.into(),
    }
}

/// Media root with `movie.mp4` in it.
pub(crate) fn media_root() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("movie.mp4"), b"fake").unwrap();
    dir
}

/// Test-side ends of a fake player.
pub(crate) struct FakeProcess {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// Everything the session writes to the player's stdin.
    pub stdin: DuplexStream,
    /// Lines sent here appear as player output.
    pub output: UnboundedSender<io::Result<String>>,
    terminated: Arc<AtomicBool>,
}

impl FakeProcess {
    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

struct FakeControl {
    terminated: Arc<AtomicBool>,
    output: Option<UnboundedSender<io::Result<String>>>,
    fail_signal: bool,
}

impl ProcessControl for FakeControl {
    fn terminate(self: Box<Self>, _grace: Duration) -> io::Result<()> {
        self.terminated.store(true, Ordering::SeqCst);
        if let Some(output) = &self.output {
            output.close_channel();
        }
        if self.fail_signal {
            Err(io::Error::from_raw_os_error(3))
        } else {
            Ok(())
        }
    }
}

pub(crate) struct FakeSpawner {
    processes: Mutex<Vec<Option<FakeProcess>>>,
    fail_spawn: bool,
    fail_signal: bool,
    close_output_on_terminate: bool,
    spawn_delay: Option<Duration>,
    stdin_capacity: usize,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(Vec::new()),
            fail_spawn: false,
            fail_signal: false,
            close_output_on_terminate: true,
            spawn_delay: None,
            stdin_capacity: 4096,
        }
    }

    /// Every spawn fails as if the binary were missing.
    pub fn failing() -> Self {
        Self {
            fail_spawn: true,
            ..Self::new()
        }
    }

    pub fn with_spawn_delay(mut self, delay: Duration) -> Self {
        self.spawn_delay = Some(delay);
        self
    }

    /// Bytes the stdin pipe buffers before writes block.
    pub fn with_stdin_capacity(mut self, capacity: usize) -> Self {
        self.stdin_capacity = capacity;
        self
    }

    pub fn with_failing_signal(mut self) -> Self {
        self.fail_signal = true;
        self
    }

    /// Terminated processes keep their output open until the test closes it.
    pub fn keep_output_open_on_terminate(mut self) -> Self {
        self.close_output_on_terminate = false;
        self
    }

    pub fn spawn_count(&self) -> usize {
        self.processes.lock().len()
    }

    /// Takes the test-side handles of the `index`-th spawned process.
    pub fn take_process(&self, index: usize) -> FakeProcess {
        self.processes.lock()[index]
            .take()
            .expect("process already taken")
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, program: &OsStr, args: &[OsString]) -> Result<LaunchedProcess, LaunchError> {
        if let Some(delay) = self.spawn_delay {
            std::thread::sleep(delay);
        }
        if self.fail_spawn {
            return Err(LaunchError::SpawnFailed(io::Error::new(
                io::ErrorKind::NotFound,
                "No such file or directory",
            )));
        }

        let (input, stdin) = tokio::io::duplex(self.stdin_capacity);
        let (output_tx, output_rx) = unbounded();
        let terminated = Arc::new(AtomicBool::new(false));

        let control = FakeControl {
            terminated: Arc::clone(&terminated),
            output: self
                .close_output_on_terminate
                .then(|| output_tx.clone()),
            fail_signal: self.fail_signal,
        };

        self.processes.lock().push(Some(FakeProcess {
            program: program.to_owned(),
            args: args.to_vec(),
            stdin,
            output: output_tx,
            terminated,
        }));

        Ok(LaunchedProcess {
            pid: Some(4242),
            input: Box::pin(input),
            output: output_rx.boxed(),
            control: Box::new(control),
        })
    }
}
