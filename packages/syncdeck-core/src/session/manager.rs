//! Session manager: the single authority over the player process.
//!
//! All state transitions happen under one mutex. Spawning runs outside the
//! lock while the state reads `Starting`, and command writes run outside it
//! behind the dispatcher's own lock, so neither can stall the other entry
//! points.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use super::dispatcher::{Command, CommandDispatcher, DispatchError};
use super::launcher::{LaunchError, ProcessControl, ProcessLauncher, ProcessSpawner};
use super::relay::{run_output_relay, RelayEnd, RelayExit};
use super::{SessionHandle, SessionInfo, SessionRequest, SessionState};
use crate::events::{EventEmitter, SessionEvent};
use crate::protocol_constants::PLAYER_NAME;
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::state::Config;
use crate::utils::now_millis;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("Syncplay is already running.")]
    AlreadyRunning,
    #[error("Invalid session request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("Session start was cancelled by a stop request")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StopError {
    #[error("No active session")]
    NoActiveSession,
}

struct ActiveSession {
    handle: SessionHandle,
    dispatcher: Arc<CommandDispatcher>,
    control: Box<dyn ProcessControl>,
}

/// A start that is between `Starting` and its outcome.
struct PendingStart {
    session_id: u64,
    cancelled: bool,
}

#[derive(Default)]
struct Inner {
    state: SessionState,
    pending: Option<PendingStart>,
    active: Option<ActiveSession>,
}

impl Inner {
    fn active_id(&self) -> Option<u64> {
        self.active.as_ref().map(|s| s.handle.session_id)
    }
}

/// Owns the one live session and enforces `Idle → Starting → Running → Stopping → Idle`.
pub struct SessionManager {
    inner: Mutex<Inner>,
    launcher: ProcessLauncher,
    emitter: Arc<dyn EventEmitter>,
    spawner: TokioSpawner,
    next_id: AtomicU64,
    write_timeout: Option<Duration>,
    stop_grace: Duration,
}

impl SessionManager {
    pub fn new(
        config: &Config,
        process_spawner: Arc<dyn ProcessSpawner>,
        emitter: Arc<dyn EventEmitter>,
        spawner: TokioSpawner,
    ) -> Self {
        let write_timeout =
            (config.command_timeout_ms > 0).then(|| Duration::from_millis(config.command_timeout_ms));
        Self {
            inner: Mutex::new(Inner::default()),
            launcher: ProcessLauncher::new(config, process_spawner),
            emitter,
            spawner,
            next_id: AtomicU64::new(1),
            write_timeout,
            stop_grace: Duration::from_millis(config.stop_grace_ms),
        }
    }

    /// Returns the current lifecycle state.
    pub fn current_state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Returns the state together with the running session's details.
    pub fn snapshot(&self) -> SessionInfo {
        let inner = self.inner.lock();
        SessionInfo {
            state: inner.state,
            session: inner.active.as_ref().map(|s| s.handle.clone()),
        }
    }

    /// Spawns the player and starts relaying its output.
    ///
    /// Only one session may exist: any call made while a session is starting
    /// or running fails with `AlreadyRunning` and spawns nothing.
    pub fn start(self: &Arc<Self>, request: SessionRequest) -> Result<SessionHandle, StartError> {
        let session_id = {
            let mut inner = self.inner.lock();
            if inner.state != SessionState::Idle {
                log::info!("[Session] Start rejected: session is {}", inner.state);
                return Err(StartError::AlreadyRunning);
            }
            request.validate().map_err(StartError::InvalidRequest)?;

            let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
            inner.pending = Some(PendingStart {
                session_id,
                cancelled: false,
            });
            self.transition(&mut inner, SessionState::Starting, session_id);
            session_id
        };

        let launched = self.launcher.launch(&request);

        let mut inner = self.inner.lock();
        let cancelled = inner.pending.take().is_some_and(|p| p.cancelled);

        let (process, media_path) = match launched {
            Ok(launched) => launched,
            Err(e) => {
                log::warn!("[Session] Session {} failed to launch: {}", session_id, e);
                self.transition(&mut inner, SessionState::Idle, session_id);
                return Err(e.into());
            }
        };

        if cancelled {
            log::info!("[Session] Session {} stopped while starting", session_id);
            if let Err(e) = process.control.terminate(self.stop_grace) {
                log::warn!("[Session] Failed to signal cancelled player: {}", e);
            }
            self.transition(&mut inner, SessionState::Idle, session_id);
            return Err(StartError::Cancelled);
        }

        let handle = SessionHandle {
            session_id,
            pid: process.pid,
            server: request.server,
            room: request.room,
            username: request.username,
            media_path,
            started_at: now_millis(),
        };
        inner.active = Some(ActiveSession {
            handle: handle.clone(),
            dispatcher: Arc::new(CommandDispatcher::new(process.input, self.write_timeout)),
            control: process.control,
        });
        self.transition(&mut inner, SessionState::Running, session_id);
        self.status(
            format!("Connecting to {} in room {}...", handle.server, handle.room),
            None,
        );
        drop(inner);

        let manager = Arc::clone(self);
        let emitter = Arc::clone(&self.emitter);
        let output = process.output;
        self.spawner.spawn(async move {
            let exit = run_output_relay(session_id, output, emitter).await;
            manager.handle_relay_exit(exit);
        });

        log::info!(
            "[Session] Session {} running (pid {:?})",
            session_id,
            handle.pid
        );
        Ok(handle)
    }

    /// Stops the current session.
    ///
    /// The player is signalled best-effort; the session is cleared and the
    /// state returns to `Idle` whether or not the signal could be sent. A
    /// stop during `Starting` cancels the launch.
    pub fn stop(&self) -> Result<(), StopError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Idle => Err(StopError::NoActiveSession),
            SessionState::Starting => {
                if let Some(pending) = inner.pending.as_mut() {
                    pending.cancelled = true;
                }
                Ok(())
            }
            SessionState::Running | SessionState::Stopping => {
                self.teardown(&mut inner, "Session stopped.".to_string(), None);
                Ok(())
            }
        }
    }

    /// Stops the session only if it is still `session_id`.
    ///
    /// Used when the client that started a session disconnects. Returns
    /// whether anything was stopped or cancelled.
    pub fn stop_session(&self, session_id: u64, reason: &str) -> bool {
        self.stop_if_current(session_id, reason.to_string(), None)
    }

    fn stop_if_current(&self, session_id: u64, reason: String, code: Option<&'static str>) -> bool {
        let mut inner = self.inner.lock();
        if let Some(pending) = inner
            .pending
            .as_mut()
            .filter(|p| p.session_id == session_id)
        {
            pending.cancelled = true;
            return true;
        }
        if inner.active_id() == Some(session_id) {
            self.teardown(&mut inner, reason, code);
            return true;
        }
        false
    }

    /// Sends a command to the running player.
    ///
    /// Invalid commands are rejected before the state is consulted. Outside
    /// `Running` this is a no-op reporting `NoActiveSession`. A broken pipe
    /// or a timed-out write tears the session down.
    pub async fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        command.encode()?;

        let (session_id, dispatcher) = {
            let inner = self.inner.lock();
            match (&inner.state, &inner.active) {
                (SessionState::Running, Some(session)) => (
                    session.handle.session_id,
                    Arc::clone(&session.dispatcher),
                ),
                _ => {
                    log::debug!("[Session] Dropping {:?}: no active session", command);
                    return Err(DispatchError::NoActiveSession);
                }
            }
        };

        match dispatcher.send(&command).await {
            Err(DispatchError::ProcessGone(msg)) => {
                self.stop_if_current(
                    session_id,
                    format!("Lost connection to {}: {}", PLAYER_NAME, msg),
                    Some("process_gone"),
                );
                Err(DispatchError::ProcessGone(msg))
            }
            // The line may have been cut mid-write; the pipe cannot carry
            // another command.
            Err(DispatchError::WriteTimeout) => {
                self.stop_if_current(
                    session_id,
                    format!("{} stopped reading commands.", PLAYER_NAME),
                    Some("write_timeout"),
                );
                Err(DispatchError::WriteTimeout)
            }
            other => other,
        }
    }

    /// Stops any active session; used on server shutdown.
    pub fn shutdown(&self) {
        match self.stop() {
            Ok(()) => log::info!("[Session] Active session stopped for shutdown"),
            Err(StopError::NoActiveSession) => {}
        }
    }

    /// Called by the relay task once the player's output has ended.
    fn handle_relay_exit(&self, exit: RelayExit) {
        let mut inner = self.inner.lock();
        if inner.active_id() != Some(exit.session_id) {
            log::debug!(
                "[Session] Ignoring relay exit of finished session {}",
                exit.session_id
            );
            return;
        }
        let (reason, code) = match exit.end {
            RelayEnd::EndOfStream => (format!("{} exited.", PLAYER_NAME), "process_exited"),
            RelayEnd::ReadError(e) => (format!("Lost {} output: {}", PLAYER_NAME, e), "process_gone"),
        };
        self.teardown(&mut inner, reason, Some(code));
    }

    /// `Running → Stopping → Idle`. The caller holds the lock.
    fn teardown(&self, inner: &mut Inner, reason: String, code: Option<&'static str>) {
        let Some(session) = inner.active.take() else {
            return;
        };
        let session_id = session.handle.session_id;
        self.transition(inner, SessionState::Stopping, session_id);

        if let Err(e) = session.control.terminate(self.stop_grace) {
            log::warn!(
                "[Session] Failed to signal player (pid {:?}): {}",
                session.handle.pid,
                e
            );
        }

        self.transition(inner, SessionState::Idle, session_id);
        log::info!("[Session] Session {} ended: {}", session_id, reason);
        self.status(reason, code);
    }

    fn transition(&self, inner: &mut Inner, state: SessionState, session_id: u64) {
        log::debug!(
            "[Session] {} -> {} (session {})",
            inner.state,
            state,
            session_id
        );
        inner.state = state;
        self.emitter.emit_session(SessionEvent::StateChanged {
            state,
            session_id: Some(session_id),
            timestamp: now_millis(),
        });
    }

    fn status(&self, message: String, code: Option<&'static str>) {
        self.emitter.emit_session(SessionEvent::Status {
            message,
            code,
            timestamp: now_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BroadcastEvent, BroadcastEventBridge, NoopEventEmitter};
    use crate::session::test_fixtures::{media_root, request, FakeSpawner};
    use std::ffi::OsString;
    use tokio::io::AsyncReadExt;
    use tokio::sync::broadcast;

    struct Harness {
        manager: Arc<SessionManager>,
        spawner: Arc<FakeSpawner>,
        root: tempfile::TempDir,
    }

    fn harness_with(spawner: FakeSpawner, emitter: Arc<dyn EventEmitter>) -> Harness {
        let root = media_root();
        let config = Config {
            media_root: root.path().to_path_buf(),
            stop_grace_ms: 10,
            command_timeout_ms: 500,
            ..Default::default()
        };
        let spawner = Arc::new(spawner);
        let manager = Arc::new(SessionManager::new(
            &config,
            spawner.clone(),
            emitter,
            TokioSpawner::current(),
        ));
        Harness {
            manager,
            spawner,
            root,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeSpawner::new(), Arc::new(NoopEventEmitter))
    }

    async fn wait_for_state(manager: &SessionManager, expected: SessionState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.current_state() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("state never became {}", expected));
    }

    async fn next_output(rx: &mut broadcast::Receiver<BroadcastEvent>) -> String {
        loop {
            if let BroadcastEvent::Output(event) = rx.recv().await.unwrap() {
                return event.data;
            }
        }
    }

    #[tokio::test]
    async fn full_session_scenario() {
        let bridge = Arc::new(BroadcastEventBridge::new(64));
        let mut rx = bridge.subscribe();
        let h = harness_with(FakeSpawner::new(), bridge.clone());

        let handle = h.manager.start(request("movie.mp4")).unwrap();
        assert_eq!(h.manager.current_state(), SessionState::Running);
        assert_eq!(handle.room, "movie-night");

        let mut process = h.spawner.take_process(0);
        let root = h.root.path().canonicalize().unwrap();
        let expected_tail: Vec<OsString> = [
            "--host",
            "sync.example.com",
            "--name",
            "alice",
            "--room",
            "movie-night",
            "--",
        ]
        .into_iter()
        .map(OsString::from)
        .chain(std::iter::once(root.join("movie.mp4").into_os_string()))
        .collect();
        assert_eq!(process.program, OsString::from("syncplay"));
        assert!(process.args.ends_with(&expected_tail));

        h.manager.dispatch(Command::Pause).await.unwrap();
        let mut buf = [0u8; 2];
        process.stdin.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"p\n");

        process.output.unbounded_send(Ok("OK".into())).unwrap();
        assert_eq!(next_output(&mut rx).await, "OK");

        h.manager.stop().unwrap();
        assert_eq!(h.manager.current_state(), SessionState::Idle);
        assert!(h.manager.snapshot().session.is_none());
        assert!(process.was_terminated());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_starts_spawn_exactly_one_process() {
        let h = harness_with(
            FakeSpawner::new().with_spawn_delay(Duration::from_millis(20)),
            Arc::new(NoopEventEmitter),
        );

        let results: Vec<Result<SessionHandle, StartError>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let manager = Arc::clone(&h.manager);
                    scope.spawn(move || manager.start(request("movie.mp4")))
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(StartError::AlreadyRunning)))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(rejected, 7);
        assert_eq!(h.spawner.spawn_count(), 1);
    }

    #[tokio::test]
    async fn start_while_running_is_rejected() {
        let h = harness();
        h.manager.start(request("movie.mp4")).unwrap();

        let err = h.manager.start(request("movie.mp4")).unwrap_err();
        assert!(matches!(err, StartError::AlreadyRunning));
        assert_eq!(h.spawner.spawn_count(), 1);
        assert_eq!(h.manager.current_state(), SessionState::Running);
    }

    #[tokio::test]
    async fn traversal_is_rejected_without_spawning() {
        let h = harness();
        let err = h.manager.start(request("../../etc/passwd")).unwrap_err();
        assert!(matches!(
            err,
            StartError::Launch(LaunchError::InvalidMediaPath(_))
        ));
        assert_eq!(h.spawner.spawn_count(), 0);
        assert_eq!(h.manager.current_state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn invalid_request_is_rejected_without_spawning() {
        let h = harness();
        let mut req = request("movie.mp4");
        req.server = String::new();
        assert!(matches!(
            h.manager.start(req),
            Err(StartError::InvalidRequest(_))
        ));
        assert_eq!(h.spawner.spawn_count(), 0);
        assert_eq!(h.manager.current_state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn spawn_failure_returns_to_idle() {
        let h = harness_with(FakeSpawner::failing(), Arc::new(NoopEventEmitter));
        let err = h.manager.start(request("movie.mp4")).unwrap_err();
        assert!(matches!(err, StartError::Launch(LaunchError::SpawnFailed(_))));
        assert_eq!(h.manager.current_state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn process_exit_returns_to_idle_without_stop() {
        let h = harness();
        h.manager.start(request("movie.mp4")).unwrap();
        let process = h.spawner.take_process(0);

        process.output.close_channel();
        wait_for_state(&h.manager, SessionState::Idle).await;

        assert!(h.manager.snapshot().session.is_none());
        assert!(matches!(
            h.manager.dispatch(Command::Play).await,
            Err(DispatchError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn process_exit_is_reported_with_code() {
        let bridge = Arc::new(BroadcastEventBridge::new(64));
        let mut rx = bridge.subscribe();
        let h = harness_with(FakeSpawner::new(), bridge.clone());
        h.manager.start(request("movie.mp4")).unwrap();

        h.spawner.take_process(0).output.close_channel();
        wait_for_state(&h.manager, SessionState::Idle).await;

        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BroadcastEvent::Session(SessionEvent::Status { message, code, .. }) = event {
                statuses.push((message, code));
            }
        }
        assert_eq!(
            statuses,
            vec![
                (
                    "Connecting to sync.example.com in room movie-night...".to_string(),
                    None
                ),
                ("Syncplay exited.".to_string(), Some("process_exited")),
            ]
        );
    }

    #[tokio::test]
    async fn dispatch_without_session_reports_no_active_session() {
        let h = harness();
        let err = h.manager.dispatch(Command::SeekTo(10)).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoActiveSession));
    }

    #[tokio::test]
    async fn invalid_command_is_rejected_before_write() {
        let h = harness();
        h.manager.start(request("movie.mp4")).unwrap();
        let mut process = h.spawner.take_process(0);

        let err = h
            .manager
            .dispatch(Command::Chat("hi\nu".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidCommand(_)));

        h.manager.dispatch(Command::Play).await.unwrap();
        let mut buf = [0u8; 2];
        process.stdin.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"u\n");
    }

    #[tokio::test]
    async fn broken_pipe_tears_session_down() {
        let h = harness();
        h.manager.start(request("movie.mp4")).unwrap();
        let process = h.spawner.take_process(0);
        drop(process.stdin);

        let err = h.manager.dispatch(Command::Pause).await.unwrap_err();
        assert!(matches!(err, DispatchError::ProcessGone(_)));
        assert_eq!(h.manager.current_state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn stalled_player_input_tears_session_down() {
        let bridge = Arc::new(BroadcastEventBridge::new(64));
        let mut rx = bridge.subscribe();
        let h = harness_with(FakeSpawner::new().with_stdin_capacity(4), bridge.clone());
        h.manager.start(request("movie.mp4")).unwrap();
        let mut process = h.spawner.take_process(0);

        let err = h
            .manager
            .dispatch(Command::Chat("hello everyone".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::WriteTimeout));
        assert_eq!(h.manager.current_state(), SessionState::Idle);
        assert!(process.was_terminated());

        assert!(matches!(
            h.manager.dispatch(Command::Pause).await,
            Err(DispatchError::NoActiveSession)
        ));

        let mut written = String::new();
        process.stdin.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "hell");

        let mut codes = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BroadcastEvent::Session(SessionEvent::Status { code, .. }) = event {
                codes.push(code);
            }
        }
        assert_eq!(codes.last(), Some(&Some("write_timeout")));
    }

    #[tokio::test]
    async fn late_exit_of_old_session_does_not_stop_new_one() {
        let h = harness_with(
            FakeSpawner::new().keep_output_open_on_terminate(),
            Arc::new(NoopEventEmitter),
        );
        h.manager.start(request("movie.mp4")).unwrap();
        let first = h.spawner.take_process(0);
        h.manager.stop().unwrap();

        let second = h.manager.start(request("movie.mp4")).unwrap();
        first.output.close_channel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = h.manager.snapshot();
        assert_eq!(snapshot.state, SessionState::Running);
        assert_eq!(snapshot.session.unwrap().session_id, second.session_id);
    }

    #[tokio::test]
    async fn stop_when_idle_reports_no_session() {
        let h = harness();
        assert!(matches!(h.manager.stop(), Err(StopError::NoActiveSession)));
    }

    #[tokio::test]
    async fn stop_resets_state_even_when_signal_fails() {
        let h = harness_with(
            FakeSpawner::new().with_failing_signal(),
            Arc::new(NoopEventEmitter),
        );
        h.manager.start(request("movie.mp4")).unwrap();
        h.manager.stop().unwrap();
        assert_eq!(h.manager.current_state(), SessionState::Idle);
        assert!(h.manager.snapshot().session.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_during_start_cancels_launch() {
        let h = harness_with(
            FakeSpawner::new().with_spawn_delay(Duration::from_millis(200)),
            Arc::new(NoopEventEmitter),
        );

        let manager = Arc::clone(&h.manager);
        let starter = std::thread::spawn(move || manager.start(request("movie.mp4")));

        wait_for_state(&h.manager, SessionState::Starting).await;
        h.manager.stop().unwrap();

        let result = starter.join().unwrap();
        assert!(matches!(result, Err(StartError::Cancelled)));
        assert_eq!(h.manager.current_state(), SessionState::Idle);
        assert!(h.spawner.take_process(0).was_terminated());
    }

    #[tokio::test]
    async fn stop_session_ignores_other_sessions() {
        let h = harness();
        let handle = h.manager.start(request("movie.mp4")).unwrap();

        assert!(!h.manager.stop_session(handle.session_id + 1, "stale"));
        assert_eq!(h.manager.current_state(), SessionState::Running);

        assert!(h.manager.stop_session(handle.session_id, "Client disconnected."));
        assert_eq!(h.manager.current_state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn transitions_are_broadcast_in_order() {
        let bridge = Arc::new(BroadcastEventBridge::new(64));
        let mut rx = bridge.subscribe();
        let h = harness_with(FakeSpawner::new(), bridge.clone());

        h.manager.start(request("movie.mp4")).unwrap();
        h.manager.stop().unwrap();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BroadcastEvent::Session(SessionEvent::StateChanged { state, .. }) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                SessionState::Starting,
                SessionState::Running,
                SessionState::Stopping,
                SessionState::Idle
            ]
        );
    }
}
