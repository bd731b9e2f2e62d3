//! Fixed protocol constants that should NOT be changed.
//!
//! The player control vocabulary and argument flags are defined by the
//! external playback client; changing them breaks compatibility with it.

// ─────────────────────────────────────────────────────────────────────────────
// Player Control Protocol (stdin, one command per line)
// ─────────────────────────────────────────────────────────────────────────────

/// Pauses playback for the whole room.
pub const CMD_PAUSE: &str = "p";

/// Resumes ("unpauses") playback for the whole room.
pub const CMD_PLAY: &str = "u";

/// Seek prefix; followed by a space and an integer position in seconds.
pub const CMD_SEEK_PREFIX: &str = "s";

/// Line terminator written after every command.
pub const COMMAND_TERMINATOR: char = '\n';

// ─────────────────────────────────────────────────────────────────────────────
// Player Command Line
// ─────────────────────────────────────────────────────────────────────────────

/// Runs the client without its GUI (console interface on stdin/stdout).
pub const ARG_NO_GUI: &str = "--no-gui";

/// Sync server address flag.
pub const ARG_HOST: &str = "--host";

/// Participant name flag.
pub const ARG_NAME: &str = "--name";

/// Room flag.
pub const ARG_ROOM: &str = "--room";

/// Ends option parsing; the media path follows as the last positional argument.
pub const ARG_END_OF_OPTIONS: &str = "--";

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between heartbeat timeout checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 5;

/// Idle time after which the server pings the client (seconds).
///
/// Browsers answer pings automatically, so a client that only watches keeps
/// its socket (and any session it owns) alive.
pub const WS_PING_AFTER_SECS: u64 = 20;

/// Idle time after which a WebSocket is considered dead (seconds).
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 60;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// First port tried when no preferred port is configured.
pub const PORT_RANGE_START: u16 = 8000;

/// Last port tried when no preferred port is configured.
pub const PORT_RANGE_END: u16 = 8010;

/// Interval between SSE keep-alive comments (seconds).
pub const SSE_KEEPALIVE_SECS: u64 = 15;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Human-readable name of the external client, used in status messages.
pub const PLAYER_NAME: &str = "Syncplay";

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "syncdeck";
