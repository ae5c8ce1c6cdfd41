// crates/tally-plugin/src/session.rs
// ============================================================================
// Module: Plugin Session
// Description: Per-process control-plane state and heartbeat supervision.
// Purpose: Hold the session token, listen address, liveness timer, and the
//          single-slot shutdown signal that ends the process.
// Dependencies: base64, rand, subtle, tally-config, tokio
// ============================================================================

//! ## Overview
//! One [`Session`] exists per plugin process. Every inbound call resets its
//! heartbeat; [`supervise_heartbeat`] settles the shutdown signal with
//! [`PluginExitCode::HeartbeatTimeout`] once the deadline passes without a
//! reset. The shutdown signal is settled at most once: later writes are
//! ignored, never block, and never panic.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::PoisonError;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use tally_config::PluginConfig;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;

use crate::log::PluginLogEvent;
use crate::log::PluginLogSink;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Random bytes in a session token.
const TOKEN_BYTES: usize = 32;

// ============================================================================
// SECTION: Exit Codes
// ============================================================================

/// Process exit codes reported to the control process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PluginExitCode {
    /// Clean shutdown, including one-shot return and explicit kill.
    Clean = 0,
    /// Configuration, log sink, or listener bind failure.
    StartupFailure = 1,
    /// The handshake could not be delivered to the control process.
    RegistrationFailure = 2,
    /// No call or ping arrived within the heartbeat deadline.
    HeartbeatTimeout = 3,
}

impl PluginExitCode {
    /// Convert to i32 for process exit.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<PluginExitCode> for i32 {
    fn from(code: PluginExitCode) -> Self {
        code.as_i32()
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Per-process control-plane state.
///
/// # Invariants
/// - The token and heartbeat settings never change after construction.
/// - The listen address is set at most once.
/// - The shutdown signal is settled at most once; the first code wins.
pub struct Session {
    /// Token the control process must present.
    token: String,
    /// Bound listener address.
    listen_address: OnceLock<SocketAddr>,
    /// Log sink for lifecycle and call events.
    logger: Arc<dyn PluginLogSink>,
    /// Time of the most recent heartbeat reset.
    last_heartbeat: Mutex<Instant>,
    /// Supervisor tick interval.
    tick: Duration,
    /// Time without a reset after which the plugin exits.
    deadline: Duration,
    /// Whether the runtime blocks until shutdown.
    daemon: bool,
    /// Single-slot shutdown signal.
    shutdown: watch::Sender<Option<PluginExitCode>>,
}

impl Session {
    /// Creates a session with a fresh random token.
    #[must_use]
    pub fn new(config: &PluginConfig, logger: Arc<dyn PluginLogSink>) -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let (shutdown, _) = watch::channel(None);
        Self {
            token: URL_SAFE_NO_PAD.encode(bytes),
            listen_address: OnceLock::new(),
            logger,
            last_heartbeat: Mutex::new(Instant::now()),
            tick: config.heartbeat.tick(),
            deadline: config.heartbeat.deadline(),
            daemon: config.runtime.daemon,
            shutdown,
        }
    }

    /// Returns the session token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Checks a presented token in constant time.
    #[must_use]
    pub fn authenticate(&self, presented: &str) -> bool {
        self.token.as_bytes().ct_eq(presented.as_bytes()).into()
    }

    /// Returns the bound listener address once set.
    #[must_use]
    pub fn listen_address(&self) -> Option<SocketAddr> {
        self.listen_address.get().copied()
    }

    /// Records the bound listener address; returns false if already set.
    pub fn set_listen_address(&self, address: SocketAddr) -> bool {
        self.listen_address.set(address).is_ok()
    }

    /// Records a log event.
    pub fn log(&self, event: &PluginLogEvent) {
        self.logger.record(event);
    }

    /// Returns whether the runtime blocks until shutdown.
    #[must_use]
    pub const fn is_daemon(&self) -> bool {
        self.daemon
    }

    /// Returns the supervisor tick interval.
    #[must_use]
    pub const fn tick(&self) -> Duration {
        self.tick
    }

    /// Returns the liveness deadline.
    #[must_use]
    pub const fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Marks the control process as alive now.
    pub fn reset_heartbeat(&self) {
        *self.last_heartbeat.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Returns the time since the last heartbeat reset.
    #[must_use]
    pub fn since_heartbeat(&self) -> Duration {
        self.last_heartbeat.lock().unwrap_or_else(PoisonError::into_inner).elapsed()
    }

    /// Settles the shutdown signal with `code`.
    ///
    /// Returns true when this call settled the signal and false when it was
    /// already settled.
    pub fn shutdown(&self, code: PluginExitCode) -> bool {
        self.shutdown.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(code);
            true
        })
    }

    /// Returns the settled exit code, if any.
    #[must_use]
    pub fn exit_code(&self) -> Option<PluginExitCode> {
        *self.shutdown.borrow()
    }

    /// Waits until the shutdown signal is settled and returns its code.
    pub async fn wait_for_shutdown(&self) -> PluginExitCode {
        let mut receiver = self.shutdown.subscribe();
        let settled = receiver.wait_for(Option::is_some).await.ok().and_then(|code| *code);
        settled.unwrap_or(PluginExitCode::Clean)
    }
}

// ============================================================================
// SECTION: Heartbeat Supervisor
// ============================================================================

/// Watches the session heartbeat until the shutdown signal settles.
///
/// Ticks every [`Session::tick`]; once [`Session::since_heartbeat`] reaches
/// [`Session::deadline`] it settles the signal with
/// [`PluginExitCode::HeartbeatTimeout`]. Returns the settled code, which may
/// come from another writer.
pub async fn supervise_heartbeat(session: Arc<Session>) -> PluginExitCode {
    let mut interval = tokio::time::interval(session.tick());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut receiver = session.shutdown.subscribe();
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let idle = session.since_heartbeat();
                if idle >= session.deadline() {
                    if session.shutdown(PluginExitCode::HeartbeatTimeout) {
                        session.log(&PluginLogEvent::warn(
                            "heartbeat_timeout",
                            format!("no heartbeat for {} ms", idle.as_millis()),
                        ));
                    }
                    return session.exit_code().unwrap_or(PluginExitCode::HeartbeatTimeout);
                }
            }
            settled = receiver.wait_for(Option::is_some) => {
                let code = settled.ok().and_then(|code| *code);
                return code.unwrap_or(PluginExitCode::Clean);
            }
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        reason = "Test-only assertions."
    )]

    use std::sync::Arc;
    use std::time::Duration;

    use tally_config::PluginConfig;
    use tokio::time::Instant;

    use super::PluginExitCode;
    use super::Session;
    use super::supervise_heartbeat;
    use crate::log::MemoryLogSink;

    /// Builds a session with the given tick and deadline multiple.
    fn session(tick_ms: u64, deadline_ticks: u32) -> (Arc<Session>, Arc<MemoryLogSink>) {
        let mut config = PluginConfig::default();
        config.heartbeat.tick_ms = tick_ms;
        config.heartbeat.deadline_ticks = deadline_ticks;
        let sink = Arc::new(MemoryLogSink::new());
        (Arc::new(Session::new(&config, sink.clone())), sink)
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let (first, _) = session(1_000, 3);
        let (second, _) = session(1_000, 3);
        assert_ne!(first.token(), second.token());
        assert_eq!(first.token().len(), 43);
        assert!(first.token().chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(first.authenticate(first.token()));
        assert!(!first.authenticate(second.token()));
        assert!(!first.authenticate(""));
    }

    #[test]
    fn listen_address_is_set_once() {
        let (session, _) = session(1_000, 3);
        assert_eq!(session.listen_address(), None);
        assert!(session.set_listen_address("127.0.0.1:4000".parse().unwrap()));
        assert!(!session.set_listen_address("127.0.0.1:5000".parse().unwrap()));
        assert_eq!(session.listen_address(), Some("127.0.0.1:4000".parse().unwrap()));
    }

    #[test]
    fn second_shutdown_write_is_ignored() {
        let (session, _) = session(1_000, 3);
        assert!(session.shutdown(PluginExitCode::Clean));
        assert!(!session.shutdown(PluginExitCode::HeartbeatTimeout));
        assert_eq!(session.exit_code(), Some(PluginExitCode::Clean));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_times_out_between_deadline_and_one_extra_tick() {
        let (session, sink) = session(10, 1);
        let start = Instant::now();
        let code = supervise_heartbeat(Arc::clone(&session)).await;
        let elapsed = start.elapsed();
        assert_eq!(code, PluginExitCode::HeartbeatTimeout);
        assert!(elapsed >= Duration::from_millis(10), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(20), "{elapsed:?}");
        assert_eq!(session.wait_for_shutdown().await, PluginExitCode::HeartbeatTimeout);
        assert_eq!(sink.events_named("heartbeat_timeout").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resets_keep_the_session_alive() {
        let (session, _) = session(10, 3);
        let supervisor = tokio::spawn(supervise_heartbeat(Arc::clone(&session)));
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            session.reset_heartbeat();
        }
        assert_eq!(session.exit_code(), None);
        let start = Instant::now();
        assert_eq!(supervisor.await.unwrap(), PluginExitCode::HeartbeatTimeout);
        assert!(start.elapsed() >= Duration::from_millis(30 - 15));
        assert!(start.elapsed() <= Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_shutdown_stops_the_supervisor() {
        let (session, sink) = session(10, 100);
        let supervisor = tokio::spawn(supervise_heartbeat(Arc::clone(&session)));
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(session.shutdown(PluginExitCode::Clean));
        assert_eq!(supervisor.await.unwrap(), PluginExitCode::Clean);
        assert!(sink.events_named("heartbeat_timeout").is_empty());
        assert_eq!(PluginExitCode::HeartbeatTimeout.as_i32(), 3);
        assert_eq!(i32::from(PluginExitCode::RegistrationFailure), 2);
    }
}
