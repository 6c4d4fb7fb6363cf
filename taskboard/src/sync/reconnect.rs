//! Push link supervisor with bounded exponential backoff.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Backoff -> Connecting ... -> GaveUp
//!                                   \-> Stopped (shutdown, any state)
//! ```
//!
//! [`ReconnectMachine`] is the pure state machine; [`spawn_push`] runs it
//! against a [`PushConnector`] on a background task and reports
//! [`LinkEvent`]s over an mpsc channel. Shutdown goes through a watch
//! channel and cancels a pending connect or backoff sleep.

use std::time::Duration;

use taskboard_proto::event::PushMessage;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::push::{CloseReason, LinkFrame, PushConnector, PushError};
use crate::session::AccessToken;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Retries after which the supervisor gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max_delay)
    }
}

/// Where the link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting `delay` before retry number `attempt`.
    Backoff { attempt: u32, delay: Duration },
    /// Retries exhausted; live updates are unavailable.
    GaveUp,
    /// Shut down on purpose (logout, exit).
    Stopped,
}

impl LinkState {
    /// No further transitions happen from a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::GaveUp | Self::Stopped)
    }
}

/// Pure reconnect bookkeeping, driven by the supervisor.
#[derive(Debug)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: LinkState,
    attempt: u32,
}

impl ReconnectMachine {
    #[must_use]
    pub const fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: LinkState::Disconnected,
            attempt: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Failed attempts since the last successful connect.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub const fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn on_connecting(&mut self) {
        if !self.state.is_terminal() {
            self.state = LinkState::Connecting;
        }
    }

    /// A connect succeeded; the retry counter starts over.
    pub fn on_connected(&mut self) {
        if !self.state.is_terminal() {
            self.attempt = 0;
            self.state = LinkState::Connected;
        }
    }

    /// A connect failed or an open link dropped.
    ///
    /// Returns the delay before the next attempt, or `None` once the retry
    /// budget is spent (the state becomes [`LinkState::GaveUp`]).
    pub fn on_failure(&mut self) -> Option<Duration> {
        if self.state.is_terminal() {
            return None;
        }
        self.attempt += 1;
        if self.attempt > self.policy.max_attempts {
            self.state = LinkState::GaveUp;
            return None;
        }
        let delay = self.policy.delay_for(self.attempt);
        self.state = LinkState::Backoff {
            attempt: self.attempt,
            delay,
        };
        Some(delay)
    }

    /// The link closed cleanly from the service side; nothing to retry.
    pub fn on_closed(&mut self) {
        if !self.state.is_terminal() {
            self.state = LinkState::Disconnected;
        }
    }

    pub fn on_stop(&mut self) {
        self.state = LinkState::Stopped;
    }
}

/// Events reported by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link is open.
    Connected,
    /// An open link ended.
    Disconnected { reason: String },
    /// A retry is scheduled after `delay`.
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    /// Retries exhausted.
    GaveUp,
    /// The service refused the token; the session is over.
    SessionRejected { code: u16, reason: String },
    /// An event from the service.
    Push(PushMessage),
}

/// Control handle for a running supervisor.
#[derive(Debug)]
pub struct PushHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<LinkState>,
    task: JoinHandle<()>,
}

impl PushHandle {
    /// Current link state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals shutdown without waiting for the supervisor to exit.
    pub fn request_stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Closes the link and cancels any pending reconnect, then waits for
    /// the supervisor to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(err = %e, "push supervisor task failed");
        }
    }
}

/// Spawns a supervisor that keeps a push link open for `token`.
///
/// Returns the control handle and the event receiver. The supervisor also
/// stops when the receiver is dropped.
pub fn spawn_push<C: PushConnector>(
    connector: C,
    token: AccessToken,
    policy: ReconnectPolicy,
    capacity: usize,
) -> (PushHandle, mpsc::Receiver<LinkEvent>) {
    let (evt_tx, evt_rx) = mpsc::channel(capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);

    let task = tokio::spawn(supervise(
        connector,
        token,
        ReconnectMachine::new(policy),
        evt_tx,
        shutdown_rx,
        state_tx,
    ));

    (
        PushHandle {
            shutdown: shutdown_tx,
            state: state_rx,
            task,
        },
        evt_rx,
    )
}

/// How one connection attempt (and the link it may have opened) ended.
enum Outcome {
    /// Retry after backoff.
    Retry,
    /// Closed cleanly by the service.
    Closed,
    /// Token refused.
    Rejected { code: u16, reason: String },
    /// Bad configuration; retrying cannot help.
    Fatal(PushError),
    /// Shutdown requested or event receiver dropped.
    Stop,
}

async fn supervise<C: PushConnector>(
    connector: C,
    token: AccessToken,
    mut machine: ReconnectMachine,
    evt_tx: mpsc::Sender<LinkEvent>,
    mut shutdown: watch::Receiver<bool>,
    state_tx: watch::Sender<LinkState>,
) {
    let publish = |machine: &ReconnectMachine| {
        state_tx.send_replace(machine.state());
    };

    loop {
        machine.on_connecting();
        publish(&machine);

        let outcome = run_link(&connector, &token, &mut machine, &evt_tx, &mut shutdown).await;
        publish(&machine);

        let terminal_event = match outcome {
            Outcome::Retry => match machine.on_failure() {
                Some(delay) => {
                    publish(&machine);
                    let max_attempts = machine.policy().max_attempts;
                    tracing::info!(
                        attempt = machine.attempt(),
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "push link reconnecting"
                    );
                    let event = LinkEvent::Reconnecting {
                        attempt: machine.attempt(),
                        max_attempts,
                        delay,
                    };
                    if evt_tx.send(event).await.is_err() {
                        break;
                    }
                    let stopped = tokio::select! {
                        biased;
                        _ = shutdown.changed() => true,
                        () = tokio::time::sleep(delay) => false,
                    };
                    if stopped {
                        break;
                    }
                    continue;
                }
                None => {
                    tracing::warn!(
                        max_attempts = machine.policy().max_attempts,
                        "push link gave up"
                    );
                    LinkEvent::GaveUp
                }
            },
            Outcome::Closed => {
                machine.on_closed();
                tracing::info!("push link closed by service");
                LinkEvent::Disconnected {
                    reason: "closed by service".to_string(),
                }
            }
            Outcome::Rejected { code, reason } => {
                machine.on_closed();
                tracing::warn!(code, %reason, "push link rejected the session");
                LinkEvent::SessionRejected { code, reason }
            }
            Outcome::Fatal(e) => {
                machine.on_closed();
                tracing::error!(err = %e, "push link cannot be opened");
                LinkEvent::Disconnected {
                    reason: e.to_string(),
                }
            }
            Outcome::Stop => break,
        };
        publish(&machine);
        let _ = evt_tx.send(terminal_event).await;
        return;
    }

    machine.on_stop();
    publish(&machine);
    tracing::debug!("push supervisor stopped");
}

/// Opens one link and forwards its frames until it ends.
async fn run_link<C: PushConnector>(
    connector: &C,
    token: &AccessToken,
    machine: &mut ReconnectMachine,
    evt_tx: &mpsc::Sender<LinkEvent>,
    shutdown: &mut watch::Receiver<bool>,
) -> Outcome {
    let connected = tokio::select! {
        biased;
        _ = shutdown.changed() => return Outcome::Stop,
        result = connector.connect(token) => result,
    };

    let mut frames = match connected {
        Ok(frames) => frames,
        Err(PushError::Rejected { code, reason }) => return Outcome::Rejected { code, reason },
        Err(e) if e.is_retryable() => {
            tracing::warn!(err = %e, "push connect failed");
            return Outcome::Retry;
        }
        Err(e) => return Outcome::Fatal(e),
    };

    machine.on_connected();
    if evt_tx.send(LinkEvent::Connected).await.is_err() {
        return Outcome::Stop;
    }

    let reason = loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => return Outcome::Stop,
            frame = frames.recv() => match frame {
                Some(LinkFrame::Message(message)) => {
                    if evt_tx.send(LinkEvent::Push(message)).await.is_err() {
                        return Outcome::Stop;
                    }
                }
                Some(LinkFrame::Closed(reason)) => break reason,
                None => break CloseReason::Lost("link task ended".to_string()),
            },
        }
    };

    match reason {
        CloseReason::Clean => Outcome::Closed,
        CloseReason::Rejected { code, reason } => Outcome::Rejected { code, reason },
        CloseReason::Lost(why) => {
            tracing::warn!(reason = %why, "push link lost");
            if evt_tx
                .send(LinkEvent::Disconnected { reason: why })
                .await
                .is_err()
            {
                return Outcome::Stop;
            }
            Outcome::Retry
        }
    }
}
