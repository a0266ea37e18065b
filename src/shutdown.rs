//! Turns process termination signals into cooperative cancellation.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Process-wide lifecycle of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    /// A termination request arrived; no new receives are issued and the
    /// current batch is being settled.
    Draining,
    Stopped,
}

/// Owns the cancellation token shared by every suspension point and the
/// [`RunState`] derived from it.
#[derive(Debug, Clone)]
pub struct ShutdownController {
    token: CancellationToken,
    state: Arc<watch::Sender<RunState>>,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Running);
        ShutdownController {
            token: CancellationToken::new(),
            state: Arc::new(state),
        }
    }

    /// Token observed by the consumption loop and passed on to handlers.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Requests a drain. Only the first call has an effect; it returns
    /// `true` if this call moved the worker from running to draining.
    pub fn trigger(&self) -> bool {
        let transitioned = self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Draining;
                true
            } else {
                false
            }
        });
        if transitioned {
            self.token.cancel();
        }
        transitioned
    }

    /// Marks the worker as stopped once the in-flight batch has settled.
    pub(crate) fn mark_stopped(&self) {
        self.token.cancel();
        self.state.send_replace(RunState::Stopped);
    }

    /// Waits until the worker reaches [`RunState::Stopped`].
    pub async fn stopped(&self) {
        let mut state = self.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = state.wait_for(|s| *s == RunState::Stopped).await;
    }

    /// Spawns a task that triggers a drain on SIGINT or SIGTERM.
    ///
    /// Further signals after the first are logged and otherwise ignored.
    pub fn spawn_signal_listener(&self) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                let signal = match wait_for_signal().await {
                    Ok(signal) => signal,
                    Err(e) => {
                        warn!(error = %e, "Unable to listen for termination signals");
                        return;
                    }
                };

                if controller.trigger() {
                    info!(signal, "Termination requested, draining");
                } else {
                    info!(signal, "Already draining, ignoring signal");
                }
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "ctrl-c")
}
