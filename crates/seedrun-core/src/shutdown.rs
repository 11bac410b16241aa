//! Operator interrupts turned into a cooperative cancellation signal.
//!
//! The controller is the only writer of the shared [`ShutdownState`]; workers
//! hold [`ShutdownToken`]s and only ever read it. State only moves forward:
//!
//! ```text
//! Running --1st interrupt--> Draining --2nd interrupt--> Aborting
//!    |                          ^
//!    +--fatal error--> Stopping-+
//! ```
//!
//! `Stopping` only halts seed allocation and lets every worker finish its
//! current trial; the pool uses it when a sibling worker hits a fatal error.
//! `Draining` also escalates in-flight trials right away (SIGTERM, grace,
//! SIGKILL). `Aborting` cuts the remaining grace period short and kills at
//! once. Trials cut short either way are still recorded. Interrupts after the
//! second one are ignored.

use crate::error::{HarnessError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
    Running,
    Stopping,
    Draining,
    Aborting,
}

#[derive(Debug, Clone)]
pub struct ShutdownController {
    tx: Arc<watch::Sender<ShutdownState>>,
    installed: Arc<AtomicBool>,
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ShutdownState::Running);
        Self {
            tx: Arc::new(tx),
            installed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.tx.borrow()
    }

    /// Stop allocating new seeds. Returns `true` if this call changed the state.
    pub fn request_stop(&self) -> bool {
        self.advance_to(ShutdownState::Stopping)
    }

    /// Escalate in-flight trials immediately. Implies stop.
    pub fn request_drain(&self) -> bool {
        self.advance_to(ShutdownState::Draining)
    }

    /// Kill in-flight trials without waiting out the grace period.
    pub fn request_abort(&self) -> bool {
        self.advance_to(ShutdownState::Aborting)
    }

    /// What one operator interrupt does: drain on the first, abort on the
    /// second, nothing after that.
    pub fn escalate(&self) -> ShutdownState {
        match self.state() {
            ShutdownState::Running | ShutdownState::Stopping => {
                self.request_drain();
            }
            ShutdownState::Draining => {
                self.request_abort();
            }
            ShutdownState::Aborting => {}
        }
        self.state()
    }

    fn advance_to(&self, target: ShutdownState) -> bool {
        self.tx.send_if_modified(|state| {
            if *state < target {
                *state = target;
                true
            } else {
                false
            }
        })
    }

    /// Registers the interrupt listener for SIGINT and SIGTERM.
    ///
    /// Both handlers are in place when this returns. Only the first call
    /// installs anything; later calls return `Ok(None)`. Must be called from
    /// within a tokio runtime.
    pub fn install(&self) -> Result<Option<JoinHandle<()>>> {
        if self.installed.swap(true, Ordering::SeqCst) {
            tracing::debug!("interrupt handler already installed");
            return Ok(None);
        }

        let mut int = signal(SignalKind::interrupt()).map_err(HarnessError::SignalHandler)?;
        let mut term = signal(SignalKind::terminate()).map_err(HarnessError::SignalHandler)?;

        let controller = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    r = int.recv() => r,
                    r = term.recv() => r,
                };
                if received.is_none() {
                    tracing::error!("interrupt listener closed; stopping run");
                    controller.request_stop();
                    return;
                }

                let before = controller.state();
                match controller.escalate() {
                    ShutdownState::Draining if before < ShutdownState::Draining => {
                        tracing::warn!(
                            "Stopping... terminating in-flight trials (interrupt again to kill them now)"
                        );
                    }
                    ShutdownState::Aborting if before == ShutdownState::Draining => {
                        tracing::warn!("second interrupt: killing in-flight trials without grace");
                    }
                    state => {
                        tracing::debug!(?state, "interrupt ignored, shutdown already aborting");
                    }
                }
            }
        });
        Ok(Some(handle))
    }
}

/// Read-only view of the shutdown state handed to each worker.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<ShutdownState>,
}

impl ShutdownToken {
    pub fn state(&self) -> ShutdownState {
        *self.rx.borrow()
    }

    /// True once no new seeds should be allocated.
    pub fn is_stopping(&self) -> bool {
        self.state() >= ShutdownState::Stopping
    }

    /// True once in-flight trials should be escalated.
    pub fn is_draining(&self) -> bool {
        self.state() >= ShutdownState::Draining
    }

    /// Resolves once the state reaches `Draining` (or beyond).
    pub async fn drained(&mut self) {
        self.reached(ShutdownState::Draining).await;
    }

    /// Resolves once the state reaches `Aborting`.
    pub async fn aborted(&mut self) {
        self.reached(ShutdownState::Aborting).await;
    }

    /// Pends forever if the controller is dropped first, which is what a
    /// `select!` arm racing a trial wants.
    async fn reached(&mut self, target: ShutdownState) {
        loop {
            if *self.rx.borrow_and_update() >= target {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
