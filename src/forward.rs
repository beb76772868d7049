//! Per-user batch forwarding state machine.
//!
//! `step()` performs at most one forward call and returns an instruction
//! telling the external driver when to reschedule; the machine itself never
//! sleeps or spawns. One in-flight forward at a time by construction: the
//! single cursor is the only send position.

use std::time::Duration;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardState {
    Idle,
    Forwarding,
    Paused,
    Completed,
    Cancelled,
    /// Terminal: too many consecutive non-flood failures on one message.
    Stuck,
}

/// Pacing and failure policy for forwarding.
#[derive(Debug, Clone)]
pub struct ForwardConfig {
    /// Rest between successful sends.
    pub send_delay: Duration,
    /// Rest before retrying after a non-flood failure.
    pub error_delay: Duration,
    /// Consecutive non-flood failures before the batch is declared stuck.
    pub max_consecutive_failures: u32,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            send_delay: Duration::from_secs(2),
            error_delay: Duration::from_secs(5),
            max_consecutive_failures: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayCause {
    /// Platform flood control; the duration came from the error.
    FloodWait,
    /// Generic send failure; same message will be retried.
    SendError,
}

/// Instruction for the external scheduler after one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// One file went out; schedule the next step after `resume_after`.
    Sent {
        sent: usize,
        total: usize,
        resume_after: Duration,
    },
    /// Nothing was sent; retry the same message after `resume_after`.
    Delayed {
        resume_after: Duration,
        cause: DelayCause,
    },
    /// The whole batch has been forwarded.
    Completed { total: usize },
    /// Retry ceiling hit; forwarding stopped, user must intervene.
    Stuck { sent: usize, total: usize },
    /// Session is idle, paused, cancelled or already terminal.
    NotForwarding,
}

/// Drives one selected batch through the transport, one message at a time.
pub struct ForwardSession {
    config: ForwardConfig,
    state: ForwardState,
    /// Message ids of the selected batch, in forward order.
    batch: Vec<i32>,
    /// 1-based index of the selected batch, 0 when none selected.
    batch_index: usize,
    /// Next position to send; equals sent count.
    cursor: usize,
    failures: u32,
}

impl ForwardSession {
    pub fn new(config: ForwardConfig) -> Self {
        Self {
            config,
            state: ForwardState::Idle,
            batch: Vec::new(),
            batch_index: 0,
            cursor: 0,
            failures: 0,
        }
    }

    pub fn state(&self) -> ForwardState {
        self.state
    }

    /// 1-based index of the selected batch; 0 when none was selected yet.
    pub fn batch_index(&self) -> usize {
        self.batch_index
    }

    /// (sent, total) for the selected batch.
    pub fn progress(&self) -> (usize, usize) {
        (self.cursor, self.batch.len())
    }

    /// True while the driver loop should keep stepping.
    pub fn is_active(&self) -> bool {
        self.state == ForwardState::Forwarding
    }

    pub fn is_paused(&self) -> bool {
        self.state == ForwardState::Paused
    }

    /// Select a batch and start forwarding from its beginning. Valid from
    /// `Idle`, after a prior batch reached `Completed`, or from `Stuck` so
    /// the user can retry without losing the scanned file list.
    pub fn select_batch(&mut self, index: usize, message_ids: Vec<i32>) -> Result<()> {
        match self.state {
            ForwardState::Idle | ForwardState::Completed | ForwardState::Stuck => {}
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "cannot select a batch while {:?}",
                    self.state
                )));
            }
        }

        info!(batch = index, files = message_ids.len(), "batch selected");
        self.batch = message_ids;
        self.batch_index = index;
        self.cursor = 0;
        self.failures = 0;
        self.state = ForwardState::Forwarding;
        Ok(())
    }

    /// Suspend forwarding; takes effect immediately for subsequent steps.
    pub fn pause(&mut self) {
        if self.state == ForwardState::Forwarding {
            self.state = ForwardState::Paused;
        }
    }

    /// Resume a paused batch from the exact paused cursor. Returns whether
    /// the driver should be rescheduled.
    pub fn resume(&mut self) -> bool {
        if self.state == ForwardState::Paused {
            self.state = ForwardState::Forwarding;
            return true;
        }
        false
    }

    /// Terminal from any state; the owning session becomes evictable.
    pub fn cancel(&mut self) {
        self.state = ForwardState::Cancelled;
    }

    /// Forward the message at the cursor, if any. Never advances the cursor
    /// on failure; each success advances it by exactly one.
    pub async fn step(&mut self, transport: &dyn Transport) -> StepOutcome {
        if self.state != ForwardState::Forwarding {
            return StepOutcome::NotForwarding;
        }

        let total = self.batch.len();
        if self.cursor >= total {
            self.state = ForwardState::Completed;
            return StepOutcome::Completed { total };
        }

        let message_id = self.batch[self.cursor];
        match transport.forward(message_id).await {
            Ok(()) => {
                self.cursor += 1;
                self.failures = 0;
                if self.cursor == total {
                    info!(batch = self.batch_index, total, "batch forwarding complete");
                    self.state = ForwardState::Completed;
                    StepOutcome::Completed { total }
                } else {
                    StepOutcome::Sent {
                        sent: self.cursor,
                        total,
                        resume_after: self.config.send_delay,
                    }
                }
            }
            Err(TransportError::RateLimited { retry_after }) => {
                // Flood waits never count toward the failure ceiling.
                warn!(
                    message_id,
                    wait_secs = retry_after.as_secs(),
                    "flood wait while forwarding"
                );
                StepOutcome::Delayed {
                    resume_after: retry_after,
                    cause: DelayCause::FloodWait,
                }
            }
            Err(err) => {
                self.failures += 1;
                if self.failures >= self.config.max_consecutive_failures {
                    warn!(
                        message_id,
                        failures = self.failures,
                        "forwarding stuck, giving up on batch"
                    );
                    self.state = ForwardState::Stuck;
                    StepOutcome::Stuck {
                        sent: self.cursor,
                        total,
                    }
                } else {
                    warn!(message_id, error = %err, attempt = self.failures, "forward failed, will retry");
                    StepOutcome::Delayed {
                        resume_after: self.config.error_delay,
                        cause: DelayCause::SendError,
                    }
                }
            }
        }
    }
}
