// SPDX-License-Identifier: Apache-2.0

//! Connection/request state machine (spec.md §4.4), grounded on the
//! `CONN_*` transitions driven from `resqueuemanager.c` via
//! `ConnTrack.Progress`.

use otap_df_rm_config::RmError;

/// A connection's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Transport accepted, no registration yet.
    Established,
    /// Registered against a queue/user; idle, no outstanding request.
    RegisterDone,
    /// An acquire request is queued or being dispatched.
    ResourceQueueAllocWait,
    /// The pending request was granted; resource is in use.
    ResourceQueueAllocDone,
    /// The pending request exceeded the timeout sweeper's deadline.
    TimeoutFail,
    /// The pending request failed for a non-timeout reason (e.g. deadlock
    /// victim, allocator rejection).
    ResourceAcquireFail,
}

/// Per-connection state machine, one per live `ConnId`.
#[derive(Debug, Clone)]
pub struct ConnTrack {
    state: ConnState,
    /// Seconds of wall-clock time since the last state transition; reset
    /// on every transition, advanced by the control loop's tick.
    seconds_since_transition: u64,
}

impl ConnTrack {
    /// A freshly accepted connection.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ConnState::Established,
            seconds_since_transition: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        self.state
    }

    #[must_use]
    pub fn seconds_since_transition(&self) -> u64 {
        self.seconds_since_transition
    }

    /// Advances the idle clock; callers call this once per control loop
    /// tick before checking timeouts.
    pub fn tick(&mut self, elapsed_seconds: u64) {
        self.seconds_since_transition += elapsed_seconds;
    }

    fn transition(&mut self, to: ConnState) {
        self.state = to;
        self.seconds_since_transition = 0;
    }

    /// `ESTABLISHED -> REGISTER_DONE` on successful registration.
    pub fn register(&mut self) -> Result<(), RmError> {
        match self.state {
            ConnState::Established => {
                self.transition(ConnState::RegisterDone);
                Ok(())
            }
            other => Err(illegal(other, "register")),
        }
    }

    /// `REGISTER_DONE -> RESOURCE_QUEUE_ALLOC_WAIT` when a request is
    /// enqueued, or the same transition on re-acquire after a prior
    /// request completed and its resource was returned.
    pub fn begin_acquire(&mut self) -> Result<(), RmError> {
        match self.state {
            ConnState::RegisterDone => {
                self.transition(ConnState::ResourceQueueAllocWait);
                Ok(())
            }
            other => Err(illegal(other, "begin_acquire")),
        }
    }

    /// `RESOURCE_QUEUE_ALLOC_WAIT -> RESOURCE_QUEUE_ALLOC_DONE` on grant.
    pub fn grant(&mut self) -> Result<(), RmError> {
        match self.state {
            ConnState::ResourceQueueAllocWait => {
                self.transition(ConnState::ResourceQueueAllocDone);
                Ok(())
            }
            other => Err(illegal(other, "grant")),
        }
    }

    /// `RESOURCE_QUEUE_ALLOC_WAIT -> TIMEOUT_FAIL`, raised by the timeout
    /// sweeper once `seconds_since_transition` exceeds its deadline.
    pub fn timeout(&mut self) -> Result<(), RmError> {
        match self.state {
            ConnState::ResourceQueueAllocWait => {
                self.transition(ConnState::TimeoutFail);
                Ok(())
            }
            other => Err(illegal(other, "timeout")),
        }
    }

    /// `RESOURCE_QUEUE_ALLOC_WAIT -> RESOURCE_ACQUIRE_FAIL`, raised on a
    /// deadlock-victim cancellation or a non-retryable allocator error.
    pub fn fail(&mut self) -> Result<(), RmError> {
        match self.state {
            ConnState::ResourceQueueAllocWait => {
                self.transition(ConnState::ResourceAcquireFail);
                Ok(())
            }
            other => Err(illegal(other, "fail")),
        }
    }

    /// Any terminal request state returns to `REGISTER_DONE` once the
    /// caller has consumed the response and, if granted, returned the
    /// resource.
    pub fn reset_to_idle(&mut self) -> Result<(), RmError> {
        match self.state {
            ConnState::ResourceQueueAllocDone
            | ConnState::TimeoutFail
            | ConnState::ResourceAcquireFail => {
                self.transition(ConnState::RegisterDone);
                Ok(())
            }
            other => Err(illegal(other, "reset_to_idle")),
        }
    }
}

impl Default for ConnTrack {
    fn default() -> Self {
        Self::new()
    }
}

fn illegal(from: ConnState, action: &str) -> RmError {
    RmError::IllegalStateTransition {
        from: format!("{from:?}"),
        action: action.to_string(),
    }
}
