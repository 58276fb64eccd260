//! Stream connection lifecycle.
//!
//! Two states, no terminal state:
//!
//! ```text
//! Disconnected --Opened--> Streaming --FrameRead--> Streaming
//!      ^   |                   |
//!      |   +--OpenFailed-------+--ReadFailed--> Disconnected
//!      +---(backoff)
//! ```
//!
//! `transition` is pure; `StreamController` performs the I/O and the pauses
//! it asks for.

use std::time::Duration;

use crate::frame::Frame;
use crate::ingest::FrameSource;

/// Connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Streaming,
}

/// Outcome of the last I/O attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Opened,
    OpenFailed,
    FrameRead,
    ReadFailed,
}

/// What the controller must do after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamAction {
    /// Connection is up; read next.
    Read,
    /// Hand the frame to the caller.
    Emit,
    /// Wait the open backoff, stay disconnected.
    WaitBackoff,
    /// Release the handle and pause before reopening.
    ReleaseAndPause,
}

/// Pure transition function.
///
/// Events that cannot occur in a state (e.g. a read result while
/// disconnected) resynchronise to `Disconnected` with a release.
pub fn transition(state: StreamState, event: StreamEvent) -> (StreamState, StreamAction) {
    use StreamEvent::*;
    use StreamState::*;
    match (state, event) {
        (Disconnected, Opened) => (Streaming, StreamAction::Read),
        (Disconnected, OpenFailed) => (Disconnected, StreamAction::WaitBackoff),
        (Streaming, FrameRead) => (Streaming, StreamAction::Emit),
        (Streaming, ReadFailed) => (Disconnected, StreamAction::ReleaseAndPause),
        (Disconnected, FrameRead | ReadFailed) | (Streaming, Opened | OpenFailed) => {
            (Disconnected, StreamAction::ReleaseAndPause)
        }
    }
}

/// Pauses used by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed wait after a failed open.
    pub open_backoff: Duration,
    /// Wait after a failed read, before the next open.
    pub read_failure_pause: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            open_backoff: Duration::from_secs(2),
            read_failure_pause: Duration::from_millis(500),
        }
    }
}

/// Counters kept by the controller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_read: u64,
    pub opens: u64,
    pub open_failures: u64,
    pub read_failures: u64,
}

/// Owns the source and hides reconnect/backoff from the caller.
pub struct StreamController<S: FrameSource> {
    source: S,
    state: StreamState,
    policy: ReconnectPolicy,
    stats: StreamStats,
    /// Consecutive failures; the first of a streak logs at warn.
    failure_streak: u64,
}

impl<S: FrameSource> StreamController<S> {
    pub fn new(source: S, policy: ReconnectPolicy) -> Self {
        Self {
            source,
            state: StreamState::Disconnected,
            policy,
            stats: StreamStats::default(),
            failure_streak: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Produce the next frame, or `None` if no frame is available right now.
    ///
    /// One call makes at most one open attempt and one read. Stream faults
    /// never escape; they drive the state machine and are logged.
    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.state == StreamState::Disconnected {
            log::debug!("opening stream {}", self.source.describe());
            let event = match self.source.open() {
                Ok(()) => {
                    self.stats.opens += 1;
                    if self.failure_streak > 0 {
                        log::info!(
                            "stream {} reopened after {} failures",
                            self.source.describe(),
                            self.failure_streak
                        );
                    }
                    StreamEvent::Opened
                }
                Err(e) => {
                    self.stats.open_failures += 1;
                    self.note_failure(&format!(
                        "failed to open stream {}: {:#}; retrying in {:?}",
                        self.source.describe(),
                        e,
                        self.policy.open_backoff
                    ));
                    StreamEvent::OpenFailed
                }
            };
            if !self.apply(event) {
                return None;
            }
        }

        match self.source.read() {
            Ok(frame) => {
                self.stats.frames_read += 1;
                self.failure_streak = 0;
                self.apply(StreamEvent::FrameRead);
                Some(frame)
            }
            Err(e) => {
                self.stats.read_failures += 1;
                self.note_failure(&format!(
                    "frame read failed on {}: {:#}; reopening",
                    self.source.describe(),
                    e
                ));
                self.apply(StreamEvent::ReadFailed);
                None
            }
        }
    }

    /// Apply a transition and carry out its action. Returns true when the
    /// caller should go on to read.
    fn apply(&mut self, event: StreamEvent) -> bool {
        let (next, action) = transition(self.state, event);
        self.state = next;
        match action {
            StreamAction::Read | StreamAction::Emit => true,
            StreamAction::WaitBackoff => {
                pause(self.policy.open_backoff);
                false
            }
            StreamAction::ReleaseAndPause => {
                self.source.release();
                pause(self.policy.read_failure_pause);
                false
            }
        }
    }

    fn note_failure(&mut self, message: &str) {
        self.failure_streak += 1;
        if self.failure_streak == 1 {
            log::warn!("{}", message);
        } else {
            log::debug!("{} (failure #{})", message, self.failure_streak);
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}
