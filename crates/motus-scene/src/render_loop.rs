//! Frame scheduling with a synchronous stop
//!
//! The host asks for a [`FrameTicket`] before each frame callback and hands it
//! back when the callback runs. Tickets share the loop's stop flag, so a frame
//! that was already queued when the loop stopped turns into a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Drawn,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct FrameTicket {
    stopped: Arc<AtomicBool>,
    frame: u64,
}

impl FrameTicket {
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct RenderLoop {
    stopped: Arc<AtomicBool>,
    scheduled: u64,
}

impl RenderLoop {
    pub fn start() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            scheduled: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        if self.stopped.load(Ordering::Acquire) {
            LoopState::Stopped
        } else {
            LoopState::Running
        }
    }

    pub fn frames_scheduled(&self) -> u64 {
        self.scheduled
    }

    /// Request the next frame; `None` once stopped
    pub fn schedule(&mut self) -> Option<FrameTicket> {
        if self.state() == LoopState::Stopped {
            return None;
        }
        self.scheduled += 1;
        Some(FrameTicket {
            stopped: self.stopped.clone(),
            frame: self.scheduled,
        })
    }

    /// Stop the loop. Returns true only for the call that actually stopped it.
    pub fn stop(&mut self) -> bool {
        let was_running = !self.stopped.swap(true, Ordering::AcqRel);
        if was_running {
            debug!(frames = self.scheduled, "Render loop stopped");
        }
        was_running
    }

    /// Whether `ticket` was issued by this loop
    pub fn owns(&self, ticket: &FrameTicket) -> bool {
        Arc::ptr_eq(&self.stopped, &ticket.stopped)
    }
}
