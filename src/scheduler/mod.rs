// SPDX-License-Identifier: GPL-3.0-only

//! Vblank schedulers.
//!
//! A scheduler calls its callback once at the end of the next vblank after
//! [`VblankScheduler::schedule`]. How it learns about vblanks depends on its
//! [`SchedulerKind`], picked at construction.
//!
//! This abstraction is a bit leaky: a Present scheduler does not drive
//! itself, the caller has to feed it every PresentCompleteNotify for its
//! drawable through [`VblankScheduler::handle_completion_notice`].

mod present;

pub use present::PresentScheduler;

use crate::{
    clock::{Clock, MonotonicClock},
    event::{CompletionNotice, Drawable, VblankEvent},
    source::{SourceError, VblankSource},
};
use calloop::LoopHandle;
use std::fmt;

/// Receives the end of each scheduled vblank, along with the loop's shared data
pub type CallbackFn<D> = dyn FnMut(VblankEvent, &mut D);

/// How a scheduler learns about vblanks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    /// X Present extension complete notifies
    Present,
    /// GLX_SGI_video_sync counter
    VideoSync,
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Present => write!(f, "present"),
            SchedulerKind::VideoSync => write!(f, "sgi_video_sync"),
        }
    }
}

/// Where a scheduler is in its request cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing requested, nothing pending
    Idle,
    /// Waiting for the display server's completion notice
    RequestOutstanding,
    /// Notice received early, waiting for the vblank to actually end
    TimerArmed,
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("{0} vblank scheduler is not supported")]
    Unsupported(SchedulerKind),
    #[error("Failed to request vblank event: {0}")]
    Request(#[from] SourceError),
}

/// A vblank scheduler for one drawable
///
/// Cloning gives another handle to the same scheduler. The scheduler is torn
/// down when the last handle is dropped; a callback timer pending at that
/// point is cancelled and never fires.
pub enum VblankScheduler<D: 'static> {
    Present(PresentScheduler<D>),
    // TODO: drive this from a GLX_SGI_video_sync waiter thread
    VideoSync,
}

impl<D: 'static> Clone for VblankScheduler<D> {
    fn clone(&self) -> Self {
        match self {
            VblankScheduler::Present(sched) => VblankScheduler::Present(sched.clone()),
            VblankScheduler::VideoSync => VblankScheduler::VideoSync,
        }
    }
}

impl<D: 'static> fmt::Debug for VblankScheduler<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VblankScheduler")
            .field("kind", &self.kind())
            .field("state", &self.state())
            .field("last_msc", &self.last_msc())
            .finish()
    }
}

impl<D: 'static> VblankScheduler<D> {
    pub fn new(
        kind: SchedulerKind,
        loop_handle: LoopHandle<'static, D>,
        callback: impl FnMut(VblankEvent, &mut D) + 'static,
    ) -> Self {
        Self::with_clock(kind, loop_handle, MonotonicClock, callback)
    }

    /// Like [`VblankScheduler::new`], reading the time from `clock`
    pub fn with_clock(
        kind: SchedulerKind,
        loop_handle: LoopHandle<'static, D>,
        clock: impl Clock + 'static,
        callback: impl FnMut(VblankEvent, &mut D) + 'static,
    ) -> Self {
        match kind {
            SchedulerKind::Present => VblankScheduler::Present(PresentScheduler::new(
                loop_handle,
                Box::new(clock),
                Box::new(callback),
            )),
            SchedulerKind::VideoSync => VblankScheduler::VideoSync,
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        match self {
            VblankScheduler::Present(_) => SchedulerKind::Present,
            VblankScheduler::VideoSync => SchedulerKind::VideoSync,
        }
    }

    pub fn state(&self) -> SchedulerState {
        match self {
            VblankScheduler::Present(sched) => sched.state(),
            VblankScheduler::VideoSync => SchedulerState::Idle,
        }
    }

    /// MSC of the last vblank that passed validation
    pub fn last_msc(&self) -> u64 {
        match self {
            VblankScheduler::Present(sched) => sched.last_msc(),
            VblankScheduler::VideoSync => 0,
        }
    }

    /// End timestamp of the last vblank that passed validation
    pub fn last_ust(&self) -> u64 {
        match self {
            VblankScheduler::Present(sched) => sched.last_ust(),
            VblankScheduler::VideoSync => 0,
        }
    }

    /// Schedule the callback for the end of the next vblank
    ///
    /// Returns whether a new event was requested. If one is already pending
    /// for the current vblank this does nothing and returns `Ok(false)`.
    pub fn schedule(
        &self,
        drawable: Drawable,
        source: &(impl VblankSource + ?Sized),
    ) -> Result<bool, ScheduleError> {
        match self {
            VblankScheduler::Present(sched) => Ok(sched.schedule(drawable, source)?),
            VblankScheduler::VideoSync => Err(ScheduleError::Unsupported(self.kind())),
        }
    }

    /// Feed a completion notice for this scheduler's drawable
    ///
    /// # Panics
    ///
    /// If this is not a Present scheduler, or on a notice the scheduler
    /// could not have asked for (see [`PresentScheduler::handle_completion_notice`]).
    pub fn handle_completion_notice(
        &self,
        source: &(impl VblankSource + ?Sized),
        notice: CompletionNotice,
        data: &mut D,
    ) {
        match self {
            VblankScheduler::Present(sched) => sched.handle_completion_notice(source, notice, data),
            VblankScheduler::VideoSync => {
                panic!("completion notice routed to a {} vblank scheduler", self.kind())
            }
        }
    }
}
