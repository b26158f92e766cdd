// SPDX-License-Identifier: GPL-3.0-only

//! Vblank-synchronized frame scheduling.
//!
//! A [`VblankScheduler`] calls back exactly once, at the end of the next
//! vblank, after each [`VblankScheduler::schedule`]. Everything runs on one
//! calloop event loop: waiting for the end of a vblank is a timer source,
//! never a blocking sleep.

pub mod clock;
pub mod event;
pub mod scheduler;
pub mod sim;
pub mod source;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use event::{CompletionNotice, Drawable, NoticeKind, VblankEvent};
pub use scheduler::{
    CallbackFn, PresentScheduler, ScheduleError, SchedulerKind, SchedulerState, VblankScheduler,
};
pub use sim::{FaultPlan, SimulatedDisplay};
pub use source::{ProtocolError, SourceError, VblankSource};
