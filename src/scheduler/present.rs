// SPDX-License-Identifier: GPL-3.0-only

//! Vblank scheduling on top of X Present complete notifies.
//!
//! We ask the server for a PresentNotifyMSC at `last_msc + 1` and wait for
//! the matching PresentCompleteNotify. The server tends to deliver that event
//! before the vblank has actually ended, so when the reported UST is still in
//! the future we hold the callback back with a timer. Firing early makes the
//! render loop believe it missed the vblank, which drops the next frame too.

use super::{CallbackFn, SchedulerState};
use crate::{
    clock::Clock,
    event::{CompletionNotice, Drawable, NoticeKind, VblankEvent},
    source::{SourceError, VblankSource},
};
use calloop::{
    LoopHandle, RegistrationToken,
    timer::{TimeoutAction, Timer},
};
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
    time::Duration,
};
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
struct PresentState {
    last_msc: u64,
    /// End of the last vblank
    last_ust: u64,
    event_requested: bool,
    callback_timer: Option<RegistrationToken>,
}

struct Shared<D: 'static> {
    loop_handle: LoopHandle<'static, D>,
    clock: Box<dyn Clock>,
    callback: RefCell<Box<CallbackFn<D>>>,
    state: RefCell<PresentState>,
}

impl<D: 'static> Drop for Shared<D> {
    fn drop(&mut self) {
        if let Some(token) = self.state.get_mut().callback_timer.take() {
            self.loop_handle.remove(token);
        }
    }
}

/// Present extension based vblank scheduler
pub struct PresentScheduler<D: 'static> {
    shared: Rc<Shared<D>>,
}

impl<D: 'static> Clone for PresentScheduler<D> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<D: 'static> PresentScheduler<D> {
    pub(super) fn new(
        loop_handle: LoopHandle<'static, D>,
        clock: Box<dyn Clock>,
        callback: Box<CallbackFn<D>>,
    ) -> Self {
        Self {
            shared: Rc::new(Shared {
                loop_handle,
                clock,
                callback: RefCell::new(callback),
                state: RefCell::new(PresentState::default()),
            }),
        }
    }

    pub fn last_msc(&self) -> u64 {
        self.shared.state.borrow().last_msc
    }

    pub fn last_ust(&self) -> u64 {
        self.shared.state.borrow().last_ust
    }

    pub fn state(&self) -> SchedulerState {
        let state = self.shared.state.borrow();
        if state.callback_timer.is_some() {
            SchedulerState::TimerArmed
        } else if state.event_requested {
            SchedulerState::RequestOutstanding
        } else {
            SchedulerState::Idle
        }
    }

    /// Request a notice for the vblank after the last one we saw
    ///
    /// Does nothing and returns `false` while a notice is outstanding or the
    /// callback timer is pending.
    pub fn schedule(
        &self,
        drawable: Drawable,
        source: &(impl VblankSource + ?Sized),
    ) -> Result<bool, SourceError> {
        let mut state = self.shared.state.borrow_mut();
        if state.event_requested || state.callback_timer.is_some() {
            debug!(%drawable, "Vblank already scheduled, not requesting another");
            return Ok(false);
        }

        source.request_completion_notice(drawable, state.last_msc + 1)?;
        state.event_requested = true;
        Ok(true)
    }

    /// Handle a PresentCompleteNotify for the drawable this scheduler serves
    ///
    /// Either calls the callback right away, if the vblank has already
    /// ended, or arms a timer that calls it at the reported UST.
    ///
    /// # Panics
    ///
    /// If a valid notice arrives while the callback timer is still pending.
    /// That means the dispatch code routed a notice we never asked for.
    pub fn handle_completion_notice(
        &self,
        source: &(impl VblankSource + ?Sized),
        notice: CompletionNotice,
        data: &mut D,
    ) {
        if notice.kind != NoticeKind::NotifyMsc {
            return;
        }

        let mut state = self.shared.state.borrow_mut();

        // X sometimes sends duplicate/bogus MSC events when the screen has just
        // been turned off (xorg/xserver#1418). Treat those as if no event had
        // arrived and ask for a new one. An msc with no successor is bogus too,
        // which keeps `last_msc + 1` from overflowing.
        let event_is_invalid =
            notice.msc <= state.last_msc || notice.msc == u64::MAX || notice.ust == 0;
        if event_is_invalid {
            debug!(
                msc = notice.msc,
                ust = notice.ust,
                last_msc = state.last_msc,
                "Invalid PresentCompleteNotify event"
            );
            if state.callback_timer.is_some() {
                // the timer already stands in for this vblank
                return;
            }
            match source.request_completion_notice(notice.drawable, state.last_msc + 1) {
                Ok(()) => state.event_requested = true,
                Err(err) => {
                    warn!(?err, drawable = %notice.drawable, "Failed to re-request vblank event");
                    state.event_requested = false;
                }
            }
            return;
        }

        assert!(
            state.callback_timer.is_none(),
            "PresentCompleteNotify for msc {} while the callback for msc {} is still pending",
            notice.msc,
            state.last_msc
        );

        state.event_requested = false;
        state.last_msc = notice.msc;
        state.last_ust = notice.ust;

        let event = VblankEvent {
            msc: notice.msc,
            ust: notice.ust,
        };
        let now = self.shared.clock.now_us();
        if now > notice.ust {
            drop(state);
            let mut callback = self.shared.callback.borrow_mut();
            (*callback)(event, data);
            return;
        }

        let lead = notice.ust - now;
        trace!("The end of this vblank is {} us into the future", lead);

        let weak = Rc::downgrade(&self.shared);
        let token = self
            .shared
            .loop_handle
            .insert_source(
                Timer::from_duration(Duration::from_micros(lead)),
                move |_, _, data| {
                    on_callback_timer(&weak, data);
                    TimeoutAction::Drop
                },
            )
            .expect("Failed to arm vblank callback timer");
        state.callback_timer = Some(token);
    }
}

/// The deferred end of a vblank
fn on_callback_timer<D: 'static>(weak: &Weak<Shared<D>>, data: &mut D) {
    // the scheduler is gone, its callback must not run
    let Some(shared) = weak.upgrade() else {
        return;
    };

    let event = {
        let mut state = shared.state.borrow_mut();
        state.callback_timer = None;
        VblankEvent {
            msc: state.last_msc,
            ust: state.last_ust,
        }
    };
    let mut callback = shared.callback.borrow_mut();
    (*callback)(event, data);
}
