// SPDX-License-Identifier: GPL-3.0-only

//! A software display server.
//!
//! [`SimulatedDisplay`] answers completion notice requests the way an X
//! server with the Present extension does, using a fixed refresh rate and
//! calloop timers. It can also misbehave on purpose: repeat notices and
//! report zero timestamps, like a server whose screen has just been turned
//! off.

use crate::{
    clock::{Clock, MonotonicClock},
    event::{CompletionNotice, Drawable},
    source::{ProtocolError, SourceError, VblankSource},
};
use calloop::{
    LoopHandle,
    channel::{Channel, Sender, channel},
    timer::{TimeoutAction, Timer},
};
use std::{
    cell::RefCell,
    collections::HashSet,
    rc::{Rc, Weak},
    time::Duration,
};
use tracing::{debug, trace, warn};

/// Which notices get corrupted; `0` turns a fault off
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Follow every Nth notice with an identical copy
    pub duplicate_every: u32,
    /// Replace every Nth notice with one whose UST is zero
    pub zero_ust_every: u32,
}

/// Major opcode the simulated server assigns to the Present extension
const PRESENT_OPCODE: u8 = 148;

#[derive(Debug, Default)]
struct SimState {
    live: HashSet<Drawable>,
    next_id: u32,
    delivered: u64,
    /// Sequence number of the last request
    serial: u64,
}

struct Inner<D: 'static> {
    loop_handle: LoopHandle<'static, D>,
    sender: Sender<CompletionNotice>,
    clock: MonotonicClock,
    epoch_us: u64,
    refresh_us: u64,
    early_us: u64,
    faults: FaultPlan,
    state: RefCell<SimState>,
}

/// A fake display server on the caller's event loop
pub struct SimulatedDisplay<D: 'static> {
    inner: Rc<Inner<D>>,
}

impl<D: 'static> Clone for SimulatedDisplay<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: 'static> SimulatedDisplay<D> {
    /// Start a display refreshing every `refresh`
    ///
    /// Notices are sent `early` before the vblank they report has ended, and
    /// arrive on the returned channel, which the caller inserts into its loop.
    pub fn new(
        loop_handle: LoopHandle<'static, D>,
        refresh: Duration,
        early: Duration,
        faults: FaultPlan,
    ) -> (Self, Channel<CompletionNotice>) {
        let (sender, notices) = channel::<CompletionNotice>();
        let clock = MonotonicClock;
        let display = Self {
            inner: Rc::new(Inner {
                loop_handle,
                sender,
                clock,
                epoch_us: clock.now_us(),
                refresh_us: (refresh.as_micros() as u64).max(1),
                early_us: early.as_micros() as u64,
                faults,
                state: RefCell::new(SimState {
                    next_id: 0x200001,
                    ..Default::default()
                }),
            }),
        };
        (display, notices)
    }

    pub fn create_drawable(&self) -> Drawable {
        let mut state = self.inner.state.borrow_mut();
        let drawable = Drawable(state.next_id);
        state.next_id += 1;
        state.live.insert(drawable);
        drawable
    }

    /// Destroy a drawable; notices still in flight for it are dropped
    pub fn destroy_drawable(&self, drawable: Drawable) {
        self.inner.state.borrow_mut().live.remove(&drawable);
    }

    /// Number of vblanks since the display started
    pub fn current_msc(&self) -> u64 {
        self.inner.msc_at(self.inner.clock.now_us())
    }

    /// End of vblank `msc`
    pub fn ust_of(&self, msc: u64) -> u64 {
        self.inner.ust_of(msc)
    }
}

impl<D: 'static> Inner<D> {
    fn msc_at(&self, now_us: u64) -> u64 {
        now_us.saturating_sub(self.epoch_us) / self.refresh_us
    }

    fn ust_of(&self, msc: u64) -> u64 {
        self.epoch_us + msc * self.refresh_us
    }

    fn deliver(&self, drawable: Drawable, msc: u64, ust: u64) {
        let mut state = self.state.borrow_mut();
        if !state.live.contains(&drawable) {
            trace!(%drawable, msc, "Dropping notice for destroyed drawable");
            return;
        }
        state.delivered += 1;
        let count = state.delivered;
        drop(state);

        let hits = |every: u32| every != 0 && count % u64::from(every) == 0;
        let mut notice = CompletionNotice::notify_msc(drawable, msc, ust);
        if hits(self.faults.zero_ust_every) {
            debug!(%drawable, msc, "Sending notice with zero ust");
            notice.ust = 0;
        }
        self.send(notice);
        if hits(self.faults.duplicate_every) {
            debug!(%drawable, msc, "Sending duplicate notice");
            self.send(notice);
        }
    }

    fn send(&self, notice: CompletionNotice) {
        if self.sender.send(notice).is_err() {
            debug!("Notice channel closed, dropping notice");
        }
    }
}

impl<D: 'static> VblankSource for SimulatedDisplay<D> {
    fn request_completion_notice(
        &self,
        drawable: Drawable,
        target_msc: u64,
    ) -> Result<(), SourceError> {
        {
            let mut state = self.inner.state.borrow_mut();
            state.serial += 1;
            if !state.live.contains(&drawable) {
                return Err(ProtocolError::bad_drawable(PRESENT_OPCODE, drawable, state.serial).into());
            }
        }

        // like Present, a target that has already passed completes right away
        // with the current msc
        let now = self.inner.clock.now_us();
        let current = self.inner.msc_at(now);
        let (msc, delay) = if target_msc <= current {
            (current, Duration::ZERO)
        } else {
            let send_at = self.inner.ust_of(target_msc).saturating_sub(self.inner.early_us);
            (target_msc, Duration::from_micros(send_at.saturating_sub(now)))
        };
        let ust = self.inner.ust_of(msc);
        trace!(%drawable, target_msc, msc, ?delay, "Completion notice requested");

        let weak: Weak<Inner<D>> = Rc::downgrade(&self.inner);
        self.inner
            .loop_handle
            .insert_source(Timer::from_duration(delay), move |_, _, _| {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver(drawable, msc, ust);
                }
                TimeoutAction::Drop
            })
            .map_err(|err| {
                warn!(error = %err.error, "Failed to queue completion notice");
                SourceError::ConnectionLost
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calloop::{EventLoop, channel::Event};
    use std::time::Instant;

    fn collect(
        faults: FaultPlan,
        requests: impl FnOnce(&SimulatedDisplay<Vec<CompletionNotice>>, Drawable),
        expected: usize,
    ) -> (SimulatedDisplay<Vec<CompletionNotice>>, Vec<CompletionNotice>) {
        let mut event_loop: EventLoop<'static, Vec<CompletionNotice>> =
            EventLoop::try_new().unwrap();
        let (display, notices) = SimulatedDisplay::new(
            event_loop.handle(),
            Duration::from_millis(4),
            Duration::from_millis(1),
            faults,
        );
        event_loop
            .handle()
            .insert_source(notices, |event, _, received: &mut Vec<CompletionNotice>| {
                if let Event::Msg(notice) = event {
                    received.push(notice);
                }
            })
            .unwrap();

        let drawable = display.create_drawable();
        requests(&display, drawable);

        let mut received = Vec::new();
        let deadline = Instant::now() + Duration::from_millis(200);
        while received.len() < expected && Instant::now() < deadline {
            event_loop
                .dispatch(Some(Duration::from_millis(5)), &mut received)
                .unwrap();
        }
        (display, received)
    }

    #[test]
    fn notices_report_the_requested_msc() {
        let (display, received) = collect(
            FaultPlan::default(),
            |display, drawable| {
                let target = display.current_msc() + 2;
                display.request_completion_notice(drawable, target).unwrap();
            },
            1,
        );

        assert_eq!(received.len(), 1);
        let notice = received[0];
        assert_eq!(notice.ust, display.ust_of(notice.msc));
        assert_ne!(notice.ust, 0);
    }

    #[test]
    fn past_targets_complete_with_current_msc() {
        let (_display, received) = collect(
            FaultPlan::default(),
            |display, drawable| {
                display.request_completion_notice(drawable, 0).unwrap();
            },
            1,
        );

        assert_eq!(received.len(), 1);
    }

    #[test]
    fn faults_are_injected() {
        let (_display, received) = collect(
            FaultPlan {
                duplicate_every: 1,
                zero_ust_every: 0,
            },
            |display, drawable| {
                let target = display.current_msc() + 1;
                display.request_completion_notice(drawable, target).unwrap();
            },
            2,
        );
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], received[1]);

        let (_display, received) = collect(
            FaultPlan {
                duplicate_every: 0,
                zero_ust_every: 1,
            },
            |display, drawable| {
                let target = display.current_msc() + 1;
                display.request_completion_notice(drawable, target).unwrap();
            },
            1,
        );
        assert_eq!(received[0].ust, 0);
    }

    #[test]
    fn unknown_drawables_are_rejected() {
        let event_loop: EventLoop<'static, ()> = EventLoop::try_new().unwrap();
        let (display, _notices) = SimulatedDisplay::new(
            event_loop.handle(),
            Duration::from_millis(16),
            Duration::ZERO,
            FaultPlan::default(),
        );
        let drawable = display.create_drawable();
        display.request_completion_notice(drawable, 1).unwrap();
        let err = display
            .request_completion_notice(Drawable(0xdead), 1)
            .unwrap_err();
        let SourceError::Protocol(reply) = &err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(
            *reply,
            ProtocolError {
                error_code: ProtocolError::BAD_DRAWABLE,
                major_opcode: PRESENT_OPCODE,
                minor_opcode: crate::source::PRESENT_NOTIFY_MSC,
                serial: 2,
                bad_value: 0xdead,
            }
        );
    }

    #[test]
    fn destroyed_drawables_get_no_notices() {
        let (_display, received) = collect(
            FaultPlan::default(),
            |display, drawable| {
                let target = display.current_msc() + 1;
                display.request_completion_notice(drawable, target).unwrap();
                display.destroy_drawable(drawable);
            },
            1,
        );
        assert!(received.is_empty());
    }
}
