// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

/// An X drawable (window or pixmap) id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Drawable(pub u32);

impl fmt::Display for Drawable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The end of a vblank, as handed to the scheduler's callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VblankEvent {
    /// Media stream counter: number of vblanks since the display started
    pub msc: u64,
    /// End of the vblank, in microseconds of `CLOCK_MONOTONIC`
    pub ust: u64,
}

/// What a Present complete notify is reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// A PresentPixmap request completed
    Pixmap,
    /// A PresentNotifyMSC request completed
    NotifyMsc,
}

/// A decoded PresentCompleteNotify event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionNotice {
    pub kind: NoticeKind,
    pub drawable: Drawable,
    pub msc: u64,
    pub ust: u64,
}

impl CompletionNotice {
    pub fn notify_msc(drawable: Drawable, msc: u64, ust: u64) -> Self {
        Self {
            kind: NoticeKind::NotifyMsc,
            drawable,
            msc,
            ust,
        }
    }
}
