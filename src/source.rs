// SPDX-License-Identifier: GPL-3.0-only

//! The display-server side of vblank scheduling.

use crate::event::Drawable;
use std::rc::Rc;

/// Something that can ask the display server for a vblank completion notice
///
/// The notice itself comes back through whatever event dispatch the caller
/// already runs; the caller feeds it to
/// [`VblankScheduler::handle_completion_notice`](crate::VblankScheduler::handle_completion_notice).
pub trait VblankSource {
    /// Request exactly one notice once the drawable's CRTC reaches `target_msc`
    ///
    /// Fire-and-forget: there is no way to withdraw a request, so a source
    /// must drop notices for drawables that no longer exist.
    fn request_completion_notice(&self, drawable: Drawable, target_msc: u64)
        -> Result<(), SourceError>;
}

impl<T: VblankSource + ?Sized> VblankSource for &T {
    fn request_completion_notice(
        &self,
        drawable: Drawable,
        target_msc: u64,
    ) -> Result<(), SourceError> {
        (**self).request_completion_notice(drawable, target_msc)
    }
}

impl<T: VblankSource + ?Sized> VblankSource for Rc<T> {
    fn request_completion_notice(
        &self,
        drawable: Drawable,
        target_msc: u64,
    ) -> Result<(), SourceError> {
        (**self).request_completion_notice(drawable, target_msc)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("connection to the display server was lost")]
    ConnectionLost,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Minor opcode of PresentNotifyMSC
pub const PRESENT_NOTIFY_MSC: u16 = 2;

/// An error reply from the X server
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error(
    "X error {error_code} {} request {major_opcode} minor {minor_opcode} serial {serial}",
    error_name(.error_code)
)]
pub struct ProtocolError {
    pub error_code: u8,
    pub major_opcode: u8,
    pub minor_opcode: u16,
    pub serial: u64,
    /// The offending resource id or value
    pub bad_value: u32,
}

impl ProtocolError {
    pub const BAD_DRAWABLE: u8 = 9;

    /// A BadDrawable reply to a PresentNotifyMSC for `drawable`
    pub fn bad_drawable(present_opcode: u8, drawable: Drawable, serial: u64) -> Self {
        Self {
            error_code: Self::BAD_DRAWABLE,
            major_opcode: present_opcode,
            minor_opcode: PRESENT_NOTIFY_MSC,
            serial,
            bad_value: drawable.0,
        }
    }

    /// Name of a core protocol error code
    ///
    /// Extension errors are numbered from a per-connection base, so they
    /// decode as "Unknown" here.
    pub fn name(&self) -> &'static str {
        error_name(&self.error_code)
    }
}

fn error_name(error_code: &u8) -> &'static str {
    match error_code {
        1 => "BadRequest",
        2 => "BadValue",
        3 => "BadWindow",
        4 => "BadPixmap",
        5 => "BadAtom",
        6 => "BadCursor",
        7 => "BadFont",
        8 => "BadMatch",
        9 => "BadDrawable",
        10 => "BadAccess",
        11 => "BadAlloc",
        12 => "BadColor",
        13 => "BadGC",
        14 => "BadIDChoice",
        15 => "BadName",
        16 => "BadLength",
        17 => "BadImplementation",
        _ => "Unknown",
    }
}
