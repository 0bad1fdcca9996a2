//! Seam to an external coverage writer. The engine only ever calls
//! [`CoverageSink::record`]; file layout and buffering are the sink's
//! business. The sink is owned by the debugger and handed to handlers as
//! a borrowed handle, so it needs no locking: everything runs on the
//! event-loop thread.

use nix::unistd::Pid;

pub trait CoverageSink {
    /// One executed location: `addr` is the module-relative offset of
    /// the covered block.
    fn record(&mut self, pid: Pid, module_id: u16, addr: u64);
}

/// Reborrow a `Box<dyn CoverageSink>` slot as a short-lived trait object
/// reference. Going through this cast (rather than `Option::as_deref_mut`
/// directly) lets the compiler shrink the object's lifetime bound from the
/// box's `'static` to the borrow at hand.
pub(crate) fn reborrow(
    coverage: &mut Option<Box<dyn CoverageSink>>,
) -> Option<&mut dyn CoverageSink> {
    match coverage {
        Some(sink) => Some(&mut **sink as &mut dyn CoverageSink),
        None => None,
    }
}
