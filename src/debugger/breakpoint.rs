//! Breakpoint registrations shared across tracees.
//!
//! The registry owns what is immutable about a breakpoint: its location
//! (`module + offset`), its handler, and the single-shot policy. What is
//! mutable per tracee (the resolved address, the shadowed original
//! bytes, whether the trap is currently written) lives in each
//! [`Tracee`](crate::debugger::tracee::Tracee)'s own arming table, so a
//! fork never shares arming state between parent and child.

use std::collections::HashMap;

use crate::debugger::error::Error;
use crate::debugger::tracee::TraceeView;

/// What the tracee should do after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Resume the tracee.
    Continue,
    /// Release this tracee from trace; the rest keep running.
    Detach,
    /// Kill this tracee; the rest keep running.
    Kill,
    /// Stop looping: detach every tracee and return from the event loop.
    Shutdown,
}

pub type BreakpointHandler = Box<dyn FnMut(&mut TraceeView<'_>) -> Decision>;

/// Index of a registration in the registry. Stable for the lifetime of
/// the debugger; registrations are never removed, only outlived by
/// per-tracee `done` marks.
pub type BreakpointId = usize;

pub(crate) struct BreakpointDef {
    pub module: String,
    pub offset: u64,
    pub handler: BreakpointHandler,
    pub single_shot: bool,
}

#[derive(Default)]
pub(crate) struct BreakpointRegistry {
    defs: Vec<BreakpointDef>,
    by_location: HashMap<(String, u64), BreakpointId>,
}

impl BreakpointRegistry {
    /// Register a breakpoint. An address may be instrumented at most
    /// once, so a second registration for the same location is an error.
    pub fn add(
        &mut self,
        module: impl Into<String>,
        offset: u64,
        handler: BreakpointHandler,
        single_shot: bool,
    ) -> Result<BreakpointId, Error> {
        let module = module.into();
        if self.by_location.contains_key(&(module.clone(), offset)) {
            return Err(Error::BreakpointExists { module, offset });
        }

        let id = self.defs.len();
        self.by_location.insert((module.clone(), offset), id);
        self.defs.push(BreakpointDef {
            module,
            offset,
            handler,
            single_shot,
        });
        Ok(id)
    }

    pub fn def(&self, id: BreakpointId) -> &BreakpointDef {
        &self.defs[id]
    }

    pub fn def_mut(&mut self, id: BreakpointId) -> &mut BreakpointDef {
        &mut self.defs[id]
    }

    pub fn ids(&self) -> impl Iterator<Item = BreakpointId> {
        0..self.defs.len()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }
}

/// Per-tracee arming record: the trap is written at `addr` and `saved`
/// shadows the original instruction bytes. The record exists exactly as
/// long as the trap is installed.
#[derive(Debug, Clone)]
pub(crate) struct ArmedBreakpoint {
    pub def: BreakpointId,
    pub saved: Vec<u8>,
}
