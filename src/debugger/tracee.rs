//! Per-tracee state: everything the engine must remember about one
//! attached process or thread between stops.

use log::debug;
use nix::sys;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::debugger::arch::{Arch, RegSnapshot};
use crate::debugger::breakpoint::{ArmedBreakpoint, BreakpointId};
use crate::debugger::coverage::CoverageSink;
use crate::debugger::error::Error;
use crate::debugger::inject::{ActiveInjection, SyscallInjection};
use crate::debugger::memory::{self, RemotePointer};
use crate::debugger::modules::ModuleMap;
use crate::debugger::syscall::{SuppressedSyscall, SyscallPhase};
use crate::debugger::tracer::StopReason;

/// Resume flavors: free-running, stop at the next syscall boundary, or
/// execute exactly one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resume {
    Continue,
    Syscall,
    Step,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TraceeStatus {
    Stopped,
    Running,
}

/// A process or thread under trace.
///
/// Owned by the debugger alone; hooks see it through a borrowed
/// [`TraceeView`] and cannot extend its lifetime.
pub struct Tracee {
    /// Tracee thread id.
    pub pid: Pid,
    pub(crate) arch: &'static dyn Arch,
    pub(crate) stop_reason: StopReason,
    pub(crate) phase: SyscallPhase,
    /// Breakpoint whose trap is currently lifted for a single-step, to
    /// be re-armed when the step trap arrives.
    pub(crate) pending_restoration: Option<(BreakpointId, u64)>,
    /// Installed traps: address → shadowed bytes. This tracee's own
    /// state, never shared, so fork children arm independently.
    pub(crate) armed: HashMap<u64, ArmedBreakpoint>,
    /// Single-shot registrations that already fired in this tracee.
    pub(crate) done: HashSet<BreakpointId>,
    /// Registrations waiting for their module to load (or for this
    /// tracee's next stop).
    pub(crate) pending_defs: HashSet<BreakpointId>,
    pub(crate) queue: VecDeque<SyscallInjection>,
    pub(crate) injection: Option<ActiveInjection>,
    /// Syscall cancelled at its enter stop: the id to dispatch the exit
    /// under and the return value to force there.
    pub(crate) suppressed: Option<SuppressedSyscall>,
    /// Signal that arrived while a restoration step was outstanding;
    /// re-queued once the trap is back in place.
    pub(crate) deferred_signal: Option<Signal>,
    /// Signal to deliver with the next resume.
    pub(crate) pending_signal: Option<Signal>,
    pub(crate) modules: ModuleMap,
    pub(crate) status: TraceeStatus,
    pub(crate) next_resume: Resume,
    /// A fork/clone child that has not yet reported its attach-stop.
    pub(crate) attach_pending: bool,
    /// Stopped fork child seen before its parent's fork event; kept
    /// parked until inheritance is known.
    pub(crate) held: bool,
    /// The ptrace exit event was seen; only the terminal wait status is
    /// still expected.
    pub(crate) exiting: bool,
}

impl Tracee {
    pub(crate) fn new(pid: Pid, arch: &'static dyn Arch, modules: ModuleMap) -> Self {
        debug!(target: "tracer", "add new tracee, thread: {pid}");
        Self {
            pid,
            arch,
            stop_reason: StopReason::None,
            phase: SyscallPhase::Outside,
            pending_restoration: None,
            armed: HashMap::new(),
            done: HashSet::new(),
            pending_defs: HashSet::new(),
            queue: VecDeque::new(),
            injection: None,
            suppressed: None,
            deferred_signal: None,
            pending_signal: None,
            modules,
            status: TraceeStatus::Stopped,
            next_resume: Resume::Continue,
            attach_pending: false,
            held: false,
            exiting: false,
        }
    }

    /// Copy what a fork/clone child starts its life with: the parent's
    /// code image carries the installed traps (and any currently lifted
    /// one), and the same images are loaded at the same bases.
    pub(crate) fn inherit_from(&mut self, parent: &Tracee) {
        self.armed = parent.armed.clone();
        self.done = parent.done.clone();
        self.pending_defs = parent.pending_defs.clone();
        self.modules = parent.modules.clone();
        // a lifted trap was copied as lifted: the child must also
        // single-step and re-arm before running
        self.pending_restoration = parent.pending_restoration;
        if self.pending_restoration.is_some() {
            self.next_resume = Resume::Step;
        }
    }

    pub fn stop_reason(&self) -> &StopReason {
        &self.stop_reason
    }

    pub(crate) fn arch(&self) -> &'static dyn Arch {
        self.arch
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.status == TraceeStatus::Stopped
    }

    fn ensure_stopped(&self) -> Result<(), Error> {
        if !self.is_stopped() {
            return Err(Error::NotStopped(self.pid));
        }
        Ok(())
    }

    /// Current register file. Fails with `NotStopped` while running.
    pub fn regs(&self) -> Result<RegSnapshot, Error> {
        self.ensure_stopped()?;
        crate::debugger::register::capture(self.pid)
    }

    pub fn set_regs(&self, regs: &RegSnapshot) -> Result<(), Error> {
        self.ensure_stopped()?;
        crate::debugger::register::flush(self.pid, regs)
    }

    pub fn ip(&self) -> Result<u64, Error> {
        Ok(self.arch.ip(&self.regs()?))
    }

    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, Error> {
        self.ensure_stopped()?;
        memory::read_bytes(self.pid, addr, len)
    }

    pub fn write_bytes(&self, addr: u64, data: &[u8]) -> Result<(), Error> {
        self.ensure_stopped()?;
        memory::write_bytes(self.pid, addr, data)
    }

    /// Write the trap instruction at `addr`, shadowing the original
    /// bytes. Installing an already-installed address is a no-op.
    pub(crate) fn arm(&mut self, id: BreakpointId, addr: u64) -> Result<(), Error> {
        if self.armed.contains_key(&addr) {
            return Ok(());
        }

        let trap = self.arch.trap_bytes();
        let saved = self.read_bytes(addr, trap.len())?;
        self.write_bytes(addr, trap)
            .map_err(|e| Error::TrapWriteFailed {
                pid: self.pid,
                addr,
                source: Box::new(e),
            })?;
        debug!(target: "tracer", "trap armed at {addr:#x}, thread: {pid}", pid = self.pid);

        self.armed.insert(addr, ArmedBreakpoint { def: id, saved });
        Ok(())
    }

    /// Put the shadowed bytes back. Returns the registration the trap
    /// belonged to, or `None` when nothing was installed at `addr`.
    pub(crate) fn disarm(&mut self, addr: u64) -> Result<Option<BreakpointId>, Error> {
        let Some(armed) = self.armed.remove(&addr) else {
            return Ok(None);
        };
        if let Err(e) = self.write_bytes(addr, &armed.saved) {
            self.armed.insert(addr, armed);
            return Err(Error::TrapWriteFailed {
                pid: self.pid,
                addr,
                source: Box::new(e),
            });
        }
        debug!(target: "tracer", "trap disarmed at {addr:#x}, thread: {pid}", pid = self.pid);
        Ok(Some(armed.def))
    }

    /// Resume with the chosen flavor, delivering any pending signal.
    pub(crate) fn resume(&mut self) -> nix::Result<()> {
        let sig = self.pending_signal.take();
        debug!(
            target: "tracer",
            "continue tracee execution ({how:?}, signal {sig:?}), thread: {pid}",
            how = self.next_resume,
            pid = self.pid,
        );

        let res = match self.next_resume {
            Resume::Continue => sys::ptrace::cont(self.pid, sig),
            Resume::Syscall => sys::ptrace::syscall(self.pid, sig),
            Resume::Step => sys::ptrace::step(self.pid, sig),
        };
        res.map(|()| {
            self.status = TraceeStatus::Running;
        })
    }
}

/// Borrowed view of a stopped tracee, handed to hooks for the duration
/// of one dispatch.
///
/// Register reads and writes go through a buffered snapshot that is
/// flushed when the dispatch returns, so an instruction-pointer change
/// made by a hook takes effect on the next resume.
pub struct TraceeView<'a> {
    tracee: &'a mut Tracee,
    coverage: Option<&'a mut dyn CoverageSink>,
    regs: RegSnapshot,
    regs_dirty: bool,
}

impl<'a> TraceeView<'a> {
    pub(crate) fn new(
        tracee: &'a mut Tracee,
        coverage: Option<&'a mut dyn CoverageSink>,
    ) -> Result<Self, Error> {
        let regs = tracee.regs()?;
        Ok(Self {
            tracee,
            coverage,
            regs,
            regs_dirty: false,
        })
    }

    pub fn pid(&self) -> Pid {
        self.tracee.pid
    }

    pub fn regs(&self) -> &RegSnapshot {
        &self.regs
    }

    pub fn regs_mut(&mut self) -> &mut RegSnapshot {
        self.regs_dirty = true;
        &mut self.regs
    }

    pub fn pc(&self) -> u64 {
        self.tracee.arch.ip(&self.regs)
    }

    /// Move the instruction pointer; effective on the next resume.
    pub fn set_pc(&mut self, value: u64) {
        let arch = self.tracee.arch;
        arch.set_ip(self.regs_mut(), value);
    }

    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, Error> {
        self.tracee.read_bytes(addr, len)
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        self.tracee.write_bytes(addr, data)
    }

    pub fn read_c_string(&self, addr: u64, max: usize) -> Result<String, Error> {
        memory::read_c_string(self.tracee.pid, addr, max)
    }

    pub fn remote_ptr(&self, addr: u64) -> RemotePointer {
        RemotePointer::new(self.tracee.pid, addr)
    }

    /// Forward one covered location to the debugger's coverage sink, if
    /// one is configured.
    pub fn record_coverage(&mut self, module_id: u16, addr: u64) {
        let pid = self.tracee.pid;
        if let Some(sink) = self.coverage.as_deref_mut() {
            sink.record(pid, module_id, addr);
        }
    }

    /// Write the buffered register snapshot back if any hook touched it.
    pub(crate) fn flush(&mut self) -> Result<(), Error> {
        if self.regs_dirty {
            self.tracee.set_regs(&self.regs)?;
            self.regs_dirty = false;
        }
        Ok(())
    }
}
