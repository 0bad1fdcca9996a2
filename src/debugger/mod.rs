//! The programming surface: a [`Debugger`] owns every tracee and every
//! registration, and [`event_loop`](Debugger::event_loop) drives them.

pub mod arch;
pub mod breakpoint;
mod code;
pub mod coverage;
pub mod error;
pub mod inject;
pub mod memory;
pub mod modules;
pub mod process;
mod register;
pub mod syscall;
pub mod tracee;
pub mod tracer;

use log::debug;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use os_pipe::PipeReader;
use std::collections::{HashMap, HashSet};

use crate::debugger::arch::{Arch, TargetDescription};
use crate::debugger::breakpoint::{BreakpointHandler, BreakpointId, BreakpointRegistry, Decision};
use crate::debugger::coverage::CoverageSink;
use crate::debugger::error::Error;
use crate::debugger::inject::SyscallInjection;
use crate::debugger::modules::ModuleMap;
use crate::debugger::process::Child;
use crate::debugger::syscall::{SyscallDispatcher, SyscallHook};
use crate::debugger::tracee::{Tracee, TraceeView};

pub use crate::debugger::tracer::StopReason;

/// The tracee control engine.
///
/// One `Debugger` owns a set of tracees created by [`spawn`](Self::spawn),
/// [`attach`](Self::attach) and fork following, the shared breakpoint
/// and syscall registrations, and the coverage sink. All of it is driven
/// from [`event_loop`](Self::event_loop) on the calling thread.
pub struct Debugger {
    target: TargetDescription,
    arch: &'static dyn Arch,
    tracees: HashMap<Pid, Tracee>,
    breakpoints: BreakpointRegistry,
    syscalls: SyscallDispatcher,
    coverage: Option<Box<dyn CoverageSink>>,
    signal_filter: Option<Box<dyn FnMut(Pid, Signal) -> bool>>,
    /// Fork/clone children we chose not to follow, to be released at
    /// their first stop.
    orphans: HashSet<Pid>,
    diagnostics: Vec<(Pid, Error)>,
    trace_syscalls: bool,
    follow_fork: bool,
    shutdown: bool,
    stdio: Option<(PipeReader, PipeReader)>,
}

impl Debugger {
    pub fn new(target: TargetDescription) -> Result<Self, Error> {
        let arch = target.traits()?;
        Ok(Self {
            target,
            arch,
            tracees: HashMap::new(),
            breakpoints: BreakpointRegistry::default(),
            syscalls: SyscallDispatcher::default(),
            coverage: None,
            signal_filter: None,
            orphans: HashSet::new(),
            diagnostics: Vec::new(),
            trace_syscalls: false,
            follow_fork: false,
            shutdown: false,
            stdio: None,
        })
    }

    /// Fork/exec a new tracee with ASLR disabled and stdio captured
    /// (see [`take_stdio`](Self::take_stdio)). On return the tracee is
    /// stopped at its entry point; nothing runs before
    /// [`event_loop`](Self::event_loop).
    pub fn spawn<ARGS, I>(&mut self, program: impl Into<String>, args: ARGS) -> Result<Pid, Error>
    where
        ARGS: IntoIterator<Item = I>,
        I: Into<String>,
    {
        let (stdout_reader, stdout_writer) = os_pipe::pipe()?;
        let (stderr_reader, stderr_writer) = os_pipe::pipe()?;

        let child = Child::new(program, args, stdout_writer, stderr_writer).install()?;
        let pid = child.pid();
        self.stdio = Some((stdout_reader, stderr_reader));

        self.new_tracee(pid)?;
        debug!(target: "debugger", "tracee {pid} spawned and stopped at entry");
        Ok(pid)
    }

    /// Start tracing an existing process; every thread it currently has
    /// becomes a tracee and is left stopped.
    pub fn attach(&mut self, pid: Pid) -> Result<(), Error> {
        for tid in process::attach_running(pid)? {
            self.new_tracee(tid)?;
        }
        debug!(target: "debugger", "attached to running process {pid}");
        Ok(())
    }

    fn new_tracee(&mut self, pid: Pid) -> Result<(), Error> {
        let modules = ModuleMap::inspect(pid)?;
        let mut tracee = Tracee::new(pid, self.arch, modules);
        tracee.pending_defs = self.breakpoints.ids().collect();
        self.tracees.insert(pid, tracee);
        Ok(())
    }

    /// Enable the syscall-stop resume flavor: tracees stop at every
    /// syscall boundary and registered hooks fire.
    pub fn trace_syscalls(&mut self, enabled: bool) {
        self.trace_syscalls = enabled;
    }

    /// Auto-attach children created by fork/vfork/clone. Breakpoint
    /// registrations are inherited by the child.
    pub fn follow_fork(&mut self, enabled: bool) {
        self.follow_fork = enabled;
    }

    /// Register a breakpoint at `module + offset`. The location is
    /// resolved lazily: as soon as the module is loaded in a tracee the
    /// trap is armed there. Registering the same location twice is an
    /// error.
    pub fn add_breakpoint(
        &mut self,
        module: impl Into<String>,
        offset: u64,
        handler: BreakpointHandler,
        single_shot: bool,
    ) -> Result<BreakpointId, Error> {
        let id = self.breakpoints.add(module, offset, handler, single_shot)?;
        for tracee in self.tracees.values_mut() {
            tracee.pending_defs.insert(id);
        }
        Ok(id)
    }

    /// Register a hook for one syscall id. Unhooked syscalls pass
    /// through untouched.
    pub fn add_syscall_hook(&mut self, nr: i64, hook: Box<dyn SyscallHook>) {
        self.syscalls.register(nr, hook);
    }

    /// Queue a synthetic syscall against `pid`. It activates at the
    /// tracee's next safe stop; queued injections run in order.
    pub fn inject_syscall(&mut self, pid: Pid, injection: SyscallInjection) -> Result<(), Error> {
        let tracee = self
            .tracees
            .get_mut(&pid)
            .ok_or(Error::TraceeNotFound(pid))?;
        if tracee.exiting {
            return Err(Error::InjectionNotSafe(pid));
        }
        tracee.queue.push_back(injection);
        Ok(())
    }

    /// Hand the coverage writer to the engine. Handlers reach it through
    /// [`TraceeView::record_coverage`](tracee::TraceeView::record_coverage).
    pub fn set_coverage_sink(&mut self, sink: Box<dyn CoverageSink>) {
        self.coverage = Some(sink);
    }

    /// Arm one recording, non-single-shot breakpoint per basic-block
    /// offset of `module`. Every execution of a block reports
    /// `(pid, module_id, offset)` to the coverage sink.
    pub fn add_coverage_breakpoints(
        &mut self,
        module: impl Into<String>,
        module_id: u16,
        offsets: impl IntoIterator<Item = u64>,
    ) -> Result<Vec<BreakpointId>, Error> {
        let module = module.into();
        let mut ids = Vec::new();
        for offset in offsets {
            let handler = Box::new(move |view: &mut TraceeView<'_>| {
                view.record_coverage(module_id, offset);
                Decision::Continue
            });
            ids.push(self.add_breakpoint(module.clone(), offset, handler, false)?);
        }
        Ok(ids)
    }

    /// Decide which delivered signals are forwarded to the tracee. The
    /// default forwards everything.
    pub fn set_signal_filter(
        &mut self,
        filter: impl FnMut(Pid, Signal) -> bool + 'static,
    ) {
        self.signal_filter = Some(Box::new(filter));
    }

    /// Release one tracee from trace, restoring its code bytes first.
    pub fn detach(&mut self, pid: Pid) -> Result<(), Error> {
        self.detach_tracee(pid)
    }

    /// Kill one tracee and reap it.
    pub fn kill(&mut self, pid: Pid) -> Result<(), Error> {
        use nix::errno::Errno;
        use nix::sys;
        use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

        if !self.tracees.contains_key(&pid) {
            return Err(Error::TraceeNotFound(pid));
        }
        self.kill_tracee(pid);

        loop {
            match waitpid(pid, Some(WaitPidFlag::__WALL)) {
                Ok(WaitStatus::Signaled(..) | WaitStatus::Exited(..)) | Err(Errno::ECHILD) => break,
                // run it into the kill through any intermediate stop
                Ok(_) => {
                    let _ = sys::ptrace::cont(pid, None);
                }
                Err(e) => return Err(Error::Waitpid(e)),
            }
        }
        self.tracees.remove(&pid);
        Ok(())
    }

    /// Read ends of the pipes carrying the last spawned tracee's stdout
    /// and stderr.
    pub fn take_stdio(&mut self) -> Option<(PipeReader, PipeReader)> {
        self.stdio.take()
    }

    /// Drain per-tracee errors collected by the event loop while it
    /// contained failures and kept going.
    pub fn take_diagnostics(&mut self) -> Vec<(Pid, Error)> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn target(&self) -> TargetDescription {
        self.target
    }

    pub fn tracee(&self, pid: Pid) -> Option<&Tracee> {
        self.tracees.get(&pid)
    }

    pub fn tracee_count(&self) -> usize {
        self.tracees.len()
    }
}
