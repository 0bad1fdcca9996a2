//! The event loop: wait for any tracee to stop, classify the stop,
//! dispatch to the breakpoint table, the syscall dispatcher or the
//! injector, and resume with the right flavor.
//!
//! This is the only place that blocks. All tracee mutations and hook
//! invocations happen on the thread that runs [`Debugger::event_loop`];
//! ptrace ties every tracee to that thread.

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::debugger::breakpoint::{BreakpointId, Decision};
use crate::debugger::code;
use crate::debugger::error::Error;
use crate::debugger::inject;
use crate::debugger::modules::ModuleMap;
use crate::debugger::syscall::{
    SuppressedSyscall, SyscallPhase, SyscallTag, SyscallTraceData, SyscallVerdict,
};
use crate::debugger::tracee::{Resume, Tracee, TraceeStatus, TraceeView};
use crate::debugger::Debugger;
use crate::weak_error;

/// Why a tracee is stopped, as classified from the wait status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No stop classified yet (fresh attach, or after a restoration
    /// step).
    None,
    /// An OS signal was delivered.
    SignalDelivered(Signal),
    /// A software breakpoint trap fired at this address.
    BreakpointHit(u64),
    SyscallEnter,
    SyscallExit,
    /// The tracee forked; the child is auto-attached when fork
    /// following is on.
    ForkChild(Pid),
    /// The tracee spawned a thread.
    CloneChild(Pid),
    /// The tracee replaced its image.
    Exec,
    Exited(i32),
    Killed(Signal),
}

impl Debugger {
    /// Drive all tracees until none remain, or until a handler returns
    /// [`Decision::Shutdown`] (then every remaining tracee is detached).
    ///
    /// Errors raised for a single tracee detach that tracee and are
    /// collected in the diagnostics list; only engine-level failures
    /// (losing the wait channel) abort the loop.
    pub fn event_loop(&mut self) -> Result<(), Error> {
        loop {
            if self.shutdown || self.tracees.is_empty() {
                break;
            }

            self.prepare_stopped();
            self.resume_stopped()?;

            let status = match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::__WALL)) {
                Ok(status) => status,
                Err(Errno::ECHILD) => break,
                Err(e) => return Err(Error::Waitpid(e)),
            };
            debug!(target: "tracer", "receive tracee status: {status:?}");

            let pid = status.pid();
            if let Err(e) = self.classify_and_dispatch(status) {
                if e.is_fatal() {
                    return Err(e);
                }
                match pid {
                    Some(pid) => self.fail_tracee(pid, e),
                    None => warn!(target: "tracer", "unattributable error: {e:#}"),
                }
            }
        }

        self.shutdown = false;
        self.detach_all();
        self.orphans.clear();
        Ok(())
    }

    /// Late work on every stopped tracee before it resumes: arm
    /// breakpoints whose module has appeared (or that were registered
    /// since the last stop) and activate a queued injection when the
    /// tracee stands at a safe stop.
    fn prepare_stopped(&mut self) {
        let Self {
            tracees,
            breakpoints,
            diagnostics,
            ..
        } = self;

        for tracee in tracees.values_mut() {
            if !tracee.is_stopped() || tracee.held || tracee.exiting {
                continue;
            }

            let pending: Vec<BreakpointId> = tracee.pending_defs.iter().copied().collect();
            for id in pending {
                if tracee.done.contains(&id) {
                    tracee.pending_defs.remove(&id);
                    continue;
                }
                let def = breakpoints.def(id);
                match tracee.modules.resolve(&def.module, def.offset) {
                    Ok(addr) => {
                        tracee.pending_defs.remove(&id);
                        if let Err(e) = tracee.arm(id, addr) {
                            warn!(target: "tracer", "arming {module}+{offset:#x} failed: {e:#}",
                                module = def.module, offset = def.offset);
                            diagnostics.push((tracee.pid, e));
                        }
                    }
                    // module not loaded yet, retried on the next stop
                    Err(Error::Unresolved(_)) => {}
                    Err(e) => {
                        tracee.pending_defs.remove(&id);
                        diagnostics.push((tracee.pid, e));
                    }
                }
            }

            // a safe stop has no native syscall in flight and no
            // restoration step outstanding
            if tracee.injection.is_none()
                && !tracee.queue.is_empty()
                && tracee.phase == SyscallPhase::Outside
                && tracee.pending_restoration.is_none()
            {
                let injection = tracee.queue.pop_front().expect("queue checked non-empty");
                match inject::begin(tracee, injection) {
                    Ok(()) => tracee.next_resume = Resume::Syscall,
                    Err(e) => {
                        warn!(target: "tracer", "injection activation failed: {e:#}");
                        diagnostics.push((tracee.pid, e));
                    }
                }
            }
        }
    }

    /// Continue all currently stopped tracees with their chosen resume
    /// flavor.
    fn resume_stopped(&mut self) -> Result<(), Error> {
        let mut errors = vec![];
        let syscall_stops = self.trace_syscalls;

        for tracee in self.tracees.values_mut() {
            if !tracee.is_stopped() || tracee.held {
                continue;
            }

            // syscall tracing may have been switched on since this
            // tracee last chose its flavor
            if syscall_stops && !tracee.exiting && tracee.next_resume == Resume::Continue {
                tracee.next_resume = Resume::Syscall;
            }

            if let Err(e) = tracee.resume() {
                // if no such process - continue, it will be reaped by the
                // next terminal wait status
                if Errno::ESRCH == e {
                    warn!(target: "tracer", "thread {} not found, ESRCH", tracee.pid);
                    continue;
                }
                errors.push(Error::Ptrace(e));
            }
        }

        if !errors.is_empty() {
            return Err(Error::MultipleErrors(errors));
        }
        Ok(())
    }

    fn classify_and_dispatch(&mut self, status: WaitStatus) -> Result<(), Error> {
        match status {
            WaitStatus::Exited(pid, code) => {
                self.reap(pid, StopReason::Exited(code));
                Ok(())
            }
            WaitStatus::Signaled(pid, sig, _core_dumped) => {
                self.reap(pid, StopReason::Killed(sig));
                Ok(())
            }
            WaitStatus::PtraceEvent(pid, _sig, event) => self.on_ptrace_event(pid, event),
            WaitStatus::PtraceSyscall(pid) => self.on_syscall_stop(pid),
            WaitStatus::Stopped(pid, sig) => self.on_signal_stop(pid, sig),
            status => {
                warn!(target: "tracer", "unexpected wait status: {status:?}");
                Ok(())
            }
        }
    }

    /// A terminal wait status: the tracee is gone. Its record, and with
    /// it any armed breakpoints and queued injections, is dropped; the
    /// remaining tracees are unaffected.
    fn reap(&mut self, pid: Pid, reason: StopReason) {
        self.orphans.remove(&pid);
        let Some(tracee) = self.tracees.remove(&pid) else {
            // exit of a process we already released
            return;
        };
        debug!(target: "tracer", "tracee gone ({reason:?}), thread: {pid}");
        let dropped = tracee.queue.len() + usize::from(tracee.injection.is_some());
        if dropped > 0 {
            warn!(target: "tracer", "{dropped} unfinished injection(s) dropped with tracee {pid}");
        }
    }

    fn on_ptrace_event(&mut self, pid: Pid, event: libc::c_int) -> Result<(), Error> {
        let verb = self.normal_verb();
        let Some(tracee) = self.tracees.get_mut(&pid) else {
            warn!(target: "tracer", "ptrace event {event} for unknown thread {pid}");
            return Ok(());
        };
        tracee.status = TraceeStatus::Stopped;
        // an event may interrupt a restoration step (stepping over a
        // fork syscall instruction) or an injection in flight; those
        // own the resume flavor until they settle
        tracee.next_resume = if tracee.pending_restoration.is_some() {
            Resume::Step
        } else if tracee.injection.is_some() {
            Resume::Syscall
        } else {
            verb
        };

        match event {
            libc::PTRACE_EVENT_FORK | libc::PTRACE_EVENT_VFORK => {
                let new = Pid::from_raw(sys::ptrace::getevent(pid).map_err(Error::Ptrace)? as _);
                tracee.stop_reason = StopReason::ForkChild(new);
                self.adopt_child(pid, new, false)
            }
            libc::PTRACE_EVENT_CLONE => {
                let new = Pid::from_raw(sys::ptrace::getevent(pid).map_err(Error::Ptrace)? as _);
                tracee.stop_reason = StopReason::CloneChild(new);
                self.adopt_child(pid, new, true)
            }
            libc::PTRACE_EVENT_EXEC => self.on_exec(pid),
            libc::PTRACE_EVENT_EXIT => {
                // only the terminal status is left; run the tracee into it
                tracee.exiting = true;
                tracee.next_resume = Resume::Continue;
                Ok(())
            }
            libc::PTRACE_EVENT_VFORK_DONE => Ok(()),
            code => {
                warn!(target: "tracer", "unsupported (ignored) ptrace event, code: {code}");
                Ok(())
            }
        }
    }

    /// Bring a fork/clone child under control. The child's code image is
    /// a copy of the parent's, traps included, so it starts with the
    /// parent's armed set (and the parent's lifted trap, if a
    /// restoration step was outstanding at fork time).
    fn adopt_child(&mut self, parent: Pid, new: Pid, is_clone: bool) -> Result<(), Error> {
        if !self.follow_fork {
            if self.tracees.remove(&new).is_some() {
                // the child already reported its attach-stop; release it
                weak_error!(sys::ptrace::detach(new, None).map_err(Error::Ptrace));
            } else {
                self.orphans.insert(new);
            }
            return Ok(());
        }

        let parent_tracee = self
            .tracees
            .get(&parent)
            .ok_or(Error::TraceeNotFound(parent))?;
        let mut child = Tracee::new(new, parent_tracee.arch(), ModuleMap::empty());
        child.inherit_from(parent_tracee);
        debug!(
            target: "tracer",
            "follow {kind} child {new} of {parent}",
            kind = if is_clone { "clone" } else { "fork" },
        );

        match self.tracees.get_mut(&new) {
            // the child's attach-stop arrived before the parent's event
            // and parked it; it is stopped and ready to go
            Some(parked) => {
                debug_assert!(parked.held);
                *parked = child;
            }
            None => {
                child.attach_pending = true;
                child.status = TraceeStatus::Running;
                self.tracees.insert(new, child);
            }
        }
        Ok(())
    }

    /// The tracee replaced its image: every installed trap died with the
    /// old mappings. Reload the module map and re-resolve everything
    /// that is not already spent.
    fn on_exec(&mut self, pid: Pid) -> Result<(), Error> {
        let all_ids: Vec<BreakpointId> = self.breakpoints.ids().collect();
        let tracee = self
            .tracees
            .get_mut(&pid)
            .ok_or(Error::TraceeNotFound(pid))?;

        tracee.stop_reason = StopReason::Exec;
        tracee.modules = ModuleMap::inspect(pid)?;
        tracee.armed.clear();
        tracee.pending_restoration = None;
        tracee.deferred_signal = None;
        tracee.suppressed = None;
        tracee.pending_defs = all_ids
            .into_iter()
            .filter(|id| !tracee.done.contains(id))
            .collect();

        // the exec event reports from inside execve; the next
        // syscall-stop is its exit
        tracee.phase = SyscallPhase::InsideKernel;
        Ok(())
    }

    fn on_syscall_stop(&mut self, pid: Pid) -> Result<(), Error> {
        let Some(tracee) = self.tracees.get_mut(&pid) else {
            warn!(target: "tracer", "syscall-stop for unknown thread {pid}");
            return Ok(());
        };
        tracee.status = TraceeStatus::Stopped;

        if tracee.injection.is_some() {
            return self.advance_injection(pid);
        }

        match tracee.phase {
            SyscallPhase::Outside => {
                tracee.phase = SyscallPhase::InsideKernel;
                tracee.stop_reason = StopReason::SyscallEnter;
                self.dispatch_syscall(pid, SyscallTag::Enter)
            }
            SyscallPhase::InsideKernel => {
                tracee.phase = SyscallPhase::Outside;
                tracee.stop_reason = StopReason::SyscallExit;
                self.dispatch_syscall(pid, SyscallTag::Exit)
            }
        }
    }

    fn dispatch_syscall(&mut self, pid: Pid, tag: SyscallTag) -> Result<(), Error> {
        let verb = self.normal_verb();
        let Self {
            tracees,
            syscalls,
            coverage,
            ..
        } = self;
        let tracee = tracees.get_mut(&pid).ok_or(Error::TraceeNotFound(pid))?;
        let arch = tracee.arch();
        // a syscall boundary always resumes towards the matching
        // boundary, or phase tracking would drift
        tracee.next_resume = match verb {
            Resume::Continue if tag == SyscallTag::Enter => Resume::Syscall,
            verb => verb,
        };

        // a cancelled call no longer shows its real id in the registers
        // by the exit stop, so the id comes from the enter-stop record
        let suppressed = match tag {
            SyscallTag::Enter => None,
            SyscallTag::Exit => tracee.suppressed.take(),
        };

        let mut suppress = None;
        {
            let mut view = TraceeView::new(tracee, crate::debugger::coverage::reborrow(coverage))?;
            if let Some(s) = suppressed {
                arch.set_syscall_ret(view.regs_mut(), s.ret as u64);
            }

            let nr = match suppressed {
                Some(s) => s.nr,
                None => arch.syscall_nr(view.regs()) as i64,
            };
            if let Some(hook) = syscalls.hook_mut(nr) {
                let mut data = SyscallTraceData::from_regs(arch, view.regs(), nr, tag);
                match tag {
                    SyscallTag::Enter => {
                        let verdict =
                            match catch_unwind(AssertUnwindSafe(|| hook.on_enter(&mut data, &mut view)))
                            {
                                Ok(verdict) => verdict,
                                Err(_) => {
                                    warn!(target: "tracer", "enter hook for syscall {nr} panicked, passing through");
                                    SyscallVerdict::Pass
                                }
                            };
                        if let SyscallVerdict::Suppress { ret } = verdict {
                            suppress = Some(SuppressedSyscall { nr, ret });
                        }
                    }
                    SyscallTag::Exit => {
                        if catch_unwind(AssertUnwindSafe(|| hook.on_exit(&mut data, &mut view)))
                            .is_err()
                        {
                            warn!(target: "tracer", "exit hook for syscall {nr} panicked, passing through");
                        }
                    }
                }

                let mut snapshot = *view.regs();
                if data.write_back(arch, &mut snapshot) {
                    *view.regs_mut() = snapshot;
                }
            }

            if suppress.is_some() {
                // divert the in-flight call so the kernel executes a
                // rejected no-op; the tracee observes the forced return
                // value at the exit stop
                let pid = view.pid();
                arch.cancel_syscall(pid, view.regs_mut())?;
            }
            view.flush()?;
        }

        if let Some(s) = suppress {
            tracee.suppressed = Some(s);
        }
        Ok(())
    }

    /// One of the two synthetic syscall-stops owned by an injection.
    /// They are consumed here and never reach the user dispatcher.
    fn advance_injection(&mut self, pid: Pid) -> Result<(), Error> {
        use crate::debugger::inject::InjectStep;

        let verb = self.normal_verb();
        let step = {
            let tracee = self
                .tracees
                .get_mut(&pid)
                .ok_or(Error::TraceeNotFound(pid))?;
            tracee
                .injection
                .as_ref()
                .expect("advance_injection is called with an injection in flight")
                .step
        };

        match step {
            InjectStep::AwaitEnter => {
                let tracee = self.tracees.get_mut(&pid).expect("checked above");
                tracee
                    .injection
                    .as_mut()
                    .expect("checked above")
                    .step = InjectStep::AwaitExit;
                tracee.next_resume = Resume::Syscall;
                Ok(())
            }
            InjectStep::AwaitExit => {
                let finished = {
                    let tracee = self.tracees.get_mut(&pid).expect("checked above");
                    inject::finish(tracee)
                };
                let (ret, callback) = match finished {
                    Ok(done) => done,
                    Err(e) => {
                        // the injection site could not be restored: the
                        // code image is in a known-bad state
                        warn!(target: "tracer", "injection restore failed, killing tracee {pid}: {e:#}");
                        self.diagnostics.push((pid, e));
                        self.kill_tracee(pid);
                        return Ok(());
                    }
                };

                {
                    let tracee = self.tracees.get_mut(&pid).expect("checked above");
                    tracee.next_resume = verb;
                    if let Some(sig) = tracee.deferred_signal.take() {
                        tracee.pending_signal = Some(sig);
                    }
                }

                let decision = match callback {
                    Some(callback) => {
                        let Self {
                            tracees, coverage, ..
                        } = self;
                        let tracee = tracees.get_mut(&pid).expect("checked above");
                        let mut view = TraceeView::new(tracee, crate::debugger::coverage::reborrow(coverage))?;
                        let decision =
                            match catch_unwind(AssertUnwindSafe(|| callback(&mut view, ret))) {
                                Ok(decision) => decision,
                                Err(_) => {
                                    warn!(target: "tracer", "injection callback panicked");
                                    Decision::Continue
                                }
                            };
                        view.flush()?;
                        decision
                    }
                    None => Decision::Continue,
                };
                self.apply_decision(pid, decision)
            }
        }
    }

    fn on_signal_stop(&mut self, pid: Pid, sig: Signal) -> Result<(), Error> {
        let verb = self.normal_verb();
        let Some(tracee) = self.tracees.get_mut(&pid) else {
            if self.orphans.remove(&pid) {
                weak_error!(sys::ptrace::detach(pid, None).map_err(Error::Ptrace));
                return Ok(());
            }
            // a fork child stopping before its parent's fork event: park
            // it until inheritance is known
            debug!(target: "tracer", "early attach-stop of unannounced child {pid}");
            let mut child = Tracee::new(pid, self.arch, ModuleMap::empty());
            child.held = true;
            self.tracees.insert(pid, child);
            return Ok(());
        };
        tracee.status = TraceeStatus::Stopped;

        if tracee.attach_pending && sig == Signal::SIGSTOP {
            tracee.attach_pending = false;
            tracee.stop_reason = StopReason::None;
            if tracee.pending_restoration.is_none() {
                tracee.next_resume = verb;
            }
            return Ok(());
        }

        if sig == Signal::SIGTRAP {
            return self.on_sigtrap(pid);
        }
        self.on_signal_delivery(pid, sig)
    }

    fn on_sigtrap(&mut self, pid: Pid) -> Result<(), Error> {
        let info = match sys::ptrace::getsiginfo(pid) {
            Ok(info) => info,
            Err(Errno::ESRCH) => {
                self.reap(pid, StopReason::Killed(Signal::SIGKILL));
                return Ok(());
            }
            Err(e) => return Err(Error::Ptrace(e)),
        };

        match info.si_code {
            code::TRAP_BRKPT | code::SI_KERNEL => self.on_breakpoint_trap(pid),
            code::TRAP_TRACE => self.complete_restoration(pid),
            // SIGTRAP raised by kill() is an ordinary signal
            code::SI_USER => self.on_signal_delivery(pid, Signal::SIGTRAP),
            code => Err(Error::UnknownStop {
                pid,
                details: format!("unexpected SIGTRAP code {code}"),
            }),
        }
    }

    fn on_breakpoint_trap(&mut self, pid: Pid) -> Result<(), Error> {
        let (addr, owned) = {
            let tracee = self
                .tracees
                .get_mut(&pid)
                .ok_or(Error::TraceeNotFound(pid))?;
            let regs = tracee.regs()?;
            let addr = tracee.arch().ip(&regs) - tracee.arch().trap_rewind();
            (addr, tracee.armed.contains_key(&addr))
        };

        if !owned {
            // a trap we did not write (hardcoded int3 in the target):
            // the tracee keeps its signal
            debug!(target: "tracer", "foreign trap at {addr:#x}, thread: {pid}");
            return self.on_signal_delivery(pid, Signal::SIGTRAP);
        }

        let decision = self.run_breakpoint_handler(pid, addr)?;
        self.apply_decision(pid, decision)
    }

    /// The on-hit sequence: rewind the pc onto the trap address, run the
    /// user handler, lift the trap, then either retire the registration
    /// (single-shot) or schedule the restoration step.
    fn run_breakpoint_handler(&mut self, pid: Pid, addr: u64) -> Result<Decision, Error> {
        let verb = self.normal_verb();
        let Self {
            tracees,
            breakpoints,
            coverage,
            ..
        } = self;
        let tracee = tracees.get_mut(&pid).ok_or(Error::TraceeNotFound(pid))?;
        let arch = tracee.arch();

        let id = tracee.armed[&addr].def;
        let single_shot = breakpoints.def(id).single_shot;
        tracee.stop_reason = StopReason::BreakpointHit(addr);
        debug!(target: "tracer", "breakpoint hit at {addr:#x}, thread: {pid}");

        let decision = {
            let mut view = TraceeView::new(tracee, crate::debugger::coverage::reborrow(coverage))?;
            if arch.trap_rewind() != 0 {
                view.set_pc(addr);
            }

            let handler = &mut breakpoints.def_mut(id).handler;
            let decision = match catch_unwind(AssertUnwindSafe(|| handler(&mut view))) {
                Ok(decision) => decision,
                Err(_) => {
                    warn!(target: "tracer", "breakpoint handler at {addr:#x} panicked, passing through");
                    Decision::Continue
                }
            };
            view.flush()?;
            decision
        };

        tracee.disarm(addr)?;
        if single_shot {
            tracee.done.insert(id);
            tracee.next_resume = verb;
        } else {
            tracee.pending_restoration = Some((id, addr));
            tracee.next_resume = Resume::Step;
        }
        Ok(decision)
    }

    /// The restoration single-step landed: put the trap back and hand
    /// over any signal that arrived while the trap was lifted.
    fn complete_restoration(&mut self, pid: Pid) -> Result<(), Error> {
        let verb = self.normal_verb();
        let tracee = self
            .tracees
            .get_mut(&pid)
            .ok_or(Error::TraceeNotFound(pid))?;

        let Some((id, addr)) = tracee.pending_restoration.take() else {
            return Err(Error::UnknownStop {
                pid,
                details: "single-step trap without a restoration pending".into(),
            });
        };

        tracee.stop_reason = StopReason::None;
        if !tracee.done.contains(&id) {
            if let Err(e) = tracee.arm(id, addr) {
                // the code image is in a known-bad state
                warn!(target: "tracer", "re-arming {addr:#x} failed, killing tracee {pid}: {e:#}");
                self.diagnostics.push((pid, e));
                self.kill_tracee(pid);
                return Ok(());
            }
        }

        if let Some(sig) = tracee.deferred_signal.take() {
            tracee.pending_signal = Some(sig);
        }
        tracee.next_resume = verb;
        Ok(())
    }

    fn on_signal_delivery(&mut self, pid: Pid, sig: Signal) -> Result<(), Error> {
        let verb = self.normal_verb();
        let tracee = self
            .tracees
            .get_mut(&pid)
            .ok_or(Error::TraceeNotFound(pid))?;

        // a signal landing between a breakpoint rewind and its
        // restoration step, or inside an injection, is deferred and
        // re-queued once the tracee is whole again
        if tracee.pending_restoration.is_some() {
            tracee.deferred_signal = Some(sig);
            tracee.next_resume = Resume::Step;
            return Ok(());
        }
        if tracee.injection.is_some() {
            tracee.deferred_signal = Some(sig);
            tracee.next_resume = Resume::Syscall;
            return Ok(());
        }

        tracee.stop_reason = StopReason::SignalDelivered(sig);
        let forward = match self.signal_filter.as_mut() {
            Some(filter) => filter(pid, sig),
            None => true,
        };
        if forward {
            tracee.pending_signal = Some(sig);
        } else {
            debug!(target: "tracer", "signal {sig:?} swallowed by filter, thread: {pid}");
        }
        tracee.next_resume = verb;
        Ok(())
    }

    fn apply_decision(&mut self, pid: Pid, decision: Decision) -> Result<(), Error> {
        match decision {
            Decision::Continue => Ok(()),
            Decision::Detach => self.detach_tracee(pid),
            Decision::Kill => {
                self.kill_tracee(pid);
                Ok(())
            }
            Decision::Shutdown => {
                self.shutdown = true;
                Ok(())
            }
        }
    }

    /// Contain a per-tracee failure: record it and release the tracee;
    /// the others keep running.
    fn fail_tracee(&mut self, pid: Pid, err: Error) {
        warn!(target: "tracer", "tracee {pid} failed, detaching: {err:#}");
        self.diagnostics.push((pid, err));
        let _ = self.detach_tracee(pid);
    }

    /// Release one tracee: lift its traps, back out any in-flight
    /// injection, and detach.
    pub(crate) fn detach_tracee(&mut self, pid: Pid) -> Result<(), Error> {
        let Some(mut tracee) = self.tracees.remove(&pid) else {
            return Err(Error::TraceeNotFound(pid));
        };

        if !tracee.is_stopped() {
            // classic ptrace can only detach from a stop
            weak_error!(sys::signal::kill(pid, Signal::SIGSTOP).map_err(Error::Ptrace));
            weak_error!(waitpid(pid, Some(WaitPidFlag::__WALL)).map_err(Error::Waitpid));
            tracee.status = TraceeStatus::Stopped;
        }

        weak_error!(inject::abort(&mut tracee), "abort in-flight injection:");
        let addrs: Vec<u64> = tracee.armed.keys().copied().collect();
        for addr in addrs {
            weak_error!(tracee.disarm(addr), "restore trap on detach:");
        }

        weak_error!(sys::ptrace::detach(pid, None).map_err(Error::Ptrace));
        debug!(target: "tracer", "detached from tracee, thread: {pid}");
        Ok(())
    }

    /// Send SIGKILL; the terminal wait status reaps the record.
    pub(crate) fn kill_tracee(&mut self, pid: Pid) {
        debug!(target: "tracer", "killing tracee, thread: {pid}");
        weak_error!(sys::signal::kill(pid, Signal::SIGKILL).map_err(Error::Ptrace));
    }

    fn detach_all(&mut self) {
        let pids: Vec<Pid> = self.tracees.keys().copied().collect();
        for pid in pids {
            let _ = self.detach_tracee(pid);
        }
    }

    /// Resume flavor outside of stepping and injection driving.
    fn normal_verb(&self) -> Resume {
        if self.trace_syscalls {
            Resume::Syscall
        } else {
            Resume::Continue
        }
    }
}
