//! Synthetic syscall injection.
//!
//! An injection borrows the tracee at a safe stop: the register file and
//! the instruction bytes under the instruction pointer are saved, a
//! syscall instruction is scribbled in, the syscall number and arguments
//! are loaded into the argument registers, and the tracee is driven
//! through the two resulting syscall-stops. Both stops are consumed by
//! the injector and never reach user syscall hooks. Afterwards code
//! bytes and registers are restored bitwise and the completion callback
//! fires with the return value.

use crate::debugger::arch::RegSnapshot;
use crate::debugger::breakpoint::Decision;
use crate::debugger::error::Error;
use crate::debugger::memory;
use crate::debugger::syscall::SyscallPhase;
use crate::debugger::tracee::{Tracee, TraceeView};

pub type InjectionCallback = Box<dyn FnOnce(&mut TraceeView<'_>, i64) -> Decision>;

/// A synthetic syscall queued against one tracee. Queued injections run
/// sequentially in enqueue order.
pub struct SyscallInjection {
    nr: i64,
    args: [u64; 6],
    on_complete: Option<InjectionCallback>,
}

impl SyscallInjection {
    pub fn new(nr: i64) -> Self {
        Self {
            nr,
            args: [0; 6],
            on_complete: None,
        }
    }

    pub fn args(mut self, args: [u64; 6]) -> Self {
        self.args = args;
        self
    }

    pub fn arg(mut self, n: usize, value: u64) -> Self {
        self.args[n] = value;
        self
    }

    /// Callback fired once, after registers and code bytes are restored;
    /// receives the injected syscall's return value.
    pub fn on_complete(
        mut self,
        callback: impl FnOnce(&mut TraceeView<'_>, i64) -> Decision + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn nr(&self) -> i64 {
        self.nr
    }
}

/// Which of the two synthetic syscall-stops the injector waits for next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InjectStep {
    AwaitEnter,
    AwaitExit,
}

/// An injection in flight on one tracee.
pub(crate) struct ActiveInjection {
    pub step: InjectStep,
    pub saved_regs: RegSnapshot,
    pub saved_text: Vec<u8>,
    pub text_addr: u64,
    pub on_complete: Option<InjectionCallback>,
}

/// Activate `injection` on a tracee standing at a safe stop. The caller
/// guarantees the tracee is stopped with no native syscall in flight.
pub(crate) fn begin(tracee: &mut Tracee, injection: SyscallInjection) -> Result<(), Error> {
    debug_assert!(tracee.injection.is_none());
    debug_assert_eq!(tracee.phase, SyscallPhase::Outside);

    let arch = tracee.arch();
    let saved_regs = tracee.regs()?;
    let ip = arch.ip(&saved_regs);

    let syscall_text = arch.syscall_bytes();
    let saved_text = memory::read_bytes(tracee.pid, ip, syscall_text.len())?;
    memory::write_bytes(tracee.pid, ip, syscall_text)?;

    let mut prep = saved_regs;
    arch.set_syscall_nr(&mut prep, injection.nr as u64);
    for (n, value) in injection.args.iter().enumerate() {
        arch.set_syscall_arg(&mut prep, n, *value);
    }
    if let Err(e) = tracee.set_regs(&prep) {
        // back out the scribbled instruction before reporting
        let _ = memory::write_bytes(tracee.pid, ip, &saved_text);
        return Err(e);
    }

    log::debug!(
        target: "tracer",
        "injection of syscall {nr} armed at {ip:#x}, thread: {pid}",
        nr = injection.nr,
        pid = tracee.pid
    );

    tracee.injection = Some(ActiveInjection {
        step: InjectStep::AwaitEnter,
        saved_regs,
        saved_text,
        text_addr: ip,
        on_complete: injection.on_complete,
    });
    Ok(())
}

/// Finalize after the synthetic exit stop: read the return value, put
/// code bytes and register file back exactly as saved, and hand the
/// completion callback to the caller.
pub(crate) fn finish(tracee: &mut Tracee) -> Result<(i64, Option<InjectionCallback>), Error> {
    let inj = tracee
        .injection
        .take()
        .expect("finish is only called with an injection in flight");
    let arch = tracee.arch();

    let result_regs = tracee.regs()?;
    let ret = arch.syscall_ret(&result_regs) as i64;
    debug_assert_eq!(
        arch.ip(&result_regs),
        inj.text_addr + arch.syscall_bytes().len() as u64
    );

    memory::write_bytes(tracee.pid, inj.text_addr, &inj.saved_text)?;
    tracee.set_regs(&inj.saved_regs)?;

    // phase state is lost to the injected call; the next syscall-stop
    // this tracee reports is an enter
    tracee.phase = SyscallPhase::Outside;

    log::debug!(
        target: "tracer",
        "injection complete with ret {ret}, thread: {pid}",
        pid = tracee.pid
    );
    Ok((ret, inj.on_complete))
}

/// Undo an in-flight injection without running it to completion, e.g.
/// when the tracee is detached mid-protocol.
pub(crate) fn abort(tracee: &mut Tracee) -> Result<(), Error> {
    if let Some(inj) = tracee.injection.take() {
        memory::write_bytes(tracee.pid, inj.text_addr, &inj.saved_text)?;
        tracee.set_regs(&inj.saved_regs)?;
        tracee.phase = SyscallPhase::Outside;
    }
    Ok(())
}
