//! Register-file transport: the whole block is moved between tracer and
//! kernel in one ptrace request, never register by register.

use log::debug;
use nix::errno::Errno;
use nix::unistd::Pid;
use std::mem;

use crate::debugger::arch::RegSnapshot;
use crate::debugger::error::Error;

fn reg_io_err(pid: Pid) -> impl Fn(nix::Error) -> Error {
    move |source| match source {
        Errno::ESRCH => Error::NoSuchProcess(pid),
        source => Error::RegisterIOFailed { pid, source },
    }
}

/// Fetch the full register file of a stopped tracee.
pub(crate) fn capture(pid: Pid) -> Result<RegSnapshot, Error> {
    debug!(target: "tracer", "read register file, thread: {pid}");
    getregs(pid).map_err(reg_io_err(pid))
}

/// Store a full register file into a stopped tracee.
pub(crate) fn flush(pid: Pid, regs: &RegSnapshot) -> Result<(), Error> {
    debug!(target: "tracer", "write register file, thread: {pid}");
    setregs(pid, regs).map_err(reg_io_err(pid))
}

#[cfg(any(target_arch = "x86_64", target_arch = "arm"))]
fn getregs(pid: Pid) -> nix::Result<RegSnapshot> {
    let mut data = mem::MaybeUninit::<RegSnapshot>::uninit();
    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGS,
            libc::pid_t::from(pid),
            std::ptr::null_mut::<libc::c_void>(),
            data.as_mut_ptr(),
        )
    };
    Errno::result(res)?;
    Ok(unsafe { data.assume_init() })
}

#[cfg(any(target_arch = "x86_64", target_arch = "arm"))]
fn setregs(pid: Pid, regs: &RegSnapshot) -> nix::Result<()> {
    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_SETREGS,
            libc::pid_t::from(pid),
            std::ptr::null_mut::<libc::c_void>(),
            regs as *const RegSnapshot,
        )
    };
    Errno::result(res).map(drop)
}

/// Linux constant defined in `include/uapi/linux/elf.h`.
#[cfg(target_arch = "aarch64")]
const NT_PRSTATUS: libc::c_int = 0x1;

#[cfg(target_arch = "aarch64")]
fn getregs(pid: Pid) -> nix::Result<RegSnapshot> {
    let mut data = mem::MaybeUninit::<RegSnapshot>::uninit();
    let mut iov = libc::iovec {
        iov_base: data.as_mut_ptr() as *mut libc::c_void,
        iov_len: mem::size_of::<RegSnapshot>(),
    };
    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            libc::pid_t::from(pid),
            NT_PRSTATUS,
            &mut iov as *mut libc::iovec,
        )
    };
    Errno::result(res)?;
    Ok(unsafe { data.assume_init() })
}

#[cfg(target_arch = "aarch64")]
fn setregs(pid: Pid, regs: &RegSnapshot) -> nix::Result<()> {
    let mut iov = libc::iovec {
        iov_base: regs as *const RegSnapshot as *mut libc::c_void,
        iov_len: mem::size_of::<RegSnapshot>(),
    };
    let res = unsafe {
        libc::ptrace(
            libc::PTRACE_SETREGSET,
            libc::pid_t::from(pid),
            NT_PRSTATUS,
            &mut iov as *mut libc::iovec,
        )
    };
    Errno::result(res).map(drop)
}
