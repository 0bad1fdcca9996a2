use nix::errno::Errno;
use nix::unistd::Pid;

use crate::debugger::arch::{Arch, Isa};
use crate::debugger::error::Error;

/// Arch-specific ptrace request (not exposed by libc) that rewrites the
/// number of the syscall being dispatched.
const PTRACE_SET_SYSCALL: libc::c_uint = 23;

/// Register file layout matching the kernel's `user_regs` (`uregs`:
/// r0-r15, cpsr, orig_r0), fetched and stored with `PTRACE_GETREGS`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegSnapshot {
    pub uregs: [u32; 18],
}

const R0: usize = 0;
const R7: usize = 7;
const SP: usize = 13;
const PC: usize = 15;

// The undefined instruction the kernel reserves for ptrace breakpoints
// (arm mode).
const TRAP: [u8; 4] = [0xF0, 0x01, 0xF0, 0xE7];
// $ rasm2 -a arm -b 32 'svc 0'
const SYSCALL: [u8; 4] = [0x00, 0x00, 0x00, 0xEF];

pub struct Arm;

impl Arch for Arm {
    fn isa(&self) -> Isa {
        Isa::Arm
    }

    fn trap_bytes(&self) -> &'static [u8] {
        &TRAP
    }

    fn trap_rewind(&self) -> u64 {
        // the undefined-instruction trap leaves the pc on the trap
        0
    }

    fn syscall_bytes(&self) -> &'static [u8] {
        &SYSCALL
    }

    fn ip(&self, regs: &RegSnapshot) -> u64 {
        regs.uregs[PC] as u64
    }

    fn set_ip(&self, regs: &mut RegSnapshot, value: u64) {
        regs.uregs[PC] = value as u32;
    }

    fn sp(&self, regs: &RegSnapshot) -> u64 {
        regs.uregs[SP] as u64
    }

    fn syscall_nr(&self, regs: &RegSnapshot) -> u64 {
        regs.uregs[R7] as u64
    }

    // r7 is read when svc executes; a call already in dispatch is
    // redirected through cancel_syscall instead
    fn set_syscall_nr(&self, regs: &mut RegSnapshot, nr: u64) {
        regs.uregs[R7] = nr as u32;
    }

    fn cancel_syscall(&self, pid: Pid, _regs: &mut RegSnapshot) -> Result<(), Error> {
        // -1 makes the kernel skip the call
        let res = unsafe {
            libc::ptrace(
                PTRACE_SET_SYSCALL,
                libc::pid_t::from(pid),
                std::ptr::null_mut::<libc::c_void>(),
                -1 as libc::c_long,
            )
        };
        Errno::result(res).map(drop).map_err(Error::Ptrace)
    }

    fn syscall_arg(&self, regs: &RegSnapshot, n: usize) -> u64 {
        assert!(n < 6, "syscall argument index out of range");
        regs.uregs[R0 + n] as u64
    }

    fn set_syscall_arg(&self, regs: &mut RegSnapshot, n: usize, value: u64) {
        assert!(n < 6, "syscall argument index out of range");
        regs.uregs[R0 + n] = value as u32;
    }

    fn syscall_ret(&self, regs: &RegSnapshot) -> u64 {
        regs.uregs[R0] as u64
    }

    fn set_syscall_ret(&self, regs: &mut RegSnapshot, value: u64) {
        regs.uregs[R0] = value as u32;
    }
}
