use nix::errno::Errno;
use nix::unistd::Pid;

use crate::debugger::arch::{Arch, Isa};
use crate::debugger::error::Error;

/// Linux constant defined in `include/uapi/linux/elf.h`: the regset
/// holding the number of the syscall being dispatched.
const NT_ARM_SYSTEM_CALL: libc::c_int = 0x404;

/// Register file layout matching the kernel's `user_pt_regs`, fetched
/// and stored with `PTRACE_GETREGSET`/`NT_PRSTATUS`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegSnapshot {
    pub regs: [u64; 31],
    pub sp: u64,
    pub pc: u64,
    pub pstate: u64,
}

impl Default for RegSnapshot {
    fn default() -> Self {
        Self {
            regs: [0; 31],
            sp: 0,
            pc: 0,
            pstate: 0,
        }
    }
}

// $ rasm2 -a arm -b 64 'brk 0'
const TRAP: [u8; 4] = [0x00, 0x00, 0x20, 0xD4];
// $ rasm2 -a arm -b 64 'svc 0'
const SYSCALL: [u8; 4] = [0x01, 0x00, 0x00, 0xD4];

pub struct Arm64;

impl Arch for Arm64 {
    fn isa(&self) -> Isa {
        Isa::Arm64
    }

    fn trap_bytes(&self) -> &'static [u8] {
        &TRAP
    }

    fn trap_rewind(&self) -> u64 {
        // brk leaves the pc on the trapping instruction
        0
    }

    fn syscall_bytes(&self) -> &'static [u8] {
        &SYSCALL
    }

    fn ip(&self, regs: &RegSnapshot) -> u64 {
        regs.pc
    }

    fn set_ip(&self, regs: &mut RegSnapshot, value: u64) {
        regs.pc = value;
    }

    fn sp(&self, regs: &RegSnapshot) -> u64 {
        regs.sp
    }

    fn syscall_nr(&self, regs: &RegSnapshot) -> u64 {
        regs.regs[8]
    }

    // w8 is read when svc executes; a call already in dispatch is
    // redirected through cancel_syscall instead
    fn set_syscall_nr(&self, regs: &mut RegSnapshot, nr: u64) {
        regs.regs[8] = nr;
    }

    fn cancel_syscall(&self, pid: Pid, _regs: &mut RegSnapshot) -> Result<(), Error> {
        // the dispatch id lives in its own regset, not in the pt_regs
        // block; -1 makes the kernel skip the call
        let nr: libc::c_int = -1;
        let mut iov = libc::iovec {
            iov_base: &nr as *const libc::c_int as *mut libc::c_void,
            iov_len: std::mem::size_of::<libc::c_int>(),
        };
        let res = unsafe {
            libc::ptrace(
                libc::PTRACE_SETREGSET,
                libc::pid_t::from(pid),
                NT_ARM_SYSTEM_CALL,
                &mut iov as *mut libc::iovec,
            )
        };
        Errno::result(res).map(drop).map_err(Error::Ptrace)
    }

    fn syscall_arg(&self, regs: &RegSnapshot, n: usize) -> u64 {
        assert!(n < 6, "syscall argument index out of range");
        regs.regs[n]
    }

    fn set_syscall_arg(&self, regs: &mut RegSnapshot, n: usize, value: u64) {
        assert!(n < 6, "syscall argument index out of range");
        regs.regs[n] = value;
    }

    fn syscall_ret(&self, regs: &RegSnapshot) -> u64 {
        regs.regs[0]
    }

    fn set_syscall_ret(&self, regs: &mut RegSnapshot, value: u64) {
        regs.regs[0] = value;
    }
}
