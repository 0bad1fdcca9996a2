use nix::unistd::Pid;

use crate::debugger::arch::{Arch, Isa};
use crate::debugger::error::Error;

/// Register file layout matching the kernel's `user_regs_struct`,
/// fetched and stored with `PTRACE_GETREGS`/`PTRACE_SETREGS`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegSnapshot {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub orig_rax: u64,
    pub rip: u64,
    pub cs: u64,
    pub eflags: u64,
    pub rsp: u64,
    pub ss: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
}

// $ rasm2 -a x86 -b 64 'int3'
const TRAP: [u8; 1] = [0xCC];
// $ rasm2 -a x86 -b 64 'syscall'
const SYSCALL: [u8; 2] = [0x0F, 0x05];

pub struct X8664;

impl Arch for X8664 {
    fn isa(&self) -> Isa {
        Isa::X86_64
    }

    fn trap_bytes(&self) -> &'static [u8] {
        &TRAP
    }

    fn trap_rewind(&self) -> u64 {
        // int3 delivers SIGTRAP with rip past the trap byte
        1
    }

    fn syscall_bytes(&self) -> &'static [u8] {
        &SYSCALL
    }

    fn ip(&self, regs: &RegSnapshot) -> u64 {
        regs.rip
    }

    fn set_ip(&self, regs: &mut RegSnapshot, value: u64) {
        regs.rip = value;
    }

    fn sp(&self, regs: &RegSnapshot) -> u64 {
        regs.rsp
    }

    fn syscall_nr(&self, regs: &RegSnapshot) -> u64 {
        // rax is clobbered with -ENOSYS at the enter stop
        regs.orig_rax
    }

    fn set_syscall_nr(&self, regs: &mut RegSnapshot, nr: u64) {
        regs.orig_rax = nr;
        regs.rax = nr;
    }

    fn cancel_syscall(&self, _pid: Pid, regs: &mut RegSnapshot) -> Result<(), Error> {
        // orig_rax is what the kernel dispatches on; an id it does not
        // implement turns the call into an ENOSYS no-op
        regs.orig_rax = u64::MAX;
        regs.rax = u64::MAX;
        Ok(())
    }

    fn syscall_arg(&self, regs: &RegSnapshot, n: usize) -> u64 {
        match n {
            0 => regs.rdi,
            1 => regs.rsi,
            2 => regs.rdx,
            3 => regs.r10,
            4 => regs.r8,
            5 => regs.r9,
            _ => unreachable!("syscall argument index out of range"),
        }
    }

    fn set_syscall_arg(&self, regs: &mut RegSnapshot, n: usize, value: u64) {
        match n {
            0 => regs.rdi = value,
            1 => regs.rsi = value,
            2 => regs.rdx = value,
            3 => regs.r10 = value,
            4 => regs.r8 = value,
            5 => regs.r9 = value,
            _ => unreachable!("syscall argument index out of range"),
        }
    }

    fn syscall_ret(&self, regs: &RegSnapshot) -> u64 {
        regs.rax
    }

    fn set_syscall_ret(&self, regs: &mut RegSnapshot, value: u64) {
        regs.rax = value;
    }
}
