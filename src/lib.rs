//! A programmable debugger for unmodified Linux processes.
//!
//! `bintrace` drives one or more tracees through ptrace-stop/continue
//! transitions and exposes three hook families: software breakpoints,
//! syscall enter/exit hooks, and synthetic syscall injection. The
//! [`Debugger`](debugger::Debugger) owns all per-tracee state; user hooks
//! receive a borrowed [`TraceeView`](debugger::tracee::TraceeView) and
//! never extend its lifetime.
//!
//! The engine is single-threaded by construction: ptrace ties a tracee to
//! the tracer thread, so every wait, register access and hook invocation
//! happens on the thread that calls [`event_loop`](debugger::Debugger::event_loop).

pub mod debugger;

pub use debugger::arch::{Isa, RegSnapshot, TargetDescription};
pub use debugger::breakpoint::Decision;
pub use debugger::coverage::CoverageSink;
pub use debugger::error::Error;
pub use debugger::inject::SyscallInjection;
pub use debugger::memory::RemotePointer;
pub use debugger::syscall::{SyscallHook, SyscallTag, SyscallTraceData, SyscallVerdict};
pub use debugger::tracee::TraceeView;
pub use debugger::{Debugger, StopReason};
