use nix::unistd::Pid;
use std::io;

use crate::debugger::arch::Isa;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- attach/spawn errors ---------------------------------------
    #[error("attach to {0} denied by the kernel")]
    AttachDenied(Pid),
    #[error("process {0} not found")]
    NoSuchProcess(Pid),
    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    // --------------------------------- remote memory errors --------------------------------------
    #[error("memory fault in tracee {pid} at {addr:#x}: {source}")]
    MemoryFault {
        pid: Pid,
        addr: u64,
        source: nix::Error,
    },
    #[error("tracee {0} is not stopped")]
    NotStopped(Pid),
    #[error("register i/o failed for tracee {pid}: {source}")]
    RegisterIOFailed { pid: Pid, source: nix::Error },

    // --------------------------------- breakpoint errors -----------------------------------------
    #[error("module `{0}` not loaded")]
    Unresolved(String),
    #[error("breakpoint already registered for {module}+{offset:#x}")]
    BreakpointExists { module: String, offset: u64 },
    #[error("trap write failed in tracee {pid} at {addr:#x}: {source}")]
    TrapWriteFailed {
        pid: Pid,
        addr: u64,
        source: Box<Error>,
    },

    // --------------------------------- injection errors ------------------------------------------
    #[error("syscall injection is not safe for tracee {0} in its current state")]
    InjectionNotSafe(Pid),

    // --------------------------------- tracer errors ---------------------------------------------
    #[error("tracee {0} not found")]
    TraceeNotFound(Pid),
    #[error("undecodable stop for tracee {pid}: {details}")]
    UnknownStop { pid: Pid, details: String },
    #[error("waitpid syscall error: {0}")]
    Waitpid(nix::Error),
    #[error("ptrace syscall error: {0}")]
    Ptrace(nix::Error),
    #[error("multiple tracee errors: {0:?}")]
    MultipleErrors(Vec<Error>),

    // --------------------------------- target errors ---------------------------------------------
    #[error("target isa {0:?} is not supported on this host")]
    UnsupportedTarget(Isa),

    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] io::Error),
}

impl Error {
    /// Hint for the event loop: a fatal error tears the whole engine down,
    /// everything else is contained to the tracee that raised it.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::AttachDenied(_) => false,
            Error::NoSuchProcess(_) => false,
            Error::SpawnFailed(_) => false,
            Error::MemoryFault { .. } => false,
            Error::NotStopped(_) => false,
            Error::RegisterIOFailed { .. } => false,
            Error::Unresolved(_) => false,
            Error::BreakpointExists { .. } => false,
            Error::TrapWriteFailed { .. } => false,
            Error::InjectionNotSafe(_) => false,
            Error::TraceeNotFound(_) => false,
            Error::UnknownStop { .. } => false,
            Error::Ptrace(_) => false,
            Error::MultipleErrors(_) => false,
            Error::IO(_) => false,

            // losing the wait channel or the target description leaves
            // nothing to drive
            Error::Waitpid(_) => true,
            Error::UnsupportedTarget(_) => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "tracer", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "tracer", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and puts the error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
