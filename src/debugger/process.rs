//! Bringing processes under trace: spawning a fresh tracee with piped
//! stdio, or seizing an already-running process and all of its threads.

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys;
use nix::sys::personality::Persona;
use nix::sys::ptrace::Options;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use os_pipe::PipeWriter;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::os::unix::process::CommandExt;
use std::process::Command;
use sysinfo::System;

use crate::debugger::error::Error;

/// Ptrace options every tracee is traced with: syscall-stops are
/// distinguishable, children are auto-attached, exec and exit produce
/// events.
pub(crate) const TRACE_OPTIONS: Options = Options::PTRACE_O_TRACESYSGOOD
    .union(Options::PTRACE_O_TRACEFORK)
    .union(Options::PTRACE_O_TRACEVFORK)
    .union(Options::PTRACE_O_TRACECLONE)
    .union(Options::PTRACE_O_TRACEEXEC)
    .union(Options::PTRACE_O_TRACEEXIT);

/// Process state.
pub trait State {}

/// Process running and attached with `ptrace` system call.
pub struct Installed;

impl State for Installed {}

/// Process prepared for instantiation.
pub struct Template;

impl State for Template {}

/// A tracee process spawned by the debugger.
pub struct Child<S: State> {
    program: String,
    args: Vec<String>,
    stdout: PipeWriter,
    stderr: PipeWriter,
    pid: Option<Pid>,
    _p: PhantomData<S>,
}

impl Child<Template> {
    /// Describe a process to spawn, but don't start it.
    ///
    /// # Arguments
    ///
    /// * `program`: program name
    /// * `args`: program arguments
    /// * `stdout`: stdout pipe
    /// * `stderr`: stderr pipe
    pub fn new<ARGS: IntoIterator<Item = I>, I: Into<String>>(
        program: impl Into<String>,
        args: ARGS,
        stdout: PipeWriter,
        stderr: PipeWriter,
    ) -> Child<Template> {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            stdout,
            stderr,
            pid: None,
            _p: PhantomData,
        }
    }

    /// Start the process under trace. The child requests `PTRACE_TRACEME`
    /// before exec, so its first stop is the exec trap; this function
    /// consumes that stop and applies [`TRACE_OPTIONS`]. On return the
    /// tracee is stopped at its entry point with ASLR disabled.
    pub fn install(self) -> Result<Child<Installed>, Error> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdout(self.stdout.try_clone()?)
            .stderr(self.stderr.try_clone()?);

        unsafe {
            cmd.pre_exec(move || {
                sys::personality::set(Persona::ADDR_NO_RANDOMIZE)
                    .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
                sys::ptrace::traceme().map_err(|e| io::Error::from_raw_os_error(e as i32))?;
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| Error::SpawnFailed(format!("{}: {e}", self.program)))?;
        let pid = Pid::from_raw(child.id() as i32);

        match waitpid(pid, Some(WaitPidFlag::WSTOPPED)).map_err(Error::Waitpid)? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
            WaitStatus::Exited(_, code) => {
                return Err(Error::SpawnFailed(format!(
                    "{} exited with {code} before exec",
                    self.program
                )));
            }
            status => {
                return Err(Error::SpawnFailed(format!(
                    "unexpected first stop {status:?} for {}",
                    self.program
                )));
            }
        }
        sys::ptrace::setoptions(pid, TRACE_OPTIONS).map_err(Error::Ptrace)?;

        debug!(target: "debugger", "spawned tracee {pid}: {}", self.program);

        Ok(Child {
            program: self.program,
            args: self.args,
            stdout: self.stdout,
            stderr: self.stderr,
            pid: Some(pid),
            _p: PhantomData,
        })
    }
}

impl Child<Installed> {
    /// Return running process pid.
    pub fn pid(&self) -> Pid {
        self.pid.expect("installed process always has a pid")
    }

    /// Return a program name.
    pub fn program(&self) -> &str {
        self.program.as_str()
    }
}

/// Attach to a running process and every thread it currently has. Each
/// thread becomes an independent tracee, stopped and configured with
/// [`TRACE_OPTIONS`]. Returns the attached thread ids, process leader
/// first.
pub(crate) fn attach_running(pid: Pid) -> Result<Vec<Pid>, Error> {
    let system = System::new_all();
    let known = system
        .process(sysinfo::Pid::from_u32(pid.as_raw() as u32))
        .ok_or(Error::NoSuchProcess(pid))?;
    debug!(target: "debugger", "attach to {pid} ({})", known.name());

    let mut tids = vec![pid];
    for tid in task_threads(pid)? {
        if tid != pid {
            tids.push(tid);
        }
    }

    let mut attached = Vec::with_capacity(tids.len());
    for tid in tids {
        match sys::ptrace::attach(tid) {
            Ok(()) => {}
            // the thread may have exited between the task listing and now
            Err(Errno::ESRCH) => {
                warn!(target: "debugger", "thread {tid} vanished before attach");
                continue;
            }
            Err(Errno::EPERM) => return Err(Error::AttachDenied(tid)),
            Err(e) => return Err(Error::Ptrace(e)),
        }
        waitpid(tid, Some(WaitPidFlag::WSTOPPED.union(WaitPidFlag::__WALL)))
            .map_err(Error::Waitpid)?;
        sys::ptrace::setoptions(tid, TRACE_OPTIONS).map_err(Error::Ptrace)?;
        attached.push(tid);
    }

    if attached.is_empty() {
        return Err(Error::NoSuchProcess(pid));
    }
    Ok(attached)
}

fn task_threads(pid: Pid) -> Result<Vec<Pid>, Error> {
    let dir = format!("/proc/{pid}/task");
    let entries = fs::read_dir(&dir).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::NoSuchProcess(pid)
        } else {
            Error::IO(e)
        }
    })?;

    let mut tids = vec![];
    for entry in entries {
        let entry = entry?;
        if let Ok(tid) = entry.file_name().to_string_lossy().parse::<libc::pid_t>() {
            tids.push(Pid::from_raw(tid));
        }
    }
    Ok(tids)
}
