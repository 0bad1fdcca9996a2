//! Remote memory I/O over ptrace peek/poke. Byte ranges of any length
//! and alignment are supported; the word granularity underneath is not
//! visible to callers.

use nix::errno::Errno;
use nix::sys;
use nix::unistd::Pid;
use std::ffi::c_long;
use std::fmt::{Display, Formatter};

use crate::debugger::error::Error;

const WORD: usize = std::mem::size_of::<c_long>();

fn mem_err(pid: Pid, addr: u64) -> impl Fn(nix::Error) -> Error {
    move |source| match source {
        Errno::ESRCH => Error::NoSuchProcess(pid),
        source => Error::MemoryFault { pid, addr, source },
    }
}

/// Read `len` bytes from the stopped tracee's address space.
pub(crate) fn read_bytes(pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(len);

    let mut done = 0;
    while done < len {
        let word_addr = addr + done as u64;
        let word = sys::ptrace::read(pid, word_addr as sys::ptrace::AddressType)
            .map_err(mem_err(pid, word_addr))?;
        let take = WORD.min(len - done);
        out.extend_from_slice(&word.to_ne_bytes()[..take]);
        done += take;
    }

    Ok(out)
}

/// Write a byte range into the stopped tracee's address space. A
/// trailing partial word is spliced over the tracee's current bytes so
/// neighbouring memory is left untouched.
pub(crate) fn write_bytes(pid: Pid, addr: u64, data: &[u8]) -> Result<(), Error> {
    let mut done = 0;
    while done < data.len() {
        let word_addr = addr + done as u64;
        let rest = data.len() - done;

        let word = if rest >= WORD {
            c_long::from_ne_bytes(data[done..done + WORD].try_into().expect("full word"))
        } else {
            let current = sys::ptrace::read(pid, word_addr as sys::ptrace::AddressType)
                .map_err(mem_err(pid, word_addr))?;
            let mut bytes = current.to_ne_bytes();
            bytes[..rest].copy_from_slice(&data[done..]);
            c_long::from_ne_bytes(bytes)
        };

        unsafe {
            sys::ptrace::write(
                pid,
                word_addr as sys::ptrace::AddressType,
                word as *mut libc::c_void,
            )
            .map_err(mem_err(pid, word_addr))?;
        }
        done += WORD.min(rest);
    }

    Ok(())
}

/// Read a NUL-terminated string, giving up after `max` bytes.
pub(crate) fn read_c_string(pid: Pid, addr: u64, max: usize) -> Result<String, Error> {
    let mut out = Vec::new();

    'words: while out.len() < max {
        let word_addr = addr + out.len() as u64;
        let word = sys::ptrace::read(pid, word_addr as sys::ptrace::AddressType)
            .map_err(mem_err(pid, word_addr))?;
        for b in word.to_ne_bytes() {
            if b == 0 {
                break 'words;
            }
            out.push(b);
            if out.len() == max {
                break 'words;
            }
        }
    }

    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// Address inside a tracee's address space. Carries no local-memory
/// semantics: it cannot be dereferenced, only used for remote I/O
/// against the stopped tracee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemotePointer {
    pid: Pid,
    addr: u64,
}

impl RemotePointer {
    pub fn new(pid: Pid, addr: u64) -> Self {
        Self { pid, addr }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn offset(&self, bytes: u64) -> Self {
        Self {
            pid: self.pid,
            addr: self.addr + bytes,
        }
    }

    pub fn read(&self, len: usize) -> Result<Vec<u8>, Error> {
        read_bytes(self.pid, self.addr, len)
    }

    pub fn write(&self, data: &[u8]) -> Result<(), Error> {
        write_bytes(self.pid, self.addr, data)
    }

    pub fn read_c_string(&self, max: usize) -> Result<String, Error> {
        read_c_string(self.pid, self.addr, max)
    }
}

impl Display for RemotePointer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}@{:#016x}", self.pid, self.addr))
    }
}
