use crate::assert_no_proc;
use crate::common::compile_c;
use bintrace::{
    Debugger, SyscallHook, SyscallTag, SyscallTraceData, SyscallVerdict, TargetDescription,
    TraceeView,
};
use serial_test::serial;
use std::cell::RefCell;
use std::rc::Rc;

const WRITER_APP: &str = r#"
#include <unistd.h>
int main(void) {
    write(1, "a", 1);
    write(1, "b", 1);
    write(1, "c", 1);
    return 0;
}
"#;

#[derive(Default)]
struct WriteRecorder {
    stdout_write: bool,
    events: Rc<RefCell<Vec<SyscallTag>>>,
}

impl SyscallHook for WriteRecorder {
    fn on_enter(&mut self, data: &mut SyscallTraceData, _tracee: &mut TraceeView<'_>) -> SyscallVerdict {
        self.stdout_write = data.arg(0) == 1;
        if self.stdout_write {
            self.events.borrow_mut().push(SyscallTag::Enter);
        }
        SyscallVerdict::Pass
    }

    fn on_exit(&mut self, _data: &mut SyscallTraceData, _tracee: &mut TraceeView<'_>) {
        // the fd argument register may hold the return value by exit
        // time, so the enter verdict is remembered instead
        if self.stdout_write {
            self.events.borrow_mut().push(SyscallTag::Exit);
            self.stdout_write = false;
        }
    }
}

#[test]
#[serial]
fn test_enter_exit_strict_alternation() {
    let bin = compile_c("writer", WRITER_APP);
    let module = bin.path.to_str().unwrap().to_string();

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    debugger.trace_syscalls(true);

    let events = Rc::new(RefCell::new(vec![]));
    debugger.add_syscall_hook(
        libc::SYS_write,
        Box::new(WriteRecorder {
            stdout_write: false,
            events: events.clone(),
        }),
    );

    let pid = debugger.spawn(&module, Vec::<String>::new()).unwrap();
    debugger.event_loop().unwrap();

    let events = events.borrow();
    assert_eq!(events.len(), 6);
    for (n, tag) in events.iter().enumerate() {
        let expected = if n % 2 == 0 {
            SyscallTag::Enter
        } else {
            SyscallTag::Exit
        };
        assert_eq!(*tag, expected, "event {n} breaks the alternation");
    }
    assert_no_proc!(pid);
}

const OPEN_SENTINEL_APP: &str = r#"
#include <fcntl.h>
#include <unistd.h>
int main(void) {
    int fd = openat(AT_FDCWD, "/no/such/trace-sentinel", O_RDONLY);
    if (fd < 0)
        return 1;
    close(fd);
    return 0;
}
"#;

/// Rewrites the sentinel path to /dev/null in place on enter, and keeps
/// the fd the kernel handed back on exit.
#[derive(Default)]
struct PathHijack {
    matched: bool,
    results: Rc<RefCell<Vec<i64>>>,
}

impl SyscallHook for PathHijack {
    fn on_enter(&mut self, data: &mut SyscallTraceData, tracee: &mut TraceeView<'_>) -> SyscallVerdict {
        let path_ptr = data.arg(1);
        let path = tracee.read_c_string(path_ptr, 256).unwrap_or_default();
        if path == "/no/such/trace-sentinel" {
            // the replacement is shorter, so it fits the tracee's buffer
            tracee.write_bytes(path_ptr, b"/dev/null\0").unwrap();
            self.matched = true;
        }
        SyscallVerdict::Pass
    }

    fn on_exit(&mut self, data: &mut SyscallTraceData, _tracee: &mut TraceeView<'_>) {
        if self.matched {
            self.results.borrow_mut().push(data.ret());
            self.matched = false;
        }
    }
}

#[test]
#[serial]
fn test_openat_path_hijack() {
    let bin = compile_c("hijack", OPEN_SENTINEL_APP);
    let module = bin.path.to_str().unwrap().to_string();

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    debugger.trace_syscalls(true);

    let results = Rc::new(RefCell::new(vec![]));
    debugger.add_syscall_hook(
        libc::SYS_openat,
        Box::new(PathHijack {
            matched: false,
            results: results.clone(),
        }),
    );

    let pid = debugger.spawn(&module, Vec::<String>::new()).unwrap();
    debugger.event_loop().unwrap();

    // without the rewrite the open fails with ENOENT; a hijacked call
    // returns a real fd to /dev/null
    let results = results.borrow();
    assert_eq!(results.len(), 1);
    assert!(results[0] >= 0, "hijacked openat returned {}", results[0]);
    assert_no_proc!(pid);
}

const UNLINK_APP: &str = r#"
#define _GNU_SOURCE
#include <unistd.h>
#include <fcntl.h>
#include <sys/syscall.h>
int main(int argc, char **argv) {
    if (argc < 2)
        return 2;
    return syscall(SYS_unlinkat, AT_FDCWD, argv[1], 0) == 0 ? 0 : 1;
}
"#;

/// Suppresses every unlink and records what the exit stop reports for
/// the cancelled call.
#[derive(Default)]
struct UnlinkJail {
    exits: Rc<RefCell<Vec<(i64, i64)>>>,
}

impl SyscallHook for UnlinkJail {
    fn on_enter(&mut self, _data: &mut SyscallTraceData, _tracee: &mut TraceeView<'_>) -> SyscallVerdict {
        SyscallVerdict::Suppress { ret: 0 }
    }

    fn on_exit(&mut self, data: &mut SyscallTraceData, _tracee: &mut TraceeView<'_>) {
        self.exits.borrow_mut().push((data.nr(), data.ret()));
    }
}

#[test]
#[serial]
fn test_suppressed_syscall_never_reaches_kernel() {
    let bin = compile_c("jail", UNLINK_APP);
    let module = bin.path.to_str().unwrap().to_string();

    let victim = std::env::temp_dir().join(format!("bintrace-jail-victim-{}", std::process::id()));
    std::fs::write(&victim, b"keep me").unwrap();

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    debugger.trace_syscalls(true);

    let exits = Rc::new(RefCell::new(vec![]));
    debugger.add_syscall_hook(
        libc::SYS_unlinkat,
        Box::new(UnlinkJail {
            exits: exits.clone(),
        }),
    );

    let pid = debugger
        .spawn(&module, [victim.to_str().unwrap()])
        .unwrap();
    debugger.event_loop().unwrap();

    // the kernel never saw the unlink, the file survived
    assert!(victim.exists());
    std::fs::remove_file(&victim).unwrap();

    // the cancelled call still reports its exit under its own id, with
    // the forced return value
    assert_eq!(*exits.borrow(), vec![(libc::SYS_unlinkat, 0)]);
    assert_no_proc!(pid);
}
