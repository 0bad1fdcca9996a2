use crate::assert_no_proc;
use crate::common::{compile_c, symbol_offset};
use bintrace::{Debugger, Decision, TargetDescription};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serial_test::serial;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

const FORK_APP: &str = r#"
#include <unistd.h>
#include <sys/wait.h>
__attribute__((noinline)) void f(void) { __asm__ volatile(""); }
int main(void) {
    pid_t child = fork();
    f();
    if (child > 0) {
        int status;
        waitpid(child, &status, 0);
    }
    return 0;
}
"#;

#[test]
#[serial]
fn test_breakpoint_inherited_across_fork() {
    let bin = compile_c("forker", FORK_APP);
    let f_offset = symbol_offset(&bin.path, "f");
    let module = bin.path.to_str().unwrap().to_string();

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    debugger.follow_fork(true);

    let pids = Rc::new(RefCell::new(vec![]));
    let seen = pids.clone();
    debugger
        .add_breakpoint(
            module.clone(),
            f_offset,
            Box::new(move |view| {
                seen.borrow_mut().push(view.pid());
                Decision::Continue
            }),
            false,
        )
        .unwrap();

    let parent = debugger.spawn(&module, Vec::<String>::new()).unwrap();
    debugger.event_loop().unwrap();

    // one registration, one hit in each process
    let pids = pids.borrow();
    assert_eq!(pids.len(), 2, "hits: {pids:?}");
    assert!(pids.contains(&parent));
    assert_ne!(pids[0], pids[1]);
    assert_no_proc!(parent);
}

#[test]
#[serial]
fn test_fork_ignored_without_follow() {
    let bin = compile_c("forker-off", FORK_APP);
    let f_offset = symbol_offset(&bin.path, "f");
    let module = bin.path.to_str().unwrap().to_string();

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();

    let pids = Rc::new(RefCell::new(vec![]));
    let seen = pids.clone();
    debugger
        .add_breakpoint(
            module.clone(),
            f_offset,
            Box::new(move |view| {
                seen.borrow_mut().push(view.pid());
                Decision::Continue
            }),
            false,
        )
        .unwrap();

    let parent = debugger.spawn(&module, Vec::<String>::new()).unwrap();
    debugger.event_loop().unwrap();

    // only the parent is traced; the child executes the trap-free image
    // copy untraced... the trap bytes are copied too, but its SIGTRAP
    // has no tracer and the default action kills it, which the parent's
    // waitpid tolerates
    let pids = pids.borrow();
    assert_eq!(pids.as_slice(), [parent]);
    assert_no_proc!(parent);
}

const ENDLESS_CALLER_APP: &str = r#"
__attribute__((noinline)) void f(void) { __asm__ volatile(""); }
int main(void) {
    for (;;) f();
    return 0;
}
"#;

const HIT_LOOP_APP: &str = r#"
__attribute__((noinline)) void g(void) { __asm__ volatile(""); }
int main(void) {
    for (int i = 0; i < 10; i++) g();
    return 0;
}
"#;

#[test]
#[serial]
fn test_sigkill_between_hit_and_restoration() {
    let killer_bin = compile_c("killer", ENDLESS_CALLER_APP);
    let killer_module = killer_bin.path.to_str().unwrap().to_string();
    let loop_bin = compile_c("survivor", HIT_LOOP_APP);
    let loop_module = loop_bin.path.to_str().unwrap().to_string();

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();

    // first hit kills the tracee while its restoration step is pending
    let kill_hits = Rc::new(Cell::new(0u32));
    let seen = kill_hits.clone();
    debugger
        .add_breakpoint(
            killer_module.clone(),
            symbol_offset(&killer_bin.path, "f"),
            Box::new(move |view| {
                seen.set(seen.get() + 1);
                nix::sys::signal::kill(view.pid(), Signal::SIGKILL).unwrap();
                Decision::Continue
            }),
            false,
        )
        .unwrap();

    let survivor_hits = Rc::new(Cell::new(0u32));
    let seen = survivor_hits.clone();
    debugger
        .add_breakpoint(
            loop_module.clone(),
            symbol_offset(&loop_bin.path, "g"),
            Box::new(move |_view| {
                seen.set(seen.get() + 1);
                Decision::Continue
            }),
            false,
        )
        .unwrap();

    let killed = debugger.spawn(&killer_module, Vec::<String>::new()).unwrap();
    let survivor = debugger.spawn(&loop_module, Vec::<String>::new()).unwrap();

    debugger.event_loop().unwrap();

    // the killed tracee is torn down mid-flight, the other one runs to
    // completion
    assert_eq!(kill_hits.get(), 1);
    assert_eq!(survivor_hits.get(), 10);
    assert_eq!(debugger.tracee_count(), 0);
    assert_no_proc!(killed);
    assert_no_proc!(survivor);
}

#[test]
#[serial]
fn test_detach_releases_tracee() {
    let bin = compile_c("detachee", ENDLESS_CALLER_APP);
    let child = std::process::Command::new(&bin.path).spawn().unwrap();
    let pid = Pid::from_raw(child.id() as i32);

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    debugger.attach(pid).unwrap();
    assert_eq!(debugger.tracee_count(), 1);

    debugger.detach(pid).unwrap();
    assert_eq!(debugger.tracee_count(), 0);

    // the released process is alive and killable by normal means
    nix::sys::signal::kill(pid, Signal::SIGKILL).unwrap();
    nix::sys::wait::waitpid(pid, None).unwrap();
}

#[test]
#[serial]
fn test_kill_reaps_tracee() {
    let bin = compile_c("killee", ENDLESS_CALLER_APP);
    let child = std::process::Command::new(&bin.path).spawn().unwrap();
    let pid = Pid::from_raw(child.id() as i32);

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    debugger.attach(pid).unwrap();
    debugger.kill(pid).unwrap();

    assert_eq!(debugger.tracee_count(), 0);
    assert_no_proc!(pid);
}

#[test]
fn test_attach_to_missing_process() {
    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    // kernel threads aside, pid 1 exists but attach without privilege is
    // denied; a wild pid does not exist at all
    let wild = Pid::from_raw(i32::MAX - 1);
    assert!(matches!(
        debugger.attach(wild),
        Err(bintrace::Error::NoSuchProcess(p)) if p == wild
    ));
}

#[test]
fn test_spawn_of_missing_binary() {
    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    let res = debugger.spawn("/no/such/binary-anywhere", Vec::<String>::new());
    assert!(matches!(res, Err(bintrace::Error::SpawnFailed(_))));
}
