use crate::assert_no_proc;
use crate::common::{compile_c, symbol_offset, RecordingSink};
use bintrace::{Debugger, Decision, TargetDescription};
use serial_test::serial;
use std::cell::Cell;
use std::rc::Rc;

const HIT_LOOP_APP: &str = r#"
__attribute__((noinline)) void f(void) { __asm__ volatile(""); }
int main(void) {
    for (int i = 0; i < 10; i++) f();
    return 0;
}
"#;

#[test]
#[serial]
fn test_breakpoint_hit_counter() {
    let bin = compile_c("hitcount", HIT_LOOP_APP);
    let f_offset = symbol_offset(&bin.path, "f");
    let module = bin.path.to_str().unwrap().to_string();

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    let hits = Rc::new(Cell::new(0u32));
    let seen = hits.clone();
    debugger
        .add_breakpoint(
            module.clone(),
            f_offset,
            Box::new(move |_view| {
                seen.set(seen.get() + 1);
                Decision::Continue
            }),
            false,
        )
        .unwrap();

    let pid = debugger.spawn(&module, Vec::<String>::new()).unwrap();
    debugger.event_loop().unwrap();

    assert_eq!(hits.get(), 10);
    assert!(debugger.take_diagnostics().is_empty());
    assert_no_proc!(pid);
}

#[test]
#[serial]
fn test_single_shot_fires_once() {
    let bin = compile_c("oneshot", HIT_LOOP_APP);
    let f_offset = symbol_offset(&bin.path, "f");
    let module = bin.path.to_str().unwrap().to_string();

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    let hits = Rc::new(Cell::new(0u32));
    let seen = hits.clone();
    debugger
        .add_breakpoint(
            module.clone(),
            f_offset,
            Box::new(move |_view| {
                seen.set(seen.get() + 1);
                Decision::Continue
            }),
            true,
        )
        .unwrap();

    let pid = debugger.spawn(&module, Vec::<String>::new()).unwrap();
    debugger.event_loop().unwrap();

    // the loop runs f ten times, the trap fires once
    assert_eq!(hits.get(), 1);
    assert!(debugger.take_diagnostics().is_empty());
    assert_no_proc!(pid);
}

#[test]
#[serial]
fn test_handler_sees_rewound_pc() {
    let bin = compile_c("pcview", HIT_LOOP_APP);
    let f_offset = symbol_offset(&bin.path, "f");
    let module = bin.path.to_str().unwrap().to_string();

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    let pcs = Rc::new(Cell::new((0u64, true)));
    let seen = pcs.clone();
    debugger
        .add_breakpoint(
            module.clone(),
            f_offset,
            Box::new(move |view| {
                let (first, all_equal) = seen.get();
                let pc = view.pc();
                if first == 0 {
                    seen.set((pc, true));
                } else {
                    seen.set((first, all_equal && pc == first));
                }
                Decision::Continue
            }),
            false,
        )
        .unwrap();

    let pid = debugger.spawn(&module, Vec::<String>::new()).unwrap();
    debugger.event_loop().unwrap();

    // every hit reports the same address: the start of f, not
    // trap-length past it
    let (first, all_equal) = pcs.get();
    assert_ne!(first, 0);
    assert!(all_equal);
    assert_no_proc!(pid);
}

#[test]
fn test_duplicate_registration_rejected() {
    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    debugger
        .add_breakpoint("app", 0x1000, Box::new(|_| Decision::Continue), false)
        .unwrap();

    let dup = debugger.add_breakpoint("app", 0x1000, Box::new(|_| Decision::Continue), true);
    assert!(matches!(
        dup,
        Err(bintrace::Error::BreakpointExists { module, offset: 0x1000 }) if module == "app"
    ));
}

#[test]
#[serial]
fn test_shutdown_decision_ends_loop() {
    let bin = compile_c("shutdown", HIT_LOOP_APP);
    let f_offset = symbol_offset(&bin.path, "f");
    let module = bin.path.to_str().unwrap().to_string();

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    let hits = Rc::new(Cell::new(0u32));
    let seen = hits.clone();
    debugger
        .add_breakpoint(
            module.clone(),
            f_offset,
            Box::new(move |_view| {
                seen.set(seen.get() + 1);
                Decision::Shutdown
            }),
            false,
        )
        .unwrap();

    let pid = debugger.spawn(&module, Vec::<String>::new()).unwrap();
    debugger.event_loop().unwrap();

    // the loop returned after the first hit and released the tracee
    assert_eq!(hits.get(), 1);
    assert_eq!(debugger.tracee_count(), 0);

    // the detached child runs to completion on its own
    nix::sys::wait::waitpid(pid, None).unwrap();
}

const BLOCK_CHAIN_APP: &str = r#"
__attribute__((noinline)) void block_a(void) { __asm__ volatile(""); }
__attribute__((noinline)) void block_b(void) { __asm__ volatile(""); }
__attribute__((noinline)) void block_c(void) { __asm__ volatile(""); }
int main(void) {
    block_a();
    block_b();
    block_c();
    block_b();
    return 0;
}
"#;

#[test]
#[serial]
fn test_coverage_stream_in_execution_order() {
    let bin = compile_c("coverage", BLOCK_CHAIN_APP);
    let module = bin.path.to_str().unwrap().to_string();
    let a = symbol_offset(&bin.path, "block_a");
    let b = symbol_offset(&bin.path, "block_b");
    let c = symbol_offset(&bin.path, "block_c");

    let mut debugger = Debugger::new(TargetDescription::host()).unwrap();
    let sink = RecordingSink::default();
    debugger.set_coverage_sink(Box::new(sink.clone()));
    debugger
        .add_coverage_breakpoints(module.clone(), 7, [a, b, c])
        .unwrap();

    let pid = debugger.spawn(&module, Vec::<String>::new()).unwrap();
    debugger.event_loop().unwrap();

    let records = sink.records.lock().unwrap().clone();
    let expected: Vec<(i32, u16, u64)> = [a, b, c, b]
        .into_iter()
        .map(|offset| (pid.as_raw(), 7u16, offset))
        .collect();
    assert_eq!(records, expected);
    assert_no_proc!(pid);
}
