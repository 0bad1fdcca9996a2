use bintrace::CoverageSink;
use nix::unistd::Pid;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_BIN: AtomicU32 = AtomicU32::new(0);

/// A test target compiled on the fly; the directory is removed on drop.
pub struct TestBin {
    pub path: PathBuf,
    dir: PathBuf,
}

impl Drop for TestBin {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Compile a C source into a fresh temp directory and return the binary
/// path. Position-independent output is forced so that `nm` values are
/// module-relative offsets.
pub fn compile_c(tag: &str, source: &str) -> TestBin {
    let dir = std::env::temp_dir().join(format!(
        "bintrace-test-{tag}-{}-{}",
        std::process::id(),
        NEXT_BIN.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).expect("cannot create tempdir");
    let target = dir.join(tag);

    let cc = std::env::var("CC").unwrap_or_else(|_| String::from("cc"));
    let args = &[
        "-xc",
        "-",
        "-g",
        "-O0",
        "-Wall",
        "-fPIE",
        "-pie",
        "-o",
        target.to_str().unwrap(),
    ];
    let mut child = Command::new(cc)
        .args(args)
        .stdin(Stdio::piped())
        .spawn()
        .expect("cannot compile test program");
    {
        let stdin = child.stdin.as_mut().expect("cannot get child stdin");
        stdin
            .write_all(source.as_bytes())
            .expect("cannot write stdin");
    }
    assert!(child.wait().expect("compiler failed").success());

    TestBin { path: target, dir }
}

/// Module-relative offset of `symbol` in a position-independent binary,
/// parsed from `nm`.
pub fn symbol_offset(bin: &Path, symbol: &str) -> u64 {
    let out = Command::new("nm")
        .arg(bin)
        .output()
        .expect("cannot run nm on test binary");
    let stdout = String::from_utf8_lossy(&out.stdout);

    for line in stdout.lines() {
        let mut parts = line.split_whitespace();
        if let (Some(value), Some(_kind), Some(name)) = (parts.next(), parts.next(), parts.next()) {
            if name == symbol {
                return u64::from_str_radix(value, 16).expect("hex symbol value");
            }
        }
    }
    panic!("symbol {symbol} not found in {}", bin.display());
}

/// Coverage sink that appends every record to a shared list.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub records: Arc<Mutex<Vec<(i32, u16, u64)>>>,
}

impl CoverageSink for RecordingSink {
    fn record(&mut self, pid: Pid, module_id: u16, addr: u64) {
        self.records
            .lock()
            .unwrap()
            .push((pid.as_raw(), module_id, addr));
    }
}

#[macro_export]
macro_rules! assert_no_proc {
    ($pid:expr) => {
        let sys = sysinfo::System::new_all();
        assert!(sys
            .process(sysinfo::Pid::from_u32($pid.as_raw() as u32))
            .is_none())
    };
}
