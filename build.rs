fn main() {
    if !cfg!(target_os = "linux") {
        panic!(
            "{} relies on ptrace and only builds for linux",
            env!("CARGO_PKG_NAME")
        );
    }
}
