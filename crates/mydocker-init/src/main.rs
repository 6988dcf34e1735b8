//! container-init — the init process inside the container namespaces.
//!
//! Invoked by the daemon as `container-init <cmd> [args…]` with the root
//! directory in `CONTAINER_ROOTFS`. Sets up the container environment
//! (private mounts, /proc, pivot_root) and execs the target command in
//! place, so the daemon's wait sees the command's own exit status.

use std::path::Path;
use std::process::ExitCode;

use mydocker_container::init;
use mydocker_container::spawn::ROOTFS_ENV;

fn main() -> ExitCode {
    let Some(rootfs) = std::env::var_os(ROOTFS_ENV) else {
        eprintln!("container-init: {ROOTFS_ENV} environment variable not set");
        return ExitCode::FAILURE;
    };

    let command: Vec<String> = std::env::args().skip(1).collect();
    if command.is_empty() {
        eprintln!("container-init: no command specified");
        eprintln!("usage: container-init <command> [args...]");
        return ExitCode::FAILURE;
    }

    // Only returns on failure; on success the process image is replaced.
    let err = match init::run(Path::new(&rootfs), &command) {
        Err(err) => err,
        Ok(never) => match never {},
    };
    eprintln!("container-init: {err}");
    ExitCode::FAILURE
}
