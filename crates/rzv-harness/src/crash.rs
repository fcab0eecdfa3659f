//! Attach a debugger when the harness panics (`-D`).

use std::panic;
use std::process::Command;
use tracing::warn;

/// The gdb invocation that attaches to `pid`.
#[must_use]
pub fn debugger_command(pid: u32) -> Command {
    let mut cmd = Command::new("gdb");
    cmd.args(["-ex", "set pagination 0", "-p", &pid.to_string()]);
    cmd
}

/// Chain a panic hook that runs the previous hook, then starts gdb on this
/// process and waits for it to exit. A gdb that cannot be started is
/// reported and otherwise ignored.
pub fn install_debugger_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        previous(info);
        let pid = std::process::id();
        eprintln!("attaching gdb to process {pid}");
        match debugger_command(pid).status() {
            Ok(status) if !status.success() => eprintln!("gdb exited with {status}"),
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "could not start gdb");
                eprintln!("could not start gdb: {err}");
            }
        }
    }));
}
