//! Helpers for spawning job command lines through the platform shell.

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[cfg(unix)]
const SHELL: (&str, &str) = ("sh", "-c");
#[cfg(windows)]
const SHELL: (&str, &str) = ("cmd", "/C");

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Program and leading arguments used to interpret a command line.
pub fn shell_program() -> (&'static str, &'static str) {
    SHELL
}

/// Build a `std::process::Command` that runs `command_line` in the platform shell.
pub fn std_shell_command(command_line: &str) -> std::process::Command {
    let (program, flag) = SHELL;
    let mut cmd = std::process::Command::new(program);
    cmd.arg(flag).arg(command_line);
    cmd.no_window();
    cmd
}

/// Build a `tokio::process::Command` that runs `command_line` in the platform shell.
///
/// The child is killed if the returned command's `Child` handle is dropped.
#[cfg(feature = "tokio")]
pub fn shell_command(command_line: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::from(std_shell_command(command_line));
    cmd.kill_on_drop(true);
    cmd
}
