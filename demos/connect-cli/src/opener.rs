//! Hands deep links to the platform URL handler.

use coin98_connect_core::ConnectError;
use std::process::Command;

pub fn open(link: &str) -> Result<(), ConnectError> {
    let mut command = platform_command(link)?;
    match command.spawn() {
        Ok(mut child) => {
            // The handler runs on its own; reap it off the async runtime.
            std::thread::spawn(move || {
                let _ = child.wait();
            });
            Ok(())
        }
        Err(e) => {
            tracing::debug!("link opener failed: {}", e);
            Err(ConnectError::Link(format!("failed to open link: {e}")))
        }
    }
}

#[cfg(target_os = "linux")]
fn platform_command(link: &str) -> Result<Command, ConnectError> {
    let mut command = Command::new("xdg-open");
    command.arg(link);
    Ok(command)
}

#[cfg(target_os = "macos")]
fn platform_command(link: &str) -> Result<Command, ConnectError> {
    let mut command = Command::new("open");
    command.arg(link);
    Ok(command)
}

#[cfg(target_os = "windows")]
fn platform_command(link: &str) -> Result<Command, ConnectError> {
    let mut command = Command::new("cmd");
    command.args(["/C", "start", "", link]);
    Ok(command)
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn platform_command(_link: &str) -> Result<Command, ConnectError> {
    Err(ConnectError::Link("unsupported platform for opening links".into()))
}
