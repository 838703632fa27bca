// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! All OS-level effects that franken cannot perform through a library (user
//! management, proxy reloads, ownership changes) go through a
//! [`CommandRunner`]. The runner knows whether the current invocation is a
//! dry run, so callers never have to branch on it just to skip a process
//! spawn.

use std::{
    ffi::OsStr,
    process::{Command, ExitStatus, Output},
};
use tracing::{debug, info};

/// Layer of indirection for running external programs.
pub trait CommandRunner {
    /// Run program to completion, returning its combined output.
    ///
    /// In dry-run mode the program is not executed and an empty string is
    /// returned.
    fn run(&self, program: &str, args: &[&OsStr]) -> Result<String>;

    /// Run a read-only lookup and report whether it succeeded.
    ///
    /// Probes execute even in dry-run mode.
    fn probe(&self, program: &str, args: &[&OsStr]) -> bool;

    /// Whether mutating commands are being skipped.
    fn is_dry_run(&self) -> bool;
}

impl<R> CommandRunner for &R
where
    R: CommandRunner + ?Sized,
{
    fn run(&self, program: &str, args: &[&OsStr]) -> Result<String> {
        (**self).run(program, args)
    }

    fn probe(&self, program: &str, args: &[&OsStr]) -> bool {
        (**self).probe(program, args)
    }

    fn is_dry_run(&self) -> bool {
        (**self).is_dry_run()
    }
}

/// Run commands on the local system through [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner {
    dry_run: bool,
}

impl SystemRunner {
    /// Construct new system runner.
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&OsStr]) -> Result<String> {
        let command = render_command(program, args);
        if self.dry_run {
            info!("[dry-run] would run: {command}");
            return Ok(String::new());
        }

        debug!("run: {command}");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| ExecError::Spawn {
                command: command.clone(),
                source,
            })?;
        let message = collect_output(&output);
        if !output.status.success() {
            return Err(ExecError::Failed {
                command,
                status: output.status,
                output: message,
            });
        }

        Ok(message)
    }

    fn probe(&self, program: &str, args: &[&OsStr]) -> bool {
        debug!("probe: {}", render_command(program, args));
        Command::new(program)
            .args(args)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Label each non-empty output stream and join them line by line.
///
/// Trailing whitespace of every stream is dropped.
fn collect_output(output: &Output) -> String {
    [("stdout", &output.stdout), ("stderr", &output.stderr)]
        .into_iter()
        .filter(|(_, bytes)| !bytes.is_empty())
        .map(|(label, bytes)| format!("{label}: {}", String::from_utf8_lossy(bytes).trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render program and arguments as one line for logs and errors.
pub fn render_command(program: &str, args: &[&OsStr]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg.to_string_lossy().as_ref());
    }

    line
}

/// Command execution error types.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Program could not be started at all.
    #[error("failed to run {command:?}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Program ran but exited unsuccessfully.
    #[error("command {command:?} failed ({status}):\n{output}")]
    Failed {
        command: String,
        status: ExitStatus,
        output: String,
    },
}

/// Friendly result alias :3
pub type Result<T, E = ExecError> = std::result::Result<T, E>;
