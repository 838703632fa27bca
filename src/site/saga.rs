// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Compensating actions for site provisioning.
//!
//! The filesystem, the OS account database, the SQL server, and the proxy
//! configuration directory share no transaction coordinator. Adding a site
//! is therefore run as a __saga__: every step that changes the outside world
//! pushes an [`Undo`] entry describing how to reverse itself, and on failure
//! the log is unwound newest first.
//!
//! Unwinding is best effort. A compensating action that fails is recorded as
//! a [`StepFailure`] and unwinding carries on with the next entry, so one
//! stuck resource never prevents the others from being cleaned up.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};
use tracing::{debug, warn};

/// One reversible provisioning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Undo {
    /// Site root was created, or reused if `preexisting`.
    DirectoryCreated { path: PathBuf, preexisting: bool },

    /// OS account was created.
    UserCreated { username: String },

    /// Database and account were created, or already recorded if
    /// `preexisting`.
    DatabaseCreated {
        name: String,
        user: String,
        preexisting: bool,
    },

    /// Application files were installed into the site root.
    ///
    /// Nothing to reverse on its own: removing the site root removes them.
    ApplicationInstalled,

    /// Proxy configuration was written, or overwritten if `preexisting`.
    ProxyWritten { domain: String, preexisting: bool },
}

impl Undo {
    /// Short name of the step for diagnostics.
    pub fn step(&self) -> &'static str {
        match self {
            Self::DirectoryCreated { .. } => "directory",
            Self::UserCreated { .. } => "user",
            Self::DatabaseCreated { .. } => "database",
            Self::ApplicationInstalled => "application",
            Self::ProxyWritten { .. } => "proxy",
        }
    }
}

/// Something that knows how to reverse a provisioning step.
pub trait Compensate {
    /// Reverse one step.
    fn compensate(&self, undo: &Undo) -> Result<(), String>;
}

/// Ordered log of completed provisioning steps.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UndoLog {
    steps: Vec<Undo>,
}

impl UndoLog {
    /// Record a completed step.
    pub fn push(&mut self, undo: Undo) {
        debug!("step completed: {}", undo.step());
        self.steps.push(undo);
    }

    /// Whether no step has completed.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Reverse every recorded step, newest first.
    ///
    /// Returns the compensating actions that failed. An empty result means
    /// the rollback was complete.
    pub fn unwind(self, compensator: &impl Compensate) -> Vec<StepFailure> {
        let mut failures = Vec::new();
        for undo in self.steps.into_iter().rev() {
            debug!("rolling back step: {}", undo.step());
            if let Err(message) = compensator.compensate(&undo) {
                warn!("rollback step {} failed: {message}", undo.step());
                failures.push(StepFailure {
                    step: undo.step(),
                    message,
                });
            }
        }

        failures
    }
}

/// A step that could not be completed during rollback or teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// Short name of the step.
    pub step: &'static str,

    /// Rendered error chain.
    pub message: String,
}

impl Display for StepFailure {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{} ({})", self.step, self.message)
    }
}

/// Render failures as one comma separated line.
pub fn join_failures(failures: &[StepFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
