// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Provision and decommission FrankenPHP sites on a single host.
//!
//! A site is a filesystem root, an optional OS account, a database with its
//! own account, an optional WordPress install, and a Caddy site block. The
//! [`SiteManager`] sequences those pieces into one add or delete operation
//! and records the outcome in a JSON state file.
//!
//! Every effectful component honors a dry-run mode that logs what would
//! happen instead of doing it.

pub mod config;
pub mod database;
pub mod exec;
pub mod proxy;
pub mod site;
pub mod state;
pub mod user;
pub mod validate;
pub mod wordpress;

#[doc(inline)]
pub use config::Settings;

#[doc(inline)]
pub use site::{AddSite, SiteError, SiteManager};

#[doc(inline)]
pub use state::{App, SiteRecord};
