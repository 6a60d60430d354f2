// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Ordered launcher for a fixed set of dependent services

pub mod config;
mod error;
pub mod fork;
pub mod orchestrator;
pub mod procs;
pub mod resolve;
pub mod signal;

pub use error::{Error, ErrorKind, STARTUP_FAILURE_EXIT_CODE};
pub use orchestrator::{start, Options, Orchestrator};
