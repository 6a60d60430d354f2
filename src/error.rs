// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::process::ExitStatus;

use nix::sys::signal::Signal;
use thiserror::Error;

use crate::procs::ServiceState;
use crate::signal::signal_exit_code;

/// Exit code used for every failure that happens while the services are being started.
pub const STARTUP_FAILURE_EXIT_CODE: i32 = 2;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("service {name}: command not found: {command}")]
    CommandNotFound { name: String, command: String },
    #[error("service {name} failed during startup: {status}")]
    ServiceStartupFailure { name: String, status: ExitStatus },
    #[error("service {name} could not be spawned: {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("service {name}: invalid state transition {from:?} -> {to:?}")]
    InvalidTransition {
        name: String,
        from: ServiceState,
        to: ServiceState,
    },
    #[error("startup interrupted by {0}")]
    Interrupted(Signal),
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    #[error("nix error: {0}")]
    NixError(#[from] nix::Error),
    #[error("config parse error: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("an error occured: {0}")]
    ErrorMsg(String),
    #[error("an error occured: {0}")]
    ErrorStr(&'static str),
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// The code the launcher should exit with when this error ends the run.
    pub fn exit_code(&self) -> i32 {
        match self.0 {
            ErrorKind::Interrupted(signal) => signal_exit_code(signal as i32),
            _ => STARTUP_FAILURE_EXIT_CODE,
        }
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<&'static str> for Error {
    fn from(err: &'static str) -> Self {
        Self::from_kind(ErrorKind::ErrorStr(err))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::from_kind(ErrorKind::ErrorMsg(err))
    }
}
