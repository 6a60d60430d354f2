// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Service definitions and the runtime records tracking them

mod handle;
pub mod probe;

pub use handle::{ServiceHandle, ServiceState};

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::procs::probe::ProbeKind;

/// Default time to wait for a background service before moving on.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_millis(1000);

/// How the orchestrator treats a launched service
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Launched and then only watched for early failure
    Background,
    /// Launched last, the orchestrator's own lifetime follows it
    Foreground,
}

/// The static definition of one service to launch.
///
/// A service without an explicit run mode takes it from its position in the list once the
/// orchestrator is built: foreground when last, background otherwise.
#[derive(Clone, Debug, PartialEq)]
pub struct ServiceSpec {
    name: String,
    command: String,
    args: Vec<String>,
    run_mode: Option<RunMode>,
    readiness_timeout: Duration,
    readiness: Option<ProbeKind>,
    env: BTreeMap<String, String>,
}

impl ServiceSpec {
    /// A service with the default readiness timeout, no probe and no explicit run mode
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            run_mode: None,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            readiness: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = Some(run_mode);
        self
    }

    pub fn foreground(self) -> Self {
        self.with_run_mode(RunMode::Foreground)
    }

    pub fn background(self) -> Self {
        self.with_run_mode(RunMode::Background)
    }

    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    pub fn with_readiness(mut self, probe: ProbeKind) -> Self {
        self.readiness = Some(probe);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The explicit run mode, `None` until the orchestrator assigns one by position
    pub fn run_mode(&self) -> Option<RunMode> {
        self.run_mode
    }

    pub fn is_foreground(&self) -> bool {
        self.run_mode == Some(RunMode::Foreground)
    }

    pub fn readiness_timeout(&self) -> Duration {
        self.readiness_timeout
    }

    pub fn readiness(&self) -> Option<&ProbeKind> {
        self.readiness.as_ref()
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// The command line as it would be typed in a shell, for diagnostics
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
