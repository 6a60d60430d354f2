// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Instant;

use nix::unistd::Pid;
use tokio::process::Child;
use tracing::debug;

use crate::error::ErrorKind;
use crate::procs::ServiceSpec;
use crate::Error;

/// Lifecycle of a launched service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Starting,
    Running,
    Failed,
    Exited,
}

impl ServiceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Failed | ServiceState::Exited)
    }

    fn can_become(self, to: ServiceState) -> bool {
        use ServiceState::*;

        matches!(
            (self, to),
            (Starting, Running)
                | (Starting, Exited)
                | (Starting, Failed)
                | (Running, Exited)
                | (Running, Failed)
        )
    }
}

/// Runtime record for one launched service.
///
/// Only the orchestrator mutates a handle, and only on transitions it has observed.
#[derive(Debug)]
pub struct ServiceHandle {
    spec: Arc<ServiceSpec>,
    child: Option<Child>,
    pid: Option<Pid>,
    state: ServiceState,
    started_at: Instant,
    status: Option<ExitStatus>,
}

impl ServiceHandle {
    /// A handle for a service whose launch is being attempted
    pub fn starting(spec: Arc<ServiceSpec>) -> Self {
        Self {
            spec,
            child: None,
            pid: None,
            state: ServiceState::Starting,
            started_at: Instant::now(),
            status: None,
        }
    }

    pub(crate) fn attach(&mut self, child: Child) {
        // for background services this is the process group as well
        self.pid = child.id().map(|id| Pid::from_raw(id as libc::pid_t));
        self.child = Some(child);
    }

    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub(crate) fn shared_spec(&self) -> Arc<ServiceSpec> {
        Arc::clone(&self.spec)
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// The exit status, once the process has been observed to terminate
    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    pub(crate) fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }

    /// Move to `to`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, to: ServiceState) -> Result<(), Error> {
        if !self.state.can_become(to) {
            return Err(ErrorKind::InvalidTransition {
                name: self.name().to_string(),
                from: self.state,
                to,
            }
            .into());
        }

        debug!(service = self.name(), from = ?self.state, to = ?to, "state change");
        self.state = to;
        Ok(())
    }

    /// Record an observed exit, Exited on success and Failed otherwise
    pub(crate) fn exited(&mut self, status: ExitStatus) -> Result<(), Error> {
        self.status = Some(status);
        if status.success() {
            self.transition(ServiceState::Exited)
        } else {
            self.transition(ServiceState::Failed)
        }
    }

    /// Non-blocking check for a terminated process, recording the exit if there is one
    pub(crate) fn poll_exit(&mut self) -> Result<Option<ExitStatus>, Error> {
        if self.state.is_terminal() {
            return Ok(self.status);
        }

        let status = match self.child.as_mut() {
            Some(child) => child.try_wait()?,
            None => None,
        };

        if let Some(status) = status {
            self.exited(status)?;
        }

        Ok(status)
    }

    /// True while the process may still be alive and can receive signals
    pub fn is_alive(&self) -> bool {
        self.pid.is_some() && !self.state.is_terminal()
    }
}
