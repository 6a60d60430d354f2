// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Ordered startup of the configured services.
//!
//! Every service but the last is started in the background and given until its readiness
//! timeout to either report ready or die. The last one is started in the foreground, and its
//! exit code becomes the launcher's.

use std::collections::HashSet;
use std::future::pending;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::fork::new_process;
use crate::procs::{RunMode, ServiceHandle, ServiceSpec, ServiceState};
use crate::resolve::resolve_all;
use crate::signal::{forward, forward_all, signal_exit_code, Signals};
use crate::Error;

/// Knobs that apply to the whole run rather than to one service
#[derive(Clone, Debug, PartialEq)]
pub struct Options {
    /// Relay SIGTERM, SIGINT, SIGHUP and SIGQUIT to the services
    pub forward_signals: bool,
    /// SIGKILL the foreground service if it outlives a forwarded signal by this long
    pub kill_timeout: Option<Duration>,
    /// SIGTERM the background services once the foreground one has exited
    pub stop_background_on_exit: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            forward_signals: true,
            kill_timeout: None,
            stop_background_on_exit: false,
        }
    }
}

enum Startup {
    Ready,
    TimedOut,
    Exited(io::Result<ExitStatus>),
    Interrupted(Signal),
}

enum Foreground {
    Exited(io::Result<ExitStatus>),
    Signaled(Signal),
    KillTimeout,
}

/// Starts a fixed list of services in order and follows the last one.
#[derive(Debug)]
pub struct Orchestrator {
    specs: Vec<Arc<ServiceSpec>>,
    handles: Vec<ServiceHandle>,
    options: Options,
}

impl Orchestrator {
    /// Validates `specs`, nothing is resolved or launched yet.
    ///
    /// Services without an explicit run mode get one from their position: the last one runs
    /// in the foreground, every other one in the background.
    pub fn new(specs: Vec<ServiceSpec>, options: Options) -> Result<Self, Error> {
        let specs = validate(specs)?;

        Ok(Self {
            specs: specs.into_iter().map(Arc::new).collect(),
            handles: Vec::new(),
            options,
        })
    }

    pub fn specs(&self) -> impl Iterator<Item = &ServiceSpec> {
        self.specs.iter().map(|spec| &**spec)
    }

    /// Handles of the services launched so far, in launch order
    pub fn handles(&self) -> &[ServiceHandle] {
        &self.handles
    }

    /// Resolves every command without launching anything
    pub fn resolve(&self) -> Result<Vec<PathBuf>, Error> {
        let specs = self.specs().cloned().collect::<Vec<_>>();
        resolve_all(&specs)
    }

    /// Runs the whole sequence, returning the foreground service's exit code.
    ///
    /// Background services that are still running when this returns are left running unless
    /// `stop_background_on_exit` is set.
    pub async fn start(&mut self) -> Result<i32, Error> {
        if !self.handles.is_empty() {
            return Err("services were already started".into());
        }

        let mut signals = if self.options.forward_signals {
            Signals::listen()?
        } else {
            Signals::disabled()
        };

        // nothing is launched unless every command can be found
        let programs = self.resolve()?;
        let specs = self.specs.clone();
        let last = specs.len() - 1;

        for (spec, program) in specs.iter().zip(programs.iter()).take(last) {
            self.check_background()?;
            self.launch(spec, program)?;
            self.await_readiness(&mut signals).await?;
        }

        self.check_background()?;
        self.launch(&specs[last], &programs[last])?;
        let code = self.await_foreground(&mut signals).await?;

        if self.options.stop_background_on_exit {
            self.signal_background(Signal::SIGTERM);
        }

        Ok(code)
    }

    fn launch(&mut self, spec: &Arc<ServiceSpec>, program: &Path) -> Result<(), Error> {
        self.handles.push(ServiceHandle::starting(Arc::clone(spec)));
        let handle = self
            .handles
            .last_mut()
            .ok_or("no handle for the service being launched")?;

        match new_process(spec, program) {
            Ok(child) => {
                handle.attach(child);
                Ok(())
            }
            Err(err) => {
                handle.transition(ServiceState::Failed)?;
                Err(err)
            }
        }
    }

    /// Fails if a background service already launched has died with a failure status
    fn check_background(&mut self) -> Result<(), Error> {
        for handle in self.handles.iter_mut() {
            if handle.spec().is_foreground() {
                continue;
            }

            if let Some(status) = handle.poll_exit()? {
                if !status.success() {
                    warn!(service = handle.name(), %status, "background service died");
                    return Err(ErrorKind::ServiceStartupFailure {
                        name: handle.name().to_string(),
                        status,
                    }
                    .into());
                }
            }
        }

        Ok(())
    }

    async fn await_readiness(&mut self, signals: &mut Signals) -> Result<(), Error> {
        let handle = self
            .handles
            .last_mut()
            .ok_or("no background service to wait on")?;
        let spec = handle.shared_spec();
        let probe = spec.readiness().cloned().map(|kind| kind.into_probe());
        let child = handle
            .child_mut()
            .ok_or("background service has no process")?;

        let outcome = {
            let ready = async {
                match &probe {
                    Some(probe) => probe.wait_ready().await,
                    None => pending().await,
                }
            };

            tokio::select! {
                status = child.wait() => Startup::Exited(status),
                () = ready => Startup::Ready,
                () = sleep(spec.readiness_timeout()) => Startup::TimedOut,
                sig = signals.recv() => Startup::Interrupted(sig),
            }
        };

        match outcome {
            Startup::Ready => {
                info!(service = spec.name(), "service is ready");
                handle.transition(ServiceState::Running)
            }
            Startup::TimedOut => {
                match &probe {
                    Some(probe) => warn!(
                        service = spec.name(),
                        probe = %probe.describe(),
                        timeout = ?spec.readiness_timeout(),
                        "service not ready before timeout, continuing"
                    ),
                    None => debug!(service = spec.name(), "grace period elapsed"),
                }
                handle.transition(ServiceState::Running)
            }
            Startup::Exited(status) => {
                let status = status?;
                handle.exited(status)?;

                if status.success() {
                    info!(service = spec.name(), "service exited cleanly during startup");
                    Ok(())
                } else {
                    warn!(service = spec.name(), %status, "service failed during startup");
                    Err(ErrorKind::ServiceStartupFailure {
                        name: spec.name().to_string(),
                        status,
                    }
                    .into())
                }
            }
            Startup::Interrupted(sig) => {
                warn!(signal = %sig, "interrupted during startup");
                forward_all(self.handles.iter(), sig);
                Err(ErrorKind::Interrupted(sig).into())
            }
        }
    }

    async fn await_foreground(&mut self, signals: &mut Signals) -> Result<i32, Error> {
        let fg = self.handles.len() - 1;
        let mut kill_deadline: Option<Pin<Box<Sleep>>> = None;

        loop {
            let outcome = {
                let child = self.handles[fg]
                    .child_mut()
                    .ok_or("foreground service has no process")?;

                let kill_wait = async {
                    match kill_deadline.as_mut() {
                        Some(deadline) => deadline.await,
                        None => pending().await,
                    }
                };

                tokio::select! {
                    status = child.wait() => Foreground::Exited(status),
                    sig = signals.recv() => Foreground::Signaled(sig),
                    () = kill_wait => Foreground::KillTimeout,
                }
            };

            match outcome {
                Foreground::Exited(status) => {
                    let status = status?;
                    let handle = &mut self.handles[fg];
                    handle.exited(status)?;

                    let code = exit_code(status);
                    info!(service = handle.name(), %status, code, "foreground service exited");
                    return Ok(code);
                }
                Foreground::Signaled(sig) => {
                    info!(signal = %sig, "forwarding signal");
                    forward(&self.handles[fg], sig);
                    self.signal_background(sig);

                    if kill_deadline.is_none() {
                        kill_deadline = self.options.kill_timeout.map(|t| Box::pin(sleep(t)));
                    }
                }
                Foreground::KillTimeout => {
                    warn!(service = self.handles[fg].name(), "still running, sending SIGKILL");
                    forward(&self.handles[fg], Signal::SIGKILL);
                    kill_deadline = None;
                }
            }
        }
    }

    /// Best effort delivery of `sig` to the background services that are still alive
    fn signal_background(&mut self, sig: Signal) {
        for handle in self.handles.iter_mut() {
            if handle.spec().is_foreground() {
                continue;
            }

            // skip anything that has already exited
            if let Err(err) = handle.poll_exit() {
                warn!(service = handle.name(), error = %err, "could not check service");
            }
            forward(handle, sig);
        }
    }
}

/// Starts `specs` with the default options, see [`Orchestrator::start`]
pub async fn start(specs: Vec<ServiceSpec>) -> Result<i32, Error> {
    Orchestrator::new(specs, Options::default())?.start().await
}

/// The code to relay for `status`, following the shell convention for signals
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => signal_exit_code(signal),
        (None, None) => 1,
    }
}

fn validate(specs: Vec<ServiceSpec>) -> Result<Vec<ServiceSpec>, Error> {
    if specs.is_empty() {
        return Err(ErrorKind::InvalidConfig("no services configured".to_string()).into());
    }

    let mut names = HashSet::new();
    let last = specs.len() - 1;
    for (idx, spec) in specs.iter().enumerate() {
        if spec.name().is_empty() {
            return Err(ErrorKind::InvalidConfig(format!("service {} has no name", idx)).into());
        }
        if !names.insert(spec.name()) {
            return Err(
                ErrorKind::InvalidConfig(format!("duplicate service name: {}", spec.name())).into(),
            );
        }
        if spec.command().is_empty() {
            return Err(
                ErrorKind::InvalidConfig(format!("service {} has no command", spec.name())).into(),
            );
        }

        match (idx == last, spec.run_mode()) {
            (false, Some(RunMode::Foreground)) => {
                return Err(ErrorKind::InvalidConfig(format!(
                    "service {} is foreground but is not the last service",
                    spec.name()
                ))
                .into())
            }
            (true, Some(RunMode::Background)) => {
                return Err(ErrorKind::InvalidConfig(format!(
                    "the last service, {}, must run in the foreground",
                    spec.name()
                ))
                .into())
            }
            _ => (),
        }
    }

    Ok(specs
        .into_iter()
        .enumerate()
        .map(|(idx, spec)| match spec.run_mode() {
            Some(_) => spec,
            None if idx == last => spec.foreground(),
            None => spec.background(),
        })
        .collect())
}
