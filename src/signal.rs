// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Termination signals received by the launcher, and their delivery to the services

use std::future::pending;

use futures::future::{select_all, FutureExt};
use nix::sys::signal::{kill, killpg, Signal};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, warn};

use crate::procs::ServiceHandle;
use crate::Error;

/// Signals that are relayed to the services instead of ending the launcher
pub const FORWARDED: [Signal; 4] = [
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGHUP,
    Signal::SIGQUIT,
];

/// Listener for the forwarded signals.
///
/// An empty set never yields, which is what the orchestrator uses when forwarding is disabled.
pub struct Signals {
    listeners: Vec<(Signal, tokio::signal::unix::Signal)>,
}

impl Signals {
    /// Registers handlers for all of the `FORWARDED` signals
    pub fn listen() -> Result<Self, Error> {
        let mut listeners = Vec::with_capacity(FORWARDED.len());
        for sig in FORWARDED.iter().copied() {
            let listener = signal(SignalKind::from_raw(sig as i32))?;
            listeners.push((sig, listener));
        }

        Ok(Self { listeners })
    }

    pub fn disabled() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    /// Waits for the next forwarded signal
    pub async fn recv(&mut self) -> Signal {
        if self.listeners.is_empty() {
            return pending().await;
        }

        let waits = self.listeners.iter_mut().map(|(sig, listener)| {
            let sig = *sig;
            async move {
                match listener.recv().await {
                    Some(()) => sig,
                    // the driver is gone, nothing more will arrive on this one
                    None => pending().await,
                }
            }
            .boxed()
        });

        let (sig, _, _) = select_all(waits).await;
        sig
    }
}

/// Sends `sig` to `handle`, if it is still running.
///
/// Background services lead their own process group and the whole group is signaled. The
/// foreground service shares the launcher's group, so only its own pid is.
///
/// Returns true when the signal was delivered.
pub fn forward(handle: &ServiceHandle, sig: Signal) -> bool {
    let pid = match handle.pid() {
        Some(pid) if handle.is_alive() => pid,
        _ => return false,
    };

    let foreground = handle.spec().is_foreground();
    let sent = if foreground {
        kill(pid, sig)
    } else {
        killpg(pid, sig)
    };

    match sent {
        Ok(()) => {
            debug!(
                service = handle.name(),
                pid = pid.as_raw(),
                group = !foreground,
                signal = %sig,
                "forwarded signal"
            );
            true
        }
        Err(err) => {
            warn!(service = handle.name(), signal = %sig, error = %err, "could not forward signal");
            false
        }
    }
}

/// Best effort delivery of `sig` to every handle still running
pub fn forward_all<'a, I>(handles: I, sig: Signal)
where
    I: IntoIterator<Item = &'a ServiceHandle>,
{
    for handle in handles {
        forward(handle, sig);
    }
}

/// The exit code a shell reports for a process killed by `signal`
pub fn signal_exit_code(signal: i32) -> i32 {
    128 + signal
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use std::os::unix::process::ExitStatusExt;
    use std::path::Path;

    use tokio::time::timeout;

    use crate::fork::new_process;
    use crate::procs::{RunMode, ServiceSpec};

    #[test]
    fn test_signal_exit_code() {
        assert_eq!(signal_exit_code(Signal::SIGTERM as i32), 143);
        assert_eq!(signal_exit_code(Signal::SIGKILL as i32), 137);
    }

    #[tokio::test]
    async fn test_disabled_never_yields() {
        let mut signals = Signals::disabled();
        assert!(timeout(Duration::from_millis(50), signals.recv())
            .await
            .is_err());
    }

    #[test]
    fn test_forward_skips_unlaunched() {
        let handle = ServiceHandle::starting(Arc::new(ServiceSpec::new("web", "sh")));
        assert!(!forward(&handle, Signal::SIGTERM));
    }

    #[tokio::test]
    async fn test_forward_reaches_both_kinds_of_service() {
        for mode in [RunMode::Background, RunMode::Foreground].iter().copied() {
            let spec = Arc::new(
                ServiceSpec::new("sleeper", "sleep")
                    .with_arg("5")
                    .with_run_mode(mode),
            );
            let child = new_process(&spec, Path::new("/bin/sleep")).unwrap();
            let mut handle = ServiceHandle::starting(spec);
            handle.attach(child);

            // the foreground is not a group leader, a group kill would miss it
            assert!(forward(&handle, Signal::SIGTERM), "{:?}", mode);

            let status = timeout(
                Duration::from_secs(5),
                handle.child_mut().unwrap().wait(),
            )
            .await
            .unwrap()
            .unwrap();
            assert_eq!(status.signal(), Some(Signal::SIGTERM as i32), "{:?}", mode);
        }
    }
}
