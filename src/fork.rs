// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::Path;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use crate::error::ErrorKind;
use crate::procs::{RunMode, ServiceSpec};
use crate::Error;

pub struct StdIoConf {
    pub stdin: Stdio,
    pub stderr: Stdio,
    pub stdout: Stdio,
}

impl StdIoConf {
    /// Services write straight to the launcher's output, only the foreground may read input
    pub fn for_mode(mode: RunMode) -> Self {
        StdIoConf {
            stdin: match mode {
                RunMode::Foreground => Stdio::inherit(),
                RunMode::Background => Stdio::null(),
            },
            stderr: Stdio::inherit(),
            stdout: Stdio::inherit(),
        }
    }
}

/// Launch `spec` from the already resolved `program`.
///
/// The child inherits the launcher's environment plus the spec's own variables. Background
/// services lead a new process group so that signals can be forwarded to everything they start
/// and terminal signals do not reach them directly. The foreground service stays in the
/// launcher's group, it may need to read from the controlling terminal.
pub fn new_process(spec: &ServiceSpec, program: &Path) -> Result<Child, Error> {
    let mode = spec.run_mode().unwrap_or(RunMode::Background);
    let stdio = StdIoConf::for_mode(mode);

    let mut command = Command::new(program);
    command
        .args(spec.args())
        .envs(spec.env())
        .kill_on_drop(false)
        .stdin(stdio.stdin)
        .stdout(stdio.stdout)
        .stderr(stdio.stderr);

    if mode == RunMode::Background {
        command.process_group(0);
    }

    let child = command.spawn().map_err(|source| ErrorKind::SpawnFailed {
        name: spec.name().to_string(),
        source,
    })?;

    info!(
        service = spec.name(),
        pid = child.id(),
        mode = ?mode,
        command = %spec.display_command(),
        "started service"
    );

    Ok(child)
}
