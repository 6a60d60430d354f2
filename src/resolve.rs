// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Command lookup, done for every service before anything is launched

use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::ErrorKind;
use crate::procs::ServiceSpec;
use crate::Error;

/// Finds the executable for `command`.
///
/// A command containing `/` is taken as a path, anything else is searched for in `path_var`
/// the same way `execvp` would.
pub fn resolve_command(command: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    if command.is_empty() {
        return None;
    }

    if command.contains('/') {
        let path = PathBuf::from(command);
        return if is_executable(&path) { Some(path) } else { None };
    }

    let path_var = path_var?;
    std::env::split_paths(path_var)
        .map(|dir| {
            // an empty entry means the current directory
            if dir.as_os_str().is_empty() {
                PathBuf::from(".").join(command)
            } else {
                dir.join(command)
            }
        })
        .find(|candidate| is_executable(candidate))
}

/// Resolves every spec against the current `PATH`, failing on the first that cannot be found
pub fn resolve_all(specs: &[ServiceSpec]) -> Result<Vec<PathBuf>, Error> {
    let path_var = std::env::var_os("PATH");

    specs
        .iter()
        .map(|spec| {
            resolve_command(spec.command(), path_var.as_deref()).ok_or_else(|| {
                Error::from(ErrorKind::CommandNotFound {
                    name: spec.name().to_string(),
                    command: spec.command().to_string(),
                })
            })
        })
        .collect()
}

fn is_executable(path: &Path) -> bool {
    match path.metadata() {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
