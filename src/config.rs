// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Service list configuration.
//!
//! The list is either compiled in (see [`Config::builtin`]) or read from a TOML file:
//!
//! ```toml
//! [orchestrator]
//! kill_timeout_ms = 10000
//!
//! [[service]]
//! name = "worker"
//! command = "celery"
//! args = ["-A", "${CELERY_APP:-app.celery}", "worker", "--loglevel=INFO"]
//! readiness_timeout_ms = 2000
//! readiness = { file = "/tmp/worker.ready" }
//!
//! [[service]]
//! name = "web"
//! command = "flask"
//! args = ["run", "--host=${FLASK_RUN_HOST:-0.0.0.0}", "--port", "${FLASK_RUN_PORT:-5000}"]
//! ```
//!
//! `command`, `args` and `env` values may reference the launcher's environment with `$VAR`,
//! `${VAR}` or `${VAR:-default}`, `$$` is a literal `$`. Referencing an unset variable without a
//! default is an error.

use std::collections::BTreeMap;
use std::env::VarError;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ErrorKind;
use crate::orchestrator::Options;
use crate::procs::probe::ProbeKind;
use crate::procs::{RunMode, ServiceSpec, DEFAULT_READINESS_TIMEOUT};
use crate::Error;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "PROCESSION_CONFIG";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    orchestrator: RawOrchestrator,
    #[serde(default)]
    service: Vec<RawService>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOrchestrator {
    kill_timeout_ms: Option<u64>,
    #[serde(default)]
    stop_background_on_exit: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    name: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    mode: Option<RunMode>,
    readiness_timeout_ms: Option<u64>,
    readiness: Option<ProbeKind>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

/// A fully expanded service list with the orchestrator options that go with it
#[derive(Debug)]
pub struct Config {
    pub services: Vec<ServiceSpec>,
    pub options: Options,
}

impl Config {
    /// The services the original entrypoint ran: celery worker and beat, then the flask app.
    pub fn builtin() -> Result<Self, Error> {
        Self::from_toml_with(BUILTIN, env_lookup)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("could not read {}: {}", path.display(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, Error> {
        Self::from_toml_with(content, env_lookup)
    }

    /// Parses `content`, expanding variables through `lookup`
    pub fn from_toml_with<F>(content: &str, lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw: RawConfig = toml::from_str(content)?;

        let services = raw
            .service
            .into_iter()
            .map(|service| build_spec(service, &lookup))
            .collect::<Result<Vec<_>, Error>>()?;

        let options = Options {
            kill_timeout: raw.orchestrator.kill_timeout_ms.map(Duration::from_millis),
            stop_background_on_exit: raw.orchestrator.stop_background_on_exit,
            ..Options::default()
        };

        Ok(Config { services, options })
    }
}

fn build_spec<F>(raw: RawService, lookup: &F) -> Result<ServiceSpec, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let command = expand(&raw.command, lookup)?;
    let args = raw
        .args
        .iter()
        .map(|arg| expand(arg, lookup))
        .collect::<Result<Vec<_>, Error>>()?;

    // without a mode the orchestrator picks one from the position in the list
    let mut spec = ServiceSpec::new(raw.name, command)
        .with_args(args)
        .with_readiness_timeout(
            raw.readiness_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_READINESS_TIMEOUT),
        );

    if let Some(mode) = raw.mode {
        spec = spec.with_run_mode(mode);
    }

    if let Some(probe) = raw.readiness {
        spec = spec.with_readiness(probe);
    }

    for (key, value) in raw.env.iter() {
        spec = spec.with_env(key.as_str(), expand(value, lookup)?);
    }

    Ok(spec)
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Expands `$VAR`, `${VAR}` and `${VAR:-default}` references in `value`
pub fn expand<F>(value: &str, lookup: &F) -> Result<String, Error>
where
    F: Fn(&str) -> Option<String>,
{
    shellexpand::env_with_context(value, |name| {
        lookup(name).map(Some).ok_or(VarError::NotPresent)
    })
    .map(|expanded| expanded.into_owned())
    .map_err(|err| {
        ErrorKind::InvalidConfig(format!("environment variable {} is not set", err.var_name))
            .into()
    })
}

const BUILTIN: &str = r#"
[[service]]
name = "worker"
command = "celery"
args = ["-A", "${CELERY_APP:-app.celery}", "worker", "--loglevel=${CELERY_LOGLEVEL:-INFO}"]

[[service]]
name = "beat"
command = "celery"
args = ["-A", "${CELERY_APP:-app.celery}", "beat", "--loglevel=${CELERY_LOGLEVEL:-INFO}"]

[[service]]
name = "web"
command = "flask"
args = ["run", "--host=${FLASK_RUN_HOST:-0.0.0.0}", "--port", "${FLASK_RUN_PORT:-5000}"]
"#;
