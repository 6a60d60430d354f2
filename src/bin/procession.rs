// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::Path;

use clap::{App, Arg, ArgMatches};
use tokio::runtime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use procession::config::{Config, CONFIG_ENV};
use procession::procs::RunMode;
use procession::{Error, Orchestrator};

const CONFIG: &str = "config";
const CHECK: &str = "check";

fn main() {
    let args = App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name(CONFIG)
                .short("c")
                .long(CONFIG)
                .value_name("FILE")
                .env(CONFIG_ENV)
                .takes_value(true)
                .help("TOML file listing the services to start, the built-in list is used otherwise"),
        )
        .arg(
            Arg::with_name(CHECK)
                .long(CHECK)
                .help("validate the configuration and resolve every command, without starting anything"),
        )
        .get_matches();

    init_logging();

    let runtime = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(error = %err, "failed to initialize Tokio Runtime");
            std::process::exit(procession::STARTUP_FAILURE_EXIT_CODE);
        }
    };

    let code = match runtime.block_on(run(&args)) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            err.exit_code()
        }
    };

    // background services are left to the process table, don't wait on them
    drop(runtime);
    std::process::exit(code);
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(concat!(env!("CARGO_PKG_NAME"), "=info")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: &ArgMatches<'_>) -> Result<i32, Error> {
    let config = match args.value_of_os(CONFIG) {
        Some(path) => {
            let path = Path::new(path);
            info!(config = %path.display(), "loading services");
            Config::load(path)?
        }
        None => Config::builtin()?,
    };

    let mut orchestrator = Orchestrator::new(config.services, config.options)?;

    if args.is_present(CHECK) {
        return check(&orchestrator);
    }

    orchestrator.start().await
}

fn check(orchestrator: &Orchestrator) -> Result<i32, Error> {
    let programs = orchestrator.resolve()?;

    for (idx, (spec, program)) in orchestrator.specs().zip(programs.iter()).enumerate() {
        let mode = spec.run_mode().unwrap_or(RunMode::Background);
        let args = spec.args().join(" ");
        println!(
            "{}. {} ({:?}): {} {}",
            idx + 1,
            spec.name(),
            mode,
            program.display(),
            args
        );
    }

    Ok(0)
}
