// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Readiness probes for background services.
//!
//! None of the wrapped tools speak a readiness protocol, so a probe only looks at
//! something externally observable: a port accepting connections or a marker file.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::time::sleep;

/// How often a probe is retried while waiting
pub const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// A check that a service is ready to serve
#[async_trait]
pub trait Readiness: Send + Sync {
    /// Human readable description, used in logs
    fn describe(&self) -> String;

    /// One attempt, true once the service is ready
    async fn is_ready(&self) -> bool;

    /// Resolves once the probe succeeds, never resolves otherwise
    async fn wait_ready(&self) {
        while !self.is_ready().await {
            sleep(PROBE_INTERVAL).await;
        }
    }
}

/// The probes a service may be configured with
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// `host:port` that accepts a TCP connection once ready
    Tcp(String),
    /// A file the service writes once ready
    File(PathBuf),
}

impl ProbeKind {
    pub fn into_probe(self) -> Box<dyn Readiness> {
        match self {
            ProbeKind::Tcp(addr) => Box::new(TcpProbe { addr }),
            ProbeKind::File(path) => Box::new(FileProbe { path }),
        }
    }
}

#[derive(Debug)]
pub struct TcpProbe {
    addr: String,
}

#[async_trait]
impl Readiness for TcpProbe {
    fn describe(&self) -> String {
        format!("tcp {}", self.addr)
    }

    async fn is_ready(&self) -> bool {
        TcpStream::connect(self.addr.as_str()).await.is_ok()
    }
}

#[derive(Debug)]
pub struct FileProbe {
    path: PathBuf,
}

#[async_trait]
impl Readiness for FileProbe {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    async fn is_ready(&self) -> bool {
        tokio::fs::metadata(&self.path).await.is_ok()
    }
}
