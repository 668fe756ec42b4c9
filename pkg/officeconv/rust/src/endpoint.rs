// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;
use std::path::PathBuf;

/// Where an engine instance accepts connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Socket { host: String, port: u16 },
    Pipe { name: String },
}

impl Endpoint {
    pub fn socket(host: impl Into<String>, port: u16) -> Self {
        Endpoint::Socket {
            host: host.into(),
            port,
        }
    }

    pub fn pipe(name: impl Into<String>) -> Self {
        Endpoint::Pipe { name: name.into() }
    }

    /// Connection part of the engine's `--accept` argument.
    pub fn connect_string(&self) -> String {
        match self {
            Endpoint::Socket { host, port } => {
                format!("socket,host={host},port={port},tcpNoDelay=1")
            }
            Endpoint::Pipe { name } => format!("pipe,name={name}"),
        }
    }

    pub fn accept_string(&self) -> String {
        format!("{};urp;StarOffice.ServiceManager", self.connect_string())
    }

    /// Name of the per-instance profile directory. Distinct endpoints always
    /// get distinct names: bytes outside `[A-Za-z0-9.-]` are hex-escaped as
    /// `_XX`, so `_` only ever appears as a separator or an escape.
    pub fn profile_dir_name(&self) -> String {
        match self {
            Endpoint::Socket { host, port } => {
                format!(".officeconv_socket_{}_{port}", escape_name(host))
            }
            Endpoint::Pipe { name } => format!(".officeconv_pipe_{}", escape_name(name)),
        }
    }

    /// Filesystem path of the engine's named pipe (OSL pipe naming).
    #[cfg(unix)]
    pub fn pipe_path(&self) -> Option<PathBuf> {
        match self {
            Endpoint::Pipe { name } => {
                let uid = nix::unistd::getuid();
                Some(PathBuf::from(format!("/tmp/OSL_PIPE_{uid}_{name}")))
            }
            Endpoint::Socket { .. } => None,
        }
    }

    /// Parse the connection part of an `--accept` argument.
    pub fn from_accept_string(accept: &str) -> Option<Self> {
        let connection = accept.split(';').next()?;
        let mut parts = connection.split(',');
        let kind = parts.next()?;
        let mut host = None;
        let mut port = None;
        let mut name = None;
        for part in parts {
            match part.split_once('=') {
                Some(("host", v)) => host = Some(v.to_string()),
                Some(("port", v)) => port = v.parse().ok(),
                Some(("name", v)) => name = Some(v.to_string()),
                _ => {}
            }
        }
        match kind {
            "socket" => Some(Endpoint::Socket {
                host: host.unwrap_or_else(|| "127.0.0.1".to_string()),
                port: port?,
            }),
            "pipe" => Some(Endpoint::Pipe { name: name? }),
            _ => None,
        }
    }
}

fn escape_name(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || b == b'.' || b == b'-' {
            escaped.push(char::from(b));
        } else {
            escaped.push_str(&format!("_{b:02X}"));
        }
    }
    escaped
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Socket { host, port } => write!(f, "socket host={host} port={port}"),
            Endpoint::Pipe { name } => write!(f, "pipe name={name}"),
        }
    }
}
