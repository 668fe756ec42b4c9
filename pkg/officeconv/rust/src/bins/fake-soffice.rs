// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Stand-in for the office engine, used by the e2e tests.
//!
//! Installed as `<office_home>/program/soffice.bin`. Its behaviour is read from
//! an optional `fake-soffice.json` next to that path:
//!
//! ```json
//! {"exit_code": 3, "first_exit_code": 81, "start_delay_ms": 0,
//!  "convert_fail": false, "convert_delay_ms": 0}
//! ```
//!
//! With `--accept=` it runs as a server and holds connections until killed.
//! With `--convert-to` it copies the input to `<outdir>/<stem>.<ext>`, prefixed
//! by one line naming the store filter.

use anyhow::{Context, Result, bail};
use log::{info, warn};
use serde::Deserialize;
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

const BEHAVIOUR_FILE: &str = "fake-soffice.json";
const INITIALIZED_MARKER: &str = ".fake-soffice-initialized";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Behaviour {
    exit_code: Option<i32>,
    first_exit_code: Option<i32>,
    start_delay_ms: u64,
    convert_fail: bool,
    convert_delay_ms: u64,
}

impl Behaviour {
    fn load(argv0: &str) -> Result<Self> {
        let Some(dir) = Path::new(argv0).parent() else {
            return Ok(Self::default());
        };
        let path = dir.join(BEHAVIOUR_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }
}

#[derive(Debug, Default)]
struct Invocation {
    accept: Option<String>,
    profile: Option<PathBuf>,
    convert_to: Option<String>,
    outdir: Option<PathBuf>,
    input: Option<PathBuf>,
}

impl Invocation {
    fn parse(mut args: impl Iterator<Item = String>) -> Self {
        let mut inv = Invocation::default();
        while let Some(arg) = args.next() {
            if let Some(accept) = arg.strip_prefix("--accept=") {
                inv.accept = Some(accept.to_string());
            } else if let Some(url) = arg.strip_prefix("-env:UserInstallation=") {
                inv.profile = Some(path_from_url(url));
            } else if arg == "--convert-to" {
                inv.convert_to = args.next();
            } else if arg == "--outdir" {
                inv.outdir = args.next().map(PathBuf::from);
            } else if !arg.starts_with('-') {
                inv.input = Some(PathBuf::from(arg));
            }
        }
        inv
    }
}

fn path_from_url(url: &str) -> PathBuf {
    let raw = url.strip_prefix("file://").unwrap_or(url).as_bytes();
    let mut bytes = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%'
            && let Some(hex) = raw.get(i + 1..i + 3)
            && let Ok(b) = u8::from_str_radix(&String::from_utf8_lossy(hex), 16)
        {
            bytes.push(b);
            i += 3;
            continue;
        }
        bytes.push(raw[i]);
        i += 1;
    }
    PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
}

fn serve(accept: &str, profile: Option<&Path>, behaviour: &Behaviour) -> Result<()> {
    if let Some(code) = behaviour.exit_code {
        warn!("exiting with configured code {code}");
        std::process::exit(code);
    }
    if let Some(profile) = profile {
        std::fs::create_dir_all(profile.join("user"))
            .with_context(|| format!("creating profile {}", profile.display()))?;
        let marker = profile.join(INITIALIZED_MARKER);
        if let Some(code) = behaviour.first_exit_code
            && !marker.exists()
        {
            std::fs::write(&marker, b"")?;
            info!("initialised new profile, exiting with {code}");
            std::process::exit(code);
        }
    }
    thread::sleep(Duration::from_millis(behaviour.start_delay_ms));

    let connection = accept.split(';').next().unwrap_or_default();
    let kind = connection.split(',').next().unwrap_or_default();
    let param = |key: &str| {
        connection
            .split(',')
            .filter_map(|p| p.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    };

    match kind {
        "socket" => {
            let host = param("host").unwrap_or_else(|| "127.0.0.1".to_string());
            let port = param("port").context("socket endpoint without port")?;
            let listener = TcpListener::bind(format!("{host}:{port}"))
                .with_context(|| format!("binding {host}:{port}"))?;
            info!("listening on {host}:{port}");
            let mut held = Vec::new();
            for stream in listener.incoming() {
                held.push(stream?);
            }
        }
        "pipe" => {
            let name = param("name").context("pipe endpoint without name")?;
            let path = format!("/tmp/OSL_PIPE_{}_{name}", nix::unistd::getuid());
            let _ = std::fs::remove_file(&path);
            let listener = UnixListener::bind(&path).with_context(|| format!("binding {path}"))?;
            info!("listening on {path}");
            let mut held = Vec::new();
            for stream in listener.incoming() {
                held.push(stream?);
            }
        }
        other => bail!("unsupported connection type: {other}"),
    }
    Ok(())
}

fn convert(inv: &Invocation, behaviour: &Behaviour) -> Result<()> {
    thread::sleep(Duration::from_millis(behaviour.convert_delay_ms));
    if behaviour.convert_fail {
        bail!("conversion failed");
    }
    let convert_to = inv.convert_to.as_deref().unwrap_or_default();
    let (ext, filter) = convert_to.split_once(':').unwrap_or((convert_to, ""));
    let filter = filter.split(':').next().unwrap_or_default();
    let input = inv.input.as_ref().context("no input document")?;
    let outdir = inv.outdir.as_ref().context("no --outdir")?;
    let stem = input.file_stem().context("input has no file name")?;

    let mut output = format!("{filter}\n").into_bytes();
    output.extend(std::fs::read(input).with_context(|| format!("reading {}", input.display()))?);
    let target = outdir.join(stem).with_extension(ext);
    std::fs::write(&target, output).with_context(|| format!("writing {}", target.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    simple_logger::init_with_level(log::Level::Info)?;
    let mut args = std::env::args();
    let argv0 = args.next().unwrap_or_default();
    let behaviour = Behaviour::load(&argv0)?;
    let inv = Invocation::parse(args);

    match inv.accept {
        Some(ref accept) => serve(accept, inv.profile.as_deref(), &behaviour),
        None if inv.convert_to.is_some() => convert(&inv, &behaviour),
        None => bail!("expected --accept or --convert-to"),
    }
}
