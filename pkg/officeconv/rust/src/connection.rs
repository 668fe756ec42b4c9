// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::endpoint::Endpoint;
use log::debug;
use nix::sys::socket::{MsgFlags, recv};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::{TcpStream, UnixStream};
use tokio::time::timeout;

#[derive(Debug)]
enum Session {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Session {
    fn raw_fd(&self) -> RawFd {
        match self {
            Session::Tcp(s) => s.as_raw_fd(),
            Session::Unix(s) => s.as_raw_fd(),
        }
    }

    /// Look at pending bytes without taking them off the stream.
    fn try_peek(&self, buf: &mut [u8]) -> io::Result<usize> {
        recv(
            self.raw_fd(),
            buf,
            MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT,
        )
        .map_err(io::Error::from)
    }
}

/// Session with one engine endpoint. Clones share the same session, and
/// connecting again replaces it, so there is at most one live session.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHandle {
    session: Arc<Mutex<Option<Session>>>,
}

impl ConnectionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        // A poisoned session is still just a socket.
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn connect(&self, endpoint: &Endpoint, attempt_timeout: Duration) -> io::Result<()> {
        let session = match endpoint {
            Endpoint::Socket { host, port } => {
                let stream = timeout(attempt_timeout, TcpStream::connect((host.as_str(), *port)))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
                stream.set_nodelay(true)?;
                Session::Tcp(stream)
            }
            Endpoint::Pipe { .. } => {
                let path = endpoint
                    .pipe_path()
                    .ok_or_else(|| io::Error::other("endpoint has no pipe path"))?;
                let stream = timeout(attempt_timeout, UnixStream::connect(&path))
                    .await
                    .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??;
                Session::Unix(stream)
            }
        };
        debug!("connected to {endpoint}");
        *self.lock() = Some(session);
        Ok(())
    }

    /// Drop the session. Returns whether one was open.
    pub fn disconnect(&self) -> bool {
        self.lock().take().is_some()
    }

    /// Check the session without blocking or consuming data. A peer that
    /// closed the socket marks the handle disconnected.
    pub fn is_connected(&self) -> bool {
        let mut guard = self.lock();
        let Some(ref session) = *guard else {
            return false;
        };
        let mut buf = [0u8; 1];
        let alive = match session.try_peek(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        };
        if !alive {
            *guard = None;
        }
        alive
    }
}
