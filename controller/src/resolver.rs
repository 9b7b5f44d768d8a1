use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread,
    time::Duration,
};

use tracing::{debug, warn};

type Lookup = fn(&str) -> Result<SocketAddr, String>;

fn system_lookup(addr: &str) -> Result<SocketAddr, String> {
    addr.to_socket_addrs()
        .map_err(|err| format!("cannot resolve {addr}: {err}"))?
        .next()
        .ok_or_else(|| format!("{addr} resolved to no address"))
}

fn spawn_lookup(addr: &str, lookup: Lookup) -> Result<Receiver<Result<SocketAddr, String>>, String> {
    let (tx, rx) = mpsc::channel();
    let target = addr.to_string();
    thread::Builder::new()
        .name("resolver".into())
        .spawn(move || {
            let _ = tx.send(lookup(&target));
        })
        .map_err(|err| format!("cannot spawn lookup for {addr}: {err}"))?;
    Ok(rx)
}

fn wait_for(
    addr: &str,
    rx: &Receiver<Result<SocketAddr, String>>,
    timeout: Duration,
) -> Result<Option<SocketAddr>, String> {
    match rx.recv_timeout(timeout) {
        Ok(result) => result.map(Some),
        Err(RecvTimeoutError::Timeout) => Ok(None),
        Err(RecvTimeoutError::Disconnected) => Err(format!("lookup of {addr} aborted")),
    }
}

/// Hostname lookup for the scheduler thread, bounded by `timeout` per call.
///
/// `getaddrinfo` cannot be cancelled, so the lookup runs on its own thread. One
/// that outlives its caller's timeout stays in flight and its answer is picked up
/// by the next call. Answers are cached until [`Resolver::invalidate`].
pub struct Resolver {
    addr: String,
    timeout: Duration,
    lookup: Lookup,
    cached: Option<SocketAddr>,
    in_flight: Option<Receiver<Result<SocketAddr, String>>>,
}

impl Resolver {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self::with_lookup(addr, timeout, system_lookup)
    }

    fn with_lookup(addr: impl Into<String>, timeout: Duration, lookup: Lookup) -> Self {
        let addr = addr.into();
        Self {
            cached: addr.parse().ok(),
            addr,
            timeout,
            lookup,
            in_flight: None,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn resolve(&mut self) -> Result<SocketAddr, String> {
        if let Some(addr) = self.cached {
            return Ok(addr);
        }

        let rx = match self.in_flight.take() {
            Some(rx) => rx,
            None => spawn_lookup(&self.addr, self.lookup)?,
        };
        match wait_for(&self.addr, &rx, self.timeout)? {
            Some(addr) => {
                debug!(host = %self.addr, %addr, "hostname resolved");
                self.cached = Some(addr);
                Ok(addr)
            }
            None => {
                warn!(host = %self.addr, timeout = ?self.timeout, "hostname lookup still pending");
                self.in_flight = Some(rx);
                Err(format!("lookup of {} timed out", self.addr))
            }
        }
    }

    /// Drops a cached hostname answer so the next call looks it up again.
    pub fn invalidate(&mut self) {
        if self.addr.parse::<SocketAddr>().is_err() {
            self.cached = None;
        }
    }
}

/// One-off bounded lookup in the shape `ureq` expects from a custom resolver.
pub fn lookup_within(netloc: &str, timeout: Duration) -> io::Result<Vec<SocketAddr>> {
    let to_io = |message: String| io::Error::new(io::ErrorKind::Other, message);
    let rx = spawn_lookup(netloc, system_lookup).map_err(to_io)?;
    match wait_for(netloc, &rx, timeout).map_err(to_io)? {
        Some(addr) => Ok(vec![addr]),
        None => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("lookup of {netloc} timed out"),
        )),
    }
}
