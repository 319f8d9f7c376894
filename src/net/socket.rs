//! Multi-address resolution and parallel socket racing (§4.4's socket-finding state machine).
//!
//! The historical Java driver implements this with a non-blocking selector loop or a
//! thread-per-address fallback (see `spec.md` §4.4 and §9). On `tokio` the equivalent is a
//! `JoinSet` of independent connect-with-timeout tasks: the first one to resolve wins, and the
//! rest are aborted when the `JoinSet` is dropped.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::error::{Error, Result};

/// Hard cap from §4.4: resolving to more than this many addresses is an unsupported
/// configuration, not something the driver will attempt to race.
const MAX_ADDRESSES: usize = 64;

/// The ~500ms short timeout used for the "transparent network IP resolution" first attempt.
const TNIR_FIRST_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

const MIN_PARALLEL_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub(crate) struct SocketOpenOptions {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) login_timeout: Duration,
    /// Corresponds to the `multiSubnetFailover` connection property.
    pub(crate) use_parallel: bool,
    pub(crate) use_tnir: bool,
    pub(crate) is_tnir_first_attempt: bool,
    pub(crate) full_timeout: Duration,
}

pub(crate) async fn resolve_and_connect(opts: &SocketOpenOptions) -> Result<TcpStream> {
    let mut addrs: Vec<SocketAddr> = tokio::net::lookup_host((opts.host.as_str(), opts.port))
        .await
        .map_err(|source| Error::Resolve {
            host: opts.host.clone(),
            port: opts.port,
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(Error::Resolve {
            host: opts.host.clone(),
            port: opts.port,
            source: std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "name resolution returned no addresses",
            ),
        });
    }

    let mut use_tnir = opts.use_tnir;
    let mut login_timeout = opts.login_timeout;

    if use_tnir && addrs.len() > MAX_ADDRESSES {
        // "use_tnir and len(addrs) > 64" -> disable TNIR, use full_timeout_ms, continue.
        use_tnir = false;
        login_timeout = opts.full_timeout;
    }

    if addrs.len() > MAX_ADDRESSES {
        return Err(Error::UnsupportedConfig(format!(
            "name resolution for `{}` returned {} addresses, exceeding the supported maximum of {}",
            opts.host,
            addrs.len(),
            MAX_ADDRESSES
        )));
    }

    if !opts.use_parallel && use_tnir && opts.is_tnir_first_attempt {
        return connect_one(addrs[0], TNIR_FIRST_ATTEMPT_TIMEOUT).await;
    }

    if !opts.use_parallel && !use_tnir {
        return connect_one(addrs[0], login_timeout).await;
    }

    // Parallel ("multi-subnet failover") connect: race every resolved address, IPv4 first.
    let (v4, v6): (Vec<SocketAddr>, Vec<SocketAddr>) = addrs.drain(..).partition(|a| a.is_ipv4());

    let per_family_timeout = if !v4.is_empty() && !v6.is_empty() {
        (login_timeout / 2).max(MIN_PARALLEL_TIMEOUT)
    } else {
        login_timeout.max(MIN_PARALLEL_TIMEOUT)
    };

    if !v4.is_empty() {
        match connect_parallel(&v4, per_family_timeout).await {
            Ok(stream) => return Ok(stream),
            Err(_) if !v6.is_empty() => { /* fall through to IPv6 */ }
            Err(e) => return Err(e),
        }
    }

    if !v6.is_empty() {
        return connect_parallel(&v6, per_family_timeout).await;
    }

    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no addresses available to connect to",
    )))
}

async fn connect_one(addr: SocketAddr, deadline: Duration) -> Result<TcpStream> {
    match timeout(deadline, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(_) => Err(Error::Timeout(deadline)),
    }
}

/// Opens one non-blocking connect attempt per address and adopts whichever completes first,
/// dropping the rest. If none succeed, prefers surfacing a non-timeout exception over a
/// timeout one (§4.4), and fails `ConnectionTimedOut` only if every attempt merely timed out.
async fn connect_parallel(addrs: &[SocketAddr], deadline: Duration) -> Result<TcpStream> {
    let mut set: JoinSet<(SocketAddr, Result<TcpStream>)> = JoinSet::new();

    for &addr in addrs {
        set.spawn(async move { (addr, connect_one(addr, deadline).await) });
    }

    let mut preferred_error: Option<Error> = None;

    while let Some(joined) = set.join_next().await {
        let (_, outcome) = match joined {
            Ok(pair) => pair,
            Err(_join_err) => continue, // task panicked or was cancelled; keep racing
        };

        match outcome {
            Ok(stream) => {
                // `set` is dropped here, aborting every other in-flight connect attempt.
                return Ok(stream);
            }
            Err(e) => {
                let is_timeout = matches!(e, Error::Timeout(_));
                match &preferred_error {
                    None => preferred_error = Some(e),
                    Some(prev) if matches!(prev, Error::Timeout(_)) && !is_timeout => {
                        preferred_error = Some(e);
                    }
                    _ => {}
                }
            }
        }
    }

    Err(preferred_error.unwrap_or(Error::Timeout(deadline)))
}
