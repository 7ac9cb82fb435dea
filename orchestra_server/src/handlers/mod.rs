//! Typed service handlers (spec section 4.7): translate typed operations
//! into HTTP calls against a resolved endpoint. Grounded on `Vault`'s
//! request-building shape in `vault.rs`, generalized from a single fixed
//! API (Vault's) to per-service-type REST surfaces reached over plain
//! loopback HTTP rather than the SSH tunnel (the tunnel only fronts the
//! scheduler; resolved service endpoints are reachable directly once a
//! job's node is on the cluster network).
use std::time::{Duration, Instant};

use orchestra_definitions::{OrchestraErrorKind as EK, Result};

pub mod inference;
pub mod vector_db;

/// Issue a readiness probe against `url`, retrying at 1s intervals until
/// `deadline` (spec section 4.7: "retry with 1s interval up to the job's
/// remaining time budget or 60 seconds, whichever is smaller").
pub(crate) fn wait_until_ready(client: &reqwest::Client, url: &str, deadline: Instant) -> Result<()> {
    loop {
        if let Ok(res) = client.get(url).timeout(Duration::from_secs(5)).send() {
            if res.status().is_success() {
                return Ok(());
            }
        }
        if Instant::now() >= deadline {
            return Err(EK::Timeout(0).into());
        }
        ::std::thread::sleep(Duration::from_secs(1));
    }
}

pub(crate) fn map_response_error(mut res: reqwest::Response) -> Result<reqwest::Response> {
    if res.status().is_success() {
        return Ok(res);
    }
    use std::io::Read;
    let status = res.status().as_u16();
    let mut body = String::new();
    let _ = res.read_to_string(&mut body);
    Err(EK::UpstreamFailure(status, body).into())
}
