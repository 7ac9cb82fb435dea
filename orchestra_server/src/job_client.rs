//! Wraps the workload-manager REST API reached through the SSH tunnel
//! (spec section 4.4). Grounded on `Vault`'s shape in `vault.rs`: a client
//! struct holding a `reqwest::Client` plus connection parameters and a
//! bearer token, blocking methods returning `Result<T>`.
use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use failure::ResultExt;

use orchestra_definitions::{ClusterConfig, OrchestraErrorKind as EK, Result, ServiceStatus, TunnelManager};
use orchestra_definitions::states::map_scheduler_state;

/// Job metadata as returned by the workload manager (spec section 3).
#[derive(Debug, Clone)]
pub struct JobMetadata {
    pub job_id: String,
    pub status: ServiceStatus,
    pub node_list: Vec<String>,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
    pub exit_code: Option<i32>,
}

struct CachedLog {
    stdout: String,
    stderr: String,
    fetched_at: Instant,
}

/// Response shape from the scheduler's job-state endpoint.
#[derive(Debug, Deserialize)]
struct JobStateResponse {
    job_id: String,
    state: String,
    #[serde(default)]
    requeue_expected: bool,
    #[serde(default)]
    nodes: Vec<String>,
    #[serde(default)]
    stdout_path: Option<String>,
    #[serde(default)]
    stderr_path: Option<String>,
    #[serde(default)]
    exit_code: Option<i32>,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    script: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

pub struct JobClient {
    tunnel: Arc<TunnelManager>,
    client: reqwest::Client,
    base_url: String,
    token: String,
    log_cache: Mutex<HashMap<String, CachedLog>>,
}

const LOG_CACHE_TTL: Duration = Duration::from_secs(5);

impl JobClient {
    pub fn new(config: &ClusterConfig, tunnel: Arc<TunnelManager>) -> Result<JobClient> {
        let local_port = tunnel.ensure_tunnel(
            config.tunnel.slurm_rest_local_port,
            &config.tunnel.slurm_rest_host,
            config.tunnel.slurm_rest_port,
        )?;
        Ok(JobClient {
            tunnel,
            client: reqwest::Client::new(),
            base_url: format!("http://127.0.0.1:{}", local_port),
            token: config.slurm_jwt.clone(),
            log_cache: Mutex::new(HashMap::new()),
        })
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.token))
    }

    /// `submit(script) -> jobId` (spec section 4.4): on any transport
    /// failure, retries up to three times with exponential backoff
    /// (0.5s, 1s, 2s).
    pub fn submit(&self, script: &str) -> Result<String> {
        let url = format!("{}/jobs", self.base_url);
        let backoff = [Duration::from_millis(500), Duration::from_secs(1), Duration::from_secs(2)];
        let mut last_err = None;
        for (attempt, delay) in backoff.iter().enumerate() {
            match self.authed(self.client.post(&url)).json(&SubmitRequest { script }).send() {
                Ok(mut res) => {
                    if res.status() == reqwest::StatusCode::UNAUTHORIZED {
                        return Err(EK::AuthExpired.into());
                    }
                    if !res.status().is_success() {
                        let status = res.status().as_u16();
                        let mut body = String::new();
                        let _ = res.read_to_string(&mut body);
                        return Err(EK::UpstreamFailure(status, body).into());
                    }
                    let parsed: SubmitResponse = res.json().context(EK::TunnelFailure(url.clone()))?;
                    return Ok(parsed.job_id);
                }
                Err(e) => {
                    warn!("submit attempt {} failed: {}", attempt + 1, e);
                    last_err = Some(e);
                    thread::sleep(*delay);
                }
            }
        }
        Err(last_err.expect("loop always runs at least once").context(EK::TunnelFailure(url)).into())
    }

    /// `cancel(jobId)` (spec section 4.4): best-effort, idempotent,
    /// `NotFound` is treated as success.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        let res = self.authed(self.client.delete(&url)).send().context(EK::TunnelFailure(url.clone()))?;
        if res.status().is_success() || res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if res.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EK::AuthExpired.into());
        }
        Err(EK::UpstreamFailure(res.status().as_u16(), url).into())
    }

    /// `status(jobId) -> JobMetadata` (spec section 4.4), scheduler state
    /// code mapped per `orchestra_definitions::states`.
    pub fn status(&self, job_id: &str) -> Result<JobMetadata> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        let mut res = self.authed(self.client.get(&url)).send().context(EK::TunnelFailure(url.clone()))?;
        if res.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(EK::AuthExpired.into());
        }
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(EK::NotFound(job_id.to_string()).into());
        }
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let mut body = String::new();
            let _ = res.read_to_string(&mut body);
            return Err(EK::UpstreamFailure(status, body).into());
        }
        let parsed: JobStateResponse = res.json().context(EK::UpstreamFailure(502, url))?;
        Ok(JobMetadata {
            job_id: parsed.job_id,
            status: map_scheduler_state(&parsed.state, parsed.requeue_expected),
            node_list: parsed.nodes,
            stdout_path: parsed.stdout_path,
            stderr_path: parsed.stderr_path,
            exit_code: parsed.exit_code,
        })
    }

    /// `fetchLogs(jobId) -> (stdout, stderr)` (spec section 4.4): resolves
    /// log paths from submit-time metadata, fetches remotely and caches
    /// locally by job id. Per SPEC_FULL.md section 9.1: refreshed when the
    /// cached copy is more than 5 seconds old, replaced fully (not
    /// appended). Missing remote files yield an empty string, not an error
    /// (spec section 8: "`logs` before any output exists => empty string").
    pub fn fetch_logs(&self, job_id: &str) -> Result<(String, String)> {
        {
            let cache = self.log_cache.lock().expect("log cache lock poisoned");
            if let Some(entry) = cache.get(job_id) {
                if entry.fetched_at.elapsed() < LOG_CACHE_TTL {
                    return Ok((entry.stdout.clone(), entry.stderr.clone()));
                }
            }
        }

        let meta = self.status(job_id)?;
        let local_dir = std::env::temp_dir().join("orchestra-logs");
        let stdout = self.fetch_one(meta.stdout_path.as_ref(), &local_dir, job_id, "out")?;
        let stderr = self.fetch_one(meta.stderr_path.as_ref(), &local_dir, job_id, "err")?;

        self.log_cache.lock().expect("log cache lock poisoned").insert(
            job_id.to_string(),
            CachedLog { stdout: stdout.clone(), stderr: stderr.clone(), fetched_at: Instant::now() },
        );
        Ok((stdout, stderr))
    }

    fn fetch_one(
        &self,
        remote_path: Option<&String>,
        local_dir: &std::path::Path,
        job_id: &str,
        suffix: &str,
    ) -> Result<String> {
        let remote_path = match remote_path {
            Some(p) => p,
            None => return Ok(String::new()),
        };
        let local_path = local_dir.join(format!("{}.{}", job_id, suffix));
        let found = self.tunnel.fetch_remote_file(remote_path, &local_path)?;
        if !found {
            return Ok(String::new());
        }
        Ok(std::fs::read_to_string(&local_path).unwrap_or_default())
    }

    /// A client bound to an arbitrary tunnel without establishing one,
    /// for tests in other modules that need a `&JobClient` but exercise a
    /// code path short-circuiting before any network call.
    #[cfg(test)]
    pub fn stub(tunnel: Arc<TunnelManager>) -> JobClient {
        JobClient {
            tunnel,
            client: reqwest::Client::new(),
            base_url: "http://127.0.0.1:1".to_string(),
            token: "test-token".to_string(),
            log_cache: Mutex::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_definitions::config::SshTarget;

    fn tunnel() -> Arc<TunnelManager> {
        Arc::new(TunnelManager::new(SshTarget {
            user: "svc".into(),
            host: "127.0.0.1".into(),
            port: 1,
            key_path: "/nonexistent".into(),
        }))
    }

    #[test]
    fn fetch_logs_returns_empty_string_when_path_unset() {
        // Exercises the `None` short-circuit of `fetch_one` directly; a
        // full `status()` round-trip needs a live scheduler mock.
        let client = JobClient {
            tunnel: tunnel(),
            client: reqwest::Client::new(),
            base_url: "http://127.0.0.1:1".to_string(),
            token: "t".to_string(),
            log_cache: Mutex::new(HashMap::new()),
        };
        let out = client.fetch_one(None, &std::env::temp_dir(), "job-1", "out").unwrap();
        assert_eq!(out, "");
    }
}
