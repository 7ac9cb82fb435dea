//! Inference handler (LLM server), spec section 4.7.
use std::collections::HashSet;
use std::io::Read;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

use orchestra_definitions::{math, OrchestraErrorKind as EK, Result};

use endpoint_resolver::EndpointResolver;
use super::{map_response_error, wait_until_ready};

pub struct InferenceHandler<'a> {
    resolver: &'a EndpointResolver<'a>,
    client: reqwest::Client,
    probed_ready: Mutex<HashSet<String>>,
}

fn transport_err(e: reqwest::Error) -> ::failure::Error {
    if e.is_timeout() {
        EK::Timeout(0).into()
    } else {
        EK::UpstreamFailure(0, e.to_string()).into()
    }
}

impl<'a> InferenceHandler<'a> {
    pub fn new(resolver: &'a EndpointResolver<'a>) -> InferenceHandler<'a> {
        InferenceHandler { resolver, client: reqwest::Client::new(), probed_ready: Mutex::new(HashSet::new()) }
    }

    /// `listModels(serviceId)` — GET `/v1/models`.
    pub fn list_models(&self, service_id: &str) -> Result<Value> {
        let endpoint = self.resolver.resolve(service_id)?;
        let url = format!("http://{}/v1/models", endpoint);
        let res = self.client.get(&url).send().map_err(transport_err)?;
        read_json(map_response_error(res)?)
    }

    /// `prompt(serviceId, body)` — POST `/v1/completions` or
    /// `/v1/chat/completions`, selected by the body's shape (presence of a
    /// `messages` array implies the chat variant).
    pub fn prompt(&self, service_id: &str, body: &Value, job_remaining: Duration) -> Result<Value> {
        let endpoint = self.resolver.resolve(service_id)?;
        self.ensure_ready(service_id, &endpoint, job_remaining)?;

        let path = if body.get("messages").is_some() { "/v1/chat/completions" } else { "/v1/completions" };
        let url = format!("http://{}{}", endpoint, path);
        let res = self.client.post(&url).json(body).send().map_err(transport_err)?;
        read_json(map_response_error(res)?)
    }

    /// `getMetrics(serviceId)` — GET `/metrics`.
    pub fn get_metrics(&self, service_id: &str) -> Result<String> {
        let endpoint = self.resolver.resolve(service_id)?;
        let url = format!("http://{}/metrics", endpoint);
        let mut res = map_response_error(self.client.get(&url).send().map_err(transport_err)?)?;
        let mut body = String::new();
        res.read_to_string(&mut body)?;
        Ok(body)
    }

    /// Memoized readiness probe: the first `prompt` call against a service
    /// blocks (retrying at 1s intervals) until `/health` or `/v1/models`
    /// responds successfully or the budget is exhausted (spec section 4.7).
    fn ensure_ready(&self, service_id: &str, endpoint: &str, job_remaining: Duration) -> Result<()> {
        if self.probed_ready.lock().expect("ready-set lock poisoned").contains(service_id) {
            return Ok(());
        }
        let budget = math::readiness_budget(job_remaining);
        let url = format!("http://{}/v1/models", endpoint);
        wait_until_ready(&self.client, &url, Instant::now() + budget)?;
        self.probed_ready.lock().expect("ready-set lock poisoned").insert(service_id.to_string());
        Ok(())
    }
}

fn read_json(mut res: reqwest::Response) -> Result<Value> {
    let mut body = String::new();
    res.read_to_string(&mut body)?;
    Ok(::serde_json::from_str(&body)?)
}
