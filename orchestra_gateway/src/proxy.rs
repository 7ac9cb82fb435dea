//! Public proxy (spec section 4.10): for every inbound call, constructs the
//! equivalent internal URL and forwards it to the orchestrator's facade
//! over the SSH tunnel. Body and status pass through verbatim; hop-by-hop
//! headers are stripped. Grounded on `job_client`'s tunnel-backed request
//! shape, generalized from a fixed set of typed calls to an arbitrary
//! method/path passthrough.
use std::sync::Arc;

use actix_web::http::{HeaderMap, Method, StatusCode};
use actix_web::{Error as ActixError, HttpRequest, HttpResponse};
use bytes::Bytes;
use futures::{Future, Stream};

use orchestra_definitions::{find_kind, OrchestraErrorKind as EK, TunnelManager};

use config::OrchestratorTarget;

/// Headers that must never be forwarded verbatim across a proxy hop
/// (RFC 7230 section 6.1).
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub struct Proxy {
    tunnel: Arc<TunnelManager>,
    client: reqwest::Client,
    target: OrchestratorTarget,
}

impl Proxy {
    pub fn new(tunnel: Arc<TunnelManager>, target: OrchestratorTarget) -> Proxy {
        Proxy { tunnel, client: reqwest::Client::new(), target }
    }

    fn dispatch(&self, method: &Method, path: &str, query: &str, headers: &HeaderMap, body: &[u8]) -> HttpResponse {
        match self.try_dispatch(method, path, query, headers, body) {
            Ok(resp) => resp,
            Err(e) => error_response(&e),
        }
    }

    fn try_dispatch(
        &self,
        method: &Method,
        path: &str,
        query: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> ::orchestra_definitions::Result<HttpResponse> {
        let local_port = self
            .tunnel
            .ensure_tunnel(self.target.local_port, &self.target.remote_host, self.target.remote_port)?;

        let internal_path = rewrite_path(path);
        let mut url = format!("http://127.0.0.1:{}{}", local_port, internal_path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(query);
        }

        let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|_| EK::ValidationError(format!("unsupported method {}", method)))?;
        let mut builder = self.client.request(reqwest_method, &url);
        for (name, value) in headers.iter() {
            if HOP_BY_HOP.contains(&name.as_str().to_lowercase().as_str()) {
                continue;
            }
            if let Ok(v) = value.to_str() {
                builder = builder.header(name.as_str(), v);
            }
        }
        if !body.is_empty() {
            builder = builder.body(body.to_vec());
        }

        let mut res = builder.send().map_err(|e| EK::TunnelFailure(e.to_string()))?;
        let status = StatusCode::from_u16(res.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut out = HttpResponse::build(status);
        for (name, value) in res.headers().iter() {
            if HOP_BY_HOP.contains(&name.as_str().to_lowercase().as_str()) {
                continue;
            }
            if let Ok(v) = value.to_str() {
                out.header(name.as_str(), v);
            }
        }
        use std::io::Read;
        let mut body = Vec::new();
        res.read_to_end(&mut body).map_err(|e| EK::UpstreamFailure(502, e.to_string()))?;
        Ok(out.body(body))
    }
}

/// The public surface is `/api/v1/...`; the orchestrator's facade only
/// registers routes under `/internal/v1/...` (spec section 6.1). Every
/// forwarded request is rewritten from one to the other.
fn rewrite_path(path: &str) -> String {
    match path.strip_prefix("/api/v1") {
        Some(rest) => format!("/internal/v1{}", rest),
        None => path.to_string(),
    }
}

fn error_response(e: &::failure::Error) -> HttpResponse {
    let status = find_kind(e).map(|k| k.status_code()).unwrap_or(500);
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(code).json(json!({"error": e.to_string()}))
}

/// Catch-all handler mounted at `/{tail:.*}`: reads the request body
/// asynchronously (the actix-web extraction idiom), then performs the
/// blocking tunnel round-trip, matching the blocking style already used
/// throughout the orchestrator's own HTTP clients.
pub fn forward(req: &HttpRequest<Arc<Proxy>>) -> Box<Future<Item = HttpResponse, Error = ActixError>> {
    let proxy = req.state().clone();
    let method = req.method().clone();
    let path = req.path().to_string();
    let query = req.query_string().to_string();
    let headers = req.headers().clone();

    Box::new(
        req.payload()
            .from_err()
            .fold(Vec::new(), |mut acc, chunk: Bytes| {
                acc.extend_from_slice(&chunk);
                Ok::<_, ActixError>(acc)
            })
            .map(move |body| proxy.dispatch(&method, &path, &query, &headers, &body)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_definitions::config::SshTarget;

    fn proxy() -> Proxy {
        let tunnel = Arc::new(TunnelManager::new(SshTarget {
            user: "svc".into(),
            host: "127.0.0.1".into(),
            port: 1,
            key_path: "/nonexistent".into(),
        }));
        Proxy::new(tunnel, OrchestratorTarget { local_port: 0, remote_host: "127.0.0.1".into(), remote_port: 1 })
    }

    #[test]
    fn unreachable_tunnel_surfaces_as_bad_gateway() {
        let p = proxy();
        let headers = HeaderMap::new();
        let resp = p.dispatch(&Method::GET, "/api/v1/services", "", &headers, &[]);
        assert_eq!(resp.status().as_u16(), 502);
    }

    #[test]
    fn public_prefix_is_rewritten_to_internal() {
        assert_eq!(rewrite_path("/api/v1/services"), "/internal/v1/services");
        assert_eq!(rewrite_path("/api/v1/inference/job-1/prompt"), "/internal/v1/inference/job-1/prompt");
    }

    #[test]
    fn unrecognized_prefix_is_passed_through_unchanged() {
        assert_eq!(rewrite_path("/healthz"), "/healthz");
    }
}
