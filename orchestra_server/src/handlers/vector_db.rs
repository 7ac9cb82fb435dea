//! Vector-db handler, spec section 4.7.
use std::io::Read;

use serde_json::Value;

use orchestra_definitions::Result;

use endpoint_resolver::EndpointResolver;
use super::map_response_error;

pub struct VectorDbHandler<'a> {
    resolver: &'a EndpointResolver<'a>,
    client: reqwest::Client,
}

fn transport_err(e: reqwest::Error) -> ::failure::Error {
    use orchestra_definitions::OrchestraErrorKind as EK;
    if e.is_timeout() {
        EK::Timeout(0).into()
    } else {
        EK::UpstreamFailure(0, e.to_string()).into()
    }
}

impl<'a> VectorDbHandler<'a> {
    pub fn new(resolver: &'a EndpointResolver<'a>) -> VectorDbHandler<'a> {
        VectorDbHandler { resolver, client: reqwest::Client::new() }
    }

    /// `listCollections(serviceId)` — GET `/collections`.
    pub fn list_collections(&self, service_id: &str) -> Result<Value> {
        self.get(service_id, "/collections")
    }

    /// `getCollectionInfo(serviceId, name)` — GET `/collections/{name}`.
    pub fn get_collection_info(&self, service_id: &str, name: &str) -> Result<Value> {
        self.get(service_id, &format!("/collections/{}", name))
    }

    /// `createCollection(serviceId, name, vectorSize, distance)` — PUT
    /// `/collections/{name}`.
    pub fn create_collection(&self, service_id: &str, name: &str, vector_size: u32, distance: &str) -> Result<Value> {
        let endpoint = self.resolver.resolve(service_id)?;
        let url = format!("http://{}/collections/{}", endpoint, name);
        let body = ::serde_json::json!({"vectors": {"size": vector_size, "distance": distance}});
        let res = self.client.put(&url).json(&body).send().map_err(transport_err)?;
        read_json(map_response_error(res)?)
    }

    /// `deleteCollection(serviceId, name)` — DELETE `/collections/{name}`.
    pub fn delete_collection(&self, service_id: &str, name: &str) -> Result<()> {
        let endpoint = self.resolver.resolve(service_id)?;
        let url = format!("http://{}/collections/{}", endpoint, name);
        let res = self.client.delete(&url).send().map_err(transport_err)?;
        map_response_error(res)?;
        Ok(())
    }

    /// `upsertPoints(serviceId, name, points)` — PUT
    /// `/collections/{name}/points`.
    pub fn upsert_points(&self, service_id: &str, name: &str, points: &Value) -> Result<Value> {
        let endpoint = self.resolver.resolve(service_id)?;
        let url = format!("http://{}/collections/{}/points", endpoint, name);
        let body = ::serde_json::json!({"points": points});
        let res = self.client.put(&url).json(&body).send().map_err(transport_err)?;
        read_json(map_response_error(res)?)
    }

    /// `searchPoints(serviceId, name, queryVector, limit)` — POST
    /// `/collections/{name}/points/search`.
    pub fn search_points(&self, service_id: &str, name: &str, query_vector: &[f32], limit: u32) -> Result<Value> {
        let endpoint = self.resolver.resolve(service_id)?;
        let url = format!("http://{}/collections/{}/points/search", endpoint, name);
        let body = ::serde_json::json!({"vector": query_vector, "limit": limit});
        let res = self.client.post(&url).json(&body).send().map_err(transport_err)?;
        read_json(map_response_error(res)?)
    }

    fn get(&self, service_id: &str, path: &str) -> Result<Value> {
        let endpoint = self.resolver.resolve(service_id)?;
        let url = format!("http://{}{}", endpoint, path);
        let res = self.client.get(&url).send().map_err(transport_err)?;
        read_json(map_response_error(res)?)
    }
}

fn read_json(mut res: reqwest::Response) -> Result<Value> {
    let mut body = String::new();
    res.read_to_string(&mut body)?;
    Ok(::serde_json::from_str(&body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;

    use chrono::Utc;
    use job_client::JobClient;
    use orchestra_definitions::config::SshTarget;
    use orchestra_definitions::structs::Resources;
    use orchestra_definitions::{DeploymentSpec, RecipeCategory, ServiceStatus, TunnelManager};
    use registry::{ServiceRecord, ServiceRegistry};

    fn running_record(id: &str, port: u16) -> ServiceRecord {
        use std::collections::BTreeMap;
        ServiceRecord {
            id: id.to_string(),
            name: "svc".into(),
            recipe_name: "vector-db/qdrant-persistent".into(),
            category: RecipeCategory::VectorDb,
            status: ServiceStatus::Running,
            config: DeploymentSpec {
                name: "qdrant-persistent".into(),
                category: RecipeCategory::VectorDb,
                image: "docker://qdrant/qdrant:latest".into(),
                container_def: None,
                ports: vec![port],
                environment: BTreeMap::new(),
                resources: Resources { nodes: 1, cpu: 8, memory: "16G".into(), gpu: 0, time_limit_minutes: 1440 },
                distributed: None,
                replica: None,
            },
            created_at: Utc::now(),
            group_id: None,
            replica_index: None,
            endpoint: Some(format!("127.0.0.1:{}", port)),
        }
    }

    fn stub_tunnel() -> Arc<TunnelManager> {
        Arc::new(TunnelManager::new(SshTarget {
            user: "svc".into(),
            host: "127.0.0.1".into(),
            port: 1,
            key_path: "/nonexistent".into(),
        }))
    }

    #[test]
    fn delete_collection_issues_delete_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let n = stream.read(&mut buf).unwrap();
                let req = String::from_utf8_lossy(&buf[..n]);
                assert!(req.starts_with("DELETE /collections/docs"));
                let _ = stream.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\n{}");
            }
        });

        let registry = ServiceRegistry::new();
        registry.register(running_record("svc-1", port)).unwrap();
        let jobs = JobClient::stub(stub_tunnel());
        let resolver = EndpointResolver::new(&registry, &jobs);
        let handler = VectorDbHandler::new(&resolver);
        let result = handler.delete_collection("svc-1", "docs");
        handle.join().unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn search_points_sends_query_vector_and_limit() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 1024];
                let n = stream.read(&mut buf).unwrap();
                let req = String::from_utf8_lossy(&buf[..n]);
                assert!(req.starts_with("POST /collections/docs/points/search"));
                assert!(req.contains("\"limit\":5"));
                let body = b"{\"result\":[]}";
                let _ = stream.write_all(format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\n\r\n{}",
                    body.len(), String::from_utf8_lossy(body)
                ).as_bytes());
            }
        });

        let registry = ServiceRegistry::new();
        registry.register(running_record("svc-1", port)).unwrap();
        let jobs = JobClient::stub(stub_tunnel());
        let resolver = EndpointResolver::new(&registry, &jobs);
        let handler = VectorDbHandler::new(&resolver);
        let result = handler.search_points("svc-1", "docs", &[0.1, 0.2, 0.3], 5);
        handle.join().unwrap();
        assert!(result.is_ok());
    }
}
