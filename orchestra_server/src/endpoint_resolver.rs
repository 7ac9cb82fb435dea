//! Endpoint resolver (spec section 4.6): composes job metadata and recipe
//! port into `host:port` for a running service.
use orchestra_definitions::{OrchestraErrorKind as EK, Result, ServiceStatus};

use job_client::JobClient;
use registry::{ServiceRecord, ServiceRegistry};

pub struct EndpointResolver<'a> {
    registry: &'a ServiceRegistry,
    jobs: &'a JobClient,
}

impl<'a> EndpointResolver<'a> {
    pub fn new(registry: &'a ServiceRegistry, jobs: &'a JobClient) -> EndpointResolver<'a> {
        EndpointResolver { registry, jobs }
    }

    /// Resolve `service_id` to `host:port`. `NotReady` unless the service's
    /// status is `running`; the resolved endpoint is cached on the record
    /// until it leaves `running` (spec section 4.6).
    pub fn resolve(&self, service_id: &str) -> Result<String> {
        let rec = self.registry.get(service_id)?;
        if let Some(ref cached) = rec.endpoint {
            return Ok(cached.clone());
        }
        if rec.status != ServiceStatus::Running {
            return Err(EK::NotReady(service_id.to_string()).into());
        }

        // Replica group members share one scheduler job; the status lookup
        // always targets the group's job id, not the per-replica service id.
        let job_id = rec.group_id.as_ref().unwrap_or(&rec.id).clone();
        let meta = self.jobs.status(&job_id)?;
        let host = meta
            .node_list
            .first()
            .cloned()
            .ok_or_else(|| EK::NotReady(service_id.to_string()))?;

        let port = match (rec.replica_index, &rec.config.replica) {
            (Some(idx), Some(replica)) => replica.base_port + idx as u16,
            _ => rec.config.primary_port()?,
        };

        let endpoint = format!("{}:{}", host, port);
        self.registry.set_endpoint(service_id, endpoint.clone())?;
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_definitions::structs::Resources;
    use orchestra_definitions::RecipeCategory;
    use registry::ServiceRecord;
    use std::collections::BTreeMap;

    fn sample_spec(ports: Vec<u16>) -> ::orchestra_definitions::DeploymentSpec {
        ::orchestra_definitions::DeploymentSpec {
            name: "vllm-single-node".into(),
            category: RecipeCategory::Inference,
            image: "docker://vllm/vllm-openai:latest".into(),
            container_def: None,
            ports,
            environment: BTreeMap::new(),
            resources: Resources { nodes: 1, cpu: 16, memory: "64G".into(), gpu: 1, time_limit_minutes: 180 },
            distributed: None,
            replica: None,
        }
    }

    fn rec(id: &str, status: ServiceStatus, endpoint: Option<String>) -> ServiceRecord {
        ServiceRecord {
            id: id.to_string(),
            name: "svc".into(),
            recipe_name: "inference/vllm-single-node".into(),
            category: RecipeCategory::Inference,
            status,
            config: sample_spec(vec![8000]),
            created_at: ::chrono::Utc::now(),
            group_id: None,
            replica_index: None,
            endpoint,
        }
    }

    fn stub_jobs() -> JobClient {
        use orchestra_definitions::config::SshTarget;
        let tunnel = ::std::sync::Arc::new(::orchestra_definitions::TunnelManager::new(SshTarget {
            user: "svc".into(),
            host: "127.0.0.1".into(),
            port: 1,
            key_path: "/nonexistent".into(),
        }));
        JobClient::stub(tunnel)
    }

    #[test]
    fn not_running_is_not_ready() {
        let registry = ServiceRegistry::new();
        registry.register(rec("job-1", ServiceStatus::Pending, None)).unwrap();
        let jobs = stub_jobs();
        let resolver = EndpointResolver::new(&registry, &jobs);
        assert!(resolver.resolve("job-1").is_err());
    }

    #[test]
    fn cached_endpoint_short_circuits() {
        let registry = ServiceRegistry::new();
        registry.register(rec("job-1", ServiceStatus::Running, Some("node01:8000".into()))).unwrap();
        let jobs = stub_jobs();
        let resolver = EndpointResolver::new(&registry, &jobs);
        assert_eq!(resolver.resolve("job-1").unwrap(), "node01:8000");
    }
}
