//! Replica group coordination and load balancing (spec section 4.8): weighted
//! round-robin routing across a group's members, with a circuit breaker that
//! skips replicas failing transport calls.
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use orchestra_definitions::states::aggregate_group_status;
use orchestra_definitions::{GroupStatus, OrchestraErrorKind as EK, Result, ServiceStatus};

use registry::ServiceRegistry;

const FAILURE_WINDOW: Duration = Duration::from_secs(30);
const RETEST_INTERVAL: Duration = Duration::from_secs(15);

struct ReplicaHealth {
    consecutive_failures: u32,
    first_failure_at: Instant,
    unhealthy_since: Option<Instant>,
}

/// Routes requests targeting a replica group id to a live member, and tracks
/// per-replica health for the circuit breaker described in spec section 4.8.
/// Holds no reference to the registry itself (so it can sit alongside it,
/// unborrowed, in `AppState`) — every call takes the registry explicitly,
/// the same way `EndpointResolver` is handed its collaborators per call.
pub struct ReplicaRouter {
    health: RwLock<HashMap<String, Mutex<ReplicaHealth>>>,
}

impl ReplicaRouter {
    pub fn new() -> ReplicaRouter {
        ReplicaRouter { health: RwLock::new(HashMap::new()) }
    }

    /// Advance the group's cursor, skipping circuit-broken replicas, trying
    /// each member at most once. `AllReplicasDown` if none answer healthy.
    pub fn route(&self, registry: &ServiceRegistry, group_id: &str) -> Result<String> {
        let group = registry.get_group(group_id)?;
        let member_count = group.member_service_ids.len();
        if member_count == 0 {
            return Err(EK::AllReplicasDown(group_id.to_string()).into());
        }
        for _ in 0..member_count {
            let idx = registry.advance_cursor(group_id)?;
            let member = &group.member_service_ids[idx];
            if self.is_healthy(member) {
                return Ok(member.clone());
            }
        }
        Err(EK::AllReplicasDown(group_id.to_string()).into())
    }

    /// Aggregate status across a group's members (spec section 4.8).
    pub fn group_status(&self, registry: &ServiceRegistry, group_id: &str) -> Result<GroupStatus> {
        let group = registry.get_group(group_id)?;
        let statuses: Vec<ServiceStatus> =
            group.member_service_ids.iter().filter_map(|id| registry.get(id).ok()).map(|r| r.status).collect();
        Ok(aggregate_group_status(&statuses))
    }

    fn is_healthy(&self, member: &str) -> bool {
        let guard = self.health.read().expect("health map lock poisoned");
        match guard.get(member) {
            None => true,
            Some(entry) => {
                let h = entry.lock().expect("replica health lock poisoned");
                match h.unhealthy_since {
                    None => true,
                    Some(since) => since.elapsed() >= RETEST_INTERVAL,
                }
            }
        }
    }

    /// Record a successful response from `member`: resets its health.
    pub fn record_success(&self, member: &str) {
        self.health.write().expect("health map lock poisoned").remove(member);
    }

    /// Record a transport failure from `member`: marks it unhealthy after
    /// two consecutive failures within the 30-second window.
    pub fn record_failure(&self, member: &str) {
        let mut guard = self.health.write().expect("health map lock poisoned");
        let now = Instant::now();
        let entry = guard
            .entry(member.to_string())
            .or_insert_with(|| Mutex::new(ReplicaHealth { consecutive_failures: 0, first_failure_at: now, unhealthy_since: None }));
        let mut h = entry.lock().expect("replica health lock poisoned");
        if h.consecutive_failures == 0 || now.duration_since(h.first_failure_at) > FAILURE_WINDOW {
            h.consecutive_failures = 1;
            h.first_failure_at = now;
            h.unhealthy_since = None;
        } else {
            h.consecutive_failures += 1;
        }
        if h.consecutive_failures >= 2 && h.unhealthy_since.is_none() {
            h.unhealthy_since = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_definitions::structs::Resources;
    use orchestra_definitions::RecipeCategory;
    use registry::{ServiceGroupRecord, ServiceRecord};
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn sample_spec() -> ::orchestra_definitions::DeploymentSpec {
        ::orchestra_definitions::DeploymentSpec {
            name: "vllm-replicas".into(),
            category: RecipeCategory::Inference,
            image: "docker://vllm/vllm-openai:latest".into(),
            container_def: None,
            ports: vec![8001],
            environment: BTreeMap::new(),
            resources: Resources { nodes: 1, cpu: 16, memory: "64G".into(), gpu: 4, time_limit_minutes: 180 },
            distributed: None,
            replica: None,
        }
    }

    fn member(id: &str, group_id: &str, idx: u32, status: ServiceStatus) -> ServiceRecord {
        ServiceRecord {
            id: id.to_string(),
            name: "svc".into(),
            recipe_name: "inference/vllm-replicas".into(),
            category: RecipeCategory::Inference,
            status,
            config: sample_spec(),
            created_at: ::chrono::Utc::now(),
            group_id: Some(group_id.to_string()),
            replica_index: Some(idx),
            endpoint: None,
        }
    }

    fn setup(members: &[&str]) -> ServiceRegistry {
        let registry = ServiceRegistry::new();
        for (i, id) in members.iter().enumerate() {
            registry.register(member(id, "grp-1", i as u32, ServiceStatus::Running)).unwrap();
        }
        registry
            .register_group(ServiceGroupRecord {
                group_id: "grp-1".into(),
                recipe_name: "inference/vllm-replicas".into(),
                config: sample_spec(),
                replicas_per_node: members.len() as u32,
                member_service_ids: members.iter().map(|s| s.to_string()).collect(),
                base_port: 8001,
                round_robin_cursor: Arc::new(AtomicUsize::new(0)),
            })
            .unwrap();
        registry
    }

    #[test]
    fn routes_round_robin_when_all_healthy() {
        let registry = setup(&["a", "b", "c"]);
        let router = ReplicaRouter::new();
        let order: Vec<String> = (0..6).map(|_| router.route(&registry, "grp-1").unwrap()).collect();
        assert_eq!(order, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn two_consecutive_failures_marks_unhealthy_and_is_skipped() {
        let registry = setup(&["a", "b"]);
        let router = ReplicaRouter::new();
        router.record_failure("a");
        router.record_failure("a");
        // two members, cursor now at whatever position; routing twice must
        // always land on "b" since "a" is circuit-broken.
        assert_eq!(router.route(&registry, "grp-1").unwrap(), "b");
        assert_eq!(router.route(&registry, "grp-1").unwrap(), "b");
    }

    #[test]
    fn success_clears_circuit_breaker() {
        let registry = setup(&["a"]);
        let router = ReplicaRouter::new();
        router.record_failure("a");
        router.record_failure("a");
        router.record_success("a");
        assert_eq!(router.route(&registry, "grp-1").unwrap(), "a");
    }

    #[test]
    fn all_replicas_down_when_every_member_circuit_broken() {
        let registry = setup(&["a", "b"]);
        let router = ReplicaRouter::new();
        router.record_failure("a");
        router.record_failure("a");
        router.record_failure("b");
        router.record_failure("b");
        assert!(router.route(&registry, "grp-1").is_err());
    }

    #[test]
    fn group_status_is_running_when_all_members_running() {
        let registry = setup(&["a", "b"]);
        let router = ReplicaRouter::new();
        assert_eq!(router.group_status(&registry, "grp-1").unwrap(), GroupStatus::Running);
    }

    #[test]
    fn group_status_is_partial_when_members_diverge() {
        let registry = setup(&["a", "b"]);
        registry.update_status("b", ServiceStatus::Cancelled).unwrap();
        let router = ReplicaRouter::new();
        assert_eq!(router.group_status(&registry, "grp-1").unwrap(), GroupStatus::Partial);
    }
}
