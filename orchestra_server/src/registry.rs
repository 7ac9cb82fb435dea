//! Process-wide in-memory service and group registry (spec section 4.5).
//! Thread-safe: a single mutual-exclusion lock guards all mutations (spec
//! section 5: "one process-wide mutual-exclusion lock; all read/write
//! operations acquire it. Hold times must be short; network I/O is never
//! performed under the lock").
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use orchestra_definitions::{DeploymentSpec, OrchestraErrorKind as EK, Result, ServiceStatus};

/// A single deployed instance (spec section 3).
#[derive(Clone, Debug)]
pub struct ServiceRecord {
    pub id: String,
    pub name: String,
    pub recipe_name: String,
    pub category: ::orchestra_definitions::RecipeCategory,
    pub status: ServiceStatus,
    pub config: DeploymentSpec,
    pub created_at: DateTime<Utc>,
    pub group_id: Option<String>,
    pub replica_index: Option<u32>,
    pub endpoint: Option<String>,
}

/// A set of co-located replicas sharing one scheduler job (spec section 3).
#[derive(Clone, Debug)]
pub struct ServiceGroupRecord {
    pub group_id: String,
    pub recipe_name: String,
    pub config: DeploymentSpec,
    pub replicas_per_node: u32,
    pub member_service_ids: Vec<String>,
    pub base_port: u16,
    pub round_robin_cursor: ::std::sync::Arc<AtomicUsize>,
}

#[derive(Default)]
struct Inner {
    services: HashMap<String, ServiceRecord>,
    groups: HashMap<String, ServiceGroupRecord>,
}

pub struct ServiceRegistry {
    inner: Mutex<Inner>,
}

impl ServiceRegistry {
    pub fn new() -> ServiceRegistry {
        ServiceRegistry { inner: Mutex::new(Inner::default()) }
    }

    /// `register(rec)` (spec section 4.5): insert, error if `id` collides.
    pub fn register(&self, rec: ServiceRecord) -> Result<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.services.contains_key(&rec.id) {
            return Err(EK::ValidationError(format!("service id {} already registered", rec.id)).into());
        }
        inner.services.insert(rec.id.clone(), rec);
        Ok(())
    }

    /// `get(id)` (spec section 4.5).
    pub fn get(&self, id: &str) -> Result<ServiceRecord> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .services
            .get(id)
            .cloned()
            .ok_or_else(|| EK::NotFound(id.to_string()).into())
    }

    /// `find(predicate)` (spec section 4.5).
    pub fn find<F: Fn(&ServiceRecord) -> bool>(&self, predicate: F) -> Vec<ServiceRecord> {
        self.inner.lock().expect("registry lock poisoned").services.values().filter(|r| predicate(r)).cloned().collect()
    }

    /// Every registered service, in no particular order.
    pub fn list(&self) -> Vec<ServiceRecord> {
        self.inner.lock().expect("registry lock poisoned").services.values().cloned().collect()
    }

    /// `updateStatus(id, newStatus)` (spec section 4.5): validated by the
    /// state machine; no-op if current equals new. `endpoint` is cleared on
    /// leaving `running` (spec section 4.8).
    pub fn update_status(&self, id: &str, new_status: ServiceStatus) -> Result<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let rec = inner.services.get_mut(id).ok_or_else(|| EK::NotFound(id.to_string()))?;
        rec.status = rec.status.transition(new_status, id)?;
        if rec.status != ServiceStatus::Running {
            rec.endpoint = None;
        }
        Ok(())
    }

    /// Apply a status observed directly from the scheduler (spec section 8
    /// boundary behavior), bypassing the strict transition table for
    /// terminal observations.
    pub fn observe_scheduler_status(&self, id: &str, observed: ServiceStatus) -> Result<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let rec = inner.services.get_mut(id).ok_or_else(|| EK::NotFound(id.to_string()))?;
        rec.status = rec.status.observe_scheduler_state(observed, id)?;
        if rec.status != ServiceStatus::Running {
            rec.endpoint = None;
        }
        Ok(())
    }

    /// Cache a resolved endpoint on the record (spec section 4.6: "Result
    /// cached on the record until the record leaves `running`").
    pub fn set_endpoint(&self, id: &str, endpoint: String) -> Result<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        let rec = inner.services.get_mut(id).ok_or_else(|| EK::NotFound(id.to_string()))?;
        rec.endpoint = Some(endpoint);
        Ok(())
    }

    /// `remove(id)` (spec section 4.5): allowed only from terminal states.
    pub fn remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        match inner.services.get(id) {
            None => return Err(EK::NotFound(id.to_string()).into()),
            Some(rec) if !rec.status.is_terminal() => {
                return Err(EK::ValidationError(format!("service {} is not in a terminal state", id)).into());
            }
            _ => {}
        }
        inner.services.remove(id);
        Ok(())
    }

    /// `registerGroup(grp)` (spec section 4.5).
    pub fn register_group(&self, grp: ServiceGroupRecord) -> Result<()> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.groups.contains_key(&grp.group_id) {
            return Err(EK::ValidationError(format!("group id {} already registered", grp.group_id)).into());
        }
        inner.groups.insert(grp.group_id.clone(), grp);
        Ok(())
    }

    /// `getGroup(gid)` (spec section 4.5).
    pub fn get_group(&self, group_id: &str) -> Result<ServiceGroupRecord> {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| EK::NotFound(group_id.to_string()).into())
    }

    /// `advanceCursor(gid) -> memberIdx` (spec section 4.5). Lock-free
    /// advancement via an atomic integer per group (spec section 5).
    pub fn advance_cursor(&self, group_id: &str) -> Result<usize> {
        let group = self.get_group(group_id)?;
        let len = group.member_service_ids.len();
        if len == 0 {
            return Err(EK::AllReplicasDown(group_id.to_string()).into());
        }
        let idx = group.round_robin_cursor.fetch_add(1, Ordering::SeqCst) % len;
        Ok(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_definitions::structs::Resources;
    use orchestra_definitions::RecipeCategory;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn sample_spec() -> DeploymentSpec {
        DeploymentSpec {
            name: "vllm-single-node".into(),
            category: RecipeCategory::Inference,
            image: "docker://vllm/vllm-openai:latest".into(),
            container_def: None,
            ports: vec![8000],
            environment: BTreeMap::new(),
            resources: Resources { nodes: 1, cpu: 16, memory: "64G".into(), gpu: 1, time_limit_minutes: 180 },
            distributed: None,
            replica: None,
        }
    }

    fn rec(id: &str) -> ServiceRecord {
        ServiceRecord {
            id: id.to_string(),
            name: "svc".into(),
            recipe_name: "inference/vllm-single-node".into(),
            category: RecipeCategory::Inference,
            status: ServiceStatus::Pending,
            config: sample_spec(),
            created_at: Utc::now(),
            group_id: None,
            replica_index: None,
            endpoint: None,
        }
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let reg = ServiceRegistry::new();
        reg.register(rec("job-1")).unwrap();
        assert!(reg.register(rec("job-1")).is_err());
    }

    #[test]
    fn get_missing_is_not_found() {
        let reg = ServiceRegistry::new();
        assert!(reg.get("nope").is_err());
    }

    #[test]
    fn update_status_clears_endpoint_on_leaving_running() {
        let reg = ServiceRegistry::new();
        let mut r = rec("job-1");
        r.status = ServiceStatus::Running;
        r.endpoint = Some("node01:8000".into());
        reg.register(r).unwrap();
        reg.update_status("job-1", ServiceStatus::Completed).unwrap();
        let after = reg.get("job-1").unwrap();
        assert_eq!(after.endpoint, None);
    }

    #[test]
    fn remove_requires_terminal_state() {
        let reg = ServiceRegistry::new();
        reg.register(rec("job-1")).unwrap();
        assert!(reg.remove("job-1").is_err());
        reg.update_status("job-1", ServiceStatus::Cancelled).unwrap();
        assert!(reg.remove("job-1").is_ok());
    }

    #[test]
    fn advance_cursor_round_robins() {
        let reg = ServiceRegistry::new();
        reg.register_group(ServiceGroupRecord {
            group_id: "grp-1".into(),
            recipe_name: "inference/vllm-replicas".into(),
            config: sample_spec(),
            replicas_per_node: 3,
            member_service_ids: vec!["a".into(), "b".into(), "c".into()],
            base_port: 8001,
            round_robin_cursor: Arc::new(AtomicUsize::new(0)),
        }).unwrap();
        let order: Vec<usize> = (0..6).map(|_| reg.advance_cursor("grp-1").unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2]);
    }
}
