//! Internal orchestrator HTTP facade (spec section 4.9), bound to loopback
//! only. Consumed by the gateway and by cluster-local clients. Grounded on
//! raftcat's actix-web/sentry-actix stack: a single `AppState` shared via
//! `actix_web::State`, handlers returning `Result<HttpResponse, ApiError>`,
//! an `ApiError` newtype mapping the shared error taxonomy to HTTP status
//! via `find_kind`.
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{http::Method, App, HttpResponse, Json, Path, State};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use orchestra_definitions::{
    find_kind, merge_spec, ClusterConfig, OrchestraErrorKind as EK, Overrides, ServiceStatus, TunnelManager,
};

use builder::BuilderRegistry;
use endpoint_resolver::EndpointResolver;
use handlers::inference::InferenceHandler;
use handlers::vector_db::VectorDbHandler;
use job_client::JobClient;
use recipe_loader::RecipeLoader;
use registry::{ServiceGroupRecord, ServiceRecord, ServiceRegistry};
use replica_group::ReplicaRouter;

/// State shared across every request (spec section 4.9). One instance per
/// orchestrator process.
pub struct AppState {
    pub config: ClusterConfig,
    pub recipes: RecipeLoader,
    pub builders: BuilderRegistry,
    pub jobs: JobClient,
    pub registry: ServiceRegistry,
    pub replicas: ReplicaRouter,
}

impl AppState {
    pub fn new(config: ClusterConfig, tunnel: Arc<TunnelManager>) -> ::Result<AppState> {
        let recipes = RecipeLoader::new(&config);
        let jobs = JobClient::new(&config, tunnel)?;
        Ok(AppState {
            recipes,
            builders: BuilderRegistry::standard(),
            jobs,
            registry: ServiceRegistry::new(),
            replicas: ReplicaRouter::new(),
            config,
        })
    }

    fn resolver(&self) -> EndpointResolver {
        EndpointResolver::new(&self.registry, &self.jobs)
    }

    /// Resolve a path id to the concrete service to actually call: if `id`
    /// names a replica group, ask the load balancer for a live member;
    /// otherwise `id` already names a single service (spec section 4.8).
    fn route_member(&self, id: &str) -> ApiResult<String> {
        if self.registry.get_group(id).is_ok() {
            Ok(self.replicas.route(&self.registry, id)?)
        } else {
            Ok(id.to_string())
        }
    }

    /// Feed a call's outcome back into the circuit breaker. A no-op for
    /// targets that were never routed through a group (nothing is tracking
    /// their health), and for errors that aren't transport failures.
    fn record_outcome<T>(&self, target: &str, result: &::orchestra_definitions::Result<T>) {
        match result {
            Ok(_) => self.replicas.record_success(target),
            Err(e) => match find_kind(e) {
                Some(EK::Timeout(_)) | Some(EK::UpstreamFailure(..)) | Some(EK::TunnelFailure(_)) => {
                    self.replicas.record_failure(target)
                }
                _ => {}
            },
        }
    }
}

/// Wraps the crate's shared error so it can satisfy actix-web's
/// `ResponseError`, mapping a kind to its status code per spec section 7.
struct ApiError(::failure::Error);

impl ::std::fmt::Debug for ApiError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}
impl ::std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl From<::failure::Error> for ApiError {
    fn from(e: ::failure::Error) -> ApiError {
        ApiError(e)
    }
}
impl ::failure::Fail for ApiError {}
impl actix_web::ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let status = find_kind(&self.0).map(|k| k.status_code()).unwrap_or(500);
        let code = actix_web::http::StatusCode::from_u16(status).unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);
        HttpResponse::build(code).json(json!({"error": self.0.to_string()}))
    }
}

type ApiResult<T> = ::std::result::Result<T, ApiError>;

#[derive(Serialize)]
struct ServiceView {
    id: String,
    name: String,
    recipe_name: String,
    category: String,
    status: ServiceStatus,
    group_id: Option<String>,
    replica_index: Option<u32>,
    endpoint: Option<String>,
}

impl From<ServiceRecord> for ServiceView {
    fn from(r: ServiceRecord) -> ServiceView {
        ServiceView {
            id: r.id,
            name: r.name,
            recipe_name: r.recipe_name,
            category: r.category.to_string(),
            status: r.status,
            group_id: r.group_id,
            replica_index: r.replica_index,
            endpoint: r.endpoint,
        }
    }
}

/// The underlying scheduler job id for a record: for replica group members
/// this is the shared group id, not the member's own service id.
fn scheduler_job_id(rec: &ServiceRecord) -> String {
    rec.group_id.clone().unwrap_or_else(|| rec.id.clone())
}

/// Time remaining in a job's allotted wall clock, used to bound the
/// inference readiness probe (spec section 4.7).
fn remaining_budget(rec: &ServiceRecord) -> Duration {
    let total = Duration::from_secs(u64::from(rec.config.resources.time_limit_minutes) * 60);
    let elapsed = Utc::now().signed_duration_since(rec.created_at).to_std().unwrap_or_else(|_| Duration::from_secs(0));
    total.checked_sub(elapsed).unwrap_or_else(|| Duration::from_secs(0))
}

fn list_recipes(state: State<Arc<AppState>>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.recipes.list_all()?))
}

fn get_recipe(state: State<Arc<AppState>>, path: Path<String>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.recipes.load(&path.into_inner())?))
}

#[derive(Deserialize)]
struct DeployRequest {
    recipe: String,
    #[serde(default)]
    config: Overrides,
}

fn deploy_service(state: State<Arc<AppState>>, body: Json<DeployRequest>) -> ApiResult<HttpResponse> {
    let recipe = state.recipes.load(&body.recipe)?;
    let spec = merge_spec(&recipe, &body.config)?;
    let job_name = format!("{}-{}", spec.category, Uuid::new_v4());

    let builder = state
        .builders
        .resolve(spec.category, &spec.name)
        .ok_or_else(|| EK::ValidationError(format!("no builder registered for category {}", spec.category)))?;
    let script = builder.build(&spec, &state.config, &job_name)?.render();
    let job_id = state.jobs.submit(&script)?;

    if let Some(ref replica) = spec.replica.clone() {
        let count = replica.replicas_per_node(spec.resources.gpu);
        let mut member_ids = Vec::with_capacity(count as usize);
        for idx in 0..count {
            let member_id = format!("{}#{}", job_id, idx);
            state.registry.register(ServiceRecord {
                id: member_id.clone(),
                name: spec.name.clone(),
                recipe_name: body.recipe.clone(),
                category: spec.category,
                status: ServiceStatus::Pending,
                config: spec.clone(),
                created_at: Utc::now(),
                group_id: Some(job_id.clone()),
                replica_index: Some(idx),
                endpoint: None,
            })?;
            member_ids.push(member_id);
        }
        state.registry.register_group(ServiceGroupRecord {
            group_id: job_id.clone(),
            recipe_name: body.recipe.clone(),
            config: spec,
            replicas_per_node: count,
            member_service_ids: member_ids.clone(),
            base_port: replica.base_port,
            round_robin_cursor: Arc::new(AtomicUsize::new(0)),
        })?;
        Ok(HttpResponse::Created().json(json!({"group_id": job_id, "member_ids": member_ids})))
    } else {
        state.registry.register(ServiceRecord {
            id: job_id.clone(),
            name: spec.name.clone(),
            recipe_name: body.recipe.clone(),
            category: spec.category,
            status: ServiceStatus::Pending,
            config: spec,
            created_at: Utc::now(),
            group_id: None,
            replica_index: None,
            endpoint: None,
        })?;
        Ok(HttpResponse::Created().json(ServiceView::from(state.registry.get(&job_id)?)))
    }
}

fn list_services(state: State<Arc<AppState>>) -> HttpResponse {
    let views: Vec<ServiceView> = state.registry.list().into_iter().map(ServiceView::from).collect();
    HttpResponse::Ok().json(views)
}

fn get_service(state: State<Arc<AppState>>, path: Path<String>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(ServiceView::from(state.registry.get(&path.into_inner())?)))
}

fn cancel_service(state: State<Arc<AppState>>, path: Path<String>) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let rec = state.registry.get(&id)?;
    state.jobs.cancel(&scheduler_job_id(&rec))?;
    match rec.group_id {
        Some(ref group_id) => {
            let group = state.registry.get_group(group_id)?;
            for member in &group.member_service_ids {
                state.registry.update_status(member, ServiceStatus::Cancelled)?;
            }
        }
        None => state.registry.update_status(&id, ServiceStatus::Cancelled)?,
    }
    Ok(HttpResponse::Ok().finish())
}

/// Pull-based status refresh: queries the scheduler and folds the observed
/// state back into the registry before answering. No background poller
/// (spec section 9 leaves reconciliation cadence open); refreshing on read
/// keeps every mutation inside the registry's single lock.
fn service_status(state: State<Arc<AppState>>, path: Path<String>) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let rec = state.registry.get(&id)?;
    let meta = state.jobs.status(&scheduler_job_id(&rec))?;
    match rec.group_id {
        Some(ref group_id) => {
            let group = state.registry.get_group(group_id)?;
            for member in &group.member_service_ids {
                state.registry.observe_scheduler_status(member, meta.status)?;
            }
        }
        None => state.registry.observe_scheduler_status(&id, meta.status)?,
    }
    Ok(HttpResponse::Ok().json(ServiceView::from(state.registry.get(&id)?)))
}

fn service_logs(state: State<Arc<AppState>>, path: Path<String>) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let rec = state.registry.get(&id)?;
    let (stdout, stderr) = state.jobs.fetch_logs(&scheduler_job_id(&rec))?;
    Ok(HttpResponse::Ok().json(json!({"stdout": stdout, "stderr": stderr})))
}

fn inference_models(state: State<Arc<AppState>>, path: Path<String>) -> ApiResult<HttpResponse> {
    let target = state.route_member(&path.into_inner())?;
    let resolver = state.resolver();
    let handler = InferenceHandler::new(&resolver);
    let result = handler.list_models(&target);
    state.record_outcome(&target, &result);
    Ok(HttpResponse::Ok().json(result?))
}

fn inference_prompt((state, path, body): (State<Arc<AppState>>, Path<String>, Json<Value>)) -> ApiResult<HttpResponse> {
    let target = state.route_member(&path.into_inner())?;
    let rec = state.registry.get(&target)?;
    let remaining = remaining_budget(&rec);
    let resolver = state.resolver();
    let handler = InferenceHandler::new(&resolver);
    let result = handler.prompt(&target, &body, remaining);
    state.record_outcome(&target, &result);
    Ok(HttpResponse::Ok().json(result?))
}

fn inference_metrics(state: State<Arc<AppState>>, path: Path<String>) -> ApiResult<HttpResponse> {
    let target = state.route_member(&path.into_inner())?;
    let resolver = state.resolver();
    let handler = InferenceHandler::new(&resolver);
    let result = handler.get_metrics(&target);
    state.record_outcome(&target, &result);
    Ok(HttpResponse::Ok().content_type("text/plain").body(result?))
}

fn vector_db_collections(state: State<Arc<AppState>>, path: Path<String>) -> ApiResult<HttpResponse> {
    let target = state.route_member(&path.into_inner())?;
    let resolver = state.resolver();
    let handler = VectorDbHandler::new(&resolver);
    let result = handler.list_collections(&target);
    state.record_outcome(&target, &result);
    Ok(HttpResponse::Ok().json(result?))
}

fn vector_db_collection_info(state: State<Arc<AppState>>, path: Path<(String, String)>) -> ApiResult<HttpResponse> {
    let (id, name) = path.into_inner();
    let target = state.route_member(&id)?;
    let resolver = state.resolver();
    let handler = VectorDbHandler::new(&resolver);
    let result = handler.get_collection_info(&target, &name);
    state.record_outcome(&target, &result);
    Ok(HttpResponse::Ok().json(result?))
}

/// Vector-distance metrics a collection may be created with (spec section 3:
/// `distance ∈ {Cosine, Euclid, Dot}`).
const VALID_DISTANCE_METRICS: &[&str] = &["Cosine", "Euclid", "Dot"];

fn validate_distance(distance: &str) -> ApiResult<()> {
    if VALID_DISTANCE_METRICS.contains(&distance) {
        Ok(())
    } else {
        Err(EK::ValidationError(format!(
            "unrecognized distance metric '{}', expected one of {:?}",
            distance, VALID_DISTANCE_METRICS
        ))
        .into())
    }
}

#[derive(Deserialize)]
struct CreateCollectionRequest {
    vector_size: u32,
    distance: String,
}

fn vector_db_create_collection(
    (state, path, body): (State<Arc<AppState>>, Path<(String, String)>, Json<CreateCollectionRequest>),
) -> ApiResult<HttpResponse> {
    validate_distance(&body.distance)?;
    let (id, name) = path.into_inner();
    let target = state.route_member(&id)?;
    let resolver = state.resolver();
    let handler = VectorDbHandler::new(&resolver);
    let result = handler.create_collection(&target, &name, body.vector_size, &body.distance);
    state.record_outcome(&target, &result);
    Ok(HttpResponse::Ok().json(result?))
}

fn vector_db_delete_collection(state: State<Arc<AppState>>, path: Path<(String, String)>) -> ApiResult<HttpResponse> {
    let (id, name) = path.into_inner();
    let target = state.route_member(&id)?;
    let resolver = state.resolver();
    let handler = VectorDbHandler::new(&resolver);
    let result = handler.delete_collection(&target, &name);
    state.record_outcome(&target, &result);
    result?;
    Ok(HttpResponse::Ok().finish())
}

fn vector_db_upsert_points(
    (state, path, body): (State<Arc<AppState>>, Path<(String, String)>, Json<Value>),
) -> ApiResult<HttpResponse> {
    let (id, name) = path.into_inner();
    let target = state.route_member(&id)?;
    let resolver = state.resolver();
    let handler = VectorDbHandler::new(&resolver);
    let result = handler.upsert_points(&target, &name, &body);
    state.record_outcome(&target, &result);
    Ok(HttpResponse::Ok().json(result?))
}

#[derive(Deserialize)]
struct SearchPointsRequest {
    query_vector: Vec<f32>,
    limit: u32,
}

fn vector_db_search_points(
    (state, path, body): (State<Arc<AppState>>, Path<(String, String)>, Json<SearchPointsRequest>),
) -> ApiResult<HttpResponse> {
    let (id, name) = path.into_inner();
    let target = state.route_member(&id)?;
    let resolver = state.resolver();
    let handler = VectorDbHandler::new(&resolver);
    let result = handler.search_points(&target, &name, &body.query_vector, body.limit);
    state.record_outcome(&target, &result);
    Ok(HttpResponse::Ok().json(result?))
}

/// Build the actix-web application over `state` with every route in the
/// table at spec section 6.1.
pub fn build_app(state: Arc<AppState>) -> App<Arc<AppState>> {
    App::with_state(state)
        .resource("/internal/v1/recipes", |r| r.method(Method::GET).with(list_recipes))
        .resource("/internal/v1/recipes/{name}", |r| r.method(Method::GET).with(get_recipe))
        .resource("/internal/v1/services", |r| {
            r.method(Method::POST).with(deploy_service);
            r.method(Method::GET).with(list_services);
        })
        .resource("/internal/v1/services/{id}", |r| {
            r.method(Method::GET).with(get_service);
            r.method(Method::DELETE).with(cancel_service);
        })
        .resource("/internal/v1/services/{id}/status", |r| r.method(Method::GET).with(service_status))
        .resource("/internal/v1/services/{id}/logs", |r| r.method(Method::GET).with(service_logs))
        .resource("/internal/v1/inference/{id}/models", |r| r.method(Method::GET).with(inference_models))
        .resource("/internal/v1/inference/{id}/prompt", |r| r.method(Method::POST).with(inference_prompt))
        .resource("/internal/v1/inference/{id}/metrics", |r| r.method(Method::GET).with(inference_metrics))
        .resource("/internal/v1/vector-db/{id}/collections", |r| r.method(Method::GET).with(vector_db_collections))
        .resource("/internal/v1/vector-db/{id}/collections/{name}", |r| {
            r.method(Method::GET).with(vector_db_collection_info);
            r.method(Method::PUT).with(vector_db_create_collection);
            r.method(Method::DELETE).with(vector_db_delete_collection);
        })
        .resource("/internal/v1/vector-db/{id}/collections/{name}/points", |r| {
            r.method(Method::PUT).with(vector_db_upsert_points)
        })
        .resource("/internal/v1/vector-db/{id}/collections/{name}/points/search", |r| {
            r.method(Method::POST).with(vector_db_search_points)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_job_id_uses_group_id_when_present() {
        let rec = ServiceRecord {
            id: "a#0".into(),
            name: "n".into(),
            recipe_name: "inference/x".into(),
            category: ::orchestra_definitions::RecipeCategory::Inference,
            status: ServiceStatus::Running,
            config: sample_spec(),
            created_at: Utc::now(),
            group_id: Some("job-123".into()),
            replica_index: Some(0),
            endpoint: None,
        };
        assert_eq!(scheduler_job_id(&rec), "job-123");
    }

    #[test]
    fn remaining_budget_is_positive_for_a_fresh_record() {
        let rec = ServiceRecord {
            id: "a".into(),
            name: "n".into(),
            recipe_name: "inference/x".into(),
            category: ::orchestra_definitions::RecipeCategory::Inference,
            status: ServiceStatus::Running,
            config: sample_spec(),
            created_at: Utc::now(),
            group_id: None,
            replica_index: None,
            endpoint: None,
        };
        assert!(remaining_budget(&rec) > Duration::from_secs(0));
    }

    #[test]
    fn validate_distance_accepts_the_three_known_metrics() {
        assert!(validate_distance("Cosine").is_ok());
        assert!(validate_distance("Euclid").is_ok());
        assert!(validate_distance("Dot").is_ok());
    }

    #[test]
    fn validate_distance_rejects_unrecognized_metric() {
        assert!(validate_distance("bogus").is_err());
    }

    fn sample_spec() -> ::orchestra_definitions::DeploymentSpec {
        use orchestra_definitions::structs::Resources;
        use std::collections::BTreeMap;
        ::orchestra_definitions::DeploymentSpec {
            name: "vllm-single-node".into(),
            category: ::orchestra_definitions::RecipeCategory::Inference,
            image: "docker://vllm/vllm-openai:latest".into(),
            container_def: None,
            ports: vec![8000],
            environment: BTreeMap::new(),
            resources: Resources { nodes: 1, cpu: 16, memory: "64G".into(), gpu: 1, time_limit_minutes: 180 },
            distributed: None,
            replica: None,
        }
    }
}
