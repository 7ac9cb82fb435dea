#![recursion_limit = "1024"]
#![allow(renamed_and_removed_lints)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
#[macro_use]
extern crate serde_json;

extern crate reqwest;
extern crate openssl_probe;
extern crate chrono;
extern crate uuid;
extern crate regex;

// internal HTTP facade
extern crate actix;
extern crate actix_web;
extern crate sentry;
extern crate sentry_actix;

#[macro_use]
extern crate log;

#[macro_use]
extern crate failure;

pub use failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

extern crate orchestra_definitions;
pub use orchestra_definitions::{
    ClusterConfig, DeploymentSpec, GroupStatus, OrchestraErrorKind, Recipe, RecipeCategory, ServiceStatus,
};
pub use orchestra_definitions::structs;
pub use orchestra_definitions::{merge_spec, RecipeCatalog, TunnelManager};

/// Recipe catalog access, scoped to a single orchestrator process (spec
/// section 4.2).
pub mod recipe_loader;

/// Builder registry and the category/recipe-specific script builders
/// (Strategy pattern, spec section 4.3).
pub mod builder;

/// The workload-manager REST client reached through the tunnel (spec
/// section 4.4).
pub mod job_client;

/// The process-wide in-memory service and group registry (spec section 4.5).
pub mod registry;

/// Endpoint resolution for running services (spec section 4.6).
pub mod endpoint_resolver;

/// Typed service handlers: inference and vector-db (spec section 4.7).
pub mod handlers;

/// Replica group coordination and load balancing (spec section 4.8).
pub mod replica_group;

/// The internal HTTP facade consumed by the gateway and cluster-local
/// clients (spec section 4.9).
pub mod facade;

/// Smart initialiser: sets up the SSL cert env vars every HTTPS client in
/// this process needs before the first request goes out.
pub fn init() {
    openssl_probe::init_ssl_cert_env_vars();
}
