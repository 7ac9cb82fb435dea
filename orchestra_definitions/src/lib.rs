#![allow(renamed_and_removed_lints)]

#[macro_use]
extern crate serde_derive;
extern crate serde_yaml;
extern crate serde_json;
extern crate serde;

#[macro_use]
extern crate tera;
#[cfg(feature = "filesystem")]
extern crate walkdir;

#[cfg(feature = "filesystem")]
extern crate dirs;

#[macro_use]
extern crate log;

extern crate reqwest;

extern crate regex;

extern crate uuid;
extern crate chrono;
extern crate ssh2;

#[macro_use] extern crate failure;

pub use failure::Error; //Fail
pub type Result<T> = std::result::Result<T, Error>;

/// Cluster-wide configuration, read once from the environment at startup
pub mod config;
pub use config::ClusterConfig;

/// Structs for the recipe and deployment spec
pub mod structs;

pub mod recipe;
pub use recipe::{Recipe, RecipeCategory};

pub mod deployment;
pub use deployment::{DeploymentSpec, Overrides, PartialResources};

/// Service/group lifecycle states and the transition table
pub mod states;
pub use states::{GroupStatus, ServiceStatus};

/// File backing for the recipe catalog
#[cfg(feature = "filesystem")]
pub mod filebacked;
#[cfg(feature = "filesystem")]
pub use filebacked::RecipeCatalog;

// Merge behaviour: recipe + user overrides -> deployment spec
mod merge;
pub use merge::merge_spec;

/// Computational helpers: replica port allocation, wait-time estimates
pub mod math;

/// A renderer of `tera` templates (jinja style)
///
/// Used for the environment and run sections of generated batch scripts.
pub mod template;

/// The shared error taxonomy (see spec section 7)
pub mod error;
pub use error::{find_kind, OrchestraErrorKind};

/// An SSH tunnel manager using `ssh2`, plus a thin `reqwest` client for
/// talking to the workload manager's REST API over the forwarded port.
pub mod tunnel;
pub use tunnel::TunnelManager;
