#[macro_use]
extern crate serde_derive;
extern crate serde;
#[macro_use]
extern crate serde_json;

extern crate reqwest;
extern crate openssl_probe;
extern crate bytes;
extern crate futures;

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
pub use orchestra_definitions::TunnelManager;

/// Gateway configuration, read from the environment at startup (spec
/// section 4.10).
pub mod config;

/// Request forwarding over the tunnel to the orchestrator's internal
/// facade (spec section 4.10).
pub mod proxy;

/// Smart initialiser: sets up the SSL cert env vars every HTTPS client in
/// this process needs before the first request goes out.
pub fn init() {
    openssl_probe::init_ssl_cert_env_vars();
}
