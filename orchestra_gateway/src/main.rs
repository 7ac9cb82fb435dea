extern crate actix_web;
extern crate env_logger;
extern crate log;
extern crate sentry;
extern crate sentry_actix;

extern crate orchestra_gateway;

use std::env;
use std::sync::Arc;

use actix_web::{server, App};

use orchestra_gateway::config::GatewayConfig;
use orchestra_gateway::proxy::{forward, Proxy};
use orchestra_gateway::TunnelManager;

fn main() {
    env_logger::init();
    orchestra_gateway::init();

    let _sentry_guard = env::var("SENTRY_DSN").ok().map(sentry::init);
    if _sentry_guard.is_some() {
        sentry::integrations::panic::register_panic_handler();
    }

    let config = GatewayConfig::from_env().unwrap_or_else(|e| {
        log::error!("configuration error: {}", e);
        std::process::exit(1);
    });
    let port = config.gateway_port;
    let tunnel = Arc::new(TunnelManager::new(config.ssh.clone()));
    let proxy = Arc::new(Proxy::new(tunnel, config.orchestrator.clone()));

    log::info!("gateway listening on 0.0.0.0:{}", port);
    server::new(move || {
        App::with_state(proxy.clone())
            .middleware(sentry_actix::SentryMiddleware::new())
            .resource("/{tail:.*}", |r| r.f(forward))
    })
    .bind(format!("0.0.0.0:{}", port))
    .unwrap_or_else(|e| {
        log::error!("failed to bind 0.0.0.0:{}: {}", port, e);
        std::process::exit(1);
    })
    .run();
}
