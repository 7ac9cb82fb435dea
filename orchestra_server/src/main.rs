extern crate actix_web;
extern crate env_logger;
extern crate log;
extern crate sentry;
extern crate sentry_actix;

extern crate orchestra_server;

use std::env;
use std::sync::Arc;

use orchestra_server::facade::{build_app, AppState};
use orchestra_server::{ClusterConfig, TunnelManager};

fn main() {
    env_logger::init();
    orchestra_server::init();

    let _sentry_guard = env::var("SENTRY_DSN").ok().map(sentry::init);
    if _sentry_guard.is_some() {
        sentry::integrations::panic::register_panic_handler();
    }

    let config = ClusterConfig::from_env().unwrap_or_else(|e| {
        log::error!("configuration error: {}", e);
        std::process::exit(1);
    });
    let port = config.orchestrator_port;
    let tunnel = Arc::new(TunnelManager::new(config.ssh.clone()));

    let state = Arc::new(AppState::new(config, tunnel).unwrap_or_else(|e| {
        log::error!("failed to initialize orchestrator: {}", e);
        std::process::exit(1);
    }));

    log::info!("orchestrator listening on 127.0.0.1:{}", port);
    actix_web::server::new(move || {
        build_app(state.clone()).middleware(sentry_actix::SentryMiddleware::new())
    })
    .bind(format!("127.0.0.1:{}", port))
    .unwrap_or_else(|e| {
        log::error!("failed to bind 127.0.0.1:{}: {}", port, e);
        std::process::exit(1);
    })
    .run();
}
