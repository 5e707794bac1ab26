use std::time::Duration;

use actix_cors::Cors;
use actix_web::{
    dev::Server,
    http::KeepAlive,
    middleware::{Condition, Logger},
    web,
    App,
    HttpServer,
};
use log::info;

use crate::{
    config::GatewayConfig,
    errors::GatewayError,
    identity::{HttpIdentityAuthority, IdentityAuthority, IdentityResolver},
    pipeline::{proxy_request, PipelineOptions},
    proxy::Forwarder,
    routes::{banner, health_resource},
};

pub async fn run_server(config: GatewayConfig) -> Result<(), GatewayError> {
    let authority = HttpIdentityAuthority::new(config.identity.whoami_url.clone(), config.identity.timeout)?;
    info!("🔐️ Resolving identities against {}", authority.whoami_url());
    let srv = create_server_instance(config, authority)?;
    srv.await.map_err(GatewayError::IOError)
}

/// Builds the gateway around any identity authority, so that tests can substitute their own.
///
/// The route table, policy, resolver and upstream client are built once and shared read-only by every worker.
pub fn create_server_instance<A>(config: GatewayConfig, authority: A) -> Result<Server, GatewayError>
where A: IdentityAuthority + Clone + Send + 'static {
    let forwarder = Forwarder::new()?;
    for route in config.routes.routes() {
        info!("🗺️ {} => {} ({})", route.prefix(), route.origin(), route.rewrite());
    }
    let routes = web::Data::new(config.routes.clone());
    let policy = web::Data::new(config.access_policy());
    let forwarder = web::Data::new(forwarder);
    let options = web::Data::new(PipelineOptions {
        max_body_size: config.max_body_size,
        forwarding: config.forwarding_options(),
    });
    let health_path = config.health_path.clone();
    let serve_banner = config.routes.match_path("/").is_none();
    let cors_permissive = config.cors_permissive;
    let srv = HttpServer::new(move || {
        // Each worker gets its own resolver; the authority's HTTP client is shared through its clone.
        let resolver = web::Data::new(IdentityResolver::new(authority.clone()));
        let app = App::new()
            .wrap(Condition::new(cors_permissive, Cors::permissive()))
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %r").log_target("egw::access_log"))
            .app_data(routes.clone())
            .app_data(policy.clone())
            .app_data(forwarder.clone())
            .app_data(options.clone())
            .app_data(resolver)
            .service(health_resource(&health_path));
        let app = if serve_banner { app.route("/", web::get().to(banner)) } else { app };
        app.default_service(web::to(proxy_request::<A>))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}
