//! Endpoints the gateway answers itself.
//!
//! Everything else falls through to [`crate::pipeline::proxy_request`].
use actix_web::{web, HttpResponse, Responder};
use log::*;

// ----------------------------------------------   Health  ----------------------------------------------------
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

/// Registers the health check at `path` for `GET` and `HEAD`. It never looks at credentials.
pub fn health_resource(path: &str) -> actix_web::Resource {
    web::resource(path).name("health").route(web::get().to(health)).route(web::head().to(health))
}

// ----------------------------------------------   Banner  ----------------------------------------------------
pub async fn banner() -> impl Responder {
    HttpResponse::Ok().content_type("text/plain; charset=utf-8").body("Edge gateway is running.")
}
