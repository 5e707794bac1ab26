use std::{
    net::{SocketAddr, TcpListener},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use actix_web::{
    http::{header::HeaderMap, Method, StatusCode},
    test,
    test::TestRequest,
    web,
    App,
    HttpRequest,
    HttpResponse,
    HttpServer,
};
use bytes::Bytes;
use log::debug;

use crate::{
    identity::{IdentityAuthority, IdentityResolver},
    pipeline::{proxy_request, PipelineOptions},
    policy::AccessPolicy,
    proxy::Forwarder,
    route_table::RouteTable,
    routes::health_resource,
};

//-------------------------------------------------  Fake backend  -----------------------------------------------------

#[derive(Clone, Debug)]
pub struct Received {
    pub method: Method,
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Received {
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers.get_all(name).map(|v| v.to_str().unwrap().to_string()).collect()
    }
}

#[derive(Default)]
pub struct Recorder(Mutex<Vec<Received>>);

impl Recorder {
    pub fn received(&self) -> Vec<Received> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

/// A backend service that records everything it is sent.
///
/// It answers `201 Created` with an `X-Backend: fake` header and a body naming the path, except for paths ending in
/// `/fail`, which get a `500`.
pub struct Backend {
    pub addr: SocketAddr,
    pub recorder: web::Data<Recorder>,
}

impl Backend {
    pub fn origin(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn received(&self) -> Vec<Received> {
        self.recorder.received()
    }

    pub fn count(&self) -> usize {
        self.recorder.count()
    }
}

async fn record(req: HttpRequest, body: web::Bytes, recorder: web::Data<Recorder>) -> HttpResponse {
    let received =
        Received { method: req.method().clone(), uri: req.uri().to_string(), headers: req.headers().clone(), body };
    recorder.0.lock().unwrap().push(received);
    if req.path().ends_with("/fail") {
        return HttpResponse::InternalServerError().content_type("text/plain").body("backend exploded");
    }
    HttpResponse::Created()
        .insert_header(("X-Backend", "fake"))
        .content_type("text/plain")
        .body(format!("accepted {}", req.path()))
}

pub fn start_backend() -> Backend {
    let recorder = web::Data::new(Recorder::default());
    let data = recorder.clone();
    let server = HttpServer::new(move || App::new().app_data(data.clone()).default_service(web::to(record)))
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    debug!("Fake backend listening on {addr}");
    Backend { addr, recorder }
}

/// An origin that refuses connections.
pub fn dead_origin() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

//-------------------------------------------------  Fake authority  ---------------------------------------------------

/// A stand-in for the identity service's whoami endpoint at `/api/auth/me`.
///
/// * `Bearer good-token` → `200 {"id":"42","email":"a@b.com","role":"user"}`
/// * `Bearer slow-token` → the same, after two seconds
/// * `Bearer odd-token` → `200 true`
/// * anything else → `401`
pub struct AuthorityServer {
    pub addr: SocketAddr,
    pub calls: web::Data<AtomicUsize>,
}

impl AuthorityServer {
    pub fn whoami_url(&self) -> url::Url {
        url::Url::parse(&format!("http://{}/api/auth/me", self.addr)).unwrap()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn whoami(req: HttpRequest, calls: web::Data<AtomicUsize>) -> HttpResponse {
    calls.fetch_add(1, Ordering::SeqCst);
    let auth = req.headers().get("Authorization").and_then(|v| v.to_str().ok()).unwrap_or_default();
    let identity = r#"{"id":"42","email":"a@b.com","role":"user"}"#;
    match auth {
        "Bearer good-token" => HttpResponse::Ok().content_type("application/json").body(identity),
        "Bearer slow-token" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            HttpResponse::Ok().content_type("application/json").body(identity)
        },
        "Bearer odd-token" => HttpResponse::Ok().content_type("application/json").body("true"),
        _ => HttpResponse::Unauthorized().finish(),
    }
}

pub fn start_authority() -> AuthorityServer {
    let calls = web::Data::new(AtomicUsize::new(0));
    let data = calls.clone();
    let server =
        HttpServer::new(move || App::new().app_data(data.clone()).route("/api/auth/me", web::get().to(whoami)))
            .workers(1)
            .bind(("127.0.0.1", 0))
            .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    AuthorityServer { addr, calls }
}

//-------------------------------------------------  Gateway  ----------------------------------------------------------

pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// Sends `req` through a gateway app built around `routes` and `authority`, with the default policy
/// (`/api/auth` exempt, writes under `/api` need an identity, health at `/health`).
pub async fn call_gateway<A>(routes: RouteTable, authority: A, req: TestRequest) -> GatewayResponse
where A: IdentityAuthority + 'static {
    call_gateway_with(routes, authority, PipelineOptions::default(), req).await
}

pub async fn call_gateway_with<A>(
    routes: RouteTable,
    authority: A,
    options: PipelineOptions,
    req: TestRequest,
) -> GatewayResponse
where
    A: IdentityAuthority + 'static,
{
    let app = App::new()
        .app_data(web::Data::new(routes))
        .app_data(web::Data::new(AccessPolicy::default()))
        .app_data(web::Data::new(IdentityResolver::new(authority)))
        .app_data(web::Data::new(Forwarder::new().unwrap()))
        .app_data(web::Data::new(options))
        .service(health_resource("/health"))
        .default_service(web::to(proxy_request::<A>));
    let app = test::init_service(app).await;
    debug!("Making request");
    let res = test::call_service(&app, req.to_request()).await;
    let status = res.status();
    let headers = res.headers().clone();
    let body = String::from_utf8_lossy(&test::read_body(res).await).into_owned();
    GatewayResponse { status, headers, body }
}

/// A gateway on a real socket, for checks that depend on how responses are framed on the wire.
pub fn start_gateway<A>(routes: RouteTable, authority: A) -> SocketAddr
where A: IdentityAuthority + Send + Sync + 'static {
    let routes = web::Data::new(routes);
    let resolver = web::Data::new(IdentityResolver::new(authority));
    let forwarder = web::Data::new(Forwarder::new().unwrap());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(routes.clone())
            .app_data(web::Data::new(AccessPolicy::default()))
            .app_data(resolver.clone())
            .app_data(forwarder.clone())
            .app_data(web::Data::new(PipelineOptions::default()))
            .service(health_resource("/health"))
            .default_service(web::to(proxy_request::<A>))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    debug!("Gateway listening on {addr}");
    addr
}
