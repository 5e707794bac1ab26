use std::time::Duration;

use actix_web::{
    http::{
        header::{HeaderValue, AUTHORIZATION},
        StatusCode,
    },
    test::TestRequest,
};

use super::{helpers::*, mocks::MockAuthority};
use crate::{
    errors::IdentityError,
    identity::{HttpIdentityAuthority, IdentityAuthority, IdentityResolver, ResolvedIdentity},
    route_table::RouteTable,
};

fn authority_for(server: &AuthorityServer, timeout_ms: u64) -> HttpIdentityAuthority {
    HttpIdentityAuthority::new(server.whoami_url(), Duration::from_millis(timeout_ms)).unwrap()
}

#[actix_web::test]
async fn whoami_resolves_good_tokens() {
    let server = start_authority();
    let authority = authority_for(&server, 1_000);
    let identity = authority.whoami(b"Bearer good-token").await.unwrap();
    assert_eq!(identity, ResolvedIdentity::new("42", "a@b.com", "user"));
    assert_eq!(server.calls(), 1);
}

#[actix_web::test]
async fn whoami_failures() {
    let server = start_authority();
    let authority = authority_for(&server, 300);
    assert_eq!(authority.whoami(b"Bearer nope").await, Err(IdentityError::Rejected(401)));
    assert!(matches!(authority.whoami(b"Bearer odd-token").await, Err(IdentityError::Malformed(_))));
    assert_eq!(authority.whoami(b"Bearer slow-token").await, Err(IdentityError::Timeout));

    let dead = url::Url::parse(&format!("{}/api/auth/me", dead_origin())).unwrap();
    let authority = HttpIdentityAuthority::new(dead, Duration::from_millis(300)).unwrap();
    assert!(matches!(authority.whoami(b"Bearer good-token").await, Err(IdentityError::Unreachable(_))));
}

#[actix_web::test]
async fn resolver_skips_anonymous_callers() {
    let server = start_authority();
    let resolver = IdentityResolver::new(authority_for(&server, 1_000));
    assert!(resolver.resolve(None).await.is_none());
    assert!(resolver.resolve(Some(b"   ".as_slice())).await.is_none());
    assert_eq!(server.calls(), 0);
    assert!(resolver.resolve(Some(b"Bearer nope".as_slice())).await.is_none());
    assert_eq!(resolver.resolve(Some(b"Bearer good-token".as_slice())).await.unwrap().id, "42");
    assert_eq!(server.calls(), 2);
}

#[actix_web::test]
async fn every_request_is_checked_again() {
    let server = start_authority();
    let backend = start_backend();
    let routes = RouteTable::from_inline(&format!("/api/orders={}", backend.origin())).unwrap();
    for _ in 0..3 {
        let req = TestRequest::post().uri("/api/orders").insert_header(("Authorization", "Bearer good-token"));
        let res = call_gateway(routes.clone(), authority_for(&server, 1_000), req).await;
        assert_eq!(res.status, StatusCode::CREATED);
    }
    assert_eq!(server.calls(), 3);
    assert_eq!(backend.count(), 3);
}

#[actix_web::test]
async fn slow_authority_means_anonymous() {
    let server = start_authority();
    let backend = start_backend();
    let routes = RouteTable::from_inline(&format!("/api/orders={}", backend.origin())).unwrap();

    let req = TestRequest::post().uri("/api/orders").insert_header(("Authorization", "Bearer slow-token"));
    let res = call_gateway(routes.clone(), authority_for(&server, 200), req).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body, "Unauthorized");
    assert_eq!(backend.count(), 0);

    let req = TestRequest::get().uri("/api/orders").insert_header(("Authorization", "Bearer slow-token"));
    let res = call_gateway(routes, authority_for(&server, 200), req).await;
    assert_eq!(res.status, StatusCode::CREATED);
    assert!(backend.received()[0].header_values("x-user-id").is_empty());
}

#[actix_web::test]
async fn credentials_are_passed_on_byte_for_byte() {
    let backend = start_backend();
    let routes = RouteTable::from_inline(&format!("/api/orders={}", backend.origin())).unwrap();
    let credential: &'static [u8] = b"Bearer caf\xe9-token";
    let mut authority = MockAuthority::new();
    authority
        .expect_whoami()
        .withf(move |auth| auth.to_vec() == credential)
        .times(1)
        .returning(|_| Ok(ResolvedIdentity::new("7", "c@d.com", "user")));
    let req = TestRequest::post()
        .uri("/api/orders")
        .insert_header((AUTHORIZATION, HeaderValue::from_bytes(credential).unwrap()))
        .set_payload("{}");
    let res = call_gateway(routes, authority, req).await;
    assert_eq!(res.status, StatusCode::CREATED);
    let received = backend.received();
    assert_eq!(received[0].headers.get("authorization").unwrap().as_bytes(), credential);
    assert_eq!(received[0].header_values("x-user-id"), vec!["7"]);
}
