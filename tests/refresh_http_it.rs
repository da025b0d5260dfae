#![cfg(feature = "reqwest")]

mod common;

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
use serde_json::json;
use time::{Duration, OffsetDateTime};
// self
use storage_warden::{
	error::{Error, TransientError},
	http::ReqwestGateClient,
	redact::{REDACTION_MARKER, TokenSecret},
	session::{HttpRefreshBackend, RefreshBackend, TokenCache},
};

const SESSION_PATH: &str = "/auth/session/refresh";

fn backend_for(server: &MockServer) -> HttpRefreshBackend {
	let client = Arc::new(ReqwestGateClient::default());
	let descriptor = common::descriptor(&server.url("/auth"), Duration::minutes(10));

	HttpRefreshBackend::new(client, &descriptor, TokenSecret::new("my-refresh-secret"))
}

#[tokio::test]
async fn refresh_round_trip_populates_the_cache() {
	let server = MockServer::start_async().await;
	let expires_at = (OffsetDateTime::now_utc() + Duration::hours(1)).unix_timestamp();
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path(SESSION_PATH)
				.json_body(json!({ "refresh_token": "my-refresh-secret" }));
			then.status(200)
				.json_body(json!({ "access_token": "fresh-bearer", "expires_at": expires_at }));
		})
		.await;
	let cache = TokenCache::new(Arc::new(backend_for(&server)));
	let bearer = cache.token().await.expect("The refresh round-trip should grant a bearer.");

	assert_eq!(bearer.expose(), "fresh-bearer");
	assert_eq!(mock.hits_async().await, 1);

	let info = cache.expiration().expect("A cached bearer should report expiry info.");

	assert!(!info.should_refresh);
	assert_eq!(info.expires_at.unix_timestamp(), expires_at);
}

#[tokio::test]
async fn provider_error_bodies_are_sanitized_before_diagnostics() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path(SESSION_PATH);
			then.status(400).json_body(json!({
				"error": "invalid_grant",
				"refresh_token": "leaked-secret",
			}));
		})
		.await;
	let backend = backend_for(&server);
	let failure = backend
		.refresh_session()
		.await
		.expect_err("A 400 from the session endpoint must fail the refresh.");

	match failure {
		Error::Transient(TransientError::SessionEndpoint { message, status, .. }) => {
			assert_eq!(status, Some(400));
			assert!(message.contains("invalid_grant"));
			assert!(message.contains(REDACTION_MARKER));
			assert!(
				!message.contains("leaked-secret"),
				"Provider error bodies must be redacted before they can reach a sink."
			);
		},
		other => panic!("Expected a session-endpoint transient error, got {other:?}."),
	}
}

#[tokio::test]
async fn retry_after_hints_survive_error_mapping() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path(SESSION_PATH);
			then.status(503).header("Retry-After", "120").body("overloaded");
		})
		.await;
	let backend = backend_for(&server);
	let failure = backend
		.refresh_session()
		.await
		.expect_err("A 503 from the session endpoint must fail the refresh.");

	match failure {
		Error::Transient(TransientError::SessionEndpoint { retry_after, status, .. }) => {
			assert_eq!(status, Some(503));
			assert_eq!(retry_after, Some(Duration::seconds(120)));
		},
		other => panic!("Expected a session-endpoint transient error, got {other:?}."),
	}
}

#[tokio::test]
async fn refresh_failures_surface_as_no_token_at_the_cache_boundary() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path(SESSION_PATH);
			then.status(500).body("boom");
		})
		.await;
	let cache = TokenCache::new(Arc::new(backend_for(&server)));

	assert!(cache.token().await.is_none(), "Refresh failures must degrade to no-token.");
	assert!(cache.expiration().is_none());
	assert_eq!(mock.hits_async().await, 1);

	let metrics = cache.metrics();

	assert_eq!(metrics.attempts(), 1);
	assert_eq!(metrics.failures(), 1);
}

#[tokio::test]
async fn malformed_grant_bodies_fail_the_refresh() {
	let server = MockServer::start_async().await;
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path(SESSION_PATH);
			then.status(200).json_body(json!({ "access_token": 42 }));
		})
		.await;
	let backend = backend_for(&server);

	assert!(matches!(
		backend
			.refresh_session()
			.await
			.expect_err("A malformed grant body must fail the refresh."),
		Error::Transient(TransientError::ResponseParse { status: Some(200), .. })
	));
}
