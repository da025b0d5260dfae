//! Transport primitives for issuer endpoints (key set, session refresh).
//!
//! The [`GateHttpClient`] trait is the crate's only dependency on an HTTP
//! stack. Implementations return an [`HttpPayload`] that carries the status
//! code and a parsed `Retry-After` hint alongside the body, so the error layer
//! can classify upstream failures with consistent metadata.

// std
use std::ops::Deref;
// crates.io
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderMap, RETRY_AFTER};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::TransientError, error::TransportError};

/// Boxed future returned by [`GateHttpClient`] methods.
pub type HttpFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpPayload, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP transports used for issuer endpoint calls.
///
/// Implementations must be `Send + Sync + 'static` so they can be shared
/// behind `Arc` across the key-set cache and the refresh backend, and the
/// futures they return must be `Send` for the lifetime of the in-flight call.
pub trait GateHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Executes a GET against `url` and captures the response payload.
	fn get(&self, url: &Url) -> HttpFuture<'_>;

	/// Executes a POST with a JSON body against `url`.
	fn post_json(&self, url: &Url, body: Value) -> HttpFuture<'_>;
}

/// Response snapshot captured from an upstream endpoint.
#[derive(Clone, Debug)]
pub struct HttpPayload {
	/// HTTP status code of the response.
	pub status: u16,
	/// Retry-After hint expressed as a relative duration, when supplied.
	pub retry_after: Option<Duration>,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl HttpPayload {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Decodes the body as JSON into `T`, reporting the failing path on error.
	pub fn decode_json<T>(&self) -> Result<T, TransientError>
	where
		T: for<'de> Deserialize<'de>,
	{
		let mut deserializer = serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| TransientError::ResponseParse { source, status: Some(self.status) })
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one
/// place. Issuer endpoints return their results directly, so the wrapped
/// client should not follow redirects; configure any custom [`ReqwestClient`]
/// accordingly before passing it in.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestGateClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestGateClient {
	/// Wraps an existing [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	async fn capture(response: reqwest::Response) -> Result<HttpPayload, TransportError> {
		let status = response.status().as_u16();
		let retry_after = parse_retry_after(response.headers());
		let body = response.bytes().await?.to_vec();

		Ok(HttpPayload { status, retry_after, body })
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestGateClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestGateClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl GateHttpClient for ReqwestGateClient {
	fn get(&self, url: &Url) -> HttpFuture<'_> {
		let request = self.0.get(url.as_str());

		Box::pin(async move { Self::capture(request.send().await?).await })
	}

	fn post_json(&self, url: &Url, body: Value) -> HttpFuture<'_> {
		let request = self.0.post(url.as_str()).json(&body);

		Box::pin(async move { Self::capture(request.send().await?).await })
	}
}

#[cfg(feature = "reqwest")]
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	retry_after_from_str(raw)
}

/// Parses a `Retry-After` value in either delta-seconds or RFC 2822 form.
pub fn retry_after_from_str(raw: &str) -> Option<Duration> {
	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(secs as i64));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
