//! Issuer descriptor data structures and helpers.
//!
//! A descriptor captures everything the warden needs to know about the
//! identity provider: the base URL, the derived key-set and session-refresh
//! endpoints, the claims it expects, and the caching/leeway windows applied
//! during verification.

// self
use crate::{_prelude::*, error::ConfigError};

/// Immutable issuer descriptor consumed by the key-set cache and verifier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerDescriptor {
	/// Issuer base URL.
	pub base_url: Url,
	/// JWKS endpoint, derived from the base URL unless overridden.
	pub jwks_url: Url,
	/// Session-refresh endpoint, derived from the base URL unless overridden.
	pub session_url: Url,
	/// Expected `iss` claim; unchecked when absent.
	pub expected_issuer: Option<String>,
	/// Expected `aud` claim; unchecked when absent.
	pub audience: Option<String>,
	/// Clock-skew tolerance applied to `exp`/`nbf` checks.
	pub leeway: Duration,
	/// How long a fetched key set stays fresh.
	pub key_ttl: Duration,
}
impl IssuerDescriptor {
	/// Default clock-skew tolerance.
	pub const DEFAULT_LEEWAY: Duration = Duration::seconds(30);
	/// Default key-set freshness window.
	pub const DEFAULT_KEY_TTL: Duration = Duration::minutes(10);

	/// Creates a new builder for the provided issuer base URL.
	pub fn builder(base_url: Url) -> IssuerDescriptorBuilder {
		IssuerDescriptorBuilder::new(base_url)
	}
}

/// Builder for [`IssuerDescriptor`].
#[derive(Clone, Debug)]
pub struct IssuerDescriptorBuilder {
	base_url: Url,
	jwks_url: Option<Url>,
	session_url: Option<Url>,
	expected_issuer: Option<String>,
	audience: Option<String>,
	leeway: Duration,
	key_ttl: Duration,
}
impl IssuerDescriptorBuilder {
	fn new(base_url: Url) -> Self {
		Self {
			base_url,
			jwks_url: None,
			session_url: None,
			expected_issuer: None,
			audience: None,
			leeway: IssuerDescriptor::DEFAULT_LEEWAY,
			key_ttl: IssuerDescriptor::DEFAULT_KEY_TTL,
		}
	}

	/// Overrides the derived JWKS endpoint.
	pub fn jwks_url(mut self, url: Url) -> Self {
		self.jwks_url = Some(url);

		self
	}

	/// Overrides the derived session-refresh endpoint.
	pub fn session_url(mut self, url: Url) -> Self {
		self.session_url = Some(url);

		self
	}

	/// Requires the `iss` claim to match the provided value.
	pub fn expected_issuer(mut self, issuer: impl Into<String>) -> Self {
		self.expected_issuer = Some(issuer.into());

		self
	}

	/// Requires the `aud` claim to match the provided value.
	pub fn audience(mut self, audience: impl Into<String>) -> Self {
		self.audience = Some(audience.into());

		self
	}

	/// Overrides the clock-skew tolerance (defaults to 30 seconds).
	pub fn leeway(mut self, leeway: Duration) -> Self {
		self.leeway = if leeway.is_negative() { Duration::ZERO } else { leeway };

		self
	}

	/// Overrides the key-set freshness window (defaults to 10 minutes).
	pub fn key_ttl(mut self, ttl: Duration) -> Self {
		self.key_ttl = ttl;

		self
	}

	/// Consumes the builder and produces a validated descriptor.
	pub fn build(self) -> Result<IssuerDescriptor, ConfigError> {
		let jwks_url = match self.jwks_url {
			Some(url) => url,
			None => derive_endpoint(&self.base_url, ".well-known/jwks.json")?,
		};
		let session_url = match self.session_url {
			Some(url) => url,
			None => derive_endpoint(&self.base_url, "session/refresh")?,
		};

		Ok(IssuerDescriptor {
			base_url: self.base_url,
			jwks_url,
			session_url,
			expected_issuer: self.expected_issuer,
			audience: self.audience,
			leeway: self.leeway,
			key_ttl: self.key_ttl,
		})
	}
}

fn derive_endpoint(base: &Url, path: &str) -> Result<Url, ConfigError> {
	let mut base = base.clone();

	if !base.path().ends_with('/') {
		let extended = format!("{}/", base.path());

		base.set_path(&extended);
	}

	base.join(path).map_err(|source| ConfigError::InvalidIssuerUrl { source })
}
