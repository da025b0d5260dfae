//! Crate-level error types shared across admission, session, and verification layers.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Request-boundary authentication rejection.
	#[error(transparent)]
	Auth(#[from] AuthError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
}

/// Authentication rejections surfaced at the trust boundary.
///
/// Raw provider or cryptographic error text never reaches callers; every
/// structural and signature failure collapses into this fixed taxonomy, and the
/// detail goes to sanitized diagnostics only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
pub enum AuthError {
	/// The `Authorization` header is absent or structurally invalid.
	#[error("Authentication token is missing or malformed.")]
	MissingToken,
	/// Signature or claim verification failed.
	#[error("Authentication token is invalid.")]
	InvalidToken,
	/// The signature is valid but the `exp` claim has passed.
	#[error("Authentication token has expired.")]
	TokenExpired,
	/// Policy rejection: the principal's email address is unverified.
	#[error("Email address has not been verified.")]
	EmailNotVerified,
}
impl AuthError {
	/// Stable machine-readable code carried in the wire body.
	pub const fn code(self) -> &'static str {
		match self {
			Self::MissingToken => "MISSING_TOKEN",
			Self::InvalidToken => "INVALID_TOKEN",
			Self::TokenExpired => "TOKEN_EXPIRED",
			Self::EmailNotVerified => "EMAIL_NOT_VERIFIED",
		}
	}

	/// HTTP status paired with the code.
	pub const fn status(self) -> u16 {
		match self {
			Self::MissingToken | Self::InvalidToken | Self::TokenExpired => 401,
			Self::EmailNotVerified => 403,
		}
	}

	/// Builds the serializable rejection body.
	pub fn body(self) -> ErrorBody {
		ErrorBody {
			error: ErrorDetail {
				code: self.code(),
				status: self.status(),
				message: Some(self.to_string()),
			},
		}
	}
}

/// Wire-level rejection payload, `{ "error": { "code", "status", "message" } }`.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
	/// Rejection detail envelope.
	pub error: ErrorDetail,
}

/// Inner rejection detail.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorDetail {
	/// Stable machine-readable code.
	pub code: &'static str,
	/// HTTP status associated with the rejection.
	pub status: u16,
	/// Optional human-readable summary; never raw provider text.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Issuer base URL cannot be parsed or extended with a derived path.
	#[error("Issuer URL is invalid.")]
	InvalidIssuerUrl {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A bucket was configured with a non-positive capacity or refill rate.
	#[error("Bucket for `{class}` must have positive capacity and refill rate.")]
	InvalidBucket {
		/// Operation-class label of the offending bucket.
		class: &'static str,
	},
	/// The issuer key set contains no usable key for the requested token.
	#[error("Key set does not contain a usable verification key.")]
	NoUsableKey,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// The key-set endpoint returned an unexpected response.
	#[error("Key-set endpoint returned an unexpected response: {message}.")]
	KeySetEndpoint {
		/// Summary of the failure; never forwarded to request callers.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// The session-refresh endpoint returned an unexpected response.
	#[error("Session endpoint returned an unexpected response: {message}.")]
	SessionEndpoint {
		/// Summary of the failure; never forwarded to request callers.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// An upstream endpoint responded with malformed JSON.
	#[error("Upstream endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling an upstream endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling an upstream endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
