//! Log sanitization: a redacting secret wrapper plus a recursive scrub for
//! free-form structured payloads.
//!
//! Known-sensitive values are carried in [`TokenSecret`], whose formatters can
//! never leak the inner string. Payloads whose shape is not known at compile
//! time (provider responses, request snapshots) go through [`sanitize`] before
//! reaching any log sink.

// self
use crate::_prelude::*;

/// Marker substituted for every redacted value.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Key names whose values are always redacted, matched case-insensitively at
/// any nesting depth.
pub const SENSITIVE_KEYS: &[&str] = &[
	"token",
	"authorization",
	"access_token",
	"refresh_token",
	"id_token",
	"session_token",
	"client_secret",
	"api_key",
	"apikey",
	"password",
	"secret",
	"private_key",
	"cookie",
	"set-cookie",
	"jwt",
];

/// Redacted secret wrapper keeping bearer material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` when the wrapped value is empty.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl From<String> for TokenSecret {
	fn from(value: String) -> Self {
		Self(value)
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&REDACTION_MARKER).finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(REDACTION_MARKER)
	}
}

/// Returns a copy of `payload` with every sensitive value replaced by
/// [`REDACTION_MARKER`].
///
/// Matching is case-insensitive on key names from [`SENSITIVE_KEYS`] and
/// applies at any nesting depth, including inside arrays. Container shapes and
/// all other keys survive unchanged; the input is never mutated.
pub fn sanitize(payload: &Value) -> Value {
	match payload {
		Value::Object(map) => Value::Object(
			map.iter()
				.map(|(key, value)| {
					if is_sensitive_key(key) {
						(key.clone(), Value::String(REDACTION_MARKER.into()))
					} else {
						(key.clone(), sanitize(value))
					}
				})
				.collect(),
		),
		Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
		other => other.clone(),
	}
}

fn is_sensitive_key(key: &str) -> bool {
	SENSITIVE_KEYS.iter().any(|candidate| key.eq_ignore_ascii_case(candidate))
}
