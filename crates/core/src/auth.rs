//! Builder admission authentication.
//!
//! Validates the HMAC bundle every submission carries: api key, signature,
//! millisecond timestamp (replay window) and passphrase. The signature
//! canonicalization is byte-exact, `HMAC-SHA256(secret, ts || method || path
//! || body)` in lowercase hex; all secret comparisons are constant-time.

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::custody::KeyCustody;
use crate::error::{AuthError, RelayerError};
use crate::store::Store;
use crate::types::{now_ms, AccountStatus, BuilderRecord};

type HmacSha256 = Hmac<Sha256>;

/// The authentication material extracted from a request.
///
/// Transports populate the first four fields from the `poly-builder-api-key`,
/// `poly-builder-signature`, `poly-builder-timestamp` and
/// `poly-builder-passphrase` headers. `method`, `path` and `body` are the
/// exact bytes the client signed over; no normalization is applied on either
/// side.
#[derive(Debug, Clone, Default)]
pub struct AuthBundle {
    pub api_key: String,
    pub signature: String,
    pub timestamp: String,
    pub passphrase: String,
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Validates builder credentials against the store.
pub struct Authenticator {
    store: Arc<Store>,
    custody: Arc<dyn KeyCustody>,
    window_ms: i64,
}

impl Authenticator {
    pub fn new(store: Arc<Store>, custody: Arc<dyn KeyCustody>, window_ms: i64) -> Self {
        Self {
            store,
            custody,
            window_ms,
        }
    }

    /// Canonical signature for a request. Exposed so client tooling and
    /// tests can produce valid bundles.
    pub fn compute_signature(
        secret: &str,
        timestamp_ms: i64,
        method: &str,
        path: &str,
        body: &str,
    ) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(timestamp_ms.to_string().as_bytes());
        mac.update(method.as_bytes());
        mac.update(path.as_bytes());
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Validate a bundle and return the builder it authenticates.
    ///
    /// Authentication failures come back as `Unauthenticated`; only store or
    /// custody breakage surfaces as `Internal`.
    pub fn validate(&self, bundle: &AuthBundle) -> Result<BuilderRecord, RelayerError> {
        self.check_fields(bundle)?;
        self.check_timestamp(&bundle.timestamp)?;

        let builder = self
            .store
            .builder_by_api_key(&bundle.api_key)?
            .ok_or(AuthError::UnknownBuilder)?;
        if builder.status != AccountStatus::Active {
            return Err(AuthError::InactiveBuilder.into());
        }

        let passphrase = self.custody.decrypt(&builder.encrypted_passphrase)?;
        if !bool::from(passphrase.as_bytes().ct_eq(bundle.passphrase.as_bytes())) {
            return Err(AuthError::BadPassphrase.into());
        }

        let secret = self.custody.decrypt(&builder.encrypted_secret)?;
        let timestamp_ms: i64 = bundle
            .timestamp
            .parse()
            .map_err(|_| AuthError::BadTimestamp)?;
        let expected = Self::compute_signature(
            &secret,
            timestamp_ms,
            &bundle.method,
            &bundle.path,
            &bundle.body,
        );
        if !bool::from(expected.as_bytes().ct_eq(bundle.signature.as_bytes())) {
            return Err(AuthError::BadSignature.into());
        }

        debug!(api_key = %builder.api_key, "Builder authenticated");
        Ok(builder)
    }

    fn check_fields(&self, bundle: &AuthBundle) -> Result<(), AuthError> {
        if bundle.api_key.is_empty() {
            return Err(AuthError::MissingField("api_key"));
        }
        if bundle.signature.is_empty() {
            return Err(AuthError::MissingField("signature"));
        }
        if bundle.timestamp.is_empty() {
            return Err(AuthError::MissingField("timestamp"));
        }
        if bundle.passphrase.is_empty() {
            return Err(AuthError::MissingField("passphrase"));
        }
        Ok(())
    }

    fn check_timestamp(&self, timestamp: &str) -> Result<(), AuthError> {
        let timestamp_ms: i64 = timestamp.parse().map_err(|_| AuthError::BadTimestamp)?;
        let drift = (now_ms() - timestamp_ms).abs();
        if drift > self.window_ms {
            return Err(AuthError::BadTimestamp);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{custody, seed_builder, store};

    const WINDOW_MS: i64 = 300_000;

    struct Fixture {
        authenticator: Authenticator,
    }

    fn fixture() -> Fixture {
        let store = store();
        let custody = custody();
        seed_builder(&store, custody.as_ref(), "builder-1", "hmac-secret", "open-sesame");
        Fixture {
            authenticator: Authenticator::new(store, custody, WINDOW_MS),
        }
    }

    fn bundle(timestamp_ms: i64) -> AuthBundle {
        let body = r#"{"to":"0x00"}"#;
        AuthBundle {
            api_key: "builder-1".into(),
            signature: Authenticator::compute_signature(
                "hmac-secret",
                timestamp_ms,
                "POST",
                "/v1/submit",
                body,
            ),
            timestamp: timestamp_ms.to_string(),
            passphrase: "open-sesame".into(),
            method: "POST".into(),
            path: "/v1/submit".into(),
            body: body.into(),
        }
    }

    fn unwrap_auth_err(result: Result<BuilderRecord, RelayerError>) -> AuthError {
        match result {
            Err(RelayerError::Unauthenticated(err)) => err,
            other => panic!("expected auth failure, got {other:?}"),
        }
    }

    #[test]
    fn test_round_trip() {
        let fixture = fixture();
        let builder = fixture.authenticator.validate(&bundle(now_ms())).unwrap();
        assert_eq!(builder.api_key, "builder-1");
    }

    #[test]
    fn test_replay_rejected() {
        let fixture = fixture();
        // 10 minutes old, window is 5
        let stale = now_ms() - 600_000;
        let err = unwrap_auth_err(fixture.authenticator.validate(&bundle(stale)));
        assert_eq!(err, AuthError::BadTimestamp);

        // Timestamps from the future are just as invalid
        let future = now_ms() + 600_000;
        let err = unwrap_auth_err(fixture.authenticator.validate(&bundle(future)));
        assert_eq!(err, AuthError::BadTimestamp);
    }

    #[test]
    fn test_garbled_timestamp_rejected() {
        let fixture = fixture();
        let mut bundle = bundle(now_ms());
        bundle.timestamp = "not-a-number".into();
        let err = unwrap_auth_err(fixture.authenticator.validate(&bundle));
        assert_eq!(err, AuthError::BadTimestamp);
    }

    #[test]
    fn test_missing_fields_rejected() {
        let fixture = fixture();
        for field in ["api_key", "signature", "timestamp", "passphrase"] {
            let mut bundle = bundle(now_ms());
            match field {
                "api_key" => bundle.api_key.clear(),
                "signature" => bundle.signature.clear(),
                "timestamp" => bundle.timestamp.clear(),
                _ => bundle.passphrase.clear(),
            }
            let err = unwrap_auth_err(fixture.authenticator.validate(&bundle));
            assert_eq!(err, AuthError::MissingField(field));
        }
    }

    #[test]
    fn test_unknown_builder_rejected() {
        let fixture = fixture();
        let mut bundle = bundle(now_ms());
        bundle.api_key = "nobody".into();
        let err = unwrap_auth_err(fixture.authenticator.validate(&bundle));
        assert_eq!(err, AuthError::UnknownBuilder);
    }

    #[test]
    fn test_inactive_builder_rejected() {
        let store = store();
        let custody = custody();
        let mut builder =
            seed_builder(&store, custody.as_ref(), "builder-1", "hmac-secret", "open-sesame");
        builder.status = crate::types::AccountStatus::Inactive;
        store.put_builder(&builder).unwrap();

        let authenticator = Authenticator::new(store, custody, WINDOW_MS);
        let err = unwrap_auth_err(authenticator.validate(&bundle(now_ms())));
        assert_eq!(err, AuthError::InactiveBuilder);
    }

    #[test]
    fn test_bad_passphrase_rejected() {
        let fixture = fixture();
        let mut bundle = bundle(now_ms());
        bundle.passphrase = "wrong".into();
        let err = unwrap_auth_err(fixture.authenticator.validate(&bundle));
        assert_eq!(err, AuthError::BadPassphrase);
    }

    #[test]
    fn test_tampered_body_rejected() {
        let fixture = fixture();
        let mut bundle = bundle(now_ms());
        bundle.body.push(' ');
        let err = unwrap_auth_err(fixture.authenticator.validate(&bundle));
        assert_eq!(err, AuthError::BadSignature);
    }

    #[test]
    fn test_signature_comparison_is_byte_exact() {
        let fixture = fixture();
        let mut bundle = bundle(now_ms());
        // Same MAC, wrong case: canonical form is lowercase hex only
        bundle.signature = bundle.signature.to_uppercase();
        let err = unwrap_auth_err(fixture.authenticator.validate(&bundle));
        assert_eq!(err, AuthError::BadSignature);
    }

    #[test]
    fn test_signature_covers_method_and_path() {
        let fixture = fixture();
        let mut bundle = bundle(now_ms());
        bundle.method = "GET".into();
        let err = unwrap_auth_err(fixture.authenticator.validate(&bundle));
        assert_eq!(err, AuthError::BadSignature);

        let mut bundle2 = bundle.clone();
        bundle2.method = "POST".into();
        bundle2.path = "/v1/submit/batch".into();
        let err = unwrap_auth_err(fixture.authenticator.validate(&bundle2));
        assert_eq!(err, AuthError::BadSignature);
    }
}
