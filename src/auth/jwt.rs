//! HS256 JSON Web Tokens.
//!
//! Tokens are `base64url(header).base64url(payload).base64url(hmac)` with no
//! padding. The same signer protects the OAuth `state` round trip so a
//! callback can trust the user id it carries.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JwtError {
    #[error("Malformed token")]
    Malformed,
    #[error("Invalid token signature")]
    InvalidSignature,
    #[error("Token has expired")]
    Expired,
    #[error("Token serialization failed: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    #[serde(rename = "userId")]
    pub user_id: i64,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    /// Keeps tokens issued within the same second distinct.
    #[serde(default)]
    pub jti: String,
}

#[derive(Clone)]
pub struct JwtService {
    secret: Vec<u8>,
    expires_in: Duration,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("secret", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

impl JwtService {
    pub fn new(secret: &str, expires_in: Duration) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            expires_in,
        }
    }

    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    pub fn sign(&self, user_id: i64, email: &str) -> Result<String, JwtError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id,
            email: email.to_string(),
            iat: now,
            exp: now + self.expires_in.num_seconds(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        self.sign_payload(&claims)
    }

    /// Signs any serializable payload. Include an `exp` field to make it expire.
    pub fn sign_payload<T: Serialize>(&self, payload: &T) -> Result<String, JwtError> {
        let payload =
            serde_json::to_vec(payload).map_err(|e| JwtError::Serialization(e.to_string()))?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(HEADER),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let digest = self.mac(signing_input.as_bytes())?.finalize().into_bytes();
        Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(digest)))
    }

    /// Checks signature and expiry and returns the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify_payload(token)
    }

    pub fn verify_payload<T: DeserializeOwned>(&self, token: &str) -> Result<T, JwtError> {
        let (signing_input, signature) = token.rsplit_once('.').ok_or(JwtError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| JwtError::Malformed)?;

        self.mac(signing_input.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| JwtError::InvalidSignature)?;

        let payload = decode_payload_value(token)?;
        if let Some(exp) = payload.get("exp").and_then(Value::as_i64) {
            if exp <= Utc::now().timestamp() {
                return Err(JwtError::Expired);
            }
        }

        serde_json::from_value(payload).map_err(|_| JwtError::Malformed)
    }

    /// Reads the claims without checking the signature.
    pub fn decode(token: &str) -> Result<Claims, JwtError> {
        serde_json::from_value(decode_payload_value(token)?).map_err(|_| JwtError::Malformed)
    }

    /// Issues a fresh token for the same user; the old one must still be valid.
    pub fn refresh(&self, token: &str) -> Result<String, JwtError> {
        let claims = self.verify(token)?;
        self.sign(claims.user_id, &claims.email)
    }

    fn mac(&self, input: &[u8]) -> Result<HmacSha256, JwtError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| JwtError::Serialization(e.to_string()))?;
        mac.update(input);
        Ok(mac)
    }
}

fn decode_payload_value(token: &str) -> Result<Value, JwtError> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(JwtError::Malformed);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| JwtError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| JwtError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> JwtService {
        JwtService::new("test-secret-with-enough-length-1234567890", Duration::days(7))
    }

    #[test]
    fn test_sign_and_verify() {
        let jwt = service();
        let token = jwt.sign(42, "ada@example.com").unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = jwt.verify(&token).unwrap();
        assert_eq!(claims.user_id, 42);
        assert_eq!(claims.email, "ada@example.com");
        assert_eq!(claims.exp - claims.iat, Duration::days(7).num_seconds());
    }

    #[test]
    fn test_payload_uses_camel_case_user_id() {
        let token = service().sign(7, "x@example.com").unwrap();
        let payload = decode_payload_value(&token).unwrap();
        assert_eq!(payload["userId"], 7);
    }

    #[test]
    fn test_tampered_token_rejected() {
        let jwt = service();
        let token = jwt.sign(1, "a@example.com").unwrap();
        let other = jwt.sign(2, "b@example.com").unwrap();

        // Splice the second payload onto the first signature
        let first: Vec<&str> = token.split('.').collect();
        let second: Vec<&str> = other.split('.').collect();
        let forged = format!("{}.{}.{}", first[0], second[1], first[2]);

        assert_eq!(jwt.verify(&forged), Err(JwtError::InvalidSignature));
    }

    #[test]
    fn test_tokens_signed_together_differ() {
        let jwt = service();
        let first = jwt.sign(1, "a@example.com").unwrap();
        let second = jwt.sign(1, "a@example.com").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = service().sign(1, "a@example.com").unwrap();
        let other = JwtService::new("a-completely-different-secret-value!!", Duration::days(1));
        assert_eq!(other.verify(&token), Err(JwtError::InvalidSignature));
    }

    #[test]
    fn test_expired_token_rejected() {
        let jwt = service();
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id: 1,
            email: "a@example.com".into(),
            iat: now - 100,
            exp: now - 10,
            jti: String::new(),
        };
        let token = jwt.sign_payload(&claims).unwrap();
        assert_eq!(jwt.verify(&token), Err(JwtError::Expired));
        // Decoding without verification still works
        assert_eq!(JwtService::decode(&token).unwrap().user_id, 1);
    }

    #[test]
    fn test_malformed_tokens() {
        let jwt = service();
        assert_eq!(jwt.verify("garbage"), Err(JwtError::Malformed));
        assert_eq!(JwtService::decode("a.b"), Err(JwtError::Malformed));
        assert_eq!(JwtService::decode("a.!!!.c"), Err(JwtError::Malformed));
    }

    #[test]
    fn test_refresh_keeps_identity() {
        let jwt = service();
        let token = jwt.sign(9, "nine@example.com").unwrap();
        let refreshed = jwt.refresh(&token).unwrap();
        let claims = jwt.verify(&refreshed).unwrap();
        assert_eq!(claims.user_id, 9);
        assert_eq!(claims.email, "nine@example.com");
    }

    #[test]
    fn test_custom_payload_round_trip() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct State {
            user_id: i64,
            exp: i64,
        }

        let jwt = service();
        let state = State {
            user_id: 5,
            exp: Utc::now().timestamp() + 600,
        };
        let token = jwt.sign_payload(&state).unwrap();
        assert_eq!(jwt.verify_payload::<State>(&token).unwrap(), state);
    }
}
