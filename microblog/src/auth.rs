use crate::error::ApiError;
use anyhow::Result;
use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::Argon2;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Hash a password using argon2id.
pub fn hash_password(pass: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pass.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!(e))?
        .to_string();
    Ok(hash)
}

/// Claims carried by bearer tokens. `sub` is the user id.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Issue a token for a user valid for the provided duration.
pub fn issue_jwt(secret: &[u8], user_id: &Uuid, valid_for: Duration) -> Result<String> {
    let exp = (OffsetDateTime::now_utc() + valid_for).unix_timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )?;
    Ok(token)
}

/// Verify a token and return its claims if valid.
pub fn verify_jwt(secret: &[u8], token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)?;
    Ok(data.claims)
}

/// Identity of whoever issued the current request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewer(Option<Uuid>);

impl Viewer {
    pub fn anonymous() -> Self {
        Self(None)
    }

    pub fn user(id: Uuid) -> Self {
        Self(Some(id))
    }

    /// Resolve the viewer from a bearer token.
    pub fn from_token(secret: &[u8], token: &str) -> Result<Self> {
        let claims = verify_jwt(secret, token)?;
        let id = Uuid::parse_str(&claims.sub)?;
        Ok(Self::user(id))
    }

    pub fn id(&self) -> Option<&Uuid> {
        self.0.as_ref()
    }

    /// The authenticated user id, or `Unauthorized` for anonymous requests.
    pub fn require(&self) -> Result<Uuid, ApiError> {
        self.0.ok_or(ApiError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salted_phc_string() {
        let a = hash_password("secret").unwrap();
        let b = hash_password("secret").unwrap();
        assert!(a.starts_with("$argon2id$"));
        assert_ne!(a, b);
        assert!(!a.contains("secret"));
    }

    #[test]
    fn jwt_issue_and_verify() {
        let secret = b"secret";
        let id = Uuid::new_v4();
        let token = issue_jwt(secret, &id, Duration::seconds(60)).unwrap();
        let claims = verify_jwt(secret, &token).unwrap();
        assert_eq!(claims.sub, id.to_string());
        assert_eq!(Viewer::from_token(secret, &token).unwrap(), Viewer::user(id));
    }

    #[test]
    fn jwt_expiry() {
        let secret = b"secret";
        let token = issue_jwt(secret, &Uuid::new_v4(), Duration::seconds(-120)).unwrap();
        assert!(verify_jwt(secret, &token).is_err());
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = issue_jwt(b"secret", &Uuid::new_v4(), Duration::seconds(60)).unwrap();
        assert!(Viewer::from_token(b"other", &token).is_err());
    }

    #[test]
    fn anonymous_viewer_requires_login() {
        let viewer = Viewer::anonymous();
        assert!(viewer.id().is_none());
        assert!(matches!(viewer.require(), Err(ApiError::Unauthorized)));
        let id = Uuid::new_v4();
        assert_eq!(Viewer::user(id).require().unwrap(), id);
    }
}
