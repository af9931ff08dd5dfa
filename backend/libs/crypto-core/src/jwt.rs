/// Shared JWT module for the chat services
///
/// Tokens are HS256-signed with a shared secret and carry `{userId, email, name}`.
/// The identity service issues them; the chat service only validates.
///
/// ## Usage
///
/// Services must call `initialize_jwt_secret()` during startup before any JWT operations:
///
/// ```rust,ignore
/// use crypto_core::jwt;
///
/// let secret = std::env::var("JWT_SECRET")?;
/// jwt::initialize_jwt_secret(&secret, 3600)?;
/// let claims = jwt::validate_token(token)?.claims;
/// ```
use anyhow::{anyhow, Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, TokenData,
    Validation,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Default token lifetime when none is configured
pub const DEFAULT_EXPIRY_SECS: i64 = 3600;

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

// ============================================================================
// Data Structures
// ============================================================================

/// Bearer token claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User ID as UUID string
    #[serde(rename = "userId")]
    pub user_id: String,
    pub email: String,
    /// Display name
    pub name: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn user_uuid(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.user_id).map_err(|e| anyhow!("Invalid user ID format in token: {e}"))
    }
}

// ============================================================================
// Key Storage
// ============================================================================

struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry: Duration,
}

/// Initialized once at startup, immutable thereafter
static JWT_KEYS: OnceCell<JwtKeys> = OnceCell::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize the signing secret and token lifetime
///
/// Can only be called once - subsequent calls return an error.
pub fn initialize_jwt_secret(secret: &str, expiry_secs: i64) -> Result<()> {
    if secret.is_empty() {
        return Err(anyhow!("JWT secret must not be empty"));
    }
    if expiry_secs <= 0 {
        return Err(anyhow!("JWT expiry must be positive, got {expiry_secs}"));
    }

    JWT_KEYS
        .set(JwtKeys {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry: Duration::seconds(expiry_secs),
        })
        .map_err(|_| anyhow!("JWT secret already initialized"))?;

    tracing::debug!(expiry_secs, "JWT secret initialized");
    Ok(())
}

fn keys() -> Result<&'static JwtKeys> {
    JWT_KEYS
        .get()
        .ok_or_else(|| anyhow!("JWT secret not initialized. Call initialize_jwt_secret() during startup."))
}

// ============================================================================
// Token Generation
// ============================================================================

/// Generate a token with the configured lifetime
pub fn generate_token(user_id: Uuid, email: &str, name: &str) -> Result<String> {
    let expiry = keys()?.expiry;
    generate_token_with_expiry(user_id, email, name, expiry)
}

/// Generate a token with an explicit lifetime (negative values yield an expired token)
pub fn generate_token_with_expiry(
    user_id: Uuid,
    email: &str,
    name: &str,
    expires_in: Duration,
) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        user_id: user_id.to_string(),
        email: email.to_string(),
        name: name.to_string(),
        iat: now.timestamp(),
        exp: (now + expires_in).timestamp(),
    };

    encode(&Header::new(JWT_ALGORITHM), &claims, &keys()?.encoding)
        .map_err(|e| anyhow!("Failed to generate token: {e}"))
}

// ============================================================================
// Token Validation
// ============================================================================

/// Validate signature and expiry, returning the decoded claims
pub fn validate_token(token: &str) -> Result<TokenData<Claims>> {
    let keys = keys()?;

    let mut validation = Validation::new(JWT_ALGORITHM);
    validation.validate_exp = true;
    validation.set_required_spec_claims(&["exp"]);

    decode::<Claims>(token, &keys.decoding, &validation).context("Token validation failed")
}

/// True when validation failed only because the token expired
pub fn is_expired_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<jsonwebtoken::errors::Error>()
        .map(|e| matches!(e.kind(), ErrorKind::ExpiredSignature))
        .unwrap_or(false)
}

/// Extract user ID from a validated token
pub fn get_user_id_from_token(token: &str) -> Result<Uuid> {
    validate_token(token)?.claims.user_uuid()
}

// ============================================================================
// Tests
// ============================================================================
