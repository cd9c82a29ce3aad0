use crate::discovery::OpMetadata;
use crate::keys::{KeyError, OpKeyService};
use crate::models::Rp;
use crate::store::{ExpiredObjectStore, ObjectType, StoreError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use jsonwebtoken::{Algorithm, Header, Validation};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::sync::Arc;
use thiserror::Error;

/// Validation failures. Every check raises a distinct variant so callers can
/// name the specific check that failed; all of them are fatal to the current
/// request and never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Token is not a well-formed three-part JWT")]
    Malformed,
    #[error("Failed to decode token header: {0}")]
    Header(jsonwebtoken::errors::Error),
    #[error("Failed to decode token claims: {0}")]
    Claims(String),
    #[error("Signature verification failed")]
    SignatureInvalid,
    #[error("Token has expired")]
    Expired,
    #[error("Issuer mismatch")]
    IssuerMismatch,
    #[error("Audience does not include the expected client id")]
    AudienceMismatch,
    #[error("Token verification failed: {0}")]
    Jwt(jsonwebtoken::errors::Error),
    #[error("id_token has no iat claim")]
    MissingIat,
    #[error("id_token has no nonce claim")]
    MissingNonce,
    #[error("Nonce was not issued by this server or was already used")]
    UnknownNonce,
    #[error("State was not issued by this server or has expired")]
    UnknownState,
    #[error("id_token has no at_hash claim")]
    MissingAtHash,
    #[error("at_hash does not match the access token")]
    AtHashMismatch,
    #[error("id_token has no c_hash claim")]
    MissingCHash,
    #[error("c_hash does not match the authorization code")]
    CHashMismatch,
    #[error("Unsupported signing algorithm {0:?}")]
    UnsupportedAlgorithm(Algorithm),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Audience claim: a single client id or a list of them
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Audience::One(aud) => aud == client_id,
            Audience::Many(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }
}

/// Standard ID-token claims plus the hash bindings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IdTokenClaims {
    pub iss: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub c_hash: Option<String>,
}

/// Per-validation token checker.
///
/// Constructed once per completed authorization round-trip with the raw ID
/// token (header and claims pre-parsed without verification), the issuer's
/// discovery metadata and the RP record. The individual checks are
/// independent and composable: each flow calls the subset relevant to its
/// grant, and any failing check must abort the flow — there is no partial
/// success.
pub struct TokenValidator<'a> {
    raw_token: &'a str,
    header: Header,
    claims: IdTokenClaims,
    metadata: Arc<OpMetadata>,
    rp: &'a Rp,
    keys: &'a OpKeyService,
    store: &'a ExpiredObjectStore,
}

impl<'a> TokenValidator<'a> {
    pub fn new(
        id_token: &'a str,
        metadata: Arc<OpMetadata>,
        rp: &'a Rp,
        keys: &'a OpKeyService,
        store: &'a ExpiredObjectStore,
    ) -> Result<Self, ValidationError> {
        let mut parts = id_token.split('.');
        let (Some(_), Some(claims_part), Some(_), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ValidationError::Malformed);
        };

        let header = jsonwebtoken::decode_header(id_token).map_err(ValidationError::Header)?;
        // Claims are pre-parsed unverified so the binding checks can run
        // independently; trust is only established by validate_id_token.
        let claims_bytes = URL_SAFE_NO_PAD
            .decode(claims_part)
            .map_err(|e| ValidationError::Claims(e.to_string()))?;
        let claims: IdTokenClaims = serde_json::from_slice(&claims_bytes)
            .map_err(|e| ValidationError::Claims(e.to_string()))?;

        Ok(Self {
            raw_token: id_token,
            header,
            claims,
            metadata,
            rp,
            keys,
            store,
        })
    }

    pub fn claims(&self) -> &IdTokenClaims {
        &self.claims
    }

    /// Verify the signature via the issuer's published keys and the
    /// standard iss/aud/exp/iat claims. The audience must include
    /// `expected_client_id` when provided, the RP's own client id otherwise.
    pub async fn validate_id_token(
        &self,
        expected_client_id: Option<&str>,
    ) -> Result<(), ValidationError> {
        let key = self
            .keys
            .signing_key(&self.rp.op_host, self.header.kid.as_deref())
            .await?;

        let expected = expected_client_id.unwrap_or(&self.rp.client_id);
        let mut validation = Validation::new(self.header.alg);
        validation.set_issuer(&[self.metadata.issuer.as_str()]);
        validation.set_audience(&[expected]);

        jsonwebtoken::decode::<IdTokenClaims>(self.raw_token, &key, &validation)
            .map_err(map_jwt_error)?;

        if self.claims.iat.is_none() {
            return Err(ValidationError::MissingIat);
        }
        debug!("id_token for {} validated", self.rp.rp_id);
        Ok(())
    }

    /// The nonce claim must match a value stored at authorization
    /// initiation; consumed on success (single use).
    pub async fn validate_nonce(&self) -> Result<(), ValidationError> {
        let nonce = self
            .claims
            .nonce
            .as_deref()
            .ok_or(ValidationError::MissingNonce)?;
        match self.store.consume(ObjectType::Nonce, nonce).await? {
            Some(_) => Ok(()),
            None => Err(ValidationError::UnknownNonce),
        }
    }

    /// The state must exist unexpired in the store; consumed on success.
    pub async fn validate_state(&self, state: &str) -> Result<(), ValidationError> {
        match self.store.consume(ObjectType::State, state).await? {
            Some(_) => Ok(()),
            None => Err(ValidationError::UnknownState),
        }
    }

    /// Check the at_hash binding between this ID token and the access
    /// token. When `at_hash_required` is false a missing claim skips the
    /// check; a present claim is always verified.
    pub fn validate_access_token(
        &self,
        access_token: &str,
        at_hash_required: bool,
    ) -> Result<(), ValidationError> {
        match &self.claims.at_hash {
            None if !at_hash_required => {
                debug!("at_hash absent and not required, skipping check");
                Ok(())
            }
            None => Err(ValidationError::MissingAtHash),
            Some(at_hash) => {
                let expected = left_half_hash(access_token, self.header.alg)?;
                if *at_hash == expected {
                    Ok(())
                } else {
                    Err(ValidationError::AtHashMismatch)
                }
            }
        }
    }

    /// Check the c_hash binding between this ID token and the
    /// authorization code.
    pub fn validate_authorization_code(&self, code: &str) -> Result<(), ValidationError> {
        let c_hash = self
            .claims
            .c_hash
            .as_deref()
            .ok_or(ValidationError::MissingCHash)?;
        let expected = left_half_hash(code, self.header.alg)?;
        if c_hash == expected {
            Ok(())
        } else {
            Err(ValidationError::CHashMismatch)
        }
    }
}

/// base64url-encoded left half of the hash of `value`, with the hash
/// algorithm matching the token's signing algorithm.
pub(crate) fn left_half_hash(value: &str, alg: Algorithm) -> Result<String, ValidationError> {
    let digest: Vec<u8> = match alg {
        Algorithm::HS256 | Algorithm::RS256 | Algorithm::PS256 | Algorithm::ES256 => {
            Sha256::digest(value.as_bytes()).to_vec()
        }
        Algorithm::HS384 | Algorithm::RS384 | Algorithm::PS384 | Algorithm::ES384 => {
            Sha384::digest(value.as_bytes()).to_vec()
        }
        Algorithm::HS512 | Algorithm::RS512 | Algorithm::PS512 | Algorithm::EdDSA => {
            Sha512::digest(value.as_bytes()).to_vec()
        }
    };
    Ok(URL_SAFE_NO_PAD.encode(&digest[..digest.len() / 2]))
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> ValidationError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::InvalidSignature => ValidationError::SignatureInvalid,
        ErrorKind::ExpiredSignature => ValidationError::Expired,
        ErrorKind::InvalidIssuer => ValidationError::IssuerMismatch,
        ErrorKind::InvalidAudience => ValidationError::AudienceMismatch,
        _ => ValidationError::Jwt(err),
    }
}
