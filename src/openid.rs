use axum::async_trait;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use jsonwebtoken::{jwk, jwk::AlgorithmParameters, DecodingKey};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

use crate::auth::{AuthError, Principal, TokenVerifier};
use crate::config::Settings;

type Keys = HashMap<String, DecodingKey>;

struct KeySet {
    issuer: String,
    keys: Keys,
}

/// Verifies RS256 access tokens against the signing keys an OpenID provider
/// publishes. Keys are loaded once by [`JwksVerifier::init`] and optionally
/// refreshed in the background.
pub struct JwksVerifier {
    config_uri: String,
    audiences: Vec<String>,
    key_set: RwLock<KeySet>,
}

impl JwksVerifier {
    pub async fn init(settings: &Settings) -> Result<Arc<Self>, OpenIDError> {
        let config_uri = settings.openid_config_url();
        let key_set = fetch_key_set(&config_uri).await?;
        tracing::info!(
            issuer = %key_set.issuer,
            keys = key_set.keys.len(),
            "loaded OpenID configuration from {}",
            config_uri
        );

        let verifier = Arc::new(Self {
            config_uri,
            audiences: settings.audiences(),
            key_set: RwLock::new(key_set),
        });
        if settings.jwks_refresh_secs > 0 {
            spawn_refresh(&verifier, Duration::from_secs(settings.jwks_refresh_secs));
        }
        Ok(verifier)
    }

    /// Builds a verifier from an already fetched key set. Never refreshes.
    pub fn from_jwks(issuer: impl Into<String>, audiences: Vec<String>, jwks: &jwk::JwkSet) -> Self {
        Self {
            config_uri: String::new(),
            audiences,
            key_set: RwLock::new(KeySet {
                issuer: issuer.into(),
                keys: jwks_to_decoding_keys(jwks),
            }),
        }
    }

    async fn update_jwks(&self) -> Result<(), OpenIDError> {
        let new_key_set = fetch_key_set(&self.config_uri).await?;
        let mut key_set = self
            .key_set
            .write()
            .map_err(|_| OpenIDError::InternalServerError)?;
        *key_set = new_key_set;
        Ok(())
    }

    fn decode_principal(&self, token: &str) -> Result<Principal, AuthError> {
        let kid = decode_header(token)
            .map_err(|_| AuthError::InvalidToken)?
            .kid
            .ok_or(AuthError::InvalidToken)?;
        let key_set = self.key_set.read().map_err(|_| AuthError::InternalServer)?;
        let key = key_set.keys.get(&kid).ok_or_else(|| {
            tracing::debug!("no signing key for kid {}", kid);
            AuthError::InvalidToken
        })?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[key_set.issuer.as_str()]);
        validation.set_audience(self.audiences.as_slice());
        let token_data =
            decode::<Map<String, Value>>(token, key, &validation).map_err(|e| {
                tracing::debug!("{:?}", e);
                AuthError::InvalidToken
            })?;

        Principal::from_claims(token_data.claims).ok_or_else(|| {
            tracing::debug!("token has neither oid nor sub");
            AuthError::InvalidToken
        })
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        self.decode_principal(token)
    }
}

fn spawn_refresh(verifier: &Arc<JwksVerifier>, period: Duration) {
    let verifier = Arc::downgrade(verifier);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            let Some(verifier) = verifier.upgrade() else {
                break;
            };
            match verifier.update_jwks().await {
                Ok(_) => tracing::debug!("jwks updated"),
                Err(e) => tracing::error!("Jwks not updated: {:?}", e),
            };
        }
    });
}

#[derive(Deserialize)]
struct Oid {
    issuer: String,
    jwks_uri: String,
}

async fn fetch_key_set(uri: &str) -> Result<KeySet, OpenIDError> {
    let oid = reqwest::get(uri)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|_| OpenIDError::InvalidWellKnownUri)?
        .json::<Oid>()
        .await
        .map_err(|_| OpenIDError::MissingOpenIDConfiguration)?;
    let jwks = reqwest::get(&oid.jwks_uri)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|_| OpenIDError::InvalidJwksUri)?
        .json::<jwk::JwkSet>()
        .await
        .map_err(|_| OpenIDError::MissingJwksSet)?;
    Ok(KeySet {
        issuer: oid.issuer,
        keys: jwks_to_decoding_keys(&jwks),
    })
}

fn jwks_to_decoding_keys(jwks: &jwk::JwkSet) -> Keys {
    let mut hm = HashMap::new();
    for jwk in &jwks.keys {
        if let AlgorithmParameters::RSA(ref rsa) = jwk.algorithm {
            if let Ok(decoding_key) = DecodingKey::from_rsa_components(&rsa.n, &rsa.e) {
                if let Some(kid) = jwk.common.key_id.clone() {
                    hm.insert(kid, decoding_key);
                }
            }
        }
    }
    hm
}

#[derive(Debug, Error)]
pub enum OpenIDError {
    #[error("could not fetch the OpenID configuration")]
    InvalidWellKnownUri,
    #[error("could not fetch the JWK set")]
    InvalidJwksUri,
    #[error("OpenID configuration is missing issuer or jwks_uri")]
    MissingOpenIDConfiguration,
    #[error("JWK set could not be parsed")]
    MissingJwksSet,
    #[error("key store lock poisoned")]
    InternalServerError,
}
