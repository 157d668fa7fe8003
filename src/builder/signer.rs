//! Funding identity and transaction signing.
//!
//! # Security
//! - The funding secret is loaded ONLY from the environment
//! - It is never logged, serialized or printed by `Debug`
//! - Only the public account id leaves this module

use ed25519_dalek::{Signer, SigningKey};
use stellar_xdr::curr::{DecoratedSignature, Signature, SignatureHint};

use crate::builder::envelope::encoding;
use crate::builder::strkey;
use crate::error::{BuildError, ConfigurationError};

/// Environment variable holding the funding account secret.
pub const FUNDING_SECRET_ENV_VAR: &str = "BRIDGE_FUNDING_SECRET";

/// In-memory signing key of the funding account.
pub struct FundingSigner {
    signing_key: SigningKey,
    account_id: String,
}

impl FundingSigner {
    /// Parse a secret given as an `S...` seed or 64 hex characters.
    pub fn from_secret(secret: &str) -> Result<Self, ConfigurationError> {
        let secret = secret.trim();
        let seed = if secret.starts_with('S') {
            strkey::decode_seed(secret)
                .map_err(|e| ConfigurationError::Signing(format!("invalid funding seed: {}", e)))?
        } else {
            let bytes = hex::decode(secret.strip_prefix("0x").unwrap_or(secret))
                .map_err(|_| ConfigurationError::Signing("funding secret is neither a seed nor hex".to_string()))?;
            <[u8; 32]>::try_from(bytes.as_slice())
                .map_err(|_| ConfigurationError::Signing("funding secret must be 32 bytes".to_string()))?
        };
        Ok(Self::from_seed(&seed))
    }

    /// Build from raw seed bytes.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let account_id = strkey::encode_account_id(signing_key.verifying_key().as_bytes());
        tracing::info!(account_id = %account_id, "Funding signer loaded");
        Self {
            signing_key,
            account_id,
        }
    }

    /// Load from `BRIDGE_FUNDING_SECRET`.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let secret = std::env::var(FUNDING_SECRET_ENV_VAR).map_err(|_| {
            ConfigurationError::Signing(format!("environment variable {} not set", FUNDING_SECRET_ENV_VAR))
        })?;
        Self::from_secret(&secret)
    }

    /// Public account id (`G...`).
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a transaction hash.
    pub fn sign(&self, hash: &[u8; 32]) -> Result<DecoratedSignature, BuildError> {
        let public = self.public_key();
        let mut hint = [0u8; 4];
        hint.copy_from_slice(&public[28..]);
        let signature = self.signing_key.sign(hash).to_bytes().to_vec();
        Ok(DecoratedSignature {
            hint: SignatureHint(hint),
            signature: Signature(signature.try_into().map_err(encoding)?),
        })
    }
}

impl std::fmt::Debug for FundingSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundingSigner")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}
