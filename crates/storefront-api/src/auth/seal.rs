//! Sealed claim encryption
//!
//! Individual claim values are encrypted before they are embedded in a
//! session token so they never appear in the token's readable payload.
//!
//! Wire form: `sf1*aes256gcm*<salt>*<nonce>*<ciphertext>`, each binary part
//! base64url without padding. The key is HKDF-SHA256 over the sealing
//! password with a fresh random salt per value; the field name is bound in
//! as AES-GCM associated data.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

const SEAL_VERSION: &str = "sf1";
const NONCE_LEN: usize = 12;
const KEY_INFO: &[u8] = b"storefront sealed claim v1";

/// Symmetric cipher used for sealed claims
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealAlgorithm {
    Aes256Gcm,
}

impl SealAlgorithm {
    fn tag(self) -> &'static str {
        match self {
            Self::Aes256Gcm => "aes256gcm",
        }
    }
}

/// Parameters that must agree between sealing and unsealing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealParams {
    pub algorithm: SealAlgorithm,
    pub salt_len: usize,
}

impl Default for SealParams {
    fn default() -> Self {
        Self {
            algorithm: SealAlgorithm::Aes256Gcm,
            salt_len: 32,
        }
    }
}

/// Per-field sealing errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SealError {
    #[error("Sealed value is malformed")]
    Malformed,

    #[error("Sealed value parameters do not match: {0}")]
    ParameterMismatch(String),

    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("Encryption failed")]
    Encryption,

    #[error("Decryption failed")]
    Decryption,
}

/// A field that could not be sealed or unsealed, reported for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    pub field: String,
    pub error: SealError,
}

impl fmt::Display for FieldFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.error)
    }
}

/// Seals and unseals individual claim values with a password-derived key
#[derive(Clone)]
pub struct FieldSealer {
    password: Vec<u8>,
    params: SealParams,
}

impl fmt::Debug for FieldSealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSealer")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl FieldSealer {
    pub fn new(password: impl AsRef<[u8]>, params: SealParams) -> Self {
        Self {
            password: password.as_ref().to_vec(),
            params,
        }
    }

    pub fn params(&self) -> &SealParams {
        &self.params
    }

    /// Encrypt `plaintext` for the claim named `field`
    pub fn seal(&self, field: &str, plaintext: &str) -> Result<String, SealError> {
        let mut salt = vec![0u8; self.params.salt_len];
        OsRng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = self.cipher(&salt)?;
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext.as_bytes(),
                    aad: field.as_bytes(),
                },
            )
            .map_err(|_| SealError::Encryption)?;

        Ok(format!(
            "{SEAL_VERSION}*{}*{}*{}*{}",
            self.params.algorithm.tag(),
            URL_SAFE_NO_PAD.encode(&salt),
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(ciphertext),
        ))
    }

    /// Decrypt a value produced by [`FieldSealer::seal`] for the same field
    pub fn unseal(&self, field: &str, sealed: &str) -> Result<String, SealError> {
        let parts: Vec<&str> = sealed.split('*').collect();
        let [version, algorithm, salt, nonce, ciphertext] = parts.as_slice() else {
            return Err(SealError::Malformed);
        };

        if *version != SEAL_VERSION {
            return Err(SealError::ParameterMismatch(format!("version {version}")));
        }
        if *algorithm != self.params.algorithm.tag() {
            return Err(SealError::ParameterMismatch(format!("algorithm {algorithm}")));
        }

        let salt = decode_part(salt)?;
        if salt.len() != self.params.salt_len {
            return Err(SealError::ParameterMismatch(format!(
                "salt length {}",
                salt.len()
            )));
        }
        let nonce = decode_part(nonce)?;
        if nonce.len() != NONCE_LEN {
            return Err(SealError::Malformed);
        }
        let ciphertext = decode_part(ciphertext)?;

        let plaintext = self
            .cipher(&salt)?
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: field.as_bytes(),
                },
            )
            .map_err(|_| SealError::Decryption)?;

        String::from_utf8(plaintext).map_err(|_| SealError::Malformed)
    }

    fn cipher(&self, salt: &[u8]) -> Result<Aes256Gcm, SealError> {
        let hkdf = Hkdf::<Sha256>::new(Some(salt), &self.password);
        let mut key = [0u8; 32];
        hkdf.expand(KEY_INFO, &mut key)
            .map_err(|_| SealError::KeyDerivation)?;
        Ok(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)))
    }
}

fn decode_part(part: &str) -> Result<Vec<u8>, SealError> {
    URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|_| SealError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sealer(password: &str) -> FieldSealer {
        FieldSealer::new(password, SealParams::default())
    }

    #[test]
    fn test_seal_and_unseal() {
        let sealer = sealer("sealing-password");
        let sealed = sealer.seal("shopify_access_token", "shpat_abc123").unwrap();

        assert!(sealed.starts_with("sf1*aes256gcm*"));
        assert!(!sealed.contains("shpat_abc123"));
        assert_eq!(
            sealer.unseal("shopify_access_token", &sealed).unwrap(),
            "shpat_abc123"
        );
    }

    #[test]
    fn test_same_value_seals_differently() {
        let sealer = sealer("sealing-password");
        let a = sealer.seal("plan_id", "pro").unwrap();
        let b = sealer.seal("plan_id", "pro").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_password_fails() {
        let sealed = sealer("password-one").seal("shop_domain", "a.myshopify.com").unwrap();
        let result = sealer("password-two").unseal("shop_domain", &sealed);
        assert_eq!(result, Err(SealError::Decryption));
    }

    #[test]
    fn test_value_bound_to_field_name() {
        let sealer = sealer("sealing-password");
        let sealed = sealer.seal("shopify_access_token", "secret").unwrap();
        assert_eq!(
            sealer.unseal("plan_id", &sealed),
            Err(SealError::Decryption)
        );
    }

    #[test]
    fn test_salt_length_mismatch() {
        let sealed = FieldSealer::new(
            "pw",
            SealParams {
                salt_len: 16,
                ..Default::default()
            },
        )
        .seal("plan_id", "pro")
        .unwrap();

        let result = sealer("pw").unseal("plan_id", &sealed);
        assert!(matches!(result, Err(SealError::ParameterMismatch(_))));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let sealer = sealer("pw");
        let sealed = sealer.seal("plan_id", "enterprise").unwrap();

        let (head, tail) = sealed.rsplit_once('*').unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(tail).unwrap();
        bytes[0] ^= 0x01;
        let tampered = format!("{head}*{}", URL_SAFE_NO_PAD.encode(bytes));

        assert_eq!(sealer.unseal("plan_id", &tampered), Err(SealError::Decryption));
    }

    #[test]
    fn test_malformed_inputs() {
        let sealer = sealer("pw");
        assert_eq!(sealer.unseal("plan_id", "plaintext"), Err(SealError::Malformed));
        assert_eq!(
            sealer.unseal("plan_id", "sf1*aes256gcm*!!*!!*!!"),
            Err(SealError::Malformed)
        );
        assert!(matches!(
            sealer.unseal("plan_id", "sf0*aes256gcm*a*b*c"),
            Err(SealError::ParameterMismatch(_))
        ));
        assert!(matches!(
            sealer.unseal("plan_id", "sf1*aes128cbc*a*b*c"),
            Err(SealError::ParameterMismatch(_))
        ));
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", sealer("super-secret"));
        assert!(!rendered.contains("super-secret"));
    }

    proptest! {
        #[test]
        fn prop_seal_roundtrip(value in "\\PC*") {
            let sealer = sealer("property-password");
            let sealed = sealer.seal("shopify_access_token", &value).unwrap();
            prop_assert_eq!(sealer.unseal("shopify_access_token", &sealed).unwrap(), value);
        }
    }
}
