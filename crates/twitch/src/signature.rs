//! Verification of `X-Hub-Signature` style webhook callback signatures.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Header carrying `<algorithm>=<hexdigest>` on webhook callbacks.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Reasons a signature header could not be evaluated at all.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header must have the form '<algorithm>=<hexdigest>'")]
    InvalidFormat,
    #[error("unsupported signature algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    #[error("failed to initialize signature verifier")]
    InvalidKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignatureAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl SignatureAlgorithm {
    fn parse(value: &str) -> Result<Self, SignatureError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(SignatureError::UnsupportedAlgorithm(value.to_string())),
        }
    }

    fn mac(self, secret: &[u8], body: &[u8]) -> Result<Vec<u8>, SignatureError> {
        match self {
            Self::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(secret)
                    .map_err(|_| SignatureError::InvalidKey)?;
                mac.update(body);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            Self::Sha384 => {
                let mut mac = Hmac::<Sha384>::new_from_slice(secret)
                    .map_err(|_| SignatureError::InvalidKey)?;
                mac.update(body);
                Ok(mac.finalize().into_bytes().to_vec())
            }
            Self::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(secret)
                    .map_err(|_| SignatureError::InvalidKey)?;
                mac.update(body);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    }
}

/// Checks `signature_header` against the keyed hash of the raw, unparsed body.
///
/// Hex digests compare case-insensitively and in constant time. A digest that
/// is not valid hex, or has the wrong length, is a mismatch rather than an error.
pub fn verify_signature(
    signature_header: &str,
    body: &[u8],
    secret: &[u8],
) -> Result<bool, SignatureError> {
    let (algorithm, digest) = signature_header
        .trim()
        .split_once('=')
        .ok_or(SignatureError::InvalidFormat)?;
    let algorithm = SignatureAlgorithm::parse(algorithm)?;

    let Ok(provided) = hex::decode(digest.trim()) else {
        return Ok(false);
    };
    let expected = algorithm.mac(secret, body)?;

    Ok(expected.as_slice().ct_eq(provided.as_slice()).into())
}
