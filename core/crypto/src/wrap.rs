//! RSA key wrapping.
//!
//! Short symmetric keys are wrapped with the public half of a key-store RSA
//! key pair. Unwrapping happens inside the key store, which holds the
//! private half.

use rand::rngs::OsRng;
use rsa::{Oaep, Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use sealbox_common::{Error, Result, SensitiveBytes};

/// RSA encryption padding used for key wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RsaPadding {
    /// RSAES-PKCS1-v1_5.
    Pkcs1v15,
    /// RSAES-OAEP with SHA-256 and MGF1.
    OaepSha256,
}

/// Wrap a raw key with an RSA public key.
///
/// # Errors
/// - `InvalidArgument` if the key is too long for the modulus
pub fn wrap_key(public_key: &RsaPublicKey, padding: RsaPadding, raw_key: &[u8]) -> Result<Vec<u8>> {
    let mut rng = OsRng;
    let wrapped = match padding {
        RsaPadding::Pkcs1v15 => public_key.encrypt(&mut rng, Pkcs1v15Encrypt, raw_key),
        RsaPadding::OaepSha256 => public_key.encrypt(&mut rng, Oaep::new::<Sha256>(), raw_key),
    };
    wrapped.map_err(|e| Error::InvalidArgument(format!("Key wrap failed: {}", e)))
}

/// Unwrap a key with the matching RSA private key.
///
/// # Errors
/// - `UnwrapFailure` if the padding check fails (tampered data, wrong key
///   pair, or a different padding generation)
pub fn unwrap_key(
    private_key: &RsaPrivateKey,
    padding: RsaPadding,
    wrapped: &[u8],
) -> Result<SensitiveBytes> {
    let raw = match padding {
        RsaPadding::Pkcs1v15 => private_key.decrypt(Pkcs1v15Encrypt, wrapped),
        RsaPadding::OaepSha256 => private_key.decrypt(Oaep::new::<Sha256>(), wrapped),
    };
    raw.map(SensitiveBytes::new)
        .map_err(|e| Error::UnwrapFailure(format!("Key unwrap failed: {}", e)))
}
