//! Key generation, signing and verification for the asymmetric key types.
//!
//! Private keys travel as PKCS#8 DER and public keys as SubjectPublicKeyInfo
//! DER for every type, so storage never needs to know which curve is inside.

use ed25519_dalek::Signer as _;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use rand::rngs::OsRng;
use rsa::pkcs1v15;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::crypto::random_bytes;
use crate::error::{KmsError, KmsResult};
use crate::types::{EcCurve, KeyType};

/// Freshly generated key: private or symmetric bytes plus the public half if any.
pub struct GeneratedKey {
    pub private: Zeroizing<Vec<u8>>,
    pub public: Option<Vec<u8>>,
}

/// Generate material for `key_type`. MPC types have no local material.
pub fn generate(key_type: KeyType) -> KmsResult<GeneratedKey> {
    match key_type {
        KeyType::Aes256Gcm => Ok(GeneratedKey {
            private: Zeroizing::new(random_bytes::<32>().to_vec()),
            public: None,
        }),
        KeyType::Rsa(bits) => {
            let private = RsaPrivateKey::new(&mut OsRng, bits.bits())
                .map_err(|e| KmsError::Crypto(format!("rsa keygen: {e}")))?;
            let public = RsaPublicKey::from(&private);
            Ok(GeneratedKey {
                private: Zeroizing::new(pkcs8(private.to_pkcs8_der())?),
                public: Some(spki(public.to_public_key_der())?),
            })
        }
        KeyType::Ecdsa(EcCurve::P256) => {
            let secret = p256::SecretKey::random(&mut OsRng);
            Ok(GeneratedKey {
                private: Zeroizing::new(pkcs8(secret.to_pkcs8_der())?),
                public: Some(spki(secret.public_key().to_public_key_der())?),
            })
        }
        KeyType::Ecdsa(EcCurve::P384) => {
            let secret = p384::SecretKey::random(&mut OsRng);
            Ok(GeneratedKey {
                private: Zeroizing::new(pkcs8(secret.to_pkcs8_der())?),
                public: Some(spki(secret.public_key().to_public_key_der())?),
            })
        }
        KeyType::Ed25519 => {
            let signing = ed25519_dalek::SigningKey::generate(&mut OsRng);
            Ok(GeneratedKey {
                private: Zeroizing::new(pkcs8(signing.to_pkcs8_der())?),
                public: Some(spki(signing.verifying_key().to_public_key_der())?),
            })
        }
        KeyType::Mpc(_) => Err(KmsError::UnsupportedKeyType(key_type.to_string())),
    }
}

fn pkcs8(doc: rsa::pkcs8::Result<rsa::pkcs8::SecretDocument>) -> KmsResult<Vec<u8>> {
    doc.map(|d| d.as_bytes().to_vec())
        .map_err(|e| KmsError::Crypto(format!("pkcs8 encode: {e}")))
}

fn spki(doc: rsa::pkcs8::spki::Result<rsa::pkcs8::Document>) -> KmsResult<Vec<u8>> {
    doc.map(|d| d.as_bytes().to_vec())
        .map_err(|e| KmsError::Crypto(format!("spki encode: {e}")))
}

fn bad_private(e: impl std::fmt::Display) -> KmsError {
    KmsError::Crypto(format!("stored private key unreadable: {e}"))
}

fn bad_public(e: impl std::fmt::Display) -> KmsError {
    KmsError::Crypto(format!("stored public key unreadable: {e}"))
}

/// Sign `data`. RSA uses PKCS#1 v1.5 over SHA-256; ECDSA signs the SHA-256
/// digest and returns ASN.1 DER; Ed25519 signs the raw message.
pub fn sign(key_type: KeyType, private_der: &[u8], data: &[u8]) -> KmsResult<Vec<u8>> {
    match key_type {
        KeyType::Rsa(_) => {
            let private = RsaPrivateKey::from_pkcs8_der(private_der).map_err(bad_private)?;
            let signer = pkcs1v15::SigningKey::<Sha256>::new(private);
            let sig = signer
                .try_sign_with_rng(&mut OsRng, data)
                .map_err(|e| KmsError::Crypto(format!("rsa sign: {e}")))?;
            Ok(sig.to_vec())
        }
        KeyType::Ecdsa(EcCurve::P256) => {
            let secret = p256::SecretKey::from_pkcs8_der(private_der).map_err(bad_private)?;
            let signer = p256::ecdsa::SigningKey::from(&secret);
            let sig: p256::ecdsa::Signature = signer
                .sign_prehash(&Sha256::digest(data))
                .map_err(|e| KmsError::Crypto(format!("ecdsa sign: {e}")))?;
            Ok(sig.to_der().as_bytes().to_vec())
        }
        KeyType::Ecdsa(EcCurve::P384) => {
            let secret = p384::SecretKey::from_pkcs8_der(private_der).map_err(bad_private)?;
            let signer = p384::ecdsa::SigningKey::from(&secret);
            let sig: p384::ecdsa::Signature = signer
                .sign_prehash(&Sha256::digest(data))
                .map_err(|e| KmsError::Crypto(format!("ecdsa sign: {e}")))?;
            Ok(sig.to_der().as_bytes().to_vec())
        }
        KeyType::Ed25519 => {
            let signer =
                ed25519_dalek::SigningKey::from_pkcs8_der(private_der).map_err(bad_private)?;
            Ok(signer.sign(data).to_bytes().to_vec())
        }
        KeyType::Aes256Gcm | KeyType::Mpc(_) => {
            Err(KmsError::UnsupportedKeyType(key_type.to_string()))
        }
    }
}

/// Verify `signature` over `data`. A well-formed signature that does not
/// match is `Ok(false)`; one that cannot be parsed is `MalformedInput`.
pub fn verify(key_type: KeyType, public_der: &[u8], data: &[u8], signature: &[u8]) -> KmsResult<bool> {
    match key_type {
        KeyType::Rsa(_) => {
            let public = RsaPublicKey::from_public_key_der(public_der).map_err(bad_public)?;
            let verifier = pkcs1v15::VerifyingKey::<Sha256>::new(public);
            let sig = pkcs1v15::Signature::try_from(signature)
                .map_err(|e| KmsError::MalformedInput(format!("rsa signature: {e}")))?;
            Ok(verifier.verify(data, &sig).is_ok())
        }
        KeyType::Ecdsa(EcCurve::P256) => {
            let public = p256::PublicKey::from_public_key_der(public_der).map_err(bad_public)?;
            let verifier = p256::ecdsa::VerifyingKey::from(&public);
            let sig = p256::ecdsa::Signature::from_der(signature)
                .map_err(|e| KmsError::MalformedInput(format!("ecdsa signature: {e}")))?;
            Ok(verifier.verify_prehash(&Sha256::digest(data), &sig).is_ok())
        }
        KeyType::Ecdsa(EcCurve::P384) => {
            let public = p384::PublicKey::from_public_key_der(public_der).map_err(bad_public)?;
            let verifier = p384::ecdsa::VerifyingKey::from(&public);
            let sig = p384::ecdsa::Signature::from_der(signature)
                .map_err(|e| KmsError::MalformedInput(format!("ecdsa signature: {e}")))?;
            Ok(verifier.verify_prehash(&Sha256::digest(data), &sig).is_ok())
        }
        KeyType::Ed25519 => {
            let verifier = ed25519_dalek::VerifyingKey::from_public_key_der(public_der)
                .map_err(bad_public)?;
            let sig = ed25519_dalek::Signature::from_slice(signature)
                .map_err(|e| KmsError::MalformedInput(format!("ed25519 signature: {e}")))?;
            Ok(verifier.verify(data, &sig).is_ok())
        }
        KeyType::Aes256Gcm | KeyType::Mpc(_) => {
            Err(KmsError::UnsupportedKeyType(key_type.to_string()))
        }
    }
}

/// PEM (`PUBLIC KEY`) encoding of a stored SPKI public key.
pub fn public_key_pem(key_type: KeyType, public_der: &[u8]) -> KmsResult<String> {
    let pem = match key_type {
        KeyType::Rsa(_) => RsaPublicKey::from_public_key_der(public_der)
            .map_err(bad_public)?
            .to_public_key_pem(LineEnding::LF),
        KeyType::Ecdsa(EcCurve::P256) => p256::PublicKey::from_public_key_der(public_der)
            .map_err(bad_public)?
            .to_public_key_pem(LineEnding::LF),
        KeyType::Ecdsa(EcCurve::P384) => p384::PublicKey::from_public_key_der(public_der)
            .map_err(bad_public)?
            .to_public_key_pem(LineEnding::LF),
        KeyType::Ed25519 => ed25519_dalek::VerifyingKey::from_public_key_der(public_der)
            .map_err(bad_public)?
            .to_public_key_pem(LineEnding::LF),
        KeyType::Aes256Gcm | KeyType::Mpc(_) => {
            return Err(KmsError::UnsupportedKeyType(key_type.to_string()));
        }
    };
    pem.map_err(|e| KmsError::Crypto(format!("pem encode: {e}")))
}

/// Names of the signature algorithms a key of this type produces.
pub fn signing_algorithms(key_type: KeyType) -> &'static [&'static str] {
    match key_type {
        KeyType::Rsa(_) => &["RSASSA_PKCS1_V1_5_SHA_256"],
        KeyType::Ecdsa(_) => &["ECDSA_SHA_256"],
        KeyType::Ed25519 => &["EDDSA"],
        KeyType::Aes256Gcm | KeyType::Mpc(_) => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdsa_p384_signs_sha256_prehash() {
        let key = generate(KeyType::Ecdsa(EcCurve::P384)).unwrap();
        let public = key.public.unwrap();
        let sig = sign(KeyType::Ecdsa(EcCurve::P384), &key.private, b"payload").unwrap();
        assert!(verify(KeyType::Ecdsa(EcCurve::P384), &public, b"payload", &sig).unwrap());
        assert!(!verify(KeyType::Ecdsa(EcCurve::P384), &public, b"other", &sig).unwrap());
    }

    #[test]
    fn garbage_signature_is_malformed() {
        let key = generate(KeyType::Ed25519).unwrap();
        let public = key.public.unwrap();
        assert!(matches!(
            verify(KeyType::Ed25519, &public, b"m", &[1, 2, 3]),
            Err(KmsError::MalformedInput(_))
        ));
    }

    #[test]
    fn pem_has_public_key_armor() {
        let key = generate(KeyType::Ecdsa(EcCurve::P256)).unwrap();
        let pem = public_key_pem(KeyType::Ecdsa(EcCurve::P256), &key.public.unwrap()).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"));
    }

    #[test]
    fn symmetric_types_cannot_sign() {
        assert!(signing_algorithms(KeyType::Aes256Gcm).is_empty());
        assert!(sign(KeyType::Aes256Gcm, &[0u8; 32], b"m").is_err());
    }
}
