use std::sync::Arc;

use chrono::Duration;
use kms_engine::keys::KeyOptions;
use kms_engine::types::{EcCurve, Envelope, KeyStatus, KeyType, KeyUsage, RsaBits};
use kms_engine::{Kms, KmsConfig, KmsError};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};

fn kms() -> Kms {
    Kms::in_memory().unwrap()
}

fn aes_key(kms: &Kms, name: &str) -> String {
    kms.keys
        .generate_key(name, KeyType::Aes256Gcm, KeyUsage::EncryptDecrypt, KeyOptions::default())
        .unwrap()
        .id
}

#[test]
fn test_generate_key_defaults() {
    let kms = kms();
    let key = kms
        .keys
        .generate_key(
            "payments",
            KeyType::Aes256Gcm,
            KeyUsage::EncryptDecrypt,
            KeyOptions {
                description: "card data".into(),
                project_id: "proj".into(),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(key.id.len(), 32);
    assert_eq!(key.version, 1);
    assert_eq!(key.status, KeyStatus::Active);
    assert_eq!(kms.keys.get_key(&key.id).unwrap(), key);
    assert_eq!(kms.keys.get_key_by_name("payments", Some("proj")).unwrap().id, key.id);
    assert!(kms.keys.get_key_by_name("payments", Some("other")).is_err());
}

#[test]
fn test_encrypt_decrypt_round_trip_and_nondeterminism() {
    let kms = kms();
    let id = aes_key(&kms, "k");

    let a = kms.keys.encrypt(&id, b"attack at dawn").unwrap();
    let b = kms.keys.encrypt(&id, b"attack at dawn").unwrap();
    assert_ne!(a.data, b.data);
    assert_eq!(a.key_id, id);
    assert_eq!(a.key_version, 1);

    assert_eq!(kms.keys.decrypt(&a).unwrap(), b"attack at dawn");
    // envelope bytes are self-describing
    let parsed = Envelope::from_bytes(&b.to_bytes().unwrap()).unwrap();
    assert_eq!(kms.keys.decrypt(&parsed).unwrap(), b"attack at dawn");

    assert_eq!(kms.keys.decrypt(&kms.keys.encrypt(&id, b"").unwrap()).unwrap(), b"");
}

#[test]
fn test_tampered_envelope_fails() {
    let kms = kms();
    let id = aes_key(&kms, "k");
    let mut env = kms.keys.encrypt(&id, b"secret").unwrap();
    let last = env.data.len() - 1;
    env.data[last] ^= 0xff;
    assert!(matches!(kms.keys.decrypt(&env), Err(KmsError::DecryptionFailure)));

    env.data.truncate(4);
    assert!(matches!(kms.keys.decrypt(&env), Err(KmsError::DecryptionFailure)));
}

#[test]
fn test_sign_verify_every_asymmetric_type() {
    let kms = kms();
    for key_type in [
        KeyType::Rsa(RsaBits::Rsa3072),
        KeyType::Rsa(RsaBits::Rsa4096),
        KeyType::Ecdsa(EcCurve::P256),
        KeyType::Ecdsa(EcCurve::P384),
        KeyType::Ed25519,
    ] {
        let key = kms
            .keys
            .generate_key("signer", key_type, KeyUsage::SignVerify, KeyOptions::default())
            .unwrap();
        let sig = kms.keys.sign(&key.id, b"message").unwrap();
        assert!(kms.keys.verify(&key.id, b"message", &sig).unwrap(), "{key_type}");
        assert!(!kms.keys.verify(&key.id, b"massage", &sig).unwrap(), "{key_type}");

        let pem = kms.keys.get_public_key(&key.id).unwrap();
        assert!(pem.starts_with("-----BEGIN PUBLIC KEY-----"), "{key_type}");
        assert!(!kms.keys.signing_algorithms(&key.id).unwrap().is_empty());
    }
}

#[test]
fn test_p256_digest_signature_verifies_outside_the_kms() {
    let kms = kms();
    let key = kms
        .keys
        .generate_key("tx-signer", KeyType::Ecdsa(EcCurve::P256), KeyUsage::SignVerify, KeyOptions::default())
        .unwrap();

    let digest = Sha256::digest(b"transfer 10 to alice");
    assert_eq!(digest.len(), 32);
    let sig = kms.keys.sign(&key.id, &digest).unwrap();

    let pem = kms.keys.get_public_key(&key.id).unwrap();
    let verifier = VerifyingKey::from_public_key_pem(&pem).unwrap();
    let sig = Signature::from_der(&sig).unwrap();
    assert!(verifier.verify_prehash(&Sha256::digest(digest), &sig).is_ok());
    assert!(verifier.verify_prehash(&Sha256::digest(b"other"), &sig).is_err());
}

#[test]
fn test_key_expiry_out_of_range() {
    let kms = kms();
    let result = kms.keys.generate_key(
        "forever",
        KeyType::Aes256Gcm,
        KeyUsage::EncryptDecrypt,
        KeyOptions {
            expires_in: Duration::try_days(1_000_000_000),
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(KmsError::InvalidRequestBody(_))));
    assert!(kms.keys.get_key_by_name("forever", None).is_err());

    let key = kms
        .keys
        .generate_key(
            "short",
            KeyType::Aes256Gcm,
            KeyUsage::EncryptDecrypt,
            KeyOptions {
                expires_in: Some(Duration::hours(1)),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(key.expires_at.is_some_and(|t| t > key.created));
}

#[test]
fn test_usage_is_enforced() {
    let kms = kms();
    let aes = aes_key(&kms, "enc");
    let ed = kms
        .keys
        .generate_key("sig", KeyType::Ed25519, KeyUsage::SignVerify, KeyOptions::default())
        .unwrap()
        .id;

    assert!(matches!(kms.keys.sign(&aes, b"m"), Err(KmsError::WrongUsage { .. })));
    assert!(matches!(kms.keys.encrypt(&ed, b"m"), Err(KmsError::WrongUsage { .. })));
    assert!(matches!(kms.keys.get_public_key(&aes), Err(KmsError::NotAsymmetric(_))));

    assert!(matches!(
        kms.keys.generate_key("bad", KeyType::Aes256Gcm, KeyUsage::SignVerify, KeyOptions::default()),
        Err(KmsError::WrongUsage { .. })
    ));
    assert!(matches!(
        kms.keys.generate_key(
            "mpc",
            "ecdsa".parse().unwrap(),
            KeyUsage::Mpc,
            KeyOptions::default()
        ),
        Err(KmsError::UnsupportedKeyType(_))
    ));
}

#[test]
fn test_soft_delete_keeps_decryption_working() {
    let kms = kms();
    let id = aes_key(&kms, "retired");
    let env = kms.keys.encrypt(&id, b"archived").unwrap();

    let before = kms.keys.delete_key(&id).unwrap();
    assert_eq!(before.status, KeyStatus::Active);

    assert_eq!(kms.keys.get_key(&id).unwrap().status, KeyStatus::Deleted);
    assert!(kms.keys.list_keys("").unwrap().iter().all(|k| k.id != id));
    assert!(matches!(kms.keys.encrypt(&id, b"new"), Err(KmsError::InactiveKey(_))));
    assert_eq!(kms.keys.decrypt(&env).unwrap(), b"archived");
}

#[test]
fn test_expired_key_is_unusable() {
    let kms = kms();
    let key = kms
        .keys
        .generate_key(
            "short-lived",
            KeyType::Aes256Gcm,
            KeyUsage::EncryptDecrypt,
            KeyOptions {
                expires_in: Some(Duration::milliseconds(-1)),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(matches!(kms.keys.encrypt(&key.id, b"m"), Err(KmsError::InactiveKey(_))));
}

#[test]
fn test_rotation_keeps_old_versions_decryptable() {
    let kms = kms();
    let id = aes_key(&kms, "rotating");
    let v1 = kms.keys.encrypt(&id, b"first").unwrap();

    let rotated = kms.keys.rotate_key(&id).unwrap();
    assert_eq!(rotated.version, 2);

    let v2 = kms.keys.encrypt(&id, b"second").unwrap();
    assert_eq!(v2.key_version, 2);
    assert_eq!(kms.keys.decrypt(&v1).unwrap(), b"first");
    assert_eq!(kms.keys.decrypt(&v2).unwrap(), b"second");
}

#[test]
fn test_rotated_signing_key_signs_with_new_version() {
    let kms = kms();
    let id = kms
        .keys
        .generate_key("sig", KeyType::Ecdsa(EcCurve::P256), KeyUsage::SignVerify, KeyOptions::default())
        .unwrap()
        .id;
    let old_pem = kms.keys.get_public_key(&id).unwrap();
    kms.keys.rotate_key(&id).unwrap();
    assert_ne!(kms.keys.get_public_key(&id).unwrap(), old_pem);

    let sig = kms.keys.sign(&id, b"m").unwrap();
    assert!(kms.keys.verify(&id, b"m", &sig).unwrap());
}

#[test]
fn test_unknown_key_is_not_found() {
    let kms = kms();
    assert!(matches!(kms.keys.get_key("nope"), Err(KmsError::NotFound { .. })));
    assert!(matches!(kms.keys.encrypt("nope", b"m"), Err(KmsError::NotFound { .. })));
}

#[test]
fn test_concurrent_generation_is_consistent() {
    let kms = Arc::new(kms());
    std::thread::scope(|s| {
        for i in 0..8 {
            let kms = kms.clone();
            s.spawn(move || aes_key(&kms, &format!("k{i}")));
        }
    });
    assert_eq!(kms.keys.list_keys("k").unwrap().len(), 8);
}

#[test]
fn test_keys_survive_reopen_with_same_root_key() {
    let dir = tempfile::tempdir().unwrap();
    let config = KmsConfig {
        data_dir: dir.path().to_path_buf(),
        sync_writes: true,
        ..KmsConfig::default()
    };

    let (id, env) = {
        let kms = Kms::open(&config).unwrap();
        let id = aes_key(&kms, "durable");
        let env = kms.keys.encrypt(&id, b"persisted").unwrap();
        kms.close().unwrap();
        (id, env)
    };

    let kms = Kms::open(&config).unwrap();
    assert_eq!(kms.keys.get_key(&id).unwrap().name, "durable");
    assert_eq!(kms.keys.decrypt(&env).unwrap(), b"persisted");
}
