use kms_engine::keys::KeyOptions;
use kms_engine::secrets::{DEFAULT_KEY_NAME, SecretOptions};
use kms_engine::types::{KeyType, KeyUsage};
use kms_engine::{Kms, KmsError};

fn opts(env: &str, path: &str) -> SecretOptions {
    SecretOptions {
        environment: env.into(),
        path: path.into(),
        ..Default::default()
    }
}

#[test]
fn test_create_and_read_secret_with_default_key() {
    let kms = Kms::in_memory().unwrap();
    let secret = kms
        .secrets
        .create_secret("DB_PASSWORD", b"hunter2", opts("prod", ""))
        .unwrap();

    assert_eq!(secret.version, 1);
    assert_eq!(secret.path, "/");
    let default_key = kms.keys.get_key_by_name(DEFAULT_KEY_NAME, None).unwrap();
    assert_eq!(secret.key_id, default_key.id);
    assert_eq!(default_key.key_type, KeyType::Aes256Gcm);

    assert_eq!(kms.secrets.get_secret_value(&secret.id).unwrap(), b"hunter2");
    // stored value is an envelope, never the plaintext
    assert!(!secret.sealed_value.windows(7).any(|w| w == b"hunter2"));

    // the default key is created once
    kms.secrets.create_secret("OTHER", b"x", opts("prod", "/")).unwrap();
    assert_eq!(kms.keys.list_keys(DEFAULT_KEY_NAME).unwrap().len(), 1);
}

#[test]
fn test_update_bumps_version_and_keeps_key() {
    let kms = Kms::in_memory().unwrap();
    let key = kms
        .keys
        .generate_key("app", KeyType::Aes256Gcm, KeyUsage::EncryptDecrypt, KeyOptions::default())
        .unwrap();
    let secret = kms
        .secrets
        .create_secret(
            "API_TOKEN",
            b"v1",
            SecretOptions {
                key_id: Some(key.id.clone()),
                ..opts("dev", "/svc")
            },
        )
        .unwrap();

    let updated = kms.secrets.update_secret(&secret.id, b"v2").unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.key_id, key.id);
    assert_eq!(kms.secrets.get_secret_value(&secret.id).unwrap(), b"v2");
}

#[test]
fn test_list_filters_and_find_by_name() {
    let kms = Kms::in_memory().unwrap();
    kms.secrets.create_secret("A", b"1", opts("dev", "/")).unwrap();
    kms.secrets.create_secret("B", b"2", opts("dev", "/app")).unwrap();
    kms.secrets.create_secret("C", b"3", opts("prod", "/")).unwrap();

    assert_eq!(kms.secrets.list_secrets("", "").unwrap().len(), 3);
    assert_eq!(kms.secrets.list_secrets("dev", "").unwrap().len(), 2);
    assert_eq!(kms.secrets.list_secrets("dev", "/app").unwrap().len(), 1);

    let found = kms.secrets.find_secret("B", "dev", "/app", None).unwrap();
    assert_eq!(kms.secrets.open(&found).unwrap(), b"2");
    assert!(matches!(
        kms.secrets.find_secret("B", "prod", "/app", None),
        Err(KmsError::NotFound { .. })
    ));
}

#[test]
fn test_duplicate_name_is_rejected() {
    let kms = Kms::in_memory().unwrap();
    kms.secrets.create_secret("A", b"1", opts("dev", "/")).unwrap();
    assert!(matches!(
        kms.secrets.create_secret("A", b"2", opts("dev", "")),
        Err(KmsError::AlreadyExists { .. })
    ));
    // same name elsewhere is fine
    kms.secrets.create_secret("A", b"2", opts("prod", "/")).unwrap();
}

#[test]
fn test_delete_is_hard() {
    let kms = Kms::in_memory().unwrap();
    let secret = kms.secrets.create_secret("GONE", b"x", opts("", "")).unwrap();
    kms.secrets.delete_secret(&secret.id).unwrap();
    assert!(matches!(kms.secrets.get_secret(&secret.id), Err(KmsError::NotFound { .. })));
    assert!(matches!(kms.secrets.delete_secret(&secret.id), Err(KmsError::NotFound { .. })));
}

#[test]
fn test_secret_under_signing_key_is_rejected() {
    let kms = Kms::in_memory().unwrap();
    let key = kms
        .keys
        .generate_key("sig", KeyType::Ed25519, KeyUsage::SignVerify, KeyOptions::default())
        .unwrap();
    let result = kms.secrets.create_secret(
        "X",
        b"x",
        SecretOptions {
            key_id: Some(key.id),
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(KmsError::WrongUsage { .. })));
}
