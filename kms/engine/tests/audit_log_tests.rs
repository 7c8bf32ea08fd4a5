use kms_engine::Kms;
use kms_engine::audit::{AuditEventType, AuditRecord, AuditTracker};
use kms_engine::types::{KeyType, KeyUsage};
use kms_engine::keys::KeyOptions;

#[test]
fn test_audit_log_adds_and_retrieves() {
    let tracker = AuditTracker::new(10);

    tracker.log(AuditRecord::new(
        AuditEventType::KeyCreated,
        "key_1",
        "Generated key",
    ));

    let recent = tracker.recent(1);
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].subject_id, "key_1");
    assert_eq!(recent[0].message, "Generated key");
    assert_eq!(recent[0].event_type_label(), "KEY_CREATED");
}

#[test]
fn test_audit_log_eviction() {
    let tracker = AuditTracker::new(3);

    for i in 0..5 {
        tracker.log(
            AuditRecord::new(
                AuditEventType::PartialSignature,
                &format!("request_{i}"),
                format!("{i}/5"),
            )
            .with_node(&format!("node_{i}")),
        );
    }

    let recent = tracker.recent(5);
    assert_eq!(recent.len(), 3); // oldest two evicted
    assert_eq!(recent[0].subject_id, "request_4");
    assert_eq!(recent[2].subject_id, "request_2");
    assert_eq!(recent[0].node_id.as_deref(), Some("node_4"));
}

#[test]
fn test_audit_log_thread_safety() {
    let tracker = AuditTracker::new(100);

    std::thread::scope(|s| {
        for i in 0..10 {
            let tracker = &tracker;
            s.spawn(move || {
                tracker.log(AuditRecord::new(
                    AuditEventType::SigningRequested,
                    &format!("thread_{i}"),
                    "concurrent event",
                ));
            });
        }
    });

    assert_eq!(tracker.recent(10).len(), 10);
    assert_eq!(tracker.len(), 10);
}

#[test]
fn test_kms_operations_are_audited_without_material() {
    let kms = Kms::in_memory().unwrap();
    let key = kms
        .keys
        .generate_key("audited", KeyType::Aes256Gcm, KeyUsage::EncryptDecrypt, KeyOptions::default())
        .unwrap();
    kms.keys.delete_key(&key.id).unwrap();

    let recent = kms.audit.recent(10);
    assert_eq!(recent[0].event_type, AuditEventType::KeyDeleted);
    assert_eq!(recent[1].event_type, AuditEventType::KeyCreated);
    assert!(recent.iter().all(|r| r.subject_id == key.id));
}
