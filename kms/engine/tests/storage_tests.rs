use std::thread;
use std::time::Duration;

use kms_engine::StorageError;
use kms_engine::storage::{MemoryBackend, SledBackend, StorageBackend};

fn backends() -> Vec<(&'static str, Box<dyn StorageBackend>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let sled = SledBackend::open(dir.path().join("db"), false).unwrap();
    vec![
        ("memory", Box::new(MemoryBackend::new()), None),
        ("sled", Box::new(sled), Some(dir)),
    ]
}

#[test]
fn test_get_set_delete_exists() {
    for (name, store, _dir) in backends() {
        assert!(matches!(store.get("a"), Err(StorageError::NotFound(_))), "{name}");
        store.set("a", b"1").unwrap();
        assert_eq!(store.get("a").unwrap(), b"1", "{name}");
        assert!(store.exists("a").unwrap(), "{name}");

        store.delete("a").unwrap();
        assert!(!store.exists("a").unwrap(), "{name}");
        // deleting again is fine
        store.delete("a").unwrap();
    }
}

#[test]
fn test_list_is_prefix_scoped_and_ordered() {
    for (name, store, _dir) in backends() {
        store.set("kms/key/b", b"").unwrap();
        store.set("kms/key/a", b"").unwrap();
        store.set("kms/key/c", b"").unwrap();
        store.set("kms/keyring", b"").unwrap();
        store.set("kms/secret/x", b"").unwrap();

        assert_eq!(
            store.list("kms/key/").unwrap(),
            vec!["kms/key/a", "kms/key/b", "kms/key/c"],
            "{name}"
        );
    }
}

#[test]
fn test_scan_callback_error_aborts() {
    for (name, store, _dir) in backends() {
        for k in ["p/1", "p/2", "p/3"] {
            store.set(k, k.as_bytes()).unwrap();
        }
        let mut seen = Vec::new();
        let result = store.scan("p/", &mut |key: &str, _value: &[u8]| {
            seen.push(key.to_string());
            if key == "p/2" {
                return Err(StorageError::ScanAborted("stop".into()));
            }
            Ok(())
        });
        assert!(matches!(result, Err(StorageError::ScanAborted(_))), "{name}");
        assert_eq!(seen, vec!["p/1", "p/2"], "{name}");
    }
}

#[test]
fn test_ttl_expiry_and_compaction() {
    for (name, store, _dir) in backends() {
        store.set_with_ttl("short", b"v", Duration::from_millis(100)).unwrap();
        store.set_with_ttl("long", b"v", Duration::from_secs(60)).unwrap();
        store.set("forever", b"v").unwrap();
        assert!(store.exists("short").unwrap(), "{name}");

        thread::sleep(Duration::from_millis(250));

        assert!(matches!(store.get("short"), Err(StorageError::NotFound(_))), "{name}");
        assert!(!store.exists("short").unwrap(), "{name}");
        assert_eq!(store.list("").unwrap(), vec!["forever", "long"], "{name}");

        assert_eq!(store.compact().unwrap(), 1, "{name}");
        assert_eq!(store.compact().unwrap(), 0, "{name}");
        assert!(store.exists("long").unwrap(), "{name}");
    }
}

#[test]
fn test_huge_ttl_never_expires() {
    for (name, store, _dir) in backends() {
        store.set_with_ttl("forever", b"v", Duration::MAX).unwrap();
        store
            .set_with_ttl("far", b"v", Duration::from_millis(u64::MAX))
            .unwrap();
        assert_eq!(store.get("forever").unwrap(), b"v", "{name}");
        assert_eq!(store.get("far").unwrap(), b"v", "{name}");
        assert_eq!(store.compact().unwrap(), 0, "{name}");
        assert!(store.exists("forever").unwrap(), "{name}");
    }
}

#[test]
fn test_transaction_reads_own_writes_and_commits_atomically() {
    for (name, store, _dir) in backends() {
        store.set("x", b"old").unwrap();

        let mut tx = store.begin_tx().unwrap();
        tx.set("x", b"new").unwrap();
        tx.set("y", b"1").unwrap();
        tx.delete("x").unwrap();
        assert!(matches!(tx.get("x"), Err(StorageError::NotFound(_))), "{name}");
        assert_eq!(tx.get("y").unwrap(), b"1", "{name}");
        // nothing visible outside until commit
        assert_eq!(store.get("x").unwrap(), b"old", "{name}");
        assert!(!store.exists("y").unwrap(), "{name}");
        tx.commit().unwrap();

        assert!(!store.exists("x").unwrap(), "{name}");
        assert_eq!(store.get("y").unwrap(), b"1", "{name}");
    }
}

#[test]
fn test_rollback_and_drop_discard_writes() {
    for (name, store, _dir) in backends() {
        let mut tx = store.begin_tx().unwrap();
        tx.set("a", b"1").unwrap();
        tx.rollback();
        assert!(!store.exists("a").unwrap(), "{name}");

        {
            let mut tx = store.begin_tx().unwrap();
            tx.set("b", b"1").unwrap();
        }
        assert!(!store.exists("b").unwrap(), "{name}");

        // the lock was released by both paths
        let tx = store.begin_tx().unwrap();
        tx.commit().unwrap();
    }
}

#[test]
fn test_transactions_linearize_read_modify_write() {
    let store = MemoryBackend::new();
    store.set("counter", b"0").unwrap();

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..25 {
                    let mut tx = store.begin_tx().unwrap();
                    let n: u32 = String::from_utf8(tx.get("counter").unwrap())
                        .unwrap()
                        .parse()
                        .unwrap();
                    tx.set("counter", (n + 1).to_string().as_bytes()).unwrap();
                    tx.commit().unwrap();
                }
            });
        }
    });

    assert_eq!(store.get("counter").unwrap(), b"200");
}

#[test]
fn test_sled_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let store = SledBackend::open(&path, true).unwrap();
        store.set("kms/key/1", b"record").unwrap();
        let mut tx = store.begin_tx().unwrap();
        tx.set("kms/key/2", b"other").unwrap();
        tx.commit().unwrap();
        store.close().unwrap();
    }
    let store = SledBackend::open(&path, true).unwrap();
    assert_eq!(store.get("kms/key/1").unwrap(), b"record");
    assert_eq!(store.list("kms/key/").unwrap().len(), 2);
}
