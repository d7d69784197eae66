use tempfile::TempDir;

use mapledb::{
    DatabaseOptions, Environment, EnvironmentOptions, Error, PutFlags, Reserved, Transaction,
};

fn test_options() -> EnvironmentOptions {
    EnvironmentOptions {
        map_size: Some(10 * 1024 * 1024),
        max_databases: Some(8),
        ..Default::default()
    }
}

fn setup_env() -> (TempDir, Environment) {
    let dir = TempDir::new().unwrap();
    let env = Environment::open(dir.path(), &test_options()).unwrap();
    (dir, env)
}

fn setup_env_no_tls() -> (TempDir, Environment) {
    let dir = TempDir::new().unwrap();
    let options = EnvironmentOptions {
        no_tls: true,
        ..test_options()
    };
    let env = Environment::open(dir.path(), &options).unwrap();
    (dir, env)
}

fn no_overwrite() -> PutFlags {
    PutFlags {
        dont_overwrite_key: true,
        ..Default::default()
    }
}

#[test]
fn test_put_get_roundtrip() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();

    txn.put(db, b"alpha", b"1", &PutFlags::default()).unwrap();
    txn.put(db, b"beta", b"2", &PutFlags::default()).unwrap();

    // Uncommitted writes are visible to their own transaction.
    assert_eq!(txn.get(db, b"alpha").unwrap(), &b"1"[..]);
    assert_eq!(txn.get(db, b"beta").unwrap(), &b"2"[..]);
    assert!(matches!(txn.get(db, b"gamma"), Err(Error::NotFound)));
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_database(None, &DatabaseOptions::default()).unwrap();
    assert_eq!(txn.get(db, b"alpha").unwrap(), &b"1"[..]);
    assert_eq!(txn.stat(db).unwrap().entries, 2);
}

#[test]
fn test_dont_overwrite_key() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();

    txn.put(db, b"key", b"first", &no_overwrite()).unwrap();
    let result = txn.put(db, b"key", b"second", &no_overwrite());
    assert!(matches!(result, Err(Error::AlreadyExists)));
    assert_eq!(txn.get(db, b"key").unwrap(), &b"first"[..]);
}

#[test]
fn test_get_or_put() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();

    assert!(txn.get_or_put(db, b"key", b"first").unwrap().is_none());
    let existing = txn.get_or_put(db, b"key", b"second").unwrap();
    assert_eq!(existing, Some(&b"first"[..]));
    assert_eq!(txn.get(db, b"key").unwrap(), &b"first"[..]);
}

#[test]
fn test_nested_commit_folds_into_parent() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    txn.put(db, b"parent", b"p", &PutFlags::default()).unwrap();

    let parent_id = txn.id();
    let mut child = txn.begin_nested().unwrap();
    assert_eq!(child.id(), parent_id);
    assert_eq!(child.get(db, b"parent").unwrap(), &b"p"[..]);
    child.put(db, b"child", b"c", &PutFlags::default()).unwrap();
    child.commit().unwrap();

    assert_eq!(txn.get(db, b"child").unwrap(), &b"c"[..]);
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_database(None, &DatabaseOptions::default()).unwrap();
    assert_eq!(txn.get(db, b"parent").unwrap(), &b"p"[..]);
    assert_eq!(txn.get(db, b"child").unwrap(), &b"c"[..]);
}

#[test]
fn test_nested_abort_discards_only_child_writes() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    txn.put(db, b"parent", b"p", &PutFlags::default()).unwrap();

    let mut child = txn.begin_nested().unwrap();
    child.put(db, b"child", b"c", &PutFlags::default()).unwrap();
    child.abort();

    assert_eq!(txn.get(db, b"parent").unwrap(), &b"p"[..]);
    assert!(matches!(txn.get(db, b"child"), Err(Error::NotFound)));
}

#[test]
fn test_abort_discards_writes() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    txn.put(db, b"key", b"value", &PutFlags::default()).unwrap();
    txn.commit().unwrap();

    let mut txn = env.begin_rw_txn().unwrap();
    txn.put(db, b"key", b"changed", &PutFlags::default()).unwrap();
    txn.abort();

    let txn = env.begin_ro_txn().unwrap();
    assert_eq!(txn.get(db, b"key").unwrap(), &b"value"[..]);
}

#[test]
fn test_snapshot_isolation() {
    let (_dir, env) = setup_env_no_tls();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    txn.put(db, b"key", b"old", &PutFlags::default()).unwrap();
    txn.commit().unwrap();

    let reader = env.begin_ro_txn().unwrap();

    let mut writer = env.begin_rw_txn().unwrap();
    writer.put(db, b"key", b"new", &PutFlags::default()).unwrap();
    writer.commit().unwrap();

    // The reader stays pinned to the snapshot it began with.
    assert_eq!(reader.get(db, b"key").unwrap(), &b"old"[..]);

    let fresh = env.begin_ro_txn().unwrap();
    assert_eq!(fresh.get(db, b"key").unwrap(), &b"new"[..]);
    assert!(fresh.id() > reader.id());
}

#[test]
fn test_reset_renew_moves_to_latest_snapshot() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    txn.put(db, b"key", b"old", &PutFlags::default()).unwrap();
    txn.commit().unwrap();

    let reader = env.begin_ro_txn().unwrap();
    assert_eq!(reader.get(db, b"key").unwrap(), &b"old"[..]);
    let inactive = reader.reset();

    let mut writer = env.begin_rw_txn().unwrap();
    writer.put(db, b"key", b"new", &PutFlags::default()).unwrap();
    writer.commit().unwrap();

    let reader = inactive.renew().unwrap();
    assert_eq!(reader.get(db, b"key").unwrap(), &b"new"[..]);
}

#[test]
fn test_del() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    txn.put(db, b"key", b"value", &PutFlags::default()).unwrap();

    txn.del(db, b"key", None).unwrap();
    assert!(matches!(txn.get(db, b"key"), Err(Error::NotFound)));
    assert!(matches!(txn.del(db, b"key", None), Err(Error::NotFound)));
}

#[test]
fn test_del_single_item() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let options = DatabaseOptions {
        duplicate_keys: true,
        ..Default::default()
    };
    let db = txn.create_database(Some("dups"), &options).unwrap();
    txn.put(db, b"key", b"v1", &PutFlags::default()).unwrap();
    txn.put(db, b"key", b"v2", &PutFlags::default()).unwrap();

    txn.del(db, b"key", Some(b"v1")).unwrap();
    assert_eq!(txn.get(db, b"key").unwrap(), &b"v2"[..]);
    assert!(matches!(
        txn.del(db, b"key", Some(b"v1")),
        Err(Error::NotFound)
    ));
}

#[test]
fn test_reserve() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();

    match txn.reserve(db, b"key", 5, &no_overwrite()).unwrap() {
        Reserved::Fresh(buf) => {
            assert_eq!(buf.len(), 5);
            buf.copy_from_slice(b"hello");
        }
        Reserved::FoundExisting(_) => panic!("key should be absent"),
    }
    assert_eq!(txn.get(db, b"key").unwrap(), &b"hello"[..]);

    match txn.reserve(db, b"key", 5, &no_overwrite()).unwrap() {
        Reserved::Fresh(_) => panic!("key should be present"),
        Reserved::FoundExisting(existing) => assert_eq!(existing, &b"hello"[..]),
    }
}

#[test]
fn test_reserve_rejected_on_duplicate_table() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let options = DatabaseOptions {
        duplicate_keys: true,
        ..Default::default()
    };
    let db = txn.create_database(Some("dups"), &options).unwrap();

    let result = txn.reserve(db, b"key", 4, &PutFlags::default());
    assert!(matches!(result, Err(Error::InvalidParameter)));
}

#[test]
fn test_clear_database() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    for i in 0..16u8 {
        txn.put(db, &[i], &[i], &PutFlags::default()).unwrap();
    }
    assert_eq!(txn.stat(db).unwrap().entries, 16);

    txn.clear_database(db).unwrap();
    assert_eq!(txn.stat(db).unwrap().entries, 0);
    txn.commit().unwrap();

    // The table definition itself survives.
    let txn = env.begin_ro_txn().unwrap();
    assert!(txn.open_database(None, &DatabaseOptions::default()).is_ok());
}

#[test]
fn test_drop_database() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn
        .create_database(Some("doomed"), &DatabaseOptions::default())
        .unwrap();
    txn.put(db, b"key", b"value", &PutFlags::default()).unwrap();
    unsafe { txn.drop_database(db).unwrap() };
    txn.commit().unwrap();

    let txn = env.begin_ro_txn().unwrap();
    let result = txn.open_database(Some("doomed"), &DatabaseOptions::default());
    assert!(matches!(result, Err(Error::NotFound)));
}

#[test]
fn test_open_missing_named_database() {
    let (_dir, env) = setup_env();
    let txn = env.begin_ro_txn().unwrap();
    let result = txn.open_database(Some("missing"), &DatabaseOptions::default());
    assert!(matches!(result, Err(Error::NotFound)));
}

#[test]
fn test_dup_layout_flags_require_duplicate_keys() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let options = DatabaseOptions {
        fixed_size_duplicates: true,
        ..Default::default()
    };
    let result = txn.create_database(Some("bad"), &options);
    assert!(matches!(result, Err(Error::IncompatibleOperation)));
}

#[test]
fn test_read_only_env_rejects_writer() {
    let (dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    txn.put(db, b"key", b"value", &PutFlags::default()).unwrap();
    txn.commit().unwrap();
    drop(env);

    let options = EnvironmentOptions {
        read_only: true,
        ..test_options()
    };
    let env = Environment::open(dir.path(), &options).unwrap();
    assert!(env.begin_rw_txn().is_err());

    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_database(None, &DatabaseOptions::default()).unwrap();
    assert_eq!(txn.get(db, b"key").unwrap(), &b"value"[..]);
}
