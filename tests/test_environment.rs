use std::fs::File;
use std::os::unix::io::AsRawFd;

use tempfile::TempDir;

use mapledb::{
    DatabaseOptions, Environment, EnvironmentOptions, Error, PutFlags, RuntimeFlags, Transaction,
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

#[test]
fn test_open_and_path() {
    let (dir, env) = setup_env();
    assert_eq!(env.path(), dir.path().canonicalize().unwrap());
}

#[test]
fn test_open_missing_path() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("does_not_exist");
    let result = Environment::open(&missing, &test_options());
    assert!(matches!(result, Err(Error::NotFound)));
}

#[test]
fn test_double_open_rejected() {
    let (dir, _env) = setup_env();
    let second = Environment::open(dir.path(), &test_options());
    assert!(matches!(second, Err(Error::EnvironmentAlreadyOpen)));
}

#[test]
fn test_reopen_after_close() {
    let (dir, env) = setup_env();
    drop(env);
    let env = Environment::open(dir.path(), &test_options()).unwrap();
    assert!(env.stat().is_ok());
}

#[test]
fn test_stat_and_info() {
    let (_dir, env) = setup_env();
    let stat = env.stat().unwrap();
    assert!(stat.page_size > 0);
    assert_eq!(stat.entries, 0);

    let info = env.info().unwrap();
    assert_eq!(info.map_size, 10 * 1024 * 1024);
    assert!(info.max_readers > 0);
    assert!(env.max_key_size() > 0);
}

#[test]
fn test_runtime_flags() {
    let (_dir, env) = setup_env();
    assert!(!env.flags().unwrap().contains(RuntimeFlags::NO_SYNC));

    env.enable_flags(RuntimeFlags::NO_SYNC).unwrap();
    assert!(env.flags().unwrap().contains(RuntimeFlags::NO_SYNC));

    env.disable_flags(RuntimeFlags::NO_SYNC).unwrap();
    assert!(!env.flags().unwrap().contains(RuntimeFlags::NO_SYNC));
}

#[test]
fn test_set_map_size() {
    let (_dir, mut env) = setup_env();
    env.set_map_size(20 * 1024 * 1024).unwrap();
    assert_eq!(env.info().unwrap().map_size, 20 * 1024 * 1024);
}

#[test]
fn test_sync_and_purge() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    txn.put(db, b"key", b"value", &PutFlags::default()).unwrap();
    txn.commit().unwrap();

    env.sync(true).unwrap();
    assert_eq!(env.purge().unwrap(), 0);
}

#[test]
fn test_no_sub_dir_layout() {
    let dir = TempDir::new().unwrap();
    let file_path = dir.path().join("data.mdb");
    let options = EnvironmentOptions {
        no_sub_dir: true,
        ..test_options()
    };

    let env = Environment::open(&file_path, &options).unwrap();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    txn.put(db, b"k", b"v", &PutFlags::default()).unwrap();
    txn.commit().unwrap();
    drop(env);

    let reopen_options = EnvironmentOptions {
        read_only: true,
        ..options
    };
    let env = Environment::open(&file_path, &reopen_options).unwrap();
    let txn = env.begin_ro_txn().unwrap();
    let db = txn.open_database(None, &DatabaseOptions::default()).unwrap();
    assert_eq!(txn.get(db, b"k").unwrap(), &b"v"[..]);
}

// 128 sequentially inserted single-byte keys survive a snapshot copy intact.
#[test]
fn test_copy_roundtrip() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    for i in 0..128u8 {
        txn.put(db, &[i], &[i], &PutFlags::default()).unwrap();
    }
    txn.commit().unwrap();

    for compact in [false, true] {
        let copy_dir = TempDir::new().unwrap();
        env.copy_to(copy_dir.path(), compact).unwrap();

        let copy = Environment::open(copy_dir.path(), &test_options()).unwrap();
        let txn = copy.begin_ro_txn().unwrap();
        let db = txn.open_database(None, &DatabaseOptions::default()).unwrap();
        assert_eq!(txn.stat(db).unwrap().entries, 128);
        for i in 0..128u8 {
            assert_eq!(txn.get(db, &[i]).unwrap(), &[i][..]);
        }
    }
}

#[test]
fn test_pipe_to_fd() {
    let (_dir, env) = setup_env();
    let mut txn = env.begin_rw_txn().unwrap();
    let db = txn.create_database(None, &DatabaseOptions::default()).unwrap();
    txn.put(db, b"k", b"v", &PutFlags::default()).unwrap();
    txn.commit().unwrap();

    let out_dir = TempDir::new().unwrap();
    let out = File::create(out_dir.path().join("backup.mdb")).unwrap();
    env.pipe_to(out.as_raw_fd(), false).unwrap();
    assert!(out.metadata().unwrap().len() > 0);
}
