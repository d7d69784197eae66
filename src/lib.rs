//! Safe, typed access to the LMDB embedded, transactional, copy-on-write
//! B-tree key/value engine.
//!
//! The engine itself is consumed through its C API and assumed correct; this
//! crate is the handle-lifetime and invariant-enforcement layer on top of it.
//! The rules that the raw API leaves to caller discipline are carried by the
//! type system instead:
//!
//! - an [`Environment`] is the root lifetime anchor; transactions borrow it,
//!   so it cannot close out from under them;
//! - byte-slice views ([`Transaction::get`], [`Entry`]) borrow their
//!   transaction and cannot outlive it;
//! - a [`RwTransaction`] with a live nested child is mutably borrowed and
//!   therefore unusable until the child commits or aborts;
//! - cursors borrow their transaction and die with it, and views read
//!   through a write cursor borrow the cursor itself, so they cannot
//!   overlap its writes.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use mapledb::{DatabaseOptions, Environment, EnvironmentOptions, PutFlags, Transaction};
//!
//! # fn main() -> mapledb::Result<()> {
//! let env = Environment::open(Path::new("data"), &EnvironmentOptions::default())?;
//! let mut txn = env.begin_rw_txn()?;
//! let db = txn.create_database(None, &DatabaseOptions::default())?;
//! txn.put(db, b"key", b"value", &PutFlags::default())?;
//! assert_eq!(txn.get(db, b"key")?, &b"value"[..]);
//! txn.commit()?;
//! # Ok(())
//! # }
//! ```

mod constants;
mod cursor;
mod database;
mod env;
mod error;
mod transaction;

pub use constants::DEFAULT_FILE_MODE;
pub use cursor::{
    Cursor, Entry, FixedSizeItem, ItemPage, PageDirection, Position, RoCursor, RwCursor,
};
pub use database::{Comparator, Database, DatabaseOptions};
pub use env::{EnvInfo, Environment, EnvironmentOptions, RuntimeFlags, Stat};
pub use error::{Error, Result};
pub use transaction::{
    InactiveTransaction, PutFlags, Reserved, RoTransaction, RwTransaction, Transaction,
};
