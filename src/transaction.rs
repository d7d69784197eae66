use std::marker::PhantomData;
use std::mem;
use std::mem::MaybeUninit;
use std::ptr;
use std::slice;

use libc::c_void;
use lmdb_sys as ffi;
use log::trace;

use crate::constants::{DbMask, EnvMask, WriteMask};
use crate::cursor::{RoCursor, RwCursor};
use crate::database::{compare_shim, open_database, Comparator, Database, DatabaseOptions};
use crate::env::{Environment, Stat};
use crate::error::{status, Error, Result};

pub(crate) fn slice_to_val(slice: &[u8]) -> ffi::MDB_val {
    ffi::MDB_val {
        mv_size: slice.len(),
        mv_data: slice.as_ptr() as *mut c_void,
    }
}

pub(crate) fn empty_val() -> ffi::MDB_val {
    ffi::MDB_val {
        mv_size: 0,
        mv_data: ptr::null_mut(),
    }
}

/// View engine-owned bytes. The caller chooses a lifetime no longer than the
/// owning transaction's borrow.
pub(crate) unsafe fn val_to_slice<'a>(val: &ffi::MDB_val) -> &'a [u8] {
    if val.mv_size == 0 {
        &[]
    } else {
        slice::from_raw_parts(val.mv_data as *const u8, val.mv_size)
    }
}

/// Named write-behavior switches, translated to the engine's bitmask at the
/// boundary call.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutFlags {
    /// Fail with [`Error::AlreadyExists`] if the key is present. On
    /// duplicate-key tables this refuses a second value rather than adding one.
    pub dont_overwrite_key: bool,
    /// Duplicate-key tables: fail with [`Error::AlreadyExists`] if this exact
    /// key/value pair is present.
    pub dont_overwrite_item: bool,
    /// Caller asserts keys arrive in ascending order, enabling the append
    /// fast path. Unchecked precondition: the engine corrupts ordering
    /// silently if the assertion is false.
    pub data_already_sorted: bool,
    /// Caller asserts duplicate values arrive in ascending order. Same
    /// unchecked precondition as `data_already_sorted`.
    pub set_already_sorted: bool,
}

impl PutFlags {
    pub(crate) fn write_mask(&self) -> WriteMask {
        let mut mask = WriteMask::empty();
        if self.dont_overwrite_key {
            mask |= WriteMask::NOOVERWRITE;
        }
        if self.dont_overwrite_item {
            mask |= WriteMask::NODUPDATA;
        }
        if self.data_already_sorted {
            mask |= WriteMask::APPEND;
        }
        if self.set_already_sorted {
            mask |= WriteMask::APPENDDUP;
        }
        mask
    }
}

/// Outcome of [`RwTransaction::reserve`].
pub enum Reserved<'txn> {
    /// Engine-owned, uninitialized storage of the requested length for the
    /// caller to fill in place.
    Fresh(&'txn mut [u8]),
    /// The key was already present and `dont_overwrite_key` was set; this is
    /// the existing value.
    FoundExisting(&'txn [u8]),
}

/// Read surface shared by every transaction kind.
///
/// Byte-slice views returned by [`Transaction::get`] borrow the transaction
/// and cannot outlive it; on a read-write transaction they also block further
/// writes (which take `&mut self`), so a view can never observe a page its
/// own transaction has since rewritten.
pub trait Transaction: Sized {
    /// The raw engine handle. Touching it escapes every invariant this layer
    /// enforces; it exists for extension, not routine use.
    fn txn(&self) -> *mut ffi::MDB_txn;

    /// The transaction's snapshot identifier. A parent and its currently
    /// open child report the same identifier.
    fn id(&self) -> u64 {
        unsafe { ffi::mdb_txn_id(self.txn()) as u64 }
    }

    /// Open a handle to a named table (or `None` for the unnamed table).
    ///
    /// Fails with [`Error::NotFound`] if a named table does not exist; see
    /// [`RwTransaction::create_database`] to create it.
    fn open_database(&self, name: Option<&str>, options: &DatabaseOptions) -> Result<Database> {
        open_database(self.txn(), name, options.open_mask()?)
    }

    /// Structural counters for one table as of this snapshot.
    fn stat(&self, db: Database) -> Result<Stat> {
        let mut raw = MaybeUninit::<ffi::MDB_stat>::uninit();
        unsafe {
            status(ffi::mdb_stat(self.txn(), db.dbi(), raw.as_mut_ptr()))?;
            Ok(Stat::from_raw(&raw.assume_init()))
        }
    }

    /// Look up `key`, returning a zero-copy view of its value.
    ///
    /// Fails with [`Error::NotFound`] if absent. On duplicate-key tables this
    /// returns the first value in item order.
    fn get<'txn>(&'txn self, db: Database, key: &[u8]) -> Result<&'txn [u8]> {
        let mut key_val = slice_to_val(key);
        let mut data_val = empty_val();
        unsafe {
            status(ffi::mdb_get(self.txn(), db.dbi(), &mut key_val, &mut data_val))?;
            Ok(val_to_slice(&data_val))
        }
    }

    /// Open a read-only cursor over `db`, bound to this transaction.
    fn cursor(&self, db: Database) -> Result<RoCursor<'_>> {
        RoCursor::open(self, db)
    }

    /// Install a custom primary key ordering for `db` in this transaction.
    ///
    /// See [`Comparator`] for the rules on when an ordering may be installed.
    fn set_key_order<C: Comparator>(&self, db: Database) -> Result<()> {
        unsafe { status(ffi::mdb_set_compare(self.txn(), db.dbi(), Some(compare_shim::<C>))) }
    }

    /// Install a custom duplicate-value ordering for a duplicate-key table.
    fn set_item_order<C: Comparator>(&self, db: Database) -> Result<()> {
        unsafe { status(ffi::mdb_set_dupsort(self.txn(), db.dbi(), Some(compare_shim::<C>))) }
    }

    /// Commit, making writes visible to the parent (for a nested transaction)
    /// or durable (for a top-level one, subject to the durability flags).
    ///
    /// Consumes the transaction; every cursor and view derived from it is
    /// already statically unusable afterwards.
    fn commit(self) -> Result<()> {
        let result = unsafe { status(ffi::mdb_txn_commit(self.txn())) };
        mem::forget(self);
        result
    }

    /// Discard the transaction and every uncommitted write. Never fails.
    fn abort(self) {
        // Drop runs mdb_txn_abort.
    }
}

/// A read-only transaction pinned to the point-in-time snapshot that existed
/// when it began, unaffected by concurrent writers.
#[derive(Debug)]
pub struct RoTransaction<'env> {
    txn: *mut ffi::MDB_txn,
    _marker: PhantomData<&'env Environment>,
}

impl<'env> RoTransaction<'env> {
    pub(crate) fn new(env: &'env Environment) -> Result<RoTransaction<'env>> {
        let mut txn: *mut ffi::MDB_txn = ptr::null_mut();
        unsafe {
            status(ffi::mdb_txn_begin(
                env.env_ptr(),
                ptr::null_mut(),
                EnvMask::RDONLY.bits(),
                &mut txn,
            ))?;
        }
        trace!("began read-only transaction");
        Ok(RoTransaction {
            txn,
            _marker: PhantomData,
        })
    }

    /// Release this transaction's reader slot while keeping the handle for
    /// reuse, so a polling loop does not pay a full begin/abort per cycle.
    pub fn reset(self) -> InactiveTransaction<'env> {
        let txn = self.txn;
        mem::forget(self);
        unsafe { ffi::mdb_txn_reset(txn) };
        InactiveTransaction {
            txn,
            _marker: PhantomData,
        }
    }
}

impl<'env> Transaction for RoTransaction<'env> {
    fn txn(&self) -> *mut ffi::MDB_txn {
        self.txn
    }
}

impl<'env> Drop for RoTransaction<'env> {
    fn drop(&mut self) {
        unsafe { ffi::mdb_txn_abort(self.txn) }
    }
}

/// A reset read-only transaction: it holds no reader slot and reads nothing
/// until [`InactiveTransaction::renew`] gives it a fresh snapshot.
#[derive(Debug)]
pub struct InactiveTransaction<'env> {
    txn: *mut ffi::MDB_txn,
    _marker: PhantomData<&'env Environment>,
}

impl<'env> InactiveTransaction<'env> {
    /// Re-acquire a reader slot and pin the latest snapshot.
    pub fn renew(self) -> Result<RoTransaction<'env>> {
        let txn = self.txn;
        unsafe { status(ffi::mdb_txn_renew(txn))? };
        mem::forget(self);
        Ok(RoTransaction {
            txn,
            _marker: PhantomData,
        })
    }
}

impl<'env> Drop for InactiveTransaction<'env> {
    fn drop(&mut self) {
        unsafe { ffi::mdb_txn_abort(self.txn) }
    }
}

/// The environment's single read-write transaction.
///
/// Writers are serialized engine-wide; a second `begin_rw_txn` blocks until
/// this one commits or aborts. Beware beginning two on the same thread: the
/// engine's writer lock is not re-entrant and the thread deadlocks against
/// itself.
#[derive(Debug)]
pub struct RwTransaction<'env> {
    txn: *mut ffi::MDB_txn,
    _marker: PhantomData<&'env Environment>,
}

impl<'env> RwTransaction<'env> {
    pub(crate) fn new(env: &'env Environment) -> Result<RwTransaction<'env>> {
        let mut txn: *mut ffi::MDB_txn = ptr::null_mut();
        unsafe {
            status(ffi::mdb_txn_begin(
                env.env_ptr(),
                ptr::null_mut(),
                0,
                &mut txn,
            ))?;
        }
        trace!("began read-write transaction");
        Ok(RwTransaction {
            txn,
            _marker: PhantomData,
        })
    }

    /// Open a named table, creating it if it does not exist.
    pub fn create_database(
        &mut self,
        name: Option<&str>,
        options: &DatabaseOptions,
    ) -> Result<Database> {
        open_database(self.txn, name, options.open_mask()? | DbMask::CREATE)
    }

    /// Store `data` under `key`.
    pub fn put(&mut self, db: Database, key: &[u8], data: &[u8], flags: &PutFlags) -> Result<()> {
        let mut key_val = slice_to_val(key);
        let mut data_val = slice_to_val(data);
        unsafe {
            status(ffi::mdb_put(
                self.txn,
                db.dbi(),
                &mut key_val,
                &mut data_val,
                flags.write_mask().bits(),
            ))
        }
    }

    /// Insert `data` under `key` if the key is absent; otherwise leave the
    /// table untouched and return a view of the value already stored.
    pub fn get_or_put<'txn>(
        &'txn mut self,
        db: Database,
        key: &[u8],
        data: &[u8],
    ) -> Result<Option<&'txn [u8]>> {
        let mut key_val = slice_to_val(key);
        let mut data_val = slice_to_val(data);
        let rc = unsafe {
            ffi::mdb_put(
                self.txn,
                db.dbi(),
                &mut key_val,
                &mut data_val,
                WriteMask::NOOVERWRITE.bits(),
            )
        };
        match status(rc) {
            Ok(()) => Ok(None),
            // The engine points data_val at the existing value on conflict.
            Err(Error::AlreadyExists) => Ok(Some(unsafe { val_to_slice(&data_val) })),
            Err(err) => Err(err),
        }
    }

    /// Allocate `len` bytes of engine-owned storage for `key`'s value and
    /// hand it back for the caller to fill in place, avoiding a double copy.
    ///
    /// The buffer contents are uninitialized until written. With
    /// `dont_overwrite_key` set, an existing key yields
    /// [`Reserved::FoundExisting`] instead. Not usable on duplicate-key
    /// tables (it would be ambiguous which duplicate to reserve); the engine
    /// rejects the combination with [`Error::InvalidParameter`].
    pub fn reserve<'txn>(
        &'txn mut self,
        db: Database,
        key: &[u8],
        len: usize,
        flags: &PutFlags,
    ) -> Result<Reserved<'txn>> {
        let mut key_val = slice_to_val(key);
        let mut data_val = ffi::MDB_val {
            mv_size: len,
            mv_data: ptr::null_mut(),
        };
        let mask = flags.write_mask() | WriteMask::RESERVE;
        let rc = unsafe {
            ffi::mdb_put(self.txn, db.dbi(), &mut key_val, &mut data_val, mask.bits())
        };
        match status(rc) {
            Ok(()) => Ok(Reserved::Fresh(unsafe {
                slice::from_raw_parts_mut(data_val.mv_data as *mut u8, data_val.mv_size)
            })),
            Err(Error::AlreadyExists) => {
                Ok(Reserved::FoundExisting(unsafe { val_to_slice(&data_val) }))
            }
            Err(err) => Err(err),
        }
    }

    /// Delete all values stored under `key`, or exactly `item` on a
    /// duplicate-key table. Fails with [`Error::NotFound`] if absent.
    pub fn del(&mut self, db: Database, key: &[u8], item: Option<&[u8]>) -> Result<()> {
        let mut key_val = slice_to_val(key);
        unsafe {
            match item {
                Some(item) => {
                    let mut data_val = slice_to_val(item);
                    status(ffi::mdb_del(self.txn, db.dbi(), &mut key_val, &mut data_val))
                }
                None => status(ffi::mdb_del(
                    self.txn,
                    db.dbi(),
                    &mut key_val,
                    ptr::null_mut(),
                )),
            }
        }
    }

    /// Remove every entry from `db`, keeping the table itself.
    pub fn clear_database(&mut self, db: Database) -> Result<()> {
        unsafe { status(ffi::mdb_drop(self.txn, db.dbi(), 0)) }
    }

    /// Remove every entry from `db` and delete the table definition.
    ///
    /// # Safety
    ///
    /// Invalidates every `Copy` of the handle; using one afterwards is
    /// reported by the engine as [`Error::BadDatabaseHandle`] at best and
    /// addresses a recycled handle at worst.
    pub unsafe fn drop_database(&mut self, db: Database) -> Result<()> {
        status(ffi::mdb_drop(self.txn, db.dbi(), 1))
    }

    /// Open a read-write cursor over `db`, bound to this transaction.
    pub fn rw_cursor(&mut self, db: Database) -> Result<RwCursor<'_>> {
        RwCursor::open(self, db)
    }

    /// Begin a nested transaction.
    ///
    /// The child shares this transaction's identifier; committing it folds
    /// its writes into this transaction (still not durable until the parent
    /// commits), aborting discards only the child's writes. The exclusive
    /// borrow keeps the parent unusable until the child is resolved, so the
    /// engine's blocked-parent failure cannot be expressed in safe code.
    pub fn begin_nested(&mut self) -> Result<RwTransaction<'_>> {
        let env = unsafe { ffi::mdb_txn_env(self.txn) };
        let mut nested: *mut ffi::MDB_txn = ptr::null_mut();
        unsafe { status(ffi::mdb_txn_begin(env, self.txn, 0, &mut nested))? };
        trace!("began nested transaction");
        Ok(RwTransaction {
            txn: nested,
            _marker: PhantomData,
        })
    }
}

impl<'env> Transaction for RwTransaction<'env> {
    fn txn(&self) -> *mut ffi::MDB_txn {
        self.txn
    }
}

impl<'env> Drop for RwTransaction<'env> {
    fn drop(&mut self) {
        unsafe { ffi::mdb_txn_abort(self.txn) }
    }
}
