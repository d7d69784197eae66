use std::cmp::Ordering;
use std::ffi::CString;
use std::slice;

use libc::c_int;
use lmdb_sys as ffi;

use crate::constants::DbMask;
use crate::error::{status, Error, Result};

/// Handle to one named (or the unnamed) key/value table.
///
/// The handle is a small integer the engine caches environment-wide after the
/// first open, so it is freely `Copy` and stays valid for the life of the
/// [`Environment`](crate::Environment) regardless of which transaction opened
/// it. Release it through
/// [`Environment::close_database`](crate::Environment::close_database).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Database {
    dbi: ffi::MDB_dbi,
}

impl Database {
    pub(crate) fn from_dbi(dbi: ffi::MDB_dbi) -> Database {
        Database { dbi }
    }

    pub(crate) fn dbi(self) -> ffi::MDB_dbi {
        self.dbi
    }
}

/// Per-table configuration fixed when the table is first created.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseOptions {
    /// Compare keys back-to-front.
    pub reverse_key: bool,
    /// Keep multiple values per key, sorted.
    pub duplicate_keys: bool,
    /// Keys are native-endian unsigned integers of one fixed size.
    pub integer_key: bool,
    /// With `duplicate_keys`: all values for a key have the same size,
    /// enabling batched multi-value reads and writes.
    pub fixed_size_duplicates: bool,
    /// With `duplicate_keys`: values are native-endian unsigned integers.
    pub integer_duplicates: bool,
    /// With `duplicate_keys`: compare values back-to-front.
    pub reverse_duplicates: bool,
}

impl DatabaseOptions {
    pub(crate) fn open_mask(&self) -> Result<DbMask> {
        if (self.fixed_size_duplicates || self.integer_duplicates || self.reverse_duplicates)
            && !self.duplicate_keys
        {
            // Duplicate-value layout flags mean nothing without DUPSORT and
            // the engine asserts on some combinations rather than failing.
            return Err(Error::IncompatibleOperation);
        }
        let mut mask = DbMask::empty();
        if self.reverse_key {
            mask |= DbMask::REVERSEKEY;
        }
        if self.duplicate_keys {
            mask |= DbMask::DUPSORT;
        }
        if self.integer_key {
            mask |= DbMask::INTEGERKEY;
        }
        if self.fixed_size_duplicates {
            mask |= DbMask::DUPFIXED;
        }
        if self.integer_duplicates {
            mask |= DbMask::INTEGERDUP;
        }
        if self.reverse_duplicates {
            mask |= DbMask::REVERSEDUP;
        }
        Ok(mask)
    }
}

pub(crate) fn open_database(
    txn: *mut ffi::MDB_txn,
    name: Option<&str>,
    mask: DbMask,
) -> Result<Database> {
    let name_c = match name {
        Some(n) => Some(CString::new(n)?),
        None => None,
    };
    let name_ptr = name_c.as_ref().map_or(std::ptr::null(), |n| n.as_ptr());
    let mut dbi: ffi::MDB_dbi = 0;
    unsafe { status(ffi::mdb_dbi_open(txn, name_ptr, mask.bits(), &mut dbi))? };
    Ok(Database::from_dbi(dbi))
}

/// A three-way byte-slice ordering installed per table.
///
/// The comparison is an associated function so the installed capability is
/// stateless; the engine gives the callback no context pointer to smuggle
/// state through.
///
/// A comparator must be installed in every transaction that touches the
/// table, before any data-dependent operation, and must never change once
/// data has been written under it: the engine does not defend against
/// comparing existing entries under a different order and will not re-sort
/// them.
pub trait Comparator {
    fn compare(a: &[u8], b: &[u8]) -> Ordering;
}

pub(crate) unsafe extern "C" fn compare_shim<C: Comparator>(
    a: *const ffi::MDB_val,
    b: *const ffi::MDB_val,
) -> c_int {
    let a = slice::from_raw_parts((*a).mv_data as *const u8, (*a).mv_size);
    let b = slice::from_raw_parts((*b).mv_data as *const u8, (*b).mv_size);
    match C::compare(a, b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}
