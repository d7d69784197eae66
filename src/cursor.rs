use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::slice;

use libc::{c_uint, c_void};
use lmdb_sys as ffi;

use crate::constants::{
    WriteMask, OP_FIRST, OP_FIRST_DUP, OP_GET_BOTH, OP_GET_BOTH_RANGE, OP_GET_CURRENT,
    OP_GET_MULTIPLE, OP_LAST, OP_LAST_DUP, OP_NEXT, OP_NEXT_DUP, OP_NEXT_MULTIPLE, OP_NEXT_NODUP,
    OP_PREV, OP_PREV_DUP, OP_PREV_MULTIPLE, OP_PREV_NODUP, OP_SET_KEY, OP_SET_RANGE,
};
use crate::database::Database;
use crate::error::{status, Error, Result};
use crate::transaction::{
    empty_val, slice_to_val, val_to_slice, PutFlags, RoTransaction, RwTransaction, Transaction,
};

/// One key/value pair viewed in place on an engine-owned page.
///
/// Both slices borrow whatever produced them: the transaction for a
/// read-only cursor, the cursor itself for a write cursor. Either way they
/// are gone before anything can rewrite or free the page underneath them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
}

/// Where to move a cursor; every variant means "go there and return the
/// entry, or `None` if no such entry exists".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    First,
    /// First value of the current key (duplicate-key tables).
    FirstDuplicate,
    /// The entry under the cursor; `None` on a cursor that was never
    /// positioned.
    Current,
    Last,
    /// Last value of the current key (duplicate-key tables).
    LastDuplicate,
    Next,
    /// Next value of the current key, exhausting before the next key.
    NextDuplicate,
    /// First value of the next distinct key, skipping remaining duplicates.
    NextDistinctKey,
    Prev,
    PrevDuplicate,
    PrevDistinctKey,
}

impl Position {
    fn op(self) -> c_uint {
        match self {
            Position::First => OP_FIRST,
            Position::FirstDuplicate => OP_FIRST_DUP,
            Position::Current => OP_GET_CURRENT,
            Position::Last => OP_LAST,
            Position::LastDuplicate => OP_LAST_DUP,
            Position::Next => OP_NEXT,
            Position::NextDuplicate => OP_NEXT_DUP,
            Position::NextDistinctKey => OP_NEXT_NODUP,
            Position::Prev => OP_PREV,
            Position::PrevDuplicate => OP_PREV_DUP,
            Position::PrevDistinctKey => OP_PREV_NODUP,
        }
    }
}

/// Which page of fixed-size duplicate values to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    /// From the cursor's current position to the end of its page.
    Current,
    Next,
    Prev,
}

/// Marker for types that can be read directly off a fixed-size-duplicates
/// storage page.
///
/// # Safety
///
/// Implementors must be plain-old-data with no padding and no invalid bit
/// patterns; every byte sequence of `size_of::<Self>()` bytes must be a
/// valid value.
pub unsafe trait FixedSizeItem: Copy {}

unsafe impl FixedSizeItem for u8 {}
unsafe impl FixedSizeItem for u16 {}
unsafe impl FixedSizeItem for u32 {}
unsafe impl FixedSizeItem for u64 {}
unsafe impl FixedSizeItem for i8 {}
unsafe impl FixedSizeItem for i16 {}
unsafe impl FixedSizeItem for i32 {}
unsafe impl FixedSizeItem for i64 {}
unsafe impl<const N: usize> FixedSizeItem for [u8; N] {}

/// A key plus a typed run of its fixed-size duplicate values, read off one
/// storage page without a call per item.
#[derive(Debug, Clone, Copy)]
pub struct ItemPage<'a, T> {
    pub key: &'a [u8],
    pub items: &'a [T],
}

fn raw_entry<'a>(
    cursor: *mut ffi::MDB_cursor,
    key: Option<&[u8]>,
    item: Option<&[u8]>,
    op: c_uint,
) -> Result<Option<Entry<'a>>> {
    let mut key_val = key.map_or_else(empty_val, slice_to_val);
    let mut data_val = item.map_or_else(empty_val, slice_to_val);
    let rc = unsafe { ffi::mdb_cursor_get(cursor, &mut key_val, &mut data_val, op) };
    match status(rc) {
        Ok(()) => Ok(Some(Entry {
            key: unsafe { val_to_slice(&key_val) },
            value: unsafe { val_to_slice(&data_val) },
        })),
        Err(Error::NotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

// The read surface is shared plumbing between the two cursor kinds; the
// caller picks the view lifetime ('txn on a read-only cursor, the cursor
// borrow on a write cursor).

fn move_raw<'a>(cursor: *mut ffi::MDB_cursor, position: Position) -> Result<Option<Entry<'a>>> {
    match raw_entry(cursor, None, None, position.op()) {
        // An unpositioned cursor has no current entry; that is not an error.
        Err(Error::InvalidParameter) if position == Position::Current => Ok(None),
        other => other,
    }
}

fn seek_key_exact<'a>(cursor: *mut ffi::MDB_cursor, key: &[u8]) -> Result<Entry<'a>> {
    raw_entry(cursor, Some(key), None, OP_SET_KEY)?.ok_or(Error::NotFound)
}

fn seek_key_range<'a>(cursor: *mut ffi::MDB_cursor, key: &[u8]) -> Result<Entry<'a>> {
    raw_entry(cursor, Some(key), None, OP_SET_RANGE)?.ok_or(Error::NotFound)
}

fn seek_item_exact<'a>(
    cursor: *mut ffi::MDB_cursor,
    key: &[u8],
    item: &[u8],
) -> Result<Entry<'a>> {
    raw_entry(cursor, Some(key), Some(item), OP_GET_BOTH)?.ok_or(Error::NotFound)?;
    // Re-read so the returned views point at page memory rather than at the
    // caller's arguments.
    raw_entry(cursor, None, None, OP_GET_CURRENT)?.ok_or(Error::NotFound)
}

fn seek_item_range<'a>(
    cursor: *mut ffi::MDB_cursor,
    key: &[u8],
    item: &[u8],
) -> Result<Entry<'a>> {
    raw_entry(cursor, Some(key), Some(item), OP_GET_BOTH_RANGE)?.ok_or(Error::NotFound)?;
    raw_entry(cursor, None, None, OP_GET_CURRENT)?.ok_or(Error::NotFound)
}

fn count_raw(cursor: *mut ffi::MDB_cursor) -> Result<usize> {
    let mut count: usize = 0;
    unsafe { status(ffi::mdb_cursor_count(cursor, &mut count))? };
    Ok(count)
}

fn page_raw<'a, T: FixedSizeItem>(
    cursor: *mut ffi::MDB_cursor,
    direction: PageDirection,
) -> Result<Option<ItemPage<'a, T>>> {
    let op = match direction {
        PageDirection::Current => OP_GET_MULTIPLE,
        PageDirection::Next => OP_NEXT_MULTIPLE,
        PageDirection::Prev => OP_PREV_MULTIPLE,
    };
    let mut key_val = empty_val();
    let mut data_val = empty_val();
    let rc = unsafe { ffi::mdb_cursor_get(cursor, &mut key_val, &mut data_val, op) };
    match status(rc) {
        Ok(()) => {}
        Err(Error::NotFound) => return Ok(None),
        Err(err) => return Err(err),
    }

    let item_size = mem::size_of::<T>();
    if item_size == 0 || data_val.mv_size % item_size != 0 {
        return Err(Error::UnsupportedSize);
    }
    if (data_val.mv_data as usize) % mem::align_of::<T>() != 0 {
        return Err(Error::UnsupportedSize);
    }
    let items = unsafe {
        slice::from_raw_parts(data_val.mv_data as *const T, data_val.mv_size / item_size)
    };

    // The multi-value ops leave the key val untouched; ask the engine for
    // the key at the (now advanced) position.
    let current = raw_entry(cursor, None, None, OP_GET_CURRENT)?;
    let key = current.map(|entry| entry.key).unwrap_or(&[]);
    Ok(Some(ItemPage { key, items }))
}

/// Ordered traversal over one table within a read-only view of it.
///
/// Implemented by [`RoCursor`]; entries returned here borrow the owning
/// transaction and stay valid for its whole life, because nothing holding
/// only this cursor can rewrite the pages they point into. [`RwCursor`]
/// carries the same read surface inherently, with entries scoped to the
/// cursor borrow instead so they cannot overlap its writes.
pub trait Cursor<'txn> {
    /// The raw engine handle; same caveat as
    /// [`Transaction::txn`](crate::Transaction::txn).
    fn cursor(&self) -> *mut ffi::MDB_cursor;

    /// Move to `position` and return the entry there, or `None` if the table
    /// (or duplicate run) is exhausted in that direction.
    fn move_to(&mut self, position: Position) -> Result<Option<Entry<'txn>>> {
        move_raw(self.cursor(), position)
    }

    /// Position at exactly `key`; fails with [`Error::NotFound`] if absent.
    fn seek_to(&mut self, key: &[u8]) -> Result<Entry<'txn>> {
        seek_key_exact(self.cursor(), key)
    }

    /// Position at the first key `>= key`; fails with [`Error::NotFound`]
    /// only when no key is greater or equal.
    fn seek_from(&mut self, key: &[u8]) -> Result<Entry<'txn>> {
        seek_key_range(self.cursor(), key)
    }

    /// Duplicate-key tables: position at exactly the pair (`key`, `item`).
    fn seek_to_item(&mut self, key: &[u8], item: &[u8]) -> Result<Entry<'txn>> {
        seek_item_exact(self.cursor(), key, item)
    }

    /// Duplicate-key tables: position at `key` and its first value
    /// `>= item`. The key must match exactly.
    fn seek_from_item(&mut self, key: &[u8], item: &[u8]) -> Result<Entry<'txn>> {
        seek_item_range(self.cursor(), key, item)
    }

    /// Number of duplicate values under the current key.
    ///
    /// Engine precondition: only meaningful on duplicate-key tables; on any
    /// other table the engine reports [`Error::InvalidParameter`].
    fn count(&self) -> Result<usize> {
        count_raw(self.cursor())
    }

    /// Read a page worth of fixed-size duplicate values for the current key
    /// in one call.
    ///
    /// Only valid on tables opened with `fixed_size_duplicates`; elsewhere
    /// the engine reports [`Error::IncompatibleOperation`]. Returns `None`
    /// when the run is exhausted in the requested direction, and
    /// [`Error::UnsupportedSize`] when the stored item size does not match
    /// `T`'s size or alignment.
    fn get_page<T: FixedSizeItem>(
        &mut self,
        direction: PageDirection,
    ) -> Result<Option<ItemPage<'txn, T>>> {
        page_raw(self.cursor(), direction)
    }
}

/// Read-only cursor.
#[derive(Debug)]
pub struct RoCursor<'txn> {
    cursor: *mut ffi::MDB_cursor,
    _marker: PhantomData<&'txn ()>,
}

impl<'txn> RoCursor<'txn> {
    pub(crate) fn open<T: Transaction>(txn: &T, db: Database) -> Result<RoCursor<'_>> {
        let mut cursor: *mut ffi::MDB_cursor = ptr::null_mut();
        unsafe { status(ffi::mdb_cursor_open(txn.txn(), db.dbi(), &mut cursor))? };
        Ok(RoCursor {
            cursor,
            _marker: PhantomData,
        })
    }

    /// Rebind this cursor onto another read-only transaction (typically one
    /// freshly renewed), keeping the engine-side allocation.
    ///
    /// The cursor's position is discarded; it comes back unpositioned.
    pub fn renew<'t, 'env>(self, txn: &'t RoTransaction<'env>) -> Result<RoCursor<'t>> {
        unsafe { status(ffi::mdb_cursor_renew(txn.txn(), self.cursor))? };
        let cursor = self.cursor;
        mem::forget(self);
        Ok(RoCursor {
            cursor,
            _marker: PhantomData,
        })
    }
}

impl<'txn> Cursor<'txn> for RoCursor<'txn> {
    fn cursor(&self) -> *mut ffi::MDB_cursor {
        self.cursor
    }
}

impl<'txn> Drop for RoCursor<'txn> {
    fn drop(&mut self) {
        unsafe { ffi::mdb_cursor_close(self.cursor) }
    }
}

/// Read-write cursor; the primary bulk-write mechanism.
///
/// Its reads return entries that borrow the cursor, not the transaction:
/// every write below takes `&mut self`, so a still-live entry makes the
/// write a compile error rather than a view of freed or rewritten page
/// memory. Copy bytes out (or let the entry go) before writing.
#[derive(Debug)]
pub struct RwCursor<'txn> {
    cursor: *mut ffi::MDB_cursor,
    _marker: PhantomData<&'txn ()>,
}

impl<'txn> RwCursor<'txn> {
    pub(crate) fn open<'a>(txn: &'a mut RwTransaction<'_>, db: Database) -> Result<RwCursor<'a>> {
        let mut cursor: *mut ffi::MDB_cursor = ptr::null_mut();
        unsafe { status(ffi::mdb_cursor_open(txn.txn(), db.dbi(), &mut cursor))? };
        Ok(RwCursor {
            cursor,
            _marker: PhantomData,
        })
    }

    /// The raw engine handle; same caveat as
    /// [`Transaction::txn`](crate::Transaction::txn).
    pub fn cursor(&self) -> *mut ffi::MDB_cursor {
        self.cursor
    }

    /// Move to `position` and return the entry there, or `None` if the table
    /// (or duplicate run) is exhausted in that direction.
    pub fn move_to(&mut self, position: Position) -> Result<Option<Entry<'_>>> {
        move_raw(self.cursor, position)
    }

    /// Position at exactly `key`; fails with [`Error::NotFound`] if absent.
    pub fn seek_to(&mut self, key: &[u8]) -> Result<Entry<'_>> {
        seek_key_exact(self.cursor, key)
    }

    /// Position at the first key `>= key`; fails with [`Error::NotFound`]
    /// only when no key is greater or equal.
    pub fn seek_from(&mut self, key: &[u8]) -> Result<Entry<'_>> {
        seek_key_range(self.cursor, key)
    }

    /// Duplicate-key tables: position at exactly the pair (`key`, `item`).
    pub fn seek_to_item(&mut self, key: &[u8], item: &[u8]) -> Result<Entry<'_>> {
        seek_item_exact(self.cursor, key, item)
    }

    /// Duplicate-key tables: position at `key` and its first value
    /// `>= item`. The key must match exactly.
    pub fn seek_from_item(&mut self, key: &[u8], item: &[u8]) -> Result<Entry<'_>> {
        seek_item_range(self.cursor, key, item)
    }

    /// Number of duplicate values under the current key.
    ///
    /// Engine precondition: only meaningful on duplicate-key tables; on any
    /// other table the engine reports [`Error::InvalidParameter`].
    pub fn count(&self) -> Result<usize> {
        count_raw(self.cursor)
    }

    /// Read a page worth of fixed-size duplicate values for the current key
    /// in one call; see [`Cursor::get_page`] for the error contract.
    pub fn get_page<T: FixedSizeItem>(
        &mut self,
        direction: PageDirection,
    ) -> Result<Option<ItemPage<'_, T>>> {
        page_raw(self.cursor, direction)
    }

    /// Store `data` under `key` and position the cursor on the new entry.
    pub fn put(&mut self, key: &[u8], data: &[u8], flags: &PutFlags) -> Result<()> {
        let mut key_val = slice_to_val(key);
        let mut data_val = slice_to_val(data);
        unsafe {
            status(ffi::mdb_cursor_put(
                self.cursor,
                &mut key_val,
                &mut data_val,
                flags.write_mask().bits(),
            ))
        }
    }

    /// Duplicate-key tables: add one value under `key`.
    ///
    /// Takes the same flags as [`RwCursor::put`]; with
    /// `dont_overwrite_item` set, an already-present exact pair fails with
    /// [`Error::AlreadyExists`] instead of being a silent no-op.
    pub fn put_item(&mut self, key: &[u8], item: &[u8], flags: &PutFlags) -> Result<()> {
        let mut key_val = slice_to_val(key);
        let mut data_val = slice_to_val(item);
        unsafe {
            status(ffi::mdb_cursor_put(
                self.cursor,
                &mut key_val,
                &mut data_val,
                flags.write_mask().bits(),
            ))
        }
    }

    /// Overwrite the value at the cursor's current position without moving
    /// it or restructuring the tree.
    ///
    /// Precondition: `key` is the key the cursor is already sitting on; the
    /// engine does not reposition by it.
    pub fn update_in_place(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
        let mut key_val = slice_to_val(key);
        let mut data_val = slice_to_val(data);
        unsafe {
            status(ffi::mdb_cursor_put(
                self.cursor,
                &mut key_val,
                &mut data_val,
                WriteMask::CURRENT.bits(),
            ))
        }
    }

    /// Like [`RwCursor::update_in_place`], but returning `len` bytes of
    /// engine-owned storage for the caller to fill instead of copying.
    pub fn reserve_in_place<'c>(&'c mut self, key: &[u8], len: usize) -> Result<&'c mut [u8]> {
        let mut key_val = slice_to_val(key);
        let mut data_val = ffi::MDB_val {
            mv_size: len,
            mv_data: ptr::null_mut(),
        };
        let mask = WriteMask::CURRENT | WriteMask::RESERVE;
        unsafe {
            status(ffi::mdb_cursor_put(
                self.cursor,
                &mut key_val,
                &mut data_val,
                mask.bits(),
            ))?;
            Ok(slice::from_raw_parts_mut(
                data_val.mv_data as *mut u8,
                data_val.mv_size,
            ))
        }
    }

    /// Write many duplicate values for one key in a single call.
    ///
    /// Only valid on tables opened with `fixed_size_duplicates`. Returns how
    /// many items the engine actually wrote; fewer than `items.len()` means
    /// it ran out of page space and the caller must retry the remainder.
    /// With `set_already_sorted`, the usual unchecked ascending-order
    /// precondition applies.
    pub fn put_batch<T: FixedSizeItem>(
        &mut self,
        key: &[u8],
        items: &[T],
        flags: &PutFlags,
    ) -> Result<usize> {
        let item_size = mem::size_of::<T>();
        if item_size == 0 {
            return Err(Error::UnsupportedSize);
        }
        let mut key_val = slice_to_val(key);
        // The engine's batched form takes two value descriptors: the first
        // holds the item size and the data pointer, the second the item
        // count, which it rewrites to the count actually written.
        let mut data_vals = [
            ffi::MDB_val {
                mv_size: item_size,
                mv_data: items.as_ptr() as *mut c_void,
            },
            ffi::MDB_val {
                mv_size: items.len(),
                mv_data: ptr::null_mut(),
            },
        ];
        let mask = flags.write_mask() | WriteMask::MULTIPLE;
        unsafe {
            status(ffi::mdb_cursor_put(
                self.cursor,
                &mut key_val,
                data_vals.as_mut_ptr(),
                mask.bits(),
            ))?;
        }
        Ok(data_vals[1].mv_size)
    }

    /// Delete at the current position: just the current entry, or with
    /// `all_duplicates` every value stored under the current key.
    pub fn del(&mut self, all_duplicates: bool) -> Result<()> {
        let mask = if all_duplicates {
            WriteMask::NODUPDATA
        } else {
            WriteMask::empty()
        };
        unsafe { status(ffi::mdb_cursor_del(self.cursor, mask.bits())) }
    }
}

impl<'txn> Drop for RwCursor<'txn> {
    fn drop(&mut self) {
        unsafe { ffi::mdb_cursor_close(self.cursor) }
    }
}
