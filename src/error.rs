use std::ffi::CStr;
use std::ffi::NulError;
use std::io;
use std::result;

use libc::c_int;
use lmdb_sys as ffi;
use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = result::Result<T, Error>;

/// Closed taxonomy over the engine's status codes and the OS errno values
/// that surface through its file operations.
///
/// Every operation in this crate reports success, one of these variants, or
/// [`Error::Unexpected`] for a code outside the known table. Nothing is
/// silently swallowed and nothing short of [`Error::Panic`] is fatal to the
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// No matching key/value pair (or named table, or file) was found.
    #[error("no matching key/value pair found")]
    NotFound,
    /// The key (or exact key/value pair on a duplicate-key table) is already present.
    #[error("key/value pair already exists")]
    AlreadyExists,
    /// The memory map is full; reconfigure the map size or shrink the unit of work.
    #[error("environment map size limit reached")]
    MapSizeLimitReached,
    /// The map size was changed by another process.
    #[error("environment map size changed by another process")]
    MapSizeChanged,
    /// The configured maximum number of named tables was reached.
    #[error("maximum number of databases limit reached")]
    MaxNumDatabasesLimitReached,
    /// Every reader slot is taken.
    #[error("maximum number of readers limit reached")]
    MaxNumReadersLimitReached,
    /// Thread-local reader keys (or process file handles) are exhausted.
    #[error("too many environments open")]
    TooManyEnvironmentsOpen,
    /// The transaction has too many dirty pages to commit.
    #[error("transaction too big")]
    TransactionTooBig,
    /// The engine's internal cursor stack overflowed.
    #[error("cursor stack limit reached")]
    CursorStackLimitReached,
    /// A page had no room for the requested entry.
    #[error("out of page memory")]
    OutOfPageMemory,
    /// The filesystem holding the database is full.
    #[error("no space left on device")]
    NoSpaceLeftOnDevice,
    /// A requested page was not found; the file is damaged.
    #[error("requested page not found")]
    PageNotFound,
    /// A page failed validation; the file is damaged.
    #[error("located page was corrupted")]
    PageCorrupted,
    /// The file is not a database created by this engine.
    #[error("file is not a valid database")]
    FileNotDatabase,
    /// The file was written by an incompatible engine version.
    #[error("database version mismatch")]
    VersionMismatch,
    /// The engine reported an unrecoverable internal failure; close the environment.
    #[error("engine reported a fatal internal error")]
    Panic,
    /// The transaction has a live child (or is otherwise invalid) and must
    /// not be used until the child commits or aborts.
    #[error("transaction must abort: it has a live child or is invalid")]
    TransactionNotAborted,
    /// The operation does not apply to this table's configuration.
    #[error("operation incompatible with table configuration")]
    IncompatibleOperation,
    /// A reader locktable slot was reused incorrectly.
    #[error("invalid reuse of reader locktable slot")]
    InvalidReaderLocktableSlotReuse,
    /// Unsupported size of key, table name, or value, or wrong fixed-duplicate size.
    #[error("unsupported size of key, table name, or value")]
    UnsupportedSize,
    /// The table handle was closed or changed unexpectedly.
    #[error("bad database handle")]
    BadDatabaseHandle,
    /// The caller passed an argument the engine rejects.
    #[error("invalid parameter")]
    InvalidParameter,
    /// This process already has the environment at this path open.
    #[error("environment is already open in this process")]
    EnvironmentAlreadyOpen,
    /// Low-level I/O failure.
    #[error("input/output error")]
    InputOutput,
    /// The OS could not allocate memory.
    #[error("out of memory")]
    OutOfMemory,
    /// Filesystem permissions deny the requested access.
    #[error("access denied")]
    AccessDenied,
    /// The database file is locked by another actor.
    #[error("device or resource busy")]
    DeviceBusy,
    /// Write access was requested on a read-only filesystem.
    #[error("read-only filesystem")]
    ReadOnlyFileSystem,
    /// A status code outside the known table, carried verbatim.
    #[error("unexpected status code {0}: {}", strerror(*.0))]
    Unexpected(c_int),
}

impl Error {
    /// Translate one engine or OS status code.
    pub fn from_status(code: c_int) -> Error {
        match code {
            -30799 => Error::AlreadyExists,
            -30798 => Error::NotFound,
            -30797 => Error::PageNotFound,
            -30796 => Error::PageCorrupted,
            -30795 => Error::Panic,
            -30794 => Error::VersionMismatch,
            -30793 => Error::FileNotDatabase,
            -30792 => Error::MapSizeLimitReached,
            -30791 => Error::MaxNumDatabasesLimitReached,
            -30790 => Error::MaxNumReadersLimitReached,
            -30789 => Error::TooManyEnvironmentsOpen,
            -30788 => Error::TransactionTooBig,
            -30787 => Error::CursorStackLimitReached,
            -30786 => Error::OutOfPageMemory,
            -30785 => Error::MapSizeChanged,
            -30784 => Error::IncompatibleOperation,
            -30783 => Error::InvalidReaderLocktableSlotReuse,
            -30782 => Error::TransactionNotAborted,
            -30781 => Error::UnsupportedSize,
            -30780 => Error::BadDatabaseHandle,
            libc::ENOENT => Error::NotFound,
            libc::EEXIST => Error::AlreadyExists,
            libc::ENOSPC => Error::NoSpaceLeftOnDevice,
            libc::ENOMEM => Error::OutOfMemory,
            libc::EIO => Error::InputOutput,
            libc::EACCES | libc::EPERM => Error::AccessDenied,
            libc::EBUSY => Error::DeviceBusy,
            libc::EROFS => Error::ReadOnlyFileSystem,
            libc::EINVAL => Error::InvalidParameter,
            libc::EMFILE | libc::ENFILE => Error::TooManyEnvironmentsOpen,
            other => Error::Unexpected(other),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        match err.raw_os_error() {
            Some(code) => Error::from_status(code),
            None => Error::InputOutput,
        }
    }
}

impl From<NulError> for Error {
    fn from(_: NulError) -> Error {
        Error::InvalidParameter
    }
}

/// Render the engine's own message for a status code.
fn strerror(code: c_int) -> String {
    // mdb_strerror falls back to the system strerror for OS codes; the
    // returned pointer is a static string either way.
    unsafe {
        let msg = ffi::mdb_strerror(code);
        if msg.is_null() {
            return String::from("unknown");
        }
        CStr::from_ptr(msg).to_string_lossy().into_owned()
    }
}

/// Map an engine return code onto `Result<()>`.
pub(crate) fn status(code: c_int) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(Error::from_status(code))
    }
}
