use std::collections::HashSet;
use std::ffi::CString;
use std::mem::MaybeUninit;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Mutex;

use bitflags::bitflags;
use libc::{c_int, c_uint, c_void};
use lmdb_sys as ffi;
use log::{debug, warn};
use once_cell::sync::Lazy;

use crate::constants::{EnvMask, CP_COMPACT, DEFAULT_FILE_MODE};
use crate::database::Database;
use crate::error::{status, Error, Result};
use crate::transaction::{RoTransaction, RwTransaction};

/// Paths of every environment currently open in this process.
///
/// The engine's locking protocol breaks if one process opens the same
/// environment twice, so a second open of a registered path is refused
/// before it reaches the engine.
static OPEN_PATHS: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

// Flags the engine allows to change after open.
bitflags! {
    /// Environment flags that may be toggled at runtime via
    /// [`Environment::enable_flags`] and [`Environment::disable_flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RuntimeFlags: c_uint {
        const NO_SYNC = EnvMask::NOSYNC.bits();
        const NO_META_SYNC = EnvMask::NOMETASYNC.bits();
        const MAP_ASYNC = EnvMask::MAPASYNC.bits();
        const NO_MEM_INIT = EnvMask::NOMEMINIT.bits();
    }
}

/// Configuration fixed at [`Environment::open`] time.
///
/// The boolean fields translate one-for-one onto the engine's open-time
/// bitmask; durability-related ones (`no_sync`, `no_meta_sync`, `map_async`,
/// `no_mem_init`) can later be toggled through [`Environment::enable_flags`].
#[derive(Debug, Clone, Default)]
pub struct EnvironmentOptions {
    /// Size of the memory map, and therefore the maximum size of the
    /// database. Defaults to the engine's 1 MiB when unset.
    pub map_size: Option<usize>,
    /// Maximum number of concurrent read-only transactions.
    pub max_readers: Option<u32>,
    /// Maximum number of named tables. Defaults to zero, which only permits
    /// the unnamed table.
    pub max_databases: Option<u32>,
    /// Unix file mode for newly created files; defaults to 0o644.
    pub mode: Option<u32>,
    /// Use a writable memory map instead of write() calls.
    pub write_map: bool,
    /// Skip the fsync of the meta page on commit.
    pub no_meta_sync: bool,
    /// Skip all fsync calls on commit; durability is lost on system crash.
    pub no_sync: bool,
    /// With `write_map`, flush asynchronously.
    pub map_async: bool,
    /// Do not tie reader slots to thread-local storage.
    pub no_tls: bool,
    /// Disable all locking; callers manage exclusion themselves.
    pub no_lock: bool,
    /// Advise the OS against read-ahead on the map.
    pub no_read_ahead: bool,
    /// Do not zero-initialize malloc'd buffers before writing them out.
    pub no_mem_init: bool,
    /// Open the previous snapshot rather than the latest one.
    pub prev_snapshot: bool,
    /// `path` names the data file itself rather than a containing directory.
    pub no_sub_dir: bool,
    /// Open read-only; beginning a read-write transaction will fail.
    pub read_only: bool,
}

impl EnvironmentOptions {
    fn open_mask(&self) -> EnvMask {
        let mut mask = EnvMask::empty();
        if self.write_map {
            mask |= EnvMask::WRITEMAP;
        }
        if self.no_meta_sync {
            mask |= EnvMask::NOMETASYNC;
        }
        if self.no_sync {
            mask |= EnvMask::NOSYNC;
        }
        if self.map_async {
            mask |= EnvMask::MAPASYNC;
        }
        if self.no_tls {
            mask |= EnvMask::NOTLS;
        }
        if self.no_lock {
            mask |= EnvMask::NOLOCK;
        }
        if self.no_read_ahead {
            mask |= EnvMask::NORDAHEAD;
        }
        if self.no_mem_init {
            mask |= EnvMask::NOMEMINIT;
        }
        if self.prev_snapshot {
            mask |= EnvMask::PREVSNAPSHOT;
        }
        if self.no_sub_dir {
            mask |= EnvMask::NOSUBDIR;
        }
        if self.read_only {
            mask |= EnvMask::RDONLY;
        }
        mask
    }
}

/// Structural counters for the whole environment or one table.
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    pub page_size: u32,
    pub depth: u32,
    pub branch_pages: usize,
    pub leaf_pages: usize,
    pub overflow_pages: usize,
    pub entries: usize,
}

impl Stat {
    pub(crate) fn from_raw(raw: &ffi::MDB_stat) -> Stat {
        Stat {
            page_size: raw.ms_psize as u32,
            depth: raw.ms_depth as u32,
            branch_pages: raw.ms_branch_pages as usize,
            leaf_pages: raw.ms_leaf_pages as usize,
            overflow_pages: raw.ms_overflow_pages as usize,
            entries: raw.ms_entries as usize,
        }
    }
}

/// Memory-map and reader-table counters.
#[derive(Debug, Clone, Copy)]
pub struct EnvInfo {
    pub map_addr: *mut c_void,
    pub map_size: usize,
    pub last_page: usize,
    pub last_txn_id: usize,
    pub max_readers: u32,
    pub num_readers: u32,
}

/// One open memory-mapped database file and its configuration.
///
/// The environment is the root lifetime anchor: transactions borrow it, and
/// through them every table handle, cursor, and byte-slice view. It closes
/// on drop, which the borrow checker only permits once nothing derived from
/// it is still alive.
#[derive(Debug)]
pub struct Environment {
    env: *mut ffi::MDB_env,
    path: PathBuf,
}

// The engine serializes writers internally and reader slots are per-thread;
// the raw handle itself is safe to share.
unsafe impl Send for Environment {}
unsafe impl Sync for Environment {}

impl Environment {
    /// Open the environment at `path`.
    ///
    /// `path` names a directory unless `options.no_sub_dir` is set. Failures
    /// carry the underlying OS or engine condition: [`Error::NotFound`] for a
    /// missing path, [`Error::VersionMismatch`] or [`Error::FileNotDatabase`]
    /// for an incompatible file, and so on.
    pub fn open(path: &Path, options: &EnvironmentOptions) -> Result<Environment> {
        let canonical = canonical_path(path)?;
        {
            let mut open_paths = lock_registry();
            if !open_paths.insert(canonical.clone()) {
                return Err(Error::EnvironmentAlreadyOpen);
            }
        }

        match open_raw(path, options) {
            Ok(env) => {
                debug!("opened environment at {:?}", canonical);
                Ok(Environment {
                    env,
                    path: canonical,
                })
            }
            Err(err) => {
                lock_registry().remove(&canonical);
                Err(err)
            }
        }
    }

    pub(crate) fn env_ptr(&self) -> *mut ffi::MDB_env {
        self.env
    }

    /// The canonicalized path this environment was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin a read-only transaction pinned to the current snapshot.
    ///
    /// Fails with [`Error::MaxNumReadersLimitReached`] when every reader slot
    /// is taken. A reader held open indefinitely prevents the engine from
    /// reclaiming space freed by later writers; prefer
    /// [`RoTransaction::reset`] and renew in polling loops.
    pub fn begin_ro_txn(&self) -> Result<RoTransaction<'_>> {
        RoTransaction::new(self)
    }

    /// Begin the single read-write transaction.
    ///
    /// Blocks until any other writer in the system commits or aborts.
    pub fn begin_rw_txn(&self) -> Result<RwTransaction<'_>> {
        RwTransaction::new(self)
    }

    /// Copy the environment to `path` as a point-in-time snapshot while it
    /// stays usable. `compact` omits free pages and renumbers the rest,
    /// trading CPU and I/O for a smaller copy.
    pub fn copy_to(&self, path: &Path, compact: bool) -> Result<()> {
        let path_c = CString::new(path.as_os_str().as_bytes())?;
        let flags = if compact { CP_COMPACT } else { 0 };
        debug!("copying environment to {:?} (compact: {})", path, compact);
        unsafe { status(ffi::mdb_env_copy2(self.env, path_c.as_ptr(), flags)) }
    }

    /// Like [`Environment::copy_to`], but writing to an already-open file
    /// descriptor opened with write permission.
    pub fn pipe_to(&self, fd: RawFd, compact: bool) -> Result<()> {
        let flags = if compact { CP_COMPACT } else { 0 };
        unsafe { status(ffi::mdb_env_copyfd2(self.env, fd as ffi::mdb_filehandle_t, flags)) }
    }

    /// Structural counters for the unnamed table and the file as a whole.
    pub fn stat(&self) -> Result<Stat> {
        let mut raw = MaybeUninit::<ffi::MDB_stat>::uninit();
        unsafe {
            status(ffi::mdb_env_stat(self.env, raw.as_mut_ptr()))?;
            Ok(Stat::from_raw(&raw.assume_init()))
        }
    }

    /// Memory-map and reader-table counters.
    pub fn info(&self) -> Result<EnvInfo> {
        let mut raw = MaybeUninit::<ffi::MDB_envinfo>::uninit();
        unsafe {
            status(ffi::mdb_env_info(self.env, raw.as_mut_ptr()))?;
            let raw = raw.assume_init();
            Ok(EnvInfo {
                map_addr: raw.me_mapaddr,
                map_size: raw.me_mapsize as usize,
                last_page: raw.me_last_pgno as usize,
                last_txn_id: raw.me_last_txnid as usize,
                max_readers: raw.me_maxreaders as u32,
                num_readers: raw.me_numreaders as u32,
            })
        }
    }

    /// The runtime-mutable flags currently in effect.
    pub fn flags(&self) -> Result<RuntimeFlags> {
        let mut raw: c_uint = 0;
        unsafe { status(ffi::mdb_env_get_flags(self.env, &mut raw))? };
        Ok(RuntimeFlags::from_bits_truncate(raw))
    }

    /// Turn on a subset of the runtime-mutable flags.
    pub fn enable_flags(&self, flags: RuntimeFlags) -> Result<()> {
        unsafe { status(ffi::mdb_env_set_flags(self.env, flags.bits(), 1)) }
    }

    /// Turn off a subset of the runtime-mutable flags.
    pub fn disable_flags(&self, flags: RuntimeFlags) -> Result<()> {
        unsafe { status(ffi::mdb_env_set_flags(self.env, flags.bits(), 0)) }
    }

    /// Resize the memory map.
    ///
    /// The exclusive borrow proves no transaction of any kind is active
    /// against this environment, which the engine requires.
    pub fn set_map_size(&mut self, size: usize) -> Result<()> {
        debug!("resizing environment map to {} bytes", size);
        unsafe { status(ffi::mdb_env_set_mapsize(self.env, size)) }
    }

    /// Flush buffered writes to physical storage.
    ///
    /// Meaningful when the environment was opened with relaxed durability
    /// (`no_sync`, `no_meta_sync`, `map_async`); `force` makes the flush
    /// synchronous regardless.
    pub fn sync(&self, force: bool) -> Result<()> {
        unsafe { status(ffi::mdb_env_sync(self.env, force as c_int)) }
    }

    /// Reclaim reader slots left behind by processes that died mid-read.
    ///
    /// Returns the number of slots reclaimed. Safe to call periodically;
    /// never required for correctness of a healthy process.
    pub fn purge(&self) -> Result<usize> {
        let mut dead: c_int = 0;
        unsafe { status(ffi::mdb_reader_check(self.env, &mut dead))? };
        if dead > 0 {
            warn!("purged {} stale reader slot(s)", dead);
        }
        Ok(dead as usize)
    }

    /// Maximum key size (and fixed-duplicate value size) the engine accepts.
    pub fn max_key_size(&self) -> usize {
        unsafe { ffi::mdb_env_get_maxkeysize(self.env) as usize }
    }

    /// The configured reader-slot count.
    pub fn max_readers(&self) -> Result<u32> {
        let mut readers: c_uint = 0;
        unsafe { status(ffi::mdb_env_get_maxreaders(self.env, &mut readers))? };
        Ok(readers as u32)
    }

    /// Release a table handle.
    ///
    /// The exclusive borrow guarantees no transaction is active, so no live
    /// cursor or view can still reference the table. Stale `Copy`s of the
    /// handle used afterwards are reported by the engine as
    /// [`Error::BadDatabaseHandle`].
    pub fn close_database(&mut self, db: Database) {
        unsafe { ffi::mdb_dbi_close(self.env, db.dbi()) }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        debug!("closing environment at {:?}", self.path);
        unsafe { ffi::mdb_env_close(self.env) };
        lock_registry().remove(&self.path);
    }
}

fn lock_registry() -> std::sync::MutexGuard<'static, HashSet<PathBuf>> {
    // A poisoned registry only means another thread panicked while holding
    // it; the set itself is still coherent.
    OPEN_PATHS
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Resolve the registry key for `path`, tolerating a not-yet-created data
/// file in `no_sub_dir` mode.
fn canonical_path(path: &Path) -> Result<PathBuf> {
    if let Ok(resolved) = path.canonicalize() {
        return Ok(resolved);
    }
    let parent = path.parent().ok_or(Error::InvalidParameter)?;
    let name = path.file_name().ok_or(Error::InvalidParameter)?;
    Ok(parent.canonicalize()?.join(name))
}

fn open_raw(path: &Path, options: &EnvironmentOptions) -> Result<*mut ffi::MDB_env> {
    let path_c = CString::new(path.as_os_str().as_bytes())?;
    let mut env: *mut ffi::MDB_env = ptr::null_mut();
    unsafe {
        status(ffi::mdb_env_create(&mut env))?;
        let configure = || -> Result<()> {
            if let Some(size) = options.map_size {
                status(ffi::mdb_env_set_mapsize(env, size))?;
            }
            if let Some(readers) = options.max_readers {
                status(ffi::mdb_env_set_maxreaders(env, readers as c_uint))?;
            }
            if let Some(dbs) = options.max_databases {
                status(ffi::mdb_env_set_maxdbs(env, dbs as ffi::MDB_dbi))?;
            }
            let mode = options.mode.unwrap_or(DEFAULT_FILE_MODE);
            status(ffi::mdb_env_open(
                env,
                path_c.as_ptr(),
                options.open_mask().bits(),
                mode as ffi::mdb_mode_t,
            ))
        };
        match configure() {
            Ok(()) => Ok(env),
            Err(err) => {
                ffi::mdb_env_close(env);
                Err(err)
            }
        }
    }
}
