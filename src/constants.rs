use bitflags::bitflags;
use libc::c_uint;

// Environment open flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct EnvMask: c_uint {
        const FIXEDMAP = 0x01;
        const NOSUBDIR = 0x4000;
        const NOSYNC = 0x10000;
        const RDONLY = 0x20000;
        const NOMETASYNC = 0x40000;
        const WRITEMAP = 0x80000;
        const MAPASYNC = 0x100000;
        const NOTLS = 0x200000;
        const NOLOCK = 0x400000;
        const NORDAHEAD = 0x800000;
        const NOMEMINIT = 0x1000000;
        const PREVSNAPSHOT = 0x2000000;
    }
}

// Database open flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct DbMask: c_uint {
        const REVERSEKEY = 0x02;
        const DUPSORT = 0x04;
        const INTEGERKEY = 0x08;
        const DUPFIXED = 0x10;
        const INTEGERDUP = 0x20;
        const REVERSEDUP = 0x40;
        const CREATE = 0x40000;
    }
}

// Write operation flags
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct WriteMask: c_uint {
        const NOOVERWRITE = 0x10;
        const NODUPDATA = 0x20;
        const CURRENT = 0x40;
        const RESERVE = 0x10000;
        const APPEND = 0x20000;
        const APPENDDUP = 0x40000;
        const MULTIPLE = 0x80000;
    }
}

// Cursor positioning operations
pub(crate) const OP_FIRST: c_uint = 0;
pub(crate) const OP_FIRST_DUP: c_uint = 1;
pub(crate) const OP_GET_BOTH: c_uint = 2;
pub(crate) const OP_GET_BOTH_RANGE: c_uint = 3;
pub(crate) const OP_GET_CURRENT: c_uint = 4;
pub(crate) const OP_GET_MULTIPLE: c_uint = 5;
pub(crate) const OP_LAST: c_uint = 6;
pub(crate) const OP_LAST_DUP: c_uint = 7;
pub(crate) const OP_NEXT: c_uint = 8;
pub(crate) const OP_NEXT_DUP: c_uint = 9;
pub(crate) const OP_NEXT_MULTIPLE: c_uint = 10;
pub(crate) const OP_NEXT_NODUP: c_uint = 11;
pub(crate) const OP_PREV: c_uint = 12;
pub(crate) const OP_PREV_DUP: c_uint = 13;
pub(crate) const OP_PREV_NODUP: c_uint = 14;
pub(crate) const OP_SET_KEY: c_uint = 16;
pub(crate) const OP_SET_RANGE: c_uint = 17;
pub(crate) const OP_PREV_MULTIPLE: c_uint = 18;

// Copy operation flags
pub(crate) const CP_COMPACT: c_uint = 0x01;

/// Unix file mode applied to newly created data and lock files.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
