use std::marker::Unpin;
use tokio::io::{AsyncRead, AsyncSeek};

/// A random-access byte source the extractor can read from.
pub trait Readable: Unpin + AsyncRead + AsyncSeek {}
impl Readable for tokio::fs::File {}
impl<T: AsRef<[u8]> + Unpin> Readable for std::io::Cursor<T> {}

pub const HEADER_LENGTH: usize = 512;
pub const MAGIC_BYTES: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
pub const LITTLE_ENDIAN_BYTE_ORDER: i16 = -2;

// Block indices are signed on disk. Any negative index terminates a chain.
pub const END_OF_CHAIN: i32 = -1;
pub const FREE_BLOCK: i32 = -2;
pub const FAT_BLOCK: i32 = -3;
pub const DIF_BLOCK: i32 = -4;

/// Number of direct FAT sector pointers held in the header.
pub const BAT_ARRAY_LENGTH: usize = 109;

pub const PROPERTY_LENGTH: usize = 128;
pub const PROPERTY_NAME_LENGTH: usize = 64;

pub const PROPERTY_TYPE_STORAGE: u8 = 1;
pub const PROPERTY_TYPE_STREAM: u8 = 2;
pub const PROPERTY_TYPE_ROOT: u8 = 5;

pub const NODE_COLOR_RED: u8 = 0;
pub const NODE_COLOR_BLACK: u8 = 1;

pub const TYPICAL_LOG2_BIG_BLOCK_SIZE: u16 = 9;
pub const TYPICAL_LOG2_SMALL_BLOCK_SIZE: u32 = 6;
pub const TYPICAL_SBAT_CUTOFF: u32 = 4096;

// A block must hold at least one whole FAT entry, and a malformed header
// must not be able to request multi-gigabyte scratch buffers.
pub const MIN_LOG2_BLOCK_SIZE: u32 = 2;
pub const MAX_LOG2_BLOCK_SIZE: u32 = 16;
