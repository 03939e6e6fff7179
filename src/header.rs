use crate::{constants, error::Error, Result};
use derivative::Derivative;
use log::warn;

/// Endian-normalized OLE2 file header.
///
/// Field names follow the on-disk layout; see [MS-CFB] for the reference
/// description of the format. All block indices are signed.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Ole2Header {
    #[derivative(Debug = "ignore")]
    pub clsid: [u8; 16],
    pub minor_version: u16,
    pub dll_version: u16,
    /// Byte order mark; -2 declares little-endian.
    pub byte_order: i16,
    /// Big block size in power-of-two, usually 9 (512 bytes).
    pub log2_big_block_size: u16,
    /// Small block size in power-of-two, usually 6 (64 bytes).
    pub log2_small_block_size: u32,
    /// Number of big-FAT sectors.
    pub bat_count: i32,
    /// First big block of the property directory.
    pub prop_start: i32,
    pub signature: u32,
    /// Streams strictly smaller than this live in the mini-FAT.
    pub sbat_cutoff: u32,
    /// First big block of the mini-FAT chain.
    pub sbat_start: i32,
    pub sbat_block_count: i32,
    /// First big block of the Double-Indirect FAT chain.
    pub xbat_start: i32,
    pub xbat_count: i32,
    /// Direct pointers to the first 109 big-FAT sectors.
    #[derivative(Debug = "ignore")]
    pub bat_array: Vec<i32>,
}

impl Ole2Header {
    pub fn big_block_size(&self) -> usize {
        1 << self.log2_big_block_size
    }

    pub fn small_block_size(&self) -> usize {
        1 << self.log2_small_block_size
    }

    /// FAT entries held by one big block.
    pub(crate) fn entries_per_block(&self) -> i32 {
        (self.big_block_size() / 4) as i32
    }

    /// Small blocks held by one big block of the mini-stream.
    pub(crate) fn small_per_big(&self) -> i32 {
        (self.big_block_size() / self.small_block_size()) as i32
    }

    /// Properties held by one big block of the directory stream.
    pub(crate) fn properties_per_block(&self) -> usize {
        self.big_block_size() / constants::PROPERTY_LENGTH
    }

    /// Absolute file offset of big block `n`. The header occupies the
    /// first 512 bytes regardless of the big block size.
    pub(crate) fn big_block_offset(&self, n: i32) -> u64 {
        constants::HEADER_LENGTH as u64 + ((n as u64) << self.log2_big_block_size)
    }

    pub(crate) fn from_raw(raw: RawHeader) -> Result<Self> {
        let log2_big_block_size = u16::from_le_bytes(raw.log2_big_block_size);
        let log2_small_block_size = u32::from_le_bytes(raw.log2_small_block_size);

        let big_in_range = (constants::MIN_LOG2_BLOCK_SIZE..=constants::MAX_LOG2_BLOCK_SIZE)
            .contains(&u32::from(log2_big_block_size));
        if !big_in_range
            || log2_small_block_size == 0
            || log2_small_block_size > u32::from(log2_big_block_size)
        {
            return Err(Error::BadBlockSize {
                log2_big: log2_big_block_size,
                log2_small: log2_small_block_size,
            });
        }

        let sbat_cutoff = u32::from_le_bytes(raw.sbat_cutoff);

        if log2_big_block_size != constants::TYPICAL_LOG2_BIG_BLOCK_SIZE {
            warn!("untested big block size 2^{log2_big_block_size}");
        }
        if log2_small_block_size != constants::TYPICAL_LOG2_SMALL_BLOCK_SIZE {
            warn!("untested small block size 2^{log2_small_block_size}");
        }
        if sbat_cutoff != constants::TYPICAL_SBAT_CUTOFF {
            warn!("untested sbat cutoff {sbat_cutoff}");
        }

        Ok(Ole2Header {
            clsid: raw.clsid,
            minor_version: u16::from_le_bytes(raw.minor_version),
            dll_version: u16::from_le_bytes(raw.dll_version),
            byte_order: i16::from_le_bytes(raw.byte_order),
            log2_big_block_size,
            log2_small_block_size,
            bat_count: i32::from_le_bytes(raw.bat_count),
            prop_start: i32::from_le_bytes(raw.prop_start),
            signature: u32::from_le_bytes(raw.signature),
            sbat_cutoff,
            sbat_start: i32::from_le_bytes(raw.sbat_start),
            sbat_block_count: i32::from_le_bytes(raw.sbat_block_count),
            xbat_start: i32::from_le_bytes(raw.xbat_start),
            xbat_count: i32::from_le_bytes(raw.xbat_count),
            bat_array: raw.bat_array,
        })
    }

    /// Parse the fixed 512-byte header prefix. Deliberately consumes
    /// exactly [`constants::HEADER_LENGTH`] bytes; derived decode state
    /// such as the mini-stream root lives on the extractor instead.
    pub(crate) fn parse(buf: &[u8]) -> Result<Self> {
        Self::from_raw(RawHeader::parse(buf)?)
    }
}

/// On-disk header fields, still in little-endian byte order.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub(crate) struct RawHeader {
    clsid: [u8; 16],
    minor_version: [u8; 2],
    dll_version: [u8; 2],
    byte_order: [u8; 2],
    log2_big_block_size: [u8; 2],
    log2_small_block_size: [u8; 4],
    bat_count: [u8; 4],
    prop_start: [u8; 4],
    signature: [u8; 4],
    sbat_cutoff: [u8; 4],
    sbat_start: [u8; 4],
    sbat_block_count: [u8; 4],
    xbat_start: [u8; 4],
    xbat_count: [u8; 4],
    #[derivative(Debug = "ignore")]
    bat_array: Vec<i32>,
}

impl RawHeader {
    fn parse(buf: &[u8]) -> Result<Self> {
        debug_assert!(buf.len() >= constants::HEADER_LENGTH);

        // The signature check gates everything else; a mismatch means
        // this is not an OLE2 container at all.
        if buf[0..8] != constants::MAGIC_BYTES {
            return Err(Error::BadMagic(buf[0..8].to_vec()));
        }

        // bat_array spans the remainder of the header: 109 entries.
        let bat_array = buf[76..constants::HEADER_LENGTH]
            .chunks_exact(4)
            .map(|quad| i32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]))
            .collect::<Vec<_>>();
        debug_assert_eq!(bat_array.len(), constants::BAT_ARRAY_LENGTH);

        Ok(RawHeader {
            clsid: buf[8..24].try_into().unwrap_or([0u8; 16]),
            minor_version: [buf[24], buf[25]],
            dll_version: [buf[26], buf[27]],
            byte_order: [buf[28], buf[29]],
            log2_big_block_size: [buf[30], buf[31]],
            log2_small_block_size: [buf[32], buf[33], buf[34], buf[35]],
            bat_count: [buf[44], buf[45], buf[46], buf[47]],
            prop_start: [buf[48], buf[49], buf[50], buf[51]],
            signature: [buf[52], buf[53], buf[54], buf[55]],
            sbat_cutoff: [buf[56], buf[57], buf[58], buf[59]],
            sbat_start: [buf[60], buf[61], buf[62], buf[63]],
            sbat_block_count: [buf[64], buf[65], buf[66], buf[67]],
            xbat_start: [buf[68], buf[69], buf[70], buf[71]],
            xbat_count: [buf[72], buf[73], buf[74], buf[75]],
            bat_array,
        })
    }
}
