#[derive(thiserror::Error, Debug)]
pub enum Error {
    // Header errors - these abort the whole extraction
    #[error("BadMagic => expected the OLE2 signature, found {0:02x?}")]
    BadMagic(Vec<u8>),
    #[error("BadBlockSize => log2 big block size {log2_big}, log2 small block size {log2_small}")]
    BadBlockSize { log2_big: u16, log2_small: u32 },

    // Chain and I/O errors - within one stream these abandon that stream only
    #[error("ShortRead => wanted {wanted} bytes at offset {offset}, got {got}")]
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },
    #[error("ShortWrite => wanted {wanted} bytes, wrote {got}")]
    ShortWrite { wanted: usize, got: usize },
    #[error("FatIndexOutOfRange => FAT sector {index} outside the {count} declared by the header")]
    FatIndexOutOfRange { index: i32, count: i32 },
    #[error("BrokenChain => unexpected negative block index {0} mid-resolution")]
    BrokenChain(i32),
    #[error("NoMiniRoot => mini-FAT stream requested before a root entry was seen")]
    NoMiniRoot,
    #[error("ChainCycle => chain walk exceeded the budget of {0} blocks")]
    ChainCycle(u64),

    // Raised by a consumer to cancel the extraction
    #[error("Aborted")]
    Aborted,

    // Std Errors
    #[error("StdIo => {0}")]
    StdIo(#[from] std::io::Error),
}
