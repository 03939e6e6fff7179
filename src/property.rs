use crate::{
    constants,
    endian::{read_i32, read_i64, read_u16, read_u32},
};
use chrono::NaiveDateTime;
use derivative::Derivative;

#[derive(Clone, Derivative, Copy, PartialEq, Eq)]
#[derivative(Debug)]
pub enum PropertyType {
    /// A storage, analogous to a directory.
    Storage,
    /// A stream, analogous to a file.
    Stream,
    /// The root entry; its chain backs the mini-stream.
    Root,
}

/// Red-black node color of the directory entry. Informational only: the
/// directory is enumerated flat, never rebalanced or searched.
#[derive(Clone, Derivative, Copy, PartialEq, Eq)]
#[derivative(Debug)]
pub enum NodeColor {
    Red,
    Black,
    Unknown(u8),
}

/// One 128-byte property directory entry, fields endian-normalized but
/// not yet interpreted.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub(crate) struct RawProperty {
    #[derivative(Debug = "ignore")]
    name: [u8; constants::PROPERTY_NAME_LENGTH],
    name_size: u16,
    property_type: u8,
    color: u8,
    prev: i32,
    next: i32,
    child: i32,
    clsid: [u8; 16],
    user_flags: u32,
    creation: i64,
    modification: i64,
    start_block: i32,
    size: u32,
}

impl RawProperty {
    /// Carve an entry out of a directory sector. `chunk` must hold a
    /// whole entry; shorter tails of a trailing partial block yield
    /// `None`.
    pub(crate) fn parse(chunk: &[u8]) -> Option<Self> {
        if chunk.len() < constants::PROPERTY_LENGTH {
            return None;
        }

        let mut name = [0u8; constants::PROPERTY_NAME_LENGTH];
        name.copy_from_slice(&chunk[0..constants::PROPERTY_NAME_LENGTH]);
        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(&chunk[80..96]);

        Some(RawProperty {
            name,
            name_size: read_u16(chunk, 64),
            property_type: chunk[66],
            color: chunk[67],
            prev: read_i32(chunk, 68),
            next: read_i32(chunk, 72),
            child: read_i32(chunk, 76),
            clsid,
            user_flags: read_u32(chunk, 96),
            creation: read_i64(chunk, 100),
            modification: read_i64(chunk, 108),
            start_block: read_i32(chunk, 116),
            size: read_u32(chunk, 120),
        })
    }
}

/// A decoded directory entry as delivered to consumers.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Property {
    /// Position in the flat directory enumeration.
    pub index: usize,
    pub property_type: PropertyType,
    pub color: NodeColor,
    /// Filesystem-safe display name; `None` when the entry is unnamed.
    pub name: Option<String>,
    /// The raw UTF-16 name code units, trailing NUL dropped.
    pub name_utf16: Vec<u16>,
    /// Sibling/child indices of the stored red-black tree; read but not
    /// followed.
    pub prev: i32,
    pub next: i32,
    pub child: i32,
    #[derivative(Debug = "ignore")]
    pub clsid: [u8; 16],
    pub user_flags: u32,
    pub creation_time: Option<NaiveDateTime>,
    pub modification_time: Option<NaiveDateTime>,
    /// First block of this stream's chain.
    pub start_block: i32,
    /// Stream length in bytes.
    pub size: u32,
}

impl Property {
    /// Interpret a raw entry. Unallocated entries (type 0) and unknown
    /// types are skipped.
    pub(crate) fn from_raw(raw: RawProperty, index: usize) -> Option<Self> {
        let property_type = match raw.property_type {
            constants::PROPERTY_TYPE_STORAGE => PropertyType::Storage,
            constants::PROPERTY_TYPE_STREAM => PropertyType::Stream,
            constants::PROPERTY_TYPE_ROOT => PropertyType::Root,
            _ => return None,
        };

        let color = match raw.color {
            constants::NODE_COLOR_RED => NodeColor::Red,
            constants::NODE_COLOR_BLACK => NodeColor::Black,
            other => NodeColor::Unknown(other),
        };

        let (name_utf16, name) = decode_name(&raw.name, raw.name_size);

        let creation_time = match raw.creation {
            0 => None,
            time => epochs::windows_file(time),
        };
        let modification_time = match raw.modification {
            0 => None,
            time => epochs::windows_file(time),
        };

        Some(Property {
            index,
            property_type,
            color,
            name,
            name_utf16,
            prev: raw.prev,
            next: raw.next,
            child: raw.child,
            clsid: raw.clsid,
            user_flags: raw.user_flags,
            creation_time,
            modification_time,
            start_block: raw.start_block,
            size: raw.size,
        })
    }
}

/// Decode a property name: UTF-16LE over `name_size - 2` bytes (the
/// trailing NUL code unit is counted by `name_size` but not part of the
/// name). Printable ASCII code units pass through; anything else becomes
/// `_<decimal>_` so filesystem targets stay safe.
fn decode_name(name: &[u8], name_size: u16) -> (Vec<u16>, Option<String>) {
    if name_size < 2 || name[0] == 0 {
        return (Vec::new(), None);
    }

    let mut byte_len = usize::from(name_size - 2).min(constants::PROPERTY_NAME_LENGTH);
    byte_len &= !1;

    let units = name[0..byte_len]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect::<Vec<_>>();

    let mut escaped = String::new();
    for unit in &units {
        match char::from_u32(u32::from(*unit)) {
            // '/', '\', ':' and '!' are illegal in entry names anyway;
            // escaping them keeps hostile names out of path joins.
            Some(c) if (0x20..=0x7E).contains(unit) && !matches!(c, '/' | '\\' | ':' | '!') => {
                escaped.push(c)
            }
            _ => {
                escaped.push('_');
                escaped.push_str(&unit.to_string());
                escaped.push('_');
            }
        }
    }

    if escaped.is_empty() {
        (units, None)
    } else {
        (units, Some(escaped))
    }
}
