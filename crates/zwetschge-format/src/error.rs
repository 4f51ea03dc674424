//! Error types for the container codec

use thiserror::Error;

/// Errors producing an image from a device description.
///
/// Everything except [`WriteError::LayoutMismatch`] is a configuration
/// error: the input was malformed and the caller can fix it and retry. No
/// bytes are produced for a configuration error. `LayoutMismatch` is an
/// internal invariant violation in the layout planner itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("product issuer {0:?} is not exactly 4 ASCII bytes")]
    BadProductIssuer(String),

    #[error("module serial {0:?} is not exactly 19 ASCII bytes")]
    BadModuleSerial(String),

    #[error("{field} is not ASCII: {text:?}")]
    NotAscii { field: &'static str, text: String },

    #[error("{field} value {value} does not fit its on-disk field (maximum {max})")]
    ValueTooLarge {
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("device has {0} use cases, the table of contents stores the count in one byte")]
    TooManyUseCases(usize),

    #[error("use cases share guid {0}; sequential register blocks need distinct guids")]
    DuplicateSequentialGuid(uuid::Uuid),

    #[error("layout error: {section} planned at {planned:#x} but serialization reached {actual:#x}")]
    LayoutMismatch {
        section: String,
        planned: usize,
        actual: usize,
    },
}

/// Errors decoding an image.
///
/// All of these are fatal for the read in question: the buffer is assumed
/// corrupt or foreign and no partial result is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("not a valid Zwetschge container (no magic at offset 0 or 0x2000)")]
    BadMagic,

    #[error("{section} has a wrong magic tag")]
    BadSectionMagic { section: &'static str },

    #[error("unsupported Zwetschge version {found:#x} (expected 0x147)")]
    UnsupportedVersion { found: u32 },

    #[error("{section} checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    CrcMismatch {
        section: &'static str,
        stored: u32,
        computed: u32,
    },

    #[error("{section} truncated at offset {offset:#x}: needed {needed} more bytes")]
    Truncated {
        section: &'static str,
        offset: usize,
        needed: usize,
    },

    #[error("{section} points outside the image (address {address:#x}, length {length:#x})")]
    SectionOutOfRange {
        section: &'static str,
        address: usize,
        length: usize,
    },

    #[error("{field} is not ASCII")]
    NotAscii { field: &'static str },

    #[error("use case \"{use_case}\" has invalid access level {value}")]
    InvalidAccessLevel { use_case: String, value: u8 },

    #[error(
        "use case \"{use_case}\" carries both a sequential register block and {entries} timed register entries"
    )]
    ConflictingRegisterAction { use_case: String, entries: usize },

    #[error("use case record {index} declares {declared} bytes but decoding consumed {consumed}")]
    RecordLengthMismatch {
        index: usize,
        declared: usize,
        consumed: usize,
    },

    #[error("sequential register block for use case \"{use_case}\" has odd length {length}")]
    OddSequentialBlock { use_case: String, length: usize },
}
