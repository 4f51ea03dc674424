//! Zwetschge Format - the binary container codec
//!
//! A Zwetschge image bundles everything a time-of-flight camera module needs
//! into a single flashable file: the calibration blob, the per-device table
//! of register maps, and a table of per-use-case configuration records. The
//! image is versioned and every section is protected by its own CRC-32.
//!
//! The codec is two complementary halves over the `zwetschge-core` model:
//! - [`layout::plan_layout`] and [`writer::write`] turn a
//!   [`zwetschge_core::DeviceData`] into a byte-exact image
//! - [`reader::read`] inverts the writer, enforcing integrity at every
//!   section boundary
//!
//! All operations are synchronous and work on complete in-memory buffers;
//! there is no shared state between calls.

pub mod error;
pub mod layout;
pub mod reader;
pub mod wire;
pub mod writer;

pub use error::{ReadError, WriteError};
pub use layout::{plan_layout, Layout};
pub use reader::{read, Image};
pub use writer::{write, WriteOptions};
