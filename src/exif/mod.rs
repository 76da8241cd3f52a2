//! EXIF metadata reading and writing for JPEG images.
//!
//! [`MetadataCodec`] is the entry point:
//!
//! - [`MetadataCodec::decode`]: read the searchable fields out of a JPEG
//! - [`MetadataCodec::encode`]: replace the JPEG's EXIF segment with one
//!   built from a [`Metadata`] record
//!
//! Underneath, [`tags`] holds the per-field encodings, [`ifd`] builds and
//! serializes the TIFF directories, [`reader`] parses them back, and
//! [`jpeg`] splices the `APP1` segment in and out of the marker stream.

mod codec;
pub mod ifd;
pub mod jpeg;
mod metadata;
pub mod reader;
pub mod tags;

pub use codec::{
    Capability, Clock, DecodeOutcome, EncodeOutcome, FixedClock, MetadataCodec, SystemClock,
    Unsupported,
};
pub use ifd::{ByteOrder, ExifContainer, Ifd};
pub use metadata::Metadata;
pub use tags::{Rating, Tag, TagValue};
