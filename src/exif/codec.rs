use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use std::fmt;

use super::ifd::{ByteOrder, ExifContainer};
use super::jpeg;
use super::metadata::Metadata;
use super::reader::{self, DEFAULT_SOFTWARE};
use crate::config::CodecConfig;
use crate::data_url;

/// Source of the instant used for a defaulted `DateTime` tag.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock time in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Whether the host provides EXIF support at all.
///
/// A host that cannot offer it (for instance a build that only previews
/// images) constructs the codec with [`Capability::Unavailable`]; every call
/// then degrades the same way an unsupported image does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capability {
    #[default]
    Available,
    Unavailable,
}

/// Why an input was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    NotJpeg,
    CodecUnavailable,
}

impl fmt::Display for Unsupported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unsupported::NotJpeg => f.write_str("not a JPEG image"),
            Unsupported::CodecUnavailable => f.write_str("EXIF support unavailable"),
        }
    }
}

/// Outcome of [`MetadataCodec::decode_outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The image is a JPEG. `malformed` lists fields that were present but
    /// unreadable and fell back to empty/default.
    Decoded {
        metadata: Metadata,
        malformed: Vec<&'static str>,
    },
    /// Nothing could be read; callers fall back to manual entry.
    Empty(Unsupported),
}

impl DecodeOutcome {
    pub fn into_metadata(self) -> Metadata {
        match self {
            DecodeOutcome::Decoded { metadata, .. } => metadata,
            DecodeOutcome::Empty(_) => Metadata::default(),
        }
    }
}

/// Outcome of [`MetadataCodec::encode_outcome`]. Every variant carries the
/// bytes to hand back; only `Written` differs from the input.
#[derive(Debug)]
pub enum EncodeOutcome {
    Written(Vec<u8>),
    Unchanged { bytes: Vec<u8>, reason: Unsupported },
    /// Building or splicing failed; `bytes` is the untouched input.
    Degraded { bytes: Vec<u8>, error: anyhow::Error },
}

impl EncodeOutcome {
    pub fn bytes(&self) -> &[u8] {
        match self {
            EncodeOutcome::Written(bytes)
            | EncodeOutcome::Unchanged { bytes, .. }
            | EncodeOutcome::Degraded { bytes, .. } => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            EncodeOutcome::Written(bytes)
            | EncodeOutcome::Unchanged { bytes, .. }
            | EncodeOutcome::Degraded { bytes, .. } => bytes,
        }
    }
}

/// Reads and writes the searchable metadata of JPEG images.
///
/// Each call is a pure function of its arguments; one codec can be shared
/// across threads.
///
/// ```rust
/// use metamorph::exif::{Metadata, MetadataCodec};
///
/// let codec = MetadataCodec::default();
/// let png = b"\x89PNG\r\n\x1a\n".to_vec();
/// let m = Metadata { title: Some("Vitrine".into()), ..Default::default() };
///
/// // Anything that is not a JPEG passes through untouched
/// assert_eq!(codec.encode(&png, &m), png);
/// assert!(codec.decode(&png).is_empty());
/// ```
pub struct MetadataCodec {
    capability: Capability,
    clock: Box<dyn Clock>,
    byte_order: ByteOrder,
    default_software: String,
}

impl MetadataCodec {
    pub fn new(capability: Capability, clock: Box<dyn Clock>) -> Self {
        Self {
            capability,
            clock,
            byte_order: ByteOrder::default(),
            default_software: DEFAULT_SOFTWARE.to_string(),
        }
    }

    /// A codec on the system clock, configured from the `codec` section.
    pub fn from_config(config: &CodecConfig) -> Self {
        Self::new(Capability::Available, Box::new(SystemClock))
            .with_byte_order(config.byte_order)
            .with_default_software(config.default_software.clone())
    }

    /// A codec for hosts without EXIF support.
    pub fn unavailable() -> Self {
        Self::new(Capability::Unavailable, Box::new(SystemClock))
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_default_software(mut self, software: impl Into<String>) -> Self {
        self.default_software = software.into();
        self
    }

    fn check(&self, bytes: &[u8]) -> Option<Unsupported> {
        if self.capability == Capability::Unavailable {
            Some(Unsupported::CodecUnavailable)
        } else if !jpeg::is_jpeg(bytes) {
            Some(Unsupported::NotJpeg)
        } else {
            None
        }
    }

    /// Decode the metadata of `bytes`; empty for anything unsupported.
    pub fn decode(&self, bytes: &[u8]) -> Metadata {
        self.decode_outcome(bytes).into_metadata()
    }

    pub fn decode_outcome(&self, bytes: &[u8]) -> DecodeOutcome {
        if let Some(reason) = self.check(bytes) {
            log::debug!("Skipping EXIF decode: {reason}");
            return DecodeOutcome::Empty(reason);
        }

        let decoded = reader::read_metadata(jpeg::find_exif(bytes).as_deref(), &self.default_software);
        DecodeOutcome::Decoded {
            metadata: decoded.metadata,
            malformed: decoded.malformed,
        }
    }

    /// Replace the EXIF segment of `bytes` with one built from `metadata`.
    ///
    /// Returns the input unchanged when it is unsupported or when anything
    /// goes wrong; the image itself is never lost.
    pub fn encode(&self, bytes: &[u8], metadata: &Metadata) -> Vec<u8> {
        self.encode_outcome(bytes, metadata).into_bytes()
    }

    pub fn encode_outcome(&self, bytes: &[u8], metadata: &Metadata) -> EncodeOutcome {
        if let Some(reason) = self.check(bytes) {
            log::debug!("Skipping EXIF encode: {reason}");
            return EncodeOutcome::Unchanged {
                bytes: bytes.to_vec(),
                reason,
            };
        }

        match self.splice(bytes, metadata) {
            Ok(out) => EncodeOutcome::Written(out),
            Err(error) => {
                log::warn!("Failed to write EXIF, keeping original image: {error:#}");
                EncodeOutcome::Degraded {
                    bytes: bytes.to_vec(),
                    error,
                }
            }
        }
    }

    fn splice(&self, bytes: &[u8], metadata: &Metadata) -> Result<Vec<u8>> {
        let container = ExifContainer::from_metadata(metadata, self.clock.now());
        log::debug!(
            "Built EXIF: {} 0th IFD tag(s), {} Exif IFD tag(s)",
            container.zeroth.len(),
            container.exif.len()
        );
        let payload = container
            .to_app1_payload(self.byte_order)
            .context("Failed to serialize EXIF")?;
        let stripped = jpeg::remove_exif(bytes);
        jpeg::insert_exif(&stripped, &payload).context("Failed to insert EXIF segment")
    }

    /// Remove the EXIF segment, leaving everything else in place.
    pub fn clear(&self, bytes: &[u8]) -> Vec<u8> {
        match self.check(bytes) {
            Some(_) => bytes.to_vec(),
            None => jpeg::remove_exif(bytes),
        }
    }

    /// [`Self::decode`] for a base64 data URL.
    pub fn decode_data_url(&self, url: &str) -> Metadata {
        match data_url::parse(url) {
            Ok(parsed) if parsed.is_jpeg() => self.decode(&parsed.data),
            Ok(parsed) => {
                log::debug!("Skipping EXIF decode for {}", parsed.mime_type);
                Metadata::default()
            }
            Err(e) => {
                log::debug!("Not a usable data URL: {e:#}");
                Metadata::default()
            }
        }
    }

    /// [`Self::encode`] for a base64 data URL. Anything other than a
    /// `data:image/jpeg` URL comes back unchanged.
    pub fn encode_data_url(&self, url: &str, metadata: &Metadata) -> String {
        let parsed = match data_url::parse(url) {
            Ok(parsed) if parsed.is_jpeg() => parsed,
            _ => return url.to_string(),
        };
        match self.encode_outcome(&parsed.data, metadata) {
            EncodeOutcome::Written(bytes) => data_url::format(&parsed.mime_type, &bytes),
            _ => url.to_string(),
        }
    }
}

impl Default for MetadataCodec {
    fn default() -> Self {
        Self::new(Capability::Available, Box::new(SystemClock))
    }
}

impl fmt::Debug for MetadataCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataCodec")
            .field("capability", &self.capability)
            .field("byte_order", &self.byte_order)
            .field("default_software", &self.default_software)
            .finish_non_exhaustive()
    }
}
