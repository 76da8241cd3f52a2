use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::jpeg::EXIF_HEADER;
use super::metadata::{Metadata, text};
use super::tags::{IfdGroup, Tag, TagValue, normalize_keywords};

/// Size of the TIFF header; the 0th IFD starts right after it.
const TIFF_HEADER_LEN: u32 = 8;
const ENTRY_LEN: usize = 12;

/// Format of the `DateTime` tag.
pub const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// TIFF byte order, selected by the `II` / `MM` mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl ByteOrder {
    pub fn mark(self) -> [u8; 2] {
        match self {
            ByteOrder::Big => *b"MM",
            ByteOrder::Little => *b"II",
        }
    }

    pub fn from_mark(mark: &[u8]) -> Option<Self> {
        match mark {
            b"MM" => Some(ByteOrder::Big),
            b"II" => Some(ByteOrder::Little),
            _ => None,
        }
    }

    pub fn is_big(self) -> bool {
        self == ByteOrder::Big
    }

    pub fn u16_bytes(self, v: u16) -> [u8; 2] {
        if self.is_big() { v.to_be_bytes() } else { v.to_le_bytes() }
    }

    pub fn u32_bytes(self, v: u32) -> [u8; 4] {
        if self.is_big() { v.to_be_bytes() } else { v.to_le_bytes() }
    }

    pub fn read_u16(self, b: [u8; 2]) -> u16 {
        if self.is_big() { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) }
    }

    pub fn read_u32(self, b: [u8; 4]) -> u32 {
        if self.is_big() { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) }
    }
}

/// An Image File Directory: tag id → value, kept in ascending tag order
/// as TIFF requires.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ifd {
    entries: BTreeMap<u16, TagValue>,
}

impl Ifd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: Tag, value: TagValue) {
        self.entries.insert(tag.id(), value);
    }

    pub fn get(&self, tag: Tag) -> Option<&TagValue> {
        self.entries.get(&tag.id())
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.entries.contains_key(&tag.id())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &TagValue)> {
        self.entries.iter().map(|(id, v)| (*id, v))
    }

    /// Serialized size of this IFD when placed anywhere in the file.
    fn encoded_len(&self, order: ByteOrder) -> usize {
        let data: usize = self
            .entries
            .values()
            .map(|v| {
                let n = v.to_bytes(order.is_big()).len();
                if n <= 4 { 0 } else { n + n % 2 }
            })
            .sum();
        2 + self.entries.len() * ENTRY_LEN + 4 + data
    }

    /// Serialize the directory as it will sit at `start` bytes from the
    /// TIFF header: entry count, entries, next-IFD offset `0`, then the
    /// out-of-line data area. All offsets written are relative to the TIFF
    /// header.
    pub fn serialize(&self, order: ByteOrder, start: u32) -> Result<Vec<u8>> {
        let count = u16::try_from(self.entries.len()).context("Too many IFD entries")?;
        let table_len = 2 + self.entries.len() * ENTRY_LEN + 4;

        let mut table = Vec::with_capacity(table_len);
        let mut data: Vec<u8> = Vec::new();
        table.extend_from_slice(&order.u16_bytes(count));

        for (&id, value) in &self.entries {
            let bytes = value.to_bytes(order.is_big());
            let value_count = u32::try_from(value.count()).context("Tag value too large")?;

            table.extend_from_slice(&order.u16_bytes(id));
            table.extend_from_slice(&order.u16_bytes(value.field_type().code()));
            table.extend_from_slice(&order.u32_bytes(value_count));

            if bytes.len() <= 4 {
                let mut inline = [0u8; 4];
                inline[..bytes.len()].copy_from_slice(&bytes);
                table.extend_from_slice(&inline);
            } else {
                let offset = u32::try_from(start as usize + table_len + data.len())
                    .context("IFD data offset exceeds 32 bits")?;
                table.extend_from_slice(&order.u32_bytes(offset));
                data.extend_from_slice(&bytes);
                // Word-align the next value
                if bytes.len() % 2 == 1 {
                    data.push(0);
                }
            }
        }

        // No next IFD (no thumbnail)
        table.extend_from_slice(&order.u32_bytes(0));
        table.extend_from_slice(&data);
        Ok(table)
    }
}

/// The 0th IFD plus the Exif sub-IFD, as carried by one `APP1` segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExifContainer {
    pub zeroth: Ifd,
    pub exif: Ifd,
}

impl ExifContainer {
    /// Build both directories from an edited record.
    ///
    /// Blank fields produce no tag at all. Rating and RatingPercent are
    /// always written (five stars when unset) and `DateTime` falls back to
    /// `now`.
    pub fn from_metadata(metadata: &Metadata, now: NaiveDateTime) -> Self {
        let mut c = ExifContainer::default();

        if let Some(title) = text(&metadata.title) {
            c.insert_ascii(Tag::ImageDescription, title);
            c.insert(Tag::XpTitle, TagValue::xp(title));
        }

        if let Some(description) = text(&metadata.description) {
            c.insert(Tag::XpComment, TagValue::xp(description));
        }

        if let Some(subject) = text(&metadata.subject) {
            c.insert(Tag::XpSubject, TagValue::xp(subject));
        }

        let rating = metadata.effective_rating();
        c.insert(Tag::Rating, TagValue::Short(rating.stars() as u16));
        c.insert(Tag::RatingPercent, TagValue::Short(rating.percent()));

        if let Some(artist) = text(&metadata.artist) {
            c.insert_ascii(Tag::Artist, artist);
            c.insert(Tag::XpAuthor, TagValue::xp(artist));
        }

        if let Some(raw) = text(&metadata.user_comment) {
            let keywords = normalize_keywords(raw);
            if keywords.is_empty() {
                log::debug!("  Keywords empty after normalizing, skipped");
            } else {
                c.insert(Tag::XpKeywords, TagValue::xp(&keywords));
                c.insert(Tag::UserComment, TagValue::user_comment(&keywords));
            }
        }

        if let Some(software) = text(&metadata.software) {
            c.insert_ascii(Tag::Software, software);
        }

        if let Some(copyright) = text(&metadata.copyright) {
            c.insert_ascii(Tag::Copyright, copyright);
        }

        let date_time = text(&metadata.date_time)
            .map(str::to_string)
            .unwrap_or_else(|| now.format(EXIF_DATETIME_FORMAT).to_string());
        c.insert_ascii(Tag::DateTime, &date_time);

        c
    }

    /// Route a value to the directory its tag belongs to.
    pub fn insert(&mut self, tag: Tag, value: TagValue) {
        match tag.group() {
            IfdGroup::Zeroth => self.zeroth.insert(tag, value),
            IfdGroup::Exif => self.exif.insert(tag, value),
        }
    }

    fn insert_ascii(&mut self, tag: Tag, raw: &str) {
        match TagValue::ascii(raw) {
            Some(value) => self.insert(tag, value),
            None => log::debug!("  {} has no ASCII content, skipped", tag.name()),
        }
    }

    /// Serialize to TIFF bytes: header, 0th IFD, then the Exif IFD when it
    /// has entries (linked through `ExifIFDPointer`).
    pub fn to_tiff(&self, order: ByteOrder) -> Result<Vec<u8>> {
        let mut zeroth = self.zeroth.clone();
        let exif_offset = if self.exif.is_empty() {
            None
        } else {
            // The pointer is inline, so its value does not change the 0th IFD size
            zeroth.insert(Tag::ExifIfdPointer, TagValue::Long(0));
            let offset = TIFF_HEADER_LEN as usize + zeroth.encoded_len(order);
            let offset = u32::try_from(offset).context("Exif IFD offset exceeds 32 bits")?;
            zeroth.insert(Tag::ExifIfdPointer, TagValue::Long(offset));
            Some(offset)
        };

        let mut tiff = Vec::new();
        tiff.extend_from_slice(&order.mark());
        tiff.extend_from_slice(&order.u16_bytes(42));
        tiff.extend_from_slice(&order.u32_bytes(TIFF_HEADER_LEN));
        tiff.extend_from_slice(&zeroth.serialize(order, TIFF_HEADER_LEN)?);

        if let Some(offset) = exif_offset {
            debug_assert_eq!(tiff.len(), offset as usize);
            tiff.extend_from_slice(&self.exif.serialize(order, offset)?);
        }

        Ok(tiff)
    }

    /// The full `APP1` payload: `Exif\0\0` followed by the TIFF bytes.
    pub fn to_app1_payload(&self, order: ByteOrder) -> Result<Vec<u8>> {
        let tiff = self.to_tiff(order)?;
        let mut payload = Vec::with_capacity(EXIF_HEADER.len() + tiff.len());
        payload.extend_from_slice(EXIF_HEADER);
        payload.extend_from_slice(&tiff);
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::tags::{Rating, encode_user_comment, encode_xp};
    use chrono::NaiveDate;

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(12, 30, 5)
            .unwrap()
    }

    fn be16(b: &[u8], at: usize) -> u16 {
        u16::from_be_bytes([b[at], b[at + 1]])
    }

    fn be32(b: &[u8], at: usize) -> u32 {
        u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
    }

    // ── from_metadata ────────────────────────────────────────────────

    #[test]
    fn empty_metadata_writes_rating_and_datetime_only() {
        let c = ExifContainer::from_metadata(&Metadata::default(), noon());
        let ids: Vec<u16> = c.zeroth.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![0x0132, 0x4746, 0x4749]);
        assert!(c.exif.is_empty());
        assert_eq!(
            c.zeroth.get(Tag::DateTime),
            Some(&TagValue::Ascii("2024:03:09 12:30:05".into()))
        );
        assert_eq!(c.zeroth.get(Tag::Rating), Some(&TagValue::Short(5)));
        assert_eq!(c.zeroth.get(Tag::RatingPercent), Some(&TagValue::Short(99)));
    }

    #[test]
    fn title_writes_ascii_mirror_and_xp() {
        let m = Metadata { title: Some("Café à Brasília".into()), ..Default::default() };
        let c = ExifContainer::from_metadata(&m, noon());
        assert_eq!(
            c.zeroth.get(Tag::ImageDescription),
            Some(&TagValue::Ascii("Cafe a Brasilia".into()))
        );
        assert_eq!(
            c.zeroth.get(Tag::XpTitle),
            Some(&TagValue::Utf16Xp(encode_xp("Café à Brasília")))
        );
    }

    #[test]
    fn non_latin_title_skips_ascii_mirror() {
        let m = Metadata { title: Some("東京".into()), ..Default::default() };
        let c = ExifContainer::from_metadata(&m, noon());
        assert!(!c.zeroth.contains(Tag::ImageDescription));
        assert!(c.zeroth.contains(Tag::XpTitle));
    }

    #[test]
    fn keywords_feed_xp_and_user_comment() {
        let m = Metadata { user_comment: Some("a, b ; c".into()), ..Default::default() };
        let c = ExifContainer::from_metadata(&m, noon());
        assert_eq!(
            c.zeroth.get(Tag::XpKeywords),
            Some(&TagValue::Utf16Xp(encode_xp("a; b; c")))
        );
        assert_eq!(
            c.exif.get(Tag::UserComment),
            Some(&TagValue::UnicodeComment(encode_user_comment("a; b; c")))
        );
    }

    #[test]
    fn separator_only_keywords_write_nothing() {
        let m = Metadata { user_comment: Some(" ; , ".into()), ..Default::default() };
        let c = ExifContainer::from_metadata(&m, noon());
        assert!(!c.zeroth.contains(Tag::XpKeywords));
        assert!(c.exif.is_empty());
    }

    #[test]
    fn blank_fields_are_absent() {
        let m = Metadata {
            title: Some("".into()),
            artist: Some("   ".into()),
            copyright: None,
            ..Default::default()
        };
        let c = ExifContainer::from_metadata(&m, noon());
        assert!(!c.zeroth.contains(Tag::XpTitle));
        assert!(!c.zeroth.contains(Tag::Artist));
        assert!(!c.zeroth.contains(Tag::XpAuthor));
        assert!(!c.zeroth.contains(Tag::Copyright));
    }

    #[test]
    fn explicit_datetime_and_rating_win() {
        let m = Metadata {
            date_time: Some("2020:01:02 03:04:05".into()),
            rating: Some(Rating::new(2)),
            ..Default::default()
        };
        let c = ExifContainer::from_metadata(&m, noon());
        assert_eq!(
            c.zeroth.get(Tag::DateTime),
            Some(&TagValue::Ascii("2020:01:02 03:04:05".into()))
        );
        assert_eq!(c.zeroth.get(Tag::Rating), Some(&TagValue::Short(2)));
        assert_eq!(c.zeroth.get(Tag::RatingPercent), Some(&TagValue::Short(25)));
    }

    // ── serialize ────────────────────────────────────────────────────

    #[test]
    fn serialize_inline_and_offset_values() {
        let mut ifd = Ifd::new();
        ifd.insert(Tag::Rating, TagValue::Short(4));
        ifd.insert(Tag::Artist, TagValue::Ascii("Maria".into()));
        let bytes = ifd.serialize(ByteOrder::Big, 8).unwrap();

        assert_eq!(be16(&bytes, 0), 2);
        // Artist (0x013B) sorts before Rating (0x4746)
        assert_eq!(be16(&bytes, 2), 0x013B);
        assert_eq!(be16(&bytes, 4), 2);
        assert_eq!(be32(&bytes, 6), 6);
        // Data area starts after 2 + 2*12 + 4 bytes, relative to TIFF start 8
        assert_eq!(be32(&bytes, 10), 8 + 30);
        assert_eq!(&bytes[30..36], b"Maria\0");

        assert_eq!(be16(&bytes, 14), 0x4746);
        assert_eq!(be16(&bytes, 16), 3);
        assert_eq!(be32(&bytes, 18), 1);
        assert_eq!(&bytes[22..26], &[0x00, 0x04, 0x00, 0x00]);

        assert_eq!(be32(&bytes, 26), 0);
        assert_eq!(bytes.len(), ifd.encoded_len(ByteOrder::Big));
    }

    #[test]
    fn serialize_pads_odd_values() {
        let mut ifd = Ifd::new();
        ifd.insert(Tag::Artist, TagValue::Ascii("Ana1".into()));
        ifd.insert(Tag::Copyright, TagValue::Ascii("ACME".into()));
        let bytes = ifd.serialize(ByteOrder::Little, 8).unwrap();
        let artist_off = u32::from_le_bytes(bytes[10..14].try_into().unwrap());
        let copyright_off = u32::from_le_bytes(bytes[22..26].try_into().unwrap());
        assert_eq!(artist_off % 2, 0);
        assert_eq!(copyright_off, artist_off + 6);
        assert_eq!(bytes.len(), ifd.encoded_len(ByteOrder::Little));
    }

    #[test]
    fn tiff_header_and_exif_pointer() {
        let m = Metadata { user_comment: Some("x, y".into()), ..Default::default() };
        let tiff = ExifContainer::from_metadata(&m, noon()).to_tiff(ByteOrder::Big).unwrap();

        assert_eq!(&tiff[0..4], b"MM\x00\x2A");
        assert_eq!(be32(&tiff, 4), 8);

        let count = be16(&tiff, 8) as usize;
        let pointer = (0..count)
            .map(|i| 10 + i * 12)
            .find(|&e| be16(&tiff, e) == 0x8769)
            .map(|e| be32(&tiff, e + 8) as usize)
            .expect("ExifIFDPointer present");

        assert_eq!(be16(&tiff, pointer), 1);
        assert_eq!(be16(&tiff, pointer + 2), 0x9286);
        assert_eq!(be16(&tiff, pointer + 4), 7);
        let len = be32(&tiff, pointer + 6) as usize;
        let at = be32(&tiff, pointer + 10) as usize;
        assert_eq!(&tiff[at..at + len], encode_user_comment("x; y").as_slice());
    }

    #[test]
    fn no_exif_pointer_without_exif_entries() {
        let tiff = ExifContainer::from_metadata(&Metadata::default(), noon())
            .to_tiff(ByteOrder::Little)
            .unwrap();
        assert_eq!(&tiff[0..4], b"II\x2A\x00");
        let count = u16::from_le_bytes([tiff[8], tiff[9]]) as usize;
        let has_pointer = (0..count)
            .any(|i| u16::from_le_bytes([tiff[10 + i * 12], tiff[11 + i * 12]]) == 0x8769);
        assert!(!has_pointer);
    }

    #[test]
    fn app1_payload_has_exif_preamble() {
        let payload = ExifContainer::from_metadata(&Metadata::default(), noon())
            .to_app1_payload(ByteOrder::Big)
            .unwrap();
        assert!(payload.starts_with(b"Exif\0\0MM"));
    }
}
