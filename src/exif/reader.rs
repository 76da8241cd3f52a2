use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;

use super::ifd::ByteOrder;
use super::jpeg::EXIF_HEADER;
use super::metadata::Metadata;
use super::tags::{IfdGroup, Rating, Tag, decode_ascii, decode_user_comment, decode_xp, unit_size};

/// Software name reported when the image carries no `Software` tag.
pub const DEFAULT_SOFTWARE: &str = "MetaMorph SEO";

/// One 12-byte IFD entry, value undecoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEntry {
    pub tag: u16,
    pub type_code: u16,
    pub count: u32,
    /// Position of the 4-byte value/offset word within the TIFF data.
    value_pos: usize,
}

/// Bounds-checked reader over the TIFF bytes of an EXIF payload.
pub struct TiffReader<'a> {
    data: &'a [u8],
    order: ByteOrder,
}

impl<'a> TiffReader<'a> {
    /// Validate the TIFF header (`II`/`MM` + magic 42).
    pub fn new(data: &'a [u8]) -> Result<Self> {
        if data.len() < 8 {
            bail!("TIFF data too short ({} bytes)", data.len());
        }
        let order = ByteOrder::from_mark(&data[0..2]).context("Invalid TIFF byte order")?;
        let reader = Self { data, order };
        let magic = reader.u16_at(2)?;
        if magic != 42 {
            bail!("Invalid TIFF magic {magic:#06x}");
        }
        Ok(reader)
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        let end = offset.checked_add(len).context("Offset overflow")?;
        self.data
            .get(offset..end)
            .with_context(|| format!("Read of {len} bytes at {offset} is out of bounds"))
    }

    fn u16_at(&self, offset: usize) -> Result<u16> {
        let b = self.slice(offset, 2)?;
        Ok(self.order.read_u16([b[0], b[1]]))
    }

    fn u32_at(&self, offset: usize) -> Result<u32> {
        let b = self.slice(offset, 4)?;
        Ok(self.order.read_u32([b[0], b[1], b[2], b[3]]))
    }

    pub fn zeroth_ifd_offset(&self) -> Result<usize> {
        Ok(self.u32_at(4)? as usize)
    }

    /// Read the entry table of the IFD at `offset`. Duplicate tag ids keep
    /// the first occurrence.
    pub fn read_ifd(&self, offset: usize) -> Result<BTreeMap<u16, RawEntry>> {
        let count = self.u16_at(offset).context("IFD entry count out of bounds")? as usize;
        let start = offset + 2;
        self.slice(start, count * 12)
            .context("IFD entries extend beyond TIFF data")?;

        let mut entries = BTreeMap::new();
        for i in 0..count {
            let at = start + i * 12;
            let entry = RawEntry {
                tag: self.u16_at(at)?,
                type_code: self.u16_at(at + 2)?,
                count: self.u32_at(at + 4)?,
                value_pos: at + 8,
            };
            entries.entry(entry.tag).or_insert(entry);
        }
        Ok(entries)
    }

    /// The bytes an entry refers to: inline when they fit in the 4-byte
    /// value word, otherwise at the offset it holds.
    pub fn value_bytes(&self, entry: &RawEntry) -> Result<&'a [u8]> {
        let unit = unit_size(entry.type_code)
            .with_context(|| format!("Unknown TIFF type {}", entry.type_code))?;
        let len = unit
            .checked_mul(entry.count as usize)
            .context("Value length overflow")?;
        if len <= 4 {
            self.slice(entry.value_pos, len)
        } else {
            let offset = self.u32_at(entry.value_pos)? as usize;
            self.slice(offset, len)
        }
    }

    /// First value of a BYTE, SHORT, LONG or IFD entry, wherever the
    /// values are stored.
    pub fn integer(&self, entry: &RawEntry) -> Result<u32> {
        if entry.count == 0 {
            bail!("Empty integer value");
        }
        let bytes = self.value_bytes(entry)?;
        match entry.type_code {
            1 => Ok(bytes[0] as u32),
            3 => Ok(self.order.read_u16([bytes[0], bytes[1]]) as u32),
            4 | 13 => Ok(self.order.read_u32([bytes[0], bytes[1], bytes[2], bytes[3]])),
            other => bail!("Type {other} is not an integer type"),
        }
    }
}

/// Result of decoding one EXIF payload.
///
/// `malformed` names the tags (or structures) that were present but could
/// not be read; each of them resolved to empty/default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedExif {
    pub metadata: Metadata,
    pub malformed: Vec<&'static str>,
}

/// Per-field lookups that record failures instead of propagating them.
struct FieldReader<'a> {
    tiff: Option<TiffReader<'a>>,
    zeroth: BTreeMap<u16, RawEntry>,
    exif: BTreeMap<u16, RawEntry>,
    malformed: Vec<&'static str>,
}

impl<'a> FieldReader<'a> {
    fn open(payload: Option<&'a [u8]>) -> Self {
        let mut fields = FieldReader {
            tiff: None,
            zeroth: BTreeMap::new(),
            exif: BTreeMap::new(),
            malformed: Vec::new(),
        };
        let Some(payload) = payload else {
            return fields;
        };

        let Some(tiff) = payload.strip_prefix(EXIF_HEADER) else {
            fields.fail("Exif header", &anyhow::anyhow!("Missing Exif\\0\\0 preamble"));
            return fields;
        };

        let reader = match TiffReader::new(tiff) {
            Ok(r) => r,
            Err(e) => {
                fields.fail("TIFF header", &e);
                return fields;
            }
        };

        match reader.zeroth_ifd_offset().and_then(|o| reader.read_ifd(o)) {
            Ok(entries) => fields.zeroth = entries,
            Err(e) => fields.fail("0th IFD", &e),
        }

        if let Some(pointer) = fields.zeroth.get(&Tag::ExifIfdPointer.id()).copied() {
            match reader
                .integer(&pointer)
                .and_then(|o| reader.read_ifd(o as usize))
            {
                Ok(entries) => fields.exif = entries,
                Err(e) => fields.fail("Exif IFD", &e),
            }
        }

        fields.tiff = Some(reader);
        fields
    }

    fn fail(&mut self, what: &'static str, err: &anyhow::Error) {
        log::warn!("Malformed EXIF {what}: {err:#}");
        self.malformed.push(what);
    }

    fn entry(&self, tag: Tag) -> Option<RawEntry> {
        let table = match tag.group() {
            IfdGroup::Zeroth => &self.zeroth,
            IfdGroup::Exif => &self.exif,
        };
        table.get(&tag.id()).copied()
    }

    fn bytes(&mut self, tag: Tag) -> Option<&'a [u8]> {
        let entry = self.entry(tag)?;
        let tiff = self.tiff.as_ref()?;
        match tiff.value_bytes(&entry) {
            Ok(b) => Some(b),
            Err(e) => {
                self.fail(tag.name(), &e);
                None
            }
        }
    }

    fn xp(&mut self, tag: Tag) -> Option<String> {
        self.bytes(tag).map(decode_xp).filter(|s| !s.is_empty())
    }

    fn ascii(&mut self, tag: Tag) -> Option<String> {
        self.bytes(tag).map(decode_ascii).filter(|s| !s.is_empty())
    }

    fn user_comment(&mut self) -> Option<String> {
        self.bytes(Tag::UserComment)
            .and_then(decode_user_comment)
            .filter(|s| !s.is_empty())
    }

    fn integer(&mut self, tag: Tag) -> Option<u32> {
        let entry = self.entry(tag)?;
        let tiff = self.tiff.as_ref()?;
        match tiff.integer(&entry) {
            Ok(v) => Some(v),
            Err(e) => {
                self.fail(tag.name(), &e);
                None
            }
        }
    }
}

/// Decode an `APP1` payload (`Exif\0\0` + TIFF) into a best-effort record.
///
/// `None` means the JPEG has no EXIF segment; the result then carries just
/// the defaults (five stars, `default_software`). XP tags win over their
/// ASCII counterparts, and `XPKeywords` over `UserComment`.
pub fn read_metadata(payload: Option<&[u8]>, default_software: &str) -> DecodedExif {
    let mut f = FieldReader::open(payload);

    let image_description = f.ascii(Tag::ImageDescription);
    let title = f.xp(Tag::XpTitle).or_else(|| image_description.clone());
    let description = f.xp(Tag::XpComment).or(image_description);
    let subject = f.xp(Tag::XpSubject);
    let artist = f.xp(Tag::XpAuthor).or_else(|| f.ascii(Tag::Artist));
    let user_comment = f.xp(Tag::XpKeywords).or_else(|| f.user_comment());
    let copyright = f.ascii(Tag::Copyright);
    let date_time = f.ascii(Tag::DateTime);
    let software = f.ascii(Tag::Software).or_else(|| {
        Some(default_software.to_string()).filter(|s| !s.is_empty())
    });

    let rating = match f.integer(Tag::Rating).filter(|&stars| stars > 0) {
        Some(stars) => Rating::new(stars.min(Rating::MAX as u32)),
        None => f
            .integer(Tag::RatingPercent)
            .and_then(Rating::from_percent)
            .unwrap_or_default(),
    };

    let metadata = Metadata {
        title,
        subject,
        rating: Some(rating),
        description,
        artist,
        copyright,
        software,
        date_time,
        user_comment,
    };
    log::debug!("Decoded EXIF: {metadata:?}");

    DecodedExif {
        metadata,
        malformed: f.malformed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::ifd::{ExifContainer, Ifd};
    use crate::exif::tags::{TagValue, encode_xp};
    use chrono::NaiveDate;

    fn now() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn payload_for(metadata: &Metadata, order: ByteOrder) -> Vec<u8> {
        ExifContainer::from_metadata(metadata, now())
            .to_app1_payload(order)
            .unwrap()
    }

    fn payload_of(zeroth: Ifd, order: ByteOrder) -> Vec<u8> {
        ExifContainer { zeroth, exif: Ifd::new() }
            .to_app1_payload(order)
            .unwrap()
    }

    fn full() -> Metadata {
        Metadata {
            title: Some("Café à Brasília".into()),
            subject: Some("Gastronomia".into()),
            rating: Some(Rating::new(4)),
            description: Some("Mesa posta ao pôr do sol".into()),
            artist: Some("João Müller".into()),
            copyright: Some("(c) E3 Connect".into()),
            software: Some("MetaMorph SEO".into()),
            date_time: Some("2024:05:06 07:08:09".into()),
            user_comment: Some("café; brasília; seo".into()),
        }
    }

    // ── TiffReader ───────────────────────────────────────────────────

    #[test]
    fn reader_rejects_bad_headers() {
        assert!(TiffReader::new(b"MM\x00").is_err());
        assert!(TiffReader::new(b"XX\x00\x2A\x00\x00\x00\x08").is_err());
        assert!(TiffReader::new(b"MM\x00\x2B\x00\x00\x00\x08").is_err());
        assert!(TiffReader::new(b"II\x2A\x00\x08\x00\x00\x00").is_ok());
    }

    #[test]
    fn reader_bounds_checks_ifd() {
        // Claims 5 entries, has none
        let tiff = b"MM\x00\x2A\x00\x00\x00\x08\x00\x05";
        let r = TiffReader::new(tiff).unwrap();
        assert!(r.read_ifd(8).is_err());
        assert!(r.read_ifd(100).is_err());
    }

    /// Big-endian IFD entry: tag, type, count, value word.
    fn entry_be(tag: u16, type_code: u16, count: u32, value: u32) -> Vec<u8> {
        let mut e = Vec::with_capacity(12);
        e.extend_from_slice(&tag.to_be_bytes());
        e.extend_from_slice(&type_code.to_be_bytes());
        e.extend_from_slice(&count.to_be_bytes());
        e.extend_from_slice(&value.to_be_bytes());
        e
    }

    /// `MM` header followed by a one-entry 0th IFD at offset 8.
    fn single_entry_tiff(entry: Vec<u8>) -> Vec<u8> {
        let mut tiff = b"MM\x00\x2A\x00\x00\x00\x08\x00\x01".to_vec();
        tiff.extend(entry);
        tiff.extend_from_slice(&[0, 0, 0, 0]);
        tiff
    }

    #[test]
    fn integer_follows_offset_for_out_of_line_shorts() {
        // Three SHORTs do not fit the value word; they live at offset 26
        let mut tiff = single_entry_tiff(entry_be(0x4746, 3, 3, 26));
        tiff.extend_from_slice(&[0x00, 0x04, 0x00, 0x01, 0x00, 0x02]);

        let r = TiffReader::new(&tiff).unwrap();
        let ifd = r.read_ifd(8).unwrap();
        assert_eq!(r.integer(&ifd[&0x4746]).unwrap(), 4);

        let mut payload = EXIF_HEADER.to_vec();
        payload.extend(tiff);
        let decoded = read_metadata(Some(&payload), "");
        assert!(decoded.malformed.is_empty());
        assert_eq!(decoded.metadata.rating, Some(Rating::new(4)));
    }

    #[test]
    fn integer_reads_inline_values_of_each_width() {
        let tiff = single_entry_tiff(entry_be(0x4749, 1, 1, 0x3200_0000));
        let r = TiffReader::new(&tiff).unwrap();
        assert_eq!(r.integer(&r.read_ifd(8).unwrap()[&0x4749]).unwrap(), 0x32);

        let tiff = single_entry_tiff(entry_be(0x4749, 4, 1, 0x0001_0002));
        let r = TiffReader::new(&tiff).unwrap();
        assert_eq!(r.integer(&r.read_ifd(8).unwrap()[&0x4749]).unwrap(), 0x0001_0002);

        let tiff = single_entry_tiff(entry_be(0x4749, 2, 1, 0x4100_0000));
        let r = TiffReader::new(&tiff).unwrap();
        assert!(r.integer(&r.read_ifd(8).unwrap()[&0x4749]).is_err());
    }

    #[test]
    fn exif_pointer_typed_as_ifd_is_followed() {
        // 0th IFD: ExifIFDPointer (type 13) -> 26; Exif IFD: UserComment at 44
        let mut tiff = single_entry_tiff(entry_be(0x8769, 13, 1, 26));
        let comment: Vec<u8> = b"UNICODE\0"
            .iter()
            .copied()
            .chain("a; b".encode_utf16().flat_map(u16::to_be_bytes))
            .collect();
        tiff.extend_from_slice(&[0x00, 0x01]);
        tiff.extend(entry_be(0x9286, 7, comment.len() as u32, 44));
        tiff.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(tiff.len(), 44);
        tiff.extend(comment);

        let mut payload = EXIF_HEADER.to_vec();
        payload.extend(tiff);
        let decoded = read_metadata(Some(&payload), "");
        assert!(decoded.malformed.is_empty());
        assert_eq!(decoded.metadata.user_comment.as_deref(), Some("a; b"));
    }

    // ── read_metadata ────────────────────────────────────────────────

    #[test]
    fn round_trip_both_byte_orders() {
        for order in [ByteOrder::Big, ByteOrder::Little] {
            let decoded = read_metadata(Some(&payload_for(&full(), order)), DEFAULT_SOFTWARE);
            assert!(decoded.malformed.is_empty());
            let m = decoded.metadata;
            assert_eq!(m.title.as_deref(), Some("Café à Brasília"));
            assert_eq!(m.subject.as_deref(), Some("Gastronomia"));
            assert_eq!(m.description.as_deref(), Some("Mesa posta ao pôr do sol"));
            assert_eq!(m.artist.as_deref(), Some("João Müller"));
            assert_eq!(m.copyright.as_deref(), Some("(c) E3 Connect"));
            assert_eq!(m.date_time.as_deref(), Some("2024:05:06 07:08:09"));
            assert_eq!(m.user_comment.as_deref(), Some("café; brasília; seo"));
            assert_eq!(m.rating, Some(Rating::new(4)));
        }
    }

    #[test]
    fn absent_payload_yields_defaults() {
        let decoded = read_metadata(None, DEFAULT_SOFTWARE);
        assert!(decoded.malformed.is_empty());
        assert_eq!(decoded.metadata.rating, Some(Rating::new(5)));
        assert_eq!(decoded.metadata.software.as_deref(), Some(DEFAULT_SOFTWARE));
        assert_eq!(decoded.metadata.title, None);
    }

    #[test]
    fn ascii_fallbacks_when_xp_missing() {
        let mut zeroth = Ifd::new();
        zeroth.insert(Tag::ImageDescription, TagValue::Ascii("Cafe a Brasilia".into()));
        zeroth.insert(Tag::Artist, TagValue::Ascii("Joao".into()));
        let m = read_metadata(Some(&payload_of(zeroth, ByteOrder::Big)), "").metadata;
        assert_eq!(m.title.as_deref(), Some("Cafe a Brasilia"));
        assert_eq!(m.description.as_deref(), Some("Cafe a Brasilia"));
        assert_eq!(m.artist.as_deref(), Some("Joao"));
        assert_eq!(m.software, None);
    }

    #[test]
    fn user_comment_fallback_when_xp_keywords_missing() {
        let mut c = ExifContainer::default();
        c.insert(Tag::UserComment, TagValue::user_comment("a; b"));
        let payload = c.to_app1_payload(ByteOrder::Little).unwrap();
        let m = read_metadata(Some(&payload), "").metadata;
        assert_eq!(m.user_comment.as_deref(), Some("a; b"));
    }

    #[test]
    fn rating_tag_is_clamped() {
        let mut zeroth = Ifd::new();
        zeroth.insert(Tag::Rating, TagValue::Short(9));
        let m = read_metadata(Some(&payload_of(zeroth, ByteOrder::Big)), "").metadata;
        assert_eq!(m.rating, Some(Rating::new(5)));

        let mut zeroth = Ifd::new();
        zeroth.insert(Tag::Rating, TagValue::Long(2));
        let m = read_metadata(Some(&payload_of(zeroth, ByteOrder::Little)), "").metadata;
        assert_eq!(m.rating, Some(Rating::new(2)));
    }

    #[test]
    fn rating_zero_falls_back_to_percent_then_default() {
        let mut zeroth = Ifd::new();
        zeroth.insert(Tag::Rating, TagValue::Short(0));
        zeroth.insert(Tag::RatingPercent, TagValue::Short(50));
        let m = read_metadata(Some(&payload_of(zeroth, ByteOrder::Big)), "").metadata;
        assert_eq!(m.rating, Some(Rating::new(3)));

        let mut zeroth = Ifd::new();
        zeroth.insert(Tag::Rating, TagValue::Short(0));
        let m = read_metadata(Some(&payload_of(zeroth, ByteOrder::Big)), "").metadata;
        assert_eq!(m.rating, Some(Rating::new(5)));
    }

    #[test]
    fn corrupt_field_does_not_affect_siblings() {
        let mut zeroth = Ifd::new();
        zeroth.insert(Tag::XpTitle, TagValue::Utf16Xp(encode_xp("Título")));
        zeroth.insert(Tag::XpSubject, TagValue::Utf16Xp(encode_xp("Assunto")));
        let mut payload = payload_of(zeroth, ByteOrder::Big);

        // Point XPSubject's offset past the end of the data
        let tiff = &mut payload[EXIF_HEADER.len()..];
        let count = u16::from_be_bytes([tiff[8], tiff[9]]) as usize;
        let entry = (0..count)
            .map(|i| 10 + i * 12)
            .find(|&e| u16::from_be_bytes([tiff[e], tiff[e + 1]]) == 0x9C9F)
            .unwrap();
        tiff[entry + 8..entry + 12].copy_from_slice(&0xFFFF_0000u32.to_be_bytes());

        let decoded = read_metadata(Some(&payload), "");
        assert_eq!(decoded.metadata.title.as_deref(), Some("Título"));
        assert_eq!(decoded.metadata.subject, None);
        assert_eq!(decoded.malformed, vec!["XPSubject"]);
    }

    #[test]
    fn unknown_type_code_is_malformed() {
        let mut zeroth = Ifd::new();
        zeroth.insert(Tag::Copyright, TagValue::Ascii("ACME Ltd".into()));
        zeroth.insert(Tag::Artist, TagValue::Ascii("Ana".into()));
        let mut payload = payload_of(zeroth, ByteOrder::Big);

        let tiff = &mut payload[EXIF_HEADER.len()..];
        let count = u16::from_be_bytes([tiff[8], tiff[9]]) as usize;
        let entry = (0..count)
            .map(|i| 10 + i * 12)
            .find(|&e| u16::from_be_bytes([tiff[e], tiff[e + 1]]) == 0x8298)
            .unwrap();
        tiff[entry + 2..entry + 4].copy_from_slice(&99u16.to_be_bytes());

        let decoded = read_metadata(Some(&payload), "");
        assert_eq!(decoded.metadata.copyright, None);
        assert_eq!(decoded.metadata.artist.as_deref(), Some("Ana"));
        assert_eq!(decoded.malformed, vec!["Copyright"]);
    }

    #[test]
    fn broken_header_yields_defaults() {
        let decoded = read_metadata(Some(b"Exif\0\0garbage!"), DEFAULT_SOFTWARE);
        assert_eq!(decoded.malformed, vec!["TIFF header"]);
        assert_eq!(decoded.metadata.rating, Some(Rating::new(5)));
        assert_eq!(decoded.metadata.title, None);

        let decoded = read_metadata(Some(b"XMP stuff"), DEFAULT_SOFTWARE);
        assert_eq!(decoded.malformed, vec!["Exif header"]);
    }

    #[test]
    fn dangling_exif_pointer_keeps_zeroth_fields() {
        let mut zeroth = Ifd::new();
        zeroth.insert(Tag::XpTitle, TagValue::xp("Title"));
        zeroth.insert(Tag::ExifIfdPointer, TagValue::Long(0x00FF_FFFF));
        let decoded = read_metadata(Some(&payload_of(zeroth, ByteOrder::Little)), "");
        assert_eq!(decoded.metadata.title.as_deref(), Some("Title"));
        assert_eq!(decoded.malformed, vec!["Exif IFD"]);
    }
}
