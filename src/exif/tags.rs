use serde::{Deserialize, Deserializer, Serialize, Serializer};
use unicode_normalization::UnicodeNormalization;

/// Charset marker that prefixes a UTF-16 `UserComment`.
pub const UNICODE_PREFIX: &[u8; 8] = b"UNICODE\0";
/// Charset marker that prefixes an ASCII `UserComment`.
pub const ASCII_PREFIX: &[u8; 8] = b"ASCII\0\0\0";

/// The star glyph counted in rating strings.
pub const STAR: char = '★';

/// TIFF field type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Undefined = 7,
}

impl FieldType {
    pub const fn code(self) -> u16 {
        self as u16
    }
}

/// Size in bytes of one value of the given TIFF type code, or `None` for
/// codes outside the TIFF 6.0 table and its IFD (13) extension.
pub fn unit_size(type_code: u16) -> Option<usize> {
    match type_code {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 | 13 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

/// Which directory a tag lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfdGroup {
    Zeroth,
    Exif,
}

/// Every tag this codec reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tag {
    ImageDescription,
    Software,
    DateTime,
    Artist,
    Rating,
    RatingPercent,
    Copyright,
    ExifIfdPointer,
    UserComment,
    XpTitle,
    XpComment,
    XpAuthor,
    XpKeywords,
    XpSubject,
}

impl Tag {
    pub const ALL: [Tag; 14] = [
        Tag::ImageDescription,
        Tag::Software,
        Tag::DateTime,
        Tag::Artist,
        Tag::Rating,
        Tag::RatingPercent,
        Tag::Copyright,
        Tag::ExifIfdPointer,
        Tag::UserComment,
        Tag::XpTitle,
        Tag::XpComment,
        Tag::XpAuthor,
        Tag::XpKeywords,
        Tag::XpSubject,
    ];

    pub const fn id(self) -> u16 {
        match self {
            Tag::ImageDescription => 0x010E,
            Tag::Software => 0x0131,
            Tag::DateTime => 0x0132,
            Tag::Artist => 0x013B,
            Tag::Rating => 0x4746,
            Tag::RatingPercent => 0x4749,
            Tag::Copyright => 0x8298,
            Tag::ExifIfdPointer => 0x8769,
            Tag::UserComment => 0x9286,
            Tag::XpTitle => 0x9C9B,
            Tag::XpComment => 0x9C9C,
            Tag::XpAuthor => 0x9C9D,
            Tag::XpKeywords => 0x9C9E,
            Tag::XpSubject => 0x9C9F,
        }
    }

    /// The type code this codec writes the tag with.
    pub const fn field_type(self) -> FieldType {
        match self {
            Tag::ImageDescription
            | Tag::Software
            | Tag::DateTime
            | Tag::Artist
            | Tag::Copyright => FieldType::Ascii,
            Tag::Rating | Tag::RatingPercent => FieldType::Short,
            Tag::ExifIfdPointer => FieldType::Long,
            Tag::UserComment => FieldType::Undefined,
            Tag::XpTitle | Tag::XpComment | Tag::XpAuthor | Tag::XpKeywords | Tag::XpSubject => {
                FieldType::Byte
            }
        }
    }

    pub const fn group(self) -> IfdGroup {
        match self {
            Tag::UserComment => IfdGroup::Exif,
            _ => IfdGroup::Zeroth,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Tag::ImageDescription => "ImageDescription",
            Tag::Software => "Software",
            Tag::DateTime => "DateTime",
            Tag::Artist => "Artist",
            Tag::Rating => "Rating",
            Tag::RatingPercent => "RatingPercent",
            Tag::Copyright => "Copyright",
            Tag::ExifIfdPointer => "ExifIFDPointer",
            Tag::UserComment => "UserComment",
            Tag::XpTitle => "XPTitle",
            Tag::XpComment => "XPComment",
            Tag::XpAuthor => "XPAuthor",
            Tag::XpKeywords => "XPKeywords",
            Tag::XpSubject => "XPSubject",
        }
    }
}

/// A tag value in the exact representation it takes on the wire.
///
/// Text variants hold already-encoded bytes so the byte order of the
/// TIFF container never affects them; only the integer variants are
/// written in the container's byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    /// Sanitized 7-bit text, written NUL-terminated.
    Ascii(String),
    /// UTF-16LE code units plus a double-zero terminator.
    Utf16Xp(Vec<u8>),
    /// `UNICODE\0` followed by big-endian UTF-16 code units.
    UnicodeComment(Vec<u8>),
    Short(u16),
    Long(u32),
}

impl TagValue {
    /// ASCII mirror of `raw`, or `None` when nothing survives sanitizing.
    pub fn ascii(raw: &str) -> Option<Self> {
        let clean = sanitize_ascii(raw);
        if clean.is_empty() {
            None
        } else {
            Some(TagValue::Ascii(clean))
        }
    }

    pub fn xp(raw: &str) -> Self {
        TagValue::Utf16Xp(encode_xp(raw))
    }

    pub fn user_comment(raw: &str) -> Self {
        TagValue::UnicodeComment(encode_user_comment(raw))
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            TagValue::Ascii(_) => FieldType::Ascii,
            TagValue::Utf16Xp(_) => FieldType::Byte,
            TagValue::UnicodeComment(_) => FieldType::Undefined,
            TagValue::Short(_) => FieldType::Short,
            TagValue::Long(_) => FieldType::Long,
        }
    }

    /// Number of values of [`Self::field_type`] (the TIFF "count").
    pub fn count(&self) -> usize {
        match self {
            TagValue::Ascii(s) => s.len() + 1,
            TagValue::Utf16Xp(b) | TagValue::UnicodeComment(b) => b.len(),
            TagValue::Short(_) | TagValue::Long(_) => 1,
        }
    }

    /// Raw value bytes; integers use `big_endian` to pick their byte order.
    pub fn to_bytes(&self, big_endian: bool) -> Vec<u8> {
        match self {
            TagValue::Ascii(s) => {
                let mut bytes = Vec::with_capacity(s.len() + 1);
                bytes.extend_from_slice(s.as_bytes());
                bytes.push(0);
                bytes
            }
            TagValue::Utf16Xp(b) | TagValue::UnicodeComment(b) => b.clone(),
            TagValue::Short(v) => {
                if big_endian { v.to_be_bytes().to_vec() } else { v.to_le_bytes().to_vec() }
            }
            TagValue::Long(v) => {
                if big_endian { v.to_be_bytes().to_vec() } else { v.to_le_bytes().to_vec() }
            }
        }
    }
}

/// Strip diacritics and anything outside printable ASCII.
///
/// Decomposes to NFD, drops combining diacritical marks (U+0300..U+036F),
/// then drops every remaining code point outside `0x20..=0x7E`. Never fails.
pub fn sanitize_ascii(raw: &str) -> String {
    raw.nfd()
        .filter(|c| !('\u{0300}'..='\u{036F}').contains(c))
        .filter(|c| (' '..='~').contains(c))
        .collect()
}

/// Encode a string as UTF-16LE bytes with a double-zero terminator (XP* tags).
pub fn encode_xp(s: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    bytes.push(0);
    bytes.push(0);
    bytes
}

/// Decode XP* tag bytes: UTF-16LE up to the first zero code unit.
///
/// A trailing odd byte is ignored. Unpaired surrogates become U+FFFD.
pub fn decode_xp(bytes: &[u8]) -> String {
    let units = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0);
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// `UNICODE\0` followed by the UTF-16 code units of `s`, each big-endian.
///
/// XP tags use little-endian; readers of this field go by the charset
/// marker, so the two orders must stay as they are.
pub fn encode_user_comment(s: &str) -> Vec<u8> {
    let mut bytes = UNICODE_PREFIX.to_vec();
    bytes.extend(s.encode_utf16().flat_map(|c| c.to_be_bytes()));
    bytes
}

/// Decode a `UserComment` value. Returns `None` for charsets other than
/// `UNICODE` and `ASCII`, and for values shorter than the charset marker.
pub fn decode_user_comment(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 8 {
        return None;
    }
    let (charset, body) = bytes.split_at(8);
    if charset == UNICODE_PREFIX {
        let units = body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .take_while(|&unit| unit != 0);
        Some(
            char::decode_utf16(units)
                .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect(),
        )
    } else if charset == ASCII_PREFIX {
        Some(decode_ascii(body))
    } else {
        None
    }
}

/// Decode an ASCII value up to its first NUL, trimming trailing spaces.
pub fn decode_ascii(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

/// Normalize a free-form keyword list: split on `,` or `;`, trim, drop
/// empties, rejoin with `"; "`.
pub fn normalize_keywords(raw: &str) -> String {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Star rating in `1..=5`.
///
/// Zero and anything above five collapse to five stars, which is also the
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rating(u8);

impl Rating {
    pub const MAX: u8 = 5;

    pub fn new(stars: u32) -> Self {
        match stars {
            1..=5 => Rating(stars as u8),
            _ => Rating(Self::MAX),
        }
    }

    /// Count the `★` glyphs in `s`.
    pub fn from_glyphs(s: &str) -> Self {
        Self::new(s.chars().filter(|&c| c == STAR).count() as u32)
    }

    /// Windows RatingPercent → stars. `0` means unrated.
    pub fn from_percent(percent: u32) -> Option<Self> {
        let stars = match percent {
            0 => return None,
            1..=12 => 1,
            13..=37 => 2,
            38..=62 => 3,
            63..=87 => 4,
            _ => 5,
        };
        Some(Rating(stars))
    }

    pub fn stars(self) -> u8 {
        self.0
    }

    pub fn percent(self) -> u16 {
        match self.0 {
            1 => 1,
            2 => 25,
            3 => 50,
            4 => 75,
            _ => 99,
        }
    }

    pub fn glyphs(self) -> String {
        STAR.to_string().repeat(self.0 as usize)
    }
}

impl Default for Rating {
    fn default() -> Self {
        Rating(Self::MAX)
    }
}

impl std::fmt::Display for Rating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.glyphs())
    }
}

impl std::str::FromStr for Rating {
    type Err = std::convert::Infallible;

    /// Accepts either star glyphs (`"★★★"`) or a plain number (`"3"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u32>() {
            Ok(n) => Ok(Rating::new(n)),
            Err(_) => Ok(Rating::from_glyphs(s)),
        }
    }
}

impl Serialize for Rating {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.glyphs())
    }
}

impl<'de> Deserialize<'de> for Rating {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Stars(u32),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Stars(n) => Rating::new(n),
            Raw::Text(s) => Rating::from_glyphs(&s),
        })
    }
}
