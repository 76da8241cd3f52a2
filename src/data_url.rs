//! `data:<mime>;base64,<payload>` URLs, the form in which browser hosts
//! hand images to the codec and get them back.

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// A decoded data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl DataUrl {
    /// `image/jpeg`, plus the non-standard `image/jpg` some browsers emit.
    pub fn is_jpeg(&self) -> bool {
        matches!(self.mime_type.as_str(), "image/jpeg" | "image/jpg")
    }
}

/// Parse a base64 data URL. Non-base64 (percent-encoded) URLs are rejected.
pub fn parse(url: &str) -> Result<DataUrl> {
    let rest = url.strip_prefix("data:").context("Missing data: scheme")?;
    let (header, payload) = rest.split_once(',').context("Missing ',' in data URL")?;

    let mut params = header.split(';');
    let mime_type = params.next().unwrap_or_default().trim().to_ascii_lowercase();
    if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        bail!("Only base64 data URLs are supported");
    }

    let data = STANDARD
        .decode(payload.trim())
        .context("Invalid base64 payload in data URL")?;

    Ok(DataUrl { mime_type, data })
}

pub fn format(mime_type: &str, data: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_jpeg_url() {
        let url = format("image/jpeg", &[0xFF, 0xD8, 0xFF]);
        assert_eq!(url, "data:image/jpeg;base64,/9j/");
        let parsed = parse(&url).unwrap();
        assert!(parsed.is_jpeg());
        assert_eq!(parsed.data, vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn parse_accepts_image_jpg_and_params() {
        let parsed = parse("data:IMAGE/JPG;name=a.jpg;base64,/9j/").unwrap();
        assert_eq!(parsed.mime_type, "image/jpg");
        assert!(parsed.is_jpeg());
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse("http://example.com/a.jpg").is_err());
        assert!(parse("data:image/jpeg;base64").is_err());
        assert!(parse("data:text/plain,hello").is_err());
        assert!(parse("data:image/jpeg;base64,@@@").is_err());
    }

    #[test]
    fn png_is_not_jpeg() {
        assert!(!parse(&format("image/png", b"x")).unwrap().is_jpeg());
    }
}
