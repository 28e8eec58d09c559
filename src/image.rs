//! Header-only image inspection.
//!
//! Classifies image bytes by magic and reads just enough of the header to
//! recover the pixel dimensions, without decoding. Full decode and re-encode
//! belong to the external codec collaborator.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::fmt;

/// Image file format recognized by magic bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Format {
    /// JFIF/JPEG.
    Jpeg,
    /// PNG.
    Png,
    /// Windows bitmap.
    Bmp,
    /// GIF 87a/89a.
    Gif,
}

impl Format {
    /// The canonical MIME token for this format.
    pub fn mime_type(self) -> &'static str {
        match self {
            Format::Jpeg => "image/jpeg",
            Format::Png => "image/png",
            Format::Bmp => "image/bmp",
            Format::Gif => "image/gif",
        }
    }

    /// Maps a MIME token onto a format, when recognized.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(Format::Jpeg),
            "image/png" => Some(Format::Png),
            "image/bmp" => Some(Format::Bmp),
            "image/gif" => Some(Format::Gif),
            _ => None,
        }
    }
}

/// Parsed image header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HeaderInfo {
    /// Real format as indicated by the header bytes.
    pub format: Format,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
}

/// Image header parsing error.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Bytes match none of the recognized magics.
    Unrecognized,
    /// The header ends before the dimension fields.
    Truncated,
    /// Structurally invalid header.
    Malformed(&'static str),
    /// A declared width or height of zero.
    ZeroSize,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Unrecognized => f.write_str("unrecognized image format"),
            Error::Truncated => f.write_str("truncated image header"),
            Error::Malformed(what) => write!(f, "malformed image header: {}", what),
            Error::ZeroSize => f.write_str("image has zero width or height"),
        }
    }
}

impl std::error::Error for Error {}

const PNG_MAGIC: [u8; 8] = [137, b'P', b'N', b'G', 13, 10, 26, 10];

/// Classifies image bytes by magic.
pub fn classify(data: &[u8]) -> Option<Format> {
    if data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8 {
        Some(Format::Jpeg)
    } else if data.len() >= PNG_MAGIC.len() && data[..PNG_MAGIC.len()] == PNG_MAGIC {
        Some(Format::Png)
    } else if data.len() >= 2 && &data[..2] == b"BM" {
        Some(Format::Bmp)
    } else if data.len() >= 6 && (&data[..6] == b"GIF87a" || &data[..6] == b"GIF89a") {
        Some(Format::Gif)
    } else {
        None
    }
}

/// Classifies the bytes and reads (width, height) from the header.
pub fn parse_header(data: &[u8]) -> Result<HeaderInfo, Error> {
    let format = classify(data).ok_or(Error::Unrecognized)?;
    let (width, height) = match format {
        Format::Jpeg => parse_jpeg(data)?,
        Format::Png => parse_png(data)?,
        Format::Bmp => parse_bmp(data)?,
        Format::Gif => parse_gif(data)?,
    };
    if width == 0 || height == 0 {
        return Err(Error::ZeroSize);
    }
    Ok(HeaderInfo {
        format,
        width,
        height,
    })
}

// Walk marker segments until SOF0..SOF2, whose payload carries the
// dimensions.
fn parse_jpeg(data: &[u8]) -> Result<(u32, u32), Error> {
    const SOF_MIN: u8 = 0xC0;
    const SOF_MAX: u8 = 0xC2;
    let mut pos = 2; // past SOI
    loop {
        // One or more 0xFF padding bytes precede each marker code.
        if pos >= data.len() {
            return Err(Error::Truncated);
        }
        if data[pos] != 0xFF {
            return Err(Error::Malformed("expected marker padding"));
        }
        while pos < data.len() && data[pos] == 0xFF {
            pos += 1;
        }
        if pos >= data.len() {
            return Err(Error::Truncated);
        }
        let marker = data[pos];
        pos += 1;
        if (SOF_MIN..=SOF_MAX).contains(&marker) {
            // SOF: u16 len, u8 bits, u16 height, u16 width, u8 components.
            if pos + 8 > data.len() {
                return Err(Error::Truncated);
            }
            let sof_len = BigEndian::read_u16(&data[pos..]);
            if sof_len < 11 {
                return Err(Error::Malformed("SOF segment too short"));
            }
            let bits = data[pos + 2];
            if bits != 8 {
                return Err(Error::Malformed("unsupported sample precision"));
            }
            let height = BigEndian::read_u16(&data[pos + 3..]) as u32;
            let width = BigEndian::read_u16(&data[pos + 5..]) as u32;
            let components = data[pos + 7];
            if components != 1 && components != 3 && components != 4 {
                return Err(Error::Malformed("unsupported component count"));
            }
            return Ok((width, height));
        }
        // Skip this segment.
        if pos + 2 > data.len() {
            return Err(Error::Truncated);
        }
        let seg_len = BigEndian::read_u16(&data[pos..]) as usize;
        if seg_len < 2 {
            return Err(Error::Malformed("segment length underflow"));
        }
        pos += seg_len;
    }
}

// The first chunk must be IHDR: u32 width, u32 height, big-endian.
fn parse_png(data: &[u8]) -> Result<(u32, u32), Error> {
    const IHDR_OFFSET: usize = 8 + 8;
    if data.len() < IHDR_OFFSET + 8 {
        return Err(Error::Truncated);
    }
    let chunk_len = BigEndian::read_u32(&data[8..]);
    let chunk_type = &data[12..16];
    if chunk_type != b"IHDR" {
        return Err(Error::Malformed("first chunk is not IHDR"));
    }
    if chunk_len != 13 {
        return Err(Error::Malformed("bad IHDR length"));
    }
    let width = BigEndian::read_u32(&data[IHDR_OFFSET..]);
    let height = BigEndian::read_u32(&data[IHDR_OFFSET + 4..]);
    const DIM_MAX: u32 = 1 << 24;
    if width > DIM_MAX || height > DIM_MAX {
        return Err(Error::Malformed("implausible dimensions"));
    }
    Ok((width, height))
}

// BITMAPINFOHEADER follows the 14-byte file header: u32 size, i32 width,
// i32 height (negative means top-down).
fn parse_bmp(data: &[u8]) -> Result<(u32, u32), Error> {
    const INFO_OFFSET: usize = 14;
    if data.len() < INFO_OFFSET + 12 {
        return Err(Error::Truncated);
    }
    let info_size = LittleEndian::read_u32(&data[INFO_OFFSET..]);
    if info_size < 12 {
        return Err(Error::Malformed("bad info header size"));
    }
    let width = LittleEndian::read_i32(&data[INFO_OFFSET + 4..]);
    let height = LittleEndian::read_i32(&data[INFO_OFFSET + 8..]);
    Ok((width.unsigned_abs(), height.unsigned_abs()))
}

// Logical screen descriptor: u16 width, u16 height, little-endian.
fn parse_gif(data: &[u8]) -> Result<(u32, u32), Error> {
    if data.len() < 10 {
        return Err(Error::Truncated);
    }
    let width = LittleEndian::read_u16(&data[6..]) as u32;
    let height = LittleEndian::read_u16(&data[8..]) as u32;
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_magics() {
        assert_eq!(classify(&[0xFF, 0xD8, 0xFF]), Some(Format::Jpeg));
        assert_eq!(classify(&PNG_MAGIC), Some(Format::Png));
        assert_eq!(classify(b"BM1234"), Some(Format::Bmp));
        assert_eq!(classify(b"GIF89a\x01\x00\x01\x00"), Some(Format::Gif));
        assert_eq!(classify(b"nonsense"), None);
    }

    #[test]
    fn parses_png_dimensions() {
        let mut data = PNG_MAGIC.to_vec();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&64u32.to_be_bytes());
        data.extend_from_slice(&32u32.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        let info = parse_header(&data).unwrap();
        assert_eq!(info.format, Format::Png);
        assert_eq!((info.width, info.height), (64, 32));
    }

    #[test]
    fn parses_jpeg_sof() {
        // SOI, APP0 (len 4), SOF0 with 8 bits, 16x8, 3 components.
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 8, 0x00, 0x08, 0x00, 0x10, 3]);
        let info = parse_header(&data).unwrap();
        assert_eq!(info.format, Format::Jpeg);
        assert_eq!((info.width, info.height), (16, 8));
    }

    #[test]
    fn parses_gif_screen() {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&200u16.to_le_bytes());
        data.extend_from_slice(&100u16.to_le_bytes());
        let info = parse_header(&data).unwrap();
        assert_eq!((info.width, info.height), (200, 100));
    }

    #[test]
    fn parses_bmp_info_header() {
        let mut data = b"BM".to_vec();
        data.extend_from_slice(&[0; 12]);
        data.extend_from_slice(&40u32.to_le_bytes());
        data.extend_from_slice(&320i32.to_le_bytes());
        data.extend_from_slice(&(-240i32).to_le_bytes());
        let info = parse_header(&data).unwrap();
        assert_eq!((info.width, info.height), (320, 240));
    }

    #[test]
    fn rejects_zero_size() {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&100u16.to_le_bytes());
        assert_eq!(parse_header(&data), Err(Error::ZeroSize));
    }
}
