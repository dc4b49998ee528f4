//! MIME type detection from byte signatures.

/// A recognised file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub mime: &'static str,
    pub extension: &'static str,
}

const fn sig(mime: &'static str, extension: &'static str) -> Signature {
    Signature { mime, extension }
}

pub const JPEG: Signature = sig("image/jpeg", "jpg");
pub const HEIC: Signature = sig("image/heic", "heic");
pub const MP4: Signature = sig("video/mp4", "mp4");
pub const QUICKTIME: Signature = sig("video/quicktime", "mov");

/// Image signatures, checked in order.
const IMAGE_SIGNATURES: &[(&[u8], Signature)] = &[
    (&[0xFF, 0xD8, 0xFF], JPEG),
    (
        &[0x00, 0x00, 0x00, 0x18, 0x66, 0x74, 0x79, 0x70, 0x68, 0x65, 0x69, 0x63],
        HEIC,
    ),
    (
        &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
        sig("image/png", "png"),
    ),
    (b"GIF87a", sig("image/gif", "gif")),
    (b"GIF89a", sig("image/gif", "gif")),
    (&[0x42, 0x4D], sig("image/x-ms-bmp", "bmp")),
    (&[0x38, 0x42, 0x50, 0x53], sig("image/vnd.adobe.photoshop", "psd")),
    (&[0x46, 0x4F, 0x52, 0x4D], sig("image/iff", "iff")),
    (&[0x52, 0x49, 0x46, 0x46], sig("image/webp", "webp")),
    (&[0x00, 0x00, 0x01, 0x00], sig("image/x-icon", "ico")),
    (&[0x00, 0x00, 0x02, 0x00], sig("image/x-icon", "cur")),
    (&[0x49, 0x49, 0x2A, 0x00], sig("image/tiff", "tif")),
    (&[0x4D, 0x4D, 0x00, 0x2A], sig("image/tiff", "tif")),
    (
        &[0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A],
        sig("image/jp2", "jp2"),
    ),
];

/// Identifies `data` by its leading bytes.
pub fn sniff(data: &[u8]) -> Option<Signature> {
    IMAGE_SIGNATURES
        .iter()
        .find(|(magic, _)| data.starts_with(magic))
        .map(|(_, signature)| *signature)
        .or_else(|| sniff_ftyp(data))
}

/// ISO base media files: `[size:4]["ftyp"][brand:4]`.
fn sniff_ftyp(data: &[u8]) -> Option<Signature> {
    if data.len() < 12 || &data[4..8] != b"ftyp" {
        return None;
    }
    match &data[8..12] {
        b"heic" | b"heix" | b"mif1" | b"msf1" => Some(HEIC),
        b"qt  " => Some(QUICKTIME),
        b"isom" | b"iso2" | b"iso4" | b"iso5" | b"iso6" | b"mp41" | b"mp42" | b"avc1"
        | b"M4V " | b"M4VH" | b"M4VP" | b"MSNV" | b"f4v " | b"dash" => Some(MP4),
        _ => None,
    }
}

/// True if `mime` is in `allow_list` (case-insensitive).
pub fn is_allowed(mime: &str, allow_list: &[String]) -> bool {
    allow_list.iter().any(|m| m.eq_ignore_ascii_case(mime))
}
