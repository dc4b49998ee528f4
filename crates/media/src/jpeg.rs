//! JPEG marker walking and quality estimation.
//!
//! The quality of an existing JPEG is recovered from its luminance
//! quantization table by matching it against the IJG scaling of the
//! standard table (Annex K of ITU T.81).

/// Standard luminance quantization table, natural order.
const STD_LUMA: [u16; 64] = [
    16, 11, 10, 16, 24, 40, 51, 61, //
    12, 12, 14, 19, 26, 58, 60, 55, //
    14, 13, 16, 24, 40, 57, 69, 56, //
    14, 17, 22, 29, 51, 87, 80, 62, //
    18, 22, 37, 56, 68, 109, 103, 77, //
    24, 35, 55, 64, 81, 104, 113, 92, //
    49, 64, 78, 87, 103, 121, 120, 101, //
    72, 92, 95, 98, 112, 100, 103, 99,
];

const SOI: u8 = 0xD8;
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const DQT: u8 = 0xDB;

/// Luminance table an IJG-compatible encoder emits at `quality` (1..=100).
pub fn scaled_luma_table(quality: u8) -> [u16; 64] {
    let q = u32::from(quality.clamp(1, 100));
    let scale = if q < 50 { 5000 / q } else { 200 - 2 * q };
    let mut table = [0u16; 64];
    for (out, &base) in table.iter_mut().zip(STD_LUMA.iter()) {
        let v = (u32::from(base) * scale + 50) / 100;
        *out = v.clamp(1, 255) as u16;
    }
    table
}

/// Returns the first luminance (id 0) quantization table of a JPEG.
pub fn luma_quant_table(data: &[u8]) -> Option<Vec<u16>> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != SOI {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        if marker == EOI || marker == SOS {
            return None;
        }
        let len = usize::from(u16::from_be_bytes([data[pos + 2], data[pos + 3]]));
        let end = pos + 2 + len;
        if len < 2 || end > data.len() {
            return None;
        }
        if marker == DQT
            && let Some(table) = find_luma_in_dqt(&data[pos + 4..end])
        {
            return Some(table);
        }
        pos = end;
    }
    None
}

fn find_luma_in_dqt(mut segment: &[u8]) -> Option<Vec<u16>> {
    while let Some((&pq_tq, rest)) = segment.split_first() {
        let precision16 = pq_tq >> 4 != 0;
        let id = pq_tq & 0x0F;
        let size = if precision16 { 128 } else { 64 };
        if rest.len() < size {
            return None;
        }
        let (body, tail) = rest.split_at(size);
        if id == 0 {
            let table = if precision16 {
                body.chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect()
            } else {
                body.iter().map(|&b| u16::from(b)).collect()
            };
            return Some(table);
        }
        segment = tail;
    }
    None
}

/// Estimates the quality (1..=100) a JPEG was encoded with.
///
/// Picks the highest quality whose scaled standard table is at least as
/// coarse as the image's table. Returns `None` without a luminance table.
pub fn estimate_quality(data: &[u8]) -> Option<u8> {
    let table = luma_quant_table(data)?;
    let sum: u32 = table.iter().map(|&v| u32::from(v)).sum();
    if sum == 0 {
        return None;
    }
    let mut best = 1u8;
    for q in 1..=100u8 {
        let scaled: u32 = scaled_luma_table(q).iter().map(|&v| u32::from(v)).sum();
        if scaled >= sum {
            best = q;
        }
    }
    Some(best)
}
