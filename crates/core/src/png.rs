//! Minimal PNG encoder for screenshots and tile dumps.
//!
//! Writes 8-bit RGB images with a single zlib-compressed IDAT chunk
//! (miniz_oxide). Input pixels are ARGB `u32`s as produced by the decode
//! pipeline.

/// Encode an ARGB pixel buffer as a PNG file.
///
/// `argb` must contain `width * height` pixels in row-major order.
pub fn encode_png(width: u32, height: u32, argb: &[u32]) -> Vec<u8> {
    let mut png = Vec::with_capacity(argb.len() * 3 / 2 + 1024);

    // PNG signature
    png.extend_from_slice(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);

    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&width.to_be_bytes());
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.push(8); // bit depth
    ihdr.push(2); // color type: RGB
    ihdr.push(0); // compression
    ihdr.push(0); // filter
    ihdr.push(0); // interlace
    write_chunk(&mut png, b"IHDR", &ihdr);

    // Filter byte (0=None) + RGB pixels per row
    let row_bytes = width as usize * 3 + 1;
    let mut raw = Vec::with_capacity(row_bytes * height as usize);
    for y in 0..height as usize {
        raw.push(0);
        for x in 0..width as usize {
            let px = argb[y * width as usize + x];
            raw.push((px >> 16) as u8);
            raw.push((px >> 8) as u8);
            raw.push(px as u8);
        }
    }

    let zlib_data = miniz_oxide::deflate::compress_to_vec_zlib(&raw, 6);
    write_chunk(&mut png, b"IDAT", &zlib_data);
    write_chunk(&mut png, b"IEND", &[]);

    png
}

fn write_chunk(out: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(chunk_type);
    out.extend_from_slice(data);
    // CRC over type + data
    let crc = crc32_update(crc32_update(0xFFFF_FFFF, chunk_type), data) ^ 0xFFFF_FFFF;
    out.extend_from_slice(&crc.to_be_bytes());
}

const CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// CRC-32 (IEEE, as used by PNG/zlib and ROM identification).
pub fn crc32(data: &[u8]) -> u32 {
    crc32_update(0xFFFF_FFFF, data) ^ 0xFFFF_FFFF
}

fn crc32_update(crc: u32, data: &[u8]) -> u32 {
    data.iter()
        .fold(crc, |c, &b| CRC_TABLE[((c ^ b as u32) & 0xFF) as usize] ^ (c >> 8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_png_structure() {
        let pixels = vec![0xFF12_3456u32; 8 * 4];
        let png = encode_png(8, 4, &pixels);
        assert_eq!(&png[0..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
        assert_eq!(&png[12..16], b"IHDR");
        assert_eq!(u32::from_be_bytes([png[16], png[17], png[18], png[19]]), 8);
        assert_eq!(u32::from_be_bytes([png[20], png[21], png[22], png[23]]), 4);
        assert_eq!(&png[png.len() - 8..png.len() - 4], b"IEND");
    }

    #[test]
    fn test_png_idat_inflates_to_rows() {
        let pixels: Vec<u32> = (0..6).map(|i| 0xFF00_0000 | i).collect();
        let png = encode_png(3, 2, &pixels);
        // IDAT follows the 25-byte IHDR chunk that starts at offset 8
        let idat_len = u32::from_be_bytes([png[33], png[34], png[35], png[36]]) as usize;
        assert_eq!(&png[37..41], b"IDAT");
        let raw = miniz_oxide::inflate::decompress_to_vec_zlib(&png[41..41 + idat_len]).unwrap();
        assert_eq!(raw.len(), 2 * (3 * 3 + 1));
        assert_eq!(raw[0], 0);
        assert_eq!(&raw[1..4], &[0, 0, 0]);
        assert_eq!(&raw[4..7], &[0, 0, 1]);
    }
}
