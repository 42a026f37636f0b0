//! NES master palette and raw pixel resolution.
//!
//! Raw console pixels are 9-bit values: a 6-bit palette index in bits 0–5 and
//! the red/green/blue emphasis bits from PPUMASK in bits 6–8.

/// Palette index the console uses for solid black (used to blank the screen).
pub const BLACK_INDEX: u16 = 0x0E;

/// Emphasis bit for the red channel (bit 6 of a raw pixel)
pub const EMPHASIS_RED: u16 = 1 << 6;
/// Emphasis bit for the green channel
pub const EMPHASIS_GREEN: u16 = 1 << 7;
/// Emphasis bit for the blue channel
pub const EMPHASIS_BLUE: u16 = 1 << 8;

/// Default 2C02 palette as 0xRRGGBB.
pub const DEFAULT_PALETTE: [u32; 64] = [
    0x666666, 0x002A88, 0x1412A7, 0x3B00A4, 0x5C007E, 0x6E0040, 0x6C0600, 0x561D00,
    0x333500, 0x0B4800, 0x005200, 0x004F08, 0x00404D, 0x000000, 0x000000, 0x000000,
    0xADADAD, 0x155FD9, 0x4240FF, 0x7527FE, 0xA01ACC, 0xB71E7B, 0xB53120, 0x994E00,
    0x6B6D00, 0x388700, 0x0C9300, 0x008F32, 0x007C8D, 0x000000, 0x000000, 0x000000,
    0xFFFEFF, 0x64B0FF, 0x9290FF, 0xC676FF, 0xF36AFF, 0xFE6ECC, 0xFE8170, 0xEA9E22,
    0xBCBE00, 0x88D800, 0x5CE430, 0x45E082, 0x48CDDE, 0x4F4F4F, 0x000000, 0x000000,
    0xFFFEFF, 0xC0DFFF, 0xD3D2FF, 0xE8C8FF, 0xFBC2FF, 0xFEC4EA, 0xFECCC5, 0xF7D8A5,
    0xE4E594, 0xCFEF96, 0xBDF4AB, 0xB3F3CC, 0xB5EBF2, 0xB8B8B8, 0x000000, 0x000000,
];

/// Resolve a 6-bit palette index to opaque ARGB.
#[inline]
pub fn index_to_argb(index: u8) -> u32 {
    0xFF00_0000 | DEFAULT_PALETTE[(index & 0x3F) as usize]
}

/// Resolve a raw console pixel (palette index + emphasis) to opaque ARGB.
///
/// Emphasis darkens every channel whose own emphasis bit is clear.
pub fn raw_to_argb(pixel: u16) -> u32 {
    let rgb = DEFAULT_PALETTE[(pixel & 0x3F) as usize];
    let emphasis = pixel & (EMPHASIS_RED | EMPHASIS_GREEN | EMPHASIS_BLUE);
    if emphasis == 0 {
        return 0xFF00_0000 | rgb;
    }
    let attenuate = |value: u32, bit: u16| -> u32 {
        if emphasis & bit != 0 { value } else { value * 3 / 4 }
    };
    let r = attenuate((rgb >> 16) & 0xFF, EMPHASIS_RED);
    let g = attenuate((rgb >> 8) & 0xFF, EMPHASIS_GREEN);
    let b = attenuate(rgb & 0xFF, EMPHASIS_BLUE);
    0xFF00_0000 | (r << 16) | (g << 8) | b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_index() {
        assert_eq!(raw_to_argb(BLACK_INDEX), 0xFF00_0000);
    }

    #[test]
    fn test_index_masks_upper_bits() {
        assert_eq!(index_to_argb(0x40 | 0x21), index_to_argb(0x21));
    }

    #[test]
    fn test_emphasis_dims_other_channels() {
        let plain = raw_to_argb(0x30);
        let red = raw_to_argb(0x30 | EMPHASIS_RED);
        assert_eq!((plain >> 16) & 0xFF, (red >> 16) & 0xFF);
        assert!((red & 0xFF) < (plain & 0xFF));
        assert!(((red >> 8) & 0xFF) < ((plain >> 8) & 0xFF));
    }
}
