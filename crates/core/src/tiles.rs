//! Tile and sprite instrumentation.
//!
//! Every pixel the PPU draws is attributed to the 8×8 tile (and, if one won
//! priority, the sprite) it came from. Tiles are canonicalized into a
//! [`TileKey`] so that the same artwork drawn mirrored, or fetched from a
//! different CHR address, collides into one catalog entry.
//!
//! ## Canonical bitmap layout
//!
//! ```text
//! 16 bytes, 2 per row, row 0 first.
//! byte 2r   = pixels 0..3 of row r (pixel 0 in bits 7-6)
//! byte 2r+1 = pixels 4..7 of row r (pixel 4 in bits 7-6)
//! ```
//!
//! CHR memory stores tiles as two bit planes; [`pack_chr_planes`] converts.

use hashbrown::HashMap;
use tracing::trace;

use crate::console::{ChrReader, PixelFetch, PpuObserver, TileFetch};
use crate::palette::index_to_argb;
use crate::settings::Overscan;
use crate::PIXEL_COUNT;

/// A packed 2-bpp 8×8 tile bitmap.
pub type TileBitmap = [u8; 16];

/// Palette slot value marking a transparent color (sprite color 0).
pub const TRANSPARENT: u8 = 0xFF;

bitflags::bitflags! {
    /// Mirroring and priority attributes of one tile fetch.
    ///
    /// Bit positions match the flags byte of the sprite list on the wire.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TileFlags: u8 {
        /// Sprite behind background / background tile under such a sprite
        const BACKGROUND_PRIORITY = 0b0000_0001;
        const V_MIRROR = 0b0000_0010;
        const H_MIRROR = 0b0000_0100;
    }
}

// ─── Bitmap transforms ──────────────────────────────────────────────────────

/// Convert a CHR tile (8 low-plane bytes then 8 high-plane bytes) to the
/// canonical packed layout.
pub fn pack_chr_planes(chr: &[u8; 16]) -> TileBitmap {
    let mut out = [0u8; 16];
    for row in 0..8 {
        let lo = chr[row];
        let hi = chr[row + 8];
        for px in 0..8 {
            let bit = 7 - px;
            let color = ((lo >> bit) & 1) | (((hi >> bit) & 1) << 1);
            out[row * 2 + px / 4] |= color << (6 - 2 * (px % 4));
        }
    }
    out
}

/// Fetch a tile's 16 CHR bytes and pack them.
pub fn read_tile(chr: &dyn ChrReader, chr_addr: u32) -> TileBitmap {
    let base = chr_addr & !0x0F;
    let mut raw = [0u8; 16];
    for (i, b) in raw.iter_mut().enumerate() {
        *b = chr.read_chr(base + i as u32);
    }
    pack_chr_planes(&raw)
}

/// Color index (0–3) of pixel (x, y) in a packed bitmap.
#[inline]
pub fn pixel_at(bitmap: &TileBitmap, x: usize, y: usize) -> u8 {
    (bitmap[y * 2 + x / 4] >> (6 - 2 * (x % 4))) & 0x03
}

#[inline]
fn reverse_pairs(b: u8) -> u8 {
    ((b & 0x03) << 6) | ((b & 0x0C) << 2) | ((b & 0x30) >> 2) | ((b & 0xC0) >> 6)
}

/// Flip a bitmap left-to-right.
///
/// Each row's two bytes swap places and the 2-bit pairs inside each byte are
/// reversed.
pub fn mirror_horizontal(bitmap: &mut TileBitmap) {
    for row in bitmap.chunks_exact_mut(2) {
        let (b1, b2) = (row[0], row[1]);
        row[0] = reverse_pairs(b2);
        row[1] = reverse_pairs(b1);
    }
}

/// Flip a bitmap top-to-bottom (row i swaps with row 7 - i).
pub fn mirror_vertical(bitmap: &mut TileBitmap) {
    for i in 0..4 {
        let a = i * 2;
        let b = (7 - i) * 2;
        bitmap.swap(a, b);
        bitmap.swap(a + 1, b + 1);
    }
}

/// Apply the mirroring in `flags`, producing the bitmap as it appears on screen.
pub fn normalize(mut bitmap: TileBitmap, flags: TileFlags) -> TileBitmap {
    if flags.contains(TileFlags::H_MIRROR) {
        mirror_horizontal(&mut bitmap);
    }
    if flags.contains(TileFlags::V_MIRROR) {
        mirror_vertical(&mut bitmap);
    }
    bitmap
}

// ─── Keys and sets ──────────────────────────────────────────────────────────

/// Canonical identity of one on-screen 8×8 tile.
///
/// Equality is structural over the mirroring-normalized bitmap, the four
/// palette entries and the priority flag. The 32-bit hash is derived from
/// the same bytes and cached at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileKey {
    bitmap: TileBitmap,
    palette: [u8; 4],
    background_priority: bool,
    hash: u32,
}

impl TileKey {
    /// Build a key from an already-normalized bitmap.
    pub fn new(bitmap: TileBitmap, palette: [u8; 4], background_priority: bool) -> Self {
        let mut bytes = [0u8; 21];
        bytes[..16].copy_from_slice(&bitmap);
        bytes[16..20].copy_from_slice(&palette);
        bytes[20] = background_priority as u8;
        let hash = xxhash_rust::xxh3::xxh3_64(&bytes) as u32;
        TileKey { bitmap, palette, background_priority, hash }
    }

    /// Build a key from a raw fetch, consuming its mirroring flags.
    pub fn from_fetch(raw: TileBitmap, tile: &TileFetch) -> Self {
        TileKey::new(
            normalize(raw, tile.flags),
            tile.palette,
            tile.flags.contains(TileFlags::BACKGROUND_PRIORITY),
        )
    }

    pub fn bitmap(&self) -> &TileBitmap {
        &self.bitmap
    }

    pub fn palette(&self) -> [u8; 4] {
        self.palette
    }

    pub fn background_priority(&self) -> bool {
        self.background_priority
    }

    #[inline]
    pub fn hash32(&self) -> u32 {
        self.hash
    }

    /// Palette packed as `c3 | c2 << 8 | c1 << 16 | c0 << 24`.
    pub fn packed_palette(&self) -> u32 {
        let [c0, c1, c2, c3] = self.palette;
        c3 as u32 | (c2 as u32) << 8 | (c1 as u32) << 16 | (c0 as u32) << 24
    }

    /// Resolve the tile to 64 ARGB pixels; transparent slots become 0.
    pub fn argb_pixels(&self) -> [u32; 64] {
        let mut out = [0u32; 64];
        for y in 0..8 {
            for x in 0..8 {
                let slot = self.palette[pixel_at(&self.bitmap, x, y) as usize];
                out[y * 8 + x] = if slot == TRANSPARENT { 0 } else { index_to_argb(slot) };
            }
        }
        out
    }
}

impl std::hash::Hash for TileKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

/// One catalog entry: the key plus the tile number from its first sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileEntry {
    pub key: TileKey,
    pub tile_index: u32,
}

/// Append-only, content-addressed set of tiles.
///
/// Tracks separately which entries were added since the last
/// [`TileSet::reset_new`]; resetting never touches the persistent set.
#[derive(Debug, Default, Clone)]
pub struct TileSet {
    entries: Vec<TileEntry>,
    index: HashMap<TileKey, usize>,
    fresh: Vec<usize>,
}

impl TileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a key. Returns true if it was not present before.
    pub fn insert(&mut self, key: TileKey, tile_index: u32) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        let slot = self.entries.len();
        self.entries.push(TileEntry { key, tile_index });
        self.index.insert(key, slot);
        self.fresh.push(slot);
        true
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TileEntry> {
        self.entries.iter()
    }

    /// Entries inserted since the last reset, in insertion order.
    pub fn new_entries(&self) -> impl Iterator<Item = &TileEntry> {
        self.fresh.iter().map(|&i| &self.entries[i])
    }

    pub fn new_len(&self) -> usize {
        self.fresh.len()
    }

    pub fn reset_new(&mut self) {
        self.fresh.clear();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.fresh.clear();
    }
}

// ─── Per-frame observations ─────────────────────────────────────────────────

/// A sprite instance visible in the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpriteObservation {
    pub key: TileKey,
    /// Mirroring/priority as drawn
    pub flags: TileFlags,
    pub x: u8,
    pub y: u8,
}

/// Background provenance of one screen pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PixelObservation {
    /// `None` when no background tile was drawn (or it lay in the overscan)
    pub key: Option<TileKey>,
    /// Fine horizontal scroll
    pub x_scroll: u8,
    /// Row within the tile
    pub y_scroll: u8,
}

impl PixelObservation {
    /// Hash reported on the wire; 0 for "no tile".
    pub fn hash32(&self) -> u32 {
        self.key.map_or(0, |k| k.hash32())
    }
}

/// Where a fetched tile is going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Background,
    /// Sprite with its on-screen origin
    Sprite { x: u8, y: u8 },
}

// ─── Catalog ────────────────────────────────────────────────────────────────

/// Deduplicating catalog of everything drawn, plus per-frame buffers.
pub struct TileCatalog {
    overscan: Overscan,
    tiles: TileSet,
    sprite_tiles: TileSet,
    pixels: Box<[PixelObservation]>,
    sprites: Vec<SpriteObservation>,
    sprite_capacity: usize,
    dropped_sprites: usize,
}

impl TileCatalog {
    pub fn new(overscan: Overscan, sprite_capacity: usize) -> Self {
        TileCatalog {
            overscan,
            tiles: TileSet::new(),
            sprite_tiles: TileSet::new(),
            pixels: vec![PixelObservation::default(); PIXEL_COUNT].into_boxed_slice(),
            sprites: Vec::with_capacity(sprite_capacity),
            sprite_capacity,
            dropped_sprites: 0,
        }
    }

    pub fn set_overscan(&mut self, overscan: Overscan) {
        self.overscan = overscan;
    }

    /// Record one tile fetch for screen pixel (x, y).
    ///
    /// `raw` is the packed bitmap as stored in CHR memory; mirroring is
    /// applied here.
    pub fn process_tile(&mut self, x: u32, y: u32, raw: TileBitmap, tile: &TileFetch, kind: TileKind) {
        if self.overscan.contains(x, y) {
            return;
        }
        let key = TileKey::from_fetch(raw, tile);

        match kind {
            TileKind::Background => {
                self.pixels[y as usize * crate::SCREEN_WIDTH + x as usize] = PixelObservation {
                    key: Some(key),
                    x_scroll: tile.fine_x,
                    y_scroll: tile.row,
                };
                if self.tiles.insert(key, tile.tile_index) {
                    trace!(hash = key.hash32(), index = tile.tile_index, "New background tile");
                }
            }
            TileKind::Sprite { x: sx, y: sy } => {
                self.record_sprite(SpriteObservation { key, flags: tile.flags, x: sx, y: sy });
                if self.sprite_tiles.insert(key, tile.tile_index) {
                    trace!(hash = key.hash32(), index = tile.tile_index, "New sprite tile");
                }
            }
        }
    }

    fn record_sprite(&mut self, obs: SpriteObservation) {
        // The same sprite is visited once per covered pixel
        let seen = self
            .sprites
            .iter()
            .any(|s| s.key == obs.key && s.x == obs.x && s.y == obs.y);
        if seen {
            return;
        }
        if self.sprites.len() >= self.sprite_capacity {
            self.dropped_sprites += 1;
            return;
        }
        self.sprites.push(obs);
    }

    /// Clear the per-frame buffers. Called at the start of each draw pass.
    pub fn begin_frame(&mut self) {
        self.pixels.fill(PixelObservation::default());
        self.sprites.clear();
        if self.dropped_sprites > 0 {
            trace!(dropped = self.dropped_sprites, "Sprite buffer overflowed last frame");
        }
        self.dropped_sprites = 0;
    }

    pub fn reset_new_tiles(&mut self) {
        self.tiles.reset_new();
    }

    pub fn reset_new_sprite_tiles(&mut self) {
        self.sprite_tiles.reset_new();
    }

    /// Forget everything, including the persistent sets.
    pub fn clear(&mut self) {
        self.tiles.clear();
        self.sprite_tiles.clear();
        self.begin_frame();
    }

    pub fn tiles(&self) -> &TileSet {
        &self.tiles
    }

    pub fn sprite_tiles(&self) -> &TileSet {
        &self.sprite_tiles
    }

    /// Per-pixel provenance of the last frame, row-major.
    pub fn pixels(&self) -> &[PixelObservation] {
        &self.pixels
    }

    /// Sprites seen in the last frame, in first-seen order.
    pub fn sprites(&self) -> &[SpriteObservation] {
        &self.sprites
    }

    pub fn sprite_capacity(&self) -> usize {
        self.sprite_capacity
    }
}

impl PpuObserver for TileCatalog {
    fn begin_frame(&mut self) {
        TileCatalog::begin_frame(self);
    }

    fn on_pixel(&mut self, fetch: &PixelFetch, chr: &dyn ChrReader) {
        if let Some(sprite) = &fetch.sprite {
            let raw = read_tile(chr, sprite.tile.chr_addr);
            self.process_tile(fetch.x, fetch.y, raw, &sprite.tile, TileKind::Sprite { x: sprite.x, y: sprite.y });
        }
        if let Some(bg) = &fetch.background {
            let raw = read_tile(chr, bg.chr_addr);
            self.process_tile(fetch.x, fetch.y, raw, bg, TileKind::Background);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg32;

    fn fetch(flags: TileFlags) -> TileFetch {
        TileFetch {
            chr_addr: 0x10,
            tile_index: 1,
            palette: [0x0F, 0x16, 0x27, 0x30],
            flags,
            fine_x: 3,
            row: 5,
        }
    }

    fn arrow() -> TileBitmap {
        // Asymmetric in both axes
        let mut chr = [0u8; 16];
        chr[0] = 0b1100_0000;
        chr[1] = 0b0110_0000;
        chr[8] = 0b1000_0001;
        chr[15] = 0b0000_0011;
        pack_chr_planes(&chr)
    }

    #[test]
    fn test_pack_chr_planes() {
        let mut chr = [0u8; 16];
        chr[0] = 0b1000_0001; // low plane row 0
        chr[8] = 0b1100_0000; // high plane row 0
        let packed = pack_chr_planes(&chr);
        assert_eq!(pixel_at(&packed, 0, 0), 3);
        assert_eq!(pixel_at(&packed, 1, 0), 2);
        assert_eq!(pixel_at(&packed, 7, 0), 1);
        assert_eq!(pixel_at(&packed, 3, 0), 0);
        assert_eq!(&packed[2..], &[0u8; 14]);
    }

    #[test]
    fn test_horizontal_mirror_moves_pixels() {
        let src = arrow();
        let mut m = src;
        mirror_horizontal(&mut m);
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(pixel_at(&m, x, y), pixel_at(&src, 7 - x, y));
            }
        }
    }

    #[test]
    fn test_vertical_mirror_moves_pixels() {
        let src = arrow();
        let mut m = src;
        mirror_vertical(&mut m);
        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(pixel_at(&m, x, y), pixel_at(&src, x, 7 - y));
            }
        }
    }

    #[test]
    fn test_mirrors_are_involutions() {
        let mut rng = Pcg32::seed_from_u64(7);
        for _ in 0..1000 {
            let mut b: TileBitmap = rng.random();
            let orig = b;
            mirror_horizontal(&mut b);
            mirror_horizontal(&mut b);
            assert_eq!(b, orig);
            mirror_vertical(&mut b);
            mirror_vertical(&mut b);
            assert_eq!(b, orig);
        }
    }

    #[test]
    fn test_mirrored_fetch_collides_with_plain_tile() {
        let src = arrow();
        let mut flipped = src;
        mirror_horizontal(&mut flipped);
        mirror_vertical(&mut flipped);

        let a = TileKey::from_fetch(src, &fetch(TileFlags::H_MIRROR | TileFlags::V_MIRROR));
        let b = TileKey::from_fetch(flipped, &fetch(TileFlags::empty()));
        assert_eq!(a, b);
        assert_eq!(a.hash32(), b.hash32());
    }

    #[test]
    fn test_key_depends_on_palette_and_priority() {
        let b = arrow();
        let base = TileKey::new(b, [1, 2, 3, 4], false);
        assert_ne!(base, TileKey::new(b, [1, 2, 3, 5], false));
        assert_ne!(base, TileKey::new(b, [1, 2, 3, 4], true));
        assert_eq!(base.packed_palette(), 0x0102_0304);
    }

    #[test]
    fn test_address_is_not_identity() {
        let mut cat = TileCatalog::new(Overscan::default(), 8);
        let mut f1 = fetch(TileFlags::empty());
        let mut f2 = f1;
        f1.tile_index = 1;
        f2.tile_index = 99;
        cat.process_tile(10, 10, arrow(), &f1, TileKind::Background);
        cat.process_tile(20, 10, arrow(), &f2, TileKind::Background);
        assert_eq!(cat.tiles().len(), 1);
        assert_eq!(cat.tiles().iter().next().unwrap().tile_index, 1);
    }

    #[test]
    fn test_new_tiles_reset_keeps_set() {
        let mut cat = TileCatalog::new(Overscan::default(), 8);
        cat.process_tile(0, 0, arrow(), &fetch(TileFlags::empty()), TileKind::Background);
        assert_eq!(cat.tiles().new_len(), 1);
        cat.reset_new_tiles();
        assert_eq!(cat.tiles().new_len(), 0);
        assert_eq!(cat.tiles().len(), 1);

        // Re-seeing a known tile does not make it new again
        cat.process_tile(1, 0, arrow(), &fetch(TileFlags::empty()), TileKind::Background);
        assert_eq!(cat.tiles().new_len(), 0);
        // Sprite sets are independent
        assert!(cat.sprite_tiles().is_empty());
    }

    #[test]
    fn test_overscan_excluded() {
        let overscan = Overscan { top: 8, bottom: 8, left: 0, right: 0 };
        let mut cat = TileCatalog::new(overscan, 8);
        cat.process_tile(50, 3, arrow(), &fetch(TileFlags::empty()), TileKind::Background);
        cat.process_tile(50, 3, arrow(), &fetch(TileFlags::empty()), TileKind::Sprite { x: 50, y: 0 });
        assert!(cat.tiles().is_empty());
        assert!(cat.sprite_tiles().is_empty());
        assert!(cat.sprites().is_empty());
        assert!(cat.pixels()[3 * 256 + 50].key.is_none());

        cat.process_tile(50, 8, arrow(), &fetch(TileFlags::empty()), TileKind::Background);
        let px = cat.pixels()[8 * 256 + 50];
        assert!(px.key.is_some());
        assert_eq!((px.x_scroll, px.y_scroll), (3, 5));
    }

    #[test]
    fn test_sprite_intra_frame_dedup() {
        let mut cat = TileCatalog::new(Overscan::default(), 8);
        let f = fetch(TileFlags::H_MIRROR);
        for px in 0..8 {
            cat.process_tile(40 + px, 60, arrow(), &f, TileKind::Sprite { x: 40, y: 60 });
        }
        assert_eq!(cat.sprites().len(), 1);
        assert_eq!(cat.sprites()[0].flags, TileFlags::H_MIRROR);

        cat.process_tile(80, 60, arrow(), &f, TileKind::Sprite { x: 80, y: 60 });
        assert_eq!(cat.sprites().len(), 2);
        assert_eq!(cat.sprite_tiles().len(), 1);

        cat.begin_frame();
        assert!(cat.sprites().is_empty());
        assert_eq!(cat.sprite_tiles().len(), 1);
    }

    #[test]
    fn test_sprite_capacity_is_hard_bound() {
        let mut cat = TileCatalog::new(Overscan::default(), 4);
        for i in 0..10u8 {
            cat.process_tile(i as u32 * 9, 0, arrow(), &fetch(TileFlags::empty()), TileKind::Sprite { x: i * 9, y: 0 });
        }
        assert_eq!(cat.sprites().len(), 4);
    }

    #[test]
    fn test_argb_pixels_transparency() {
        let mut chr = [0u8; 16];
        chr[0] = 0x80;
        let key = TileKey::new(pack_chr_planes(&chr), [TRANSPARENT, 0x30, 0x16, 0x27], false);
        let px = key.argb_pixels();
        assert_eq!(px[0], index_to_argb(0x30));
        assert_eq!(px[1], 0);
    }

    #[test]
    fn test_observer_reads_chr() {
        let mut cat = TileCatalog::new(Overscan::default(), 8);
        let chr = |addr: u32| if addr == 0x10 { 0xFF } else { 0 };
        let pixel = PixelFetch { x: 5, y: 5, background: Some(fetch(TileFlags::empty())), sprite: None };
        PpuObserver::begin_frame(&mut cat);
        cat.on_pixel(&pixel, &chr);
        let entry = cat.tiles().iter().next().unwrap();
        assert_eq!(pixel_at(entry.key.bitmap(), 0, 0), 1);
        assert_eq!(pixel_at(entry.key.bitmap(), 0, 1), 0);
    }

    #[test]
    fn test_structural_dedup_random() {
        // Small alphabet so collisions actually happen
        let mut rng = Pcg32::seed_from_u64(0x5EED);
        let shapes: Vec<TileBitmap> = (0..6).map(|_| rng.random()).collect();
        let palettes = [[0x0F, 1, 2, 3], [0x0F, 4, 5, 6], [TRANSPARENT, 1, 2, 3]];

        let mut set = TileSet::new();
        let mut reference: Vec<TileKey> = Vec::new();
        for i in 0..1000u32 {
            let raw = shapes[rng.random_range(0..shapes.len())];
            let flags = TileFlags::from_bits_truncate(rng.random_range(0..8u8));
            let palette = palettes[rng.random_range(0..palettes.len())];
            let tile = TileFetch { chr_addr: 0, tile_index: i, palette, flags, fine_x: 0, row: 0 };
            let key = TileKey::from_fetch(raw, &tile);

            let inserted = set.insert(key, i);
            assert_eq!(inserted, !reference.contains(&key));
            if inserted {
                reference.push(key);
            }
        }
        assert_eq!(set.len(), reference.len());
        let entries: Vec<_> = set.iter().collect();
        for (i, a) in entries.iter().enumerate() {
            for b in &entries[i + 1..] {
                assert_ne!(a.key, b.key);
            }
        }
    }
}
