//! Video filters: raw console pixels to ARGB.
//!
//! A [`FilterChain`] holds one primary filter (palette decode, NTSC
//! approximation or HD tile replacement) and an optional secondary
//! [`ScaleFilter`]. The chain is rebuilt only when the selected filter type or
//! the availability of HD tile data changes.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::console::RawFrame;
use crate::error::StateFileError;
use crate::palette::{index_to_argb, raw_to_argb};
use crate::settings::{Overscan, VideoFilterType};
use crate::tiles::PixelObservation;
use crate::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Dimensions of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub original_width: u32,
    pub original_height: u32,
    pub bytes_per_pixel: u32,
}

impl FrameInfo {
    fn cropped(overscan: &Overscan, x_factor: u32, y_factor: u32) -> Self {
        FrameInfo {
            width: overscan.screen_width() * x_factor,
            height: overscan.screen_height() * y_factor,
            original_width: SCREEN_WIDTH as u32,
            original_height: SCREEN_HEIGHT as u32,
            bytes_per_pixel: 4,
        }
    }
}

/// A primary filter.
pub trait VideoFilter: Send {
    /// Decode one raw frame. `hd` is the per-pixel tile provenance when the
    /// filter uses it.
    fn apply(&mut self, frame: &RawFrame, overscan: Overscan, hd: Option<&[PixelObservation]>);
    fn output(&self) -> &[u32];
    fn frame_info(&self) -> FrameInfo;
    /// Overscan in effect for the last decoded frame.
    fn overscan(&self) -> Overscan;
}

// ─── Default ────────────────────────────────────────────────────────────────

/// Palette decode with overscan crop.
pub struct DefaultFilter {
    overscan: Overscan,
    out: Vec<u32>,
}

impl DefaultFilter {
    pub fn new() -> Self {
        DefaultFilter { overscan: Overscan::default(), out: Vec::new() }
    }
}

impl Default for DefaultFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoFilter for DefaultFilter {
    fn apply(&mut self, frame: &RawFrame, overscan: Overscan, _hd: Option<&[PixelObservation]>) {
        self.overscan = overscan;
        self.out.clear();
        let x0 = (overscan.left as usize).min(SCREEN_WIDTH);
        let x1 = x0 + overscan.screen_width() as usize;
        let y0 = (overscan.top as usize).min(SCREEN_HEIGHT);
        for y in y0..y0 + overscan.screen_height() as usize {
            let row = &frame.pixels()[y * SCREEN_WIDTH..(y + 1) * SCREEN_WIDTH];
            self.out.extend(row[x0..x1].iter().map(|&p| raw_to_argb(p)));
        }
    }

    fn output(&self) -> &[u32] {
        &self.out
    }

    fn frame_info(&self) -> FrameInfo {
        FrameInfo::cropped(&self.overscan, 1, 1)
    }

    fn overscan(&self) -> Overscan {
        self.overscan
    }
}

// ─── NTSC ───────────────────────────────────────────────────────────────────

/// Composite-video approximation: horizontal oversampling with a 3-tap
/// chroma-bandwidth blur, and darkened odd scanlines.
///
/// `divider` 1/2/4 selects full, half and quarter horizontal resolution.
pub struct NtscFilter {
    divider: u32,
    inner: DefaultFilter,
    out: Vec<u32>,
}

impl NtscFilter {
    pub fn new(divider: u32) -> Self {
        NtscFilter { divider: divider.clamp(1, 4), inner: DefaultFilter::new(), out: Vec::new() }
    }

    fn x_factor(&self) -> u32 {
        4 / self.divider
    }
}

fn blend3(a: u32, b: u32, c: u32) -> u32 {
    let ch = |v: u32, s: u32| (v >> s) & 0xFF;
    let mix = |s: u32| (ch(a, s) + 2 * ch(b, s) + ch(c, s)) / 4;
    0xFF00_0000 | mix(16) << 16 | mix(8) << 8 | mix(0)
}

fn darken(p: u32) -> u32 {
    let ch = |s: u32| ((p >> s) & 0xFF) * 3 / 4;
    0xFF00_0000 | ch(16) << 16 | ch(8) << 8 | ch(0)
}

impl VideoFilter for NtscFilter {
    fn apply(&mut self, frame: &RawFrame, overscan: Overscan, hd: Option<&[PixelObservation]>) {
        self.inner.apply(frame, overscan, hd);
        let w = overscan.screen_width() as usize;
        let h = overscan.screen_height() as usize;
        let xf = self.x_factor() as usize;
        let src = self.inner.output();

        self.out.clear();
        self.out.reserve(w * xf * h * 2);
        for y in 0..h {
            let row = &src[y * w..(y + 1) * w];
            let start = self.out.len();
            for x in 0..w {
                let left = row[x.saturating_sub(1)];
                let right = row[(x + 1).min(w - 1)];
                let px = blend3(left, row[x], right);
                for _ in 0..xf {
                    self.out.push(px);
                }
            }
            for i in 0..w * xf {
                let p = self.out[start + i];
                self.out.push(darken(p));
            }
        }
    }

    fn output(&self) -> &[u32] {
        &self.out
    }

    fn frame_info(&self) -> FrameInfo {
        FrameInfo::cropped(&self.inner.overscan, self.x_factor(), 2)
    }

    fn overscan(&self) -> Overscan {
        self.inner.overscan
    }
}

// ─── HD tiles ───────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct HdPackData {
    scale: u32,
    tiles: Vec<(u32, Vec<u32>)>,
}

const HD_MAGIC: &[u8; 4] = b"RMHD";

/// Replacement artwork keyed by tile hash.
///
/// Each replacement is `(8 * scale)²` ARGB pixels.
#[derive(Debug, Clone)]
pub struct HdPack {
    scale: u32,
    tiles: HashMap<u32, Vec<u32>>,
}

impl HdPack {
    pub fn new(scale: u32) -> Self {
        HdPack { scale: scale.max(1), tiles: HashMap::new() }
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Register a replacement. Returns false if the pixel count is wrong.
    pub fn insert(&mut self, hash: u32, pixels: Vec<u32>) -> bool {
        let side = 8 * self.scale as usize;
        if pixels.len() != side * side {
            return false;
        }
        self.tiles.insert(hash, pixels);
        true
    }

    pub fn get(&self, hash: u32) -> Option<&[u32]> {
        self.tiles.get(&hash).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), StateFileError> {
        let mut tiles: Vec<(u32, Vec<u32>)> = self.tiles.iter().map(|(k, v)| (*k, v.clone())).collect();
        tiles.sort_by_key(|(k, _)| *k);
        let payload = bincode::serialize(&HdPackData { scale: self.scale, tiles })?;
        let mut out = HD_MAGIC.to_vec();
        out.extend_from_slice(&miniz_oxide::deflate::compress_to_vec(&payload, 6));
        std::fs::write(path, out)?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self, StateFileError> {
        let data = std::fs::read(path)?;
        if data.len() < 4 {
            return Err(StateFileError::TooSmall);
        }
        if &data[0..4] != HD_MAGIC {
            return Err(StateFileError::BadMagic);
        }
        let raw = miniz_oxide::inflate::decompress_to_vec(&data[4..])
            .map_err(|e| StateFileError::Decompress(format!("{:?}", e)))?;
        let parsed: HdPackData = bincode::deserialize(&raw)?;
        let mut pack = HdPack::new(parsed.scale);
        for (hash, pixels) in parsed.tiles {
            pack.insert(hash, pixels);
        }
        debug!(tiles = pack.len(), scale = pack.scale, "Loaded HD pack");
        Ok(pack)
    }
}

/// Upscales by the pack's factor, drawing replacement artwork for tiles the
/// pack knows and plain palette colors elsewhere.
pub struct HdTileFilter {
    pack: Arc<HdPack>,
    overscan: Overscan,
    out: Vec<u32>,
}

impl HdTileFilter {
    pub fn new(pack: Arc<HdPack>) -> Self {
        HdTileFilter { pack, overscan: Overscan::default(), out: Vec::new() }
    }
}

impl VideoFilter for HdTileFilter {
    fn apply(&mut self, frame: &RawFrame, overscan: Overscan, hd: Option<&[PixelObservation]>) {
        self.overscan = overscan;
        let s = self.pack.scale() as usize;
        let w = overscan.screen_width() as usize;
        let h = overscan.screen_height() as usize;
        let out_w = w * s;
        self.out.clear();
        self.out.resize(out_w * h * s, 0);

        for y in 0..h {
            let sy = y + overscan.top as usize;
            for x in 0..w {
                let sx = x + overscan.left as usize;
                let idx = sy * SCREEN_WIDTH + sx;
                let obs = hd.and_then(|p| p.get(idx));
                let art = obs.and_then(|o| o.key).and_then(|k| self.pack.get(k.hash32()));
                let flat = raw_to_argb(frame.pixels()[idx]);
                for dy in 0..s {
                    let row = &mut self.out[(y * s + dy) * out_w + x * s..][..s];
                    match (art, obs) {
                        (Some(art), Some(o)) => {
                            let tx = (sx + o.x_scroll as usize) & 7;
                            let ty = o.y_scroll as usize & 7;
                            let src = &art[(ty * s + dy) * 8 * s + tx * s..][..s];
                            row.copy_from_slice(src);
                        }
                        _ => row.fill(flat),
                    }
                }
            }
        }
    }

    fn output(&self) -> &[u32] {
        &self.out
    }

    fn frame_info(&self) -> FrameInfo {
        let s = self.pack.scale();
        FrameInfo::cropped(&self.overscan, s, s)
    }

    fn overscan(&self) -> Overscan {
        self.overscan
    }
}

// ─── Secondary scaling ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleKind {
    /// Nearest-neighbour by an integer factor
    Prescale(u32),
    /// EPX / Scale2x edge-aware doubling
    Scale2x,
}

/// Post-filter applied to the primary filter's ARGB output.
pub struct ScaleFilter {
    kind: ScaleKind,
    out: Vec<u32>,
}

impl ScaleFilter {
    /// The scale filter for a filter type, if it is one.
    pub fn for_type(t: VideoFilterType) -> Option<Self> {
        let kind = match t {
            VideoFilterType::Prescale2x => ScaleKind::Prescale(2),
            VideoFilterType::Prescale3x => ScaleKind::Prescale(3),
            VideoFilterType::Prescale4x => ScaleKind::Prescale(4),
            VideoFilterType::Scale2x => ScaleKind::Scale2x,
            _ => return None,
        };
        Some(ScaleFilter { kind, out: Vec::new() })
    }

    pub fn factor(&self) -> u32 {
        match self.kind {
            ScaleKind::Prescale(n) => n,
            ScaleKind::Scale2x => 2,
        }
    }

    pub fn frame_info(&self, mut info: FrameInfo) -> FrameInfo {
        info.width *= self.factor();
        info.height *= self.factor();
        info
    }

    pub fn apply(&mut self, input: &[u32], width: u32, height: u32) -> &[u32] {
        let (w, h) = (width as usize, height as usize);
        let f = self.factor() as usize;
        let out_w = w * f;
        self.out.clear();
        self.out.resize(out_w * h * f, 0);

        match self.kind {
            ScaleKind::Prescale(_) => {
                for y in 0..h {
                    for x in 0..w {
                        let p = input[y * w + x];
                        for dy in 0..f {
                            self.out[(y * f + dy) * out_w + x * f..][..f].fill(p);
                        }
                    }
                }
            }
            ScaleKind::Scale2x => {
                let at = |x: usize, y: usize| input[y * w + x];
                for y in 0..h {
                    for x in 0..w {
                        let p = at(x, y);
                        let a = at(x, y.saturating_sub(1));
                        let b = at((x + 1).min(w - 1), y);
                        let c = at(x.saturating_sub(1), y);
                        let d = at(x, (y + 1).min(h - 1));
                        let (mut e0, mut e1, mut e2, mut e3) = (p, p, p, p);
                        if c == a && c != d && a != b {
                            e0 = a;
                        }
                        if a == b && a != c && b != d {
                            e1 = b;
                        }
                        if d == c && d != b && c != a {
                            e2 = c;
                        }
                        if b == d && b != a && d != c {
                            e3 = d;
                        }
                        let o = y * 2 * out_w + x * 2;
                        self.out[o] = e0;
                        self.out[o + 1] = e1;
                        self.out[o + out_w] = e2;
                        self.out[o + out_w + 1] = e3;
                    }
                }
            }
        }
        &self.out
    }
}

// ─── Chain ──────────────────────────────────────────────────────────────────

/// Primary filter plus optional scaler, rebuilt lazily.
pub struct FilterChain {
    filter_type: VideoFilterType,
    hd_enabled: bool,
    primary: Box<dyn VideoFilter>,
    scale: Option<ScaleFilter>,
    hd_pack: Option<Arc<HdPack>>,
}

impl FilterChain {
    pub fn new(filter_type: VideoFilterType, hd_pack: Option<Arc<HdPack>>) -> Self {
        let mut chain = FilterChain {
            filter_type,
            hd_enabled: false,
            primary: Box::new(DefaultFilter::new()),
            scale: None,
            hd_pack,
        };
        chain.rebuild();
        chain
    }

    fn rebuild(&mut self) {
        self.scale = None;
        self.primary = match self.filter_type {
            VideoFilterType::Ntsc => Box::new(NtscFilter::new(1)),
            VideoFilterType::NtscHalfRes => Box::new(NtscFilter::new(2)),
            VideoFilterType::NtscQuarterRes => Box::new(NtscFilter::new(4)),
            other => {
                self.scale = ScaleFilter::for_type(other);
                Box::new(DefaultFilter::new())
            }
        };
        self.hd_enabled = false;
        if let (true, Some(pack)) = (self.wants_hd(), &self.hd_pack) {
            self.primary = Box::new(HdTileFilter::new(pack.clone()));
            self.hd_enabled = true;
        }
        debug!(filter = ?self.filter_type, hd = self.hd_enabled, "Video filter rebuilt");
    }

    fn wants_hd(&self) -> bool {
        self.hd_pack.as_ref().is_some_and(|p| !p.is_empty())
    }

    /// Re-resolve the chain. Returns true if it was rebuilt.
    pub fn update(&mut self, filter_type: VideoFilterType, hd_available: bool) -> bool {
        let hd = hd_available && self.wants_hd();
        if filter_type == self.filter_type && hd == self.hd_enabled {
            return false;
        }
        self.filter_type = filter_type;
        if hd_available {
            self.rebuild();
        } else {
            let pack = self.hd_pack.take();
            self.rebuild();
            self.hd_pack = pack;
        }
        true
    }

    pub fn set_hd_pack(&mut self, pack: Option<Arc<HdPack>>) {
        self.hd_pack = pack;
        self.rebuild();
    }

    pub fn hd_enabled(&self) -> bool {
        self.hd_enabled
    }

    pub fn filter_type(&self) -> VideoFilterType {
        self.filter_type
    }

    /// Run the chain over one frame.
    pub fn decode(
        &mut self,
        frame: &RawFrame,
        overscan: Overscan,
        hd: Option<&[PixelObservation]>,
    ) -> (Vec<u32>, FrameInfo) {
        self.primary.apply(frame, overscan, if self.hd_enabled { hd } else { None });
        let info = self.primary.frame_info();
        match &mut self.scale {
            Some(scale) => {
                let out = scale.apply(self.primary.output(), info.width, info.height).to_vec();
                (out, scale.frame_info(info))
            }
            None => (self.primary.output().to_vec(), info),
        }
    }

    /// Overscan used by the last decode.
    pub fn overscan(&self) -> Overscan {
        self.primary.overscan()
    }
}

/// Decode debugger pixel data (palette indices; 0xFFFF is transparent).
pub fn debug_decode(input: &[u16], output: &mut [u32]) {
    for (o, &i) in output.iter_mut().zip(input) {
        *o = if i == 0xFFFF { 0 } else { index_to_argb((i & 0x3F) as u8) };
    }
}
