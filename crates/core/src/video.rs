//! Frame decode pipeline.
//!
//! Turns the console's raw output into ARGB frames, either synchronously on
//! the emulation thread or on one background decode thread.
//!
//! ## Threaded handshake
//!
//! ```text
//! emulation thread                      decode thread
//! ----------------                      -------------
//! wait while frame_changed              wait until frame_changed or stop
//! copy raw frame into slot              take raw frame out of slot
//! frame_changed = true, notify  ──▶     decode (lock released)
//!                                       send DecodedFrame on channel
//!                               ◀──     return buffer, frame_changed = false, notify
//! ```
//!
//! Frame N+1 is never published before frame N finished decoding, and the
//! consumer never sees a half-written buffer. Decoded frames come back over
//! a channel and are forwarded downstream by [`FramePipeline::drain_decoded`]
//! on the emulation thread, so everything after the decoder stays
//! single-threaded.

use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::console::RawFrame;
use crate::filters::{FilterChain, FrameInfo, HdPack};
use crate::palette::BLACK_INDEX;
use crate::png::encode_png;
use crate::settings::{EmulationSettings, Overscan, VideoFilterType};
use crate::tiles::PixelObservation;

/// Output size as presented to a renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
    pub scale: f64,
}

/// Compute the display size for an overscan, scale and aspect ratio
/// (0.0 = no aspect correction).
pub fn compute_screen_size(overscan: &Overscan, scale: f64, aspect_ratio: f64) -> ScreenSize {
    let w = overscan.screen_width() as f64;
    let h = overscan.screen_height() as f64;
    let mut width = (w * scale) as u32;
    if aspect_ratio != 0.0 {
        width = (crate::SCREEN_HEIGHT as f64 * scale * aspect_ratio * (w / crate::SCREEN_WIDTH as f64)) as u32;
    }
    ScreenSize { width, height: (h * scale) as u32, scale }
}

/// Per-frame decode parameters, copied from the settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeParams {
    pub filter: VideoFilterType,
    pub overscan: Overscan,
    pub scale: f64,
    pub aspect_ratio: f64,
}

impl DecodeParams {
    pub fn from_settings(s: &EmulationSettings) -> Self {
        DecodeParams {
            filter: s.video_filter,
            overscan: s.overscan,
            scale: s.video_scale,
            aspect_ratio: s.aspect_ratio,
        }
    }
}

/// A fully decoded frame on its way to the history and renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub pixels: Vec<u32>,
    pub info: FrameInfo,
    /// Overscan the filter applied
    pub overscan: Overscan,
    /// Pipeline frame counter at publish time
    pub frame_number: u32,
    /// Display size differs from the previous frame's
    pub resolution_changed: bool,
}

/// Downstream consumer of decoded frames.
pub trait FrameSink {
    fn send_frame(&mut self, frame: DecodedFrame);
}

impl FrameSink for Vec<DecodedFrame> {
    fn send_frame(&mut self, frame: DecodedFrame) {
        self.push(frame);
    }
}

// ─── Decoder ────────────────────────────────────────────────────────────────

/// Filter chain plus resolution tracking. Lives on whichever thread decodes.
struct Decoder {
    chain: FilterChain,
    previous: Option<ScreenSize>,
}

impl Decoder {
    fn decode(
        &mut self,
        frame: &RawFrame,
        hd: Option<&[PixelObservation]>,
        params: &DecodeParams,
        frame_number: u32,
    ) -> DecodedFrame {
        self.chain.update(params.filter, hd.is_some());
        let (pixels, info) = self.chain.decode(frame, params.overscan, hd);
        let overscan = self.chain.overscan();

        let size = compute_screen_size(&overscan, 1.0, params.aspect_ratio);
        let resolution_changed = self
            .previous
            .is_some_and(|p| p.width != size.width || p.height != size.height || p.scale != params.scale);
        if resolution_changed {
            debug!(width = info.width, height = info.height, "Resolution changed");
        }
        self.previous = Some(ScreenSize { scale: params.scale, ..size });

        DecodedFrame { pixels, info, overscan, frame_number, resolution_changed }
    }
}

struct DecodeSlot {
    frame: Option<RawFrame>,
    hd: Option<Vec<PixelObservation>>,
    params: DecodeParams,
    frame_number: u32,
    frame_changed: bool,
    stop: bool,
}

type Shared = Arc<(Mutex<DecodeSlot>, Condvar)>;

struct Worker {
    shared: Shared,
    handle: JoinHandle<Decoder>,
    rx: Receiver<DecodedFrame>,
}

fn decode_thread(shared: Shared, mut decoder: Decoder, tx: Sender<DecodedFrame>) -> Decoder {
    debug!("Decode thread started");
    let (lock, cvar) = &*shared;
    loop {
        let (frame, hd, params, number) = {
            let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            let mut slot = cvar
                .wait_while(guard, |s| !s.frame_changed && !s.stop)
                .unwrap_or_else(|e| e.into_inner());
            if slot.stop {
                break;
            }
            let Some(frame) = slot.frame.take() else {
                slot.frame_changed = false;
                cvar.notify_all();
                continue;
            };
            (frame, slot.hd.take(), slot.params, slot.frame_number)
        };

        let decoded = decoder.decode(&frame, hd.as_deref(), &params, number);
        let receiver_gone = tx.send(decoded).is_err();

        let mut slot = lock.lock().unwrap_or_else(|e| e.into_inner());
        slot.frame = Some(frame);
        slot.hd = hd;
        slot.frame_changed = false;
        cvar.notify_all();
        if receiver_gone {
            break;
        }
    }
    debug!("Decode thread finished");
    decoder
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

/// Raw-to-ARGB decode, synchronous or on a background thread.
pub struct FramePipeline {
    params: DecodeParams,
    /// `None` while the decoder is owned by the worker thread
    decoder: Option<Decoder>,
    worker: Option<Worker>,
    hd_pack: Option<Arc<HdPack>>,
    frame_count: u32,
    frame_info: FrameInfo,
    filter_overscan: Overscan,
    last_frame: Option<DecodedFrame>,
}

impl FramePipeline {
    pub fn new(params: DecodeParams, hd_pack: Option<Arc<HdPack>>) -> Self {
        let decoder = Decoder { chain: FilterChain::new(params.filter, hd_pack.clone()), previous: None };
        let overscan = params.overscan;
        FramePipeline {
            params,
            decoder: Some(decoder),
            worker: None,
            hd_pack,
            frame_count: 0,
            frame_info: FrameInfo {
                width: overscan.screen_width(),
                height: overscan.screen_height(),
                original_width: crate::SCREEN_WIDTH as u32,
                original_height: crate::SCREEN_HEIGHT as u32,
                bytes_per_pixel: 4,
            },
            filter_overscan: overscan,
            last_frame: None,
        }
    }

    /// Change decode parameters; takes effect on the next frame.
    pub fn set_params(&mut self, params: DecodeParams) {
        self.params = params;
    }

    pub fn params(&self) -> DecodeParams {
        self.params
    }

    /// Replace the HD pack. Only allowed while the decode thread is stopped.
    pub fn set_hd_pack(&mut self, pack: Option<Arc<HdPack>>) {
        self.hd_pack = pack.clone();
        if let Some(decoder) = &mut self.decoder {
            decoder.chain.set_hd_pack(pack);
        }
    }

    pub fn hd_pack(&self) -> Option<&Arc<HdPack>> {
        self.hd_pack.as_ref()
    }

    /// Decode `frame` now and dispatch it to `sink` before returning.
    ///
    /// If the decode thread is running, this publishes to it instead and the
    /// frame reaches `sink` through [`FramePipeline::drain_decoded`].
    pub fn update_frame_sync(
        &mut self,
        frame: &RawFrame,
        hd: Option<&[PixelObservation]>,
        sink: &mut dyn FrameSink,
    ) {
        if self.worker.is_some() {
            self.update_frame(frame, hd);
            return;
        }
        let params = self.params;
        let number = self.frame_count;
        let Some(decoder) = self.decoder.as_mut() else {
            return;
        };
        let decoded = decoder.decode(frame, hd, &params, number);
        self.frame_count = self.frame_count.wrapping_add(1);
        self.deliver(decoded, sink);
    }

    /// Publish `frame` to the decode thread, waiting for the previous frame
    /// to finish decoding first. Falls back to nothing if no thread runs.
    pub fn update_frame(&mut self, frame: &RawFrame, hd: Option<&[PixelObservation]>) {
        let Some(worker) = &self.worker else {
            warn!("update_frame called without a decode thread");
            return;
        };
        let (lock, cvar) = &*worker.shared;
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut slot = cvar
            .wait_while(guard, |s| s.frame_changed && !s.stop)
            .unwrap_or_else(|e| e.into_inner());
        if slot.stop {
            return;
        }
        match &mut slot.frame {
            Some(buf) => buf.pixels_mut().copy_from_slice(frame.pixels()),
            None => slot.frame = Some(frame.clone()),
        }
        match (hd, &mut slot.hd) {
            (Some(src), Some(dst)) if dst.len() == src.len() => dst.copy_from_slice(src),
            (Some(src), dst) => *dst = Some(src.to_vec()),
            (None, dst) => *dst = None,
        }
        slot.params = self.params;
        slot.frame_number = self.frame_count;
        slot.frame_changed = true;
        cvar.notify_all();
        drop(slot);

        self.frame_count = self.frame_count.wrapping_add(1);
    }

    /// Forward every frame the decode thread has finished. Returns how many.
    pub fn drain_decoded(&mut self, sink: &mut dyn FrameSink) -> usize {
        let mut pending = Vec::new();
        if let Some(worker) = &self.worker {
            while let Ok(f) = worker.rx.try_recv() {
                pending.push(f);
            }
        }
        let n = pending.len();
        for f in pending {
            self.deliver(f, sink);
        }
        n
    }

    /// Block until the last published frame is decoded, then drain.
    pub fn flush(&mut self, sink: &mut dyn FrameSink) -> usize {
        if let Some(worker) = &self.worker {
            let (lock, cvar) = &*worker.shared;
            let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            let _slot = cvar
                .wait_while(guard, |s| s.frame_changed && !s.stop)
                .unwrap_or_else(|e| e.into_inner());
        }
        self.drain_decoded(sink)
    }

    fn deliver(&mut self, frame: DecodedFrame, sink: &mut dyn FrameSink) {
        self.frame_info = frame.info;
        self.filter_overscan = frame.overscan;
        self.last_frame = Some(frame.clone());
        sink.send_frame(frame);
    }

    pub fn start_thread(&mut self) -> io::Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(decoder) = self.decoder.take() else {
            return Ok(());
        };
        let shared: Shared = Arc::new((
            Mutex::new(DecodeSlot {
                frame: None,
                hd: None,
                params: self.params,
                frame_number: 0,
                frame_changed: false,
                stop: false,
            }),
            Condvar::new(),
        ));
        let (tx, rx) = mpsc::channel();
        let thread_shared = shared.clone();
        let spawned = thread::Builder::new()
            .name("remocon-decode".into())
            .spawn(move || decode_thread(thread_shared, decoder, tx));
        match spawned {
            Ok(handle) => {
                self.frame_count = 0;
                self.worker = Some(Worker { shared, handle, rx });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Cannot spawn decode thread");
                self.decoder = Some(Decoder {
                    chain: FilterChain::new(self.params.filter, self.hd_pack.clone()),
                    previous: None,
                });
                Err(e)
            }
        }
    }

    /// Stop and join the decode thread, forward what it finished, then decode
    /// one blank frame so the display is cleared.
    pub fn stop_thread(&mut self, sink: &mut dyn FrameSink) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        {
            let (lock, cvar) = &*worker.shared;
            let mut slot = lock.lock().unwrap_or_else(|e| e.into_inner());
            slot.stop = true;
            cvar.notify_all();
        }
        let decoder = match worker.handle.join() {
            Ok(d) => d,
            Err(_) => {
                warn!("Decode thread panicked; rebuilding filter chain");
                Decoder { chain: FilterChain::new(self.params.filter, self.hd_pack.clone()), previous: None }
            }
        };
        debug!("Decode thread joined");

        let leftover: Vec<DecodedFrame> = worker.rx.try_iter().collect();
        for f in leftover {
            self.deliver(f, sink);
        }

        self.decoder = Some(decoder);
        let blank = RawFrame::filled(BLACK_INDEX);
        self.update_frame_sync(&blank, None, sink);
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Frames submitted since creation (or since the thread was started).
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Dimensions of the most recently delivered frame.
    pub fn frame_info(&self) -> FrameInfo {
        self.frame_info
    }

    /// Display size. `ignore_scale` uses the overscan the filter actually
    /// applied and a scale of 1.
    pub fn screen_size(&self, ignore_scale: bool) -> ScreenSize {
        if ignore_scale {
            compute_screen_size(&self.filter_overscan, 1.0, self.params.aspect_ratio)
        } else {
            compute_screen_size(&self.params.overscan, self.params.scale, self.params.aspect_ratio)
        }
    }

    /// PNG of the most recently delivered frame.
    pub fn take_screenshot(&self) -> Option<Vec<u8>> {
        let f = self.last_frame.as_ref()?;
        Some(encode_png(f.info.width, f.info.height, &f.pixels))
    }

    pub fn last_frame(&self) -> Option<&DecodedFrame> {
        self.last_frame.as_ref()
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            {
                let (lock, cvar) = &*worker.shared;
                let mut slot = lock.lock().unwrap_or_else(|e| e.into_inner());
                slot.stop = true;
                cvar.notify_all();
            }
            if worker.handle.join().is_err() {
                warn!("Decode thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::raw_to_argb;

    fn params() -> DecodeParams {
        DecodeParams::from_settings(&EmulationSettings::default())
    }

    fn frame_of(pixel: u16) -> RawFrame {
        RawFrame::filled(pixel)
    }

    #[test]
    fn test_sync_decode_dispatches_immediately() {
        let mut p = FramePipeline::new(params(), None);
        let mut out: Vec<DecodedFrame> = Vec::new();
        p.update_frame_sync(&frame_of(0x30), None, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pixels.len(), 256 * 240);
        assert_eq!(out[0].pixels[0], raw_to_argb(0x30));
        assert_eq!(p.frame_count(), 1);
        assert!(!out[0].resolution_changed);
    }

    #[test]
    fn test_resolution_change_detected() {
        let mut p = FramePipeline::new(params(), None);
        let mut out: Vec<DecodedFrame> = Vec::new();
        p.update_frame_sync(&frame_of(0x30), None, &mut out);
        let mut changed = params();
        changed.overscan.top = 8;
        p.set_params(changed);
        p.update_frame_sync(&frame_of(0x30), None, &mut out);
        p.update_frame_sync(&frame_of(0x30), None, &mut out);
        assert!(out[1].resolution_changed);
        assert!(!out[2].resolution_changed);
        assert_eq!(out[1].info.height, 232);
    }

    #[test]
    fn test_screen_size_aspect() {
        let s = compute_screen_size(&Overscan::default(), 2.0, 0.0);
        assert_eq!((s.width, s.height), (512, 480));
        let s = compute_screen_size(&Overscan::default(), 1.0, 4.0 / 3.0);
        assert_eq!((s.width, s.height), (320, 240));
    }

    #[test]
    fn test_threaded_preserves_order() {
        let mut p = FramePipeline::new(params(), None);
        p.start_thread().unwrap();
        assert!(p.is_running());

        let mut out: Vec<DecodedFrame> = Vec::new();
        for i in 0..20u16 {
            p.update_frame(&frame_of(i % 64), None);
            p.drain_decoded(&mut out);
        }
        p.flush(&mut out);
        assert_eq!(out.len(), 20);
        for (i, f) in out.iter().enumerate() {
            assert_eq!(f.frame_number, i as u32);
            assert_eq!(f.pixels[100], raw_to_argb((i % 64) as u16));
        }

        p.stop_thread(&mut out);
        assert!(!p.is_running());
        // Blank frame after shutdown
        let last = out.last().unwrap();
        assert!(last.pixels.iter().all(|&px| px == raw_to_argb(BLACK_INDEX)));
        assert_eq!(out.len(), 21);
    }

    #[test]
    fn test_drop_joins_running_thread() {
        let mut p = FramePipeline::new(params(), None);
        p.start_thread().unwrap();
        p.update_frame(&frame_of(0x16), None);
        let shared = p.worker.as_ref().map(|w| w.shared.clone()).unwrap();
        drop(p);
        // Only the test's handle is left once the thread has exited
        assert_eq!(Arc::strong_count(&shared), 1);
        assert!(shared.0.lock().unwrap().stop);
    }

    #[test]
    fn test_stop_without_thread_is_noop() {
        let mut p = FramePipeline::new(params(), None);
        let mut out: Vec<DecodedFrame> = Vec::new();
        p.stop_thread(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_restart_thread() {
        let mut p = FramePipeline::new(params(), None);
        let mut out: Vec<DecodedFrame> = Vec::new();
        for _ in 0..2 {
            p.start_thread().unwrap();
            p.update_frame(&frame_of(0x21), None);
            p.flush(&mut out);
            p.stop_thread(&mut out);
        }
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn test_screenshot_is_png() {
        let mut p = FramePipeline::new(params(), None);
        assert!(p.take_screenshot().is_none());
        let mut out: Vec<DecodedFrame> = Vec::new();
        p.update_frame_sync(&frame_of(0x11), None, &mut out);
        let png = p.take_screenshot().unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}
