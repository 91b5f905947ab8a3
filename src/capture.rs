//! Frame capture: freeze exactly one still per clip.
//!
//! Two paths race to produce it. The visible element captures when playback
//! ends or is within [`NEAR_END_THRESHOLD`] of the end. A hidden, muted helper
//! element on the same source seeks straight to the end and captures as soon
//! as it lands there. Whichever succeeds first wins; every later attempt is a
//! no-op until the clip is replaced.

use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::coords::RasterSize;
use crate::media::{CaptureError, MediaElement, MediaEvent, MediaFactory};

/// Remaining playback (s) under which the visible element captures without
/// waiting for `Ended`.
pub const NEAR_END_THRESHOLD: f64 = 0.25;
/// How far before the end (s) the helper seeks.
pub const HELPER_END_OFFSET: f64 = 0.1;
/// Clips shorter than this (s) are captured by the helper at half duration.
pub const SHORT_CLIP: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureOrigin {
    Playback,
    Helper,
}

#[derive(Clone, Debug)]
pub struct CapturedFrame {
    pub clip_id: String,
    pub image: RgbaImage,
    pub captured_at_seconds: f64,
    pub size: RasterSize,
    pub origin: CaptureOrigin,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CaptureOutcome {
    Captured { size: RasterSize, origin: CaptureOrigin },
    AlreadyCaptured,
    /// Source has no decoded frame yet; retry on a later event.
    NotReady,
    Failed(CaptureError),
    Ignored,
}

// ── Latch ───────────────────────────────────────────────────────────────────

/// Single-shot claim shared by competing triggers: the first `claim` returns
/// true, every later one false.
#[derive(Debug, Default)]
pub struct CaptureLatch {
    claimed: bool,
}

impl CaptureLatch {
    pub fn claim(&mut self) -> bool {
        !std::mem::replace(&mut self.claimed, true)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }
}

// ── Helper ──────────────────────────────────────────────────────────────────

struct HelperCapture {
    element: Box<dyn MediaElement>,
    seek_requested: bool,
    latch: CaptureLatch,
}

impl HelperCapture {
    fn seek_target(duration: f64) -> f64 {
        if duration < SHORT_CLIP {
            duration / 2.0
        } else {
            duration - HELPER_END_OFFSET
        }
    }
}

impl Drop for HelperCapture {
    fn drop(&mut self) {
        self.element.teardown();
    }
}

// ── Engine ──────────────────────────────────────────────────────────────────

pub struct FrameCapture {
    clip_id: String,
    frame: Option<CapturedFrame>,
    helper: Option<HelperCapture>,
}

impl FrameCapture {
    pub fn new(clip_id: impl Into<String>) -> Self {
        Self {
            clip_id: clip_id.into(),
            frame: None,
            helper: None,
        }
    }

    pub fn is_captured(&self) -> bool {
        self.frame.is_some()
    }

    pub fn frame(&self) -> Option<&CapturedFrame> {
        self.frame.as_ref()
    }

    /// Raster size of the captured frame; every pixel coordinate of the
    /// clip's line is relative to this.
    pub fn raster_size(&self) -> Option<RasterSize> {
        self.frame.as_ref().map(|f| f.size)
    }

    pub fn has_helper(&self) -> bool {
        self.helper.is_some()
    }

    /// Attempt a capture from `element`'s current frame.
    pub fn capture_from(
        &mut self,
        element: &mut dyn MediaElement,
        origin: CaptureOrigin,
    ) -> CaptureOutcome {
        if self.frame.is_some() {
            return CaptureOutcome::AlreadyCaptured;
        }
        let (width, height) = element.video_size();
        let size = RasterSize::new(width, height);
        if size.is_empty() {
            debug!(clip = %self.clip_id, ?origin, "capture skipped, source not decoded yet");
            return CaptureOutcome::NotReady;
        }
        let image = match element.read_frame() {
            Ok(image) => image,
            Err(e) => {
                warn!(clip = %self.clip_id, ?origin, error = %e, "frame capture failed");
                return CaptureOutcome::Failed(e);
            }
        };
        let captured_at_seconds = element.current_time();
        info!(clip = %self.clip_id, ?origin, width, height, at = captured_at_seconds, "frame captured");
        self.frame = Some(CapturedFrame {
            clip_id: self.clip_id.clone(),
            image,
            captured_at_seconds,
            size,
            origin,
        });
        self.teardown_helper();
        CaptureOutcome::Captured { size, origin }
    }

    /// Primary path: react to an event of the visible element.
    pub fn on_playback_event(
        &mut self,
        element: &mut dyn MediaElement,
        event: &MediaEvent,
    ) -> CaptureOutcome {
        if self.frame.is_some() {
            return CaptureOutcome::AlreadyCaptured;
        }
        match event {
            MediaEvent::Ended => self.capture_from(element, CaptureOrigin::Playback),
            MediaEvent::TimeUpdate => {
                let duration = element.duration();
                if duration > 0.0 && duration - element.current_time() < NEAR_END_THRESHOLD {
                    self.capture_from(element, CaptureOrigin::Playback)
                } else {
                    CaptureOutcome::Ignored
                }
            }
            _ => CaptureOutcome::Ignored,
        }
    }

    /// Background path: open a muted helper on `src`. Any previous helper is
    /// torn down first so at most one exists.
    pub fn start_helper(&mut self, factory: &dyn MediaFactory, src: &str) {
        self.teardown_helper();
        if self.frame.is_some() {
            return;
        }
        let mut element = factory.open(src);
        element.set_muted(true);
        debug!(clip = %self.clip_id, src, "helper element opened");
        self.helper = Some(HelperCapture {
            element,
            seek_requested: false,
            latch: CaptureLatch::default(),
        });
    }

    /// Drive the helper's clock and react to what it reports.
    pub fn pump_helper(&mut self, dt: f64) -> CaptureOutcome {
        let Some(helper) = self.helper.as_mut() else {
            return CaptureOutcome::Ignored;
        };
        let events = helper.element.advance(dt);
        let mut outcome = CaptureOutcome::Ignored;
        for event in events {
            let Some(helper) = self.helper.as_mut() else {
                break;
            };
            match event {
                MediaEvent::LoadedMetadata | MediaEvent::LoadedData => {
                    let duration = helper.element.duration();
                    if !helper.seek_requested && duration > 0.0 {
                        let target = HelperCapture::seek_target(duration);
                        debug!(clip = %self.clip_id, duration, target, "helper seeking");
                        helper.element.seek(target);
                        helper.seek_requested = true;
                    }
                }
                MediaEvent::Seeked | MediaEvent::TimeUpdate => {
                    if !helper.seek_requested || helper.latch.is_claimed() {
                        continue;
                    }
                    let (w, h) = helper.element.video_size();
                    if w == 0 || h == 0 {
                        continue;
                    }
                    if !helper.latch.claim() {
                        continue;
                    }
                    let mut helper = match self.helper.take() {
                        Some(helper) => helper,
                        None => break,
                    };
                    outcome = self.capture_from(helper.element.as_mut(), CaptureOrigin::Helper);
                    // dropping the helper tears it down
                    drop(helper);
                    break;
                }
                MediaEvent::Error(msg) => {
                    warn!(clip = %self.clip_id, error = %msg, "helper element failed, relying on playback");
                    self.teardown_helper();
                    break;
                }
                MediaEvent::Play | MediaEvent::Ended => {}
            }
        }
        outcome
    }

    pub fn teardown_helper(&mut self) {
        if self.helper.take().is_some() {
            debug!(clip = %self.clip_id, "helper element torn down");
        }
    }
}
