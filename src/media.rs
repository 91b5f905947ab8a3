//! The host media element: something that loads a clip, plays it on a clock,
//! seeks, and hands out the raster of its current frame.
//!
//! The trait follows the lifecycle of a browser video element so the capture
//! logic can be written against events (`TimeUpdate`, `Seeked`, `Ended`, ...)
//! rather than against one particular player.

use std::path::{Path, PathBuf};

use image::RgbaImage;
use tracing::{debug, warn};

use crate::config::is_remote;

// ── Events & errors ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum MediaEvent {
    LoadedMetadata,
    LoadedData,
    Play,
    TimeUpdate,
    Seeked,
    Ended,
    Error(String),
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CaptureError {
    /// The frame exists but cannot be copied out (the cross-origin taint
    /// case in a browser; an undecodable frame here).
    #[error("frame cannot be read back: {0}")]
    Unreadable(String),

    #[error("media element has no source")]
    NoSource,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("playback refused: {0}")]
pub struct PlaybackError(pub String);

// ── Element trait ───────────────────────────────────────────────────────────

pub trait MediaElement {
    fn src(&self) -> &str;
    /// Intrinsic size; `0×0` until the first frame is decoded.
    fn video_size(&self) -> (u32, u32);
    /// Seconds; `0.0` until metadata is known.
    fn duration(&self) -> f64;
    fn current_time(&self) -> f64;
    fn is_playing(&self) -> bool;
    fn play(&mut self) -> Result<(), PlaybackError>;
    fn pause(&mut self);
    fn seek(&mut self, seconds: f64);
    fn set_muted(&mut self, muted: bool);
    /// Move the element's clock forward by `dt` seconds and return whatever
    /// lifecycle events that produced, in order.
    fn advance(&mut self, dt: f64) -> Vec<MediaEvent>;
    fn read_frame(&mut self) -> Result<RgbaImage, CaptureError>;
    /// Drop the source and release decode resources. Further calls are no-ops.
    fn teardown(&mut self);
}

/// Opens elements for a source; the capture engine uses it for its helper.
pub trait MediaFactory {
    fn open(&self, src: &str) -> Box<dyn MediaElement>;
}

// ── Frame-sequence element ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadState {
    Unloaded,
    Ready,
    Failed,
}

/// Plays a directory of still frames (sorted by file name) or a single image
/// at a fixed rate. Frames are decoded lazily, one at a time.
pub struct FrameSequenceElement {
    src: String,
    fps: f64,
    frames: Vec<PathBuf>,
    size: (u32, u32),
    time: f64,
    playing: bool,
    muted: bool,
    pending_seek: Option<f64>,
    ended: bool,
    state: LoadState,
    torn_down: bool,
}

const FRAME_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

impl FrameSequenceElement {
    pub fn new(src: &str, fps: f32) -> Self {
        Self {
            src: src.to_string(),
            fps: if fps > 0.0 { fps as f64 } else { 25.0 },
            frames: Vec::new(),
            size: (0, 0),
            time: 0.0,
            playing: false,
            muted: false,
            pending_seek: None,
            ended: false,
            state: LoadState::Unloaded,
            torn_down: false,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    fn frame_index(&self) -> usize {
        let last = self.frames.len().saturating_sub(1);
        ((self.time * self.fps).floor() as usize).min(last)
    }

    fn list_frames(src: &str) -> Result<Vec<PathBuf>, String> {
        if is_remote(src) {
            return Err(format!("remote source {src} cannot be played natively"));
        }
        let path = Path::new(src);
        if path.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }
        let entries = std::fs::read_dir(path).map_err(|e| format!("{src}: {e}"))?;
        let mut frames: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        frames.sort();
        if frames.is_empty() {
            return Err(format!("{src}: no frames found"));
        }
        Ok(frames)
    }

    fn load(&mut self, events: &mut Vec<MediaEvent>) {
        let frames = match Self::list_frames(&self.src) {
            Ok(frames) => frames,
            Err(msg) => {
                warn!(src = %self.src, error = %msg, "media load failed");
                self.state = LoadState::Failed;
                events.push(MediaEvent::Error(msg));
                return;
            }
        };
        self.frames = frames;
        events.push(MediaEvent::LoadedMetadata);
        match image::image_dimensions(&self.frames[0]) {
            Ok(size) => {
                self.size = size;
                self.state = LoadState::Ready;
                debug!(src = %self.src, frames = self.frames.len(), width = size.0, height = size.1, "media loaded");
                events.push(MediaEvent::LoadedData);
            }
            Err(e) => {
                self.state = LoadState::Failed;
                events.push(MediaEvent::Error(format!("{}: {e}", self.frames[0].display())));
            }
        }
    }
}

impl MediaElement for FrameSequenceElement {
    fn src(&self) -> &str {
        &self.src
    }

    fn video_size(&self) -> (u32, u32) {
        self.size
    }

    fn duration(&self) -> f64 {
        self.frames.len() as f64 / self.fps
    }

    fn current_time(&self) -> f64 {
        self.time
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn play(&mut self) -> Result<(), PlaybackError> {
        if self.torn_down {
            return Err(PlaybackError("element has been torn down".into()));
        }
        if self.ended {
            self.time = 0.0;
            self.ended = false;
        }
        self.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn seek(&mut self, seconds: f64) {
        self.pending_seek = Some(seconds.max(0.0));
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn advance(&mut self, dt: f64) -> Vec<MediaEvent> {
        let mut events = Vec::new();
        if self.torn_down || self.state == LoadState::Failed {
            return events;
        }
        if self.state == LoadState::Unloaded {
            self.load(&mut events);
            return events;
        }
        if let Some(target) = self.pending_seek.take() {
            self.time = target.min(self.duration());
            self.ended = false;
            events.push(MediaEvent::Seeked);
            events.push(MediaEvent::TimeUpdate);
        }
        if self.playing {
            let duration = self.duration();
            self.time = (self.time + dt.max(0.0)).min(duration);
            events.push(MediaEvent::TimeUpdate);
            if self.time >= duration {
                self.playing = false;
                self.ended = true;
                events.push(MediaEvent::Ended);
            }
        }
        events
    }

    fn read_frame(&mut self) -> Result<RgbaImage, CaptureError> {
        if self.torn_down || self.frames.is_empty() {
            return Err(CaptureError::NoSource);
        }
        let path = &self.frames[self.frame_index()];
        image::open(path)
            .map(|img| img.to_rgba8())
            .map_err(|e| CaptureError::Unreadable(format!("{}: {e}", path.display())))
    }

    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.playing = false;
        self.frames.clear();
        self.src.clear();
        self.size = (0, 0);
    }
}

/// Opens [`FrameSequenceElement`]s at a fixed frame rate.
#[derive(Clone, Copy, Debug)]
pub struct FrameSequenceFactory {
    pub fps: f32,
}

impl MediaFactory for FrameSequenceFactory {
    fn open(&self, src: &str) -> Box<dyn MediaElement> {
        Box::new(FrameSequenceElement::new(src, self.fps))
    }
}
