//! Reference ("expert" / "mock") annotations.
//!
//! Three JSON layouts exist in the wild. Each is adapted here into one
//! canonical form, an ordered list of unit-coordinate points per line, so
//! nothing downstream ever sees the file schema.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{is_remote, ClipDescriptor};
use crate::coords::{normalize, Point, RasterSize};

// ── Canonical form ──────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceLine {
    /// Unit coordinates, at least two points.
    pub points: Vec<Point>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceAnnotation {
    pub lines: Vec<ReferenceLine>,
    /// Document as fetched, echoed back in submissions for auditing.
    pub raw: serde_json::Value,
}

impl ReferenceAnnotation {
    pub fn parse(text: &str) -> Result<Self, ReferenceError> {
        let raw: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: serde_json::Value) -> Result<Self, ReferenceError> {
        let doc: ReferenceDocument = serde_json::from_value(raw.clone())?;
        let lines = match doc {
            ReferenceDocument::Incisions { incision_details } => incision_details
                .into_iter()
                .map(IncisionDetail::into_line)
                .collect::<Result<Vec<_>, _>>()?,
            ReferenceDocument::Lines { lines } => lines
                .into_iter()
                .map(LineRecord::into_line)
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(Self { lines, raw })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    #[error("malformed reference json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reference line has neither normalized nor pixel coordinates")]
    MissingCoordinates,

    #[error("pixel coordinates without a usable canvasSize")]
    MissingCanvasSize,

    #[error("reference line needs at least two points, got {0}")]
    TooFewPoints(usize),

    #[error("fetch failed: {0}")]
    Fetch(String),
}

// ── File schemas ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum ReferenceDocument {
    Incisions {
        #[serde(rename = "incisionDetails")]
        incision_details: Vec<IncisionDetail>,
    },
    Lines {
        lines: Vec<LineRecord>,
    },
}

#[derive(Deserialize)]
struct SegmentRecord {
    start: Point,
    end: Point,
}

#[derive(Clone, Copy, Deserialize)]
struct SizeRecord {
    width: f32,
    height: f32,
}

impl SizeRecord {
    fn raster(self) -> Result<RasterSize, ReferenceError> {
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(ReferenceError::MissingCanvasSize);
        }
        Ok(RasterSize::new(self.width.round() as u32, self.height.round() as u32))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncisionDetail {
    normalized: Option<SegmentRecord>,
    pixels: Option<SegmentRecord>,
    canvas_size: Option<SizeRecord>,
}

impl IncisionDetail {
    fn into_line(self) -> Result<ReferenceLine, ReferenceError> {
        if let Some(seg) = self.normalized {
            return Ok(ReferenceLine { points: vec![seg.start, seg.end] });
        }
        let seg = self.pixels.ok_or(ReferenceError::MissingCoordinates)?;
        let size = self.canvas_size.ok_or(ReferenceError::MissingCanvasSize)?.raster()?;
        Ok(ReferenceLine {
            points: vec![normalize(seg.start, size), normalize(seg.end, size)],
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineRecord {
    points: Vec<Point>,
    /// Present only when the points are pixels.
    canvas_size: Option<SizeRecord>,
}

impl LineRecord {
    fn into_line(self) -> Result<ReferenceLine, ReferenceError> {
        if self.points.len() < 2 {
            return Err(ReferenceError::TooFewPoints(self.points.len()));
        }
        let points = match self.canvas_size {
            Some(size) => {
                let size = size.raster()?;
                self.points.into_iter().map(|p| normalize(p, size)).collect()
            }
            None => self.points,
        };
        Ok(ReferenceLine { points })
    }
}

// ── Fetching ────────────────────────────────────────────────────────────────

/// Location of a clip's reference file under `root`.
pub fn reference_path(root: &str, clip: &ClipDescriptor) -> String {
    let kind = clip.annotation_type;
    format!("{root}{}{}{}", kind.base_path(), clip.reference_key(), kind.suffix())
}

/// Where reference documents come from. `Ok(None)` means "no reference for
/// this clip", which is an expected state.
pub trait ReferenceSource: Send + Sync {
    fn fetch(&self, location: &str) -> Result<Option<String>, ReferenceError>;
}

/// Reads local files, or GETs `http(s)://` locations with `ureq`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultReferenceSource;

impl ReferenceSource for DefaultReferenceSource {
    fn fetch(&self, location: &str) -> Result<Option<String>, ReferenceError> {
        if is_remote(location) {
            return match ureq::get(location).call() {
                Ok(response) => response
                    .into_string()
                    .map(Some)
                    .map_err(|e| ReferenceError::Fetch(e.to_string())),
                Err(ureq::Error::Status(404, _)) => Ok(None),
                Err(e) => Err(ReferenceError::Fetch(e.to_string())),
            };
        }
        match std::fs::read_to_string(location) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ReferenceError::Fetch(e.to_string())),
        }
    }
}

/// Fetch and parse, folding every failure into "absent". Absence is logged
/// but never reported to the participant.
pub fn load_reference(source: &dyn ReferenceSource, location: &str) -> Option<ReferenceAnnotation> {
    let text = match source.fetch(location) {
        Ok(Some(text)) => text,
        Ok(None) => {
            debug!(location, "no reference annotation");
            return None;
        }
        Err(e) => {
            warn!(location, error = %e, "reference fetch failed, continuing without overlay");
            return None;
        }
    };
    match ReferenceAnnotation::parse(&text) {
        Ok(reference) => {
            debug!(location, lines = reference.lines.len(), "reference annotation loaded");
            Some(reference)
        }
        Err(e) => {
            warn!(location, error = %e, "unusable reference annotation, continuing without overlay");
            None
        }
    }
}
