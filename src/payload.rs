//! The submission payload, derived on demand from the session.

use serde::Serialize;

use crate::capture::CapturedFrame;
use crate::config::ClipDescriptor;
use crate::coords::{Point, RasterSize};
use crate::input::UserLine;
use crate::reference::ReferenceAnnotation;

/// Local reasons a submission is blocked. These never reach the network and
/// are shown inline rather than as toasts.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please enter your participant ID.")]
    MissingParticipant,

    #[error("Please rate your fatigue before submitting.")]
    MissingFatigue,

    #[error("Wait for the final frame before drawing.")]
    NoFrame,

    #[error("Draw your incision line on the frozen frame.")]
    NoLine,

    #[error("Line too short. Please redraw.")]
    LineTooShort,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedLine {
    Incision { incision: Segment },
    Points { points: Vec<Point> },
}

impl From<UserLine> for NormalizedLine {
    fn from(line: UserLine) -> Self {
        match line {
            UserLine::Segment { start, end } => NormalizedLine::Incision {
                incision: Segment { start, end },
            },
            UserLine::Polyline(points) => NormalizedLine::Points { points },
        }
    }
}

/// Optional self-reports, 1–5.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ratings {
    pub fatigue: Option<u8>,
    pub confidence: Option<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionPayload {
    pub clip_id: String,
    pub clip_label: String,
    pub video_src: String,
    pub captured_frame_time: f64,
    #[serde(flatten)]
    pub line: NormalizedLine,
    pub canvas_size: RasterSize,
    pub participant_id: String,
    pub generated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatigue: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_annotation: Option<serde_json::Value>,
}

/// Everything a payload is derived from.
pub struct PayloadInputs<'a> {
    pub clip: &'a ClipDescriptor,
    pub frame: Option<&'a CapturedFrame>,
    pub line: Option<&'a UserLine>,
    pub reference: Option<&'a ReferenceAnnotation>,
    pub participant_id: &'a str,
    pub ratings: Ratings,
    pub require_fatigue: bool,
}

impl SubmissionPayload {
    /// Derive the payload, or the first reason it cannot exist yet.
    pub fn derive(inputs: PayloadInputs<'_>, generated_at: String) -> Result<Self, ValidationError> {
        let frame = inputs.frame.ok_or(ValidationError::NoFrame)?;
        let line = inputs.line.ok_or(ValidationError::NoLine)?;
        if !line.meets_minimum() {
            return Err(ValidationError::LineTooShort);
        }
        let participant_id = inputs.participant_id.trim();
        if participant_id.is_empty() {
            return Err(ValidationError::MissingParticipant);
        }
        if inputs.require_fatigue && inputs.ratings.fatigue.is_none() {
            return Err(ValidationError::MissingFatigue);
        }
        debug_assert_eq!(frame.clip_id, inputs.clip.id);

        Ok(Self {
            clip_id: inputs.clip.id.clone(),
            clip_label: inputs.clip.label.clone(),
            video_src: inputs.clip.src.clone(),
            captured_frame_time: frame.captured_at_seconds,
            line: line.normalized(frame.size).into(),
            canvas_size: frame.size,
            participant_id: participant_id.to_string(),
            generated_at,
            fatigue: inputs.ratings.fatigue,
            confidence: inputs.ratings.confidence,
            reference_annotation: inputs.reference.map(|r| r.raw.clone()),
        })
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2026-10-18T09:30:00.123Z`.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
