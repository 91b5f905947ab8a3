//! Pointer gestures → the participant's line.
//!
//! Gestures are only accepted once a frame has been captured. Positions are
//! raster pixels; the caller maps viewport positions with
//! [`crate::coords::client_to_raster`] before handing them in.

use tracing::debug;

use crate::config::LineMode;
use crate::coords::{normalize, path_length, Point, RasterSize};

/// Shortest line (px) accepted on release.
pub const MIN_LINE_LENGTH: f32 = 5.0;
/// Fewest points a polyline may have.
pub const MIN_POLYLINE_POINTS: usize = 2;

// ── Line ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum UserLine {
    Segment { start: Point, end: Point },
    Polyline(Vec<Point>),
}

impl UserLine {
    pub fn points(&self) -> Vec<Point> {
        match self {
            UserLine::Segment { start, end } => vec![*start, *end],
            UserLine::Polyline(points) => points.clone(),
        }
    }

    pub fn length(&self) -> f32 {
        match self {
            UserLine::Segment { start, end } => start.distance_to(*end),
            UserLine::Polyline(points) => path_length(points),
        }
    }

    pub fn meets_minimum(&self) -> bool {
        let enough_points = match self {
            UserLine::Segment { .. } => true,
            UserLine::Polyline(points) => points.len() >= MIN_POLYLINE_POINTS,
        };
        enough_points && self.length() > MIN_LINE_LENGTH
    }

    /// Same line in unit coordinates of `size`.
    pub fn normalized(&self, size: RasterSize) -> UserLine {
        match self {
            UserLine::Segment { start, end } => UserLine::Segment {
                start: normalize(*start, size),
                end: normalize(*end, size),
            },
            UserLine::Polyline(points) => {
                UserLine::Polyline(points.iter().map(|p| normalize(*p, size)).collect())
            }
        }
    }
}

// ── State machine ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputState {
    /// No frame yet; gestures are rejected.
    Idle,
    /// Frame captured, no line.
    Ready,
    Drawing,
    Committed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GestureOutcome {
    Started,
    Rejected,
    Updated,
    Ignored,
    Committed,
    /// Released but below the minimum; the line is kept for clearing.
    TooShort,
    /// Gesture ended without committing.
    Paused,
}

#[derive(Clone, Debug)]
pub struct AnnotationInput {
    mode: LineMode,
    leave_releases: bool,
    state: InputState,
    line: Option<UserLine>,
    committed: bool,
}

impl AnnotationInput {
    pub fn new(mode: LineMode, leave_releases: bool) -> Self {
        Self {
            mode,
            leave_releases,
            state: InputState::Idle,
            line: None,
            committed: false,
        }
    }

    pub fn state(&self) -> InputState {
        self.state
    }

    pub fn line(&self) -> Option<&UserLine> {
        self.line.as_ref()
    }

    /// A released line that met the minimum.
    pub fn committed_line(&self) -> Option<&UserLine> {
        if self.committed {
            self.line.as_ref()
        } else {
            None
        }
    }

    pub fn is_drawing(&self) -> bool {
        self.state == InputState::Drawing
    }

    /// Called once the clip's frame is captured.
    pub fn frame_ready(&mut self) {
        if self.state == InputState::Idle {
            self.state = InputState::Ready;
        }
    }

    pub fn pointer_down(&mut self, pos: Point, frame_captured: bool) -> GestureOutcome {
        if !frame_captured {
            debug!("gesture rejected, no frame captured");
            return GestureOutcome::Rejected;
        }
        self.line = Some(match self.mode {
            LineMode::Segment => UserLine::Segment { start: pos, end: pos },
            LineMode::Polyline => UserLine::Polyline(vec![pos]),
        });
        self.committed = false;
        self.state = InputState::Drawing;
        GestureOutcome::Started
    }

    pub fn pointer_move(&mut self, pos: Point) -> GestureOutcome {
        if self.state != InputState::Drawing {
            return GestureOutcome::Ignored;
        }
        match self.line.as_mut() {
            Some(UserLine::Segment { end, .. }) => *end = pos,
            Some(UserLine::Polyline(points)) => {
                if points.last() != Some(&pos) {
                    points.push(pos);
                }
            }
            None => return GestureOutcome::Ignored,
        }
        GestureOutcome::Updated
    }

    pub fn pointer_up(&mut self) -> GestureOutcome {
        if self.state != InputState::Drawing {
            return GestureOutcome::Ignored;
        }
        self.state = InputState::Committed;
        let valid = self.line.as_ref().is_some_and(UserLine::meets_minimum);
        self.committed = valid;
        debug!(valid, "line released");
        if valid {
            GestureOutcome::Committed
        } else {
            GestureOutcome::TooShort
        }
    }

    /// Ends the gesture keeping the partial line (uncommitted).
    pub fn pointer_cancel(&mut self) -> GestureOutcome {
        if self.state != InputState::Drawing {
            return GestureOutcome::Ignored;
        }
        self.state = InputState::Committed;
        self.committed = false;
        GestureOutcome::Paused
    }

    pub fn pointer_leave(&mut self) -> GestureOutcome {
        if self.leave_releases {
            self.pointer_up()
        } else {
            self.pointer_cancel()
        }
    }

    /// Drop the line. The frame and reference belong to the session and are
    /// not touched.
    pub fn clear(&mut self) {
        self.line = None;
        self.committed = false;
        self.state = match self.state {
            InputState::Idle => InputState::Idle,
            _ => InputState::Ready,
        };
    }
}
