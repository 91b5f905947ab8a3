//! Walks the participant through the clip list.
//!
//! Everything that belongs to one clip (capture, line, reference, ratings,
//! in-flight flag, load error) lives in a single [`ClipSession`] value that is
//! replaced wholesale on every load, so nothing can leak from one clip into
//! the next. Asynchronous results carry the [`LoadTicket`] that issued them
//! and are dropped if the ticket no longer matches.

use tracing::{debug, error, info, warn};

use crate::capture::{CaptureOutcome, FrameCapture};
use crate::config::{ClipDescriptor, ConfigError, LineMode, StudyConfig};
use crate::coords::{Point, RasterSize};
use crate::input::{AnnotationInput, GestureOutcome, UserLine};
use crate::media::{CaptureError, MediaElement, MediaEvent, MediaFactory};
use crate::overlay::{compose, OverlayScene};
use crate::payload::{PayloadInputs, Ratings, SubmissionPayload, ValidationError};
use crate::reference::{reference_path, ReferenceAnnotation};
use crate::submit::{InFlight, SubmissionClient, SubmissionRequest, SubmitError};

// ── Types ───────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    pub index: usize,
    pub clip_id: String,
    pub generation: u64,
    /// Where this clip's reference annotation lives.
    pub reference_path: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReferenceState {
    Pending,
    Absent,
    Loaded(ReferenceAnnotation),
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("clip {clip_id} failed to load: {reason}")]
pub struct LoadError {
    pub clip_id: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Nothing,
    PlaybackStarted,
    AutoplayBlocked,
    Captured(RasterSize),
    CaptureFailed(CaptureError),
    LoadFailed(LoadError),
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SubmitBlocked {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error("no active clip")]
    NoClip,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmitReport {
    /// Accepted; the next clip is loading.
    Advanced(LoadTicket),
    /// Accepted and that was the last clip.
    Finished,
    Failed(SubmitError),
    /// Result for a clip that is no longer active.
    Stale,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionSettings {
    pub line_mode: LineMode,
    pub leave_releases: bool,
    pub require_fatigue: bool,
}

impl From<&StudyConfig> for SessionSettings {
    fn from(config: &StudyConfig) -> Self {
        Self {
            line_mode: config.line_mode,
            leave_releases: config.leave_releases,
            require_fatigue: config.require_fatigue,
        }
    }
}

// ── Session ─────────────────────────────────────────────────────────────────

pub struct ClipSession {
    clip: ClipDescriptor,
    ticket: LoadTicket,
    reference: ReferenceState,
    capture: FrameCapture,
    input: AnnotationInput,
    ratings: Ratings,
    in_flight: InFlight,
    load_error: Option<LoadError>,
    media_src: Option<String>,
}

impl ClipSession {
    fn new(clip: ClipDescriptor, ticket: LoadTicket, settings: SessionSettings) -> Self {
        Self {
            capture: FrameCapture::new(clip.id.clone()),
            input: AnnotationInput::new(settings.line_mode, settings.leave_releases),
            clip,
            ticket,
            reference: ReferenceState::Pending,
            ratings: Ratings::default(),
            in_flight: InFlight::default(),
            load_error: None,
            media_src: None,
        }
    }

    pub fn clip(&self) -> &ClipDescriptor {
        &self.clip
    }

    pub fn ticket(&self) -> &LoadTicket {
        &self.ticket
    }

    pub fn reference_state(&self) -> &ReferenceState {
        &self.reference
    }

    pub fn reference(&self) -> Option<&ReferenceAnnotation> {
        match &self.reference {
            ReferenceState::Loaded(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn capture(&self) -> &FrameCapture {
        &self.capture
    }

    pub fn input(&self) -> &AnnotationInput {
        &self.input
    }

    pub fn line(&self) -> Option<&UserLine> {
        self.input.line()
    }

    pub fn ratings(&self) -> Ratings {
        self.ratings
    }

    pub fn set_ratings(&mut self, ratings: Ratings) {
        self.ratings = ratings;
    }

    pub fn load_error(&self) -> Option<&LoadError> {
        self.load_error.as_ref()
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.is_busy()
    }

    /// Media source, once the reference has settled and the clip may play.
    pub fn media_src(&self) -> Option<&str> {
        self.media_src.as_deref()
    }

    pub fn replay_enabled(&self) -> bool {
        self.media_src.is_some() && self.load_error.is_none()
    }

    pub fn clear_enabled(&self) -> bool {
        self.input.line().is_some() && !self.input.is_drawing()
    }

    /// Scene for the current state, once a frame exists to draw on.
    pub fn scene(&self) -> Option<OverlayScene> {
        let size = self.capture.raster_size()?;
        Some(compose(size, self.reference(), self.input.line()))
    }

    fn track(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Nothing => {}
            other => debug!(clip = %self.clip.id, event = ?other, "session event"),
        }
    }

    fn on_capture(&mut self, outcome: CaptureOutcome) -> SessionEvent {
        match outcome {
            CaptureOutcome::Captured { size, .. } => {
                self.input.frame_ready();
                SessionEvent::Captured(size)
            }
            CaptureOutcome::Failed(e) => SessionEvent::CaptureFailed(e),
            CaptureOutcome::AlreadyCaptured | CaptureOutcome::NotReady | CaptureOutcome::Ignored => {
                SessionEvent::Nothing
            }
        }
    }

    /// Route an event from the visible element.
    pub fn on_media_event(
        &mut self,
        element: &mut dyn MediaElement,
        event: &MediaEvent,
    ) -> SessionEvent {
        let result = match event {
            MediaEvent::LoadedData => match element.play() {
                Ok(()) => SessionEvent::PlaybackStarted,
                Err(e) => {
                    warn!(clip = %self.clip.id, error = %e, "autoplay refused");
                    SessionEvent::AutoplayBlocked
                }
            },
            MediaEvent::Error(reason) => {
                let err = LoadError {
                    clip_id: self.clip.id.clone(),
                    reason: reason.clone(),
                };
                error!(clip = %self.clip.id, %reason, "clip failed to load, sequence paused");
                self.capture.teardown_helper();
                self.load_error = Some(err.clone());
                SessionEvent::LoadFailed(err)
            }
            MediaEvent::TimeUpdate | MediaEvent::Ended => {
                let outcome = self.capture.on_playback_event(element, event);
                self.on_capture(outcome)
            }
            MediaEvent::LoadedMetadata | MediaEvent::Play | MediaEvent::Seeked => SessionEvent::Nothing,
        };
        self.track(&result);
        result
    }

    pub fn start_helper(&mut self, factory: &dyn MediaFactory) {
        if let Some(src) = self.media_src.clone() {
            self.capture.start_helper(factory, &src);
        }
    }

    pub fn pump_helper(&mut self, dt: f64) -> SessionEvent {
        let outcome = self.capture.pump_helper(dt);
        let result = self.on_capture(outcome);
        self.track(&result);
        result
    }

    pub fn pointer_down(&mut self, pos: Point) -> GestureOutcome {
        self.input.pointer_down(pos, self.capture.is_captured())
    }

    pub fn pointer_move(&mut self, pos: Point) -> GestureOutcome {
        self.input.pointer_move(pos)
    }

    pub fn pointer_up(&mut self) -> GestureOutcome {
        self.input.pointer_up()
    }

    pub fn pointer_cancel(&mut self) -> GestureOutcome {
        self.input.pointer_cancel()
    }

    pub fn pointer_leave(&mut self) -> GestureOutcome {
        self.input.pointer_leave()
    }

    pub fn clear_line(&mut self) {
        self.input.clear();
    }
}

// ── Sequencer ───────────────────────────────────────────────────────────────

pub struct ClipSequencer {
    clips: Vec<ClipDescriptor>,
    settings: SessionSettings,
    annotations_root: String,
    participant_id: String,
    generation: u64,
    session: Option<ClipSession>,
    finished: bool,
}

impl ClipSequencer {
    pub fn new(
        clips: Vec<ClipDescriptor>,
        settings: SessionSettings,
        annotations_root: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        if clips.is_empty() {
            return Err(ConfigError::NoClips);
        }
        Ok(Self {
            clips,
            settings,
            annotations_root: annotations_root.into(),
            participant_id: String::new(),
            generation: 0,
            session: None,
            finished: false,
        })
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.session.as_ref().map(|s| s.ticket.index)
    }

    pub fn session(&self) -> Option<&ClipSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut ClipSession> {
        self.session.as_mut()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn set_participant_id(&mut self, id: &str) {
        self.participant_id = id.trim().to_string();
    }

    /// Replace the session with a fresh one for clip `index`. Past the end of
    /// the list this enters the terminal state and returns `None`.
    pub fn load(&mut self, index: usize) -> Option<LoadTicket> {
        if self.finished {
            return None;
        }
        let Some(clip) = self.clips.get(index).cloned() else {
            self.finish();
            return None;
        };
        self.generation += 1;
        let ticket = LoadTicket {
            index,
            clip_id: clip.id.clone(),
            generation: self.generation,
            reference_path: reference_path(&self.annotations_root, &clip),
        };
        info!(clip = %clip.id, index, total = self.clips.len(), "loading clip");
        self.session = Some(ClipSession::new(clip, ticket.clone(), self.settings));
        Some(ticket)
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.session = None;
        info!(clips = self.clips.len(), "sequence complete");
    }

    fn is_current(&self, ticket: &LoadTicket) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.ticket.generation == ticket.generation && s.clip.id == ticket.clip_id)
    }

    /// Install the reference fetched for `ticket`. Returns the media source to
    /// open, or `None` when the ticket is stale.
    pub fn apply_reference(
        &mut self,
        ticket: &LoadTicket,
        reference: Option<ReferenceAnnotation>,
    ) -> Option<String> {
        if !self.is_current(ticket) {
            debug!(clip = %ticket.clip_id, generation = ticket.generation, "discarding stale reference");
            return None;
        }
        let session = self.session.as_mut()?;
        session.reference = match reference {
            Some(reference) => ReferenceState::Loaded(reference),
            None => ReferenceState::Absent,
        };
        let src = session.clip.src.clone();
        session.media_src = Some(src.clone());
        Some(src)
    }

    /// Payload for the active clip, or why there is none yet.
    pub fn payload(&self, generated_at: String) -> Result<SubmissionPayload, SubmitBlocked> {
        let session = self.session.as_ref().ok_or(SubmitBlocked::NoClip)?;
        let payload = SubmissionPayload::derive(
            PayloadInputs {
                clip: &session.clip,
                frame: session.capture.frame(),
                line: session.input.committed_line(),
                reference: session.reference(),
                participant_id: &self.participant_id,
                ratings: session.ratings,
                require_fatigue: self.settings.require_fatigue,
            },
            generated_at,
        )?;
        Ok(payload)
    }

    /// Whether the submit control should be enabled right now.
    pub fn can_submit(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_submitting())
            && self.payload(String::new()).is_ok()
    }

    /// Validate, take the in-flight guard, and build the request to send.
    pub fn begin_submission(
        &mut self,
        client: &SubmissionClient,
        generated_at: String,
    ) -> Result<(LoadTicket, SubmissionRequest), SubmitBlocked> {
        let payload = self.payload(generated_at)?;
        let request = client.build_request(&payload)?;
        let session = self.session.as_mut().ok_or(SubmitBlocked::NoClip)?;
        session.in_flight.try_begin()?;
        debug!(clip = %session.clip.id, "submission started");
        Ok((session.ticket.clone(), request))
    }

    /// Apply a delivery result. Only success advances; on failure the line,
    /// frame, and index are left as they were.
    pub fn finish_submission(
        &mut self,
        ticket: &LoadTicket,
        result: Result<(), SubmitError>,
    ) -> SubmitReport {
        if !self.is_current(ticket) {
            return SubmitReport::Stale;
        }
        let Some(session) = self.session.as_mut() else {
            return SubmitReport::Stale;
        };
        session.in_flight.end();
        match result {
            Ok(()) => match self.load(ticket.index + 1) {
                Some(next) => SubmitReport::Advanced(next),
                None => SubmitReport::Finished,
            },
            Err(e) => SubmitReport::Failed(e),
        }
    }
}
