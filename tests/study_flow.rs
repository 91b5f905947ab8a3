use std::collections::HashMap;
use std::sync::Mutex;

use image::{Rgba, RgbaImage};
use serde_json::json;

use incision_annotate::capture::CaptureOrigin;
use incision_annotate::config::StudyConfig;
use incision_annotate::coords::Point;
use incision_annotate::input::GestureOutcome;
use incision_annotate::media::{CaptureError, MediaElement, MediaEvent, MediaFactory, PlaybackError};
use incision_annotate::reference::{load_reference, ReferenceError, ReferenceSource};
use incision_annotate::sequencer::{
    ClipSequencer, LoadTicket, ReferenceState, SessionEvent, SessionSettings, SubmitReport,
};
use incision_annotate::submit::{SubmissionClient, SubmissionRequest, SubmitError, Transport};

// ── Fixtures ────────────────────────────────────────────────────────────────

/// Clock-driven element: loads on the first tick, plays in `dt` steps, and
/// reports a seek on the tick after it happens.
struct ScriptedElement {
    src: String,
    size: (u32, u32),
    duration: f64,
    time: f64,
    loaded: bool,
    playing: bool,
    pending_seek: bool,
}

impl MediaElement for ScriptedElement {
    fn src(&self) -> &str {
        &self.src
    }
    fn video_size(&self) -> (u32, u32) {
        if self.loaded {
            self.size
        } else {
            (0, 0)
        }
    }
    fn duration(&self) -> f64 {
        if self.loaded {
            self.duration
        } else {
            0.0
        }
    }
    fn current_time(&self) -> f64 {
        self.time
    }
    fn is_playing(&self) -> bool {
        self.playing
    }
    fn play(&mut self) -> Result<(), PlaybackError> {
        self.playing = true;
        Ok(())
    }
    fn pause(&mut self) {
        self.playing = false;
    }
    fn seek(&mut self, seconds: f64) {
        self.time = seconds.clamp(0.0, self.duration);
        self.pending_seek = true;
    }
    fn set_muted(&mut self, _muted: bool) {}
    fn advance(&mut self, dt: f64) -> Vec<MediaEvent> {
        if !self.loaded {
            if self.src.contains("missing") {
                return vec![MediaEvent::Error("not found".into())];
            }
            self.loaded = true;
            return vec![MediaEvent::LoadedMetadata, MediaEvent::LoadedData];
        }
        let mut events = Vec::new();
        if std::mem::take(&mut self.pending_seek) {
            events.push(MediaEvent::Seeked);
        }
        if self.playing {
            self.time = (self.time + dt).min(self.duration);
            events.push(MediaEvent::TimeUpdate);
            if self.time >= self.duration {
                self.playing = false;
                events.push(MediaEvent::Ended);
            }
        }
        events
    }
    fn read_frame(&mut self) -> Result<RgbaImage, CaptureError> {
        Ok(RgbaImage::from_pixel(self.size.0, self.size.1, Rgba([30, 30, 30, 255])))
    }
    fn teardown(&mut self) {
        self.loaded = false;
        self.playing = false;
    }
}

struct ScriptedFactory;

impl MediaFactory for ScriptedFactory {
    fn open(&self, src: &str) -> Box<dyn MediaElement> {
        Box::new(ScriptedElement {
            src: src.to_string(),
            size: (640, 360),
            duration: 5.0,
            time: 0.0,
            loaded: false,
            playing: false,
            pending_seek: false,
        })
    }
}

/// In-memory reference store keyed by location.
struct MapSource(HashMap<String, String>);

impl ReferenceSource for MapSource {
    fn fetch(&self, location: &str) -> Result<Option<String>, ReferenceError> {
        Ok(self.0.get(location).cloned())
    }
}

/// Records every request and answers with a fixed status.
struct RecordingTransport {
    status: u16,
    sent: Mutex<Vec<SubmissionRequest>>,
}

impl RecordingTransport {
    fn new(status: u16) -> Self {
        Self {
            status,
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl Transport for RecordingTransport {
    fn send(&self, request: &SubmissionRequest) -> Result<u16, SubmitError> {
        self.sent.lock().unwrap().push(request.clone());
        Ok(self.status)
    }
}

fn study() -> StudyConfig {
    let text = json!({
        "clips": [
            { "id": "c1", "label": "Clip 1", "src": "clips/c1", "annotationType": "gt" },
            { "id": "c2", "label": "Clip 2", "src": "clips/c2", "annotationType": "gt" }
        ],
        "submission": { "endpoint": "https://collector.example/f/abc" },
        "annotationsRoot": "refs/"
    })
    .to_string();
    StudyConfig::from_json(&text, std::path::Path::new("study.json")).unwrap()
}

fn sequencer(config: &StudyConfig) -> ClipSequencer {
    ClipSequencer::new(
        config.clips.clone(),
        SessionSettings::from(config),
        config.annotations_root(),
    )
    .unwrap()
}

fn c2_reference() -> MapSource {
    let doc = json!({ "lines": [ { "points": [ { "x": 0.2, "y": 0.1 }, { "x": 0.8, "y": 0.9 } ] } ] });
    MapSource(HashMap::from([(
        "refs/expert-annotations/c2.json".to_string(),
        doc.to_string(),
    )]))
}

/// Fetch the reference, open both elements, and tick until a frame is frozen.
fn settle_and_capture(
    seq: &mut ClipSequencer,
    ticket: &LoadTicket,
    source: &dyn ReferenceSource,
) -> Box<dyn MediaElement> {
    let reference = load_reference(source, &ticket.reference_path);
    let src = seq.apply_reference(ticket, reference).expect("ticket is current");
    let mut visible = ScriptedFactory.open(&src);
    let session = seq.session_mut().unwrap();
    session.start_helper(&ScriptedFactory);

    for _ in 0..100 {
        for event in visible.advance(0.1) {
            session.on_media_event(visible.as_mut(), &event);
        }
        session.pump_helper(0.1);
        if session.capture().is_captured() {
            break;
        }
    }
    assert!(session.capture().is_captured());
    visible
}

fn draw(seq: &mut ClipSequencer, from: Point, to: Point) {
    let session = seq.session_mut().unwrap();
    assert_eq!(session.pointer_down(from), GestureOutcome::Started);
    session.pointer_move(to);
    assert_eq!(session.pointer_up(), GestureOutcome::Committed);
}

fn submit(
    seq: &mut ClipSequencer,
    client: &SubmissionClient,
    transport: &dyn Transport,
) -> SubmitReport {
    let (ticket, request) = seq
        .begin_submission(client, "2026-10-18T10:00:00.000Z".into())
        .unwrap();
    let result = client.deliver(transport, &request);
    seq.finish_submission(&ticket, result)
}

// ── Scenarios ───────────────────────────────────────────────────────────────

#[test]
fn two_clip_study_submits_and_advances() {
    let config = study();
    let client = SubmissionClient::new(config.submission.clone());
    let transport = RecordingTransport::new(200);
    let source = c2_reference();
    let mut seq = sequencer(&config);
    seq.set_participant_id("P1");

    let first = seq.load(0).unwrap();
    settle_and_capture(&mut seq, &first, &source);
    assert_eq!(seq.session().unwrap().reference_state(), &ReferenceState::Absent);
    let frame = seq.session().unwrap().capture().frame().unwrap();
    assert_eq!(frame.origin, CaptureOrigin::Helper);
    assert_eq!((frame.size.width, frame.size.height), (640, 360));

    draw(&mut seq, Point::new(100.0, 100.0), Point::new(300.0, 200.0));
    let report = submit(&mut seq, &client, &transport);

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].url, "https://collector.example/f/abc");
    assert_eq!(sent[0].method, "POST");
    let body = &sent[0].body["annotation"];
    assert_eq!(body["clipId"], "c1");
    assert_eq!(body["participantId"], "P1");
    assert_eq!(body["canvasSize"], json!({ "width": 640, "height": 360 }));
    let coord = |p: &str, axis: &str| body["incision"][p][axis].as_f64().unwrap();
    assert!((coord("start", "x") - 0.15625).abs() < 1e-4);
    assert!((coord("start", "y") - 0.27778).abs() < 1e-4);
    assert!((coord("end", "x") - 0.46875).abs() < 1e-4);
    assert!((coord("end", "y") - 0.55556).abs() < 1e-4);
    drop(sent);

    let SubmitReport::Advanced(second) = report else {
        panic!("expected to advance, got {report:?}");
    };
    assert_eq!(second.index, 1);
    assert_eq!(second.clip_id, "c2");
    let session = seq.session().unwrap();
    assert!(!session.capture().is_captured());
    assert!(session.line().is_none());

    settle_and_capture(&mut seq, &second, &source);
    let scene = seq.session().unwrap().scene().unwrap();
    assert_eq!(scene.reference_paths(), 1);
    assert_eq!(scene.user_paths(), 0);
}

#[test]
fn clip_keeps_playing_after_helper_freezes_frame() {
    let config = study();
    let mut seq = sequencer(&config);
    let ticket = seq.load(0).unwrap();
    let mut visible = settle_and_capture(&mut seq, &ticket, &MapSource(HashMap::new()));
    let session = seq.session_mut().unwrap();

    assert_eq!(session.capture().frame().unwrap().origin, CaptureOrigin::Helper);
    assert!(visible.is_playing());
    assert!(visible.current_time() < 1.0);

    let mut ended = false;
    for _ in 0..100 {
        for event in visible.advance(0.1) {
            ended |= event == MediaEvent::Ended;
            assert_eq!(session.on_media_event(visible.as_mut(), &event), SessionEvent::Nothing);
        }
        if ended {
            break;
        }
    }
    assert!(ended);
    assert!((visible.current_time() - 5.0).abs() < 1e-9);
    assert_eq!(session.capture().frame().unwrap().origin, CaptureOrigin::Helper);

    // replay rewinds the visible clip and leaves the still alone
    visible.seek(0.0);
    visible.play().unwrap();
    let events = visible.advance(0.1);
    assert!(events.contains(&MediaEvent::Seeked));
    assert!(visible.is_playing());
    assert!(visible.current_time() < 1.0);
    assert!(session.capture().is_captured());
}

#[test]
fn server_error_keeps_clip_line_and_frame() {
    let config = study();
    let client = SubmissionClient::new(config.submission.clone());
    let transport = RecordingTransport::new(500);
    let mut seq = sequencer(&config);
    seq.set_participant_id("P1");

    let ticket = seq.load(0).unwrap();
    settle_and_capture(&mut seq, &ticket, &MapSource(HashMap::new()));
    draw(&mut seq, Point::new(10.0, 10.0), Point::new(200.0, 90.0));

    let report = submit(&mut seq, &client, &transport);
    assert_eq!(report, SubmitReport::Failed(SubmitError::Status(500)));
    assert_eq!(seq.current_index(), Some(0));
    let session = seq.session().unwrap();
    assert!(session.capture().is_captured());
    assert!(session.line().is_some());
    assert!(!session.is_submitting());
    assert!(seq.can_submit());
}

#[test]
fn missing_reference_still_allows_annotation() {
    let config = study();
    let mut seq = sequencer(&config);
    let ticket = seq.load(0).unwrap();
    settle_and_capture(&mut seq, &ticket, &MapSource(HashMap::new()));

    let session = seq.session().unwrap();
    assert_eq!(session.reference_state(), &ReferenceState::Absent);
    assert_eq!(session.scene().unwrap().reference_paths(), 0);
    draw(&mut seq, Point::new(0.0, 0.0), Point::new(50.0, 50.0));
}

#[test]
fn late_reference_for_previous_clip_is_ignored() {
    let config = study();
    let source = c2_reference();
    let mut seq = sequencer(&config);

    let first = seq.load(0).unwrap();
    let second = seq.load(1).unwrap();
    let stale = load_reference(&source, "refs/expert-annotations/c2.json");
    assert!(stale.is_some());
    assert_eq!(seq.apply_reference(&first, stale), None);
    assert_eq!(seq.session().unwrap().reference_state(), &ReferenceState::Pending);

    settle_and_capture(&mut seq, &second, &source);
    assert_eq!(seq.session().unwrap().clip().id, "c2");
}

#[test]
fn completion_is_reported_once() {
    let config = study();
    let client = SubmissionClient::new(config.submission.clone());
    let transport = RecordingTransport::new(201);
    let source = c2_reference();
    let mut seq = sequencer(&config);
    seq.set_participant_id("P9");

    let mut ticket = seq.load(0).unwrap();
    let mut finished = 0;
    loop {
        settle_and_capture(&mut seq, &ticket, &source);
        draw(&mut seq, Point::new(20.0, 20.0), Point::new(120.0, 60.0));
        match submit(&mut seq, &client, &transport) {
            SubmitReport::Advanced(next) => ticket = next,
            SubmitReport::Finished => {
                finished += 1;
                break;
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(finished, 1);
    assert!(seq.is_finished());
    assert_eq!(transport.sent.lock().unwrap().len(), 2);
    assert_eq!(seq.finish_submission(&ticket, Ok(())), SubmitReport::Stale);
    assert_eq!(seq.load(0), None);
}

#[test]
fn unloadable_clip_pauses_the_sequence() {
    let text = json!({
        "clips": [ { "id": "bad", "label": "Bad", "src": "clips/missing" } ],
        "submission": { "endpoint": "https://collector.example/f/abc" }
    })
    .to_string();
    let config = StudyConfig::from_json(&text, std::path::Path::new("s.json")).unwrap();
    let mut seq = sequencer(&config);
    seq.set_participant_id("P1");

    let ticket = seq.load(0).unwrap();
    let src = seq.apply_reference(&ticket, None).unwrap();
    let mut visible = ScriptedFactory.open(&src);
    let session = seq.session_mut().unwrap();
    let events = visible.advance(0.1);
    let outcome = session.on_media_event(visible.as_mut(), &events[0]);

    assert!(matches!(outcome, SessionEvent::LoadFailed(_)));
    assert!(!session.replay_enabled());
    assert!(!seq.can_submit());
    assert_eq!(seq.current_index(), Some(0));
}
