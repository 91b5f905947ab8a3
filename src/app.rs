use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use eframe::egui;
use tracing::{debug, info, warn};

use crate::config::SubmissionConfig;
use crate::coords::{client_to_raster, DisplayRect, Point, RasterSize};
use crate::input::GestureOutcome;
use crate::media::{FrameSequenceFactory, MediaElement, MediaFactory};
use crate::overlay;
use crate::payload::{timestamp_now, Ratings, ValidationError};
use crate::reference::{load_reference, ReferenceAnnotation, ReferenceSource};
use crate::sequencer::{ClipSequencer, LoadTicket, SessionEvent, SubmitBlocked, SubmitReport};
use crate::submit::{SubmissionClient, SubmitError, Transport};

const TOAST_SECONDS: f64 = 3.0;
/// Longest clock step fed to media elements in one repaint.
const MAX_TICK: f64 = 0.1;

// ── Messages from worker threads ────────────────────────────────────────────

enum AppMessage {
    Reference {
        ticket: LoadTicket,
        reference: Option<ReferenceAnnotation>,
    },
    Submitted {
        ticket: LoadTicket,
        result: Result<(), SubmitError>,
    },
}

struct Toast {
    message: String,
    expires_at: f64,
}

#[derive(Default)]
struct StatusLines {
    video: String,
    annotation: String,
    submission: String,
}

/// Everything the window needs that `main` resolves up front.
pub struct Startup {
    pub sequencer: ClipSequencer,
    pub submission: SubmissionConfig,
    pub start_index: usize,
    pub references: Arc<dyn ReferenceSource>,
    pub transport: Arc<dyn Transport>,
}

// ── App ─────────────────────────────────────────────────────────────────────

pub struct AnnotateApp {
    sequencer: ClipSequencer,
    client: SubmissionClient,
    references: Arc<dyn ReferenceSource>,
    transport: Arc<dyn Transport>,
    ctx: egui::Context,
    tx: Sender<AppMessage>,
    rx: Receiver<AppMessage>,

    video: Option<Box<dyn MediaElement>>,
    video_texture: Option<egui::TextureHandle>,
    video_texture_time: f64,
    frame_texture: Option<egui::TextureHandle>,

    participant_buf: String,
    participant_status: String,
    status: StatusLines,
    toasts: Vec<Toast>,
}

impl AnnotateApp {
    pub fn new(cc: &eframe::CreationContext<'_>, startup: Startup) -> Self {
        egui_extras::install_image_loaders(&cc.egui_ctx);
        let (tx, rx) = mpsc::channel();
        let participant_buf = startup.sequencer.participant_id().to_string();
        let mut app = Self {
            sequencer: startup.sequencer,
            client: SubmissionClient::new(startup.submission),
            references: startup.references,
            transport: startup.transport,
            ctx: cc.egui_ctx.clone(),
            tx,
            rx,
            video: None,
            video_texture: None,
            video_texture_time: -1.0,
            frame_texture: None,
            participant_status: participant_status(&participant_buf).to_string(),
            participant_buf,
            status: StatusLines::default(),
            toasts: Vec::new(),
        };
        if let Some(ticket) = app.sequencer.load(startup.start_index) {
            app.begin_clip(ticket);
        }
        app
    }

    fn toast(&mut self, message: impl Into<String>) {
        let now = self.ctx.input(|i| i.time);
        self.toasts.push(Toast {
            message: message.into(),
            expires_at: now + TOAST_SECONDS,
        });
    }

    fn close_media(&mut self) {
        if let Some(mut video) = self.video.take() {
            video.teardown();
        }
        self.video_texture = None;
        self.video_texture_time = -1.0;
        self.frame_texture = None;
    }

    /// Reset the surface for a freshly loaded clip and fetch its reference.
    fn begin_clip(&mut self, ticket: LoadTicket) {
        self.close_media();
        self.status.video = format!(
            "Loading clip {} of {}...",
            ticket.index + 1,
            self.sequencer.len()
        );
        self.status.annotation = "Watch the clip. The final frame will appear below.".into();
        self.status.submission.clear();

        let source = Arc::clone(&self.references);
        let tx = self.tx.clone();
        let ctx = self.ctx.clone();
        std::thread::spawn(move || {
            let reference = load_reference(source.as_ref(), &ticket.reference_path);
            if tx.send(AppMessage::Reference { ticket, reference }).is_ok() {
                ctx.request_repaint();
            }
        });
    }

    fn open_media(&mut self, src: &str) {
        let Some(session) = self.sequencer.session_mut() else {
            return;
        };
        let factory = FrameSequenceFactory { fps: session.clip().fps };
        self.video = Some(factory.open(src));
        session.start_helper(&factory);
        debug!(src, "media opened");
    }

    fn drain_messages(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            match message {
                AppMessage::Reference { ticket, reference } => {
                    if let Some(src) = self.sequencer.apply_reference(&ticket, reference) {
                        self.open_media(&src);
                    }
                }
                AppMessage::Submitted { ticket, result } => {
                    let report = self.sequencer.finish_submission(&ticket, result);
                    self.on_submit_report(report);
                }
            }
        }
    }

    fn on_submit_report(&mut self, report: SubmitReport) {
        match report {
            SubmitReport::Advanced(next) => {
                self.toast("Submitted.");
                self.begin_clip(next);
            }
            SubmitReport::Finished => {
                self.toast("Submitted.");
                self.close_media();
            }
            SubmitReport::Failed(e) => {
                self.status.submission = format!("Error submitting: {e}");
                self.toast("Error submitting.");
            }
            SubmitReport::Stale => debug!("ignoring submission result for an old clip"),
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Nothing => {}
            SessionEvent::PlaybackStarted => {
                self.status.video = "Playing clip...".into();
            }
            SessionEvent::AutoplayBlocked => {
                self.status.video = "Press Replay to start the clip.".into();
            }
            SessionEvent::Captured(size) => {
                self.upload_captured_frame();
                self.status.video = format!("Final frame captured ({}×{}).", size.width, size.height);
                self.status.annotation =
                    "Draw your incision line on top of the safety corridor.".into();
            }
            SessionEvent::CaptureFailed(e) => {
                self.status.annotation = format!("Unable to capture the final frame: {e}");
                self.toast("Frame capture unavailable for this clip.");
            }
            SessionEvent::LoadFailed(e) => {
                self.status.video = format!("Video failed to load. {e}");
                self.toast("Video failed to load.");
            }
        }
    }

    fn upload_captured_frame(&mut self) {
        let Some(frame) = self.sequencer.session().and_then(|s| s.capture().frame()) else {
            return;
        };
        self.frame_texture = Some(load_rgba(&self.ctx, "captured_frame", &frame.image));
    }

    fn tick_media(&mut self, dt: f64) {
        let dt = dt.min(MAX_TICK);
        let mut events = Vec::new();
        if let (Some(video), Some(session)) = (self.video.as_mut(), self.sequencer.session_mut()) {
            for media_event in video.advance(dt) {
                events.push(session.on_media_event(video.as_mut(), &media_event));
            }
            events.push(session.pump_helper(dt));
        }
        for event in events {
            self.on_session_event(event);
        }
        self.refresh_video_texture();
    }

    /// The clip keeps playing after the still is frozen, so the preview is
    /// refreshed regardless of capture state.
    fn refresh_video_texture(&mut self) {
        let Some(video) = self.video.as_mut() else {
            return;
        };
        if video.video_size().0 == 0 {
            return;
        }
        let t = video.current_time();
        if (t - self.video_texture_time).abs() < f64::EPSILON && self.video_texture.is_some() {
            return;
        }
        match video.read_frame() {
            Ok(image) => {
                self.video_texture = Some(load_rgba(&self.ctx, "video", &image));
                self.video_texture_time = t;
            }
            Err(e) => debug!(error = %e, "video preview frame unavailable"),
        }
    }

    fn replay(&mut self) {
        if let Some(video) = self.video.as_mut() {
            video.seek(0.0);
            if let Err(e) = video.play() {
                warn!(error = %e, "replay refused");
            }
        }
    }

    fn clear_line(&mut self) {
        if let Some(session) = self.sequencer.session_mut() {
            session.clear_line();
            self.status.annotation = "Draw your incision line on the frozen frame.".into();
        }
    }

    fn submit(&mut self) {
        match self.sequencer.begin_submission(&self.client, timestamp_now()) {
            Ok((ticket, request)) => {
                self.status.submission = "Submitting...".into();
                let client = self.client.clone();
                let transport = Arc::clone(&self.transport);
                let tx = self.tx.clone();
                let ctx = self.ctx.clone();
                info!(clip = %ticket.clip_id, "submitting annotation");
                std::thread::spawn(move || {
                    let result = client.deliver(transport.as_ref(), &request);
                    if tx.send(AppMessage::Submitted { ticket, result }).is_ok() {
                        ctx.request_repaint();
                    }
                });
            }
            Err(SubmitBlocked::Submit(SubmitError::InFlight)) => {}
            Err(blocked) => {
                self.status.submission = blocked.to_string();
            }
        }
    }

    // ── UI pieces ───────────────────────────────────────────────────────────

    fn participant_panel(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Participant ID:");
            if ui.text_edit_singleline(&mut self.participant_buf).changed() {
                self.sequencer.set_participant_id(&self.participant_buf);
                self.participant_status = participant_status(&self.participant_buf).to_string();
            }
            ui.label(&self.participant_status);
        });

        let Some(session) = self.sequencer.session_mut() else {
            return;
        };
        let mut ratings: Ratings = session.ratings();
        ui.horizontal(|ui| {
            ui.label("Fatigue:");
            for v in 1..=5u8 {
                ui.selectable_value(&mut ratings.fatigue, Some(v), v.to_string());
            }
            ui.separator();
            ui.label("Confidence:");
            for v in 1..=5u8 {
                ui.selectable_value(&mut ratings.confidence, Some(v), v.to_string());
            }
        });
        if ratings != session.ratings() {
            session.set_ratings(ratings);
        }
    }

    fn controls(&mut self, ui: &mut egui::Ui) {
        let (replay, clear, submit) = match self.sequencer.session() {
            Some(s) => (s.replay_enabled(), s.clear_enabled(), self.sequencer.can_submit()),
            None => (false, false, false),
        };
        let hint = if submit {
            None
        } else {
            blocking_hint(&self.sequencer)
        };
        ui.horizontal(|ui| {
            if ui.add_enabled(replay, egui::Button::new("Replay")).clicked() {
                self.replay();
            }
            if ui.add_enabled(clear, egui::Button::new("Clear line")).clicked() {
                self.clear_line();
            }
            if ui.add_enabled(submit, egui::Button::new("Submit annotation")).clicked() {
                self.submit();
            }
        });
        ui.label(&self.status.video);
        ui.label(&self.status.annotation);
        if let Some(hint) = hint {
            ui.label(hint);
        } else if !self.status.submission.is_empty() {
            ui.label(&self.status.submission);
        }
    }

    fn video_view(&self, ui: &mut egui::Ui, height: f32) {
        let (rect, _) = ui.allocate_exact_size(
            egui::vec2(ui.available_width(), height),
            egui::Sense::hover(),
        );
        ui.painter().rect_filled(rect, 0.0, egui::Color32::BLACK);
        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));
        if let Some(tex) = &self.video_texture {
            let [w, h] = tex.size();
            let fitted = fit(rect, RasterSize::new(w as u32, h as u32));
            ui.painter().image(tex.id(), fitted, uv, egui::Color32::WHITE);
        } else if let Some(poster) = self
            .sequencer
            .session()
            .and_then(|s| s.clip().poster.as_deref())
        {
            let uri = if crate::config::is_remote(poster) {
                poster.to_string()
            } else {
                format!("file://{poster}")
            };
            egui::Image::new(uri).paint_at(ui, rect);
        }
    }

    fn canvas(&mut self, ui: &mut egui::Ui) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let canvas_rect = response.rect;
        painter.rect_filled(canvas_rect, 0.0, egui::Color32::from_gray(40));

        let Some(session) = self.sequencer.session() else {
            return;
        };
        let uv = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));

        let Some(size) = session.capture().raster_size() else {
            painter.text(
                canvas_rect.center(),
                egui::Align2::CENTER_CENTER,
                "The final frame will appear here.",
                egui::FontId::proportional(16.0),
                egui::Color32::GRAY,
            );
            if response.drag_started_by(egui::PointerButton::Primary) {
                self.status.annotation = "Wait for the final frame before drawing.".into();
            }
            return;
        };

        let image_rect = fit(canvas_rect, size);
        if let Some(tex) = &self.frame_texture {
            painter.image(tex.id(), image_rect, uv, egui::Color32::WHITE);
        }
        if let Some(scene) = session.scene() {
            overlay::paint(&scene, &painter, image_rect);
        }

        let display = DisplayRect {
            left: image_rect.min.x,
            top: image_rect.min.y,
            width: image_rect.width(),
            height: image_rect.height(),
        };
        let to_raster = |p: egui::Pos2| client_to_raster(Point::new(p.x, p.y), display, size);
        let pointer = response.interact_pointer_pos();

        let Some(session) = self.sequencer.session_mut() else {
            return;
        };
        if response.drag_started_by(egui::PointerButton::Primary) {
            if let Some(pos) = pointer.filter(|p| image_rect.contains(*p)) {
                session.pointer_down(to_raster(pos));
            }
        }
        if response.dragged_by(egui::PointerButton::Primary) && session.input().is_drawing() {
            match pointer {
                Some(pos) if image_rect.contains(pos) => {
                    session.pointer_move(to_raster(pos));
                }
                _ => {
                    let outcome = session.pointer_leave();
                    self.on_release(outcome);
                }
            }
        }
        let Some(session) = self.sequencer.session_mut() else {
            return;
        };
        if response.drag_stopped_by(egui::PointerButton::Primary) && session.input().is_drawing() {
            let outcome = session.pointer_up();
            self.on_release(outcome);
        }
    }

    fn on_release(&mut self, outcome: GestureOutcome) {
        match outcome {
            GestureOutcome::Committed => {
                self.status.annotation = "Line recorded. Submit when ready.".into();
            }
            GestureOutcome::TooShort => {
                self.status.annotation = "Line too short. Please redraw.".into();
            }
            GestureOutcome::Paused => {
                self.status.annotation =
                    "Drawing paused outside the frame. Clear or redraw the line.".into();
            }
            _ => {}
        }
    }

    fn show_toasts(&mut self, ctx: &egui::Context) {
        let now = ctx.input(|i| i.time);
        self.toasts.retain(|t| t.expires_at > now);
        if self.toasts.is_empty() {
            return;
        }
        egui::Area::new(egui::Id::new("toasts"))
            .anchor(egui::Align2::RIGHT_BOTTOM, egui::vec2(-16.0, -16.0))
            .order(egui::Order::Foreground)
            .show(ctx, |ui| {
                for toast in &self.toasts {
                    egui::Frame::popup(ui.style()).show(ui, |ui| {
                        ui.label(&toast.message);
                    });
                }
            });
        ctx.request_repaint_after(std::time::Duration::from_millis(250));
    }
}

/// Inline reason the submit control is disabled. Missing frame or line are
/// already covered by the annotation status line.
fn blocking_hint(sequencer: &ClipSequencer) -> Option<String> {
    let session = sequencer.session()?;
    if session.is_submitting() || !session.capture().is_captured() {
        return None;
    }
    match sequencer.payload(String::new()) {
        Err(SubmitBlocked::Invalid(ValidationError::NoFrame | ValidationError::NoLine)) => None,
        Err(blocked) => Some(blocked.to_string()),
        Ok(_) => None,
    }
}

fn participant_status(id: &str) -> &'static str {
    if id.trim().is_empty() {
        "Please enter your participant ID."
    } else {
        "Participant ID recorded."
    }
}

fn fit(outer: egui::Rect, size: RasterSize) -> egui::Rect {
    let r = DisplayRect::contain(
        DisplayRect {
            left: outer.min.x,
            top: outer.min.y,
            width: outer.width(),
            height: outer.height(),
        },
        size,
    );
    egui::Rect::from_min_size(egui::pos2(r.left, r.top), egui::vec2(r.width, r.height))
}

fn load_rgba(ctx: &egui::Context, name: &str, image: &image::RgbaImage) -> egui::TextureHandle {
    let size = [image.width() as usize, image.height() as usize];
    let color_image = egui::ColorImage::from_rgba_unmultiplied(size, image.as_raw());
    ctx.load_texture(name, color_image, egui::TextureOptions::LINEAR)
}

// ── eframe App impl ────────────────────────────────────────────────────────

impl eframe::App for AnnotateApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_messages();

        if self.sequencer.is_finished() {
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.centered_and_justified(|ui| {
                    ui.heading("Thank you for completing all annotations!");
                });
            });
            self.show_toasts(ctx);
            return;
        }

        let dt = ctx.input(|i| i.stable_dt) as f64;
        self.tick_media(dt);

        // Delete clears the line unless a text field has focus
        if !ctx.wants_keyboard_input()
            && ctx.input(|i| i.key_pressed(egui::Key::Delete) || i.key_pressed(egui::Key::Backspace))
        {
            self.clear_line();
        }

        egui::TopBottomPanel::top("participant").show(ctx, |ui| {
            self.participant_panel(ui);
        });

        egui::TopBottomPanel::bottom("controls").show(ctx, |ui| {
            self.controls(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            if let Some(session) = self.sequencer.session() {
                ui.label(format!(
                    "{} ({} of {})",
                    session.clip().label,
                    session.ticket().index + 1,
                    self.sequencer.len()
                ));
            }
            let video_height = (ui.available_height() * 0.4).max(120.0);
            self.video_view(ui, video_height);
            ui.separator();
            self.canvas(ui);
        });

        self.show_toasts(ctx);

        let busy = self.video.as_ref().is_some_and(|v| v.is_playing())
            || self
                .sequencer
                .session()
                .is_some_and(|s| s.capture().has_helper() || s.is_submitting() || !s.capture().is_captured());
        if busy {
            ctx.request_repaint();
        }
    }
}
