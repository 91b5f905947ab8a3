#![forbid(unsafe_code)]

pub mod app;
pub mod capture;
pub mod config;
pub mod coords;
pub mod input;
pub mod media;
pub mod overlay;
pub mod payload;
pub mod reference;
pub mod sequencer;
pub mod submit;

pub use app::{AnnotateApp, Startup};
pub use capture::{CaptureOrigin, CaptureOutcome, CapturedFrame, FrameCapture};
pub use config::{AnnotationType, ClipDescriptor, ConfigError, DeepLink, LineMode, StudyConfig, SubmissionConfig};
pub use coords::{Point, RasterSize};
pub use input::{AnnotationInput, GestureOutcome, InputState, UserLine};
pub use media::{CaptureError, MediaElement, MediaEvent, MediaFactory};
pub use payload::{Ratings, SubmissionPayload, ValidationError};
pub use reference::{ReferenceAnnotation, ReferenceSource};
pub use sequencer::{ClipSequencer, ClipSession, LoadTicket, SessionEvent, SubmitReport};
pub use submit::{SubmissionClient, SubmitError, Transport};
