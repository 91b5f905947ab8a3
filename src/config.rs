//! Study configuration: the clip list, submission target, and per-study
//! switches, loaded once at startup from a JSON file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read study config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid study config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("study config contains no clips")]
    NoClips,

    #[error("duplicate clip id {0:?}")]
    DuplicateClip(String),

    #[error("no clip with id {0:?}")]
    UnknownClip(String),

    #[error("clip index {index} out of range (study has {len} clips)")]
    ClipIndexOutOfRange { index: usize, len: usize },
}

// ── Clips ───────────────────────────────────────────────────────────────────

/// Which reference folder a clip's overlay comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationType {
    #[default]
    Gt,
    Mock,
}

impl AnnotationType {
    pub fn base_path(self) -> &'static str {
        match self {
            AnnotationType::Gt => "expert-annotations/",
            AnnotationType::Mock => "mock-annotations/",
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            AnnotationType::Gt => "_gt.json",
            AnnotationType::Mock => "_mock.json",
        }
    }
}

fn default_fps() -> f32 {
    25.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipDescriptor {
    pub id: String,
    pub label: String,
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster: Option<String>,
    #[serde(default)]
    pub annotation_type: AnnotationType,
    #[serde(default = "default_fps")]
    pub fps: f32,
}

impl ClipDescriptor {
    /// Id used to look up the reference file: a trailing `_gt` or `_mock`
    /// variant marker is dropped so both variants share one base name.
    pub fn reference_key(&self) -> &str {
        self.id
            .strip_suffix("_gt")
            .or_else(|| self.id.strip_suffix("_mock"))
            .unwrap_or(&self.id)
    }

    /// Clip built from a bare source, for `--video` deep links.
    pub fn ad_hoc(src: &str) -> Self {
        let label = Path::new(src)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(src)
            .to_string();
        Self {
            id: "adhoc".to_string(),
            label,
            src: src.to_string(),
            poster: None,
            annotation_type: AnnotationType::Gt,
            fps: default_fps(),
        }
    }
}

// ── Submission target ───────────────────────────────────────────────────────

fn default_method() -> String {
    "POST".to_string()
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())])
}

fn default_wrapper() -> Option<String> {
    Some("annotation".to_string())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionConfig {
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
    /// Key the payload is nested under; `null` in the file sends it bare.
    #[serde(default = "default_wrapper")]
    pub body_wrapper: Option<String>,
    #[serde(default)]
    pub additional_fields: serde_json::Map<String, serde_json::Value>,
}

impl SubmissionConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: default_method(),
            headers: default_headers(),
            body_wrapper: default_wrapper(),
            additional_fields: serde_json::Map::new(),
        }
    }
}

// ── Study ───────────────────────────────────────────────────────────────────

/// Shape of the participant's line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineMode {
    #[default]
    Segment,
    Polyline,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyConfig {
    pub clips: Vec<ClipDescriptor>,
    pub submission: SubmissionConfig,
    /// Prefix for reference files: an `http(s)://` URL or a directory.
    #[serde(default)]
    pub annotations_root: Option<String>,
    #[serde(default)]
    pub line_mode: LineMode,
    /// Leaving the canvas mid-gesture commits the line instead of pausing it.
    #[serde(default)]
    pub leave_releases: bool,
    #[serde(default)]
    pub require_fatigue: bool,
}

impl StudyConfig {
    pub fn from_json(text: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read, parse, validate, and resolve relative paths against the file's
    /// directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&text, path)?;
        config.validate()?;
        let base = path.parent().unwrap_or(Path::new("."));
        config.resolve_relative(base);
        info!(path = %path.display(), clips = config.clips.len(), "loaded study config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.clips.is_empty() {
            return Err(ConfigError::NoClips);
        }
        let mut seen = std::collections::HashSet::new();
        for clip in &self.clips {
            if !seen.insert(clip.id.as_str()) {
                return Err(ConfigError::DuplicateClip(clip.id.clone()));
            }
        }
        Ok(())
    }

    pub fn resolve_relative(&mut self, base: &Path) {
        for clip in &mut self.clips {
            clip.src = resolve_location(base, &clip.src);
            clip.poster = clip
                .poster
                .take()
                .filter(|p| !p.is_empty())
                .map(|p| resolve_location(base, &p));
        }
        let root = self.annotations_root.take().unwrap_or_default();
        self.annotations_root = Some(if root.is_empty() {
            with_trailing_slash(&base.display().to_string())
        } else {
            with_trailing_slash(&resolve_location(base, &root))
        });
        debug!(root = ?self.annotations_root, "resolved annotations root");
    }

    pub fn annotations_root(&self) -> &str {
        self.annotations_root.as_deref().unwrap_or("")
    }
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

fn resolve_location(base: &Path, location: &str) -> String {
    if is_remote(location) || Path::new(location).is_absolute() {
        location.to_string()
    } else {
        base.join(location).display().to_string()
    }
}

fn with_trailing_slash(s: &str) -> String {
    if s.is_empty() || s.ends_with('/') {
        s.to_string()
    } else {
        format!("{s}/")
    }
}

// ── Deep links ──────────────────────────────────────────────────────────────

/// Starting-point overrides, the desktop counterpart of `?clip=`,
/// `?clipIndex=` and `?video=`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeepLink {
    pub clip: Option<String>,
    pub clip_index: Option<usize>,
    pub video: Option<String>,
}

impl DeepLink {
    /// Apply to the clip list and return the index to start from. An ad-hoc
    /// video is inserted at the front and wins over the other two.
    pub fn resolve(&self, clips: &mut Vec<ClipDescriptor>) -> Result<usize, ConfigError> {
        if let Some(src) = &self.video {
            clips.insert(0, ClipDescriptor::ad_hoc(src));
            return Ok(0);
        }
        if let Some(id) = &self.clip {
            return clips
                .iter()
                .position(|c| &c.id == id)
                .ok_or_else(|| ConfigError::UnknownClip(id.clone()));
        }
        if let Some(index) = self.clip_index {
            if index >= clips.len() {
                return Err(ConfigError::ClipIndexOutOfRange { index, len: clips.len() });
            }
            return Ok(index);
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(id: &str) -> ClipDescriptor {
        ClipDescriptor {
            id: id.to_string(),
            label: id.to_string(),
            src: format!("{id}.mp4"),
            poster: None,
            annotation_type: AnnotationType::Gt,
            fps: 25.0,
        }
    }

    #[test]
    fn parses_web_style_config_with_defaults() {
        let text = r#"{
            "clips": [
                { "id": "clip_01_mock", "label": "Clip 1 Mock", "src": "clip_01", "poster": "", "annotationType": "mock" }
            ],
            "submission": { "endpoint": "https://collector.example/f/abc" }
        }"#;
        let config = StudyConfig::from_json(text, Path::new("study.json")).unwrap();
        assert_eq!(config.clips[0].annotation_type, AnnotationType::Mock);
        assert_eq!(config.clips[0].fps, 25.0);
        assert_eq!(config.submission.method, "POST");
        assert_eq!(config.submission.body_wrapper.as_deref(), Some("annotation"));
        assert_eq!(
            config.submission.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(config.line_mode, LineMode::Segment);
        assert!(!config.require_fatigue);
    }

    #[test]
    fn null_wrapper_means_unwrapped() {
        let text = r#"{ "clips": [], "submission": { "endpoint": "x", "bodyWrapper": null } }"#;
        let config = StudyConfig::from_json(text, Path::new("s.json")).unwrap();
        assert_eq!(config.submission.body_wrapper, None);
        assert!(matches!(config.validate(), Err(ConfigError::NoClips)));
    }

    #[test]
    fn reference_key_strips_variant_suffix() {
        assert_eq!(clip("clip_03_gt").reference_key(), "clip_03");
        assert_eq!(clip("clip_03_mock").reference_key(), "clip_03");
        assert_eq!(clip("clip_03").reference_key(), "clip_03");
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let mut config = StudyConfig {
            clips: vec![clip("a")],
            submission: SubmissionConfig::new("https://x"),
            annotations_root: None,
            line_mode: LineMode::Segment,
            leave_releases: false,
            require_fatigue: false,
        };
        config.clips[0].src = "https://cdn.example/a.mp4".to_string();
        config.resolve_relative(Path::new("/data/study"));
        assert_eq!(config.clips[0].src, "https://cdn.example/a.mp4");
        assert_eq!(config.annotations_root(), "/data/study/");
    }

    #[test]
    fn deep_link_by_id_and_index() {
        let mut clips = vec![clip("c1"), clip("c2"), clip("c3")];
        let link = DeepLink { clip: Some("c2".into()), ..Default::default() };
        assert_eq!(link.resolve(&mut clips).unwrap(), 1);

        let link = DeepLink { clip_index: Some(2), ..Default::default() };
        assert_eq!(link.resolve(&mut clips).unwrap(), 2);

        let link = DeepLink { clip_index: Some(9), ..Default::default() };
        assert!(matches!(
            link.resolve(&mut clips),
            Err(ConfigError::ClipIndexOutOfRange { index: 9, len: 3 })
        ));

        let link = DeepLink { clip: Some("nope".into()), ..Default::default() };
        assert!(matches!(link.resolve(&mut clips), Err(ConfigError::UnknownClip(_))));
    }

    #[test]
    fn deep_link_video_injects_ad_hoc_clip() {
        let mut clips = vec![clip("c1")];
        let link = DeepLink {
            video: Some("/tmp/frames/case_7".into()),
            clip: Some("c1".into()),
            ..Default::default()
        };
        assert_eq!(link.resolve(&mut clips).unwrap(), 0);
        assert_eq!(clips.len(), 2);
        assert_eq!(clips[0].id, "adhoc");
        assert_eq!(clips[0].label, "case_7");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let config = StudyConfig {
            clips: vec![clip("a"), clip("a")],
            submission: SubmissionConfig::new("x"),
            annotations_root: None,
            line_mode: LineMode::Segment,
            leave_releases: false,
            require_fatigue: false,
        };
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateClip(_))));
    }
}
