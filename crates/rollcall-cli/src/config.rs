use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Runtime configuration: defaults, then the TOML file, then `ROLLCALL_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Registry root: one sub-directory of reference images per person.
    pub images_dir: PathBuf,
    /// Attendance CSV.
    pub ledger_path: PathBuf,
    /// Maximum Euclidean embedding distance accepted as a match.
    pub distance_threshold: f32,
    /// Frames discarded after opening the camera while exposure settles.
    pub warmup_frames: usize,
    /// Camera frames captured by `register` when no image files are given.
    pub frames_per_register: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: rollcall_core::default_model_dir(),
            images_dir: PathBuf::from("images"),
            ledger_path: PathBuf::from("Attendance.csv"),
            // Unit-length ArcFace embeddings; 1.10 ≈ cosine similarity 0.40.
            distance_threshold: 1.10,
            warmup_frames: 4,
            frames_per_register: 5,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_IMAGES_DIR") {
            self.images_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_LEDGER_PATH") {
            self.ledger_path = PathBuf::from(v);
        }
        parse_into(&lookup, "ROLLCALL_DISTANCE_THRESHOLD", &mut self.distance_threshold);
        parse_into(&lookup, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames);
        parse_into(&lookup, "ROLLCALL_FRAMES_PER_REGISTER", &mut self.frames_per_register);
    }

    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::DETECTOR_MODEL)
            .to_string_lossy()
            .into_owned()
    }

    pub fn recognizer_model_path(&self) -> String {
        self.model_dir
            .join(rollcall_core::RECOGNIZER_MODEL)
            .to_string_lossy()
            .into_owned()
    }
}

/// `$ROLLCALL_CONFIG`, else `$XDG_CONFIG_HOME/rollcall/config.toml`.
fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;
    Some(base.join("rollcall").join("config.toml"))
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = lookup(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
        }
    }
}
