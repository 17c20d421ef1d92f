use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Application configuration: defaults, then a TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory of `<Name>_<Roll>` reference images.
    pub gallery_dir: PathBuf,
    /// Directory for daily ledgers and summaries.
    pub records_dir: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub match_threshold: f32,
    /// Run detection on every Nth frame.
    pub detect_every: u32,
    /// Detection runs at 1/N of the captured resolution.
    pub detect_scale: u32,
    /// How long one control poll waits for input.
    pub poll_interval_ms: u64,
    /// Number of warmup frames to discard after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Face analyzer helper, split on whitespace.
    pub analyzer_command: String,
    /// Text-to-speech command; the message is appended as the last argument.
    pub speech_command: Option<String>,
    /// Seed the seen-set from today's ledger when a session starts.
    pub resume_day: bool,
}

/// On-disk form. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    gallery_dir: Option<PathBuf>,
    records_dir: Option<PathBuf>,
    match_threshold: Option<f32>,
    detect_every: Option<u32>,
    detect_scale: Option<u32>,
    poll_interval_ms: Option<u64>,
    warmup_frames: Option<usize>,
    analyzer_command: Option<String>,
    speech_command: Option<String>,
    resume_day: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            gallery_dir: data_dir.join("known_faces"),
            records_dir: data_dir.join("attendance_records"),
            match_threshold: rollcall_core::DEFAULT_MATCH_THRESHOLD,
            detect_every: 2,
            detect_scale: 4,
            poll_interval_ms: 10,
            warmup_frames: 4,
            analyzer_command: "rollcall-analyzer".to_string(),
            speech_command: None,
            resume_day: true,
        }
    }
}

impl Config {
    /// Load the layered configuration. An explicit `path` must exist; the
    /// default location is read only if present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        };
        if let Some(file) = file {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read config {}", file.display()))?;
            config.apply_toml(&raw)
                .with_context(|| format!("invalid config {}", file.display()))?;
            tracing::debug!(path = %file.display(), "config file loaded");
        }

        config.apply_env(|key| std::env::var(key).ok());
        config.normalize();
        Ok(config)
    }

    fn apply_toml(&mut self, raw: &str) -> Result<()> {
        let file: FileConfig = toml::from_str(raw)?;
        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.gallery_dir {
            self.gallery_dir = v;
        }
        if let Some(v) = file.records_dir {
            self.records_dir = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.detect_every {
            self.detect_every = v;
        }
        if let Some(v) = file.detect_scale {
            self.detect_scale = v;
        }
        if let Some(v) = file.poll_interval_ms {
            self.poll_interval_ms = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        if let Some(v) = file.analyzer_command {
            self.analyzer_command = v;
        }
        if file.speech_command.is_some() {
            self.speech_command = file.speech_command;
        }
        if let Some(v) = file.resume_day {
            self.resume_day = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("ROLLCALL_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_RECORDS_DIR") {
            self.records_dir = PathBuf::from(v);
        }
        self.match_threshold = env_parse(&lookup, "ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.detect_every = env_parse(&lookup, "ROLLCALL_DETECT_EVERY", self.detect_every);
        self.detect_scale = env_parse(&lookup, "ROLLCALL_DETECT_SCALE", self.detect_scale);
        self.poll_interval_ms = env_parse(&lookup, "ROLLCALL_POLL_INTERVAL_MS", self.poll_interval_ms);
        self.warmup_frames = env_parse(&lookup, "ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
        if let Some(v) = lookup("ROLLCALL_ANALYZER_CMD") {
            self.analyzer_command = v;
        }
        if let Some(v) = lookup("ROLLCALL_SPEECH_CMD") {
            self.speech_command = Some(v).filter(|s| !s.trim().is_empty());
        }
        if let Some(v) = lookup("ROLLCALL_RESUME_DAY") {
            self.resume_day = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    fn normalize(&mut self) {
        let defaults = Self::default();
        if !self.match_threshold.is_finite() || self.match_threshold < 0.0 {
            tracing::warn!(value = self.match_threshold, "invalid match threshold, using default");
            self.match_threshold = defaults.match_threshold;
        }
        self.detect_every = self.detect_every.max(1);
        self.detect_scale = self.detect_scale.max(1);
    }
}

fn env_parse<T: std::str::FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable value, ignoring");
            current
        }),
        None => current,
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;
    Some(base.join("rollcall").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.match_threshold, 0.6);
        assert_eq!((c.detect_every, c.detect_scale), (2, 4));
        assert!(c.gallery_dir.ends_with("rollcall/known_faces"));
        assert!(c.records_dir.ends_with("rollcall/attendance_records"));
        assert!(c.resume_day);
        assert!(c.speech_command.is_none());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let mut c = Config::default();
        c.apply_toml(
            r#"
            camera_device = "/dev/video2"
            match_threshold = 0.5
            gallery_dir = "/srv/faces"
            speech_command = "espeak"
            "#,
        )
        .unwrap();
        assert_eq!(c.camera_device, "/dev/video2");
        assert_eq!(c.match_threshold, 0.5);
        assert_eq!(c.gallery_dir, PathBuf::from("/srv/faces"));
        assert_eq!(c.speech_command.as_deref(), Some("espeak"));
        assert_eq!(c.detect_every, 2);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        let mut c = Config::default();
        assert!(c.apply_toml("treshold = 0.5").is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut c = Config::default();
        c.apply_toml("detect_every = 3\nresume_day = true").unwrap();
        c.apply_env(env(&[("ROLLCALL_DETECT_EVERY", "5"), ("ROLLCALL_RESUME_DAY", "0")]));
        assert_eq!(c.detect_every, 5);
        assert!(!c.resume_day);
    }

    #[test]
    fn test_bad_env_value_keeps_previous() {
        let mut c = Config::default();
        c.apply_env(env(&[("ROLLCALL_MATCH_THRESHOLD", "close"), ("ROLLCALL_DETECT_SCALE", "-1")]));
        assert_eq!(c.match_threshold, 0.6);
        assert_eq!(c.detect_scale, 4);
    }

    #[test]
    fn test_normalize_clamps() {
        let mut c = Config::default();
        c.apply_env(env(&[("ROLLCALL_DETECT_EVERY", "0"), ("ROLLCALL_MATCH_THRESHOLD", "NaN")]));
        c.normalize();
        assert_eq!(c.detect_every, 1);
        assert_eq!(c.match_threshold, 0.6);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "warmup_frames = 0\ndetect_scale = 0\n").unwrap();
        let c = Config::load(Some(&path)).unwrap();
        assert_eq!(c.warmup_frames, 0);
        assert_eq!(c.detect_scale, 1);
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
