use anyhow::{Context, Result};
use facematch_core::config::default_extensions;
use facematch_core::{GalleryConfig, MatcherConfig};
use facematch_onnx::{ARCFACE_DISTANCE_THRESHOLD, DEFAULT_CONFIDENCE_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// CLI configuration: built-in defaults, then an optional TOML file, then
/// `FACEMATCH_*` environment variables. Command-line flags are applied last by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory tree of labeled reference images (default: ./known_faces).
    pub gallery_dir: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum Euclidean distance for a positive match, scaled for ArcFace embeddings.
    pub threshold: f32,
    /// Let matched identities follow the latest observed embedding.
    pub adaptive_reencode: bool,
    /// Reference image extensions, with leading dot.
    pub extensions: Vec<String>,
    /// Minimum detector score for a face to be kept.
    pub detection_confidence: f32,
    /// Font for the names in annotated images.
    pub font: PathBuf,
}

/// Optional keys of a `facematch.toml` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    gallery_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    threshold: Option<f32>,
    adaptive_reencode: Option<bool>,
    extensions: Option<Vec<String>>,
    detection_confidence: Option<f32>,
    font: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gallery_dir: PathBuf::from("./known_faces"),
            model_dir: default_model_dir(|key| std::env::var(key).ok()),
            threshold: ARCFACE_DISTANCE_THRESHOLD,
            adaptive_reencode: false,
            extensions: default_extensions(),
            detection_confidence: DEFAULT_CONFIDENCE_THRESHOLD,
            font: PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf"),
        }
    }
}

impl Config {
    /// Load configuration from the optional TOML file and `FACEMATCH_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = file {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            config.apply_toml(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?;
        }
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_toml(&mut self, text: &str) -> Result<()> {
        let file: FileConfig = toml::from_str(text)?;
        if let Some(dir) = file.gallery_dir {
            self.gallery_dir = dir;
        }
        if let Some(dir) = file.model_dir {
            self.model_dir = dir;
        }
        if let Some(threshold) = file.threshold {
            self.threshold = threshold;
        }
        if let Some(adaptive) = file.adaptive_reencode {
            self.adaptive_reencode = adaptive;
        }
        if let Some(extensions) = file.extensions {
            self.extensions = extensions;
        }
        if let Some(confidence) = file.detection_confidence {
            self.detection_confidence = confidence;
        }
        if let Some(font) = file.font {
            self.font = font;
        }
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("FACEMATCH_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("FACEMATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(threshold) = var("FACEMATCH_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.threshold = threshold;
        }
        if let Some(adaptive) = var("FACEMATCH_ADAPTIVE_REENCODE") {
            self.adaptive_reencode = adaptive != "0";
        }
        if let Some(extensions) = var("FACEMATCH_EXTENSIONS") {
            self.extensions = extensions
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(confidence) =
            var("FACEMATCH_DETECTION_CONFIDENCE").and_then(|v| v.parse().ok())
        {
            self.detection_confidence = confidence;
        }
        if let Some(font) = var("FACEMATCH_FONT") {
            self.font = PathBuf::from(font);
        }
    }

    pub fn gallery_config(&self) -> GalleryConfig {
        GalleryConfig {
            source_path: self.gallery_dir.clone(),
            extensions: self.extensions.clone(),
        }
    }

    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            threshold: self.threshold,
            adaptive_reencode: self.adaptive_reencode,
        }
    }
}

/// `$XDG_DATA_HOME/facematch/models`, falling back to `~/.local/share`.
fn default_model_dir(var: impl Fn(&str) -> Option<String>) -> PathBuf {
    var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch/models")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_model_dir_prefers_xdg() {
        let dir = default_model_dir(env(&[("XDG_DATA_HOME", "/data"), ("HOME", "/home/u")]));
        assert_eq!(dir, PathBuf::from("/data/facematch/models"));

        let dir = default_model_dir(env(&[("HOME", "/home/u")]));
        assert_eq!(dir, PathBuf::from("/home/u/.local/share/facematch/models"));
    }

    #[test]
    fn test_toml_then_env_layering() {
        let mut config = Config::default();
        config
            .apply_toml(
                r#"
                gallery_dir = "/srv/faces"
                threshold = 0.5
                extensions = [".jpeg"]
                "#,
            )
            .unwrap();
        config.apply_env(env(&[
            ("FACEMATCH_THRESHOLD", "0.45"),
            ("FACEMATCH_ADAPTIVE_REENCODE", "1"),
        ]));

        assert_eq!(config.gallery_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.threshold, 0.45);
        assert!(config.adaptive_reencode);
        assert_eq!(config.extensions, vec![".jpeg".to_string()]);
    }

    #[test]
    fn test_default_threshold_is_arcface_scaled() {
        let config = Config::default();
        assert_eq!(config.threshold, ARCFACE_DISTANCE_THRESHOLD);
        assert_eq!(config.matcher_config().threshold, ARCFACE_DISTANCE_THRESHOLD);
        assert!(config.threshold > facematch_core::DEFAULT_DISTANCE_THRESHOLD);
    }

    #[test]
    fn test_unparsable_env_threshold_is_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("FACEMATCH_THRESHOLD", "close")]));
        assert_eq!(config.threshold, ARCFACE_DISTANCE_THRESHOLD);
    }

    #[test]
    fn test_detection_confidence_and_font_layering() {
        let mut config = Config::default();
        assert_eq!(config.detection_confidence, DEFAULT_CONFIDENCE_THRESHOLD);

        config
            .apply_toml(
                r#"
                detection_confidence = 0.7
                font = "/opt/fonts/label.ttf"
                "#,
            )
            .unwrap();
        assert_eq!(config.detection_confidence, 0.7);
        assert_eq!(config.font, PathBuf::from("/opt/fonts/label.ttf"));

        config.apply_env(env(&[
            ("FACEMATCH_DETECTION_CONFIDENCE", "0.35"),
            ("FACEMATCH_FONT", "/tmp/mono.otf"),
        ]));
        assert_eq!(config.detection_confidence, 0.35);
        assert_eq!(config.font, PathBuf::from("/tmp/mono.otf"));
    }

    #[test]
    fn test_env_extension_list() {
        let mut config = Config::default();
        config.apply_env(env(&[("FACEMATCH_EXTENSIONS", ".jpg, .webp,")]));
        assert_eq!(config.extensions, vec![".jpg".to_string(), ".webp".to_string()]);
    }

    #[test]
    fn test_unknown_toml_key_rejected() {
        let mut config = Config::default();
        assert!(config.apply_toml("treshold = 0.5").is_err());
    }

    #[test]
    fn test_core_configs() {
        let config = Config {
            threshold: 0.4,
            adaptive_reencode: true,
            ..Config::default()
        };
        assert_eq!(
            config.matcher_config(),
            MatcherConfig { threshold: 0.4, adaptive_reencode: true }
        );
        assert_eq!(config.gallery_config().source_path, PathBuf::from("./known_faces"));
    }
}
