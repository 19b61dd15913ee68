//! Application configuration loaded from TOML.
//!
//! Every field has a default, so a missing file or a partial file is valid:
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//!
//! [renderer]
//! enable_validation = false
//! model = "Models/seahawk.obj"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub camera: CameraConfig,
}

/// Window creation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            title: String::from("Test Window"),
        }
    }
}

/// Renderer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Request `VK_LAYER_KHRONOS_validation` and a debug messenger.
    pub enable_validation: bool,
    /// Directory holding the pre-compiled `*.spv` blobs.
    pub shader_dir: PathBuf,
    /// Directory that texture file names are resolved against.
    pub texture_dir: PathBuf,
    /// Texture loaded at startup as the fallback (handle 0).
    pub default_texture: String,
    /// Capacity of the sampler descriptor pool.
    pub max_textures: u32,
    /// Model loaded by the application at startup, if any.
    pub model: Option<PathBuf>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("Shaders"),
            texture_dir: PathBuf::from("Textures"),
            default_texture: String::from("texture1.jpg"),
            max_textures: 20,
            model: None,
        }
    }
}

/// Fixed camera used to fill the view/projection uniform.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub fov_degrees: f32,
    pub near: f32,
    pub far: f32,
    pub eye: [f32; 3],
    pub target: [f32; 3],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 45.0,
            near: 0.1,
            far: 100.0,
            eye: [10.0, 0.0, 100.0],
            target: [0.0, 0.0, 0.0],
        }
    }
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults. A file that exists but fails to
    /// parse is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_program() {
        let config = Config::default();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.renderer.shader_dir, PathBuf::from("Shaders"));
        assert_eq!(config.renderer.texture_dir, PathBuf::from("Textures"));
        assert_eq!(config.camera.eye, [10.0, 0.0, 100.0]);
        assert!(config.renderer.model.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [window]
            width = 1024

            [renderer]
            enable_validation = false
            model = "Models/cube.obj"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert!(!config.renderer.enable_validation);
        assert_eq!(
            config.renderer.model.as_deref(),
            Some(Path::new("Models/cube.obj"))
        );
        assert_eq!(config.renderer.max_textures, 20);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.window.title, "Test Window");
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[window]\nwidth = \"wide\"").unwrap();

        match Config::load(&path) {
            Err(Error::Config(msg)) => assert!(msg.contains("bad.toml")),
            other => panic!("expected config error, got {:?}", other),
        }
    }
}
