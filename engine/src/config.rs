//! Renderer configuration, read from an optional TOML file.

use std::fs;
use std::path::{Path, PathBuf};

use log::*;
use serde::Deserialize;
use thiserror::Error;

/// File looked up in the working directory when no explicit path is given.
pub const CONFIG_FILE: &str = "ember.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse `{}`: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Ember".to_string(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/vert.spv"),
            fragment: PathBuf::from("shaders/frag.spv"),
        }
    }
}

/// One mesh + texture pair to upload at startup.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub mesh: PathBuf,
    pub texture: PathBuf,
    #[serde(default = "default_mipmaps")]
    pub mipmaps: bool,
}

fn default_mipmaps() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            mesh: PathBuf::from("assets/models/viking_room.obj"),
            texture: PathBuf::from("assets/textures/viking_room.png"),
            mipmaps: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    pub window: WindowConfig,
    pub shaders: ShaderConfig,
    pub validation: bool,
    pub clear_color: [f32; 4],
    pub models: Vec<ModelConfig>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            shaders: ShaderConfig::default(),
            validation: cfg!(debug_assertions),
            clear_color: [0.0, 0.0, 1.0, 1.0],
            models: vec![ModelConfig::default()],
        }
    }
}

impl RendererConfig {
    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No `{}` found, using default configuration.", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config = Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Loaded configuration from `{}`.", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Textures of later models that differ from the first model's. Only the
    /// first model's texture is sampled.
    pub fn ignored_textures(&self) -> Vec<&Path> {
        let Some((first, rest)) = self.models.split_first() else {
            return Vec::new();
        };

        rest.iter()
            .map(|m| m.texture.as_path())
            .filter(|t| *t != first.texture.as_path())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = RendererConfig::parse("").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.models.len(), 1);
        assert!(config.models[0].mipmaps);
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let config = RendererConfig::parse(
            r#"
            clear_color = [0.1, 0.2, 0.3, 1.0]

            [window]
            width = 1280
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "Ember");
        assert_eq!(config.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.shaders, ShaderConfig::default());
    }

    #[test]
    fn models_list_replaces_default_model() {
        let config = RendererConfig::parse(
            r#"
            [[models]]
            mesh = "a.obj"
            texture = "a.png"

            [[models]]
            mesh = "b.obj"
            texture = "b.png"
            mipmaps = false
            "#,
        )
        .unwrap();

        assert_eq!(config.models.len(), 2);
        assert!(config.models[0].mipmaps);
        assert!(!config.models[1].mipmaps);
        assert_eq!(config.models[1].mesh, PathBuf::from("b.obj"));
    }

    #[test]
    fn only_the_first_texture_is_used() {
        let config = RendererConfig::parse(
            r#"
            [[models]]
            mesh = "a.obj"
            texture = "a.png"

            [[models]]
            mesh = "b.obj"
            texture = "a.png"

            [[models]]
            mesh = "c.obj"
            texture = "c.png"
            "#,
        )
        .unwrap();

        assert_eq!(config.ignored_textures(), vec![Path::new("c.png")]);
        assert!(RendererConfig::default().ignored_textures().is_empty());
    }

    #[test]
    fn malformed_file_is_rejected() {
        assert!(RendererConfig::parse("window = 3").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = RendererConfig::load("definitely/not/here/ember.toml").unwrap();
        assert_eq!(config, RendererConfig::default());
    }
}
