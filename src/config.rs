// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional; missing keys fall back to the defaults below.
// A missing file means "all defaults", a broken one is reported and ignored.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub frames: FramesConfig,
    pub descriptors: DescriptorConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Weave Renderer".to_string(),
            width: 1024,
            height: 1024,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.1, 0.2, 0.8, 1.0],
        }
    }
}

/// Frame pacing
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FramesConfig {
    pub frames_in_flight: usize,
    /// Absent = wait on frame fences forever
    pub fence_timeout_ms: Option<u64>,
    pub minimized_sleep_ms: u64,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            fence_timeout_ms: None,
            minimized_sleep_ms: 100,
        }
    }
}

/// Per-frame descriptor pool sizing
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DescriptorConfig {
    pub initial_sets: u32,
    pub growth_factor: f32,
    pub max_sets_per_pool: u32,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            initial_sets: 1000,
            growth_factor: 1.5,
            max_sets_per_pool: 4092,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// env_logger filter string, `RUST_LOG` overrides it
    pub log_filter: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_filter: "info".to_string(),
            log_to_file: false,
            log_file: "weave.log".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the frame core cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.frames.frames_in_flight == 0 {
            anyhow::bail!("frames.frames_in_flight must be at least 1");
        }
        if !(self.descriptors.growth_factor >= 1.0) {
            anyhow::bail!(
                "descriptors.growth_factor must be >= 1.0, got {}",
                self.descriptors.growth_factor
            );
        }
        if self.descriptors.initial_sets == 0
            || self.descriptors.initial_sets > self.descriptors.max_sets_per_pool
        {
            anyhow::bail!(
                "descriptors.initial_sets must be in 1..={}, got {}",
                self.descriptors.max_sets_per_pool,
                self.descriptors.initial_sets
            );
        }
        Ok(())
    }

    /// Get present mode as Vulkan enum
    pub fn get_present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 1024);
        assert_eq!(config.frames.frames_in_flight, 2);
        assert_eq!(config.frames.fence_timeout_ms, None);
        assert_eq!(config.descriptors.initial_sets, 1000);
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [frames]
            frames_in_flight = 3
            fence_timeout_ms = 500

            [graphics]
            present_mode = "Mailbox"
            "#,
        )
        .unwrap();
        assert_eq!(config.frames.frames_in_flight, 3);
        assert_eq!(config.frames.fence_timeout_ms, Some(500));
        assert_eq!(config.frames.minimized_sleep_ms, 100);
        assert_eq!(config.get_present_mode(), ash::vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_toml_str("[frames]\nframes_in_flight = 0").is_err());
        assert!(Config::from_toml_str("[descriptors]\ngrowth_factor = 0.5").is_err());
        assert!(Config::from_toml_str("[descriptors]\ninitial_sets = 5000").is_err());
        assert!(Config::from_toml_str("[window\nwidth = 3").is_err());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = Config::load_from_path("definitely/not/here/config.toml").unwrap();
        assert_eq!(config.debug.log_filter, "info");
    }
}
