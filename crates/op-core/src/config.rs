//! Configuration system for oxidized-pica

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EmulatorError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gpu: GpuConfig,
    pub debug: DebugConfig,
}

/// GPU settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuConfig {
    /// Shader engine name ("jit" or "interpreter")
    pub shader_engine: String,
    /// Host backend name
    pub backend: String,
    /// Internal resolution multiplier applied to framebuffer-space uniforms
    pub resolution_scale: u32,
    /// Upload raw vertex arrays instead of running the vertex shader on the CPU
    pub hw_vertex_arrays: bool,
    /// Byte alignment of each attribute loader's stride in uploaded vertex arrays
    pub stride_alignment: u32,
    /// Maximum control transfers (taken jumps and calls, loop repeats) a
    /// shader may make per vertex
    pub shader_step_limit: u32,
    /// Per-title program patches, matched by program hash
    pub shader_fixups: Vec<ShaderFixup>,
}

/// Patch for one known-broken shader program.
///
/// `hash` is the program hash printed by `--dump-shaders`. `patch` is written
/// at word `offset` and END after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderFixup {
    #[serde(with = "hex_u64")]
    pub hash: u64,
    pub offset: usize,
    pub patch: u32,
}

/// 64-bit hashes as hex strings; TOML integers stop at `i64::MAX`
mod hex_u64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#018x}", value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let text = String::deserialize(deserializer)?;
        let digits = text.trim_start_matches("0x").trim_start_matches("0X");
        u64::from_str_radix(digits, 16)
            .map_err(|_| de::Error::custom(format!("invalid hash '{}'", text)))
    }
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub dump_shaders: bool,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            shader_engine: "jit".to_string(),
            backend: "null".to_string(),
            resolution_scale: 1,
            hw_vertex_arrays: false,
            stride_alignment: 4,
            shader_step_limit: 1 << 20,
            shader_fixups: Vec::new(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            dump_shaders: false,
        }
    }
}

impl Config {
    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EmulatorError::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content =
            toml::to_string_pretty(self).map_err(|e| EmulatorError::Config(e.to_string()))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-pica")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gpu.shader_engine, "jit");
        assert_eq!(config.gpu.backend, "null");
        assert_eq!(config.gpu.resolution_scale, 1);
        assert_eq!(config.gpu.stride_alignment, 4);
        assert_eq!(config.debug.log_level, LogLevel::Info);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = Config::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed.gpu.shader_engine, config.gpu.shader_engine);
        assert_eq!(parsed.gpu.shader_step_limit, config.gpu.shader_step_limit);
    }

    #[test]
    fn test_shader_fixups() {
        let parsed = Config::from_toml_str(
            "[[gpu.shader_fixups]]\nhash = \"0xfedcba9876543210\"\noffset = 110\npatch = 1275072384\n",
        )
        .unwrap();
        assert_eq!(
            parsed.gpu.shader_fixups,
            vec![ShaderFixup {
                hash: 0xfedc_ba98_7654_3210,
                offset: 110,
                patch: 0x4c00_0f80,
            }]
        );

        let toml_str = toml::to_string_pretty(&parsed).unwrap();
        assert!(toml_str.contains("0xfedcba9876543210"));
        let reparsed = Config::from_toml_str(&toml_str).unwrap();
        assert_eq!(reparsed.gpu.shader_fixups, parsed.gpu.shader_fixups);

        assert!(Config::from_toml_str(
            "[[gpu.shader_fixups]]\nhash = \"xyz\"\noffset = 0\npatch = 0\n"
        )
        .is_err());
    }

    #[test]
    fn test_partial_config() {
        let parsed = Config::from_toml_str(
            "[gpu]\nshader_engine = \"interpreter\"\n\n[debug]\nlog_level = \"Trace\"\n",
        )
        .unwrap();
        assert_eq!(parsed.gpu.shader_engine, "interpreter");
        assert_eq!(parsed.gpu.resolution_scale, 1);
        assert_eq!(parsed.debug.log_level, LogLevel::Trace);
        assert_eq!(parsed.debug.log_level.as_filter(), "trace");
    }

    #[test]
    fn test_invalid_config() {
        let err = Config::from_toml_str("[gpu]\nresolution_scale = \"big\"\n").unwrap_err();
        assert!(matches!(err, EmulatorError::Config(_)));
    }
}
