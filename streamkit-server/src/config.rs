//! Configuration for the streaming server.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use streamkit_core::capture::CaptureFormat;
use streamkit_core::{ConductorConfig, EncodePath, OverflowPolicy, RtcConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Relay connection settings.
    pub signaling: SignalingConfig,
    /// Outbound signaling queue.
    pub conductor: QueueConfig,
    /// Render and capture settings.
    pub capture: CaptureConfig,
    /// Simulated viewers on the in-process relay.
    pub demo: DemoConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Signaling relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Relay host name or address.
    pub server: String,
    /// Relay port.
    pub port: u16,
    /// Name this server signs in with.
    pub client_name: String,
    /// STUN/TURN URLs handed to every peer session.
    pub ice_servers: Vec<String>,
}

/// What to discard when the outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueOverflow {
    #[default]
    DropOldest,
    DropNewest,
}

/// Outbound signaling queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Delay between delivery attempts, in milliseconds.
    pub retry_interval_ms: u64,
    /// Maximum queued messages. 0 keeps the queue unbounded.
    pub max_queued_messages: usize,
    /// Applied only when `max_queued_messages` is non-zero.
    pub overflow: QueueOverflow,
    /// How long shutdown waits for the queue worker, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

/// Which encoder consumes captured frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    #[default]
    Hardware,
    Software,
}

/// Render and capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Render target width in pixels.
    pub width: u32,
    /// Render target height in pixels.
    pub height: u32,
    /// Target frames per second.
    pub fps: u32,
    /// Encoder path for captured frames.
    pub encoder: EncoderKind,
}

/// Demo mode: viewers simulated on the in-process relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Simulate viewers at all.
    pub enabled: bool,
    /// Number of viewers that join.
    pub peers: u32,
    /// Delay between viewer joins, in milliseconds.
    pub join_interval_ms: u64,
    /// How long each viewer stays before saying bye. 0 stays until shutdown.
    pub session_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SignalingConfig {
    fn default() -> Self {
        let rtc = RtcConfig::default();
        Self {
            server: rtc.server,
            port: rtc.port,
            client_name: "streamkit-server".into(),
            ice_servers: rtc.ice_servers,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        let core = ConductorConfig::default();
        Self {
            retry_interval_ms: core.retry_interval.as_millis() as u64,
            max_queued_messages: 0,
            overflow: QueueOverflow::default(),
            shutdown_timeout_ms: core.shutdown_timeout.as_millis() as u64,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 60,
            encoder: EncoderKind::default(),
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            peers: 2,
            join_interval_ms: 1000,
            session_secs: 10,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Relay settings for the conductor and every session.
    pub fn to_rtc_config(&self) -> RtcConfig {
        RtcConfig {
            server: self.signaling.server.clone(),
            port: self.signaling.port,
            ice_servers: self.signaling.ice_servers.clone(),
        }
    }

    /// Queue settings for the conductor. Zero durations are raised to
    /// one millisecond.
    pub fn to_conductor_config(&self) -> ConductorConfig {
        let q = &self.conductor;
        ConductorConfig {
            retry_interval: Duration::from_millis(q.retry_interval_ms.max(1)),
            max_queued_messages: (q.max_queued_messages > 0).then_some(q.max_queued_messages),
            overflow_policy: match q.overflow {
                QueueOverflow::DropOldest => OverflowPolicy::DropOldest,
                QueueOverflow::DropNewest => OverflowPolicy::DropNewest,
            },
            shutdown_timeout: Duration::from_millis(q.shutdown_timeout_ms.max(1)),
            enable_software: self.capture.encoder == EncoderKind::Software,
        }
    }

    /// Capture format; dimensions are raised to at least 1x1.
    pub fn to_capture_format(&self) -> CaptureFormat {
        CaptureFormat::new(
            self.capture.width.max(1),
            self.capture.height.max(1),
            self.capture.fps,
        )
    }

    pub fn encode_path(&self) -> EncodePath {
        match self.capture.encoder {
            EncoderKind::Hardware => EncodePath::Hardware,
            EncoderKind::Software => EncodePath::Software,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = ServerConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("[signaling]"));
        assert!(text.contains("retry_interval_ms = 500"));
        assert!(text.contains("overflow = \"drop-oldest\""));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ServerConfig::default()).unwrap();
        let parsed: ServerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.signaling.port, 8888);
        assert_eq!(parsed.capture.fps, 60);
        assert!(parsed.demo.enabled);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let parsed: ServerConfig = toml::from_str(
            r#"
            [capture]
            encoder = "software"
            width = 640

            [conductor]
            max_queued_messages = 16
            overflow = "drop-newest"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.capture.width, 640);
        assert_eq!(parsed.capture.height, 720);
        assert_eq!(parsed.encode_path(), EncodePath::Software);

        let core = parsed.to_conductor_config();
        assert_eq!(core.max_queued_messages, Some(16));
        assert_eq!(core.overflow_policy, OverflowPolicy::DropNewest);
        assert!(core.enable_software);
        assert!(core.validate().is_ok());
    }

    #[test]
    fn zero_values_stay_valid() {
        let mut cfg = ServerConfig::default();
        cfg.conductor.retry_interval_ms = 0;
        let core = cfg.to_conductor_config();
        assert_eq!(core.retry_interval, Duration::from_millis(1));
        assert!(core.max_queued_messages.is_none());
        assert!(core.validate().is_ok());
    }

    #[test]
    fn to_capture_format_clamps() {
        let mut cfg = ServerConfig::default();
        cfg.capture.fps = 1000;
        cfg.capture.width = 0;
        let fmt = cfg.to_capture_format();
        assert_eq!(fmt.width, 1);
        assert_eq!(fmt.interval, Duration::from_secs(1) / 240);
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let cfg = ServerConfig::load(Path::new("/nonexistent/streamkit.toml"));
        assert_eq!(cfg.signaling.client_name, "streamkit-server");
    }
}
