//! Capture flows and their session presets

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The camera experiences served by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// Four-shot photo strip
    Photobooth,
    /// Kodak-style film roll
    FilmCamera,
    /// Early-2010s point and shoot
    DigitalCamera,
    /// Single instant print
    Polaroid,
}

impl Flow {
    /// Every flow, in a stable order
    pub const ALL: [Flow; 4] = [
        Flow::Photobooth,
        Flow::FilmCamera,
        Flow::DigitalCamera,
        Flow::Polaroid,
    ];

    /// Key the flow's finished frames are stored under
    pub fn storage_key(self) -> &'static str {
        match self {
            Flow::Photobooth => "photoboothPhotos",
            Flow::FilmCamera => "filmPhotos",
            Flow::DigitalCamera => "digicamPhotos",
            Flow::Polaroid => "polaroidPhoto",
        }
    }

    /// Key the flow's developed frames are stored under, next to the raw ones
    pub fn developed_key(self) -> &'static str {
        match self {
            Flow::Photobooth => "photoboothFinal",
            Flow::FilmCamera => "filmFinal",
            Flow::DigitalCamera => "digicamFinal",
            Flow::Polaroid => "polaroidFinal",
        }
    }

    /// Default capture parameters for this flow
    pub fn default_options(self) -> SessionOptions {
        match self {
            Flow::Photobooth => SessionOptions {
                total_shots: 4,
                ..SessionOptions::default()
            },
            Flow::FilmCamera => SessionOptions {
                total_shots: 3,
                ..SessionOptions::default()
            },
            Flow::DigitalCamera => SessionOptions {
                total_shots: 2,
                ..SessionOptions::default()
            },
            Flow::Polaroid => SessionOptions {
                total_shots: 1,
                countdown_seconds: 0,
                inter_shot_delay_ms: 0,
                flash_duration_ms: 200,
            },
        }
    }
}

impl std::fmt::Display for Flow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Flow::Photobooth => write!(f, "photobooth"),
            Flow::FilmCamera => write!(f, "film_camera"),
            Flow::DigitalCamera => write!(f, "digital_camera"),
            Flow::Polaroid => write!(f, "polaroid"),
        }
    }
}

/// Timing and shot count of one capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Frames captured per run, at least 1
    pub total_shots: u32,
    /// Seconds counted down before each shot; 0 captures immediately
    pub countdown_seconds: u32,
    /// Pause after a shot before the next countdown, skipped after the last
    pub inter_shot_delay_ms: u64,
    /// How long the flash cue is held after each capture
    pub flash_duration_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            total_shots: 1,
            countdown_seconds: 3,
            inter_shot_delay_ms: 3000,
            flash_duration_ms: 200,
        }
    }
}

impl SessionOptions {
    /// Reject options that cannot describe a run
    pub fn validate(&self) -> Result<(), String> {
        if self.total_shots == 0 {
            return Err("total_shots must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn inter_shot_delay(&self) -> Duration {
        Duration::from_millis(self.inter_shot_delay_ms)
    }

    pub fn flash_duration(&self) -> Duration {
        Duration::from_millis(self.flash_duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(Flow::Photobooth.default_options().total_shots, 4);
        assert_eq!(Flow::FilmCamera.default_options().total_shots, 3);
        assert_eq!(Flow::DigitalCamera.default_options().total_shots, 2);

        let polaroid = Flow::Polaroid.default_options();
        assert_eq!(polaroid.total_shots, 1);
        assert_eq!(polaroid.countdown_seconds, 0);
    }

    #[test]
    fn test_storage_keys_are_distinct() {
        let mut keys: Vec<_> = Flow::ALL
            .iter()
            .flat_map(|f| [f.storage_key(), f.developed_key()])
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), Flow::ALL.len() * 2);
    }

    #[test]
    fn test_validate() {
        assert!(SessionOptions::default().validate().is_ok());
        let zero = SessionOptions {
            total_shots: 0,
            ..SessionOptions::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_partial_options_deserialize() {
        let opts: SessionOptions = serde_json::from_str(r#"{"total_shots":6}"#).unwrap();
        assert_eq!(opts.total_shots, 6);
        assert_eq!(opts.countdown_seconds, 3);
        assert_eq!(opts.flash_duration(), Duration::from_millis(200));
    }

    #[test]
    fn test_flow_serialization() {
        let json = serde_json::to_string(&Flow::FilmCamera).unwrap();
        assert_eq!(json, r#""film_camera""#);
        assert_eq!(Flow::FilmCamera.to_string(), "film_camera");
    }
}
