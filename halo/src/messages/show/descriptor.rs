use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, path::Path};
use thiserror::Error;

/// Tick cadence used when sampling an interpolation curve and the
/// show file does not specify one. Sparse timelines send a command
/// per entry, curves send a command per tick, so this trades link
/// traffic for smoothness.
const DEFAULT_TICK_INTERVAL_MS: u64 = 25;

/// Errors raised while loading or validating a show file. All of
/// these are detected before any command is sent to the vehicle.
#[derive(Error, Debug)]
pub enum ShowError {
    #[error("failed to read show file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse show file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("show '{0}' has no waypoints")]
    NoWaypoints(String),
    #[error("waypoint {index} is outside the valid coordinate range ({latitude}, {longitude})")]
    WaypointOutOfRange {
        index: usize,
        latitude: f64,
        longitude: f64,
    },
    #[error("light command {index} has brightness {value} outside [0, 1]")]
    BrightnessOutOfRange { index: usize, value: f32 },
    #[error("interpolation curve has no keyframes")]
    EmptyCurve,
    #[error("interpolation tick interval must be non-zero")]
    ZeroTickInterval,
}

/// A single navigation waypoint. The position in the waypoint list
/// becomes the mission sequence number, so the order in the show
/// file is load bearing.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    /// Degrees, [-90, 90].
    pub latitude: f64,
    /// Degrees, [-180, 180].
    pub longitude: f64,
    /// Metres relative to the launch altitude.
    pub altitude: f64,
}

/// One colour channel triple. u8 fields mean out of range channel
/// values cannot survive parsing.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// A colour paired with an overall brightness scale.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct ColorCommand {
    pub rgb: Rgb,
    /// Brightness in [0, 1]. Validated, never clamped.
    pub brightness: f32,
}

/// One entry of the lighting timeline.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct ColorEvent {
    /// Offset in milliseconds from the show start.
    pub timestamp: u64,
    /// Colour to show from this offset onwards.
    pub color: ColorCommand,
}

/// A continuous lighting program described by keyframes that are
/// linearly interpolated at a fixed sampling cadence.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColorCurve {
    /// Keyframes ordered by timestamp. Offsets outside the covered
    /// range sample the first or last keyframe.
    pub keyframes: Vec<ColorEvent>,
    /// Sampling cadence in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

impl ColorCurve {
    /// Show duration covered by the curve.
    pub fn duration_ms(&self) -> u64 {
        self.keyframes.last().map_or(0, |keyframe| keyframe.timestamp)
    }

    /// Sample the curve at an offset from the show start. Between
    /// keyframes each channel and the brightness are interpolated
    /// linearly.
    pub fn sample(&self, offset_ms: u64) -> ColorCommand {
        match self
            .keyframes
            .binary_search_by_key(&offset_ms, |keyframe| keyframe.timestamp)
        {
            Ok(exact) => self.keyframes[exact].color,
            Err(0) => self.keyframes[0].color,
            Err(after) if after == self.keyframes.len() => self.keyframes[after - 1].color,
            Err(after) => {
                let before = &self.keyframes[after - 1];
                let next = &self.keyframes[after];
                let span = (next.timestamp - before.timestamp) as f32;
                let fraction = (offset_ms - before.timestamp) as f32 / span;
                ColorCommand {
                    rgb: Rgb {
                        r: lerp_channel(before.color.rgb.r, next.color.rgb.r, fraction),
                        g: lerp_channel(before.color.rgb.g, next.color.rgb.g, fraction),
                        b: lerp_channel(before.color.rgb.b, next.color.rgb.b, fraction),
                    },
                    brightness: before.color.brightness
                        + (next.color.brightness - before.color.brightness) * fraction,
                }
            }
        }
    }
}

fn lerp_channel(from: u8, to: u8, fraction: f32) -> u8 {
    (f32::from(from) + (f32::from(to) - f32::from(from)) * fraction).round() as u8
}

/// The lighting program of one show. Exactly one variant is active
/// per run, decided when the file is loaded and never switched
/// mid-show.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum LightingProgram {
    /// Sparse timeline, one command per entry.
    #[serde(rename = "lightingSequence")]
    Sequence(Vec<ColorEvent>),
    /// Continuous curve, one command per sampling tick.
    #[serde(rename = "colorInterpolation")]
    Interpolation(ColorCurve),
}

/// Free form information carried by the choreography tooling.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
pub struct ShowMetadata {
    pub description: Option<String>,
    pub author: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

/// Parsed, immutable representation of one mission and light show
/// file. Produced by [`ShowDescriptor::from_file`], consumed by the
/// orchestrator.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ShowDescriptor {
    /// Display name of the show.
    pub name: String,
    /// Flight path, visited in order.
    pub waypoints: Vec<Waypoint>,
    /// Optional free form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ShowMetadata>,
    /// The lighting program, either a sparse timeline or an
    /// interpolation curve. The file must carry exactly one of the
    /// two keys, anything else fails to parse.
    #[serde(flatten)]
    pub lighting: LightingProgram,
}

impl ShowDescriptor {
    /// Parse a show from raw JSON. The lighting timeline is sorted
    /// by timestamp so scheduling order never depends on the order
    /// the tooling happened to write entries in, then the whole
    /// descriptor is validated.
    pub fn from_json(raw: &str) -> Result<Self, ShowError> {
        let mut show: Self = serde_json::from_str(raw)?;
        match &mut show.lighting {
            LightingProgram::Sequence(events) => {
                events.sort_by_key(|event| event.timestamp);
            }
            LightingProgram::Interpolation(curve) => {
                curve.keyframes.sort_by_key(|keyframe| keyframe.timestamp);
            }
        }
        show.validate()?;
        Ok(show)
    }

    /// Load a show by reading a file.
    ///
    /// * `filepath`: path to the show file.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self, ShowError> {
        let raw = std::fs::read_to_string(Path::new(&filepath))?;
        Self::from_json(&raw)
    }

    /// Check the descriptor against the data invariants. Called
    /// before any command is sent so a malformed show never starts.
    pub fn validate(&self) -> Result<(), ShowError> {
        if self.waypoints.is_empty() {
            return Err(ShowError::NoWaypoints(self.name.clone()));
        }
        for (index, waypoint) in self.waypoints.iter().enumerate() {
            if !(-90.0..=90.0).contains(&waypoint.latitude)
                || !(-180.0..=180.0).contains(&waypoint.longitude)
            {
                return Err(ShowError::WaypointOutOfRange {
                    index,
                    latitude: waypoint.latitude,
                    longitude: waypoint.longitude,
                });
            }
        }
        let events = match &self.lighting {
            LightingProgram::Sequence(events) => events,
            LightingProgram::Interpolation(curve) => {
                if curve.keyframes.is_empty() {
                    return Err(ShowError::EmptyCurve);
                }
                if curve.tick_interval_ms == 0 {
                    return Err(ShowError::ZeroTickInterval);
                }
                &curve.keyframes
            }
        };
        for (index, event) in events.iter().enumerate() {
            // The range check also rejects NaN.
            if !(0.0..=1.0).contains(&event.color.brightness) {
                return Err(ShowError::BrightnessOutOfRange {
                    index,
                    value: event.color.brightness,
                });
            }
        }
        Ok(())
    }
}
