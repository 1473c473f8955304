//! Viewer-requested frame rate
//!
//! A viewer on a slow link can ask for fewer frames than the camera or file
//! produces, typically through an `fps` query parameter on the stream URL.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::StreamError;

/// Frame rate a viewer wants to receive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateRate {
    /// Every frame the source publishes
    #[default]
    Native,

    /// At most this many frames per second, newest frame wins
    Max(u32),
}

impl UpdateRate {
    /// Resolve the request against what the source actually delivers
    ///
    /// A cap at or above the source rate, or a zero cap, is the same as
    /// `Native`. When the source rate is unknown (not finite or not positive)
    /// the cap is kept as requested.
    pub fn against_source(self, source_fps: f64) -> Self {
        match self {
            UpdateRate::Native | UpdateRate::Max(0) => UpdateRate::Native,
            UpdateRate::Max(fps) if source_fps.is_finite() && source_fps > 0.0 && fps as f64 >= source_fps => {
                UpdateRate::Native
            }
            capped => capped,
        }
    }

    /// Minimum spacing between frames sent to the viewer, `None` when unthrottled
    pub fn frame_interval(self, source_fps: f64) -> Option<Duration> {
        match self.against_source(source_fps) {
            UpdateRate::Native => None,
            UpdateRate::Max(fps) => Some(Duration::from_secs_f64(1.0 / fps as f64)),
        }
    }

    /// Frames per second the viewer will see from a source running at `source_fps`
    pub fn effective_fps(self, source_fps: f64) -> f64 {
        match self.against_source(source_fps) {
            UpdateRate::Native => source_fps,
            UpdateRate::Max(fps) => fps as f64,
        }
    }
}

impl fmt::Display for UpdateRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateRate::Native => f.write_str("native"),
            UpdateRate::Max(fps) => write!(f, "{}", fps),
        }
    }
}

/// Parses an `fps` query value: `native`, an empty string, or a whole number
impl FromStr for UpdateRate {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("native") {
            return Ok(UpdateRate::Native);
        }

        s.parse::<u32>()
            .map(|fps| if fps == 0 { UpdateRate::Native } else { UpdateRate::Max(fps) })
            .map_err(|_| StreamError::config_error(format!("invalid frame rate '{}'", s)))
    }
}
