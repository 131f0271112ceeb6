//! Pointing Target Resolution Kernel (PTK)
//!
//! This crate resolves WHICH of several detected objects a human is pointing
//! at, combining a coarse left/right hand signal with a precise pointing ray
//! (slope + intercept in image pixel coordinates) and the current list of
//! detected bounding boxes.
//!
//! # Architecture
//!
//! The kernel is the consumer side of an asynchronous perception pipeline.
//! External collaborators (object detector, gesture classifier, pose
//! geometry, camera ingestion) publish typed signals; the kernel holds the
//! latest value of each and runs a three-tier fallback chain:
//!
//! 1. **Directional pick**: left/right signal against bounding-box x offsets.
//! 2. **Ray intersection**: first box whose polygon the pointing ray crosses.
//! 3. **Perpendicular distance**: nearest box center to the ray, measured
//!    along the perpendicular through the center.
//!
//! A later tier runs only when the earlier applicable tiers return nothing.
//! The kernel never selects more than one object per resolution, and "no
//! object found" is an ordinary outcome, distinct from "inputs not yet
//! available".
//!
//! # Module Structure
//!
//! - `geometry`: lines, polygons, intersection and distance primitives
//! - `signals`: latest-value store shared between producers and the resolver
//! - `resolve`: the tier chain and its outcome type
//! - `context`: input waiting, phase tracking, and orchestration
//! - `config`: resolverd configuration (file + env)

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::geometry::{Line, Point};

pub mod config;
pub mod context;
pub mod geometry;
pub mod resolve;
pub mod signals;

pub use context::{ContextConfig, PerceptionContext, ResolutionPhase};
pub use resolve::{Resolution, ResolutionMode, Resolver, Tier};
pub use signals::{SignalSnapshot, SignalStore, WaitError};

// -------------------- Detections --------------------

/// Axis-aligned bounding box in image pixel coordinates.
///
/// `x_offset`/`y_offset` locate the top-left corner; the y axis grows
/// downward as in image space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_offset: f64,
    pub y_offset: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x_offset: f64, y_offset: f64, width: f64, height: f64) -> Self {
        Self {
            x_offset,
            y_offset,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x_offset + self.width / 2.0,
            y: self.y_offset + self.height / 2.0,
        }
    }

    /// Corner polygon in the fixed winding order used by the resolver:
    /// bottom-left, bottom-right, top-right, top-left.
    pub fn corners(&self) -> [Point; 4] {
        let left = self.x_offset;
        let right = self.x_offset + self.width;
        let top = self.y_offset;
        let bottom = self.y_offset + self.height;
        [
            Point { x: left, y: bottom },
            Point { x: right, y: bottom },
            Point { x: right, y: top },
            Point { x: left, y: top },
        ]
    }
}

/// One detected object as published by the object-detection collaborator.
///
/// Detections are immutable once received; a new detection cycle replaces the
/// whole set in the [`SignalStore`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class_name: String,
    pub bounding_box: BoundingBox,
}

impl DetectedObject {
    pub fn new(class_name: impl Into<String>, bounding_box: BoundingBox) -> Self {
        Self {
            class_name: class_name.into(),
            bounding_box,
        }
    }
}

// -------------------- Pointing Signals --------------------

/// Wire words used by the gesture-classification collaborator.
pub const DIRECTION_LEFT_MSG: &str = "left";
pub const DIRECTION_RIGHT_MSG: &str = "right";
pub const DIRECTION_UNKNOWN_MSG: &str = "unknown";

/// Coarse pointing direction from the gesture classifier.
///
/// The convention follows the classifier's frame of reference, not the
/// camera's: a person pointing to their physical left appears to point toward
/// the right side of the image. Tier 1 preserves this exact mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointingDirection {
    Left,
    Right,
    Unknown,
}

impl FromStr for PointingDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            DIRECTION_LEFT_MSG => Ok(PointingDirection::Left),
            DIRECTION_RIGHT_MSG => Ok(PointingDirection::Right),
            DIRECTION_UNKNOWN_MSG => Ok(PointingDirection::Unknown),
            other => Err(anyhow!("unrecognized pointing direction: {:?}", other)),
        }
    }
}

impl fmt::Display for PointingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            PointingDirection::Left => DIRECTION_LEFT_MSG,
            PointingDirection::Right => DIRECTION_RIGHT_MSG,
            PointingDirection::Unknown => DIRECTION_UNKNOWN_MSG,
        };
        f.write_str(word)
    }
}

/// The pointing ray `y = slope * x + intercept` in image pixel coordinates,
/// as estimated by the pose-geometry collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointingRay {
    pub slope: f64,
    pub intercept: f64,
}

impl PointingRay {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    pub fn line(&self) -> Line {
        Line {
            slope: self.slope,
            intercept: self.intercept,
        }
    }
}

/// Width and height of the current camera frame, required by Tier 2 to span
/// the ray across the full image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

impl FrameDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_parses_wire_words() {
        assert_eq!(
            "left".parse::<PointingDirection>().unwrap(),
            PointingDirection::Left
        );
        assert_eq!(
            " Right ".parse::<PointingDirection>().unwrap(),
            PointingDirection::Right
        );
        assert_eq!(
            "UNKNOWN".parse::<PointingDirection>().unwrap(),
            PointingDirection::Unknown
        );
        assert!("up".parse::<PointingDirection>().is_err());
    }

    #[test]
    fn direction_round_trips_through_display() {
        for dir in [
            PointingDirection::Left,
            PointingDirection::Right,
            PointingDirection::Unknown,
        ] {
            assert_eq!(dir.to_string().parse::<PointingDirection>().unwrap(), dir);
        }
    }

    #[test]
    fn bounding_box_center_and_corners() {
        let bbox = BoundingBox::new(10.0, 20.0, 4.0, 6.0);
        assert_eq!(bbox.center(), Point { x: 12.0, y: 23.0 });

        let corners = bbox.corners();
        assert_eq!(corners[0], Point { x: 10.0, y: 26.0 });
        assert_eq!(corners[1], Point { x: 14.0, y: 26.0 });
        assert_eq!(corners[2], Point { x: 14.0, y: 20.0 });
        assert_eq!(corners[3], Point { x: 10.0, y: 20.0 });
    }

    #[test]
    fn detection_json_shape() {
        let obj = DetectedObject::new("cup", BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        let json = serde_json::to_string(&obj).expect("serialize");
        assert!(json.contains("\"class_name\":\"cup\""));
        assert!(json.contains("\"x_offset\":1.0"));

        let back: DetectedObject = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, obj);
    }
}
