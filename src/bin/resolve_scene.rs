//! resolve_scene - run the resolver over a captured scene file
//!
//! Loads a JSON scene (detections plus whichever pointing signals were
//! recorded), runs the tier chain synchronously with no waiting, and prints
//! the outcome and resolution path. Useful for building fixtures and for
//! debugging a live capture offline.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

use pointing_kernel::signals::SignalSnapshot;
use pointing_kernel::{
    DetectedObject, FrameDimensions, PointingDirection, ResolutionMode, Resolver,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Resolve a pointing target from a scene file")]
struct Args {
    /// Path to the JSON scene file.
    scene: PathBuf,

    /// Resolution mode to run (simplified or geometric).
    #[arg(long, env = "POINTING_MODE", default_value_t = ResolutionMode::Geometric)]
    mode: ResolutionMode,

    /// Only consider detections of this class.
    #[arg(long, env = "POINTING_CLASS_FILTER")]
    class_filter: Option<String>,

    /// Emit the resolution as JSON instead of text.
    #[arg(long)]
    json: bool,
}

/// A captured scene: the detection cycle plus whatever pointing signals the
/// collaborators had published at capture time.
#[derive(Debug, Deserialize)]
struct Scene {
    detections: Vec<DetectedObject>,
    direction: Option<PointingDirection>,
    slope: Option<f64>,
    intercept: Option<f64>,
    frame: Option<FrameDimensions>,
}

impl Scene {
    fn snapshot(self) -> SignalSnapshot {
        SignalSnapshot {
            direction: self.direction,
            slope: self.slope,
            intercept: self.intercept,
            detections: Some(self.detections),
            frame: self.frame,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.scene)
        .with_context(|| format!("failed to read scene {}", args.scene.display()))?;
    let scene: Scene = serde_json::from_str(&raw)
        .with_context(|| format!("invalid scene file {}", args.scene.display()))?;

    let resolver = Resolver::new(args.mode).with_class_filter(args.class_filter);
    let resolution = resolver.resolve(&scene.snapshot());

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolution)?);
        return Ok(());
    }

    for line in &resolution.trace {
        println!("  {}", line);
    }
    println!("{}", resolution.reason);
    if let Some(obj) = &resolution.selected {
        println!(
            "  class={} box=({}, {}) {}x{}",
            obj.class_name,
            obj.bounding_box.x_offset,
            obj.bounding_box.y_offset,
            obj.bounding_box.width,
            obj.bounding_box.height
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pointing_kernel::BoundingBox;

    #[test]
    fn scene_parses_with_partial_signals() {
        let scene: Scene = serde_json::from_str(
            r#"{
                "detections": [
                    {"class_name": "cup",
                     "bounding_box": {"x_offset": 100.0, "y_offset": 100.0,
                                      "width": 50.0, "height": 50.0}}
                ],
                "direction": "left",
                "slope": null,
                "intercept": null,
                "frame": {"width": 640, "height": 480}
            }"#,
        )
        .expect("scene");

        let snapshot = scene.snapshot();
        assert_eq!(snapshot.direction, Some(PointingDirection::Left));
        assert!(snapshot.ray().is_none());
        assert_eq!(
            snapshot.detections(),
            &[DetectedObject::new(
                "cup",
                BoundingBox::new(100.0, 100.0, 50.0, 50.0)
            )]
        );
    }
}
