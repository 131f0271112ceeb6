//! The three-tier resolution chain.
//!
//! Tier 1 (Simplified mode) picks by the coarse left/right signal alone.
//! Tiers 2 and 3 (Geometric mode) use the pointing ray: first detection whose
//! bounding-box polygon the ray crosses, falling back to the detection whose
//! box center is nearest to the ray measured along the perpendicular through
//! the center.
//!
//! All tiers scan detections in arrival order and break ties in favor of the
//! first-seen candidate (strict comparisons only). A tier returning nothing
//! is an ordinary outcome; geometry failures are local to one candidate and
//! never abort the scan.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::geometry::{ray_intersects_polygon, GeometryError, Polygon};
use crate::signals::SignalSnapshot;
use crate::{DetectedObject, FrameDimensions, PointingDirection, PointingRay};

// -------------------- Mode --------------------

/// Which tiers a resolver runs, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    /// Tier 1 only: coarse directional pick.
    Simplified,
    /// Tier 2 with Tier 3 fallback.
    Geometric,
}

impl FromStr for ResolutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "simplified" => Ok(ResolutionMode::Simplified),
            "geometric" => Ok(ResolutionMode::Geometric),
            other => Err(anyhow!(
                "unrecognized resolution mode {:?} (expected simplified or geometric)",
                other
            )),
        }
    }
}

impl fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionMode::Simplified => f.write_str("simplified"),
            ResolutionMode::Geometric => f.write_str("geometric"),
        }
    }
}

/// The tier that produced a selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Directional,
    RayIntersection,
    PerpendicularDistance,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Directional => f.write_str("tier 1 (directional)"),
            Tier::RayIntersection => f.write_str("tier 2 (ray intersection)"),
            Tier::PerpendicularDistance => f.write_str("tier 3 (perpendicular distance)"),
        }
    }
}

// -------------------- Outcome --------------------

/// Result of one resolution call.
///
/// `selected` is at most one object; `None` with a reason is the expected
/// "no object found" outcome. `trace` records the resolution path (which
/// tiers ran and why the earlier ones produced nothing) for observability.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Resolution {
    pub selected: Option<DetectedObject>,
    pub tier: Option<Tier>,
    pub reason: String,
    #[serde(skip)]
    pub trace: Vec<String>,
}

impl Resolution {
    fn found(object: &DetectedObject, tier: Tier, trace: Vec<String>) -> Self {
        Self {
            selected: Some(object.clone()),
            tier: Some(tier),
            reason: format!("selected {:?} via {}", object.class_name, tier),
            trace,
        }
    }

    fn none(reason: impl Into<String>, trace: Vec<String>) -> Self {
        Self {
            selected: None,
            tier: None,
            reason: reason.into(),
            trace,
        }
    }
}

// -------------------- Tier primitives --------------------

/// Tier 1: pick by the coarse directional signal.
///
/// The mapping is deliberate and must not be "fixed": a person pointing to
/// their physical left appears on the right side of the image, so `Left`
/// selects the maximum `x_offset` and `Right` the minimum. Strict
/// comparisons keep the first-seen candidate on ties.
pub fn pick_by_direction(
    direction: PointingDirection,
    detections: &[DetectedObject],
) -> Option<&DetectedObject> {
    let mut best = detections.first()?;
    for obj in &detections[1..] {
        let better = match direction {
            PointingDirection::Left => obj.bounding_box.x_offset > best.bounding_box.x_offset,
            PointingDirection::Right => obj.bounding_box.x_offset < best.bounding_box.x_offset,
            PointingDirection::Unknown => return None,
        };
        if better {
            best = obj;
        }
    }
    if direction == PointingDirection::Unknown {
        return None;
    }
    Some(best)
}

/// Tier 2: first detection (in arrival order) whose bounding-box polygon the
/// pointing ray crosses, with the ray extended across the full frame width.
pub fn pick_by_ray_intersection<'a>(
    ray: &PointingRay,
    frame: FrameDimensions,
    detections: &'a [DetectedObject],
) -> Option<&'a DetectedObject> {
    let line = ray.line();
    let width = f64::from(frame.width);
    detections
        .iter()
        .find(|obj| ray_intersects_polygon(&line, &Polygon::from(&obj.bounding_box), width))
}

/// Tier 3 outcome: the winning candidate plus the candidates whose geometry
/// degenerated and were skipped.
#[derive(Debug)]
pub struct NearestOutcome<'a> {
    pub selected: Option<&'a DetectedObject>,
    pub skipped: Vec<(usize, GeometryError)>,
}

/// Tier 3: detection whose box center is nearest to the ray, measured to the
/// intersection of the ray with the perpendicular through the center.
///
/// A zero-slope ray (or a degenerate perpendicular) fails for that candidate
/// only; the scan continues. Strict less-than keeps the first-seen candidate
/// on distance ties.
pub fn pick_nearest_to_ray<'a>(
    ray: &PointingRay,
    detections: &'a [DetectedObject],
) -> NearestOutcome<'a> {
    let line = ray.line();
    let mut selected: Option<(&DetectedObject, f64)> = None;
    let mut skipped = Vec::new();

    for (idx, obj) in detections.iter().enumerate() {
        let center = obj.bounding_box.center();
        let perpendicular = match line.perpendicular_through(center) {
            Ok(perpendicular) => perpendicular,
            Err(err) => {
                skipped.push((idx, err));
                continue;
            }
        };
        let foot = match line.intersection(&perpendicular) {
            Ok(foot) => foot,
            Err(err) => {
                skipped.push((idx, err));
                continue;
            }
        };
        let dist = center.distance(&foot);
        // A non-finite ray slope yields a NaN distance; such a candidate can
        // never be the nearest.
        if dist.is_nan() {
            continue;
        }
        match selected {
            Some((_, best)) if dist < best => selected = Some((obj, dist)),
            Some(_) => {}
            None => selected = Some((obj, dist)),
        }
    }

    NearestOutcome {
        selected: selected.map(|(obj, _)| obj),
        skipped,
    }
}

// -------------------- Resolver --------------------

/// Stateless-per-call resolver over a fixed mode and optional class filter.
#[derive(Clone, Debug)]
pub struct Resolver {
    mode: ResolutionMode,
    class_filter: Option<String>,
}

impl Resolver {
    pub fn new(mode: ResolutionMode) -> Self {
        Self {
            mode,
            class_filter: None,
        }
    }

    /// Restrict resolution to detections of one class. `None` disables the
    /// filter.
    pub fn with_class_filter(mut self, class_name: Option<String>) -> Self {
        self.class_filter = class_name;
        self
    }

    pub fn mode(&self) -> ResolutionMode {
        self.mode
    }

    /// Run the configured tier chain against one signal snapshot. Reads the
    /// snapshot only; calling twice with the same snapshot yields the same
    /// resolution.
    pub fn resolve(&self, snapshot: &SignalSnapshot) -> Resolution {
        let mut trace = Vec::new();

        let all = snapshot.detections();
        let filtered: Vec<&DetectedObject> = match &self.class_filter {
            Some(class_name) => {
                let kept: Vec<&DetectedObject> =
                    all.iter().filter(|o| &o.class_name == class_name).collect();
                trace.push(format!(
                    "class filter {:?}: {} of {} detections kept",
                    class_name,
                    kept.len(),
                    all.len()
                ));
                if kept.is_empty() {
                    return Resolution::none(
                        format!("class filter {:?} matched no detections", class_name),
                        trace,
                    );
                }
                kept
            }
            None => all.iter().collect(),
        };

        if filtered.is_empty() {
            trace.push("no detections in the current cycle".to_string());
            return Resolution::none("no objects were detected", trace);
        }
        let detections: Vec<DetectedObject> = filtered.into_iter().cloned().collect();

        match self.mode {
            ResolutionMode::Simplified => self.resolve_simplified(snapshot, &detections, trace),
            ResolutionMode::Geometric => self.resolve_geometric(snapshot, &detections, trace),
        }
    }

    fn resolve_simplified(
        &self,
        snapshot: &SignalSnapshot,
        detections: &[DetectedObject],
        mut trace: Vec<String>,
    ) -> Resolution {
        let Some(direction) = snapshot.direction else {
            trace.push("tier 1: pointing direction not yet received".to_string());
            return Resolution::none("pointing direction not available", trace);
        };
        trace.push(format!(
            "tier 1: direction={}, {} candidates",
            direction,
            detections.len()
        ));
        match pick_by_direction(direction, detections) {
            Some(obj) => Resolution::found(obj, Tier::Directional, trace),
            None => {
                trace.push("tier 1: direction unknown, no pick".to_string());
                Resolution::none("pointing direction is unknown", trace)
            }
        }
    }

    fn resolve_geometric(
        &self,
        snapshot: &SignalSnapshot,
        detections: &[DetectedObject],
        mut trace: Vec<String>,
    ) -> Resolution {
        let Some(ray) = snapshot.ray() else {
            trace.push("tier 2: pointing ray not yet received".to_string());
            return Resolution::none("pointing ray not available", trace);
        };
        let Some(frame) = snapshot.frame else {
            trace.push("tier 2: frame dimensions not yet received".to_string());
            return Resolution::none("frame dimensions not available", trace);
        };

        trace.push(format!(
            "tier 2: ray slope={} intercept={} over frame {}x{}, {} candidates",
            ray.slope,
            ray.intercept,
            frame.width,
            frame.height,
            detections.len()
        ));
        if let Some(obj) = pick_by_ray_intersection(&ray, frame, detections) {
            return Resolution::found(obj, Tier::RayIntersection, trace);
        }
        trace.push("tier 2: ray crossed no bounding box, falling back".to_string());

        let outcome = pick_nearest_to_ray(&ray, detections);
        for (idx, err) in &outcome.skipped {
            trace.push(format!("tier 3: skipped candidate {}: {}", idx, err));
        }
        match outcome.selected {
            Some(obj) => Resolution::found(obj, Tier::PerpendicularDistance, trace),
            None => {
                trace.push("tier 3: no candidate could be evaluated".to_string());
                Resolution::none("no tier produced a match", trace)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;

    fn obj(class: &str, x: f64) -> DetectedObject {
        DetectedObject::new(class, BoundingBox::new(x, 10.0, 5.0, 5.0))
    }

    #[test]
    fn mode_parses_and_displays() {
        assert_eq!(
            "Simplified".parse::<ResolutionMode>().unwrap(),
            ResolutionMode::Simplified
        );
        assert_eq!(
            "geometric".parse::<ResolutionMode>().unwrap(),
            ResolutionMode::Geometric
        );
        assert!("fast".parse::<ResolutionMode>().is_err());
        assert_eq!(ResolutionMode::Geometric.to_string(), "geometric");
    }

    #[test]
    fn left_selects_maximum_x_offset() {
        let detections = vec![obj("a", 2.0), obj("b", 9.0)];
        let picked = pick_by_direction(PointingDirection::Left, &detections).unwrap();
        assert_eq!(picked.class_name, "b");
    }

    #[test]
    fn right_selects_minimum_x_offset() {
        let detections = vec![obj("a", 2.0), obj("b", 9.0)];
        let picked = pick_by_direction(PointingDirection::Right, &detections).unwrap();
        assert_eq!(picked.class_name, "a");
    }

    #[test]
    fn unknown_direction_picks_nothing() {
        let detections = vec![obj("a", 2.0)];
        assert!(pick_by_direction(PointingDirection::Unknown, &detections).is_none());
    }

    #[test]
    fn empty_detections_pick_nothing() {
        assert!(pick_by_direction(PointingDirection::Left, &[]).is_none());
    }

    #[test]
    fn directional_ties_keep_first_seen() {
        let detections = vec![obj("first", 5.0), obj("second", 5.0), obj("third", 3.0)];
        let picked = pick_by_direction(PointingDirection::Right, &detections).unwrap();
        assert_eq!(picked.class_name, "third");

        let detections = vec![obj("first", 5.0), obj("second", 5.0)];
        let picked = pick_by_direction(PointingDirection::Right, &detections).unwrap();
        assert_eq!(picked.class_name, "first");
        let picked = pick_by_direction(PointingDirection::Left, &detections).unwrap();
        assert_eq!(picked.class_name, "first");
    }

    #[test]
    fn zero_slope_ray_skips_every_candidate() {
        let ray = PointingRay::new(0.0, 50.0);
        let detections = vec![obj("a", 2.0), obj("b", 9.0)];
        let outcome = pick_nearest_to_ray(&ray, &detections);
        assert!(outcome.selected.is_none());
        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(outcome.skipped[0].1, GeometryError::DivisionByZero);
    }

    #[test]
    fn nearest_distance_ties_keep_first_seen() {
        // Ray along y = x; two unit boxes mirrored across it are equidistant.
        let ray = PointingRay::new(1.0, 0.0);
        let detections = vec![
            DetectedObject::new("above", BoundingBox::new(9.5, 19.5, 1.0, 1.0)),
            DetectedObject::new("below", BoundingBox::new(19.5, 9.5, 1.0, 1.0)),
        ];
        let outcome = pick_nearest_to_ray(&ray, &detections);
        assert_eq!(outcome.selected.unwrap().class_name, "above");
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn non_finite_ray_never_selects_a_candidate() {
        // Both slopes make every distance NaN; no candidate may win on a
        // comparison against NaN.
        let detections = vec![obj("a", 2.0), obj("b", 9.0)];
        for slope in [f64::NAN, f64::INFINITY] {
            let outcome = pick_nearest_to_ray(&PointingRay::new(slope, 0.0), &detections);
            assert!(outcome.selected.is_none());
        }
    }

    #[test]
    fn geometric_mode_without_ray_is_explicit_none() {
        let resolver = Resolver::new(ResolutionMode::Geometric);
        let snapshot = SignalSnapshot {
            detections: Some(vec![obj("a", 2.0)]),
            ..Default::default()
        };
        let res = resolver.resolve(&snapshot);
        assert!(res.selected.is_none());
        assert_eq!(res.reason, "pointing ray not available");
    }

    #[test]
    fn class_filter_short_circuits_before_tiers() {
        let resolver =
            Resolver::new(ResolutionMode::Geometric).with_class_filter(Some("cup".to_string()));
        // No ray in the snapshot: if a tier ran, the reason would mention it.
        let snapshot = SignalSnapshot {
            detections: Some(vec![obj("bottle", 2.0)]),
            ..Default::default()
        };
        let res = resolver.resolve(&snapshot);
        assert!(res.selected.is_none());
        assert_eq!(res.reason, "class filter \"cup\" matched no detections");
    }
}
