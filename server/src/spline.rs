//! Precomputed lane network the traffic drives on
//!
//! Every lane is an arena of points; neighbours are stored as indices into the
//! same lane so traversal stays O(1) without reference cycles. The network is
//! built once at startup and shared read-only between the simulation and
//! networking tasks.

use glam::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SplineError {
    #[error("spline network has no lanes")]
    NoLanes,
    #[error("lane {lane} has {count} points, at least 2 are required")]
    TooFewPoints { lane: usize, count: usize },
    #[error("failed to read map file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode map file: {0}")]
    Decode(#[from] bincode::Error),
}

/// Address of one point in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointRef {
    pub lane: usize,
    pub index: usize,
}

impl PointRef {
    pub fn new(lane: usize, index: usize) -> Self {
        Self { lane, index }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PathPoint {
    pub position: Vec3,
    pub previous: Option<usize>,
    pub next: Option<usize>,
}

/// One lane: an ordered run of points, optionally looping back to its start.
#[derive(Debug, Clone)]
pub struct Spline {
    points: Vec<PathPoint>,
    closed: bool,
}

impl Spline {
    pub fn new(positions: Vec<Vec3>, closed: bool) -> Self {
        let len = positions.len();
        let points = positions
            .into_iter()
            .enumerate()
            .map(|(i, position)| PathPoint {
                position,
                previous: match i {
                    0 if closed && len > 1 => Some(len - 1),
                    0 => None,
                    _ => Some(i - 1),
                },
                next: if i + 1 < len {
                    Some(i + 1)
                } else if closed && len > 1 {
                    Some(0)
                } else {
                    None
                },
            })
            .collect();

        Self { points, closed }
    }

    pub fn points(&self) -> &[PathPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Position and unit tangent sampled from a curve segment.
#[derive(Debug, Clone, Copy)]
pub struct CurveSample {
    pub position: Vec3,
    pub tangent: Vec3,
}

/// Cubic Hermite evaluation of the segment `p0 -> p1` with tangents `m0`, `m1`.
pub fn catmull_rom(p0: Vec3, p1: Vec3, m0: Vec3, m1: Vec3, t: f32) -> CurveSample {
    let t2 = t * t;
    let t3 = t2 * t;

    let position = (2.0 * t3 - 3.0 * t2 + 1.0) * p0
        + (t3 - 2.0 * t2 + t) * m0
        + (-2.0 * t3 + 3.0 * t2) * p1
        + (t3 - t2) * m1;

    let tangent = (6.0 * t2 - 6.0 * t) * p0
        + (3.0 * t2 - 4.0 * t + 1.0) * m0
        + (-6.0 * t2 + 6.0 * t) * p1
        + (3.0 * t2 - 2.0 * t) * m1;

    CurveSample {
        position,
        tangent: tangent.normalize_or_zero(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapLane {
    pub points: Vec<Vec3>,
    pub closed: bool,
}

/// On-disk form of a network, bincode encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapFile {
    pub lanes: Vec<MapLane>,
}

#[derive(Debug, Clone)]
pub struct SplineNetwork {
    lanes: Vec<Spline>,
}

impl SplineNetwork {
    pub fn new(lanes: Vec<Spline>) -> Result<Self, SplineError> {
        if lanes.is_empty() {
            return Err(SplineError::NoLanes);
        }

        for (lane, spline) in lanes.iter().enumerate() {
            if spline.len() < 2 {
                return Err(SplineError::TooFewPoints {
                    lane,
                    count: spline.len(),
                });
            }
        }

        Ok(Self { lanes })
    }

    pub fn from_map(map: MapFile) -> Result<Self, SplineError> {
        Self::new(
            map.lanes
                .into_iter()
                .map(|lane| Spline::new(lane.points, lane.closed))
                .collect(),
        )
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SplineError> {
        let bytes = fs::read(path)?;
        let map: MapFile = bincode::deserialize(&bytes)?;
        Self::from_map(map)
    }

    pub fn to_map(&self) -> MapFile {
        MapFile {
            lanes: self
                .lanes
                .iter()
                .map(|lane| MapLane {
                    points: lane.points.iter().map(|p| p.position).collect(),
                    closed: lane.closed,
                })
                .collect(),
        }
    }

    /// A closed oval plus an open straight, used when no map file is given.
    pub fn demo() -> Self {
        const STRAIGHT: f32 = 400.0;
        const RADIUS: f32 = 100.0;
        const STEP: f32 = 10.0;

        let mut oval = Vec::new();
        let straight_steps = (STRAIGHT / STEP) as usize;
        let arc_steps = (PI * RADIUS / STEP) as usize;

        for i in 0..straight_steps {
            oval.push(Vec3::new(RADIUS, 0.0, i as f32 * STEP));
        }
        for i in 0..arc_steps {
            let angle = PI * i as f32 / arc_steps as f32;
            oval.push(Vec3::new(RADIUS * angle.cos(), 0.0, STRAIGHT + RADIUS * angle.sin()));
        }
        for i in 0..straight_steps {
            oval.push(Vec3::new(-RADIUS, 0.0, STRAIGHT - i as f32 * STEP));
        }
        for i in 0..arc_steps {
            let angle = PI + PI * i as f32 / arc_steps as f32;
            oval.push(Vec3::new(RADIUS * angle.cos(), 0.0, RADIUS * angle.sin()));
        }

        let straight = (0..=100)
            .map(|i| Vec3::new(-500.0 + i as f32 * STEP, 0.0, -300.0))
            .collect();

        Self {
            lanes: vec![Spline::new(oval, true), Spline::new(straight, false)],
        }
    }

    pub fn lanes(&self) -> &[Spline] {
        &self.lanes
    }

    pub fn lane(&self, lane: usize) -> Option<&Spline> {
        self.lanes.get(lane)
    }

    /// First point of the first lane; respawn target after a path runs out.
    pub fn origin(&self) -> PointRef {
        PointRef::new(0, 0)
    }

    pub fn point(&self, point: PointRef) -> Option<&PathPoint> {
        self.lanes.get(point.lane)?.points.get(point.index)
    }

    pub fn position(&self, point: PointRef) -> Option<Vec3> {
        self.point(point).map(|p| p.position)
    }

    pub fn next(&self, point: PointRef) -> Option<PointRef> {
        let next = self.point(point)?.next?;
        Some(PointRef::new(point.lane, next))
    }

    pub fn previous(&self, point: PointRef) -> Option<PointRef> {
        let previous = self.point(point)?.previous?;
        Some(PointRef::new(point.lane, previous))
    }

    /// Length of the segment starting at `point`, if it has one.
    pub fn segment_length(&self, point: PointRef) -> Option<f32> {
        let start = self.position(point)?;
        let end = self.position(self.next(point)?)?;
        Some(start.distance(end))
    }

    /// Start and end tangents for the segment starting at `point`.
    ///
    /// Each tangent is half the chord spanning the neighbours on either side
    /// of the segment's endpoint; at lane ends the single adjacent segment is
    /// used instead.
    pub fn tangents(&self, point: PointRef) -> Option<(Vec3, Vec3)> {
        let current = self.position(point)?;
        let next_ref = self.next(point)?;
        let next = self.position(next_ref)?;

        let start = match self.previous(point).and_then(|p| self.position(p)) {
            Some(previous) => (next - previous) * 0.5,
            None => (next - current) * 0.5,
        };

        let end = match self.next(next_ref).and_then(|p| self.position(p)) {
            Some(next_next) => (next_next - current) * 0.5,
            None => (next - current) * 0.5,
        };

        Some((start, end))
    }

    /// Nearest point that still has a forward segment.
    pub fn closest_point(&self, position: Vec3) -> Option<PointRef> {
        let mut best = None;
        let mut min_distance = f32::MAX;

        for (lane, spline) in self.lanes.iter().enumerate() {
            for (index, point) in spline.points.iter().enumerate() {
                if point.next.is_none() {
                    continue;
                }

                let distance = point.position.distance_squared(position);
                if distance < min_distance {
                    min_distance = distance;
                    best = Some(PointRef::new(lane, index));
                }
            }
        }

        best
    }

    /// Follows `next` links for roughly `meters`, stopping early where the
    /// lane runs out of forward segments.
    pub fn walk(&self, from: PointRef, meters: f32) -> PointRef {
        let mut current = from;
        let mut remaining = meters;

        while remaining > 0.0 {
            let Some(next) = self.next(current) else {
                break;
            };
            if self.next(next).is_none() {
                break;
            }

            remaining -= self.segment_length(current).unwrap_or(0.0);
            current = next;
        }

        current
    }

    /// Uniformly random point that has a forward segment.
    pub fn random_point(&self, rng: &mut impl Rng) -> PointRef {
        let lane = rng.gen_range(0..self.lanes.len());
        let spline = &self.lanes[lane];
        let usable = if spline.closed {
            spline.len()
        } else {
            spline.len() - 1
        };

        PointRef::new(lane, rng.gen_range(0..usable))
    }
}
