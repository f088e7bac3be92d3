use geo::Point;
use geo::prelude::*;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Segments shorter than this (in projected degrees squared) are treated as points.
const DEGENERATE_SEGMENT_EPSILON: f64 = 1e-18;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// geo uses x = longitude, y = latitude.
    pub fn to_point(self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        self.to_point().haversine_distance(&other.to_point())
    }

    /// Linear interpolation in lat/lon space, `t` in [0, 1].
    pub fn lerp(self, other: Coordinate, t: f64) -> Coordinate {
        Coordinate {
            lat: self.lat + (other.lat - self.lat) * t,
            lon: self.lon + (other.lon - self.lon) * t,
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

impl From<Point<f64>> for Coordinate {
    fn from(p: Point<f64>) -> Self {
        Coordinate::new(p.y(), p.x())
    }
}

/// One manoeuvre of a route, as reported by the routing provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    pub instruction: String,
    pub distance_m: f64,
}

/// A candidate route: polyline geometry plus its total length and expected duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    coordinates: Vec<Coordinate>,
    length_m: f64,
    duration_s: f64,
    #[serde(default)]
    steps: Vec<RouteStep>,
}

impl Path {
    pub fn new(coordinates: Vec<Coordinate>, length_m: f64, duration_s: f64) -> Self {
        Self {
            coordinates,
            length_m: length_m.max(0.0),
            duration_s: duration_s.max(0.0),
            steps: Vec::new(),
        }
    }

    /// Builds a path whose length is the sum of its segment lengths.
    pub fn from_coordinates(coordinates: Vec<Coordinate>, duration_s: f64) -> Self {
        let length_m = polyline_length(&coordinates);
        Self::new(coordinates, length_m, duration_s)
    }

    pub fn with_steps(mut self, steps: Vec<RouteStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coordinates
    }

    pub fn length_m(&self) -> f64 {
        self.length_m
    }

    pub fn duration_s(&self) -> f64 {
        self.duration_s
    }

    pub fn steps(&self) -> &[RouteStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    /// Meters per second implied by length and duration; `None` when either is zero.
    pub fn average_speed(&self) -> Option<f64> {
        if self.length_m > 0.0 && self.duration_s > 0.0 {
            Some(self.length_m / self.duration_s)
        } else {
            None
        }
    }
}

pub fn polyline_length(coordinates: &[Coordinate]) -> f64 {
    coordinates
        .iter()
        .tuple_windows()
        .map(|(a, b)| a.distance_to(b))
        .sum()
}

/// Where a position lands on a polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Index of the segment start vertex.
    pub segment: usize,
    /// Clamped parameter along the segment.
    pub t: f64,
    pub point: Coordinate,
    /// Distance from the queried position to `point`, meters.
    pub offset_m: f64,
    /// Distance along the polyline from its first vertex to `point`, meters.
    pub traveled_m: f64,
}

/// Finds the closest point on `coordinates` to `position`.
///
/// Each segment is projected in a local equirectangular plane centred on the
/// segment, with `t` clamped to [0, 1]; the segment with the smallest
/// great-circle offset wins, earliest segment on ties.
pub fn project_onto(coordinates: &[Coordinate], position: Coordinate) -> Option<Projection> {
    match coordinates {
        [] => None,
        [only] => Some(Projection {
            segment: 0,
            t: 0.0,
            point: *only,
            offset_m: only.distance_to(&position),
            traveled_m: 0.0,
        }),
        _ => {
            let mut best: Option<Projection> = None;
            let mut preceding_m = 0.0;

            for (segment, (a, b)) in coordinates.iter().tuple_windows().enumerate() {
                let segment_m = a.distance_to(b);
                let t = segment_parameter(*a, *b, position);
                let point = a.lerp(*b, t);
                let offset_m = point.distance_to(&position);

                if best.is_none_or(|current| offset_m < current.offset_m) {
                    best = Some(Projection {
                        segment,
                        t,
                        point,
                        offset_m,
                        traveled_m: preceding_m + segment_m * t,
                    });
                }
                preceding_m += segment_m;
            }

            best
        }
    }
}

fn segment_parameter(a: Coordinate, b: Coordinate, p: Coordinate) -> f64 {
    let scale = ((a.lat + b.lat) / 2.0).to_radians().cos();
    let (ax, ay) = (a.lon * scale, a.lat);
    let (dx, dy) = (b.lon * scale - ax, b.lat - ay);
    let (px, py) = (p.lon * scale - ax, p.lat - ay);

    let len2 = dx * dx + dy * dy;
    if len2 <= DEGENERATE_SEGMENT_EPSILON {
        return 0.0;
    }
    ((px * dx + py * dy) / len2).clamp(0.0, 1.0)
}

/// Human-readable distance: whole meters below 1 km, one decimal km above.
pub fn format_distance(distance_m: Option<f64>) -> String {
    match distance_m {
        None => "–".to_string(),
        Some(d) if d < 1000.0 => format!("{} m", d.max(0.0) as i64),
        Some(d) => format!("{:.1} km", d / 1000.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn equator_path() -> Vec<Coordinate> {
        vec![Coordinate::new(0.0, 0.0), Coordinate::new(0.0, 10.0)]
    }

    #[test]
    fn polyline_length_of_single_point_is_zero() {
        assert_eq!(polyline_length(&[Coordinate::new(45.0, 5.0)]), 0.0);
        assert_eq!(polyline_length(&[]), 0.0);
    }

    #[test]
    fn projection_on_path_midpoint() {
        let path = equator_path();
        let total = polyline_length(&path);
        let proj = project_onto(&path, Coordinate::new(0.0, 5.0)).unwrap();

        assert!((proj.t - 0.5).abs() < 1e-9);
        assert!((proj.traveled_m - total / 2.0).abs() < 1e-6);
        assert!(proj.offset_m < 1e-6);
    }

    #[test]
    fn projection_uses_perpendicular_foot() {
        let path = equator_path();
        let total = polyline_length(&path);
        let proj = project_onto(&path, Coordinate::new(3.0, 5.0)).unwrap();

        assert!((proj.point.lat).abs() < 1e-9);
        assert!((proj.point.lon - 5.0).abs() < 1e-9);
        assert!((proj.traveled_m - total / 2.0).abs() < 1e-6);
        assert!(proj.offset_m > 300_000.0);
    }

    #[test]
    fn projection_clamps_before_start_and_after_end() {
        let path = equator_path();
        let total = polyline_length(&path);

        let before = project_onto(&path, Coordinate::new(0.0, -2.0)).unwrap();
        assert_eq!(before.t, 0.0);
        assert_eq!(before.traveled_m, 0.0);

        let after = project_onto(&path, Coordinate::new(1.0, 12.0)).unwrap();
        assert_eq!(after.t, 1.0);
        assert!((after.traveled_m - total).abs() < 1e-6);
    }

    #[test]
    fn projection_accumulates_preceding_segments() {
        let path = vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(0.0, 1.0),
            Coordinate::new(1.0, 1.0),
        ];
        let first = path[0].distance_to(&path[1]);
        let proj = project_onto(&path, Coordinate::new(0.5, 1.2)).unwrap();

        assert_eq!(proj.segment, 1);
        assert!(proj.traveled_m > first);
    }

    #[test]
    fn projection_of_empty_path_is_none() {
        assert!(project_onto(&[], Coordinate::new(0.0, 0.0)).is_none());
    }

    #[test]
    fn average_speed_guards_zero() {
        let coords = equator_path();
        assert!(Path::from_coordinates(coords.clone(), 0.0).average_speed().is_none());
        assert!(Path::new(coords.clone(), 0.0, 60.0).average_speed().is_none());
        assert!(Path::from_coordinates(coords, 60.0).average_speed().is_some());
    }

    #[test]
    fn formats_distances() {
        assert_eq!(format_distance(None), "–");
        assert_eq!(format_distance(Some(850.7)), "850 m");
        assert_eq!(format_distance(Some(1234.0)), "1.2 km");
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(Coordinate::new(45.0, 5.0).is_valid());
        assert!(!Coordinate::new(91.0, 5.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 5.0).is_valid());
    }
}
