use futures::future::join_all;
use itertools::Itertools;
use std::sync::Arc;

use crate::geometry::{Coordinate, Path, polyline_length};
use crate::risk::{RiskFactorProvider, RiskWeights, TransportMode};

pub const DEFAULT_SAMPLE_SPACING_M: f64 = 150.0;
/// Shorter spacings are raised to this to avoid oversampling.
pub const MIN_SAMPLE_SPACING_M: f64 = 30.0;
/// Score given to paths that cannot be sampled.
pub const WORST_SCORE: f64 = 1.0;

/// Samples closer than this are considered the same point.
const SAME_POINT_M: f64 = 1e-6;

/// Scores a path by the weighted mean of risk factors sampled along it.
///
/// Lower is safer. Samples are taken every `sample_spacing_m` meters, interpolated
/// along segments, plus the first and last vertex.
#[derive(Clone)]
pub struct RouteSafetyScorer {
    provider: Arc<dyn RiskFactorProvider>,
    weights: RiskWeights,
    sample_spacing_m: f64,
}

impl RouteSafetyScorer {
    pub fn new(
        provider: Arc<dyn RiskFactorProvider>,
        weights: RiskWeights,
        sample_spacing_m: f64,
    ) -> Self {
        Self {
            provider,
            weights: weights.normalized(),
            sample_spacing_m: sample_spacing_m.max(MIN_SAMPLE_SPACING_M),
        }
    }

    pub fn with_defaults(provider: Arc<dyn RiskFactorProvider>) -> Self {
        Self::new(provider, RiskWeights::default(), DEFAULT_SAMPLE_SPACING_M)
    }

    pub fn weights(&self) -> &RiskWeights {
        &self.weights
    }

    pub fn sample_spacing_m(&self) -> f64 {
        self.sample_spacing_m
    }

    pub async fn score(&self, path: &Path, mode: TransportMode) -> f64 {
        let coordinates = path.coordinates();
        if polyline_length(coordinates) <= 0.0 {
            return WORST_SCORE;
        }

        let samples = sample_coordinates(coordinates, self.sample_spacing_m);
        if samples.is_empty() {
            return WORST_SCORE;
        }

        let factors = join_all(
            samples
                .iter()
                .map(|&coordinate| self.provider.risk(coordinate, mode)),
        )
        .await;

        let total: f64 = factors
            .iter()
            .map(|f| self.weights.score(&f.clamped()))
            .sum();
        total / factors.len() as f64
    }
}

/// Coordinates every `spacing_m` meters along the polyline, always including both ends.
///
/// Sample positions are interpolated inside segments, so long sparse segments
/// still get evenly spaced samples. Returns nothing for fewer than two vertices.
pub fn sample_coordinates(coordinates: &[Coordinate], spacing_m: f64) -> Vec<Coordinate> {
    let (Some(&first), Some(&last)) = (coordinates.first(), coordinates.last()) else {
        return Vec::new();
    };
    if coordinates.len() < 2 || spacing_m <= 0.0 {
        return Vec::new();
    }

    let mut samples = vec![first];
    let mut since_last_m = 0.0;

    for (a, b) in coordinates.iter().tuple_windows() {
        let segment_m = a.distance_to(b);
        if segment_m <= 0.0 {
            continue;
        }

        // Offset inside this segment of the next sample.
        let mut offset_m = spacing_m - since_last_m;
        while offset_m <= segment_m {
            samples.push(a.lerp(*b, offset_m / segment_m));
            offset_m += spacing_m;
        }
        since_last_m = segment_m - (offset_m - spacing_m);
    }

    let ends_on_last = samples
        .last()
        .is_some_and(|s| s.distance_to(&last) <= SAME_POINT_M);
    if !ends_on_last {
        samples.push(last);
    }
    samples
}
