use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::geometry::Coordinate;

/// Lighting penalty added by providers when the traveler is on foot.
pub const WALKING_LIGHTING_BOOST: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Drive,
    Walk,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Drive => "drive",
            TransportMode::Walk => "walk",
        }
    }
}

/// Elementary risk factors at one coordinate, each in [0, 1] (0 = safe).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskFactors {
    pub incident: f64,
    pub lighting: f64,
    pub crime: f64,
    pub weather: f64,
}

impl RiskFactors {
    /// What a provider answers when it has nothing better.
    pub const NEUTRAL: RiskFactors = RiskFactors {
        incident: 0.5,
        lighting: 0.5,
        crime: 0.5,
        weather: 0.5,
    };

    pub fn clamped(self) -> Self {
        Self {
            incident: unit(self.incident),
            lighting: unit(self.lighting),
            crime: unit(self.crime),
            weather: unit(self.weather),
        }
    }

    /// Applies the mode-specific adjustments (walking is darker).
    pub fn for_mode(self, mode: TransportMode) -> Self {
        match mode {
            TransportMode::Drive => self.clamped(),
            TransportMode::Walk => Self {
                lighting: self.lighting + WALKING_LIGHTING_BOOST,
                ..self
            }
            .clamped(),
        }
    }
}

/// Clamps into [0, 1]; anything non-finite counts as worst case.
fn unit(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 1.0 }
}

/// How the four factors combine into one score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub incident: f64,
    pub lighting: f64,
    pub crime: f64,
    pub weather: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            incident: 0.4,
            lighting: 0.25,
            crime: 0.25,
            weather: 0.10,
        }
    }
}

impl RiskWeights {
    pub fn sum(&self) -> f64 {
        self.incident + self.lighting + self.crime + self.weather
    }

    /// Scales the weights to sum to 1. A zero sum is returned unchanged.
    pub fn normalized(&self) -> Self {
        let sum = self.sum();
        if sum <= 0.0 {
            return *self;
        }
        Self {
            incident: self.incident / sum,
            lighting: self.lighting / sum,
            crime: self.crime / sum,
            weather: self.weather / sum,
        }
    }

    pub fn score(&self, f: &RiskFactors) -> f64 {
        self.incident * f.incident
            + self.lighting * f.lighting
            + self.crime * f.crime
            + self.weather * f.weather
    }
}

/// Source of risk factors for a coordinate.
///
/// Implementations never fail: on an internal error they answer
/// [`RiskFactors::NEUTRAL`] so one bad sample cannot abort a scoring pass.
/// Calls for different coordinates may run concurrently.
#[async_trait]
pub trait RiskFactorProvider: Send + Sync {
    async fn risk(&self, coordinate: Coordinate, mode: TransportMode) -> RiskFactors;
}

/// Deterministic pseudo-random factors derived from the coordinate itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockRiskProvider;

#[async_trait]
impl RiskFactorProvider for MockRiskProvider {
    async fn risk(&self, coordinate: Coordinate, mode: TransportMode) -> RiskFactors {
        let Coordinate { lat, lon } = coordinate;
        let base = base_noise(lat, lon);

        RiskFactors {
            incident: base * 0.6 + smooth_noise(lon) * 0.4,
            lighting: base * 0.5 + smooth_noise(lat) * 0.5,
            crime: 0.3 + base * 0.5 + smooth_noise(lat + lon) * 0.2,
            weather: 0.2 + smooth_noise(lat * 0.5 - lon * 0.3) * 0.6,
        }
        .for_mode(mode)
    }
}

fn smooth_noise(x: f64) -> f64 {
    let s = (x * 1.7).sin() * 0.5 + 0.5;
    let c = (x * 0.9).cos() * 0.5 + 0.5;
    unit(s * 0.6 + c * 0.4)
}

fn base_noise(lat: f64, lon: f64) -> f64 {
    let v = (lat * 0.01).sin() * (lon * 0.01).cos();
    unit(v * 0.5 + 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_weights_already_sum_to_one() {
        assert!((RiskWeights::default().normalized().sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_weights_normalize_to_themselves() {
        let zero = RiskWeights {
            incident: 0.0,
            lighting: 0.0,
            crime: 0.0,
            weather: 0.0,
        };
        let n = zero.normalized();
        assert_eq!(n, zero);
        assert_eq!(n.score(&RiskFactors::NEUTRAL), 0.0);
    }

    #[test]
    fn walking_boosts_lighting_only() {
        let f = RiskFactors {
            incident: 0.2,
            lighting: 0.9,
            crime: 0.1,
            weather: 0.3,
        };
        let walk = f.for_mode(TransportMode::Walk);
        assert_eq!(walk.lighting, 1.0);
        assert_eq!(walk.incident, 0.2);
        assert_eq!(f.for_mode(TransportMode::Drive), f);
    }

    #[test]
    fn non_finite_factors_clamp_to_worst() {
        let f = RiskFactors {
            incident: f64::NAN,
            ..RiskFactors::NEUTRAL
        };
        assert_eq!(f.clamped().incident, 1.0);
    }

    #[tokio::test]
    async fn mock_provider_is_deterministic_and_in_range() {
        let provider = MockRiskProvider;
        let at = Coordinate::new(41.9028, 12.4964);
        let a = provider.risk(at, TransportMode::Walk).await;
        let b = provider.risk(at, TransportMode::Walk).await;
        assert_eq!(a, b);
        for v in [a.incident, a.lighting, a.crime, a.weather] {
            assert!((0.0..=1.0).contains(&v));
        }
        let drive = provider.risk(at, TransportMode::Drive).await;
        assert!(a.lighting >= drive.lighting);
    }

    fn weight() -> impl Strategy<Value = f64> {
        0.0..10.0f64
    }

    fn factor() -> impl Strategy<Value = f64> {
        0.0..=1.0f64
    }

    proptest! {
        #[test]
        fn prop_normalized_weights_sum_to_one(
            i in weight(), l in weight(), c in weight(), w in weight()
        ) {
            let weights = RiskWeights { incident: i, lighting: l, crime: c, weather: w };
            prop_assume!(weights.sum() > 0.0);
            prop_assert!((weights.normalized().sum() - 1.0).abs() < 1e-9);
        }

        #[test]
        fn prop_score_within_unit_interval(
            i in weight(), l in weight(), c in weight(), w in weight(),
            fi in factor(), fl in factor(), fc in factor(), fw in factor()
        ) {
            let weights = RiskWeights { incident: i, lighting: l, crime: c, weather: w }.normalized();
            let factors = RiskFactors { incident: fi, lighting: fl, crime: fc, weather: fw };
            let score = weights.score(&factors);
            prop_assert!(score >= 0.0);
            prop_assert!(score <= 1.0 + 1e-9);
        }

        #[test]
        fn prop_mock_factors_in_range(lat in -90.0..=90.0f64, lon in -180.0..=180.0f64) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let f = rt.block_on(MockRiskProvider.risk(Coordinate::new(lat, lon), TransportMode::Walk));
            for v in [f.incident, f.lighting, f.crime, f.weather] {
                prop_assert!((0.0..=1.0).contains(&v));
            }
        }
    }
}
