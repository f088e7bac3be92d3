//! Trip lifecycle: safest-route selection and live remaining distance/ETA.
//!
//! [`TripRouteCoordinator`] is the only writer of [`TripState`]. Observers read
//! it through [`TripRouteCoordinator::subscribe`] or
//! [`TripRouteCoordinator::snapshot`]. Every calculation is tagged with a
//! generation number; a result is published only if no newer calculation or
//! `clear_route` happened in the meantime.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::geometry::{Coordinate, Path, RouteStep, format_distance, project_onto};
use crate::risk::TransportMode;
use crate::routing::{RoutingError, RoutingProvider};
use crate::scorer::{RouteSafetyScorer, WORST_SCORE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TripPhase {
    #[default]
    Idle,
    Calculating,
    HasRoute,
    NoRouteFound,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TripErrorKind {
    NoRouteFound,
    RoutingProviderFailure,
}

impl TripErrorKind {
    pub fn code(&self) -> u16 {
        match self {
            TripErrorKind::NoRouteFound => 404,
            TripErrorKind::RoutingProviderFailure => 503,
        }
    }
}

/// User-facing failure of a route calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[error("{message}")]
pub struct TripError {
    pub kind: TripErrorKind,
    pub code: u16,
    pub message: String,
}

impl TripError {
    pub fn no_route_found() -> Self {
        Self::new(TripErrorKind::NoRouteFound, "No route found.".to_string())
    }

    pub fn routing_failure(err: &RoutingError) -> Self {
        Self::new(
            TripErrorKind::RoutingProviderFailure,
            format!("Route calculation failed: {err}"),
        )
    }

    fn new(kind: TripErrorKind, message: String) -> Self {
        Self {
            kind,
            code: kind.code(),
            message,
        }
    }
}

/// A candidate path with its aggregate risk score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub path: Arc<Path>,
    pub score: f64,
}

/// Lowest score wins; ties go to the earliest candidate. NaN counts as worst.
pub fn select_safest(candidates: &[ScoredCandidate]) -> Option<&ScoredCandidate> {
    let mut best: Option<(&ScoredCandidate, f64)> = None;
    for candidate in candidates {
        let score = if candidate.score.is_nan() {
            WORST_SCORE
        } else {
            candidate.score
        };
        if best.is_none_or(|(_, lowest)| score < lowest) {
            best = Some((candidate, score));
        }
    }
    best.map(|(candidate, _)| candidate)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TripState {
    pub phase: TripPhase,
    pub selected_path: Option<Arc<Path>>,
    pub selected_score: Option<f64>,
    /// Steps of the selected path that carry an instruction.
    pub steps: Vec<RouteStep>,
    pub remaining_distance_m: Option<f64>,
    pub remaining_eta_s: Option<f64>,
    pub is_calculating: bool,
    pub last_error: Option<TripError>,
}

impl TripState {
    pub fn remaining_distance_text(&self) -> String {
        format_distance(self.remaining_distance_m)
    }

    /// Wall-clock arrival time, `now` plus the remaining ETA.
    pub fn arrival_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let eta = self.remaining_eta_s.filter(|eta| eta.is_finite() && *eta >= 0.0)?;
        now.checked_add_signed(TimeDelta::milliseconds((eta * 1000.0).round() as i64))
    }

    fn begin(&mut self) {
        self.phase = TripPhase::Calculating;
        self.is_calculating = true;
        self.last_error = None;
    }

    fn clear_route_fields(&mut self) {
        self.selected_path = None;
        self.selected_score = None;
        self.steps.clear();
        self.remaining_distance_m = None;
        self.remaining_eta_s = None;
    }

    fn fail(&mut self, phase: TripPhase, error: TripError) {
        self.clear_route_fields();
        self.phase = phase;
        self.is_calculating = false;
        self.last_error = Some(error);
    }

    fn select(&mut self, candidate: &ScoredCandidate) {
        let path = Arc::clone(&candidate.path);
        self.steps = path
            .steps()
            .iter()
            .filter(|s| !s.instruction.trim().is_empty())
            .cloned()
            .collect();
        self.remaining_distance_m = Some(path.length_m());
        self.remaining_eta_s = Some(path.duration_s());
        self.selected_score = Some(candidate.score);
        self.selected_path = Some(path);
        self.phase = TripPhase::HasRoute;
        self.is_calculating = false;
        self.last_error = None;
    }

    fn track(&mut self, position: Coordinate) {
        let projection = self
            .selected_path
            .as_ref()
            .and_then(|path| project_onto(path.coordinates(), position).map(|p| (path, p)));

        let Some((path, projection)) = projection else {
            self.remaining_distance_m = None;
            self.remaining_eta_s = None;
            return;
        };

        let total = path.length_m();
        let remaining = (total - projection.traveled_m).clamp(0.0, total);
        self.remaining_eta_s = path.average_speed().map(|speed| remaining / speed);
        self.remaining_distance_m = Some(remaining);
    }
}

/// Owns one trip's [`TripState`] and drives route selection and tracking.
pub struct TripRouteCoordinator {
    router: Arc<dyn RoutingProvider>,
    scorer: Arc<RouteSafetyScorer>,
    state: watch::Sender<TripState>,
    generation: AtomicU64,
}

impl TripRouteCoordinator {
    pub fn new(router: Arc<dyn RoutingProvider>, scorer: Arc<RouteSafetyScorer>) -> Self {
        let (state, _) = watch::channel(TripState::default());
        Self {
            router,
            scorer,
            state,
            generation: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TripState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> TripState {
        self.state.borrow().clone()
    }

    /// Requests candidates, scores them concurrently and publishes the safest.
    ///
    /// Never returns an error: failures land in `TripState::last_error`.
    pub async fn calculate_route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TransportMode,
    ) {
        let in_flight = self.begin();
        let generation = in_flight.generation;
        info!(generation, mode = mode.as_str(), %origin, %destination, "calculating route");

        let candidates = match self.router.route(origin, destination, mode, true).await {
            Ok(paths) => paths,
            Err(err) => {
                warn!(generation, error = %err, "route calculation failed");
                self.publish(generation, |s| {
                    s.fail(TripPhase::Failed, TripError::routing_failure(&err))
                });
                return;
            }
        };

        let candidates: Vec<Arc<Path>> = candidates
            .into_iter()
            .filter(|path| !path.is_empty())
            .map(Arc::new)
            .collect();

        if candidates.is_empty() {
            info!(generation, "no route found");
            self.publish(generation, |s| {
                s.fail(TripPhase::NoRouteFound, TripError::no_route_found())
            });
            return;
        }

        if !self.is_current(generation) {
            debug!(generation, "superseded before scoring");
            return;
        }

        info!(generation, candidates = candidates.len(), "scoring candidates");
        let scored = self.score_all(candidates, mode).await;

        let Some(best) = select_safest(&scored) else {
            self.publish(generation, |s| {
                s.fail(TripPhase::NoRouteFound, TripError::no_route_found())
            });
            return;
        };

        info!(
            generation,
            score = best.score,
            length_m = best.path.length_m(),
            duration_s = best.path.duration_s(),
            "selected safest route"
        );
        self.publish(generation, |s| s.select(best));
    }

    /// Recomputes remaining distance and ETA from a live position.
    pub fn update_distance_and_eta(&self, position: Coordinate) {
        if !position.is_valid() {
            warn!(%position, "ignoring invalid position");
            return;
        }
        self.state.send_modify(|s| s.track(position));
    }

    /// Resets the trip and invalidates any calculation still in flight.
    pub fn clear_route(&self) {
        self.state.send_modify(|s| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            *s = TripState::default();
        });
    }

    fn begin(&self) -> InFlight<'_> {
        let mut generation = 0;
        self.state.send_modify(|s| {
            generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            s.begin();
        });
        InFlight {
            trip: self,
            generation,
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Applies `update` only if `generation` is still the latest calculation.
    fn publish(&self, generation: u64, update: impl FnOnce(&mut TripState)) -> bool {
        let published = self.state.send_if_modified(|s| {
            if !self.is_current(generation) {
                return false;
            }
            update(s);
            true
        });
        if !published {
            debug!(generation, "discarding stale route result");
        }
        published
    }

    /// One task per candidate; a task that fails scores as worst case.
    async fn score_all(&self, candidates: Vec<Arc<Path>>, mode: TransportMode) -> Vec<ScoredCandidate> {
        let mut tasks = JoinSet::new();
        for (index, path) in candidates.iter().enumerate() {
            let scorer = Arc::clone(&self.scorer);
            let path = Arc::clone(path);
            tasks.spawn(async move { (index, scorer.score(&path, mode).await) });
        }

        let mut scores = vec![WORST_SCORE; candidates.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, score)) => {
                    debug!(index, score, "candidate scored");
                    scores[index] = score;
                }
                Err(err) => warn!(error = %err, "candidate scoring failed, using worst score"),
            }
        }

        candidates
            .into_iter()
            .zip(scores)
            .map(|(path, score)| ScoredCandidate { path, score })
            .collect()
    }
}

/// Marks a calculation as started; if the calculation future is dropped
/// before publishing, the still-current state stops showing it as calculating.
struct InFlight<'a> {
    trip: &'a TripRouteCoordinator,
    generation: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let abandoned = self.trip.state.send_if_modified(|s| {
            if !self.trip.is_current(self.generation) || !s.is_calculating {
                return false;
            }
            s.is_calculating = false;
            s.phase = if s.selected_path.is_some() {
                TripPhase::HasRoute
            } else {
                TripPhase::Idle
            };
            true
        });
        if abandoned {
            debug!(generation = self.generation, "calculation abandoned");
        }
    }
}
