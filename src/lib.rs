//! Safety-aware route selection and live trip tracking.
//!
//! Candidate routes come from a [`routing::RoutingProvider`], get scored by
//! [`scorer::RouteSafetyScorer`] against a [`risk::RiskFactorProvider`], and the
//! safest one is tracked by a [`trip::TripRouteCoordinator`].

pub mod api;
pub mod config;
pub mod geometry;
pub mod graph;
pub mod risk;
pub mod routing;
pub mod safety;
pub mod scorer;
pub mod trip;

pub use api::{AppState, create_router};
