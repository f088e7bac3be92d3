use async_trait::async_trait;
use thiserror::Error;

use crate::geometry::{Coordinate, Path};
use crate::risk::TransportMode;

#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    #[error("no {mode} network near {at}")]
    NoNearbyNode { at: Coordinate, mode: &'static str },
    #[error("invalid coordinate {at}")]
    InvalidCoordinate { at: Coordinate },
    #[error("routing service unavailable: {0}")]
    Service(String),
}

/// Produces candidate paths between two coordinates.
///
/// An empty list means the provider worked but found no route.
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TransportMode,
        want_alternates: bool,
    ) -> Result<Vec<Path>, RoutingError>;
}
