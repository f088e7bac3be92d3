use async_trait::async_trait;
use h3o::{CellIndex, LatLng, Resolution};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path as FsPath;
use thiserror::Error;
use tracing::warn;

use crate::geometry::Coordinate;
use crate::risk::{RiskFactorProvider, RiskFactors, TransportMode};

/// All lookups and insertions happen at this resolution (~0.1 km² cells).
pub const CELL_RESOLUTION: Resolution = Resolution::Nine;

#[derive(Debug, Error)]
pub enum SafetyMapError {
    #[error("failed to read risk cells: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid risk cell document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },
}

/// One entry of a risk cell document.
#[derive(Debug, Clone, Deserialize)]
pub struct CellSeed {
    pub lat: f64,
    pub lon: f64,
    /// Spread the factors to the k-ring around the centre cell.
    #[serde(default)]
    pub ring: u32,
    pub factors: RiskFactors,
}

/// Risk factors indexed by H3 cell; the live-data provider.
#[derive(Debug, Clone)]
pub struct SafetyMap {
    cells: HashMap<CellIndex, RiskFactors>,
    baseline: RiskFactors,
}

impl SafetyMap {
    pub fn new(baseline: RiskFactors) -> Self {
        Self {
            cells: HashMap::new(),
            baseline: baseline.clamped(),
        }
    }

    /// Demo map: one hotspot over central Patiala on a quiet baseline.
    pub fn demo() -> Self {
        let mut map = Self::new(RiskFactors {
            incident: 0.1,
            lighting: 0.2,
            crime: 0.1,
            weather: 0.2,
        });

        let hotspot = RiskFactors {
            incident: 0.9,
            lighting: 0.7,
            crime: 0.9,
            weather: 0.2,
        };
        let surroundings = RiskFactors {
            incident: 0.4,
            lighting: 0.4,
            crime: 0.4,
            weather: 0.2,
        };

        // Centre first, then the ring only fills what is still empty.
        if let Some(center) = cell_of(Coordinate::new(30.3398, 76.3869)) {
            map.fill(center, 0, hotspot.clamped());
            map.fill(center, 2, surroundings.clamped());
        }
        map
    }

    pub fn from_file(path: impl AsRef<FsPath>) -> Result<Self, SafetyMapError> {
        let data = std::fs::read(path)?;
        Self::from_slice(&data)
    }

    /// Parses `{ "baseline": {...}, "cells": [...] }`.
    pub fn from_slice(data: &[u8]) -> Result<Self, SafetyMapError> {
        #[derive(Deserialize)]
        struct Document {
            baseline: Option<RiskFactors>,
            cells: Vec<CellSeed>,
        }

        let doc: Document = serde_json::from_slice(data)?;
        let mut map = Self::new(doc.baseline.unwrap_or(RiskFactors::NEUTRAL));
        for seed in doc.cells {
            map.insert(Coordinate::new(seed.lat, seed.lon), seed.ring, seed.factors)?;
        }
        Ok(map)
    }

    /// Sets the centre cell and fills unset cells of its k-ring.
    pub fn insert(
        &mut self,
        at: Coordinate,
        ring: u32,
        factors: RiskFactors,
    ) -> Result<(), SafetyMapError> {
        let center = cell_of(at).ok_or(SafetyMapError::InvalidCoordinate {
            lat: at.lat,
            lon: at.lon,
        })?;
        self.fill(center, ring, factors.clamped());
        Ok(())
    }

    fn fill(&mut self, center: CellIndex, ring: u32, factors: RiskFactors) {
        if ring == 0 {
            self.cells.insert(center, factors);
            return;
        }
        for neighbor in center.grid_disk::<Vec<_>>(ring) {
            self.cells.entry(neighbor).or_insert(factors);
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Mode-independent factors at a coordinate; `None` for invalid input.
    pub fn factors_at(&self, at: Coordinate) -> Option<RiskFactors> {
        let cell = cell_of(at)?;
        Some(*self.cells.get(&cell).unwrap_or(&self.baseline))
    }
}

fn cell_of(at: Coordinate) -> Option<CellIndex> {
    if !at.is_valid() {
        return None;
    }
    LatLng::new(at.lat, at.lon)
        .ok()
        .map(|ll| ll.to_cell(CELL_RESOLUTION))
}

#[async_trait]
impl RiskFactorProvider for SafetyMap {
    async fn risk(&self, coordinate: Coordinate, mode: TransportMode) -> RiskFactors {
        match self.factors_at(coordinate) {
            Some(factors) => factors.for_mode(mode),
            None => {
                warn!(lat = coordinate.lat, lon = coordinate.lon, "risk lookup on invalid coordinate");
                RiskFactors::NEUTRAL
            }
        }
    }
}
