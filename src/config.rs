use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::risk::RiskWeights;
use crate::scorer::DEFAULT_SAMPLE_SPACING_M;

/// Safety-aware trip routing service.
#[derive(Debug, Clone, Parser)]
#[command(name = "safetrip", version, about)]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(long, env = "SAFETRIP_BIND", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// OSM extract the routing graph is built from
    #[arg(long, env = "SAFETRIP_PBF", default_value = "assets/patiala.osm.pbf")]
    pub pbf: PathBuf,

    /// JSON document of risk cells; the demo hotspot map is used when absent
    #[arg(long, env = "SAFETRIP_RISK_CELLS")]
    pub risk_cells: Option<PathBuf>,

    /// Use deterministic synthetic risk factors instead of the cell map
    #[arg(long, env = "SAFETRIP_MOCK_RISK", conflicts_with = "risk_cells")]
    pub mock_risk: bool,

    /// Meters between risk samples along a route (minimum 30)
    #[arg(long, env = "SAFETRIP_SAMPLE_SPACING", default_value_t = DEFAULT_SAMPLE_SPACING_M)]
    pub sample_spacing: f64,

    #[arg(long, env = "SAFETRIP_W_INCIDENT", default_value_t = 0.4)]
    pub w_incident: f64,

    #[arg(long, env = "SAFETRIP_W_LIGHTING", default_value_t = 0.25)]
    pub w_lighting: f64,

    #[arg(long, env = "SAFETRIP_W_CRIME", default_value_t = 0.25)]
    pub w_crime: f64,

    #[arg(long, env = "SAFETRIP_W_WEATHER", default_value_t = 0.10)]
    pub w_weather: f64,
}

impl Config {
    pub fn weights(&self) -> RiskWeights {
        RiskWeights {
            incident: self.w_incident.max(0.0),
            lighting: self.w_lighting.max(0.0),
            crime: self.w_crime.max(0.0),
            weather: self.w_weather.max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_default_weights() {
        let config = Config::try_parse_from(["safetrip"]).unwrap();
        assert_eq!(config.weights(), RiskWeights::default());
        assert_eq!(config.sample_spacing, 150.0);
        assert_eq!(config.bind.port(), 3000);
        assert!(config.risk_cells.is_none());
    }

    #[test]
    fn negative_weights_are_floored() {
        let config = Config::try_parse_from(["safetrip", "--w-crime=-1", "--w-weather", "0.5"]).unwrap();
        let w = config.weights();
        assert_eq!(w.crime, 0.0);
        assert_eq!(w.weather, 0.5);
    }

    #[test]
    fn mock_risk_excludes_cell_file() {
        let parsed = Config::try_parse_from(["safetrip", "--mock-risk", "--risk-cells", "cells.json"]);
        assert!(parsed.is_err());
    }
}
