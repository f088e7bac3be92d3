use std::sync::Arc;

use clap::Parser;
use safetrip::config::Config;
use safetrip::graph::{GraphRouter, NavigationGraph};
use safetrip::risk::{MockRiskProvider, RiskFactorProvider};
use safetrip::safety::SafetyMap;
use safetrip::scorer::RouteSafetyScorer;
use safetrip::{AppState, create_router};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "safetrip=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    // 1. Initialize Safety Data
    let provider: Arc<dyn RiskFactorProvider> = if config.mock_risk {
        info!("using synthetic risk factors");
        Arc::new(MockRiskProvider)
    } else if let Some(path) = &config.risk_cells {
        let map = SafetyMap::from_file(path)?;
        info!(cells = map.len(), path = %path.display(), "loaded risk cells");
        Arc::new(map)
    } else {
        info!("using demo risk map");
        Arc::new(SafetyMap::demo())
    };

    // 2. Load OSM Data
    let pbf_path = config.pbf.to_string_lossy().into_owned();
    let nav_graph = tokio::task::spawn_blocking(move || NavigationGraph::from_pbf(&pbf_path)).await??;
    let router = GraphRouter::new(Arc::new(nav_graph));

    let scorer = RouteSafetyScorer::new(provider, config.weights(), config.sample_spacing);
    info!(
        spacing_m = scorer.sample_spacing_m(),
        weights = ?scorer.weights(),
        "route scorer ready"
    );

    let app = create_router(AppState::new(Arc::new(router), Arc::new(scorer)));

    info!("API server running on http://{}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
