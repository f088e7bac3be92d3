use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use osmpbf::{Element, ElementReader};
use petgraph::algo::astar;
use petgraph::graph::{EdgeReference, Graph, NodeIndex};
use petgraph::visit::EdgeFiltered;
use rstar::RTree;
use rstar::primitives::GeomWithData;
use tracing::{debug, info};

use crate::geometry::{Coordinate, Path, RouteStep};
use crate::risk::TransportMode;
use crate::routing::{RoutingError, RoutingProvider};

pub const WALKING_SPEED_MPS: f64 = 1.4;
pub const DRIVING_SPEED_MPS: f64 = 11.1;

/// Safety preferences (alpha) tried in order; the first is the plain shortest path.
const ALTERNATE_ALPHAS: [f64; 3] = [0.0, 2.0, 5.0];

/// How many nearest nodes to inspect when snapping to a mode's network.
const SNAP_CANDIDATES: usize = 64;

type NodeEntry = GeomWithData<[f64; 2], NodeIndex>;

#[derive(Debug, Clone, Copy)]
pub struct GeoNode {
    pub lat: f64,
    pub lon: f64,
}

impl GeoNode {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone)]
pub struct WalkEdge {
    pub distance_meters: f64,
    pub safety_score: f32,
    pub walkable: bool,
    pub drivable: bool,
    pub name: Option<Arc<str>>,
}

impl WalkEdge {
    pub fn allows(&self, mode: TransportMode) -> bool {
        match mode {
            TransportMode::Walk => self.walkable,
            TransportMode::Drive => self.drivable,
        }
    }
}

/// Access and risk derived from a way's OSM tags.
#[derive(Debug, Clone, PartialEq)]
pub struct WayClass {
    pub walkable: bool,
    pub drivable: bool,
    pub risk: f32,
    pub name: Option<String>,
}

/// Classifies a way; `None` when neither walkers nor drivers may use it.
pub fn classify_way(tags: &HashMap<&str, &str>) -> Option<WayClass> {
    let highway = tags.get("highway").copied().unwrap_or("");
    let foot = tags.get("foot").copied().unwrap_or("");
    let sidewalk = tags.get("sidewalk").copied().unwrap_or("");
    let access = tags.get("access").copied().unwrap_or("");

    let is_walkable_type = matches!(highway,
        "footway" | "path" | "steps" | "pedestrian" | "living_street" |
        "residential" | "tertiary" | "service" | "unclassified"
    );
    let is_motor_road = matches!(highway,
        "motorway" | "trunk" | "primary" | "secondary" |
        "motorway_link" | "trunk_link" | "primary_link" | "secondary_link"
    );
    let is_minor_road = matches!(highway,
        "tertiary" | "residential" | "service" | "unclassified" | "living_street"
    );
    let foot_allowed = matches!(foot, "yes" | "designated" | "permissive");
    let has_sidewalk = matches!(sidewalk, "both" | "left" | "right" | "yes" | "separate");
    let closed = matches!(access, "no" | "private");

    let walkable = foot != "no" && (is_walkable_type || (is_motor_road && (foot_allowed || has_sidewalk)));
    let drivable = !closed && (is_motor_road || is_minor_road);

    if !walkable && !drivable {
        return None;
    }

    Some(WayClass {
        walkable,
        drivable,
        risk: edge_risk(tags),
        name: tags.get("name").map(|n| n.to_string()),
    })
}

/// 0.0 = safe, 1.0 = dangerous.
fn edge_risk(tags: &HashMap<&str, &str>) -> f32 {
    let highway = tags.get("highway").copied().unwrap_or("");
    let mut risk: f32 = 0.2;

    match tags.get("lit").copied() {
        Some("no") => risk += 0.4,
        Some("yes" | "24/7" | "automatic") => risk -= 0.1,
        _ => {}
    }
    if matches!(highway, "motorway" | "trunk" | "primary" | "secondary")
        && !tags.contains_key("sidewalk")
    {
        risk += 0.2;
    }
    if matches!(highway, "path" | "steps") {
        risk += 0.1;
    }
    risk.clamp(0.0, 1.0)
}

/// Incrementally assembles a [`NavigationGraph`] from OSM ways.
#[derive(Default)]
pub struct GraphBuilder {
    graph: Graph<GeoNode, WalkEdge>,
    osm_id_map: HashMap<i64, NodeIndex>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds both directions of every segment of a way. Returns false when the
    /// tags exclude the way from both networks.
    pub fn add_way(&mut self, nodes: &[(i64, GeoNode)], tags: &HashMap<&str, &str>) -> bool {
        let Some(class) = classify_way(tags) else {
            return false;
        };
        let name: Option<Arc<str>> = class.name.as_deref().map(Arc::from);

        for (&(id_a, node_a), &(id_b, node_b)) in nodes.iter().tuple_windows() {
            let idx_a = self.node(id_a, node_a);
            let idx_b = self.node(id_b, node_b);

            let edge_data = WalkEdge {
                distance_meters: node_a.coordinate().distance_to(&node_b.coordinate()),
                safety_score: class.risk,
                walkable: class.walkable,
                drivable: class.drivable,
                name: name.clone(),
            };

            self.graph.add_edge(idx_a, idx_b, edge_data.clone());
            self.graph.add_edge(idx_b, idx_a, edge_data);
        }
        true
    }

    fn node(&mut self, osm_id: i64, node: GeoNode) -> NodeIndex {
        let graph = &mut self.graph;
        *self
            .osm_id_map
            .entry(osm_id)
            .or_insert_with(|| graph.add_node(node))
    }

    pub fn build(self) -> NavigationGraph {
        let entries: Vec<NodeEntry> = self
            .graph
            .node_indices()
            .map(|idx| {
                let n = self.graph[idx];
                GeomWithData::new([n.lon, n.lat], idx)
            })
            .collect();

        NavigationGraph {
            graph: self.graph,
            index: RTree::bulk_load(entries),
        }
    }
}

pub struct NavigationGraph {
    pub graph: Graph<GeoNode, WalkEdge>,
    index: RTree<NodeEntry>,
}

impl NavigationGraph {
    pub fn from_pbf(path: &str) -> anyhow::Result<Self> {
        info!(path, "parsing OSM PBF");

        let mut temp_nodes = HashMap::new();

        // PASS 1: Nodes
        let reader = ElementReader::from_path(path)?;
        reader.for_each(|element| match element {
            Element::Node(node) => {
                temp_nodes.insert(node.id(), GeoNode { lat: node.lat(), lon: node.lon() });
            }
            Element::DenseNode(node) => {
                temp_nodes.insert(node.id(), GeoNode { lat: node.lat(), lon: node.lon() });
            }
            _ => {}
        })?;

        info!(nodes = temp_nodes.len(), "loaded nodes, building edges");

        // PASS 2: Ways
        let mut builder = GraphBuilder::new();
        let reader_pass2 = ElementReader::from_path(path)?;
        reader_pass2.for_each(|element| {
            if let Element::Way(way) = element {
                let tags: HashMap<&str, &str> = way.tags().collect();
                let refs: Vec<i64> = way.refs().collect();
                // Ways crossing the extract boundary keep their in-extract pieces only.
                for run in refs.split(|id| !temp_nodes.contains_key(id)) {
                    let nodes: Vec<(i64, GeoNode)> = run
                        .iter()
                        .filter_map(|id| temp_nodes.get(id).map(|&n| (*id, n)))
                        .collect();
                    builder.add_way(&nodes, &tags);
                }
            }
        })?;

        let nav = builder.build();
        info!(
            nodes = nav.graph.node_count(),
            edges = nav.graph.edge_count(),
            "graph built"
        );
        Ok(nav)
    }

    /// Nearest node that has at least one edge usable in `mode`.
    pub fn find_nearest_node(&self, at: Coordinate, mode: TransportMode) -> Option<NodeIndex> {
        self.index
            .nearest_neighbor_iter(&[at.lon, at.lat])
            .take(SNAP_CANDIDATES)
            .map(|entry| entry.data)
            .find(|&idx| self.graph.edges(idx).any(|e| e.weight().allows(mode)))
    }

    /// Candidate paths between two coordinates, cheapest first, without duplicates.
    pub fn candidates(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TransportMode,
        want_alternates: bool,
    ) -> Result<Vec<Path>, RoutingError> {
        for at in [origin, destination] {
            if !at.is_valid() {
                return Err(RoutingError::InvalidCoordinate { at });
            }
        }

        let start = self
            .find_nearest_node(origin, mode)
            .ok_or(RoutingError::NoNearbyNode { at: origin, mode: mode.as_str() })?;
        let end = self
            .find_nearest_node(destination, mode)
            .ok_or(RoutingError::NoNearbyNode { at: destination, mode: mode.as_str() })?;

        let alphas = if want_alternates {
            &ALTERNATE_ALPHAS[..]
        } else {
            &ALTERNATE_ALPHAS[..1]
        };

        let mut seen: Vec<Vec<NodeIndex>> = Vec::new();
        let mut paths = Vec::new();
        for &alpha in alphas {
            let Some(nodes) = self.shortest_nodes(start, end, mode, alpha) else {
                continue;
            };
            if seen.contains(&nodes) {
                continue;
            }
            debug!(alpha, nodes = nodes.len(), "candidate path");
            paths.push(self.to_path(&nodes, mode));
            seen.push(nodes);
        }
        Ok(paths)
    }

    fn shortest_nodes(
        &self,
        start: NodeIndex,
        end: NodeIndex,
        mode: TransportMode,
        alpha: f64,
    ) -> Option<Vec<NodeIndex>> {
        let g = &self.graph;
        let filtered = EdgeFiltered::from_fn(g, |e: EdgeReference<'_, WalkEdge>| {
            e.weight().allows(mode)
        });
        let goal = g[end].coordinate();

        astar(
            &filtered,
            start,
            |finish| finish == end,
            |e| {
                let edge = e.weight();
                // COST FUNCTION: Distance * (1 + alpha * SafetyScore)
                edge.distance_meters * (1.0 + alpha * edge.safety_score as f64)
            },
            // Great-circle distance never overestimates the remaining cost.
            |n| g[n].coordinate().distance_to(&goal),
        )
        .map(|(_cost, nodes)| nodes)
    }

    /// Cheapest usable edge between two consecutive path nodes.
    fn edge_between(&self, a: NodeIndex, b: NodeIndex, mode: TransportMode) -> Option<&WalkEdge> {
        self.graph
            .edges_connecting(a, b)
            .map(|e| e.weight())
            .filter(|w| w.allows(mode))
            .min_by(|x, y| x.distance_meters.total_cmp(&y.distance_meters))
    }

    fn to_path(&self, nodes: &[NodeIndex], mode: TransportMode) -> Path {
        let coordinates: Vec<Coordinate> =
            nodes.iter().map(|&idx| self.graph[idx].coordinate()).collect();

        let edges: Vec<&WalkEdge> = nodes
            .iter()
            .tuple_windows()
            .filter_map(|(&a, &b)| self.edge_between(a, b, mode))
            .collect();
        let length_m: f64 = edges.iter().map(|e| e.distance_meters).sum();

        let speed = match mode {
            TransportMode::Walk => WALKING_SPEED_MPS,
            TransportMode::Drive => DRIVING_SPEED_MPS,
        };

        Path::new(coordinates, length_m, length_m / speed).with_steps(steps_for(&edges))
    }
}

/// One step per run of consecutive edges sharing a street name.
fn steps_for(edges: &[&WalkEdge]) -> Vec<RouteStep> {
    let mut steps: Vec<RouteStep> = Vec::new();
    let mut current: Option<(&Option<Arc<str>>, f64)> = None;

    for edge in edges {
        if let Some((name, distance)) = current.as_mut() {
            if *name == &edge.name {
                *distance += edge.distance_meters;
                continue;
            }
        }
        if let Some((name, distance)) = current.take() {
            steps.push(step(name, distance, steps.is_empty()));
        }
        current = Some((&edge.name, edge.distance_meters));
    }
    if let Some((name, distance)) = current {
        steps.push(step(name, distance, steps.is_empty()));
    }
    if !steps.is_empty() {
        steps.push(RouteStep {
            instruction: "Arrive at destination".to_string(),
            distance_m: 0.0,
        });
    }
    steps
}

fn step(name: &Option<Arc<str>>, distance_m: f64, first: bool) -> RouteStep {
    // Unnamed stretches have no instruction; the trip layer hides them.
    let instruction = match name {
        Some(name) if first => format!("Head along {name}"),
        Some(name) => format!("Continue onto {name}"),
        None => String::new(),
    };
    RouteStep { instruction, distance_m }
}

/// Routes on a shared [`NavigationGraph`] off the async runtime.
#[derive(Clone)]
pub struct GraphRouter {
    graph: Arc<NavigationGraph>,
}

impl GraphRouter {
    pub fn new(graph: Arc<NavigationGraph>) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl RoutingProvider for GraphRouter {
    async fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TransportMode,
        want_alternates: bool,
    ) -> Result<Vec<Path>, RoutingError> {
        let graph = Arc::clone(&self.graph);
        tokio::task::spawn_blocking(move || {
            graph.candidates(origin, destination, mode, want_alternates)
        })
        .await
        .map_err(|e| RoutingError::Service(e.to_string()))?
    }
}
