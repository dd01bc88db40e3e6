//! Nearest-neighbour route synthesis between all locations of a run.

use std::collections::{HashMap, HashSet};

use petgraph::algo::dijkstra;
use petgraph::graph::{NodeIndex, UnGraph};
use tracing::{debug, info};

use crate::error::{Diagnostics, Stage};
use crate::types::{LocationRecord, RouteEdge};

/// Mean Earth radius in kilometres.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres between two `(latitude, longitude)`
/// points given in degrees.
pub fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Connects every location to its `top` nearest neighbours.
///
/// Locations form a complete undirected graph weighted by rounded haversine
/// distance. Neighbours are ranked by shortest-path distance, ties broken by
/// location order; each unordered pair is emitted once, carrying the direct
/// edge weight.
#[tracing::instrument(skip_all, fields(locations = locations.len(), top = top))]
pub fn synthesize_routes(
    locations: &[LocationRecord],
    top: usize,
    diagnostics: &mut Diagnostics,
) -> Vec<RouteEdge> {
    let mut graph: UnGraph<&str, f64> = UnGraph::new_undirected();
    let mut by_name: HashMap<&str, NodeIndex> = HashMap::new();
    let mut coords: Vec<(f64, f64)> = Vec::new();
    let mut duplicates: Vec<&str> = Vec::new();

    for location in locations {
        if by_name.contains_key(location.name.as_str()) {
            duplicates.push(&location.name);
            continue;
        }
        let node = graph.add_node(&location.name);
        by_name.insert(&location.name, node);
        coords.push((location.latitude, location.longitude));
    }
    if !duplicates.is_empty() {
        diagnostics.push(
            Stage::Routes,
            format!("duplicate location names collapsed: {}", duplicates.join(", ")),
        );
    }

    let nodes: Vec<NodeIndex> = graph.node_indices().collect();
    for (i, &a) in nodes.iter().enumerate() {
        for (j, &b) in nodes.iter().enumerate().skip(i + 1) {
            graph.add_edge(a, b, round2(haversine_km(coords[i], coords[j])));
        }
    }
    debug!(nodes = graph.node_count(), edges = graph.edge_count(), "Location graph built");

    let mut emitted: HashSet<(NodeIndex, NodeIndex)> = HashSet::new();
    let mut routes = Vec::new();

    for &source in &nodes {
        let distances = dijkstra(&graph, source, None, |e| *e.weight());
        let mut ranked: Vec<(NodeIndex, f64)> = nodes
            .iter()
            .filter(|&&n| n != source)
            .filter_map(|&n| distances.get(&n).map(|&d| (n, d)))
            .collect();
        // stable: equal distances keep node order
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

        for &(target, _) in ranked.iter().take(top) {
            let key = (source.min(target), source.max(target));
            if !emitted.insert(key) {
                continue;
            }
            let distance = graph
                .find_edge(source, target)
                .map(|e| graph[e])
                .unwrap_or_default();
            routes.push(RouteEdge {
                name1: graph[source].to_string(),
                name2: graph[target].to_string(),
                distance,
                forced_redirection: 0,
            });
        }
    }

    info!(routes = routes.len(), "Routes synthesized");
    routes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LocationType;

    fn loc(name: &str, latitude: f64, longitude: f64) -> LocationRecord {
        LocationRecord {
            name: name.into(),
            region: String::new(),
            country: "Ethiopia".into(),
            latitude,
            longitude,
            location_type: LocationType::Town,
            conflict_date: Some(0),
            population: 0,
        }
    }

    #[test]
    fn test_haversine_known_distances() {
        assert_eq!(haversine_km((9.0, 38.7), (9.0, 38.7)), 0.0);
        let one_degree = haversine_km((0.0, 0.0), (0.0, 1.0));
        assert!((one_degree - 111.19).abs() < 0.01, "{one_degree}");
        let ab = haversine_km((13.5, 39.47), (9.03, 38.74));
        let ba = haversine_km((9.03, 38.74), (13.5, 39.47));
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn test_three_collinear_locations() {
        let locations = vec![loc("A", 0.0, 0.0), loc("B", 0.0, 1.0), loc("C", 0.0, 2.0)];
        let mut diag = Diagnostics::new();

        let routes = synthesize_routes(&locations, 1, &mut diag);

        let pairs: Vec<(&str, &str)> = routes
            .iter()
            .map(|r| (r.name1.as_str(), r.name2.as_str()))
            .collect();
        assert_eq!(pairs, vec![("A", "B"), ("C", "B")]);
        assert!(routes.iter().all(|r| r.forced_redirection == 0));
        assert_eq!(routes[0].distance, 111.19);
    }

    #[test]
    fn test_unordered_pairs_emitted_once() {
        let locations = vec![
            loc("A", 0.0, 0.0),
            loc("B", 0.0, 1.0),
            loc("C", 1.0, 0.0),
            loc("D", 5.0, 5.0),
        ];
        let mut diag = Diagnostics::new();

        let routes = synthesize_routes(&locations, 3, &mut diag);

        assert_eq!(routes.len(), 6);
        let mut seen = HashSet::new();
        for r in &routes {
            let mut key = [r.name1.clone(), r.name2.clone()];
            key.sort();
            assert!(seen.insert(key), "pair emitted twice");
            assert!(r.distance >= 0.0);
            assert_eq!(r.distance, (r.distance * 100.0).round() / 100.0);
        }
    }

    #[test]
    fn test_ties_broken_by_location_order() {
        let locations = vec![loc("Hub", 0.0, 0.0), loc("East", 0.0, 1.0), loc("West", 0.0, -1.0)];
        let mut diag = Diagnostics::new();

        let routes = synthesize_routes(&locations, 1, &mut diag);
        assert_eq!((routes[0].name1.as_str(), routes[0].name2.as_str()), ("Hub", "East"));
    }

    #[test]
    fn test_duplicate_names_collapsed() {
        let locations = vec![loc("A", 0.0, 0.0), loc("A", 3.0, 3.0), loc("B", 0.0, 1.0)];
        let mut diag = Diagnostics::new();

        let routes = synthesize_routes(&locations, 3, &mut diag);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].distance, 111.19);
        assert_eq!(diag.for_stage(Stage::Routes).count(), 1);
    }

    #[test]
    fn test_single_location_has_no_routes() {
        let mut diag = Diagnostics::new();
        assert!(synthesize_routes(&[loc("Solo", 1.0, 1.0)], 3, &mut diag).is_empty());
    }
}
