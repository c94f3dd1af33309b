// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::hash::Hash;

use super::{AStarError, OpenSet};

/// Directed edge from an expanded waypoint to one of its neighbors.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection<K, E> {
    pub to: K,
    pub cost: f64,

    /// Arbitrary data attached to the edge, returned back in [Step::edge].
    pub edge: E,
}

/// Single element of a path returned by [find_path].
#[derive(Debug, Clone, PartialEq)]
pub struct Step<K, E> {
    pub waypoint: K,

    /// Edge used to arrive at `waypoint`, `None` for the starting waypoint.
    pub edge: Option<E>,
}

/// Lazily-expanded graph searched by [find_path].
///
/// Waypoints are identified by [Waypoints::Key]. Two keys comparing equal
/// are considered to be the same waypoint, even if they were returned
/// from different [Waypoints::neighbors] calls.
#[allow(async_fn_in_trait)]
pub trait Waypoints {
    type Key: Clone + Eq + Hash;
    type Edge: Clone;

    /// Estimated cost of reaching the goal from `key`. Called at most once per waypoint.
    fn heuristic(&mut self, key: &Self::Key) -> f64;

    fn is_goal(&self, key: &Self::Key) -> bool;

    /// Generates outgoing edges of a waypoint. Only called once per waypoint,
    /// and may suspend, e.g. to load more data.
    async fn neighbors(&mut self, key: &Self::Key) -> Vec<Connection<Self::Key, Self::Edge>>;
}

#[derive(Debug)]
struct SearchState<K, E> {
    gcost: f64,
    fcost: f64,
    hcost: f64,
    previous: Option<(K, E)>,
    closed: bool,
}

/// Uses the [A* algorithm](https://en.wikipedia.org/wiki/A*_search_algorithm)
/// to find the cheapest path from `start` to any waypoint for which [Waypoints::is_goal]
/// returns true.
///
/// Returns `Ok(None)` if every waypoint reachable from the start was expanded
/// without finding the goal.
///
/// Every edge cost is multiplied by `accuracy` before being added to the cost-so-far.
/// With `accuracy == 1.0` and an admissible heuristic, the returned path is optimal.
/// Lower values make the heuristic dominate the search, so fewer waypoints
/// are expanded at the price of possibly sub-optimal paths.
///
/// The duplicate policy depends on the [OpenSet]: the search remembers the best known
/// `fcost` of every waypoint and passes it to [OpenSet::insert] on re-insertion.
/// Waypoints popped after they were already expanded (stale entries of a lazily-deleting
/// open set) are skipped.
///
/// `step_limit` limits how many waypoints may be expanded before returning
/// [AStarError::StepLimitExceeded]. The recommended value is
/// [DEFAULT_STEP_LIMIT](super::DEFAULT_STEP_LIMIT).
pub async fn find_path<W, O>(
    waypoints: &mut W,
    start: W::Key,
    open: &mut O,
    accuracy: f64,
    step_limit: usize,
) -> Result<Option<Vec<Step<W::Key, W::Edge>>>, AStarError>
where
    W: Waypoints,
    O: OpenSet<W::Key>,
{
    let mut states: HashMap<W::Key, SearchState<W::Key, W::Edge>> = HashMap::default();
    let mut steps: usize = 0;

    let hcost = waypoints.heuristic(&start);
    states.insert(
        start.clone(),
        SearchState {
            gcost: 0.0,
            fcost: hcost,
            hcost,
            previous: None,
            closed: false,
        },
    );
    open.insert(start, hcost, None);

    while let Some(current) = open.pop_min() {
        let gcost = match states.get_mut(&current) {
            Some(state) if !state.closed => {
                state.closed = true;
                state.gcost
            }
            _ => continue,
        };

        if waypoints.is_goal(&current) {
            return Ok(Some(reconstruct_path(&states, current)));
        }

        steps += 1;
        if steps > step_limit {
            return Err(AStarError::StepLimitExceeded);
        }

        for connection in waypoints.neighbors(&current).await {
            let tentative_gcost = gcost + connection.cost * accuracy;

            let previous_fcost = match states.get(&connection.to) {
                Some(state) if state.closed => continue,
                Some(state) if state.fcost <= tentative_gcost + state.hcost => continue,
                Some(state) => Some(state.fcost),
                None => None,
            };

            let hcost = match states.get(&connection.to) {
                Some(state) => state.hcost,
                None => waypoints.heuristic(&connection.to),
            };
            let fcost = tentative_gcost + hcost;

            states.insert(
                connection.to.clone(),
                SearchState {
                    gcost: tentative_gcost,
                    fcost,
                    hcost,
                    previous: Some((current.clone(), connection.edge)),
                    closed: false,
                },
            );
            open.insert(connection.to, fcost, previous_fcost);
        }
    }

    Ok(None)
}

fn reconstruct_path<K: Clone + Eq + Hash, E: Clone>(
    states: &HashMap<K, SearchState<K, E>>,
    mut last: K,
) -> Vec<Step<K, E>> {
    let mut path = Vec::default();

    loop {
        match states.get(&last).and_then(|s| s.previous.as_ref()) {
            Some((previous, edge)) => {
                path.push(Step {
                    waypoint: last,
                    edge: Some(edge.clone()),
                });
                last = previous.clone();
            }
            None => {
                path.push(Step {
                    waypoint: last,
                    edge: None,
                });
                break;
            }
        }
    }

    path.reverse();
    return path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::astar::{HeapOpenSet, SortedOpenSet};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    /// Planar graph with euclidean heuristic. Every edge costs at least
    /// the distance between its ends, so the heuristic is admissible.
    struct TestGraph {
        positions: Vec<(f64, f64)>,
        edges: Vec<Vec<(usize, f64)>>,
        goal: usize,
        expanded: usize,
    }

    impl TestGraph {
        fn random(rng: &mut SmallRng, n: usize, degree: usize) -> Self {
            let positions = (0..n)
                .map(|_| (rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)))
                .collect::<Vec<(f64, f64)>>();
            let mut edges = vec![Vec::default(); n];
            for from in 0..n {
                for _ in 0..degree {
                    let to = rng.gen_range(0..n);
                    if to == from {
                        continue;
                    }
                    let detour: f64 = rng.gen_range(1.0..2.0);
                    let cost = distance(positions[from], positions[to]) * detour;
                    edges[from].push((to, cost));
                }
            }
            Self {
                positions,
                edges,
                goal: n - 1,
                expanded: 0,
            }
        }

        fn from_edges(n: usize, goal: usize, list: &[(usize, usize, f64)]) -> Self {
            let mut edges = vec![Vec::default(); n];
            for &(from, to, cost) in list {
                edges[from].push((to, cost));
            }
            Self {
                positions: vec![(0.0, 0.0); n],
                edges,
                goal,
                expanded: 0,
            }
        }

        fn dijkstra(&self, start: usize) -> Option<f64> {
            let n = self.positions.len();
            let mut dist = vec![f64::INFINITY; n];
            let mut done = vec![false; n];
            dist[start] = 0.0;

            loop {
                let current = (0..n)
                    .filter(|&i| !done[i] && dist[i].is_finite())
                    .min_by(|&a, &b| dist[a].total_cmp(&dist[b]))?;
                if current == self.goal {
                    return Some(dist[current]);
                }
                done[current] = true;
                for &(to, cost) in &self.edges[current] {
                    dist[to] = dist[to].min(dist[current] + cost);
                }
            }
        }
    }

    fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
        (a.0 - b.0).hypot(a.1 - b.1)
    }

    impl Waypoints for TestGraph {
        type Key = usize;
        type Edge = f64;

        fn heuristic(&mut self, key: &usize) -> f64 {
            distance(self.positions[*key], self.positions[self.goal])
        }

        fn is_goal(&self, key: &usize) -> bool {
            *key == self.goal
        }

        async fn neighbors(&mut self, key: &usize) -> Vec<Connection<usize, f64>> {
            self.expanded += 1;
            tokio::task::yield_now().await;
            self.edges[*key]
                .iter()
                .map(|&(to, cost)| Connection { to, cost, edge: cost })
                .collect()
        }
    }

    fn path_cost(path: &[Step<usize, f64>]) -> f64 {
        path.iter().filter_map(|s| s.edge).sum()
    }

    fn path_nodes(path: &[Step<usize, f64>]) -> Vec<usize> {
        path.iter().map(|s| s.waypoint).collect()
    }

    #[tokio::test]
    async fn optimal_on_random_graphs() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);

        for round in 0..40 {
            let n = rng.gen_range(2..=50);
            let mut g = TestGraph::random(&mut rng, n, 3);
            let expected = g.dijkstra(0);

            let heap_result = find_path(&mut g, 0, &mut HeapOpenSet::new(), 1.0, 10_000)
                .await
                .unwrap();
            let sorted_result = find_path(&mut g, 0, &mut SortedOpenSet::new(), 1.0, 10_000)
                .await
                .unwrap();

            match expected {
                Some(cost) => {
                    for path in [heap_result.unwrap(), sorted_result.unwrap()] {
                        assert!(
                            (path_cost(&path) - cost).abs() < 1e-9,
                            "round {}: got {}, expected {}",
                            round,
                            path_cost(&path),
                            cost,
                        );
                        assert_eq!(path[0].waypoint, 0);
                        assert_eq!(path[0].edge, None);
                        assert_eq!(path.last().unwrap().waypoint, n - 1);
                    }
                }
                None => {
                    assert!(heap_result.is_none(), "round {}", round);
                    assert!(sorted_result.is_none(), "round {}", round);
                }
            }
        }
    }

    #[tokio::test]
    async fn simple_path() {
        //   1
        // 0 ---> 1
        // |      | 1
        // | 5    v
        // +----> 2
        let mut g = TestGraph::from_edges(3, 2, &[(0, 1, 1.0), (1, 2, 1.0), (0, 2, 5.0)]);
        let path = find_path(&mut g, 0, &mut HeapOpenSet::new(), 1.0, 100)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path_nodes(&path), vec![0, 1, 2]);
        assert_eq!(path_cost(&path), 2.0);
    }

    #[tokio::test]
    async fn start_is_goal() {
        let mut g = TestGraph::from_edges(2, 0, &[(0, 1, 1.0)]);
        let path = find_path(&mut g, 0, &mut HeapOpenSet::new(), 1.0, 100)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(path_nodes(&path), vec![0]);
        assert_eq!(g.expanded, 0);
    }

    #[tokio::test]
    async fn unreachable_goal() {
        let mut g = TestGraph::from_edges(4, 3, &[(0, 1, 1.0), (1, 2, 1.0), (2, 0, 1.0)]);
        let result = find_path(&mut g, 0, &mut SortedOpenSet::new(), 1.0, 100)
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(g.expanded, 3);
    }

    #[tokio::test]
    async fn step_limit() {
        let list = (0..9).map(|i| (i, i + 1, 1.0)).collect::<Vec<_>>();
        let mut g = TestGraph::from_edges(10, 9, &list);
        let result = find_path(&mut g, 0, &mut HeapOpenSet::new(), 1.0, 5).await;
        assert_eq!(result, Err(AStarError::StepLimitExceeded));

        let mut g = TestGraph::from_edges(10, 9, &list);
        let result = find_path(&mut g, 0, &mut HeapOpenSet::new(), 1.0, 9).await;
        assert_eq!(path_nodes(&result.unwrap().unwrap()).len(), 10);
    }

    #[tokio::test]
    async fn reduced_accuracy_still_finds_a_path() {
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..10 {
            let mut g = TestGraph::random(&mut rng, 30, 4);
            let Some(optimal) = g.dijkstra(0) else { continue };
            let path = find_path(&mut g, 0, &mut HeapOpenSet::new(), 0.6, 10_000)
                .await
                .unwrap()
                .unwrap();
            assert!(path_cost(&path) >= optimal - 1e-9);
        }
    }
}
