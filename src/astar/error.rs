// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

/// Recommended number of allowed waypoint expansions in [find_path](crate::astar::find_path)
/// before [AStarError::StepLimitExceeded] is returned.
pub const DEFAULT_STEP_LIMIT: usize = 1_000_000;

/// Error conditions which may occur during [find_path](crate::astar::find_path).
///
/// Exhausting the open set without reaching the goal is not an error -
/// it is reported as `Ok(None)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AStarError {
    /// Route search has exceeded its limit of steps.
    /// Either the waypoints are really far apart, or no route exists.
    ///
    /// Concluding that no route exists requires traversing the whole reachable graph,
    /// which, with lazily streamed map data, means downloading it. The step limit
    /// protects against resource exhaustion.
    StepLimitExceeded,
}

impl std::fmt::Display for AStarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepLimitExceeded => write!(f, "step limit exceeded"),
        }
    }
}

impl std::error::Error for AStarError {}
