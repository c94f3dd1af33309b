// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

//! Asynchronous [A* algorithm](https://en.wikipedia.org/wiki/A*_search_algorithm)
//! over lazily expanded graphs.

mod error;
mod queue;
mod search;

pub use error::{AStarError, DEFAULT_STEP_LIMIT};
pub use queue::{HeapOpenSet, OpenSet, SortedOpenSet};
pub use search::{find_path, Connection, Step, Waypoints};
