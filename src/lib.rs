//! # seqpipe
//!
//! Lazy, chainable sequence pipelines.
//!
//! A [`Pipeline`] is built from a source and a chain of steps (map, filter,
//! flat_map, distinct, sort, ...). Building never runs a step. Each terminal
//! operation (collect, reduce, group_by, ...) performs exactly one traversal,
//! so the same pipeline can be evaluated more than once.
//!
//! The [`dsl`] module runs pipelines written as text over line records, and
//! the `pipe-run` binary exposes it on the command line.
//!
//! ## Example
//!
//! ```
//! use seqpipe::{Order, Pipeline};
//!
//! let salaries = [50000, 40000, 45000, 35000];
//!
//! let top_two: Vec<u32> = Pipeline::new(&salaries)
//!     .sort_by_key(|s| **s, Order::Descending)
//!     .take(2)
//!     .map(|s| *s)
//!     .collect()
//!     .unwrap();
//!
//! assert_eq!(top_two, vec![50000, 45000]);
//! ```

pub mod dsl;
pub mod error;
pub mod ops;
pub mod pipeline;
pub mod stage;

pub use dsl::{Command, DebugInfo, execute_pipeline, execute_pipeline_debug, parse_commands};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Pipeline, from_lines, from_strings};
pub use stage::{
    Distinct, Filter, FlatMap, Inspect, IterSource, Map, Order, Skip, Sorted, Source, Stage, Take,
    TryMap,
};
