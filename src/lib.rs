//! Sales Insight Pipeline
//!
//! A multi-agent pipeline that answers business questions against a sales
//! dataset:
//! - A query agent turns a natural-language question into a SQL query
//! - Two analyst agents interpret the results in parallel
//! - A lead agent synthesizes their answers
//! - A terminal agent structures recommendations into task cards
//!
//! The steps are wired into a fixed directed acyclic graph over a shared
//! state record; the step-sequencing controller in [`graph`] executes them
//! in dependency order, one request at a time.

pub mod agents;
pub mod config;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod models;
pub mod pipeline;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use pipeline::SalesPipeline;
