//! Checks over an assembled resource graph.
//!
//! Right now the following checks are implemented:
//! - graph: references resolve to earlier resources, IDs are unique and
//!   environment-qualified, perimeters are non-empty.
//! - exposure: management ports open to the world, unencrypted volumes,
//!   plaintext listeners.

pub mod exposure;
pub mod graph;

use exposure::ExposureChecksBuilder;
use graph::GraphChecksBuilder;
use shared_types::ResourceGraph;

use crate::types::{Environment, VerificationResult, Verifier};

/// Runs every check against `graph`.
pub fn verify_graph(graph: &ResourceGraph, environment: Environment) -> Vec<VerificationResult> {
    let mut results = GraphChecksBuilder::default()
        .graph(graph)
        .environment(environment)
        .build()
        .map(|c| c.verify())
        .unwrap_or_else(|e| vec![VerificationResult::critical(e.to_string())]);
    results.extend(
        ExposureChecksBuilder::default()
            .graph(graph)
            .build()
            .map(|c| c.verify())
            .unwrap_or_else(|e| vec![VerificationResult::critical(e.to_string())]),
    );
    results
}
