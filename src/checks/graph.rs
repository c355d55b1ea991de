//! Structural checks: the graph a backend receives must be self-contained.
//!
//! - Every reference points at a resource constructed earlier.
//! - Logical IDs are unique.
//! - Logical IDs and export names carry the environment.
//! - Perimeters are never empty.

use derive_builder::Builder;
use itertools::Itertools;
use log::{debug, info};
use shared_types::{Properties, ResourceGraph};
use std::collections::HashMap;

use crate::types::{Environment, VerificationResult, Verifier};

#[derive(Debug, Builder)]
pub struct GraphChecks<'a> {
    graph: &'a ResourceGraph,
    environment: Environment,
    #[builder(default = "self.derive_positions()")]
    positions: HashMap<String, usize>,
}

impl<'a> GraphChecksBuilder<'a> {
    fn derive_positions(&self) -> HashMap<String, usize> {
        let Some(graph) = self.graph else {
            return HashMap::new();
        };
        let mut positions = HashMap::new();
        for (i, resource) in graph.resources.iter().enumerate() {
            // keep the first occurrence, duplicates are reported separately
            positions.entry(resource.logical_id.clone()).or_insert(i);
        }
        positions
    }
}

impl<'a> GraphChecks<'a> {
    pub fn verify_references(&self) -> Vec<VerificationResult> {
        info!("Checking references between resources");
        let mut results = vec![];
        for (i, resource) in self.graph.resources.iter().enumerate() {
            for target in resource.references() {
                debug!("{} -> {}", resource.logical_id, target);
                match self.positions.get(target) {
                    None => results.push(VerificationResult::critical(format!(
                        "Resource {} references unknown resource {}",
                        resource.logical_id, target
                    ))),
                    Some(&j) if j >= i => results.push(VerificationResult::critical(format!(
                        "Resource {} references {} which is constructed after it",
                        resource.logical_id, target
                    ))),
                    Some(_) => {}
                }
            }
        }
        for output in self.graph.outputs.iter() {
            if let Some(target) = output.value.reference() {
                if !self.positions.contains_key(target) {
                    results.push(VerificationResult::critical(format!(
                        "Output {} references unknown resource {}",
                        output.logical_id, target
                    )));
                }
            }
        }
        if results.is_empty() {
            results.push(VerificationResult::ok(
                "All references resolve to earlier resources",
            ));
        }
        results
    }

    pub fn verify_unique_ids(&self) -> Vec<VerificationResult> {
        let duplicates: Vec<&str> = self
            .graph
            .resources
            .iter()
            .map(|r| r.logical_id.as_str())
            .duplicates()
            .collect();
        if duplicates.is_empty() {
            return vec![VerificationResult::ok("All logical IDs are unique")];
        }
        duplicates
            .into_iter()
            .map(|id| VerificationResult::critical(format!("Logical ID {} is defined twice", id)))
            .collect()
    }

    pub fn verify_environment_suffix(&self) -> Vec<VerificationResult> {
        let mut results = vec![];
        let suffix = self.environment.logical_suffix();
        for resource in self.graph.resources.iter() {
            if !resource.logical_id.ends_with(suffix) {
                results.push(VerificationResult::critical(format!(
                    "Resource {} is not qualified with {}",
                    resource.logical_id, self.environment
                )));
            }
        }
        let export_suffix = format!("-{}", self.environment);
        for output in self.graph.outputs.iter() {
            if !output.export_name.ends_with(&export_suffix) {
                results.push(VerificationResult::critical(format!(
                    "Export {} is not qualified with {}",
                    output.export_name, self.environment
                )));
            }
        }
        if results.is_empty() {
            results.push(VerificationResult::ok(format!(
                "All names are qualified with {}",
                self.environment
            )));
        }
        results
    }

    pub fn verify_perimeters(&self) -> Vec<VerificationResult> {
        self.graph
            .resources
            .iter()
            .filter_map(|r| match &r.properties {
                Properties::SecurityGroup(sg) => Some((r, sg)),
                _ => None,
            })
            .map(|(r, sg)| {
                if sg.ingress.is_empty() {
                    VerificationResult::critical(format!("Perimeter {} has no ingress rules", r.logical_id))
                } else {
                    VerificationResult::ok(format!(
                        "Perimeter {} has {} ingress rules",
                        r.logical_id,
                        sg.ingress.len()
                    ))
                }
            })
            .collect()
    }
}

impl<'a> Verifier for GraphChecks<'a> {
    fn verify(&self) -> Vec<VerificationResult> {
        let mut results = self.verify_references();
        results.extend(self.verify_unique_ids());
        results.extend(self.verify_environment_suffix());
        results.extend(self.verify_perimeters());
        results
    }
}
