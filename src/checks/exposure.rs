//! Exposure checks: what the topology lets in from the outside.

use derive_builder::Builder;
use log::{debug, info};
use shared_types::{Action, Peer, Properties, ResourceGraph};

use crate::topology::security::SSH_PORT;
use crate::types::{Cidr, VerificationResult, Verifier};

#[derive(Debug, Builder)]
pub struct ExposureChecks<'a> {
    graph: &'a ResourceGraph,
}

impl<'a> ExposureChecks<'a> {
    /// SSH reachable from anywhere is allowed (the plain range mode permits
    /// it) but always reported.
    pub fn verify_management_access(&self) -> Vec<VerificationResult> {
        info!("Checking management access");
        let mut results = vec![];
        for resource in self.graph.resources.iter() {
            let Properties::SecurityGroup(sg) = &resource.properties else {
                continue;
            };
            for rule in sg.ingress.iter().filter(|r| r.covers_port(SSH_PORT)) {
                let Peer::Cidr(range) = &rule.peer else {
                    continue;
                };
                let unrestricted = range
                    .parse::<Cidr>()
                    .map(|c| c.is_unrestricted())
                    .unwrap_or(false);
                if unrestricted {
                    results.push(VerificationResult::warning(format!(
                        "Perimeter {} allows SSH from {}",
                        resource.logical_id, range
                    )));
                }
            }
        }
        if results.is_empty() {
            results.push(VerificationResult::ok(
                "SSH is not reachable from unrestricted ranges",
            ));
        }
        results
    }

    pub fn verify_storage_encryption(&self) -> Vec<VerificationResult> {
        self.graph
            .resources
            .iter()
            .filter_map(|r| match &r.properties {
                Properties::Instance(i) => Some((r, i)),
                _ => None,
            })
            .flat_map(|(r, i)| {
                i.block_device_mappings.iter().map(move |m| {
                    if m.ebs.encrypted {
                        VerificationResult::ok(format!(
                            "Volume {} of {} is encrypted",
                            m.device_name, r.logical_id
                        ))
                    } else {
                        VerificationResult::critical(format!(
                            "Volume {} of {} is not encrypted",
                            m.device_name, r.logical_id
                        ))
                    }
                })
            })
            .collect()
    }

    pub fn verify_listeners(&self) -> Vec<VerificationResult> {
        let mut results = vec![];
        for resource in self.graph.resources.iter() {
            let Properties::Listener(listener) = &resource.properties else {
                continue;
            };
            debug!(
                "Listener {} on {}/{}",
                resource.logical_id, listener.protocol, listener.port
            );
            match listener.protocol.as_str() {
                "HTTPS" if listener.certificates.is_empty() => {
                    results.push(VerificationResult::critical(format!(
                        "Listener {} terminates TLS without a certificate",
                        resource.logical_id
                    )))
                }
                "HTTPS" => results.push(VerificationResult::ok(format!(
                    "Listener {} terminates TLS",
                    resource.logical_id
                ))),
                _ => {
                    let redirects = !listener.default_actions.is_empty()
                        && listener
                            .default_actions
                            .iter()
                            .all(|a| matches!(a, Action::Redirect { config } if config.protocol == "HTTPS"));
                    if redirects {
                        results.push(VerificationResult::ok(format!(
                            "Listener {} redirects to HTTPS",
                            resource.logical_id
                        )));
                    } else {
                        results.push(VerificationResult::warning(format!(
                            "Listener {} serves plaintext traffic",
                            resource.logical_id
                        )));
                    }
                }
            }
        }
        results
    }
}

impl<'a> Verifier for ExposureChecks<'a> {
    fn verify(&self) -> Vec<VerificationResult> {
        let mut results = self.verify_management_access();
        results.extend(self.verify_storage_encryption());
        results.extend(self.verify_listeners());
        results
    }
}
