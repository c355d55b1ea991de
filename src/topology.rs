//! Assembles the full topology in dependency order:
//! network → perimeters → instance → load balancer → outputs.
//!
//! Every stage takes the handles of the stages before it by reference, so the
//! order is enforced by the types. The graph only leaves this module once
//! every stage succeeded and the result passed verification.

pub mod bootstrap;
pub mod compute;
pub mod edge;
pub mod graph;
pub mod network;
pub mod security;

use derive_builder::Builder;
use log::{info, warn};
use serde::Serialize;
use shared_types::{Output, ResourceGraph};

use crate::checks;
use crate::types::{Environment, Severity, TopologyError};
use compute::{ComputeInputs, DiskSpec, InstanceHandle};
use edge::{EdgeInputs, EdgeMode, LoadBalancerHandle};
use graph::GraphBuilder;
use network::{NetworkHandle, NetworkInputs};
use security::{PerimeterHandle, PerimeterMode};

pub const DEFAULT_VPC_CIDR: &str = "192.168.0.0/16";
pub const DEFAULT_SUBNET1_CIDR: &str = "192.168.0.0/20";
pub const DEFAULT_SUBNET2_CIDR: &str = "192.168.16.0/20";
pub const DEFAULT_ALLOWED_CIDR: &str = "0.0.0.0/0";
pub const DEFAULT_KEY_NAME: &str = "dify-key";

/// Which perimeter arrangement to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PerimeterLayout {
    /// The balancer perimeter is built once and referenced by the instance
    /// perimeter.
    #[default]
    Shared,
    /// Instance perimeter keyed to the allowed range, balancer builds its own.
    Legacy,
}

#[derive(Debug, Clone, Builder)]
pub struct TopologyConfig {
    #[builder(setter(strip_option), default)]
    pub environment: Option<Environment>,
    #[builder(setter(into), default)]
    pub certificate_arn: String,
    #[builder(setter(into), default = "DEFAULT_VPC_CIDR.to_string()")]
    pub vpc_cidr: String,
    #[builder(setter(into), default = "DEFAULT_SUBNET1_CIDR.to_string()")]
    pub subnet1_cidr: String,
    #[builder(setter(into), default = "DEFAULT_SUBNET2_CIDR.to_string()")]
    pub subnet2_cidr: String,
    #[builder(default)]
    pub availability_zones: Vec<String>,
    /// Range admitted by the edge (and, in the legacy layout, the instance).
    #[builder(setter(into), default = "DEFAULT_ALLOWED_CIDR.to_string()")]
    pub allowed_cidr: String,
    /// Management-port sources in the shared layout.
    #[builder(default)]
    pub administrators: Vec<String>,
    #[builder(setter(into), default = "DEFAULT_KEY_NAME.to_string()")]
    pub key_name: String,
    #[builder(setter(into), default = "compute::DEFAULT_IMAGE_PARAMETER.to_string()")]
    pub image_parameter: String,
    #[builder(setter(into), default = "compute::DEFAULT_INSTANCE_TYPE.to_string()")]
    pub instance_type: String,
    #[builder(default)]
    pub disk: DiskSpec,
    #[builder(default)]
    pub layout: PerimeterLayout,
}

/// Values republished for consumers outside the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopologyOutputs {
    pub load_balancer_dns_name: Output,
    pub instance_public_address: Output,
    pub instance_id: Output,
}

impl TopologyOutputs {
    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        [
            &self.load_balancer_dns_name,
            &self.instance_public_address,
            &self.instance_id,
        ]
        .into_iter()
    }
}

#[derive(Debug, Clone)]
pub struct Topology {
    pub environment: Environment,
    pub graph: ResourceGraph,
    pub network: NetworkHandle,
    /// Present in the shared layout only.
    pub edge_perimeter: Option<PerimeterHandle>,
    pub instance_perimeter: PerimeterHandle,
    pub instance: InstanceHandle,
    pub load_balancer: LoadBalancerHandle,
    pub outputs: TopologyOutputs,
}

/// Configuration checks that need no cloud lookup. Runs again inside
/// [`assemble`].
pub fn preflight(config: &TopologyConfig) -> Result<Environment, TopologyError> {
    let environment = config.environment.ok_or(TopologyError::MissingEnvironment)?;
    edge::require_certificate(&config.certificate_arn)?;
    if config.layout == PerimeterLayout::Shared && config.administrators.is_empty() {
        return Err(TopologyError::EmptyAllowList);
    }
    if config.allowed_cidr.trim() == DEFAULT_ALLOWED_CIDR {
        warn!(
            "Allowed range is {}, the load balancer is reachable from anywhere",
            DEFAULT_ALLOWED_CIDR
        );
    }
    Ok(environment)
}

pub fn assemble(config: &TopologyConfig) -> Result<Topology, TopologyError> {
    let environment = preflight(config)?;
    info!("Assembling topology for {}", environment);
    let mut graph = GraphBuilder::new(environment);

    let network = network::build(
        &mut graph,
        &NetworkInputs {
            vpc_cidr: &config.vpc_cidr,
            subnet_cidrs: [config.subnet1_cidr.as_str(), config.subnet2_cidr.as_str()],
            availability_zones: &config.availability_zones,
        },
    )?;

    let edge_perimeter = match config.layout {
        PerimeterLayout::Shared => Some(security::edge_perimeter(
            &mut graph,
            &network,
            &config.allowed_cidr,
        )?),
        PerimeterLayout::Legacy => None,
    };
    let perimeter_mode = match &edge_perimeter {
        Some(edge) => PerimeterMode::Reference {
            edge,
            administrators: &config.administrators,
        },
        None => PerimeterMode::Cidr {
            allowed: &config.allowed_cidr,
        },
    };
    let instance_perimeter = security::build(&mut graph, &network, perimeter_mode)?;

    let instance = compute::build(
        &mut graph,
        &ComputeInputs {
            network: &network,
            subnet: &network.subnets[0],
            perimeter: &instance_perimeter,
            key_name: &config.key_name,
            image_parameter: &config.image_parameter,
            instance_type: &config.instance_type,
            disk: &config.disk,
        },
    )?;

    let edge_mode = match &edge_perimeter {
        Some(edge) => EdgeMode::Shared(edge),
        None => EdgeMode::Inline {
            allowed: &config.allowed_cidr,
        },
    };
    let load_balancer = edge::build(
        &mut graph,
        &EdgeInputs {
            network: &network,
            instance: &instance,
            certificate_arn: &config.certificate_arn,
            mode: edge_mode,
        },
    )?;

    let outputs = TopologyOutputs {
        load_balancer_dns_name: graph.export(
            "ALBEndpoint",
            load_balancer.dns_name.clone(),
            "DNS name of the Application Load Balancer",
            "DifyALBDnsName",
        ),
        instance_public_address: graph.export(
            "InstancePublicIP",
            instance.public_address.clone(),
            "Public IP of the EC2 instance",
            "DifyInstancePublicIP",
        ),
        instance_id: graph.export(
            "InstanceId",
            instance.instance_id.clone(),
            "InstanceId of the EC2 instance",
            "DifyInstanceId",
        ),
    };

    let graph = graph.finish();
    let critical: Vec<String> = checks::verify_graph(&graph, environment)
        .into_iter()
        .filter(|r| r.severity == Severity::Critical)
        .map(|r| r.message)
        .collect();
    if !critical.is_empty() {
        return Err(TopologyError::InconsistentGraph(critical));
    }
    info!(
        "Topology for {} has {} resources and {} outputs",
        environment,
        graph.resources.len(),
        graph.outputs.len()
    );

    Ok(Topology {
        environment,
        graph,
        network,
        edge_perimeter,
        instance_perimeter,
        instance,
        load_balancer,
        outputs,
    })
}
