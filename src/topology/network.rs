//! Virtual network with two public subnets.
//!
//! Emits, in order:
//! - the network itself
//! - an internet gateway and its attachment
//! - a route table with a default route through the gateway
//! - two subnets in distinct availability zones, each associated with the
//!   route table

use itertools::Itertools;
use log::{debug, info};
use shared_types::{
    GatewayAttachment, InternetGateway, Properties, Route, RouteTable, Subnet,
    SubnetRouteTableAssociation, Tag, Value, Vpc,
};

use super::graph::GraphBuilder;
use crate::types::{Cidr, TopologyError};

pub const DEFAULT_ROUTE: &str = "0.0.0.0/0";

pub struct NetworkInputs<'a> {
    pub vpc_cidr: &'a str,
    pub subnet_cidrs: [&'a str; 2],
    /// Feasible zones for the target region, in preference order.
    pub availability_zones: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetHandle {
    pub subnet_id: Value,
    pub availability_zone: String,
    pub cidr: Cidr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub network_id: Value,
    pub cidr: Cidr,
    pub route_table_id: Value,
    pub subnets: Vec<SubnetHandle>,
}

impl NetworkHandle {
    pub fn subnet_ids(&self) -> Vec<Value> {
        self.subnets.iter().map(|s| s.subnet_id.clone()).collect()
    }

    pub fn owns(&self, subnet: &SubnetHandle) -> bool {
        self.subnets.contains(subnet)
    }
}

fn validate(inputs: &NetworkInputs) -> Result<(Cidr, [Cidr; 2], [String; 2]), TopologyError> {
    let vpc: Cidr = inputs.vpc_cidr.parse()?;
    let subnets: [Cidr; 2] = [
        inputs.subnet_cidrs[0].parse()?,
        inputs.subnet_cidrs[1].parse()?,
    ];
    let zones: Vec<&String> = inputs.availability_zones.iter().unique().collect();
    if zones.len() < 2 {
        return Err(TopologyError::InsufficientZones { found: zones.len() });
    }
    for subnet in subnets.iter() {
        if !vpc.contains(subnet) {
            return Err(TopologyError::SubnetOutOfRange {
                subnet: subnet.to_string(),
                network: vpc.to_string(),
            });
        }
    }
    if subnets[0].overlaps(&subnets[1]) {
        return Err(TopologyError::OverlappingSubnets(
            subnets[0].to_string(),
            subnets[1].to_string(),
        ));
    }
    Ok((vpc, subnets, [zones[0].clone(), zones[1].clone()]))
}

pub fn build(
    graph: &mut GraphBuilder,
    inputs: &NetworkInputs,
) -> Result<NetworkHandle, TopologyError> {
    let (vpc_cidr, subnet_cidrs, zones) = validate(inputs)?;
    let env = graph.environment();
    info!("Building network {} across {}", vpc_cidr, zones.join(", "));

    let vpc = graph.add(
        "DifyVPC",
        Properties::Vpc(Vpc {
            cidr_block: vpc_cidr.to_string(),
            enable_dns_hostnames: true,
            enable_dns_support: true,
            tags: vec![Tag::name(env.qualify("DifyVPC"))],
        }),
    );
    let network_id = Value::Ref(vpc);

    let igw = graph.add(
        "InternetGateway",
        Properties::InternetGateway(InternetGateway {
            tags: vec![Tag::name(env.qualify("dify-vpc-igw"))],
        }),
    );
    let attachment = graph.add(
        "VPCGatewayAttachment",
        Properties::GatewayAttachment(GatewayAttachment {
            vpc_id: network_id.clone(),
            internet_gateway_id: Value::Ref(igw.clone()),
        }),
    );

    let route_table = graph.add(
        "RouteTable",
        Properties::RouteTable(RouteTable {
            vpc_id: network_id.clone(),
            tags: vec![Tag::name(env.qualify("dify-route-table"))],
        }),
    );
    let route_table_id = Value::Ref(route_table);
    // The route is only usable once the gateway is attached.
    graph.add_after(
        "Route",
        Properties::Route(Route {
            route_table_id: route_table_id.clone(),
            destination_cidr_block: DEFAULT_ROUTE.to_string(),
            gateway_id: Value::Ref(igw),
        }),
        vec![attachment],
    );

    let mut subnets = Vec::with_capacity(2);
    for (i, (cidr, zone)) in subnet_cidrs.iter().zip(zones.iter()).enumerate() {
        let n = i + 1;
        let subnet = graph.add(
            &format!("Subnet{}", n),
            Properties::Subnet(Subnet {
                vpc_id: network_id.clone(),
                cidr_block: cidr.to_string(),
                availability_zone: zone.clone(),
                map_public_ip_on_launch: true,
                tags: vec![Tag::name(env.qualify(&format!("dify-subnet-{}", n)))],
            }),
        );
        let subnet_id = Value::Ref(subnet);
        graph.add(
            &format!("Subnet{}RouteTableAssociation", n),
            Properties::SubnetRouteTableAssociation(SubnetRouteTableAssociation {
                route_table_id: route_table_id.clone(),
                subnet_id: subnet_id.clone(),
            }),
        );
        debug!("Subnet {} ({}) in {}", n, cidr, zone);
        subnets.push(SubnetHandle {
            subnet_id,
            availability_zone: zone.clone(),
            cidr: *cidr,
        });
    }

    Ok(NetworkHandle {
        network_id,
        cidr: vpc_cidr,
        route_table_id,
        subnets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Environment;

    fn zones(names: &[&str]) -> Vec<String> {
        names.iter().map(|z| z.to_string()).collect()
    }

    fn default_inputs(availability_zones: &[String]) -> NetworkInputs<'_> {
        NetworkInputs {
            vpc_cidr: "192.168.0.0/16",
            subnet_cidrs: ["192.168.0.0/20", "192.168.16.0/20"],
            availability_zones,
        }
    }

    #[test]
    fn test_single_zone_is_rejected() {
        let zs = zones(&["us-east-1a"]);
        let mut graph = GraphBuilder::new(Environment::Dev);
        let result = build(&mut graph, &default_inputs(&zs));
        assert!(matches!(
            result,
            Err(TopologyError::InsufficientZones { found: 1 })
        ));
        assert!(graph.graph().resources.is_empty());
    }

    #[test]
    fn test_duplicate_zones_do_not_count_twice() {
        let zs = zones(&["us-east-1a", "us-east-1a"]);
        let mut graph = GraphBuilder::new(Environment::Dev);
        let result = build(&mut graph, &default_inputs(&zs));
        assert!(matches!(
            result,
            Err(TopologyError::InsufficientZones { found: 1 })
        ));
    }

    #[test]
    fn test_two_subnets_share_one_route_table() {
        let zs = zones(&["us-east-1a", "us-east-1b", "us-east-1c"]);
        let mut graph = GraphBuilder::new(Environment::Dev);
        let network = build(&mut graph, &default_inputs(&zs)).unwrap();
        let graph = graph.finish();

        assert_eq!(network.subnets.len(), 2);
        assert_eq!(network.subnets[0].availability_zone, "us-east-1a");
        assert_eq!(network.subnets[1].availability_zone, "us-east-1b");
        assert_eq!(graph.by_type("AWS::EC2::Subnet").len(), 2);
        assert_eq!(graph.by_type("AWS::EC2::RouteTable").len(), 1);

        let associations = graph.by_type("AWS::EC2::SubnetRouteTableAssociation");
        assert_eq!(associations.len(), 2);
        for (association, subnet) in associations.iter().zip(network.subnets.iter()) {
            match &association.properties {
                Properties::SubnetRouteTableAssociation(a) => {
                    assert_eq!(a.route_table_id, network.route_table_id);
                    assert_eq!(a.subnet_id, subnet.subnet_id);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_default_route_goes_through_gateway() {
        let zs = zones(&["eu-west-1a", "eu-west-1b"]);
        let mut graph = GraphBuilder::new(Environment::Prod);
        build(&mut graph, &default_inputs(&zs)).unwrap();
        let graph = graph.finish();
        let route = graph.get("RouteProd").unwrap();
        assert_eq!(route.depends_on, vec!["VPCGatewayAttachmentProd".to_string()]);
        match &route.properties {
            Properties::Route(r) => {
                assert_eq!(r.destination_cidr_block, DEFAULT_ROUTE);
                assert_eq!(r.gateway_id, Value::Ref("InternetGatewayProd".to_string()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_subnet_outside_network() {
        let zs = zones(&["us-east-1a", "us-east-1b"]);
        let inputs = NetworkInputs {
            vpc_cidr: "192.168.0.0/16",
            subnet_cidrs: ["192.168.0.0/20", "10.0.16.0/20"],
            availability_zones: &zs,
        };
        let mut graph = GraphBuilder::new(Environment::Dev);
        assert!(matches!(
            build(&mut graph, &inputs),
            Err(TopologyError::SubnetOutOfRange { .. })
        ));
    }

    #[test]
    fn test_overlapping_subnets() {
        let zs = zones(&["us-east-1a", "us-east-1b"]);
        let inputs = NetworkInputs {
            vpc_cidr: "192.168.0.0/16",
            subnet_cidrs: ["192.168.0.0/20", "192.168.0.0/24"],
            availability_zones: &zs,
        };
        let mut graph = GraphBuilder::new(Environment::Dev);
        assert!(matches!(
            build(&mut graph, &inputs),
            Err(TopologyError::OverlappingSubnets(_, _))
        ));
    }

    #[test]
    fn test_malformed_network_block() {
        let zs = zones(&["us-east-1a", "us-east-1b"]);
        let inputs = NetworkInputs {
            vpc_cidr: "192.168.0.0",
            subnet_cidrs: ["192.168.0.0/20", "192.168.16.0/20"],
            availability_zones: &zs,
        };
        let mut graph = GraphBuilder::new(Environment::Dev);
        assert!(matches!(
            build(&mut graph, &inputs),
            Err(TopologyError::InvalidCidr(_))
        ));
    }
}
