//! Security perimeters (security groups) scoped to the network.

use itertools::Itertools;
use log::{debug, info, warn};
use shared_types::{Direction, Peer, Properties, Rule, SecurityGroup, Tag, Value};

use super::graph::GraphBuilder;
use super::network::NetworkHandle;
use crate::types::{Cidr, TopologyError};

pub const HTTP_PORT: u16 = 80;
pub const HTTPS_PORT: u16 = 443;
pub const SSH_PORT: u16 = 22;

/// How the instance perimeter admits traffic.
#[derive(Debug, Clone, Copy)]
pub enum PerimeterMode<'a> {
    /// HTTP only from the edge perimeter, SSH only from the listed
    /// administrator addresses. The edge perimeter is borrowed, never owned.
    Reference {
        edge: &'a PerimeterHandle,
        administrators: &'a [String],
    },
    /// Legacy: HTTP and SSH from a single range.
    Cidr { allowed: &'a str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerimeterHandle {
    pub logical_id: String,
    pub perimeter_id: Value,
    /// Ingress rules first, then egress, in emission order.
    pub rules: Vec<Rule>,
}

impl PerimeterHandle {
    pub fn ingress(&self) -> impl Iterator<Item = &Rule> {
        self.rules
            .iter()
            .filter(|r| r.direction == Direction::Ingress)
    }

    pub fn egress(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.direction == Direction::Egress)
    }
}

fn emit(
    graph: &mut GraphBuilder,
    name: &str,
    group_name: String,
    description: String,
    network: &NetworkHandle,
    ingress: Vec<Rule>,
) -> Result<PerimeterHandle, TopologyError> {
    if ingress.is_empty() {
        return Err(TopologyError::EmptyPerimeter(name.to_string()));
    }
    let egress = vec![Rule::egress_all()];
    let logical_id = graph.add(
        name,
        Properties::SecurityGroup(SecurityGroup {
            group_description: description,
            group_name: Some(group_name.clone()),
            vpc_id: network.network_id.clone(),
            ingress: ingress.clone(),
            egress: egress.clone(),
            tags: vec![Tag::name(group_name)],
        }),
    );
    Ok(PerimeterHandle {
        perimeter_id: Value::GetAtt(logical_id.clone(), "GroupId".to_string()),
        logical_id,
        rules: ingress.into_iter().chain(egress).collect(),
    })
}

/// The load balancer's own perimeter: HTTP and HTTPS from `allowed`.
pub fn edge_perimeter(
    graph: &mut GraphBuilder,
    network: &NetworkHandle,
    allowed: &str,
) -> Result<PerimeterHandle, TopologyError> {
    let allowed: Cidr = allowed.parse()?;
    let env = graph.environment();
    if allowed.is_unrestricted() {
        debug!("Edge perimeter is open to the world");
    }
    let peer = Peer::Cidr(allowed.to_string());
    emit(
        graph,
        "ApplicationLoadBalancerSecurityGroup",
        env.qualify("dify-alb-security-group"),
        format!("Security Group for ALB - env: {}", env),
        network,
        vec![
            Rule::ingress_tcp(
                HTTP_PORT,
                peer.clone(),
                format!("Allow HTTP from {}", allowed),
            ),
            Rule::ingress_tcp(HTTPS_PORT, peer, format!("Allow HTTPS from {}", allowed)),
        ],
    )
}

/// Ranges broader than this are accepted for SSH but reported.
pub const ADMIN_MIN_PREFIX: u8 = 24;

/// Parses and deduplicates the SSH allow-list, keeping first-seen order.
pub fn administrator_ranges(administrators: &[String]) -> Result<Vec<Cidr>, TopologyError> {
    let parsed = administrators
        .iter()
        .map(|a| a.parse::<Cidr>())
        .collect::<Result<Vec<_>, _>>()?;
    let admins: Vec<Cidr> = parsed.iter().copied().unique().collect();
    if admins.len() < parsed.len() {
        debug!(
            "Dropped {} duplicate administrator ranges",
            parsed.len() - admins.len()
        );
    }
    if admins.is_empty() {
        return Err(TopologyError::EmptyAllowList);
    }
    if let Some(open) = admins.iter().find(|a| a.is_unrestricted()) {
        return Err(TopologyError::UnrestrictedManagementAccess(open.to_string()));
    }
    for broad in admins.iter().filter(|a| a.prefix() < ADMIN_MIN_PREFIX) {
        warn!(
            "Administrator range {} is broader than /{}, SSH is open to many addresses",
            broad, ADMIN_MIN_PREFIX
        );
    }
    Ok(admins)
}

/// The instance perimeter.
pub fn build(
    graph: &mut GraphBuilder,
    network: &NetworkHandle,
    mode: PerimeterMode,
) -> Result<PerimeterHandle, TopologyError> {
    let env = graph.environment();
    let (description, ingress) = match mode {
        PerimeterMode::Reference {
            edge,
            administrators,
        } => {
            let admins = administrator_ranges(administrators)?;
            info!(
                "Instance perimeter admits HTTP from {} and SSH from {} addresses",
                edge.logical_id,
                admins.len()
            );
            let mut rules = vec![Rule::ingress_tcp(
                HTTP_PORT,
                Peer::Perimeter(edge.perimeter_id.clone()),
                "Allow HTTP traffic only from the load balancer security group",
            )];
            rules.extend(admins.iter().map(|ip| {
                Rule::ingress_tcp(
                    SSH_PORT,
                    Peer::Cidr(ip.to_string()),
                    format!("Allow SSH traffic from {}", ip),
                )
            }));
            (
                format!(
                    "Allow HTTP (from ALB only) and SSH (from {} IPs) for env: {}",
                    admins.len(),
                    env
                ),
                rules,
            )
        }
        PerimeterMode::Cidr { allowed } => {
            let allowed: Cidr = allowed.parse()?;
            if allowed.is_unrestricted() {
                warn!(
                    "Instance perimeter admits SSH from {}, restrict --allowed-cidr or drop --legacy-perimeter",
                    allowed
                );
            }
            let peer = Peer::Cidr(allowed.to_string());
            (
                format!("Allow HTTP and SSH from {} for env: {}", allowed, env),
                vec![
                    Rule::ingress_tcp(HTTP_PORT, peer.clone(), "Allow HTTP traffic"),
                    Rule::ingress_tcp(SSH_PORT, peer, "Allow SSH traffic"),
                ],
            )
        }
    };
    emit(
        graph,
        "DifySecurityGroup",
        env.qualify("dify-security-group"),
        description,
        network,
        ingress,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::network::{self, NetworkInputs};
    use crate::types::Environment;

    fn network(graph: &mut GraphBuilder) -> NetworkHandle {
        let zones = vec!["us-east-1a".to_string(), "us-east-1b".to_string()];
        network::build(
            graph,
            &NetworkInputs {
                vpc_cidr: "192.168.0.0/16",
                subnet_cidrs: ["192.168.0.0/20", "192.168.16.0/20"],
                availability_zones: &zones,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_cidr_mode_admits_http_and_ssh_from_range() {
        let mut graph = GraphBuilder::new(Environment::Dev);
        let net = network(&mut graph);
        let perimeter = build(
            &mut graph,
            &net,
            PerimeterMode::Cidr {
                allowed: "10.0.0.0/8",
            },
        )
        .unwrap();
        let ingress: Vec<&Rule> = perimeter.ingress().collect();
        assert_eq!(ingress.len(), 2);
        assert_eq!(ingress[0].ports.unwrap().from_port, HTTP_PORT);
        assert_eq!(ingress[1].ports.unwrap().from_port, SSH_PORT);
        for rule in ingress {
            assert_eq!(rule.peer, Peer::Cidr("10.0.0.0/8".to_string()));
        }
        let egress: Vec<&Rule> = perimeter.egress().collect();
        assert_eq!(egress.len(), 1);
        assert_eq!(egress[0].peer, Peer::Cidr("0.0.0.0/0".to_string()));
    }

    #[test]
    fn test_reference_mode_rules() {
        let mut graph = GraphBuilder::new(Environment::Dev);
        let net = network(&mut graph);
        let edge = edge_perimeter(&mut graph, &net, "0.0.0.0/0").unwrap();
        let admins = vec!["1.1.1.1/32".to_string(), "2.2.2.2/32".to_string()];
        let perimeter = build(
            &mut graph,
            &net,
            PerimeterMode::Reference {
                edge: &edge,
                administrators: &admins,
            },
        )
        .unwrap();

        let http: Vec<&Rule> = perimeter
            .ingress()
            .filter(|r| r.covers_port(HTTP_PORT))
            .collect();
        assert_eq!(http.len(), 1);
        assert_eq!(http[0].peer, Peer::Perimeter(edge.perimeter_id.clone()));

        let ssh: Vec<&Rule> = perimeter
            .ingress()
            .filter(|r| r.covers_port(SSH_PORT))
            .collect();
        assert_eq!(ssh.len(), 2);
        assert_eq!(ssh[0].peer, Peer::Cidr("1.1.1.1/32".to_string()));
        assert_eq!(ssh[1].peer, Peer::Cidr("2.2.2.2/32".to_string()));

        // The edge perimeter is referenced, not re-emitted.
        assert_eq!(graph.graph().by_type("AWS::EC2::SecurityGroup").len(), 2);
    }

    #[test]
    fn test_reference_mode_needs_administrators() {
        let mut graph = GraphBuilder::new(Environment::Dev);
        let net = network(&mut graph);
        let edge = edge_perimeter(&mut graph, &net, "0.0.0.0/0").unwrap();
        let before = graph.graph().resources.len();
        let result = build(
            &mut graph,
            &net,
            PerimeterMode::Reference {
                edge: &edge,
                administrators: &[],
            },
        );
        assert!(matches!(result, Err(TopologyError::EmptyAllowList)));
        assert_eq!(graph.graph().resources.len(), before);
    }

    #[test]
    fn test_reference_mode_rejects_open_management_port() {
        let mut graph = GraphBuilder::new(Environment::Dev);
        let net = network(&mut graph);
        let edge = edge_perimeter(&mut graph, &net, "0.0.0.0/0").unwrap();
        let admins = vec!["1.1.1.1/32".to_string(), "0.0.0.0/0".to_string()];
        let result = build(
            &mut graph,
            &net,
            PerimeterMode::Reference {
                edge: &edge,
                administrators: &admins,
            },
        );
        assert!(matches!(
            result,
            Err(TopologyError::UnrestrictedManagementAccess(_))
        ));
    }

    #[test]
    fn test_duplicate_administrators_collapse() {
        let mut graph = GraphBuilder::new(Environment::Dev);
        let net = network(&mut graph);
        let edge = edge_perimeter(&mut graph, &net, "0.0.0.0/0").unwrap();
        let admins = vec!["1.1.1.1/32".to_string(), "1.1.1.1/32".to_string()];
        let perimeter = build(
            &mut graph,
            &net,
            PerimeterMode::Reference {
                edge: &edge,
                administrators: &admins,
            },
        )
        .unwrap();
        assert_eq!(
            perimeter
                .ingress()
                .filter(|r| r.covers_port(SSH_PORT))
                .count(),
            1
        );
    }

    #[test]
    fn test_administrator_ranges() {
        let admins = vec![
            "1.1.1.1/32".to_string(),
            "10.0.0.0/8".to_string(),
            "1.1.1.1/32".to_string(),
        ];
        let ranges = administrator_ranges(&admins).unwrap();
        assert_eq!(
            ranges.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            vec!["1.1.1.1/32", "10.0.0.0/8"]
        );
        // broad but not unrestricted ranges are kept
        assert!(ranges[1].prefix() < ADMIN_MIN_PREFIX);

        let open = vec!["0.0.0.0/0".to_string()];
        assert!(matches!(
            administrator_ranges(&open),
            Err(TopologyError::UnrestrictedManagementAccess(_))
        ));
        let garbage = vec!["1.1.1.1".to_string()];
        assert!(matches!(
            administrator_ranges(&garbage),
            Err(TopologyError::InvalidCidr(_))
        ));
    }

    #[test]
    fn test_edge_perimeter_opens_http_and_https() {
        let mut graph = GraphBuilder::new(Environment::Prod);
        let net = network(&mut graph);
        let edge = edge_perimeter(&mut graph, &net, "203.0.113.0/24").unwrap();
        let ports: Vec<u16> = edge
            .ingress()
            .map(|r| r.ports.unwrap().from_port)
            .collect();
        assert_eq!(ports, vec![HTTP_PORT, HTTPS_PORT]);
        assert_eq!(
            edge.perimeter_id,
            Value::GetAtt(
                "ApplicationLoadBalancerSecurityGroupProd".to_string(),
                "GroupId".to_string()
            )
        );
    }
}
