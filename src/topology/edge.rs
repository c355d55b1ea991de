//! Internet-facing load balancer terminating TLS in front of the instance.

use log::info;
use shared_types::{
    Action, Certificate, Listener, LoadBalancer, Properties, RedirectConfig, TargetDescription,
    TargetGroup, Value,
};

use super::compute::InstanceHandle;
use super::graph::GraphBuilder;
use super::network::NetworkHandle;
use super::security::{self, PerimeterHandle, HTTPS_PORT, HTTP_PORT};
use crate::types::TopologyError;

pub const HEALTH_CHECK_PATH: &str = "/apps";
pub const TARGET_PORT: u16 = 80;

/// Where the balancer's perimeter comes from.
#[derive(Debug, Clone, Copy)]
pub enum EdgeMode<'a> {
    /// A perimeter built by the caller, also referenced by the instance
    /// perimeter.
    Shared(&'a PerimeterHandle),
    /// Legacy: the balancer builds its own perimeter from this range.
    Inline { allowed: &'a str },
}

pub struct EdgeInputs<'a> {
    pub network: &'a NetworkHandle,
    pub instance: &'a InstanceHandle,
    pub certificate_arn: &'a str,
    pub mode: EdgeMode<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerHandle {
    Redirect {
        listener_id: Value,
        port: u16,
        to_port: u16,
        permanent: bool,
    },
    Forward {
        listener_id: Value,
        port: u16,
        certificate_arn: String,
        target: Value,
        target_port: u16,
        health_check_path: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerHandle {
    pub logical_id: String,
    pub dns_name: Value,
    pub perimeter_id: Value,
    pub listeners: Vec<ListenerHandle>,
}

/// Empty or blank references count as absent.
pub fn require_certificate(certificate_arn: &str) -> Result<&str, TopologyError> {
    match certificate_arn.trim() {
        "" => Err(TopologyError::MissingCertificate),
        arn => Ok(arn),
    }
}

fn redirect_to_https() -> Action {
    Action::Redirect {
        config: RedirectConfig {
            protocol: "HTTPS".to_string(),
            port: HTTPS_PORT.to_string(),
            host: "#{host}".to_string(),
            path: "/#{path}".to_string(),
            query: "#{query}".to_string(),
            status_code: "HTTP_301".to_string(),
        },
    }
}

pub fn build(
    graph: &mut GraphBuilder,
    inputs: &EdgeInputs,
) -> Result<LoadBalancerHandle, TopologyError> {
    let certificate_arn = require_certificate(inputs.certificate_arn)?.to_string();
    let env = graph.environment();

    let perimeter_id = match inputs.mode {
        EdgeMode::Shared(perimeter) => perimeter.perimeter_id.clone(),
        EdgeMode::Inline { allowed } => {
            security::edge_perimeter(graph, inputs.network, allowed)?.perimeter_id
        }
    };

    let name = env.qualify("dify-alb");
    info!("Building load balancer {}", name);
    let alb = graph.add(
        "ApplicationLoadBalancer",
        Properties::LoadBalancer(LoadBalancer {
            name,
            scheme: "internet-facing".to_string(),
            kind: "application".to_string(),
            subnets: inputs.network.subnet_ids(),
            security_groups: vec![perimeter_id.clone()],
        }),
    );
    let alb_arn = Value::Ref(alb.clone());

    let http = graph.add(
        "HttpListener",
        Properties::Listener(Listener {
            load_balancer_arn: alb_arn.clone(),
            port: HTTP_PORT,
            protocol: "HTTP".to_string(),
            certificates: vec![],
            default_actions: vec![redirect_to_https()],
        }),
    );

    let target_group = graph.add(
        "EC2TargetGroup",
        Properties::TargetGroup(TargetGroup {
            name: env.qualify("dify-tg"),
            port: TARGET_PORT,
            protocol: "HTTP".to_string(),
            vpc_id: inputs.network.network_id.clone(),
            target_type: "instance".to_string(),
            targets: vec![TargetDescription {
                id: inputs.instance.instance_id.clone(),
                port: TARGET_PORT,
            }],
            health_check_path: HEALTH_CHECK_PATH.to_string(),
        }),
    );

    let https = graph.add(
        "HttpsListener",
        Properties::Listener(Listener {
            load_balancer_arn: alb_arn,
            port: HTTPS_PORT,
            protocol: "HTTPS".to_string(),
            certificates: vec![Certificate {
                certificate_arn: certificate_arn.clone(),
            }],
            default_actions: vec![Action::Forward {
                target_group_arn: Value::Ref(target_group),
            }],
        }),
    );

    Ok(LoadBalancerHandle {
        dns_name: Value::GetAtt(alb.clone(), "DNSName".to_string()),
        logical_id: alb,
        perimeter_id,
        listeners: vec![
            ListenerHandle::Redirect {
                listener_id: Value::Ref(http),
                port: HTTP_PORT,
                to_port: HTTPS_PORT,
                permanent: true,
            },
            ListenerHandle::Forward {
                listener_id: Value::Ref(https),
                port: HTTPS_PORT,
                certificate_arn,
                target: inputs.instance.instance_id.clone(),
                target_port: TARGET_PORT,
                health_check_path: HEALTH_CHECK_PATH.to_string(),
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::compute::{self, ComputeInputs, DiskSpec};
    use crate::topology::network::{self, NetworkInputs};
    use crate::topology::security::PerimeterMode;
    use crate::types::Environment;

    const CERT: &str = "arn:aws:acm:us-east-1:123456789012:certificate/abc";

    fn fixtures(graph: &mut GraphBuilder) -> (NetworkHandle, PerimeterHandle, InstanceHandle) {
        let zones = vec!["us-east-1a".to_string(), "us-east-1b".to_string()];
        let net = network::build(
            graph,
            &NetworkInputs {
                vpc_cidr: "192.168.0.0/16",
                subnet_cidrs: ["192.168.0.0/20", "192.168.16.0/20"],
                availability_zones: &zones,
            },
        )
        .unwrap();
        let edge = security::edge_perimeter(graph, &net, "0.0.0.0/0").unwrap();
        let admins = vec!["1.1.1.1/32".to_string()];
        let perimeter = security::build(
            graph,
            &net,
            PerimeterMode::Reference {
                edge: &edge,
                administrators: &admins,
            },
        )
        .unwrap();
        let instance = compute::build(
            graph,
            &ComputeInputs {
                network: &net,
                subnet: &net.subnets[0],
                perimeter: &perimeter,
                key_name: "dify-key",
                image_parameter: compute::DEFAULT_IMAGE_PARAMETER,
                instance_type: compute::DEFAULT_INSTANCE_TYPE,
                disk: &DiskSpec::default(),
            },
        )
        .unwrap();
        (net, edge, instance)
    }

    #[test]
    fn test_missing_certificate() {
        for cert in ["", "   "] {
            let mut graph = GraphBuilder::new(Environment::Dev);
            let (net, edge, instance) = fixtures(&mut graph);
            let before = graph.graph().resources.len();
            let result = build(
                &mut graph,
                &EdgeInputs {
                    network: &net,
                    instance: &instance,
                    certificate_arn: cert,
                    mode: EdgeMode::Shared(&edge),
                },
            );
            assert!(matches!(result, Err(TopologyError::MissingCertificate)));
            assert_eq!(graph.graph().resources.len(), before);
        }
    }

    #[test]
    fn test_listeners() {
        let mut graph = GraphBuilder::new(Environment::Dev);
        let (net, edge, instance) = fixtures(&mut graph);
        let lb = build(
            &mut graph,
            &EdgeInputs {
                network: &net,
                instance: &instance,
                certificate_arn: CERT,
                mode: EdgeMode::Shared(&edge),
            },
        )
        .unwrap();

        assert_eq!(lb.listeners.len(), 2);
        assert_eq!(
            lb.listeners[0],
            ListenerHandle::Redirect {
                listener_id: Value::Ref("HttpListenerDev".to_string()),
                port: 80,
                to_port: 443,
                permanent: true,
            }
        );
        assert_eq!(
            lb.listeners[1],
            ListenerHandle::Forward {
                listener_id: Value::Ref("HttpsListenerDev".to_string()),
                port: 443,
                certificate_arn: CERT.to_string(),
                target: instance.instance_id.clone(),
                target_port: 80,
                health_check_path: "/apps".to_string(),
            }
        );
        assert_eq!(lb.perimeter_id, edge.perimeter_id);
        assert_eq!(
            lb.dns_name,
            Value::GetAtt("ApplicationLoadBalancerDev".to_string(), "DNSName".to_string())
        );

        let graph = graph.finish();
        let Properties::Listener(http) = &graph.get("HttpListenerDev").unwrap().properties else {
            panic!("expected a listener");
        };
        assert!(http.certificates.is_empty());
        let Action::Redirect { config } = &http.default_actions[0] else {
            panic!("expected a redirect");
        };
        assert_eq!(config.status_code, "HTTP_301");
        assert_eq!(config.protocol, "HTTPS");
        assert_eq!(config.host, "#{host}");
    }

    #[test]
    fn test_shared_mode_reuses_perimeter() {
        let mut graph = GraphBuilder::new(Environment::Dev);
        let (net, edge, instance) = fixtures(&mut graph);
        build(
            &mut graph,
            &EdgeInputs {
                network: &net,
                instance: &instance,
                certificate_arn: CERT,
                mode: EdgeMode::Shared(&edge),
            },
        )
        .unwrap();
        assert_eq!(graph.graph().by_type("AWS::EC2::SecurityGroup").len(), 2);
    }

    #[test]
    fn test_inline_mode_builds_own_perimeter() {
        let mut graph = GraphBuilder::new(Environment::Dev);
        let (net, _edge, instance) = fixtures(&mut graph);
        let mut scratch = GraphBuilder::new(Environment::Prod);
        let lb = build(
            &mut scratch,
            &EdgeInputs {
                network: &net,
                instance: &instance,
                certificate_arn: CERT,
                mode: EdgeMode::Inline {
                    allowed: "203.0.113.0/24",
                },
            },
        )
        .unwrap();
        assert_eq!(scratch.graph().by_type("AWS::EC2::SecurityGroup").len(), 1);
        assert_eq!(
            lb.perimeter_id,
            Value::GetAtt(
                "ApplicationLoadBalancerSecurityGroupProd".to_string(),
                "GroupId".to_string()
            )
        );
    }

    #[test]
    fn test_target_group_points_at_instance() {
        let mut graph = GraphBuilder::new(Environment::Prod);
        let (net, edge, instance) = fixtures(&mut graph);
        build(
            &mut graph,
            &EdgeInputs {
                network: &net,
                instance: &instance,
                certificate_arn: CERT,
                mode: EdgeMode::Shared(&edge),
            },
        )
        .unwrap();
        let graph = graph.finish();
        let Properties::TargetGroup(tg) = &graph.get("EC2TargetGroupProd").unwrap().properties
        else {
            panic!("expected a target group");
        };
        assert_eq!(tg.name, "dify-tg-prod");
        assert_eq!(tg.health_check_path, HEALTH_CHECK_PATH);
        assert_eq!(
            tg.targets,
            vec![TargetDescription {
                id: instance.instance_id.clone(),
                port: 80
            }]
        );
    }
}
