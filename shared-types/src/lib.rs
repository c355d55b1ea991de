//! Serializable description of a deployment topology.
//!
//! The types in this crate mirror the shapes a declarative provisioning
//! backend understands: resources carry a `Type` and `Properties`, and
//! cross-resource wiring is expressed with intrinsic references
//! (`{"Ref": ...}`, `{"Fn::GetAtt": [...]}`) instead of concrete IDs.

use serde::Serialize;
use serde_json::json;

/// A property value. Either a literal or a reference that the backend
/// resolves once the referenced resource exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Value {
    #[serde(rename = "Ref")]
    Ref(String),
    #[serde(rename = "Fn::GetAtt")]
    GetAtt(String, String),
    #[serde(rename = "Fn::Base64")]
    Base64(String),
    #[serde(untagged)]
    Literal(String),
}

impl Value {
    pub fn literal(value: impl Into<String>) -> Self {
        Value::Literal(value.into())
    }

    /// Logical ID of the resource this value points at, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Value::Ref(id) | Value::GetAtt(id, _) => Some(id),
            Value::Base64(_) | Value::Literal(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Ref(id) => id.is_empty(),
            Value::GetAtt(id, attribute) => id.is_empty() || attribute.is_empty(),
            Value::Base64(s) | Value::Literal(s) => s.is_empty(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Ref(id) => write!(f, "${{{}}}", id),
            Value::GetAtt(id, attribute) => write!(f, "${{{}.{}}}", id, attribute),
            Value::Base64(s) => write!(f, "base64({} bytes)", s.len()),
            Value::Literal(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn name(value: impl Into<String>) -> Self {
        Tag {
            key: "Name".to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Protocol {
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "-1")]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortRange {
    pub from_port: u16,
    pub to_port: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        PortRange {
            from_port: port,
            to_port: port,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.from_port <= port && port <= self.to_port
    }
}

/// Where traffic matched by a rule comes from (or goes to).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Peer {
    #[serde(rename = "CidrIp")]
    Cidr(String),
    #[serde(rename = "SourceSecurityGroupId")]
    Perimeter(Value),
}

impl Peer {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Peer::Cidr(_) => None,
            Peer::Perimeter(v) => Some(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rule {
    #[serde(skip)]
    pub direction: Direction,
    pub ip_protocol: Protocol,
    #[serde(flatten)]
    pub ports: Option<PortRange>,
    #[serde(flatten)]
    pub peer: Peer,
    pub description: String,
}

impl Rule {
    pub fn ingress_tcp(port: u16, peer: Peer, description: impl Into<String>) -> Self {
        Rule {
            direction: Direction::Ingress,
            ip_protocol: Protocol::Tcp,
            ports: Some(PortRange::single(port)),
            peer,
            description: description.into(),
        }
    }

    pub fn egress_all() -> Self {
        Rule {
            direction: Direction::Egress,
            ip_protocol: Protocol::All,
            ports: None,
            peer: Peer::Cidr("0.0.0.0/0".to_string()),
            description: "Allow all outbound traffic by default".to_string(),
        }
    }

    /// True if the rule admits traffic on `port`. Rules without a port
    /// range match every port.
    pub fn covers_port(&self, port: u16) -> bool {
        self.ports.map_or(true, |p| p.contains(port))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vpc {
    pub cidr_block: String,
    pub enable_dns_hostnames: bool,
    pub enable_dns_support: bool,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InternetGateway {
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GatewayAttachment {
    pub vpc_id: Value,
    pub internet_gateway_id: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RouteTable {
    pub vpc_id: Value,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Route {
    pub route_table_id: Value,
    pub destination_cidr_block: String,
    pub gateway_id: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Subnet {
    pub vpc_id: Value,
    pub cidr_block: String,
    pub availability_zone: String,
    pub map_public_ip_on_launch: bool,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubnetRouteTableAssociation {
    pub route_table_id: Value,
    pub subnet_id: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityGroup {
    pub group_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    pub vpc_id: Value,
    #[serde(rename = "SecurityGroupIngress")]
    pub ingress: Vec<Rule>,
    #[serde(rename = "SecurityGroupEgress")]
    pub egress: Vec<Rule>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Role {
    pub assume_role_policy_document: serde_json::Value,
    pub managed_policy_arns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InstanceProfile {
    pub roles: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    Gp2,
    Gp3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ebs {
    pub volume_size: u32,
    pub volume_type: VolumeType,
    pub encrypted: bool,
    pub delete_on_termination: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockDeviceMapping {
    pub device_name: String,
    pub ebs: Ebs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub image_id: Value,
    pub instance_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    pub subnet_id: Value,
    pub security_group_ids: Vec<Value>,
    pub iam_instance_profile: Value,
    pub user_data: Value,
    pub block_device_mappings: Vec<BlockDeviceMapping>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadBalancer {
    pub name: String,
    pub scheme: String,
    #[serde(rename = "Type")]
    pub kind: String,
    pub subnets: Vec<Value>,
    pub security_groups: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetDescription {
    pub id: Value,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetGroup {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub vpc_id: Value,
    pub target_type: String,
    pub targets: Vec<TargetDescription>,
    pub health_check_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RedirectConfig {
    pub protocol: String,
    pub port: String,
    pub host: String,
    pub path: String,
    pub query: String,
    pub status_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "Type")]
pub enum Action {
    #[serde(rename = "redirect")]
    Redirect {
        #[serde(rename = "RedirectConfig")]
        config: RedirectConfig,
    },
    #[serde(rename = "forward")]
    Forward {
        #[serde(rename = "TargetGroupArn")]
        target_group_arn: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Certificate {
    pub certificate_arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Listener {
    pub load_balancer_arn: Value,
    pub port: u16,
    pub protocol: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub certificates: Vec<Certificate>,
    pub default_actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "Type", content = "Properties")]
pub enum Properties {
    #[serde(rename = "AWS::EC2::VPC")]
    Vpc(Vpc),
    #[serde(rename = "AWS::EC2::InternetGateway")]
    InternetGateway(InternetGateway),
    #[serde(rename = "AWS::EC2::VPCGatewayAttachment")]
    GatewayAttachment(GatewayAttachment),
    #[serde(rename = "AWS::EC2::RouteTable")]
    RouteTable(RouteTable),
    #[serde(rename = "AWS::EC2::Route")]
    Route(Route),
    #[serde(rename = "AWS::EC2::Subnet")]
    Subnet(Subnet),
    #[serde(rename = "AWS::EC2::SubnetRouteTableAssociation")]
    SubnetRouteTableAssociation(SubnetRouteTableAssociation),
    #[serde(rename = "AWS::EC2::SecurityGroup")]
    SecurityGroup(SecurityGroup),
    #[serde(rename = "AWS::IAM::Role")]
    Role(Role),
    #[serde(rename = "AWS::IAM::InstanceProfile")]
    InstanceProfile(InstanceProfile),
    #[serde(rename = "AWS::EC2::Instance")]
    Instance(Instance),
    #[serde(rename = "AWS::ElasticLoadBalancingV2::LoadBalancer")]
    LoadBalancer(LoadBalancer),
    #[serde(rename = "AWS::ElasticLoadBalancingV2::TargetGroup")]
    TargetGroup(TargetGroup),
    #[serde(rename = "AWS::ElasticLoadBalancingV2::Listener")]
    Listener(Listener),
}

impl Properties {
    pub fn type_name(&self) -> &'static str {
        match self {
            Properties::Vpc(_) => "AWS::EC2::VPC",
            Properties::InternetGateway(_) => "AWS::EC2::InternetGateway",
            Properties::GatewayAttachment(_) => "AWS::EC2::VPCGatewayAttachment",
            Properties::RouteTable(_) => "AWS::EC2::RouteTable",
            Properties::Route(_) => "AWS::EC2::Route",
            Properties::Subnet(_) => "AWS::EC2::Subnet",
            Properties::SubnetRouteTableAssociation(_) => "AWS::EC2::SubnetRouteTableAssociation",
            Properties::SecurityGroup(_) => "AWS::EC2::SecurityGroup",
            Properties::Role(_) => "AWS::IAM::Role",
            Properties::InstanceProfile(_) => "AWS::IAM::InstanceProfile",
            Properties::Instance(_) => "AWS::EC2::Instance",
            Properties::LoadBalancer(_) => "AWS::ElasticLoadBalancingV2::LoadBalancer",
            Properties::TargetGroup(_) => "AWS::ElasticLoadBalancingV2::TargetGroup",
            Properties::Listener(_) => "AWS::ElasticLoadBalancingV2::Listener",
        }
    }

    /// Logical IDs of every resource these properties point at.
    pub fn references(&self) -> Vec<&str> {
        let values: Vec<&Value> = match self {
            Properties::Vpc(_) | Properties::InternetGateway(_) | Properties::Role(_) => vec![],
            Properties::GatewayAttachment(a) => vec![&a.vpc_id, &a.internet_gateway_id],
            Properties::RouteTable(r) => vec![&r.vpc_id],
            Properties::Route(r) => vec![&r.route_table_id, &r.gateway_id],
            Properties::Subnet(s) => vec![&s.vpc_id],
            Properties::SubnetRouteTableAssociation(a) => vec![&a.route_table_id, &a.subnet_id],
            Properties::SecurityGroup(g) => std::iter::once(&g.vpc_id)
                .chain(g.ingress.iter().chain(g.egress.iter()).filter_map(|r| r.peer.value()))
                .collect(),
            Properties::InstanceProfile(p) => p.roles.iter().collect(),
            Properties::Instance(i) => [&i.image_id, &i.subnet_id, &i.iam_instance_profile, &i.user_data]
                .into_iter()
                .chain(i.security_group_ids.iter())
                .collect(),
            Properties::LoadBalancer(l) => l.subnets.iter().chain(l.security_groups.iter()).collect(),
            Properties::TargetGroup(t) => std::iter::once(&t.vpc_id)
                .chain(t.targets.iter().map(|target| &target.id))
                .collect(),
            Properties::Listener(l) => std::iter::once(&l.load_balancer_arn)
                .chain(l.default_actions.iter().filter_map(|a| match a {
                    Action::Forward { target_group_arn } => Some(target_group_arn),
                    Action::Redirect { .. } => None,
                }))
                .collect(),
        };
        values.into_iter().filter_map(Value::reference).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    #[serde(rename = "LogicalId")]
    pub logical_id: String,
    #[serde(flatten)]
    pub properties: Properties,
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn type_name(&self) -> &'static str {
        self.properties.type_name()
    }

    /// Property references plus explicit ordering dependencies.
    pub fn references(&self) -> Vec<&str> {
        let mut refs = self.properties.references();
        refs.extend(self.depends_on.iter().map(String::as_str));
        refs
    }
}

/// A value republished for consumers outside the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub logical_id: String,
    pub value: Value,
    pub description: String,
    pub export_name: String,
}

/// Resources in construction order, followed by exported outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceGraph {
    pub environment: String,
    pub description: String,
    pub resources: Vec<Resource>,
    pub outputs: Vec<Output>,
}

impl ResourceGraph {
    pub fn new(environment: impl Into<String>, description: impl Into<String>) -> Self {
        ResourceGraph {
            environment: environment.into(),
            description: description.into(),
            resources: vec![],
            outputs: vec![],
        }
    }

    pub fn get(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.logical_id == logical_id)
    }

    /// Construction index of a resource.
    pub fn position(&self, logical_id: &str) -> Option<usize> {
        self.resources.iter().position(|r| r.logical_id == logical_id)
    }

    pub fn by_type(&self, type_name: &str) -> Vec<&Resource> {
        self.resources
            .iter()
            .filter(|r| r.type_name() == type_name)
            .collect()
    }

    /// Renders the graph as a template document. Object keys carry no
    /// ordering; the backend orders creation through the references.
    pub fn to_template(&self) -> serde_json::Result<serde_json::Value> {
        let mut resources = serde_json::Map::new();
        for resource in self.resources.iter() {
            let mut body = serde_json::to_value(&resource.properties)?;
            if !resource.depends_on.is_empty() {
                if let Some(obj) = body.as_object_mut() {
                    obj.insert(
                        "DependsOn".to_string(),
                        serde_json::to_value(&resource.depends_on)?,
                    );
                }
            }
            resources.insert(resource.logical_id.clone(), body);
        }
        let mut outputs = serde_json::Map::new();
        for output in self.outputs.iter() {
            outputs.insert(
                output.logical_id.clone(),
                json!({
                    "Value": output.value,
                    "Description": output.description,
                    "Export": { "Name": output.export_name },
                }),
            );
        }
        Ok(json!({
            "AWSTemplateFormatVersion": "2010-09-09",
            "Description": self.description,
            "Resources": resources,
            "Outputs": outputs,
        }))
    }
}
