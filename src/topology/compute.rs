//! The web server instance and its execution identity.

use log::info;
use serde_json::json;
use shared_types::{
    BlockDeviceMapping, Ebs, Instance, InstanceProfile, Properties, Role, Tag, Value, VolumeType,
};

use super::bootstrap::BOOTSTRAP_SCRIPT;
use super::graph::GraphBuilder;
use super::network::{NetworkHandle, SubnetHandle};
use super::security::PerimeterHandle;
use crate::types::TopologyError;

pub const DEFAULT_IMAGE_PARAMETER: &str =
    "/aws/service/ami-amazon-linux-latest/al2023-ami-kernel-6.1-x86_64";
pub const DEFAULT_INSTANCE_TYPE: &str = "t3.medium";
pub const ROOT_DEVICE: &str = "/dev/xvda";

pub const MANAGED_POLICIES: [&str; 2] = [
    "arn:aws:iam::aws:policy/AmazonBedrockFullAccess",
    "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpec {
    pub size_gib: u32,
    pub volume_type: VolumeType,
    pub encrypted: bool,
}

impl Default for DiskSpec {
    fn default() -> Self {
        DiskSpec {
            size_gib: 20,
            volume_type: VolumeType::Gp2,
            encrypted: true,
        }
    }
}

pub struct ComputeInputs<'a> {
    pub network: &'a NetworkHandle,
    pub subnet: &'a SubnetHandle,
    pub perimeter: &'a PerimeterHandle,
    pub key_name: &'a str,
    /// Parameter-store path holding the image ID.
    pub image_parameter: &'a str,
    pub instance_type: &'a str,
    pub disk: &'a DiskSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    pub logical_id: String,
    pub instance_id: Value,
    pub public_address: Value,
    pub execution_identity: Value,
    pub subnet_id: Value,
}

fn assume_role_policy() -> serde_json::Value {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "ec2.amazonaws.com" },
            "Action": "sts:AssumeRole",
        }],
    })
}

/// Dynamic reference resolved by the backend at deploy time.
fn image_reference(parameter: &str) -> Value {
    Value::literal(format!("{{{{resolve:ssm:{}}}}}", parameter))
}

pub fn build(
    graph: &mut GraphBuilder,
    inputs: &ComputeInputs,
) -> Result<InstanceHandle, TopologyError> {
    if !inputs.disk.encrypted {
        return Err(TopologyError::UnencryptedStorage);
    }
    if !inputs.network.owns(inputs.subnet) {
        return Err(TopologyError::UnknownSubnet(inputs.subnet.cidr.to_string()));
    }
    if inputs.perimeter.rules.is_empty() {
        return Err(TopologyError::EmptyPerimeter(
            inputs.perimeter.logical_id.clone(),
        ));
    }
    let env = graph.environment();
    info!(
        "Building {} instance in {}",
        inputs.instance_type, inputs.subnet.availability_zone
    );

    let role = graph.add(
        "DifyWebServerInstanceRole",
        Properties::Role(Role {
            assume_role_policy_document: assume_role_policy(),
            managed_policy_arns: MANAGED_POLICIES.iter().map(|p| p.to_string()).collect(),
        }),
    );
    let profile = graph.add(
        "InstanceProfile",
        Properties::InstanceProfile(InstanceProfile {
            roles: vec![Value::Ref(role.clone())],
        }),
    );

    let key_name = match inputs.key_name.trim() {
        "" => None,
        k => Some(k.to_string()),
    };
    let instance = graph.add_after(
        "DifyWebServerInstance",
        Properties::Instance(Instance {
            image_id: image_reference(inputs.image_parameter),
            instance_type: inputs.instance_type.to_string(),
            key_name,
            subnet_id: inputs.subnet.subnet_id.clone(),
            security_group_ids: vec![inputs.perimeter.perimeter_id.clone()],
            iam_instance_profile: Value::Ref(profile.clone()),
            user_data: Value::Base64(BOOTSTRAP_SCRIPT.to_string()),
            block_device_mappings: vec![BlockDeviceMapping {
                device_name: ROOT_DEVICE.to_string(),
                ebs: Ebs {
                    volume_size: inputs.disk.size_gib,
                    volume_type: inputs.disk.volume_type,
                    encrypted: true,
                    delete_on_termination: true,
                },
            }],
            tags: vec![Tag::name(env.qualify("DifyWebServerInstance"))],
        }),
        vec![profile],
    );

    Ok(InstanceHandle {
        instance_id: Value::Ref(instance.clone()),
        public_address: Value::GetAtt(instance.clone(), "PublicIp".to_string()),
        execution_identity: Value::GetAtt(role, "Arn".to_string()),
        subnet_id: inputs.subnet.subnet_id.clone(),
        logical_id: instance,
    })
}
