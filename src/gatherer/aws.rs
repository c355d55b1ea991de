pub mod ec2;
pub mod loadbalancerv2;

use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_config::SdkConfig;
use aws_sdk_ec2::types::Instance;
use aws_sdk_elasticloadbalancingv2::types::LoadBalancer;
use headers::Authorization;
use hyper::client::HttpConnector;
use hyper::Uri;
use hyper_proxy::{Intercept, Proxy, ProxyConnector};
use itertools::Itertools;
use log::{debug, error, warn};
use serde::Serialize;
use url::Url;

use crate::gatherer::aws::ec2::{AvailabilityZoneGatherer, InstanceGatherer};
use crate::gatherer::aws::loadbalancerv2::LoadBalancerGatherer;
use crate::gatherer::Gatherer;
use crate::types::{Environment, TopologyError};

fn proxy_setting() -> Option<String> {
    std::env::var("HTTPS_PROXY")
        .or_else(|_v| std::env::var("https_proxy"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Returns `ProxyConnector<HttpConnector>` if env. variable 'https_proxy' is set
pub fn determine_proxy() -> Option<ProxyConnector<HttpConnector>> {
    let mut setting = proxy_setting()?;
    if !setting.contains("://") {
        error!("Configured proxy did not specify a scheme - falling back to HTTP.");
        setting = format!("http://{}", setting);
    }
    let proxy_url: Url = setting.parse().ok()?;
    let proxy_uri: Uri = setting.parse().ok()?;
    let mut proxy = Proxy::new(Intercept::All, proxy_uri);

    if let Some(password) = proxy_url.password() {
        proxy.set_authorization(Authorization::basic(proxy_url.username(), password));
    }

    let connector = HttpConnector::new();
    match ProxyConnector::from_proxy(connector, proxy) {
        Ok(c) => Some(c),
        Err(e) => {
            error!("Unable to set up proxy connector: {}", e);
            None
        }
    }
}

/// Will setup the SdkConfig with a proxy if needed.
pub async fn aws_setup() -> SdkConfig {
    let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
    if let Some(region) = region_provider.region().await {
        debug!("Using region: {}", region);
    }
    if let Some(proxy) = determine_proxy() {
        debug!("Using proxy");
        let client =
            aws_smithy_runtime::client::http::hyper_014::HyperClientBuilder::new().build(proxy);
        aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await
            .into_builder()
            .http_client(client)
            .build()
    } else {
        debug!("Not using a proxy");
        aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await
    }
}

/// Names of the available zones in the configured region, sorted.
pub async fn gather_zones() -> Result<Vec<String>, TopologyError> {
    let config = aws_setup().await;
    let client = aws_sdk_ec2::Client::new(&config);
    let zones = AvailabilityZoneGatherer { client: &client }
        .gather()
        .await
        .map_err(|e| TopologyError::Provider(e.to_string()))?;
    Ok(zones
        .iter()
        .filter_map(|z| z.zone_name())
        .map(str::to_string)
        .sorted()
        .collect())
}

/// Live values of the exported outputs. Absent when not deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiveStatus {
    pub environment: Environment,
    pub load_balancer_dns_name: Option<String>,
    pub load_balancer_state: Option<String>,
    pub instance_public_address: Option<String>,
    pub instance_id: Option<String>,
    pub instance_state: Option<String>,
}

impl LiveStatus {
    pub fn from_resources(
        environment: Environment,
        load_balancers: &[LoadBalancer],
        instances: &[Instance],
    ) -> Self {
        if instances.len() > 1 {
            warn!(
                "Found {} instances for {}, reporting the first",
                instances.len(),
                environment
            );
        }
        let lb = load_balancers.first();
        let instance = instances.first();
        LiveStatus {
            environment,
            load_balancer_dns_name: lb.and_then(|l| l.dns_name()).map(str::to_string),
            load_balancer_state: lb
                .and_then(|l| l.state())
                .and_then(|s| s.code())
                .map(|c| c.as_str().to_string()),
            instance_public_address: instance
                .and_then(|i| i.public_ip_address())
                .map(str::to_string),
            instance_id: instance.and_then(|i| i.instance_id()).map(str::to_string),
            instance_state: instance
                .and_then(|i| i.state())
                .and_then(|s| s.name())
                .map(|n| n.as_str().to_string()),
        }
    }

    pub fn is_deployed(&self) -> bool {
        self.load_balancer_dns_name.is_some() && self.instance_id.is_some()
    }
}

pub async fn gather_status(environment: Environment) -> Result<LiveStatus, TopologyError> {
    let config = aws_setup().await;
    let ec2_client = aws_sdk_ec2::Client::new(&config);
    let elbv2_client = aws_sdk_elasticloadbalancingv2::Client::new(&config);

    let load_balancers = LoadBalancerGatherer {
        client: &elbv2_client,
        environment,
    }
    .gather()
    .await
    .map_err(|e| TopologyError::Provider(e.to_string()))?;
    let instances = InstanceGatherer {
        client: &ec2_client,
        environment,
    }
    .gather()
    .await
    .map_err(|e| TopologyError::Provider(e.to_string()))?;
    Ok(LiveStatus::from_resources(
        environment,
        &load_balancers,
        &instances,
    ))
}
