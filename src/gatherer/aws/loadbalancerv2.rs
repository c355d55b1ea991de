use async_trait::async_trait;
use aws_sdk_elasticloadbalancingv2::types::LoadBalancer;
use aws_sdk_elasticloadbalancingv2::Client as ELBv2Client;
use log::{debug, error};

use crate::gatherer::{GatherError, Gatherer};
use crate::types::Environment;

/// The environment's application load balancer, looked up by name.
pub struct LoadBalancerGatherer<'a> {
    pub client: &'a ELBv2Client,
    pub environment: Environment,
}

impl<'a> LoadBalancerGatherer<'a> {
    pub fn name(&self) -> String {
        self.environment.qualify("dify-alb")
    }
}

#[async_trait]
impl<'a> Gatherer for LoadBalancerGatherer<'a> {
    type Resource = LoadBalancer;

    async fn gather(&self) -> Result<Vec<Self::Resource>, GatherError> {
        let name = self.name();
        debug!("Retrieving LoadBalancer {}", name);
        match self.client.describe_load_balancers().names(name).send().await {
            Ok(success) => Ok(success.load_balancers.unwrap_or_default()),
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .map(|e| e.is_load_balancer_not_found_exception())
                    .unwrap_or(false);
                if not_found {
                    debug!("LoadBalancer not deployed");
                    return Ok(vec![]);
                }
                error!("Failed to fetch LoadBalancer: {}", err);
                Err(Box::new(aws_sdk_elasticloadbalancingv2::Error::from(err)))
            }
        }
    }
}
