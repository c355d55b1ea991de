use async_trait::async_trait;
use aws_sdk_ec2::{
    types::{AvailabilityZone, Filter, Instance},
    Client,
};
use log::{debug, error, info};

use crate::gatherer::{GatherError, Gatherer};
use crate::types::Environment;

/// Zones currently accepting launches in the client's region.
pub struct AvailabilityZoneGatherer<'a> {
    pub client: &'a Client,
}

#[async_trait]
impl<'a> Gatherer for AvailabilityZoneGatherer<'a> {
    type Resource = AvailabilityZone;

    async fn gather(&self) -> Result<Vec<Self::Resource>, GatherError> {
        info!("Fetching availability zones");
        match self
            .client
            .describe_availability_zones()
            .filters(Filter::builder().name("state").values("available").build())
            .send()
            .await
        {
            Ok(success) => Ok(success.availability_zones.unwrap_or_default()),
            Err(err) => {
                error!("Failed to fetch availability zones: {}", err);
                Err(Box::new(aws_sdk_ec2::Error::from(err)))
            }
        }
    }
}

/// Running web server instances of one environment, found by their `Name`
/// tag.
pub struct InstanceGatherer<'a> {
    pub client: &'a Client,
    pub environment: Environment,
}

impl<'a> InstanceGatherer<'a> {
    pub fn name_tag(&self) -> String {
        self.environment.qualify("DifyWebServerInstance")
    }
}

#[async_trait]
impl<'a> Gatherer for InstanceGatherer<'a> {
    type Resource = Instance;

    async fn gather(&self) -> Result<Vec<Self::Resource>, GatherError> {
        let name = self.name_tag();
        debug!("Retrieving instances tagged Name={}", name);
        match self
            .client
            .describe_instances()
            .filters(Filter::builder().name("tag:Name").values(name).build())
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("pending")
                    .values("running")
                    .build(),
            )
            .send()
            .await
        {
            Ok(output) => Ok(output
                .reservations
                .unwrap_or_default()
                .into_iter()
                .flat_map(|r| r.instances.unwrap_or_default())
                .collect()),
            Err(err) => {
                error!("Failed to fetch instances: {}", err);
                Err(Box::new(aws_sdk_ec2::Error::from(err)))
            }
        }
    }
}
