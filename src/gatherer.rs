use async_trait::async_trait;
use std::error::Error;
pub mod aws;

pub type GatherError = Box<dyn Error + Send + Sync>;

#[async_trait]
pub trait Gatherer {
    type Resource;
    async fn gather(&self) -> Result<Vec<Self::Resource>, GatherError>;
}
