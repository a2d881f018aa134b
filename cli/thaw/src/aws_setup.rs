//! AWS configuration loading and client construction.

use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudwatchlogs::Client as CwlClient;
use aws_sdk_lambda::Client as LambdaClient;

pub struct AwsClients {
    pub lambda: LambdaClient,
    pub logs: CwlClient,
    pub region: String,
}

/// Loads the shared AWS config. An explicit region wins over the environment and
/// profile; `us-east-1` is the last resort.
pub async fn setup_aws_clients(
    aws_region: Option<&str>,
    aws_profile: Option<&str>,
) -> AwsClients {
    let region_provider =
        RegionProviderChain::first_try(aws_region.map(|r| Region::new(r.to_string())))
            .or_default_provider()
            .or_else(Region::new("us-east-1"));

    let mut config_loader = aws_config::defaults(BehaviorVersion::latest()).region(region_provider);
    if let Some(profile) = aws_profile {
        config_loader = config_loader.profile_name(profile);
    }

    let aws_config = config_loader.load().await;
    let region = aws_config
        .region()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    tracing::debug!(%region, profile = ?aws_profile, "Loaded AWS config");

    AwsClients {
        lambda: LambdaClient::new(&aws_config),
        logs: CwlClient::new(&aws_config),
        region,
    }
}
