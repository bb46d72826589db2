//! Caller identity and read-only permission probes

use aws_sdk_ec2::error::DisplayErrorContext;
use keel_core::provider::{Preflight, Probe, ProviderError, ProviderResult};

use crate::AwsProvider;

fn probe<T, E: std::error::Error>(service: &str, result: Result<T, E>) -> Probe {
    match result {
        Ok(_) => Probe::passed(service),
        Err(e) => {
            log::debug!("{} probe failed: {}", service, DisplayErrorContext(&e));
            Probe::failed(service, DisplayErrorContext(e).to_string())
        }
    }
}

impl AwsProvider {
    /// Fails only when the caller identity cannot be resolved; individual
    /// probe failures are reported in the result
    pub(crate) async fn run_preflight(&self) -> ProviderResult<Preflight> {
        let identity = self
            .sts_client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| {
                ProviderError::new(format!(
                    "Failed to resolve AWS credentials: {}",
                    DisplayErrorContext(e)
                ))
            })?;

        let probes = vec![
            probe(
                "ec2",
                self.ec2_client.describe_vpcs().max_results(5).send().await,
            ),
            probe("iam", self.iam_client.list_roles().max_items(1).send().await),
            probe(
                "eks",
                self.eks_client.list_clusters().max_results(1).send().await,
            ),
            probe(
                "rds",
                self.rds_client
                    .describe_db_instances()
                    .max_records(20)
                    .send()
                    .await,
            ),
            probe(
                "elasticache",
                self.elasticache_client
                    .describe_cache_clusters()
                    .max_records(20)
                    .send()
                    .await,
            ),
        ];

        Ok(Preflight {
            account: identity.account().unwrap_or_default().to_string(),
            arn: identity.arn().unwrap_or_default().to_string(),
            probes,
        })
    }
}
