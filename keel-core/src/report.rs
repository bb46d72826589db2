//! Report - Plain-text summary of a provisioned project
//!
//! Built from configuration and recorded state only; the optional verify
//! result is the one part that reflects the live account. Secrets are never
//! rendered.

use std::fmt;

use chrono::{DateTime, Utc};
use keel_state::StateFile;

use crate::config::ProjectConfig;
use crate::resource::kind;
use crate::verify::VerifyReport;

/// Default report file name
pub const DEFAULT_REPORT_FILE: &str = "keel-report.txt";

const HOURS_PER_MONTH: f64 = 730.0;
const EKS_CONTROL_PLANE_HOURLY: f64 = 0.10;
const NODE_EBS_GB_MONTH: f64 = 0.08;
const RDS_STORAGE_GB_MONTH: f64 = 0.115;

/// On-demand hourly list price (USD) of the instance classes we know
fn hourly_price(instance_type: &str) -> Option<f64> {
    let price = match instance_type {
        "t3.small" => 0.0208,
        "t3.medium" => 0.0416,
        "t3.large" => 0.0832,
        "m5.large" => 0.096,
        "m5.xlarge" => 0.192,
        "db.t3.micro" => 0.017,
        "db.t3.small" => 0.034,
        "db.t3.medium" => 0.068,
        "cache.t3.micro" => 0.017,
        "cache.t3.small" => 0.034,
        "cache.t3.medium" => 0.068,
        _ => return None,
    };
    Some(price)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CostLine {
    pub item: String,
    pub monthly_usd: f64,
}

/// Static monthly estimate from the configured sizes
#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    pub lines: Vec<CostLine>,
    /// Items whose instance class has no known price
    pub unpriced: Vec<String>,
}

impl CostEstimate {
    pub fn for_config(config: &ProjectConfig) -> Self {
        let mut lines = vec![CostLine {
            item: "EKS control plane".to_string(),
            monthly_usd: EKS_CONTROL_PLANE_HOURLY * HOURS_PER_MONTH,
        }];
        let mut unpriced = Vec::new();

        let c = &config.cluster;
        let nodes = f64::from(c.node_desired);
        match hourly_price(&c.node_instance_type) {
            Some(price) => lines.push(CostLine {
                item: format!("{} x {} nodes", c.node_desired, c.node_instance_type),
                monthly_usd: price * HOURS_PER_MONTH * nodes,
            }),
            None => unpriced.push(format!("nodes ({})", c.node_instance_type)),
        }
        lines.push(CostLine {
            item: format!("{} x {} GiB node volumes", c.node_desired, c.node_disk_size),
            monthly_usd: NODE_EBS_GB_MONTH * f64::from(c.node_disk_size) * nodes,
        });

        for db in &config.databases {
            let class = db.instance_class();
            match hourly_price(class) {
                Some(price) => lines.push(CostLine {
                    item: format!("{} ({})", db.name, class),
                    monthly_usd: price * HOURS_PER_MONTH,
                }),
                None => unpriced.push(format!("{} ({})", db.name, class)),
            }
            if !db.engine.is_cache() {
                lines.push(CostLine {
                    item: format!("{} storage ({} GiB)", db.name, db.allocated_storage),
                    monthly_usd: RDS_STORAGE_GB_MONTH * f64::from(db.allocated_storage),
                });
            }
        }

        Self { lines, unpriced }
    }

    pub fn total(&self) -> f64 {
        self.lines.iter().map(|l| l.monthly_usd).sum()
    }
}

/// Everything a report is rendered from
pub struct Report<'a> {
    pub config: &'a ProjectConfig,
    pub state: &'a StateFile,
    pub verify: Option<&'a VerifyReport>,
    pub generated_at: DateTime<Utc>,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.config;
        let names = config.names();

        writeln!(f, "keel report: {}", config.project)?;
        writeln!(f, "Generated: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "Region:    {}", config.region)?;
        writeln!(f, "State:     serial {}", self.state.serial)?;

        writeln!(f)?;
        writeln!(f, "Resources")?;
        if self.state.resources.is_empty() {
            writeln!(f, "  (none recorded)")?;
        }
        for resource in &self.state.resources {
            writeln!(
                f,
                "  {:<20} {:<28} {}",
                resource.resource_type,
                resource.name,
                resource.identifier.as_deref().unwrap_or("-")
            )?;
        }

        let endpoints: Vec<_> = self
            .state
            .resources
            .iter()
            .filter_map(|r| {
                let endpoint = r.attributes.get("endpoint")?.as_str()?;
                let port = r.attributes.get("port").and_then(|p| p.as_i64());
                Some((r, endpoint, port))
            })
            .collect();
        if !endpoints.is_empty() {
            writeln!(f)?;
            writeln!(f, "Endpoints")?;
            for (resource, endpoint, port) in endpoints {
                match port {
                    Some(port) => writeln!(f, "  {:<28} {}:{}", resource.name, endpoint, port)?,
                    None => writeln!(f, "  {:<28} {}", resource.name, endpoint)?,
                }
            }
        }

        let keys: Vec<_> = self
            .state
            .resources
            .iter()
            .filter(|r| r.resource_type == kind::ACCESS_KEY)
            .collect();
        if !keys.is_empty() {
            writeln!(f)?;
            writeln!(f, "Access keys")?;
            for key in keys {
                writeln!(
                    f,
                    "  {:<28} {}",
                    key.name,
                    key.identifier.as_deref().unwrap_or("-")
                )?;
            }
            writeln!(
                f,
                "  Secrets are stored in state; print them with `keel output --show-secrets`."
            )?;
        }

        if self
            .state
            .identifier(kind::EKS_CLUSTER, &names.cluster())
            .is_some()
        {
            writeln!(f)?;
            writeln!(f, "Kubeconfig")?;
            writeln!(
                f,
                "  aws eks update-kubeconfig --name {} --region {}",
                names.cluster(),
                config.region
            )?;
        }

        if let Some(verify) = self.verify {
            let passed = verify.checks.iter().filter(|c| c.passed).count();
            writeln!(f)?;
            writeln!(
                f,
                "Verification ({}): {}/{} passed",
                verify.scope,
                passed,
                verify.checks.len()
            )?;
            for check in verify.failures() {
                writeln!(
                    f,
                    "  FAIL {} ({})",
                    check.id,
                    check.detail.as_deref().unwrap_or("failed")
                )?;
            }
        }

        let estimate = CostEstimate::for_config(config);
        writeln!(f)?;
        writeln!(f, "Estimated monthly cost (USD, on-demand list prices)")?;
        for line in &estimate.lines {
            writeln!(f, "  {:<40} {:>10.2}", line.item, line.monthly_usd)?;
        }
        writeln!(f, "  {:<40} {:>10.2}", "Total", estimate.total())?;
        if !estimate.unpriced.is_empty() {
            writeln!(f, "  Not priced: {}", estimate.unpriced.join(", "))?;
        }
        Ok(())
    }
}

pub fn render(
    config: &ProjectConfig,
    state: &StateFile,
    verify: Option<&VerifyReport>,
    generated_at: DateTime<Utc>,
) -> String {
    Report {
        config,
        state,
        verify,
        generated_at,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceId;
    use crate::verify::{Check, VerifyScope};
    use chrono::TimeZone;
    use keel_state::ResourceState;

    fn config() -> ProjectConfig {
        ProjectConfig {
            project: "acme".to_string(),
            ..Default::default()
        }
    }

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn default_estimate() {
        let estimate = CostEstimate::for_config(&config());
        // control plane 73.00, nodes 2 x 30.368, volumes 3.20,
        // postgres 12.41 + 2.30 storage, redis 12.41
        assert!((estimate.total() - 164.056).abs() < 0.01, "{}", estimate.total());
        assert!(estimate.unpriced.is_empty());
    }

    #[test]
    fn unknown_instance_types_are_listed_not_priced() {
        let mut config = config();
        config.cluster.node_instance_type = "x9.huge".to_string();
        let estimate = CostEstimate::for_config(&config);
        assert_eq!(estimate.unpriced, vec!["nodes (x9.huge)".to_string()]);
    }

    #[test]
    fn report_lists_resources_without_secrets() {
        let mut state = StateFile::for_project("acme");
        state.upsert_resource(
            ResourceState::new(kind::EKS_CLUSTER, "acme-cluster")
                .with_identifier("arn:aws:eks:ap-northeast-1:1:cluster/acme-cluster")
                .with_attribute("endpoint", serde_json::json!("https://abc.eks.amazonaws.com")),
        );
        state.upsert_resource(
            ResourceState::new(kind::ACCESS_KEY, "acme-admin-key")
                .with_identifier("AKIAEXAMPLE")
                .with_secret("secret_access_key", "do-not-print"),
        );
        state.upsert_resource(
            ResourceState::new(kind::RDS_INSTANCE, "acme-postgres")
                .with_attribute("endpoint", serde_json::json!("acme-postgres.rds.example"))
                .with_attribute("port", serde_json::json!(5432))
                .with_secret("master_password", "also-secret"),
        );

        let text = render(&config(), &state, None, generated_at());

        assert!(text.starts_with("keel report: acme\nGenerated: 2026-01-02 03:04:05 UTC"));
        assert!(
            text.contains("aws eks update-kubeconfig --name acme-cluster --region ap-northeast-1")
        );
        assert!(text.contains("acme-postgres.rds.example:5432"));
        assert!(text.contains("AKIAEXAMPLE"));
        assert!(!text.contains("do-not-print"));
        assert!(!text.contains("also-secret"));
        assert!(text.contains("Total"));
    }

    #[test]
    fn report_includes_verification_failures() {
        let verify = VerifyReport {
            scope: VerifyScope::Databases,
            checks: vec![Check {
                id: ResourceId::new(kind::RDS_INSTANCE, "acme-postgres"),
                exists: true,
                status: Some("creating".to_string()),
                expected: Some("available".to_string()),
                passed: false,
                detail: Some("status creating".to_string()),
            }],
        };

        let text = render(&config(), &StateFile::new(), Some(&verify), generated_at());
        assert!(text.contains("Verification (databases): 0/1 passed"));
        assert!(text.contains("FAIL rds_instance.acme-postgres (status creating)"));
        assert!(text.contains("(none recorded)"));
        assert!(!text.contains("update-kubeconfig"));
    }
}
