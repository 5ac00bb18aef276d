use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::processor::PaymentProcessor;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl ToString) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.to_string(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, DependencyStatus::Healthy { .. })
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Failure of a critical dependency makes the service unhealthy rather
    /// than degraded.
    fn critical(&self) -> bool;

    async fn check(&self) -> DependencyStatus;
}

pub struct PostgresChecker {
    pool: sqlx::PgPool,
}

impl PostgresChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyChecker for PostgresChecker {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn critical(&self) -> bool {
        true
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

pub struct ProcessorChecker {
    processor: Arc<dyn PaymentProcessor>,
}

impl ProcessorChecker {
    pub fn new(processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl DependencyChecker for ProcessorChecker {
    fn name(&self) -> &'static str {
        "processor"
    }

    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.processor.ping().await {
            Ok(()) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

/// Runs every checker concurrently with a per-check timeout.
pub struct HealthService {
    checkers: Vec<Box<dyn DependencyChecker>>,
    started_at: Instant,
}

impl HealthService {
    pub fn new(checkers: Vec<Box<dyn DependencyChecker>>) -> Self {
        Self {
            checkers,
            started_at: Instant::now(),
        }
    }

    pub async fn check(&self) -> HealthResponse {
        let timeout_duration = Duration::from_secs(5);

        let results = futures::future::join_all(self.checkers.iter().map(|checker| async move {
            let status = timeout(timeout_duration, checker.check())
                .await
                .unwrap_or_else(|_| DependencyStatus::unhealthy("timeout"));
            (checker.name(), checker.critical(), status)
        }))
        .await;

        let mut has_critical_failure = false;
        let mut has_non_critical_failure = false;
        let mut dependencies = HashMap::new();
        for (name, critical, status) in results {
            if !status.is_healthy() {
                if critical {
                    has_critical_failure = true;
                } else {
                    has_non_critical_failure = true;
                }
            }
            dependencies.insert(name.to_string(), status);
        }

        let status = if has_critical_failure {
            "unhealthy"
        } else if has_non_critical_failure {
            "degraded"
        } else {
            "healthy"
        };

        HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            dependencies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed {
        name: &'static str,
        critical: bool,
        healthy: bool,
    }

    #[async_trait]
    impl DependencyChecker for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        fn critical(&self) -> bool {
            self.critical
        }

        async fn check(&self) -> DependencyStatus {
            if self.healthy {
                DependencyStatus::healthy(Instant::now())
            } else {
                DependencyStatus::unhealthy("down")
            }
        }
    }

    fn service(db: bool, processor: bool) -> HealthService {
        HealthService::new(vec![
            Box::new(Fixed {
                name: "postgres",
                critical: true,
                healthy: db,
            }),
            Box::new(Fixed {
                name: "processor",
                critical: false,
                healthy: processor,
            }),
        ])
    }

    #[tokio::test]
    async fn test_overall_status() {
        assert_eq!(service(true, true).check().await.status, "healthy");
        assert_eq!(service(true, false).check().await.status, "degraded");
        assert_eq!(service(false, true).check().await.status, "unhealthy");
    }

    #[tokio::test]
    async fn test_no_checkers_is_healthy() {
        let response = HealthService::new(Vec::new()).check().await;
        assert_eq!(response.status, "healthy");
        assert!(response.dependencies.is_empty());
    }
}
