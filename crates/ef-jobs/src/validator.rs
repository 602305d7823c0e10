//! Post-encode output checks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ef_av::MediaProber;
use ef_core::{Error, Result};

use crate::collaborators::ResultValidator;
use crate::work_item::WorkItem;

/// Smallest duration drift always tolerated.
const MIN_DURATION_TOLERANCE: Duration = Duration::from_secs(1);

/// Checks that the output exists, is not empty and, when the source duration
/// is known, lasts as long as the source (within 1s or 1%).
pub struct OutputValidator {
    prober: Arc<dyn MediaProber>,
}

impl OutputValidator {
    pub fn new(prober: Arc<dyn MediaProber>) -> Self {
        Self { prober }
    }
}

#[async_trait]
impl ResultValidator for OutputValidator {
    async fn validate(&self, item: &WorkItem) -> Result<String> {
        let meta = tokio::fs::metadata(&item.destination).await.map_err(|e| {
            Error::Validation(format!("output {} is missing: {e}", item.destination.display()))
        })?;
        if meta.len() == 0 {
            return Err(Error::Validation(format!(
                "output {} is empty",
                item.destination.display()
            )));
        }

        let Some(expected) = item.media_info.as_ref().and_then(|m| m.duration) else {
            return Ok(format!("output written ({} bytes)", meta.len()));
        };

        // The output is new, so it is probed without a cache key.
        let actual = match self.prober.probe(&item.destination, "").await {
            Ok(info) => info.duration,
            Err(e) => {
                tracing::debug!(output = %item.destination.display(), error = %e, "cannot probe output");
                None
            }
        };
        let Some(actual) = actual else {
            return Ok(format!("output written ({} bytes), duration unknown", meta.len()));
        };

        let tolerance = MIN_DURATION_TOLERANCE.max(expected.mul_f64(0.01));
        let drift = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        if drift > tolerance {
            return Err(Error::Validation(format!(
                "output lasts {:.1}s but the source lasts {:.1}s",
                actual.as_secs_f64(),
                expected.as_secs_f64()
            )));
        }
        Ok(format!(
            "output written ({} bytes), duration {:.1}s matches",
            meta.len(),
            actual.as_secs_f64()
        ))
    }
}

impl std::fmt::Debug for OutputValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputValidator").finish_non_exhaustive()
    }
}
