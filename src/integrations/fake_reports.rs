use crate::config::HTTP_CLIENT;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use log::{info, warn};
use machineid_rs::{Encryption, HWIDComponent, IdBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Payload submitted when the user reports a fake mod.
#[derive(Debug, Clone, Serialize)]
pub struct FakeModReport {
    pub remote_mod_id: i64,
    pub machine_id: String,
    pub reason: String,
    pub fake_score: u8,
    pub creator_id: Option<i64>,
    pub creator_name: Option<String>,
}

/// Community warning state for one mod, presentation-only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WarningStatus {
    pub has_warning: bool,
    pub report_count: u32,
    pub is_auto_warned: bool,
    pub reason: Option<String>,
    pub creator_banned: bool,
}

#[async_trait]
pub trait FakeReportPublisher: Send + Sync {
    /// Submits a report. A 409 from the service means this machine already
    /// reported the mod and counts as success.
    async fn submit_report(&self, report: &FakeModReport) -> Result<()>;

    async fn batch_warning_status(
        &self,
        remote_mod_ids: &[i64],
    ) -> Result<HashMap<i64, WarningStatus>>;
}

/// Stable, anonymized machine identifier for report deduplication.
pub fn machine_id() -> String {
    IdBuilder::new(Encryption::SHA256)
        .add_component(HWIDComponent::SystemID)
        .build("simsforge")
        .unwrap_or_else(|e| {
            warn!("Falling back to a random machine id: {:?}", e);
            uuid::Uuid::new_v4().to_string()
        })
}

pub struct ReportClient {
    base_url: String,
}

impl ReportClient {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl FakeReportPublisher for ReportClient {
    async fn submit_report(&self, report: &FakeModReport) -> Result<()> {
        let url = format!("{}/reports", self.base_url);
        let response = HTTP_CLIENT
            .post(&url)
            .json(report)
            .send()
            .await
            .map_err(|e| AppError::ReportFailed(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 409 {
            info!(
                "Fake-mod report for {} accepted (status {})",
                report.remote_mod_id, status
            );
            Ok(())
        } else {
            Err(AppError::ReportFailed(format!(
                "report service returned status {}",
                status
            )))
        }
    }

    async fn batch_warning_status(
        &self,
        remote_mod_ids: &[i64],
    ) -> Result<HashMap<i64, WarningStatus>> {
        let url = format!("{}/warnings/batch", self.base_url);
        let response = HTTP_CLIENT
            .post(&url)
            .json(&serde_json::json!({ "mod_ids": remote_mod_ids }))
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(
                "Warning status batch returned {}; treating as no warnings",
                response.status()
            );
            return Ok(HashMap::new());
        }
        Ok(response
            .json::<HashMap<i64, WarningStatus>>()
            .await
            .unwrap_or_default())
    }
}
