use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::error::BastionError;

/// Tenant/plan collaborator: the feature keys of a company's active plan.
///
/// `Ok(None)` means the company has no plan on record, which is treated as
/// holding no features at all.
#[async_trait]
pub trait PlanFeatures: Send + Sync {
    async fn plan_features(&self, company_id: &str) -> Result<Option<Vec<String>>, BastionError>;
}

/// Fixed plan features per company, for tests and single-tenant deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticPlanFeatures {
    plans: HashMap<String, Vec<String>>,
}

impl StaticPlanFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_company(
        mut self,
        company_id: impl Into<String>,
        features: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.plans.insert(
            company_id.into(),
            features.into_iter().map(Into::into).collect(),
        );
        self
    }
}

#[async_trait]
impl PlanFeatures for StaticPlanFeatures {
    async fn plan_features(&self, company_id: &str) -> Result<Option<Vec<String>>, BastionError> {
        Ok(self.plans.get(company_id).cloned())
    }
}

#[derive(Debug, Deserialize)]
struct PlanFeaturesBody {
    #[serde(default)]
    features: Vec<String>,
}

/// Plan service reached over HTTP: `GET {base}/companies/{id}/plan-features`
/// returning `{"features": [...]}`. A 404 means no plan.
#[derive(Debug, Clone)]
pub struct HttpPlanFeatures {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpPlanFeatures {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BastionError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BastionError::Internal(format!("plan service URL '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(BastionError::Internal(format!(
                "plan service URL '{base_url}' cannot carry a path"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BastionError::Internal(format!("plan service client: {e}")))?;
        Ok(Self { client, base_url })
    }

    /// The company id is appended as one escaped path segment.
    fn url(&self, company_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["companies", company_id, "plan-features"]);
        }
        url
    }
}

#[async_trait]
impl PlanFeatures for HttpPlanFeatures {
    async fn plan_features(&self, company_id: &str) -> Result<Option<Vec<String>>, BastionError> {
        let res = self
            .client
            .get(self.url(company_id))
            .send()
            .await
            .map_err(|e| BastionError::Internal(format!("plan service unreachable: {e}")))?;

        if res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = res
            .error_for_status()
            .map_err(|e| BastionError::Internal(format!("plan service error: {e}")))?;
        let body: PlanFeaturesBody = res
            .json()
            .await
            .map_err(|e| BastionError::Internal(format!("plan service response: {e}")))?;
        Ok(Some(body.features))
    }
}

/// Required features the plan lacks. No plan means every one is missing.
pub fn missing_features(required: &[String], plan: Option<&[String]>) -> Vec<String> {
    match plan {
        None => required.to_vec(),
        Some(held) => required
            .iter()
            .filter(|f| !held.contains(f))
            .cloned()
            .collect(),
    }
}
