//! HTTP transport to the telescope control endpoints.
//!
//! Each configured telescope exposes a control API: `POST
//! {endpoint}/observations` accepts a task and answers with a
//! [`SubmissionAck`], `POST {endpoint}/observations/{task}/cancel`
//! stops one. Telescopes report execution outcomes back to the node's
//! own `/outcomes` route, not over this transport.

use async_trait::async_trait;
use nova_core::config::TelescopeConfig;
use nova_core::{ObservationTask, TaskId, TelescopeId};
use nova_dispatch::{NetworkError, SubmissionAck, TelescopeNetwork};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Cap on any single control request, so a black-holed endpoint
/// surfaces as `Unreachable` instead of a hang.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpTelescopeNetwork {
    client: reqwest::Client,
    endpoints: HashMap<TelescopeId, String>,
}

impl HttpTelescopeNetwork {
    pub fn new(telescopes: &[TelescopeConfig]) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        let endpoints = telescopes
            .iter()
            .filter_map(|scope| {
                scope
                    .endpoint
                    .clone()
                    .map(|endpoint| (TelescopeId::new(scope.id.as_str()), endpoint))
            })
            .collect();
        Ok(Self { client, endpoints })
    }

    fn endpoint(&self, telescope: &TelescopeId) -> Result<&str, NetworkError> {
        self.endpoints
            .get(telescope)
            .map(String::as_str)
            .ok_or_else(|| NetworkError::Rejected(format!("no control endpoint for {telescope}")))
    }
}

#[async_trait]
impl TelescopeNetwork for HttpTelescopeNetwork {
    async fn submit(
        &self,
        telescope: &TelescopeId,
        task: &ObservationTask,
    ) -> Result<SubmissionAck, NetworkError> {
        let url = format!("{}/observations", self.endpoint(telescope)?);
        let response = self
            .client
            .post(&url)
            .json(task)
            .send()
            .await
            .map_err(|err| NetworkError::Unreachable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(NetworkError::Rejected(format!(
                "{telescope} answered {}",
                response.status()
            )));
        }
        let ack = response
            .json::<SubmissionAck>()
            .await
            .map_err(|err| NetworkError::Unreachable(err.to_string()))?;
        debug!(task = %task.id, telescope = %telescope, "submission accepted");
        Ok(ack)
    }

    async fn cancel(&self, telescope: &TelescopeId, task: TaskId) -> Result<(), NetworkError> {
        let url = format!("{}/observations/{task}/cancel", self.endpoint(telescope)?);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|err| NetworkError::Unreachable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(NetworkError::Rejected(format!(
                "{telescope} answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}
