use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use super::{ActionDispatch, DispatchOutcome, ExecutionPort};
use crate::action::{ExecutionContext, ExecutionResult};
use crate::error::Result;

/// Posts every action as JSON to a single executor endpoint.
///
/// `2xx` with an [`ExecutionResult`] body completes inline, `202 Accepted`
/// defers the result, a connection failure means no destination.
pub struct HttpExecutionPort {
    client: Client,
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StopNotice<'a> {
    job_id: &'a str,
    context: &'a ExecutionContext,
}

impl HttpExecutionPort {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn stop_url(&self) -> String {
        format!("{}/stop", self.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ExecutionPort for HttpExecutionPort {
    async fn dispatch(&self, request: ActionDispatch) -> DispatchOutcome {
        let job_id = request.job_id.clone();
        let index = request.action_index;

        let response = match self.client.post(&self.url).json(&request).send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_request() => {
                warn!(%job_id, index, error = %e, "executor unreachable");
                return DispatchOutcome::Unreachable;
            }
            Err(e) => return DispatchOutcome::Completed(ExecutionResult::failed(e.to_string())),
        };

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            debug!(%job_id, index, "dispatch deferred");
            return DispatchOutcome::Deferred;
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return DispatchOutcome::Completed(ExecutionResult::failed(format!(
                "executor returned status {}: {message}",
                status.as_u16()
            )));
        }

        match response.json::<ExecutionResult>().await {
            Ok(result) => DispatchOutcome::Completed(result),
            Err(e) => DispatchOutcome::Completed(ExecutionResult::failed(format!(
                "invalid executor response: {e}"
            ))),
        }
    }

    async fn notify_stopped(&self, job_id: &str, context: &ExecutionContext) -> Result<()> {
        self.client
            .post(self.stop_url())
            .json(&StopNotice { job_id, context })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
