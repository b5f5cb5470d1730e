//! Outbound HTTP calls from the Manager to a Runner: ping, run, and result
//! retrieval, all bearer-authenticated.

use anyhow::{anyhow, Context, Result};
use shared::api::{endpoints, PingResponse, RunRequest};
use std::time::Duration;

/// A thin wrapper around a shared `reqwest::Client`, one per Manager process,
/// used for every outbound call to every runner.
#[derive(Clone)]
pub struct RunnerClient {
    http: reqwest::Client,
}

impl RunnerClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build outbound HTTP client")?;
        Ok(Self { http })
    }

    /// `GET {runner_url}/runner/ping`, bounded by `ping_timeout`.
    pub async fn ping(
        &self,
        runner_url: &str,
        token: &str,
        ping_timeout: Duration,
    ) -> Result<PingResponse> {
        let response = self
            .http
            .get(format!("{}{}", runner_url, endpoints::RUNNER_PING))
            .bearer_auth(token)
            .timeout(ping_timeout)
            .send()
            .await
            .map_err(|e| anyhow!("ping request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("runner ping returned {}", response.status()));
        }

        response
            .json::<PingResponse>()
            .await
            .map_err(|e| anyhow!("ping response did not parse: {}", e))
    }

    /// `POST {runner_url}/task/run`, bounded by `dispatch_timeout`.
    pub async fn run(
        &self,
        runner_url: &str,
        token: &str,
        request: &RunRequest,
        dispatch_timeout: Duration,
    ) -> Result<()> {
        let response = self
            .http
            .post(format!("{}{}", runner_url, endpoints::RUNNER_TASK_RUN))
            .bearer_auth(token)
            .json(request)
            .timeout(dispatch_timeout)
            .send()
            .await
            .map_err(|e| anyhow!("dispatch request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("runner rejected dispatch: {} {}", status, body));
        }

        Ok(())
    }

    /// `GET {runner_url}/task/result/{task_id}` — proxy-mode manifest fetch.
    pub async fn get_manifest(
        &self,
        runner_url: &str,
        token: &str,
        task_id: &str,
    ) -> Result<reqwest::Response> {
        let path = endpoints::TASK_RESULT.replace("{id}", task_id);
        self.http
            .get(format!("{}{}", runner_url, path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| anyhow!("manifest proxy request failed: {}", e))
    }

    /// `GET {runner_url}/task/result/{task_id}/file/{file_path}` — proxy-mode
    /// file stream fetch. Returns the raw response so the caller can stream
    /// the body 1:1 without buffering.
    pub async fn get_file(
        &self,
        runner_url: &str,
        token: &str,
        task_id: &str,
        file_path: &str,
    ) -> Result<reqwest::Response> {
        let path = endpoints::TASK_RESULT_FILE
            .replace("{id}", task_id)
            .replace("{path}", file_path);
        self.http
            .get(format!("{}{}", runner_url, path))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| anyhow!("file proxy request failed: {}", e))
    }
}
