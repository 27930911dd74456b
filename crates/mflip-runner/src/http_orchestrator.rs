//! HTTP client for the worker gateway.
//!
//! - `POST /workers` launches a worker from a [`LaunchRequest`]
//! - `GET /workers?label=k=v` lists workers by label
//! - `GET /workers/{uid}/logs` returns a worker's log as text
//! - `DELETE /workers/{uid}` removes a worker and its pods

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use tracing::debug;

use mflip_models::WorkerDescriptor;

use crate::config::RunnerConfig;
use crate::orchestrator::{
    Label, LaunchRequest, Orchestrator, OrchestratorError, OrchestratorResult, WorkerHandle,
};

/// Client for the worker gateway.
pub struct HttpOrchestrator {
    http: Client,
    base_url: String,
}

impl HttpOrchestrator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> OrchestratorResult<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &RunnerConfig) -> OrchestratorResult<Self> {
        Self::new(config.orchestrator_url.clone(), config.orchestrator_timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn error_body(response: Response) -> (u16, String) {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        (status, body)
    }
}

#[async_trait]
impl Orchestrator for HttpOrchestrator {
    async fn launch_worker(&self, request: LaunchRequest) -> OrchestratorResult<WorkerHandle> {
        debug!(step_id = %request.step_id, name = %request.name, "Launching worker");
        let response = self
            .http
            .post(self.url("/workers"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = Self::error_body(response).await;
            return Err(OrchestratorError::LaunchFailed(format!(
                "gateway returned {}: {}",
                status, body
            )));
        }
        Ok(response.json().await?)
    }

    async fn find_workers_by_label(&self, label: &Label) -> OrchestratorResult<Vec<WorkerDescriptor>> {
        let response = self
            .http
            .get(self.url("/workers"))
            .query(&[("label", label.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, body) = Self::error_body(response).await;
            return Err(OrchestratorError::ListFailed(format!(
                "gateway returned {} for {}: {}",
                status, label, body
            )));
        }
        Ok(response.json().await?)
    }

    async fn fetch_logs(&self, worker: &WorkerHandle) -> OrchestratorResult<String> {
        let response = self
            .http
            .get(self.url(&format!("/workers/{}/logs", worker.uid)))
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = Self::error_body(response).await;
            return Err(OrchestratorError::Api { status, message });
        }
        Ok(response.text().await?)
    }

    async fn delete_worker(&self, worker: &WorkerHandle) -> OrchestratorResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/workers/{}", worker.uid)))
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = Self::error_body(response).await;
            return Err(OrchestratorError::Api { status, message });
        }
        debug!(uid = %worker.uid, name = %worker.name, "Deleted worker");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mflip_models::WorkerStatus;
    use serde_json::json;
    use std::collections::BTreeMap;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpOrchestrator {
        HttpOrchestrator::new(format!("{}/", server.uri()), Duration::from_secs(5)).unwrap()
    }

    fn request(step_id: Uuid) -> LaunchRequest {
        LaunchRequest {
            step_id,
            name: "mediaflipper-analysis-clip.mxf".to_string(),
            worker_kind: "analysis".to_string(),
            template: "analysis.yaml".to_string(),
            env: BTreeMap::from([("WRAPPER_MODE".to_string(), "analyse".to_string())]),
            labels: BTreeMap::from([(
                "mediaflipper.jobStepId".to_string(),
                step_id.to_string(),
            )]),
            overwrite_env: true,
        }
    }

    #[tokio::test]
    async fn test_launch_worker() {
        let server = MockServer::start().await;
        let step_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/workers"))
            .and(body_partial_json(json!({"stepId": step_id, "workerKind": "analysis"})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"uid": "job-uid-1", "name": "mediaflipper-analysis-abc"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let handle = client(&server).launch_worker(request(step_id)).await.unwrap();
        assert_eq!(handle.uid, "job-uid-1");
        assert_eq!(handle.name, "mediaflipper-analysis-abc");
    }

    #[tokio::test]
    async fn test_launch_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/workers"))
            .respond_with(ResponseTemplate::new(422).set_body_string("unknown template"))
            .mount(&server)
            .await;

        let err = client(&server)
            .launch_worker(request(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::LaunchFailed(ref m) if m.contains("unknown template")));
        assert!(!err.is_lookup_failure());
    }

    #[tokio::test]
    async fn test_find_workers_by_label() {
        let server = MockServer::start().await;
        let step_id = Uuid::new_v4();
        let label = Label::for_step(step_id);
        Mock::given(method("GET"))
            .and(path("/workers"))
            .and(query_param("label", label.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "jobUid": "job-uid-1",
                "status": "completed",
                "startTime": "2024-03-01T10:00:00Z",
                "completionTime": "2024-03-01T10:05:00Z",
                "consoleName": "mediaflipper-transcode-abc"
            }])))
            .mount(&server)
            .await;

        let workers = client(&server).find_workers_by_label(&label).await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].status, WorkerStatus::Completed);
        assert_eq!(workers[0].name, "mediaflipper-transcode-abc");
        assert!(workers[0].completion_time.is_some());
    }

    #[tokio::test]
    async fn test_list_failure_is_lookup_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/workers"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server)
            .find_workers_by_label(&Label::for_step(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(err.is_lookup_failure());
    }

    #[tokio::test]
    async fn test_logs_and_delete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/workers/job-uid-1/logs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("frame=1200 speed=2.1x"))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/workers/job-uid-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let orchestrator = client(&server);
        let handle = WorkerHandle {
            uid: "job-uid-1".to_string(),
            name: "worker".to_string(),
        };
        assert_eq!(
            orchestrator.fetch_logs(&handle).await.unwrap(),
            "frame=1200 speed=2.1x"
        );
        orchestrator.delete_worker(&handle).await.unwrap();
    }
}
