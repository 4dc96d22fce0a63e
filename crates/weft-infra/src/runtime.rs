//! HTTP agent runtime and config-backed project registry.
//!
//! The runtime posts each resolved task to an external agent service and
//! reads back the text output. The project registry maps agent references
//! to runtime identities from the loaded configuration, consulting the
//! project-scoped table before the global one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use weft_core::runtime::{AgentOutcome, AgentRuntime, ProjectRegistry, RuntimeError};
use weft_core::workflow::session::SessionHandle;
use weft_types::config::WeftConfig;
use weft_types::thread::StepStatus;

// ---------------------------------------------------------------------------
// HTTP runtime
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct RunRequest<'a> {
    task: &'a str,
    thread_id: &'a str,
    step_id: &'a str,
    session_id: &'a str,
}

#[derive(Deserialize)]
struct RunResponse {
    output: String,
    #[serde(default)]
    status: Option<StepStatus>,
}

/// Agent runtime that delegates execution to an HTTP service.
///
/// Each run posts to `{base_url}/agents/{agent}/run` and expects a JSON
/// body with at least an `output` field. A missing `status` field counts
/// as completed; non-2xx responses and transport errors fail the step.
pub struct HttpAgentRuntime {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAgentRuntime {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl AgentRuntime for HttpAgentRuntime {
    async fn run(
        &self,
        agent: &str,
        task: &str,
        session: &SessionHandle,
    ) -> Result<AgentOutcome, RuntimeError> {
        let url = format!("{}/agents/{agent}/run", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RunRequest {
                task,
                thread_id: &session.thread_id,
                step_id: &session.step_id,
                session_id: &session.session_id,
            })
            .send()
            .await
            .map_err(|e| RuntimeError::Execution(format!("request to {url} failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RuntimeError::UnknownAgent(agent.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Execution(format!(
                "agent {agent} returned {status}: {body}"
            )));
        }

        let body: RunResponse = response
            .json()
            .await
            .map_err(|e| RuntimeError::Execution(format!("invalid response from {agent}: {e}")))?;
        Ok(AgentOutcome {
            output: body.output,
            status: body.status.unwrap_or(StepStatus::Completed),
        })
    }
}

// ---------------------------------------------------------------------------
// Config-backed project registry
// ---------------------------------------------------------------------------

/// Resolves agent references against the `[agents]` and `[projects.*]`
/// tables of the configuration.
///
/// With no tables configured at all, references pass through unchanged;
/// that keeps small deployments working without any registry setup. Once
/// any table exists, an unmatched reference is an unknown agent.
pub struct ConfigProjectRegistry {
    agents: HashMap<String, String>,
    projects: HashMap<String, HashMap<String, String>>,
}

impl ConfigProjectRegistry {
    pub fn new(config: &WeftConfig) -> Self {
        Self {
            agents: config.agents.clone(),
            projects: config
                .projects
                .iter()
                .map(|(id, project)| (id.clone(), project.agents.clone()))
                .collect(),
        }
    }

    fn pass_through(&self) -> bool {
        self.agents.is_empty() && self.projects.is_empty()
    }
}

impl ProjectRegistry for ConfigProjectRegistry {
    async fn resolve(
        &self,
        project_id: Option<&str>,
        agent_ref: &str,
    ) -> Result<String, RuntimeError> {
        if self.pass_through() {
            return Ok(agent_ref.to_string());
        }
        if let Some(project) = project_id
            && let Some(identity) = self.projects.get(project).and_then(|a| a.get(agent_ref))
        {
            return Ok(identity.clone());
        }
        self.agents
            .get(agent_ref)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownAgent(agent_ref.to_string()))
    }
}
