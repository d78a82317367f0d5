use std::time::Duration;

use async_trait::async_trait;
use botway_common::{Error, RequesterError, Result};
use reqwest::{Client, StatusCode};
use serde_json::json;
use tokio::sync::mpsc;

use super::{Runner, RunnerInput};
use crate::message::{Message, ResponseMessage};

/// Which external service the runner speaks to. All four are single-POST
/// chat endpoints; only the request/response shapes differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookFlavor {
    Dify,
    DashscopeApp,
    N8n,
    Langflow,
}

impl WebhookFlavor {
    pub fn runner_name(&self) -> &'static str {
        match self {
            WebhookFlavor::Dify => "dify-service-api",
            WebhookFlavor::DashscopeApp => "dashscope-app-api",
            WebhookFlavor::N8n => "n8n-service-api",
            WebhookFlavor::Langflow => "langflow-api",
        }
    }
}

/// Connection settings for one external runner service.
#[derive(Debug, Clone, Default)]
pub struct ServiceEndpoint {
    pub base_url: String,
    pub api_key: String,
    pub app_id: String,
    pub timeout_secs: u64,
}

/// Thin runner over an external chat workflow. The remote service keeps
/// its own session state, correlated by the conversation uuid.
pub struct WebhookRunner {
    flavor: WebhookFlavor,
    endpoint: ServiceEndpoint,
    client: Client,
}

impl WebhookRunner {
    pub fn new(flavor: WebhookFlavor, endpoint: ServiceEndpoint) -> Self {
        let timeout = if endpoint.timeout_secs == 0 {
            120
        } else {
            endpoint.timeout_secs
        };
        Self {
            flavor,
            endpoint,
            client: Client::builder()
                .timeout(Duration::from_secs(timeout))
                .build()
                .unwrap_or_default(),
        }
    }

    fn url(&self) -> String {
        let base = self.endpoint.base_url.trim_end_matches('/');
        match self.flavor {
            WebhookFlavor::Dify => format!("{base}/chat-messages"),
            WebhookFlavor::DashscopeApp => format!(
                "{base}/api/v1/apps/{}/completion",
                self.endpoint.app_id
            ),
            WebhookFlavor::N8n => base.to_string(),
            WebhookFlavor::Langflow => {
                format!("{base}/api/v1/run/{}", self.endpoint.app_id)
            }
        }
    }

    fn body(&self, input: &RunnerInput) -> serde_json::Value {
        let text = input.user_message.plain_text();
        let session = &input.conversation_uuid;
        match self.flavor {
            WebhookFlavor::Dify => json!({
                "inputs": {},
                "query": text,
                "response_mode": "blocking",
                "user": session,
            }),
            WebhookFlavor::DashscopeApp => json!({
                "input": { "prompt": text, "session_id": session },
                "parameters": {},
            }),
            WebhookFlavor::N8n => json!({
                "message": text,
                "sessionId": session,
            }),
            WebhookFlavor::Langflow => json!({
                "input_value": text,
                "input_type": "chat",
                "output_type": "chat",
                "session_id": session,
            }),
        }
    }

    fn extract_answer(&self, body: &serde_json::Value) -> Result<String> {
        let answer = match self.flavor {
            WebhookFlavor::Dify => body["answer"].as_str().map(str::to_string),
            WebhookFlavor::DashscopeApp => body["output"]["text"].as_str().map(str::to_string),
            WebhookFlavor::N8n => body["output"]
                .as_str()
                .or_else(|| body["text"].as_str())
                .map(str::to_string),
            WebhookFlavor::Langflow => body["outputs"][0]["outputs"][0]["results"]["message"]
                ["text"]
                .as_str()
                .or_else(|| body["result"].as_str())
                .map(str::to_string),
        };
        answer.ok_or_else(|| {
            Error::Requester(RequesterError::Api(format!(
                "{} response had no answer field",
                self.flavor.runner_name()
            )))
        })
    }
}

fn status_to_error(status: StatusCode, body: String) -> Error {
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RequesterError::Auth(body),
        StatusCode::NOT_FOUND => RequesterError::NotFound(body),
        StatusCode::TOO_MANY_REQUESTS => RequesterError::RateLimit(body),
        StatusCode::BAD_REQUEST => RequesterError::BadRequest(body),
        _ => RequesterError::Api(format!("{status}: {body}")),
    };
    Error::Requester(err)
}

#[async_trait]
impl Runner for WebhookRunner {
    fn name(&self) -> &str {
        self.flavor.runner_name()
    }

    async fn run(&self, input: RunnerInput, tx: mpsc::Sender<ResponseMessage>) -> Result<()> {
        let mut request = self.client.post(self.url()).json(&self.body(&input));
        if !self.endpoint.api_key.is_empty() {
            request = request.bearer_auth(&self.endpoint.api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Requester(RequesterError::Timeout)
            } else {
                Error::Requester(RequesterError::Network(e.to_string()))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_to_error(status, body));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Requester(RequesterError::Api(format!("invalid response: {e}"))))?;
        let answer = self.extract_answer(&body)?;

        if tx
            .send(ResponseMessage::Final(Message::assistant(answer)))
            .await
            .is_err()
        {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
