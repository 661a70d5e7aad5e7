use async_trait::async_trait;
use tracing::{error, info};

use render_domain::{CallbackParams, ClientCallback};

/// HTTP前端回调实现
///
/// 回调失败只记日志，不影响任务终态。
pub struct HttpClientCallback {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClientCallback {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn bearer(jwt: &str) -> String {
        format!("Bearer {jwt}")
    }
}

#[async_trait]
impl ClientCallback for HttpClientCallback {
    async fn notify_completed(&self, task_id: &str, params: &CallbackParams) {
        let url = format!("{}/api/renderPicSuccessFul", self.base_url);
        let body = serde_json::json!({
            "picName": format!("{task_id}.png"),
            "clientId": params.client_id,
            "fileDataId": params.file_data_id,
        });

        let result = self
            .client
            .post(&url)
            .json(&body)
            .header("x-client-id", params.client_id.as_str())
            .header("x-task-id", task_id)
            .header("Authorization", Self::bearer(&params.client_jwt))
            .send()
            .await;

        match result {
            Ok(response) => info!(
                "回调前端成功: {} -- {} -- {}",
                response.status(),
                task_id,
                params.client_id
            ),
            Err(e) => error!("回调前端失败: {}", e),
        }
    }

    async fn notify_error(&self, params: &CallbackParams, error: &str) {
        let url = format!("{}/api/renderError", self.base_url);
        let body = serde_json::json!({
            "clientId": params.client_id,
            "error": error,
        });

        let result = self
            .client
            .post(&url)
            .json(&body)
            .header("x-client-id", params.client_id.as_str())
            .header("Authorization", Self::bearer(&params.client_jwt))
            .send()
            .await;

        if let Err(e) = result {
            error!("错误回调前端失败: {}", e);
        }
    }
}
