use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::bot::{ApiRequest, ApiTransport};
use crate::error::{ApiError, ApiResult, TransportError};

#[derive(Default)]
struct Recorded {
    responses: HashMap<String, ApiResult<Value>>,
    files: HashMap<String, Vec<u8>>,
    requests: Vec<ApiRequest>,
}

/// An in-memory transport that records requests and replays canned results.
#[derive(Clone, Default)]
pub(crate) struct RecordingTransport {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, method: &str, result: Value) {
        self.inner
            .lock()
            .responses
            .insert(method.to_string(), Ok(result));
    }

    pub(crate) fn serve_file(&self, path: &str, data: Vec<u8>) {
        self.inner.lock().files.insert(path.to_string(), data);
    }

    pub(crate) fn methods(&self) -> Vec<String> {
        self.inner
            .lock()
            .requests
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    pub(crate) fn last_request(&self) -> Option<ApiRequest> {
        self.inner.lock().requests.last().cloned()
    }
}

#[async_trait]
impl ApiTransport for RecordingTransport {
    async fn call(&self, request: ApiRequest) -> ApiResult<Value> {
        let mut inner = self.inner.lock();
        let result = inner
            .responses
            .get(&request.method)
            .cloned()
            .unwrap_or_else(|| {
                Err(ApiError::Api {
                    code: 404,
                    description: "Not Found".into(),
                    retry_after: None,
                })
            });
        inner.requests.push(request);
        result
    }

    async fn download(&self, file_path: &str) -> ApiResult<Vec<u8>> {
        self.inner.lock().files.get(file_path).cloned().ok_or_else(|| {
            ApiError::Transport(TransportError::UnexpectedStatus {
                url: format!("file/bot<redacted>/{file_path}"),
                status: 404,
            })
        })
    }
}
