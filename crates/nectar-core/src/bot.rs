//! The [`Bot`] handle and the transport seam it calls through.
//!
//! `Bot` is a cheap-to-clone handle over an [`ApiTransport`]. The application
//! (or the runtime) creates one and the dispatcher hands it to every handler
//! inside its [`Context`](crate::Context).
//!
//! # Example
//!
//! ```rust,ignore
//! use nectar_core::{Bot, SendMessage};
//!
//! let bot = Bot::new(transport);
//! let me = bot.initialize().await?;
//! bot.send_message(SendMessage::new(chat_id, format!("I am @{}", me.username.unwrap_or_default())))
//!     .await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};
use crate::requests::{
    AnswerCallbackQuery, ChatId, CopyMessage, EditMessageText, EditedMessage, ForwardMessage,
    GetUpdates, MessageId, SendMessage, SetWebhook, WebhookInfo,
};
use crate::types::{File, Message, Update, User};

// ============================================================================
// Requests
// ============================================================================

/// A file attached to an outbound call, sent as a multipart part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// File name reported to the server.
    pub file_name: String,
    /// Raw file contents.
    pub data: Vec<u8>,
    /// MIME type, if known.
    pub mime_type: Option<String>,
}

impl InputFile {
    pub fn from_bytes(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
            mime_type: None,
        }
    }

    /// Reads a file from disk, naming the part after the file.
    pub async fn from_path(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self::from_bytes(file_name, data))
    }

    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }
}

/// One outbound remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Remote method name, e.g. `sendMessage`.
    pub method: String,
    /// JSON object of parameters.
    pub params: Map<String, Value>,
    /// Files to upload; when non-empty the call is sent as multipart.
    pub files: Vec<(String, InputFile)>,
    /// Added on top of the transport's request timeout (used for long polls).
    pub extra_timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Map::new(),
            files: Vec::new(),
            extra_timeout: None,
        }
    }

    /// Builds a request whose parameters are the fields of `params`.
    ///
    /// `params` must serialize to a JSON object (or to `null` for none).
    pub fn with_params<P: Serialize + ?Sized>(
        method: impl Into<String>,
        params: &P,
    ) -> ApiResult<Self> {
        let method = method.into();
        let params = match serde_json::to_value(params)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ApiError::Serialization(format!(
                    "parameters of {method} must be an object, got {other}"
                )));
            }
        };
        Ok(Self {
            method,
            params,
            files: Vec::new(),
            extra_timeout: None,
        })
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn file(mut self, field: impl Into<String>, file: InputFile) -> Self {
        self.files.push((field.into(), file));
        self
    }

    pub fn extra_timeout(mut self, extra: Duration) -> Self {
        self.extra_timeout = Some(extra);
        self
    }

    pub fn is_multipart(&self) -> bool {
        !self.files.is_empty()
    }
}

// ============================================================================
// Transport Seam
// ============================================================================

/// Carries [`ApiRequest`]s to the remote API.
///
/// Implementations decode the response envelope and return the `result`
/// field, or an [`ApiError`] when the call failed.
#[async_trait]
pub trait ApiTransport: Send + Sync + 'static {
    async fn call(&self, request: ApiRequest) -> ApiResult<Value>;

    /// Fetches the contents of a file by the `file_path` that `getFile`
    /// returned.
    async fn download(&self, file_path: &str) -> ApiResult<Vec<u8>> {
        Err(ApiError::InvalidRequest(format!(
            "this transport cannot download files (requested {file_path})"
        )))
    }
}

#[async_trait]
impl<T: ApiTransport + ?Sized> ApiTransport for Arc<T> {
    async fn call(&self, request: ApiRequest) -> ApiResult<Value> {
        (**self).call(request).await
    }

    async fn download(&self, file_path: &str) -> ApiResult<Vec<u8>> {
        (**self).download(file_path).await
    }
}

/// Fetches raw update batches for the long poller.
///
/// Items are returned as raw JSON so that each one can be validated on its
/// own; one malformed item must not discard the rest of the batch.
#[async_trait]
pub trait UpdateFetcher: Send + Sync {
    async fn fetch_updates(&self, request: &GetUpdates) -> ApiResult<Vec<Value>>;
}

// ============================================================================
// Bot
// ============================================================================

struct BotInner {
    transport: Arc<dyn ApiTransport>,
    me: RwLock<Option<User>>,
}

/// A handle for calling the remote API.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

impl Bot {
    pub fn new<T: ApiTransport>(transport: T) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    pub fn from_arc(transport: Arc<dyn ApiTransport>) -> Self {
        Self {
            inner: Arc::new(BotInner {
                transport,
                me: RwLock::new(None),
            }),
        }
    }

    pub fn transport(&self) -> &Arc<dyn ApiTransport> {
        &self.inner.transport
    }

    /// Sends a prepared request and returns the raw `result` value.
    pub async fn call_raw(&self, request: ApiRequest) -> ApiResult<Value> {
        debug!(method = %request.method, multipart = request.is_multipart(), "Calling API");
        self.inner.transport.call(request).await
    }

    /// Calls any remote method with typed parameters and result.
    ///
    /// ```rust,ignore
    /// let count: i64 = bot.call("getChatMemberCount", &json!({ "chat_id": chat })).await?;
    /// ```
    pub async fn call<P, R>(&self, method: &str, params: &P) -> ApiResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = ApiRequest::with_params(method, params)?;
        self.call_request(request).await
    }

    async fn call_request<R: DeserializeOwned>(&self, request: ApiRequest) -> ApiResult<R> {
        let method = request.method.clone();
        let value = self.call_raw(request).await?;
        serde_json::from_value(value).map_err(|e| {
            ApiError::InvalidResponse(format!("unexpected result for {method}: {e}"))
        })
    }

    /// Fetches the bot's own identity and caches it for [`Bot::me`].
    pub async fn initialize(&self) -> ApiResult<User> {
        let me = self.get_me().await?;
        info!(
            id = me.id,
            username = me.username.as_deref().unwrap_or(""),
            "Bot identity loaded"
        );
        *self.inner.me.write() = Some(me.clone());
        Ok(me)
    }

    /// The identity cached by [`Bot::initialize`].
    pub fn me(&self) -> Option<User> {
        self.inner.me.read().clone()
    }

    // ------------------------------------------------------------------------
    // Typed methods
    // ------------------------------------------------------------------------

    pub async fn get_me(&self) -> ApiResult<User> {
        self.call_request(ApiRequest::new("getMe")).await
    }

    /// Fetches and parses a batch of updates.
    ///
    /// The request timeout is extended by the long-poll `timeout`.
    pub async fn get_updates(&self, params: &GetUpdates) -> ApiResult<Vec<Update>> {
        self.call_request(get_updates_request(params)?).await
    }

    /// Registers a webhook, optionally uploading a self-signed certificate.
    pub async fn set_webhook(
        &self,
        params: &SetWebhook,
        certificate: Option<InputFile>,
    ) -> ApiResult<bool> {
        let mut request = ApiRequest::with_params("setWebhook", params)?;
        if let Some(cert) = certificate {
            request = request.file("certificate", cert);
        }
        self.call_request(request).await
    }

    pub async fn delete_webhook(&self, drop_pending_updates: bool) -> ApiResult<bool> {
        let request =
            ApiRequest::new("deleteWebhook").param("drop_pending_updates", drop_pending_updates);
        self.call_request(request).await
    }

    pub async fn get_webhook_info(&self) -> ApiResult<WebhookInfo> {
        self.call_request(ApiRequest::new("getWebhookInfo")).await
    }

    pub async fn send_message(&self, params: &SendMessage) -> ApiResult<Message> {
        self.call("sendMessage", params).await
    }

    pub async fn forward_message(&self, params: &ForwardMessage) -> ApiResult<Message> {
        self.call("forwardMessage", params).await
    }

    pub async fn copy_message(&self, params: &CopyMessage) -> ApiResult<MessageId> {
        self.call("copyMessage", params).await
    }

    pub async fn edit_message_text(&self, params: &EditMessageText) -> ApiResult<EditedMessage> {
        self.call("editMessageText", params).await
    }

    pub async fn delete_message(
        &self,
        chat_id: impl Into<ChatId>,
        message_id: i64,
    ) -> ApiResult<bool> {
        let request = ApiRequest::new("deleteMessage")
            .param("chat_id", chat_id_value(chat_id.into()))
            .param("message_id", message_id);
        self.call_request(request).await
    }

    /// Prepares a file for download.
    pub async fn get_file(&self, file_id: &str) -> ApiResult<File> {
        self.call_request(ApiRequest::new("getFile").param("file_id", file_id))
            .await
    }

    /// Downloads a file prepared by [`Bot::get_file`].
    pub async fn download_file(&self, file: &File) -> ApiResult<Vec<u8>> {
        let path = file.file_path.as_deref().ok_or_else(|| {
            ApiError::InvalidRequest(format!("file {} has no file_path", file.file_id))
        })?;
        debug!(file_id = %file.file_id, path, "Downloading file");
        self.inner.transport.download(path).await
    }

    /// Resolves `file_id` and writes the file to `destination`.
    pub async fn download_file_to(
        &self,
        file_id: &str,
        destination: impl AsRef<std::path::Path>,
    ) -> ApiResult<File> {
        let file = self.get_file(file_id).await?;
        let data = self.download_file(&file).await?;
        tokio::fs::write(destination.as_ref(), data)
            .await
            .map_err(|e| ApiError::Transport(e.into()))?;
        Ok(file)
    }

    pub async fn answer_callback_query(&self, params: &AnswerCallbackQuery) -> ApiResult<bool> {
        self.call("answerCallbackQuery", params).await
    }

    /// Shows a status such as `typing` in the chat.
    pub async fn send_chat_action(
        &self,
        chat_id: impl Into<ChatId>,
        action: &str,
    ) -> ApiResult<bool> {
        let request = ApiRequest::new("sendChatAction")
            .param("chat_id", chat_id_value(chat_id.into()))
            .param("action", action);
        self.call_request(request).await
    }

    pub async fn approve_chat_join_request(
        &self,
        chat_id: impl Into<ChatId>,
        user_id: i64,
    ) -> ApiResult<bool> {
        let request = ApiRequest::new("approveChatJoinRequest")
            .param("chat_id", chat_id_value(chat_id.into()))
            .param("user_id", user_id);
        self.call_request(request).await
    }

    pub async fn decline_chat_join_request(
        &self,
        chat_id: impl Into<ChatId>,
        user_id: i64,
    ) -> ApiResult<bool> {
        let request = ApiRequest::new("declineChatJoinRequest")
            .param("chat_id", chat_id_value(chat_id.into()))
            .param("user_id", user_id);
        self.call_request(request).await
    }
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("me", &self.inner.me.read().as_ref().map(|u| u.id))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UpdateFetcher for Bot {
    async fn fetch_updates(&self, params: &GetUpdates) -> ApiResult<Vec<Value>> {
        self.call_request(get_updates_request(params)?).await
    }
}

fn get_updates_request(params: &GetUpdates) -> ApiResult<ApiRequest> {
    let mut request = ApiRequest::with_params("getUpdates", params)?;
    if let Some(secs) = params.timeout {
        request = request.extra_timeout(Duration::from_secs(secs));
    }
    Ok(request)
}

fn chat_id_value(chat_id: ChatId) -> Value {
    match chat_id {
        ChatId::Id(id) => Value::from(id),
        ChatId::Username(name) => Value::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransport;
    use serde_json::json;

    #[tokio::test]
    async fn test_initialize_caches_identity() {
        let transport = RecordingTransport::new();
        transport.respond(
            "getMe",
            json!({ "id": 7, "is_bot": true, "first_name": "Nectar", "username": "nectar_bot" }),
        );
        let bot = Bot::new(transport.clone());

        assert!(bot.me().is_none());
        let me = bot.initialize().await.unwrap();
        assert_eq!(me.id, 7);
        assert_eq!(bot.me().and_then(|u| u.username), Some("nectar_bot".into()));
        assert_eq!(transport.methods(), vec!["getMe"]);
    }

    #[tokio::test]
    async fn test_send_message_serializes_params() {
        let transport = RecordingTransport::new();
        transport.respond("sendMessage", json!({ "message_id": 11, "text": "hi" }));
        let bot = Bot::new(transport.clone());

        let sent = bot
            .send_message(&SendMessage::new(42, "hi").parse_mode("HTML"))
            .await
            .unwrap();
        assert_eq!(sent.message_id, 11);

        let request = transport.last_request().unwrap();
        assert_eq!(request.params.get("chat_id"), Some(&json!(42)));
        assert_eq!(request.params.get("parse_mode"), Some(&json!("HTML")));
        assert!(request.params.get("reply_markup").is_none());
    }

    #[tokio::test]
    async fn test_get_updates_extends_timeout() {
        let transport = RecordingTransport::new();
        transport.respond("getUpdates", json!([]));
        let bot = Bot::new(transport.clone());

        let params = GetUpdates {
            offset: Some(5),
            timeout: Some(30),
            ..Default::default()
        };
        let items = bot.fetch_updates(&params).await.unwrap();
        assert!(items.is_empty());

        let request = transport.last_request().unwrap();
        assert_eq!(request.extra_timeout, Some(Duration::from_secs(30)));
        assert_eq!(request.params.get("offset"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn test_set_webhook_with_certificate_is_multipart() {
        let transport = RecordingTransport::new();
        transport.respond("setWebhook", json!(true));
        let bot = Bot::new(transport.clone());

        let cert = InputFile::from_bytes("cert.pem", b"-----BEGIN CERTIFICATE-----".to_vec());
        assert!(
            bot.set_webhook(&SetWebhook::new("https://example.com/hook"), Some(cert))
                .await
                .unwrap()
        );

        let request = transport.last_request().unwrap();
        assert!(request.is_multipart());
        assert_eq!(request.files[0].0, "certificate");
    }

    #[tokio::test]
    async fn test_get_file_then_download() {
        let transport = RecordingTransport::new();
        transport.respond(
            "getFile",
            json!({ "file_id": "abc", "file_unique_id": "u1", "file_size": 5, "file_path": "photos/file_1.jpg" }),
        );
        transport.serve_file("photos/file_1.jpg", b"hello".to_vec());
        let bot = Bot::new(transport.clone());

        let file = bot.get_file("abc").await.unwrap();
        assert_eq!(file.file_path.as_deref(), Some("photos/file_1.jpg"));
        assert_eq!(
            transport.last_request().unwrap().params.get("file_id"),
            Some(&json!("abc"))
        );
        assert_eq!(bot.download_file(&file).await.unwrap(), b"hello");

        let missing = File {
            file_id: "gone".into(),
            ..File::default()
        };
        assert!(matches!(
            bot.download_file(&missing).await,
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_download_file_to_writes_destination() {
        let transport = RecordingTransport::new();
        transport.respond("getFile", json!({ "file_id": "abc", "file_path": "docs/a.txt" }));
        transport.serve_file("docs/a.txt", b"contents".to_vec());
        let bot = Bot::new(transport);

        let dir = std::env::temp_dir().join(format!("nectar-download-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let destination = dir.join("a.txt");

        let file = bot.download_file_to("abc", &destination).await.unwrap();
        assert_eq!(file.file_id, "abc");
        assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"contents");
        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_default_transport_cannot_download() {
        struct CallOnly;

        #[async_trait]
        impl ApiTransport for CallOnly {
            async fn call(&self, _request: ApiRequest) -> ApiResult<Value> {
                Ok(Value::Null)
            }
        }

        assert!(matches!(
            CallOnly.download("a/b").await,
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_unexpected_result_shape_is_invalid_response() {
        let transport = RecordingTransport::new();
        transport.respond("getMe", json!("not a user"));
        let bot = Bot::new(transport);

        assert!(matches!(
            bot.get_me().await,
            Err(ApiError::InvalidResponse(_))
        ));
    }
}
