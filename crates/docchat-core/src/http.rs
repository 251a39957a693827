//! HTTP client for the chat backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::api::Backend;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    AttachDocumentRequest, AuthToken, ConversationDetail, ConversationSummary,
    CreateConversationRequest, CreateKnowledgeBaseRequest, DirectorySnapshot, DocumentRecord,
    JobTicket, KnowledgeBase, LoginRequest, Message, ProcessingJob, SendMessageRequest,
    UpdateConversationKnowledgeBaseRequest, UploadFile,
};

/// Header carrying a fresh UUID v4 on every request.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Response body, either wrapped as `{"data": ...}` or bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } | Envelope::Bare(data) => data,
        }
    }
}

/// [`Backend`] over the REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        Self::with_timeout(base_url, token, None)
    }

    fn with_timeout(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Client for the configured base URL, authenticated with the stored token if any.
    pub fn from_config(config: &Config) -> Result<Self> {
        let token = config.read_token()?;
        Self::with_timeout(
            config.api.base_url.clone(),
            token,
            config.api.request_timeout_secs.map(Duration::from_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn anonymous(&self, method: Method, path: &str) -> RequestBuilder {
        let correlation_id = Uuid::new_v4().to_string();
        tracing::debug!(method = method.as_str(), path, correlation_id = correlation_id.as_str(), "Backend request");
        self.client
            .request(method, self.url(path))
            .header(CORRELATION_HEADER, correlation_id)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.anonymous(method, path);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = check_status(builder.send().await?).await?;
        let bytes = response.bytes().await?;
        let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
        Ok(envelope.into_inner())
    }

    async fn execute(&self, builder: RequestBuilder) -> Result<()> {
        check_status(builder.send().await?).await?;
        Ok(())
    }

    // Session ------------------------------------------------------------

    /// Exchange credentials for a session token. Does not change this client's token.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<AuthToken> {
        self.fetch(self.anonymous(Method::POST, "/usuario/login").json(credentials))
            .await
    }

    // Conversations --------------------------------------------------------

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.fetch(self.request(Method::GET, "/chat")).await
    }

    pub async fn create_conversation(&self, name: &str) -> Result<ConversationDetail> {
        let body = CreateConversationRequest {
            name: name.to_string(),
        };
        self.fetch(self.request(Method::POST, "/chat").json(&body))
            .await
    }

    /// Scope a conversation's future messages to a knowledge base.
    pub async fn set_conversation_knowledge_base(
        &self,
        conversation_id: &str,
        knowledge_base_id: &str,
    ) -> Result<()> {
        let body = UpdateConversationKnowledgeBaseRequest {
            knowledge_base_id: knowledge_base_id.to_string(),
        };
        let path = format!("/chat/{conversation_id}/baseconhecimento");
        self.execute(self.request(Method::PUT, &path).json(&body))
            .await
    }

    // Knowledge bases --------------------------------------------------------

    pub async fn list_knowledge_bases(&self) -> Result<Vec<KnowledgeBase>> {
        self.fetch(self.request(Method::GET, "/baseconhecimento"))
            .await
    }

    pub async fn knowledge_base(&self, id: &str) -> Result<KnowledgeBase> {
        self.fetch(self.request(Method::GET, &format!("/baseconhecimento/{id}")))
            .await
    }

    pub async fn create_knowledge_base(
        &self,
        request: &CreateKnowledgeBaseRequest,
    ) -> Result<KnowledgeBase> {
        self.fetch(self.request(Method::POST, "/baseconhecimento").json(request))
            .await
    }

    pub async fn delete_knowledge_base(&self, id: &str) -> Result<()> {
        self.execute(self.request(Method::DELETE, &format!("/baseconhecimento/{id}")))
            .await
    }

    pub async fn add_document_to_knowledge_base(
        &self,
        knowledge_base_id: &str,
        document_id: &str,
    ) -> Result<()> {
        let path = format!("/baseconhecimento/{knowledge_base_id}/documento/{document_id}");
        self.execute(
            self.request(Method::POST, &path)
                .json(&serde_json::json!({})),
        )
        .await
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn send_message(&self, request: &SendMessageRequest) -> Result<JobTicket> {
        self.fetch(self.request(Method::POST, "/mensagemV3").json(request))
            .await
    }

    async fn job_status(&self, job_id: &str) -> Result<ProcessingJob> {
        let path = format!("/mensagem/processamento/{job_id}");
        self.fetch(self.request(Method::GET, &path)).await
    }

    async fn conversation(&self, conversation_id: &str) -> Result<ConversationDetail> {
        self.fetch(self.request(Method::GET, &format!("/chat/{conversation_id}")))
            .await
    }

    async fn upload_document(
        &self,
        directory_id: &str,
        file: &UploadFile,
    ) -> Result<DocumentRecord> {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)?;
        let form = Form::new().part("files", part);
        let path = format!("/diretorio/{directory_id}/documento");
        self.fetch(self.request(Method::POST, &path).multipart(form))
            .await
    }

    async fn attach_document(&self, conversation_id: &str, document_id: &str) -> Result<Message> {
        let body = AttachDocumentRequest {
            document_id: document_id.to_string(),
        };
        let path = format!("/chat/{conversation_id}/documento");
        self.fetch(self.request(Method::POST, &path).json(&body))
            .await
    }

    async fn directory_tree(&self) -> Result<DirectorySnapshot> {
        self.fetch(self.request(Method::GET, "/diretorio")).await
    }
}

/// Map a non-success response to [`Error::Api`].
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| "request failed".to_string());
    tracing::debug!(status = status.as_u16(), %message, "Backend returned an error");
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

/// Best-effort message from an error body: a known JSON field, else the raw text.
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let found = ["message", "mensagem", "error", "erro"]
            .iter()
            .find_map(|key| value.get(key).and_then(serde_json::Value::as_str));
        if let Some(found) = found {
            return Some(found.to_string());
        }
    }
    Some(body.chars().take(200).collect())
}
