//! Domain models for conversations, processing jobs and the document tree.
//!
//! Field names on the wire follow the backend's JSON contract; Rust names are
//! mapped with serde renames.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// MIME type accepted for document uploads.
pub const PDF_MIME: &str = "application/pdf";

/// Conversation as listed by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(rename = "codigo_chat")]
    pub id: String,
    #[serde(rename = "nome_chat", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "codigo_assistente", default, deserialize_with = "null_as_default")]
    pub assistant_id: String,
    #[serde(rename = "nome_assistente", default, deserialize_with = "null_as_default")]
    pub assistant_name: String,
    #[serde(rename = "foto_assistente", default, deserialize_with = "null_as_default")]
    pub assistant_photo: String,
    #[serde(rename = "criado_em", default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Full conversation with its transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationDetail {
    #[serde(rename = "codigo_chat")]
    pub id: String,
    #[serde(rename = "nome_chat", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "codigo_assistente", default, deserialize_with = "null_as_default")]
    pub assistant_id: String,
    #[serde(rename = "nome_assistente", default, deserialize_with = "null_as_default")]
    pub assistant_name: String,
    #[serde(rename = "foto_assistente", default, deserialize_with = "null_as_default")]
    pub assistant_photo: String,
    #[serde(rename = "codigo_base_conhecimento", default)]
    pub knowledge_base_id: Option<String>,
    #[serde(rename = "nome_base_conhecimento", default)]
    pub knowledge_base_name: Option<String>,
    #[serde(rename = "criado_em", default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "mensagens", default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
}

impl ConversationDetail {
    /// Knowledge base to scope new messages with, if one is linked.
    pub fn knowledge_base(&self) -> Option<&str> {
        self.knowledge_base_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// A single transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Empty for an optimistic message not yet acknowledged by the backend.
    #[serde(rename = "codigo_mensagem", default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "mensagem", default, deserialize_with = "null_as_default")]
    pub body: String,
    #[serde(rename = "data_mensagem", default, with = "timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "tipo_mensagem")]
    pub origin: MessageOrigin,
    #[serde(rename = "nome_documento", default, deserialize_with = "null_as_default")]
    pub document_name: String,
    #[serde(rename = "extensao_documento", default, deserialize_with = "null_as_default")]
    pub document_ext: String,
    /// Set locally on a message produced by attaching a document.
    #[serde(skip)]
    pub is_newly_attached: bool,
}

impl Message {
    /// Local user message shown before the backend confirms it.
    pub fn optimistic_user(body: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            body: body.into(),
            timestamp: Some(Utc::now()),
            origin: MessageOrigin::user(),
            document_name: String::new(),
            document_ext: String::new(),
            is_newly_attached: false,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        self.id.is_empty()
    }

    /// Attached document name, if this message carries one.
    pub fn document(&self) -> Option<&str> {
        let name = self.document_name.trim();
        (!name.is_empty()).then_some(name)
    }
}

/// Who produced a message.
///
/// Every variant keeps the wire value exactly as the backend sent it; the
/// variant only classifies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageOrigin {
    User(String),
    Assistant(String),
    Other(String),
}

impl MessageOrigin {
    const USER: &'static str = "Usuario";
    const ASSISTANT: &'static str = "Assistente";

    /// Origin of a locally composed message.
    pub fn user() -> Self {
        MessageOrigin::User(Self::USER.to_string())
    }

    pub fn assistant() -> Self {
        MessageOrigin::Assistant(Self::ASSISTANT.to_string())
    }

    pub fn is_user(&self) -> bool {
        matches!(self, MessageOrigin::User(_))
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, MessageOrigin::Assistant(_))
    }

    /// Wire value of this origin.
    pub fn as_str(&self) -> &str {
        match self {
            MessageOrigin::User(value)
            | MessageOrigin::Assistant(value)
            | MessageOrigin::Other(value) => value,
        }
    }
}

impl std::fmt::Display for MessageOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for MessageOrigin {
    fn from(s: &str) -> Self {
        MessageOrigin::from(s.to_string())
    }
}

impl From<String> for MessageOrigin {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "usuario" | "usuário" | "user" => MessageOrigin::User(s),
            "assistente" | "assistant" => MessageOrigin::Assistant(s),
            _ => MessageOrigin::Other(s),
        }
    }
}

impl From<MessageOrigin> for String {
    fn from(origin: MessageOrigin) -> Self {
        match origin {
            MessageOrigin::User(value)
            | MessageOrigin::Assistant(value)
            | MessageOrigin::Other(value) => value,
        }
    }
}

/// Request body for submitting a user message.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    #[serde(rename = "codigo_chat")]
    pub conversation_id: String,
    #[serde(rename = "mensagem")]
    pub text: String,
    /// Empty when the conversation has no knowledge base.
    #[serde(rename = "codigo_base_conhecimento")]
    pub knowledge_base_id: String,
}

/// Acknowledgement of a submitted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTicket {
    #[serde(rename = "idProcessamento")]
    pub job_id: String,
}

/// Backend unit of work generating an assistant reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingJob {
    #[serde(rename = "codigo_processamento_mensagem")]
    pub id: String,
    #[serde(rename = "data_criacao", default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "data_atualizacao", default, with = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(rename = "status_processamento_mensagem")]
    pub status: JobStatus,
}

impl ProcessingJob {
    /// Stand-in observation used when a status query fails.
    pub fn still_processing(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            updated_at: None,
            status: JobStatus::Processing,
        }
    }
}

/// Processing status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "Pendente")]
    Pending,
    #[serde(rename = "Processando")]
    Processing,
    #[serde(rename = "Processado")]
    Processed,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Only `Processed` ends polling; unknown values count as in progress.
    pub fn is_terminal(self) -> bool {
        self == JobStatus::Processed
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pendente"),
            JobStatus::Processing => write!(f, "Processando"),
            JobStatus::Processed => write!(f, "Processado"),
            JobStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A document stored in a directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(rename = "codigo_documento")]
    pub id: String,
    #[serde(rename = "nome_documento", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "caminho_documento", default, deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(rename = "status_documento", default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(rename = "criado_em", default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl DocumentRecord {
    /// Whether the status equals the given finished value.
    pub fn has_status(&self, finished: &str) -> bool {
        self.status.trim().eq_ignore_ascii_case(finished.trim())
    }
}

/// Snapshot of a directory and everything below it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    #[serde(rename = "codigo_diretorio")]
    pub id: String,
    #[serde(rename = "codigo_proprietario", default, deserialize_with = "null_as_default")]
    pub owner_id: String,
    #[serde(rename = "nome_diretorio", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(rename = "codigo_diretorio_pai", default)]
    pub parent_id: Option<String>,
    #[serde(rename = "caminho_diretorio", default, deserialize_with = "null_as_default")]
    pub path: String,
    #[serde(rename = "criado_em", default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "sub_diretorios", default, deserialize_with = "null_as_default")]
    pub subdirectories: Vec<DirectorySnapshot>,
    #[serde(rename = "documentos", default, deserialize_with = "null_as_default")]
    pub documents: Vec<DocumentRecord>,
    #[serde(rename = "base_conhecimento", default)]
    pub knowledge_base: Option<String>,
}

impl DirectorySnapshot {
    /// The root directory is the one whose id equals its owner id.
    pub fn is_root(&self) -> bool {
        !self.id.is_empty() && self.id == self.owner_id
    }
}

/// Request body for attaching a document to a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct AttachDocumentRequest {
    #[serde(rename = "codigo_documento")]
    pub document_id: String,
}

/// Request body for creating a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct CreateConversationRequest {
    #[serde(rename = "nome_chat")]
    pub name: String,
}

/// Request body for linking a conversation to a knowledge base.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateConversationKnowledgeBaseRequest {
    #[serde(rename = "codigo_base_conhecimento")]
    pub knowledge_base_id: String,
}

/// Named group of indexed documents scoping assistant context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(rename = "codigo_base_conhecimento")]
    pub id: String,
    #[serde(rename = "nome_base_conhecimento", default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(
        rename = "descricao_base_conhecimento",
        default,
        deserialize_with = "null_as_default"
    )]
    pub description: String,
    #[serde(rename = "data_criacao_base_conhecimento", default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "escopo_base_conhecimento", default, deserialize_with = "null_as_default")]
    pub scope: String,
    #[serde(rename = "tamanho_base_conhecimento", default)]
    pub size: i64,
    #[serde(rename = "documentos", default)]
    pub documents: Option<Vec<KnowledgeBaseDocument>>,
    #[serde(rename = "codigo_diretorio", default, deserialize_with = "null_as_default")]
    pub directory_id: String,
}

/// Document entry inside a knowledge base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBaseDocument {
    #[serde(rename = "codigo_documento")]
    pub id: String,
    #[serde(rename = "data_criacao_documento", default, with = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "status_documento", default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(rename = "nome_documento", default, deserialize_with = "null_as_default")]
    pub name: String,
}

/// Request body for creating a knowledge base.
#[derive(Debug, Clone, Serialize)]
pub struct CreateKnowledgeBaseRequest {
    #[serde(rename = "nome_base_conhecimento")]
    pub name: String,
    #[serde(rename = "descricao_base_conhecimento")]
    pub description: String,
    #[serde(rename = "idEscopoBaseConhecimento")]
    pub scope_id: i64,
    #[serde(rename = "codigo_diretorio")]
    pub directory_id: String,
}

/// Login credentials.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    #[serde(rename = "codigo_empresa")]
    pub company_id: String,
    pub email: String,
    #[serde(rename = "senha")]
    pub password: String,
}

/// Session token issued by login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    #[serde(rename = "data_expiracao", default, with = "timestamp")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// A file picked for upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    /// Read a file from disk, deriving the MIME type from its extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Validation(format!("Invalid file name: {}", path.display())))?
            .to_string();
        let bytes = std::fs::read(path)?;
        let mime_type = mime_for_path(path).to_string();
        Ok(Self {
            name,
            mime_type,
            bytes,
        })
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("pdf") => PDF_MIME,
        Some("txt") => "text/plain",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Lenient timestamps: RFC 3339, or naive date-times taken as UTC. Anything
/// else (including empty strings) reads as `None`.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(dt.with_timezone(&Utc));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse))
    }
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;
