//! Short user-facing messages (pt-BR).

use serde::Serialize;

/// A failure or warning shown to the user in place of a raw error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    EmptyMessage,
    SendFailed,
    LoadFailed,
    StatusCheckFailed,
    ReplyTimedOut,
    NotPdf,
    TooLarge { max_mb: u64 },
    UploadBusy,
    UploadFailed,
    IndexingTimedOut,
    AttachFailed,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::EmptyMessage => write!(f, "Digite uma mensagem antes de enviar."),
            Notice::SendFailed => write!(f, "Erro ao enviar mensagem"),
            Notice::LoadFailed => write!(f, "Erro ao carregar chat"),
            Notice::StatusCheckFailed => write!(f, "Erro ao verificar status da mensagem"),
            Notice::ReplyTimedOut => write!(
                f,
                "Tempo limite excedido. A mensagem ainda está sendo processada."
            ),
            Notice::NotPdf => write!(f, "Apenas arquivos PDF são permitidos."),
            Notice::TooLarge { max_mb } => {
                write!(f, "O arquivo excede o tamanho máximo de {max_mb}MB.")
            }
            Notice::UploadBusy => write!(f, "Aguarde o envio do documento atual."),
            Notice::UploadFailed => write!(f, "Erro ao enviar documento"),
            Notice::IndexingTimedOut => write!(
                f,
                "Tempo limite excedido. O documento ainda está sendo indexado."
            ),
            Notice::AttachFailed => write!(f, "Erro ao anexar documento ao chat"),
        }
    }
}
