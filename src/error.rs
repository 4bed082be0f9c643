//! Error types shared by the record store, the export transformer and the web layer.

use thiserror::Error;

/// Errors surfaced to callers of the registry.
///
/// Every variant carries a human-readable message that is returned to the client
/// together with a status, none of them is fatal to the process.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A required field is missing or a value is outside its vocabulary.
    #[error("Dados inválidos: {0}")]
    Validation(String),

    /// The locality or unit name is already taken.
    #[error("Registro duplicado: {0}")]
    Conflict(String),

    /// Unknown locality or unit reference.
    #[error("Não encontrado: {0}")]
    NotFound(String),

    /// A payload that could not be parsed at all (e.g. invalid measurement JSON).
    #[error("Dados malformados: {0}")]
    MalformedData(String),

    /// Credentials missing or rejected by the authenticator.
    #[error("Acesso não autorizado")]
    Unauthorized,

    /// The outgoing mail could not be delivered.
    #[error("Falha no envio de e-mail: {0}")]
    MailDelivery(#[from] MailDeliveryError),

    /// Reading or writing the backing file failed.
    #[error("Erro de armazenamento: {0}")]
    Storage(#[from] std::io::Error),

    /// The backing file or a payload is not valid JSON for the expected shape.
    #[error("Erro de serialização: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The workbook writer rejected the table.
    #[error("Erro ao gerar planilha: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    /// A poisoned lock or a background task that did not finish.
    #[error("Erro interno: {0}")]
    Internal(String),
}

/// Categorized mail delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailDeliveryError {
    /// The SMTP server rejected the sender credentials.
    #[error("falha de autenticação: {0}")]
    Auth(String),

    /// The server could not be reached or the TLS handshake failed.
    #[error("falha de conexão: {0}")]
    Connection(String),

    /// Anything else: invalid addresses, rejected recipients, message building errors.
    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = RegistryError> = std::result::Result<T, E>;
