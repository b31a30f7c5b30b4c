use std::time::Duration;
use thiserror::Error;

/// Erros comuns da biblioteca Warden
#[derive(Error, Debug)]
pub enum Error {
    /// Nenhuma conexão ficou disponível dentro do timeout configurado
    #[error("Timeout ao obter conexão do pool após {0:?}")]
    PoolTimeout(Duration),

    /// Pool já foi encerrado
    #[error("Pool de conexões encerrado")]
    PoolClosed,

    /// Falha ao abrir uma conexão com o banco
    #[error("Erro de conexão: {0}")]
    Connection(String),

    /// Identificador de recurso já registrado
    #[error("Recurso já registrado: {0}")]
    DuplicateResource(String),

    /// Uso de um recurso após o encerramento
    #[error("Recurso encerrado: {0}")]
    ResourceClosed(String),

    /// Recurso não encontrado
    #[error("Não encontrado: {0}")]
    NotFound(String),

    /// Operação rejeitada porque o gerenciador está sendo desligado
    #[error("Gerenciador de recursos encerrado")]
    ManagerStopped,

    /// Configuração inválida
    #[error("Configuração inválida: {0}")]
    Config(String),
}

impl Error {
    /// Indica se o chamador pode tentar novamente com backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::PoolTimeout(_))
    }
}

/// Tipo de resultado usado em toda a biblioteca
pub type Result<T> = std::result::Result<T, Error>;
