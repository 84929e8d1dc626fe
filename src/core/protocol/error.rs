use crate::config::ConfigError;
use crate::core::protocol::shared_key::connection::ConnectionId;
use crate::core::protocol::shared_key::types::Algorithm;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Ошибки инициализации контекста запроса
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("Request context already initialized")]
    AlreadyInitialized,
    #[error("Invalid {algorithm} peer key length: expected {expected}, got {actual}")]
    InvalidPeerKeyLength {
        algorithm: Algorithm,
        expected: usize,
        actual: usize,
    },
    #[error("Invalid P-256 point format: expected uncompressed tag 0x04, got 0x{0:02x}")]
    InvalidPointFormat(u8),
}

/// Ошибки провайдера: конфигурация, старт и неправильное использование
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Multi-buffer CPU instructions not available for {0} backend")]
    MultiBufferUnavailable(&'static str),
    #[error("Not registering the CryptoMb provider twice for connection {0}")]
    AlreadyRegistered(ConnectionId),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}
