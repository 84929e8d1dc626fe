use std::fmt;

use zeroize::Zeroizing;

/// TLS NamedGroup `secp256r1`
pub const SSL_GROUP_SECP256R1: u16 = 0x0017;
/// TLS NamedGroup `x25519`
pub const SSL_GROUP_X25519: u16 = 0x001d;

/// Тег несжатой точки SEC1
pub const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

pub const X25519_KEY_LEN: usize = 32;
pub const P256_COORDINATE_LEN: usize = 32;
pub const P256_POINT_LEN: usize = 1 + 2 * P256_COORDINATE_LEN;
pub const SHARED_SECRET_LEN: usize = 32;

/// Поддерживаемые алгоритмы обмена ключами
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    X25519,
    P256,
}

impl Algorithm {
    pub fn from_group_id(group_id: u16) -> Option<Self> {
        match group_id {
            SSL_GROUP_X25519 => Some(Algorithm::X25519),
            SSL_GROUP_SECP256R1 => Some(Algorithm::P256),
            _ => None,
        }
    }

    pub fn group_id(&self) -> u16 {
        match self {
            Algorithm::X25519 => SSL_GROUP_X25519,
            Algorithm::P256 => SSL_GROUP_SECP256R1,
        }
    }

    /// Длина публичного ключа пира на проводе
    pub fn peer_key_len(&self) -> usize {
        match self {
            Algorithm::X25519 => X25519_KEY_LEN,
            Algorithm::P256 => P256_POINT_LEN,
        }
    }

    /// Длина нашего публичного ключа, отдаваемого хосту
    pub fn ciphertext_len(&self) -> usize {
        self.peer_key_len()
    }

    pub fn secret_len(&self) -> usize {
        SHARED_SECRET_LEN
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::X25519 => "X25519",
            Algorithm::P256 => "P-256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Состояние отдельного запроса
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestStatus {
    #[default]
    Retry,
    Success,
    Error,
}

/// Статус асинхронной операции в терминах TLS стека
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    Success,
    Retry,
    Failure,
}

/// Результат успешного обмена ключами
#[derive(Debug)]
pub struct SharedKeyOutput {
    /// Наш эфемерный публичный ключ (уходит пиру)
    pub ciphertext: Vec<u8>,
    pub secret: Zeroizing<Vec<u8>>,
}

/// Ответ на `complete()`
#[derive(Debug)]
pub enum Completion {
    Retry,
    Success(SharedKeyOutput),
    Failure,
}

impl Completion {
    pub fn status(&self) -> AsyncStatus {
        match self {
            Completion::Retry => AsyncStatus::Retry,
            Completion::Success(_) => AsyncStatus::Success,
            Completion::Failure => AsyncStatus::Failure,
        }
    }

    pub fn into_output(self) -> Option<SharedKeyOutput> {
        match self {
            Completion::Success(output) => Some(output),
            _ => None,
        }
    }
}
