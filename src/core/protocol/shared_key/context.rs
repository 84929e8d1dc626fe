use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use p256::SecretKey;
use rand_core::{OsRng, RngCore};
use tracing::{trace, warn};
use zeroize::Zeroizing;

use crate::core::event::dispatcher::Dispatcher;
use crate::core::protocol::error::ContextError;
use super::connection::SharedKeyConnectionCallbacks;
use super::types::{
    Algorithm, RequestStatus, SharedKeyOutput, P256_COORDINATE_LEN, P256_POINT_LEN,
    UNCOMPRESSED_POINT_TAG, X25519_KEY_LEN,
};

/// Ключевой материал одного запроса, создаётся в `init()`
enum KeyMaterial {
    X25519 {
        peer_key: [u8; X25519_KEY_LEN],
        private_key: Zeroizing<[u8; X25519_KEY_LEN]>,
        public_key: [u8; X25519_KEY_LEN],
        shared_secret: Zeroizing<[u8; 32]>,
    },
    P256 {
        peer_x: [u8; P256_COORDINATE_LEN],
        peer_y: [u8; P256_COORDINATE_LEN],
        private_key: Zeroizing<[u8; 32]>,
        /// big-integer координаты, как их вернул multi-buffer вызов
        public_x: Vec<u8>,
        public_y: Vec<u8>,
        shared_secret: Zeroizing<[u8; 32]>,
    },
}

impl KeyMaterial {
    fn generate(algorithm: Algorithm, peer_key: &[u8]) -> Self {
        match algorithm {
            Algorithm::X25519 => {
                let mut peer = [0u8; X25519_KEY_LEN];
                peer.copy_from_slice(peer_key);

                let mut private_key = Zeroizing::new([0u8; X25519_KEY_LEN]);
                OsRng.fill_bytes(&mut private_key[..]);
                clamp_x25519(&mut private_key);

                KeyMaterial::X25519 {
                    peer_key: peer,
                    private_key,
                    public_key: [0u8; X25519_KEY_LEN],
                    shared_secret: Zeroizing::new([0u8; 32]),
                }
            }
            Algorithm::P256 => {
                let mut peer_x = [0u8; P256_COORDINATE_LEN];
                let mut peer_y = [0u8; P256_COORDINATE_LEN];
                peer_x.copy_from_slice(&peer_key[1..1 + P256_COORDINATE_LEN]);
                peer_y.copy_from_slice(&peer_key[1 + P256_COORDINATE_LEN..]);

                // Скаляр равномерно в [1, n)
                let secret = SecretKey::random(&mut OsRng);
                let mut private_key = Zeroizing::new([0u8; 32]);
                private_key.copy_from_slice(&secret.to_bytes());

                KeyMaterial::P256 {
                    peer_x,
                    peer_y,
                    private_key,
                    public_x: Vec::new(),
                    public_y: Vec::new(),
                    shared_secret: Zeroizing::new([0u8; 32]),
                }
            }
        }
    }
}

fn clamp_x25519(key: &mut [u8; X25519_KEY_LEN]) {
    key[0] &= 248;
    key[31] &= 127;
    key[31] |= 64;
}

/// Состояние одной операции обмена ключами.
///
/// Живёт в `Rc`: его одновременно держат очередь (пока запрос ждёт батча),
/// отложенный колбэк завершения и привязка соединения.
pub struct RequestContext {
    algorithm: Algorithm,
    status: Cell<RequestStatus>,
    cancelled: Cell<bool>,
    material: RefCell<Option<KeyMaterial>>,
    dispatcher: Rc<dyn Dispatcher>,
    callbacks: Rc<dyn SharedKeyConnectionCallbacks>,
}

impl RequestContext {
    pub fn new(
        algorithm: Algorithm,
        dispatcher: Rc<dyn Dispatcher>,
        callbacks: Rc<dyn SharedKeyConnectionCallbacks>,
    ) -> Self {
        Self {
            algorithm,
            status: Cell::new(RequestStatus::Retry),
            cancelled: Cell::new(false),
            material: RefCell::new(None),
            dispatcher,
            callbacks,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Проверяет ключ пира и генерирует эфемерный ключ. Вызывается один раз.
    pub fn init(&self, peer_key: &[u8]) -> Result<(), ContextError> {
        if self.is_initialized() {
            return Err(ContextError::AlreadyInitialized);
        }

        let expected = self.algorithm.peer_key_len();
        if peer_key.len() != expected {
            return Err(ContextError::InvalidPeerKeyLength {
                algorithm: self.algorithm,
                expected,
                actual: peer_key.len(),
            });
        }

        if self.algorithm == Algorithm::P256 && peer_key[0] != UNCOMPRESSED_POINT_TAG {
            return Err(ContextError::InvalidPointFormat(peer_key[0]));
        }

        *self.material.borrow_mut() = Some(KeyMaterial::generate(self.algorithm, peer_key));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.material.borrow().is_some()
    }

    pub fn status(&self) -> RequestStatus {
        self.status.get()
    }

    pub fn set_status(&self, status: RequestStatus) {
        self.status.set(status);
    }

    /// Отменяет ещё не сработавший колбэк завершения
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub(crate) fn load_x25519_slot(
        &self,
        private_key: &mut [u8; 32],
        peer_key: &mut [u8; 32],
    ) -> bool {
        match self.material.borrow().as_ref() {
            Some(KeyMaterial::X25519 { peer_key: peer, private_key: private, .. }) => {
                private_key.copy_from_slice(&private[..]);
                peer_key.copy_from_slice(peer);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn store_x25519_output(&self, public_key: &[u8; 32], shared_secret: &[u8; 32]) {
        if let Some(KeyMaterial::X25519 { public_key: public, shared_secret: shared, .. }) =
            self.material.borrow_mut().as_mut()
        {
            public.copy_from_slice(public_key);
            shared.copy_from_slice(shared_secret);
        }
    }

    pub(crate) fn load_p256_slot(
        &self,
        private_key: &mut [u8; 32],
        peer_x: &mut [u8; 32],
        peer_y: &mut [u8; 32],
    ) -> bool {
        match self.material.borrow().as_ref() {
            Some(KeyMaterial::P256 { peer_x: x, peer_y: y, private_key: private, .. }) => {
                private_key.copy_from_slice(&private[..]);
                peer_x.copy_from_slice(x);
                peer_y.copy_from_slice(y);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn store_p256_output(
        &self,
        public_x: Vec<u8>,
        public_y: Vec<u8>,
        shared_secret: &[u8; 32],
    ) {
        if let Some(KeyMaterial::P256 {
            public_x: x,
            public_y: y,
            shared_secret: shared,
            ..
        }) = self.material.borrow_mut().as_mut()
        {
            *x = public_x;
            *y = public_y;
            shared.copy_from_slice(shared_secret);
        }
    }

    /// Планирует установку статуса и уведомление соединения
    /// на следующей итерации цикла событий владельца
    pub fn schedule_callback(self: &Rc<Self>, status: RequestStatus) {
        let ctx = Rc::clone(self);
        self.dispatcher.post(Box::new(move || {
            if ctx.cancelled.get() {
                trace!("Completion for cancelled {} request dropped", ctx.algorithm);
                return;
            }
            ctx.set_status(status);
            ctx.callbacks.on_shared_key_method_complete();
        }));
    }

    /// Собирает выходные буферы успешного запроса.
    ///
    /// Для P-256 публичный ключ собирается как `0x04 || X || Y`, координаты
    /// дополняются нулями слева до 32 байт. Координата длиннее 32 байт
    /// превращает успех в ошибку (`None`).
    pub fn output(&self) -> Option<SharedKeyOutput> {
        let material = self.material.borrow();
        match material.as_ref()? {
            KeyMaterial::X25519 { public_key, shared_secret, .. } => Some(SharedKeyOutput {
                ciphertext: public_key.to_vec(),
                secret: Zeroizing::new(shared_secret.to_vec()),
            }),
            KeyMaterial::P256 { public_x, public_y, shared_secret, .. } => {
                if public_x.len() > P256_COORDINATE_LEN || public_y.len() > P256_COORDINATE_LEN {
                    warn!("P-256 public coordinate does not fit in {} bytes", P256_COORDINATE_LEN);
                    return None;
                }

                let mut ciphertext = vec![0u8; P256_POINT_LEN];
                ciphertext[0] = UNCOMPRESSED_POINT_TAG;
                let x_end = 1 + P256_COORDINATE_LEN;
                ciphertext[x_end - public_x.len()..x_end].copy_from_slice(public_x);
                ciphertext[P256_POINT_LEN - public_y.len()..].copy_from_slice(public_y);

                Some(SharedKeyOutput {
                    ciphertext,
                    secret: Zeroizing::new(shared_secret.to_vec()),
                })
            }
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("algorithm", &self.algorithm)
            .field("status", &self.status.get())
            .field("initialized", &self.is_initialized())
            .field("dispatcher", &self.dispatcher.name())
            .finish()
    }
}
