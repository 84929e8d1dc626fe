use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::CryptoMbConfig;
use crate::core::event::dispatcher::Dispatcher;
use crate::core::protocol::acceleration::multi_buffer::MultiBufferCryptoRef;
use crate::core::protocol::error::{ProviderError, ProviderResult};
use super::connection::{ConnectionBinding, ConnectionId, SharedKeyConnectionCallbacks};
use super::queue::BatchQueue;
use super::stats::CryptoMbStats;
use super::types::{Algorithm, AsyncStatus, Completion};

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

/// Состояние провайдера на одном рабочем потоке
struct ThreadLocalData {
    /// Жив, пока жив провайдер-владелец
    owner: Weak<()>,
    dispatcher: Rc<dyn Dispatcher>,
    x25519_queue: Rc<BatchQueue>,
    p256_queue: Rc<BatchQueue>,
    connections: RefCell<HashMap<ConnectionId, Rc<ConnectionBinding>>>,
}

impl ThreadLocalData {
    fn queue(&self, algorithm: Algorithm) -> &Rc<BatchQueue> {
        match algorithm {
            Algorithm::X25519 => &self.x25519_queue,
            Algorithm::P256 => &self.p256_queue,
        }
    }
}

thread_local! {
    // provider id -> данные этого потока
    static THREAD_DATA: RefCell<HashMap<u64, Rc<ThreadLocalData>>> = RefCell::new(HashMap::new());
}

/// Удаляет с текущего потока очереди и привязки уже уничтоженных провайдеров.
///
/// Провайдер, уничтоженный на другом потоке, не может освободить данные этого
/// потока сам: они освобождаются здесь, при следующей инициализации или
/// регистрации на потоке, либо вместе с thread-local хранилищем.
pub fn prune_dropped_providers() -> usize {
    let dropped: Vec<Rc<ThreadLocalData>> = THREAD_DATA
        .try_with(|all| {
            let mut all = all.borrow_mut();
            let dead: Vec<u64> = all
                .iter()
                .filter(|(_, data)| data.owner.strong_count() == 0)
                .map(|(id, _)| *id)
                .collect();
            dead.iter().filter_map(|id| all.remove(id)).collect()
        })
        .unwrap_or_default();

    // Освобождаются вне заимствования таблицы
    for data in &dropped {
        debug!("Released queues of a dropped provider on {} ({} connections)",
               data.dispatcher.name(),
               data.connections.borrow().len());
    }
    dropped.len()
}

/// Число провайдеров с очередями на текущем потоке
pub fn thread_provider_count() -> usize {
    prune_dropped_providers();
    THREAD_DATA.try_with(|all| all.borrow().len()).unwrap_or(0)
}

/// Провайдер батчевого обмена ключами для TLS.
///
/// Сам объект разделяется между потоками (`Arc`), а очереди и привязки
/// соединений живут в thread-local таблице каждого рабочего потока.
/// Все методы, кроме конструктора и аксессоров, вызываются на потоке соединения.
pub struct CryptoMbSharedKeyProvider {
    id: u64,
    liveness: Arc<()>,
    poll_delay: Duration,
    crypto: MultiBufferCryptoRef,
    stats: Arc<CryptoMbStats>,
}

impl CryptoMbSharedKeyProvider {
    pub fn new(config: &CryptoMbConfig, crypto: MultiBufferCryptoRef) -> ProviderResult<Self> {
        config.validate()?;

        if !crypto.is_applicable() {
            warn!("⚠️ Multi-buffer backend {} is not applicable on this CPU", crypto.name());
            return Err(ProviderError::MultiBufferUnavailable(crypto.name()));
        }

        let provider = Self {
            id: NEXT_PROVIDER_ID.fetch_add(1, Ordering::Relaxed),
            liveness: Arc::new(()),
            poll_delay: config.get_poll_delay(),
            crypto,
            stats: Arc::new(CryptoMbStats::new("cryptomb")),
        };

        info!("🚀 CryptoMb shared key provider initialized:");
        info!("  - Backend: {}", provider.crypto.name());
        info!("  - Poll delay: {:?}", provider.poll_delay);
        info!("  - Groups: X25519 (0x{:04x}), P-256 (0x{:04x})",
              Algorithm::X25519.group_id(), Algorithm::P256.group_id());

        Ok(provider)
    }

    /// Создаёт пару очередей для текущего потока. Повторный вызов ничего не делает.
    pub fn initialize_thread(&self, dispatcher: Rc<dyn Dispatcher>) {
        self.thread_data_or_init(dispatcher);
    }

    pub fn is_thread_initialized(&self) -> bool {
        self.thread_data().is_some()
    }

    fn thread_data(&self) -> Option<Rc<ThreadLocalData>> {
        THREAD_DATA
            .try_with(|data| data.borrow().get(&self.id).cloned())
            .ok()
            .flatten()
    }

    fn thread_data_or_init(&self, dispatcher: Rc<dyn Dispatcher>) -> Rc<ThreadLocalData> {
        prune_dropped_providers();
        if let Some(data) = self.thread_data() {
            return data;
        }

        let data = Rc::new(ThreadLocalData {
            owner: Arc::downgrade(&self.liveness),
            x25519_queue: BatchQueue::new(
                Algorithm::X25519,
                self.poll_delay,
                Arc::clone(&self.crypto),
                Arc::clone(&self.stats),
                dispatcher.as_ref(),
            ),
            p256_queue: BatchQueue::new(
                Algorithm::P256,
                self.poll_delay,
                Arc::clone(&self.crypto),
                Arc::clone(&self.stats),
                dispatcher.as_ref(),
            ),
            dispatcher,
            connections: RefCell::new(HashMap::new()),
        });

        THREAD_DATA.with(|all| {
            all.borrow_mut().insert(self.id, Rc::clone(&data));
        });
        info!("🔧 CryptoMb queues initialized on {}", data.dispatcher.name());
        data
    }

    fn binding(&self, conn: ConnectionId) -> Option<Rc<ConnectionBinding>> {
        let data = self.thread_data()?;
        let binding = data.connections.borrow().get(&conn).cloned();
        binding
    }

    /// Привязывает соединение к провайдеру на текущем потоке
    pub fn register(
        &self,
        conn: ConnectionId,
        callbacks: Rc<dyn SharedKeyConnectionCallbacks>,
        dispatcher: Rc<dyn Dispatcher>,
    ) -> ProviderResult<()> {
        let data = self.thread_data_or_init(Rc::clone(&dispatcher));

        let mut connections = data.connections.borrow_mut();
        if connections.contains_key(&conn) {
            warn!("Not registering the CryptoMb provider twice for {}", conn);
            return Err(ProviderError::AlreadyRegistered(conn));
        }

        let binding = ConnectionBinding::new(
            conn,
            callbacks,
            dispatcher,
            Rc::clone(&data.x25519_queue),
            Rc::clone(&data.p256_queue),
        );
        connections.insert(conn, Rc::new(binding));
        debug!("{} registered on {}", conn, data.dispatcher.name());
        Ok(())
    }

    /// Отвязывает соединение. Незарегистрированное соединение игнорируется.
    pub fn unregister(&self, conn: ConnectionId) {
        let data = match self.thread_data() {
            Some(data) => data,
            None => return,
        };

        // Привязка уничтожается вне заимствования таблицы
        let removed = data.connections.borrow_mut().remove(&conn);
        if removed.is_some() {
            debug!("{} unregistered", conn);
        }
    }

    /// Начинает обмен ключами. Ответ всегда `Retry` или `Failure`:
    /// результат придёт позже через `on_shared_key_method_complete()`.
    pub fn compute(&self, conn: ConnectionId, group_id: u16, peer_key: &[u8]) -> AsyncStatus {
        let binding = match self.binding(conn) {
            Some(binding) => binding,
            None => {
                warn!("compute() called for unregistered {}", conn);
                return AsyncStatus::Failure;
            }
        };

        let algorithm = match Algorithm::from_group_id(group_id) {
            Some(algorithm) => algorithm,
            None => {
                debug!("{} requested unsupported group 0x{:04x}", conn, group_id);
                return AsyncStatus::Failure;
            }
        };

        let ctx = binding.new_context(algorithm);
        if let Err(e) = ctx.init(peer_key) {
            warn!("{} rejected {} peer key: {}", conn, algorithm, e);
            return AsyncStatus::Failure;
        }

        binding.add_to_queue(ctx);
        AsyncStatus::Retry
    }

    /// Забирает результат обмена ключами соединения
    pub fn complete(&self, conn: ConnectionId) -> Completion {
        match self.binding(conn) {
            Some(binding) => binding.complete(),
            None => {
                warn!("complete() called for unregistered {}", conn);
                Completion::Failure
            }
        }
    }

    /// Библиотека multi-buffer криптографии не сертифицирована по FIPS
    pub fn check_fips(&self) -> bool {
        false
    }

    /// Недоступный backend не даёт создать провайдер, поэтому созданный всегда доступен
    pub fn is_available(&self) -> bool {
        true
    }

    pub fn poll_delay(&self) -> Duration {
        self.poll_delay
    }

    pub fn stats(&self) -> &Arc<CryptoMbStats> {
        &self.stats
    }

    pub fn backend_name(&self) -> &'static str {
        self.crypto.name()
    }

    /// Длина очереди алгоритма на текущем потоке
    pub fn queue_len(&self, algorithm: Algorithm) -> Option<usize> {
        self.thread_data().map(|data| data.queue(algorithm).len())
    }

    pub fn timer_armed(&self, algorithm: Algorithm) -> Option<bool> {
        self.thread_data().map(|data| data.queue(algorithm).timer_armed())
    }

    /// Число соединений, привязанных на текущем потоке
    pub fn connection_count(&self) -> usize {
        self.thread_data()
            .map(|data| data.connections.borrow().len())
            .unwrap_or(0)
    }

    /// Удаляет очереди и привязки текущего потока (при остановке воркера)
    pub fn release_thread(&self) {
        let released = THREAD_DATA
            .try_with(|all| all.borrow_mut().remove(&self.id))
            .ok()
            .flatten();

        if let Some(data) = released {
            let pending = data.x25519_queue.len() + data.p256_queue.len();
            info!("🛑 CryptoMb queues released on {} ({} connections, {} pending requests)",
                  data.dispatcher.name(),
                  data.connections.borrow().len(),
                  pending);
        }
    }
}

impl Drop for CryptoMbSharedKeyProvider {
    fn drop(&mut self) {
        // Данные других потоков уходят вместе с их thread-local хранилищем
        let released = THREAD_DATA
            .try_with(|all| all.borrow_mut().remove(&self.id))
            .ok()
            .flatten();
        drop(released);
    }
}
