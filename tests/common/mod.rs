#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use cryptomb_kex::config::CryptoMbConfig;
use cryptomb_kex::core::event::dispatcher::{Dispatcher, PostedCallback, Timer, TimerCallback};
use cryptomb_kex::core::protocol::acceleration::multi_buffer::{MultiBufferCrypto, SlotMask};
use cryptomb_kex::core::protocol::acceleration::portable::PortableMultiBuffer;
use cryptomb_kex::core::protocol::shared_key::connection::{ConnectionId, SharedKeyConnectionCallbacks};
use cryptomb_kex::core::protocol::shared_key::provider::CryptoMbSharedKeyProvider;

/// Считает уведомления и будит ожидающую задачу
#[derive(Default)]
pub struct RecordingCallbacks {
    pub calls: Cell<usize>,
    pub notify: Notify,
}

impl RecordingCallbacks {
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl SharedKeyConnectionCallbacks for RecordingCallbacks {
    fn on_shared_key_method_complete(&self) {
        self.calls.set(self.calls.get() + 1);
        self.notify.notify_one();
    }
}

struct ManualTimerState {
    callback: TimerCallback,
    armed: Cell<Option<Duration>>,
}

struct ManualTimer(Rc<ManualTimerState>);

impl Timer for ManualTimer {
    fn enable(&self, delay: Duration) {
        self.0.armed.set(Some(delay));
    }

    fn disable(&self) {
        self.0.armed.set(None);
    }

    fn enabled(&self) -> bool {
        self.0.armed.get().is_some()
    }
}

impl Drop for ManualTimer {
    fn drop(&mut self) {
        self.0.armed.set(None);
    }
}

/// Цикл событий, которым тест управляет вручную
pub struct ManualDispatcher {
    name: String,
    posted: RefCell<VecDeque<PostedCallback>>,
    timers: RefCell<Vec<Rc<ManualTimerState>>>,
}

impl ManualDispatcher {
    pub fn new(name: &str) -> Rc<Self> {
        Rc::new(Self {
            name: name.to_string(),
            posted: RefCell::new(VecDeque::new()),
            timers: RefCell::new(Vec::new()),
        })
    }

    pub fn posted_len(&self) -> usize {
        self.posted.borrow().len()
    }

    /// Одна итерация: выполняет колбэки, отложенные до начала вызова
    pub fn run_posted(&self) -> usize {
        let ready = self.posted_len();
        for _ in 0..ready {
            let callback = self.posted.borrow_mut().pop_front();
            if let Some(callback) = callback {
                callback();
            }
        }
        ready
    }

    pub fn armed_delays(&self) -> Vec<Duration> {
        self.timers.borrow().iter().filter_map(|t| t.armed.get()).collect()
    }

    /// Срабатывают все взведённые таймеры
    pub fn fire_timers(&self) -> usize {
        let armed: Vec<_> = self
            .timers
            .borrow()
            .iter()
            .filter(|t| t.armed.get().is_some())
            .cloned()
            .collect();

        for timer in &armed {
            timer.armed.set(None);
            (timer.callback)();
        }
        armed.len()
    }
}

impl Dispatcher for ManualDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&self, callback: PostedCallback) {
        self.posted.borrow_mut().push_back(callback);
    }

    fn create_timer(&self, callback: TimerCallback) -> Box<dyn Timer> {
        let state = Rc::new(ManualTimerState {
            callback,
            armed: Cell::new(None),
        });
        self.timers.borrow_mut().push(Rc::clone(&state));
        Box::new(ManualTimer(state))
    }
}

/// Переносимый backend, у которого выбранные слоты отказывают
pub struct FaultInjectingMultiBuffer {
    inner: PortableMultiBuffer,
    failing_public_slots: AtomicU8,
    failing_shared_slots: AtomicU8,
    pub batch_calls: AtomicUsize,
}

impl FaultInjectingMultiBuffer {
    pub fn new() -> Self {
        Self {
            inner: PortableMultiBuffer::new(),
            failing_public_slots: AtomicU8::new(0),
            failing_shared_slots: AtomicU8::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_public_key_slots(&self, mask: SlotMask) {
        self.failing_public_slots.store(mask, Ordering::SeqCst);
    }

    pub fn fail_shared_key_slots(&self, mask: SlotMask) {
        self.failing_shared_slots.store(mask, Ordering::SeqCst);
    }

    /// Количество пар вызовов (публичный ключ + ECDH)
    pub fn batches(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn public_mask(&self, status: SlotMask) -> SlotMask {
        status & !self.failing_public_slots.load(Ordering::SeqCst)
    }

    fn shared_mask(&self, status: SlotMask) -> SlotMask {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        status & !self.failing_shared_slots.load(Ordering::SeqCst)
    }
}

impl MultiBufferCrypto for FaultInjectingMultiBuffer {
    fn name(&self) -> &'static str {
        "fault-injecting"
    }

    fn is_applicable(&self) -> bool {
        true
    }

    fn x25519_public_key_mb8(&self, public_keys: &mut [[u8; 32]], private_keys: &[[u8; 32]]) -> SlotMask {
        let status = self.inner.x25519_public_key_mb8(public_keys, private_keys);
        self.public_mask(status)
    }

    fn x25519_mb8(
        &self,
        shared_keys: &mut [[u8; 32]],
        private_keys: &[[u8; 32]],
        peer_keys: &[[u8; 32]],
    ) -> SlotMask {
        let status = self.inner.x25519_mb8(shared_keys, private_keys, peer_keys);
        self.shared_mask(status)
    }

    fn p256_public_key_mb8(
        &self,
        public_x: &mut [Vec<u8>],
        public_y: &mut [Vec<u8>],
        private_keys: &[[u8; 32]],
    ) -> SlotMask {
        let status = self.inner.p256_public_key_mb8(public_x, public_y, private_keys);
        self.public_mask(status)
    }

    fn p256_ecdh_mb8(
        &self,
        shared_keys: &mut [[u8; 32]],
        private_keys: &[[u8; 32]],
        peer_x: &[[u8; 32]],
        peer_y: &[[u8; 32]],
    ) -> SlotMask {
        let status = self.inner.p256_ecdh_mb8(shared_keys, private_keys, peer_x, peer_y);
        self.shared_mask(status)
    }
}

/// Backend без нужных инструкций CPU
pub struct UnavailableMultiBuffer;

impl MultiBufferCrypto for UnavailableMultiBuffer {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn is_applicable(&self) -> bool {
        false
    }

    fn x25519_public_key_mb8(&self, _: &mut [[u8; 32]], _: &[[u8; 32]]) -> SlotMask {
        0
    }

    fn x25519_mb8(&self, _: &mut [[u8; 32]], _: &[[u8; 32]], _: &[[u8; 32]]) -> SlotMask {
        0
    }

    fn p256_public_key_mb8(&self, _: &mut [Vec<u8>], _: &mut [Vec<u8>], _: &[[u8; 32]]) -> SlotMask {
        0
    }

    fn p256_ecdh_mb8(&self, _: &mut [[u8; 32]], _: &[[u8; 32]], _: &[[u8; 32]], _: &[[u8; 32]]) -> SlotMask {
        0
    }
}

pub fn portable_provider() -> CryptoMbSharedKeyProvider {
    CryptoMbSharedKeyProvider::new(&CryptoMbConfig::test_config(), Arc::new(PortableMultiBuffer::new()))
        .expect("portable backend is always applicable")
}

pub fn faulty_provider() -> (CryptoMbSharedKeyProvider, Arc<FaultInjectingMultiBuffer>) {
    let crypto = Arc::new(FaultInjectingMultiBuffer::new());
    let provider = CryptoMbSharedKeyProvider::new(&CryptoMbConfig::test_config(), crypto.clone())
        .expect("fault injecting backend is applicable");
    (provider, crypto)
}

/// Регистрирует соединения `0..count` с собственными колбэками
pub fn register_connections(
    provider: &CryptoMbSharedKeyProvider,
    dispatcher: &Rc<dyn Dispatcher>,
    count: u64,
) -> Vec<(ConnectionId, Rc<RecordingCallbacks>)> {
    (0..count)
        .map(|n| {
            let conn = ConnectionId(n);
            let callbacks = Rc::new(RecordingCallbacks::default());
            provider
                .register(conn, callbacks.clone(), Rc::clone(dispatcher))
                .expect("fresh connection registers");
            (conn, callbacks)
        })
        .collect()
}
