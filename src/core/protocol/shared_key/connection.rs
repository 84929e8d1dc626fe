use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::core::event::dispatcher::Dispatcher;
use super::context::RequestContext;
use super::queue::BatchQueue;
use super::types::{Algorithm, Completion, RequestStatus};

/// Уведомление соединения о том, что статус запроса изменился
/// и `complete()` стоит вызвать снова
pub trait SharedKeyConnectionCallbacks {
    fn on_shared_key_method_complete(&self);
}

/// Идентификатор TLS соединения у хоста
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Привязка соединения к провайдеру на его рабочем потоке
pub struct ConnectionBinding {
    id: ConnectionId,
    callbacks: Rc<dyn SharedKeyConnectionCallbacks>,
    dispatcher: Rc<dyn Dispatcher>,
    x25519_queue: Rc<BatchQueue>,
    p256_queue: Rc<BatchQueue>,
    current: RefCell<Option<Rc<RequestContext>>>,
}

impl ConnectionBinding {
    pub fn new(
        id: ConnectionId,
        callbacks: Rc<dyn SharedKeyConnectionCallbacks>,
        dispatcher: Rc<dyn Dispatcher>,
        x25519_queue: Rc<BatchQueue>,
        p256_queue: Rc<BatchQueue>,
    ) -> Self {
        Self {
            id,
            callbacks,
            dispatcher,
            x25519_queue,
            p256_queue,
            current: RefCell::new(None),
        }
    }

    pub fn new_context(&self, algorithm: Algorithm) -> Rc<RequestContext> {
        Rc::new(RequestContext::new(
            algorithm,
            Rc::clone(&self.dispatcher),
            Rc::clone(&self.callbacks),
        ))
    }

    /// Делает контекст текущим и ставит его в очередь своего алгоритма.
    /// Предыдущий контекст соединения (если был) отпускается.
    pub fn add_to_queue(&self, ctx: Rc<RequestContext>) {
        let queue = match ctx.algorithm() {
            Algorithm::X25519 => &self.x25519_queue,
            Algorithm::P256 => &self.p256_queue,
        };

        let previous = self.current.borrow_mut().replace(Rc::clone(&ctx));
        if let Some(previous) = previous {
            // Соединение больше не ждёт этот запрос
            previous.cancel();
            debug!("{} replaced its outstanding request context", self.id);
        }

        // Полный батч обрабатывается прямо внутри enqueue
        queue.enqueue(ctx);
    }

    pub fn current_context(&self) -> Option<Rc<RequestContext>> {
        self.current.borrow().clone()
    }

    pub fn release_context(&self) -> Option<Rc<RequestContext>> {
        self.current.borrow_mut().take()
    }

    /// Опрос результата текущего запроса.
    ///
    /// Пока статус `Retry`, ничего не меняет. Успех и ошибка отпускают контекст.
    pub fn complete(&self) -> Completion {
        let ctx = match self.current_context() {
            Some(ctx) => ctx,
            None => {
                warn!("{} polled without an outstanding shared key operation", self.id);
                return Completion::Failure;
            }
        };

        match ctx.status() {
            RequestStatus::Retry => Completion::Retry,
            RequestStatus::Error => {
                warn!("{} shared key operation failed", self.id);
                self.release_context();
                Completion::Failure
            }
            RequestStatus::Success => {
                self.release_context();
                match ctx.output() {
                    Some(output) => Completion::Success(output),
                    None => {
                        warn!("{} {} public key could not be encoded", self.id, ctx.algorithm());
                        Completion::Failure
                    }
                }
            }
        }
    }
}

impl Drop for ConnectionBinding {
    fn drop(&mut self) {
        if let Some(ctx) = self.current.get_mut().take() {
            ctx.cancel();
        }
    }
}
