use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::trace;

/// Одноразовый колбэк, выполняемый на следующей итерации цикла событий
pub type PostedCallback = Box<dyn FnOnce() + 'static>;

/// Колбэк таймера (может срабатывать многократно после повторного взвода)
pub type TimerCallback = Rc<dyn Fn() + 'static>;

/// Перевзводимый одноразовый таймер, привязанный к потоку диспетчера
pub trait Timer {
    /// Взводит таймер. Уже взведённый таймер перезапускается.
    fn enable(&self, delay: Duration);

    /// Снимает таймер. Если таймер не взведён, ничего не делает.
    fn disable(&self);

    fn enabled(&self) -> bool;
}

/// Однопоточный кооперативный цикл событий рабочего потока.
///
/// Всё, что передаётся в `post`, выполняется позже, на следующей итерации
/// цикла, и никогда синхронно внутри вызова `post`.
pub trait Dispatcher {
    fn name(&self) -> &str;

    fn post(&self, callback: PostedCallback);

    fn create_timer(&self, callback: TimerCallback) -> Box<dyn Timer>;
}

/// Диспетчер поверх `tokio::task::LocalSet`.
///
/// Должен использоваться изнутри `LocalSet` (`run_until` / `block_on`),
/// иначе `spawn_local` паникует.
#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    name: String,
}

impl LocalDispatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Dispatcher for LocalDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn post(&self, callback: PostedCallback) {
        tokio::task::spawn_local(async move {
            callback();
        });
    }

    fn create_timer(&self, callback: TimerCallback) -> Box<dyn Timer> {
        Box::new(LocalTimer {
            dispatcher: self.name.clone(),
            callback,
            armed: Rc::new(RefCell::new(None)),
        })
    }
}

struct LocalTimer {
    dispatcher: String,
    callback: TimerCallback,
    armed: Rc<RefCell<Option<AbortHandle>>>,
}

impl Timer for LocalTimer {
    fn enable(&self, delay: Duration) {
        self.disable();

        let callback = Rc::clone(&self.callback);
        let armed = Rc::clone(&self.armed);
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            // Слот очищается до вызова колбэка: колбэк может снова взвести таймер
            armed.borrow_mut().take();
            callback();
        });

        trace!("Timer armed on {} for {:?}", self.dispatcher, delay);
        *self.armed.borrow_mut() = Some(handle.abort_handle());
    }

    fn disable(&self) {
        let handle = self.armed.borrow_mut().take();
        if let Some(handle) = handle {
            handle.abort();
            trace!("Timer disarmed on {}", self.dispatcher);
        }
    }

    fn enabled(&self) -> bool {
        self.armed.borrow().is_some()
    }
}

impl Drop for LocalTimer {
    fn drop(&mut self) {
        self.disable();
    }
}
