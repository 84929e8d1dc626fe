use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use crate::core::event::dispatcher::{Dispatcher, Timer};
use crate::core::protocol::acceleration::multi_buffer::{
    slot_succeeded, MultiBufferCryptoRef, SlotMask, MULTIBUFF_BATCH,
};
use super::context::RequestContext;
use super::stats::CryptoMbStats;
use super::types::{Algorithm, RequestStatus};

/// Очередь запросов одного алгоритма на одном рабочем потоке.
///
/// Батч обрабатывается, когда набирается `MULTIBUFF_BATCH` запросов или когда
/// срабатывает таймер, взведённый первым запросом в пустой очереди.
pub struct BatchQueue {
    algorithm: Algorithm,
    poll_delay: Duration,
    crypto: MultiBufferCryptoRef,
    stats: Arc<CryptoMbStats>,
    request_queue: RefCell<Vec<Rc<RequestContext>>>,
    timer: Box<dyn Timer>,
}

impl BatchQueue {
    pub fn new(
        algorithm: Algorithm,
        poll_delay: Duration,
        crypto: MultiBufferCryptoRef,
        stats: Arc<CryptoMbStats>,
        dispatcher: &dyn Dispatcher,
    ) -> Rc<Self> {
        Rc::new_cyclic(|weak: &Weak<BatchQueue>| {
            let weak = weak.clone();
            let timer = dispatcher.create_timer(Rc::new(move || {
                if let Some(queue) = weak.upgrade() {
                    trace!("{} poll timer expired", queue.algorithm);
                    queue.process_requests();
                }
            }));

            Self {
                algorithm,
                poll_delay,
                crypto,
                stats,
                request_queue: RefCell::new(Vec::with_capacity(MULTIBUFF_BATCH)),
                timer,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.request_queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.request_queue.borrow().is_empty()
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.enabled()
    }

    pub fn enqueue(&self, ctx: Rc<RequestContext>) {
        let len = {
            let mut queue = self.request_queue.borrow_mut();
            queue.push(ctx);
            queue.len()
        };

        if len >= MULTIBUFF_BATCH {
            self.timer.disable();
            self.process_requests();
        } else if len == 1 {
            self.timer.enable(self.poll_delay);
        }
    }

    /// Обрабатывает всё, что накопилось в очереди, одним multi-buffer батчем
    pub fn process_requests(&self) {
        self.timer.disable();

        let batch = std::mem::take(&mut *self.request_queue.borrow_mut());
        if batch.is_empty() {
            return;
        }

        self.stats.queue_sizes(self.algorithm).record(batch.len());

        let statuses = match self.algorithm {
            Algorithm::X25519 => self.process_x25519(&batch),
            Algorithm::P256 => self.process_p256(&batch),
        };

        let failed = statuses.iter().filter(|s| **s == RequestStatus::Error).count();
        debug!("{} batch processed: {} requests, {} failed", self.algorithm, batch.len(), failed);
        if failed > 0 {
            warn!("{} {} of {} slots failed", self.algorithm, failed, batch.len());
        }

        for (ctx, status) in batch.iter().zip(statuses) {
            ctx.schedule_callback(status);
        }
    }

    fn process_x25519(&self, batch: &[Rc<RequestContext>]) -> Vec<RequestStatus> {
        let n = batch.len();
        let mut private_keys = Zeroizing::new([[0u8; 32]; MULTIBUFF_BATCH]);
        let mut peer_keys = [[0u8; 32]; MULTIBUFF_BATCH];
        let mut loaded: SlotMask = 0;

        for (slot, ctx) in batch.iter().enumerate() {
            if ctx.load_x25519_slot(&mut private_keys[slot], &mut peer_keys[slot]) {
                loaded |= 1u8 << slot;
            }
        }

        let mut public_keys = [[0u8; 32]; MULTIBUFF_BATCH];
        let public_status = self
            .crypto
            .x25519_public_key_mb8(&mut public_keys[..n], &private_keys[..n]);

        let mut shared_keys = Zeroizing::new([[0u8; 32]; MULTIBUFF_BATCH]);
        let shared_status = self
            .crypto
            .x25519_mb8(&mut shared_keys[..n], &private_keys[..n], &peer_keys[..n]);

        let ok = loaded & public_status & shared_status;
        batch
            .iter()
            .enumerate()
            .map(|(slot, ctx)| {
                if slot_succeeded(ok, slot) {
                    ctx.store_x25519_output(&public_keys[slot], &shared_keys[slot]);
                    RequestStatus::Success
                } else {
                    trace!("X25519 slot {} failed", slot);
                    RequestStatus::Error
                }
            })
            .collect()
    }

    fn process_p256(&self, batch: &[Rc<RequestContext>]) -> Vec<RequestStatus> {
        let n = batch.len();
        let mut private_keys = Zeroizing::new([[0u8; 32]; MULTIBUFF_BATCH]);
        let mut peer_x = [[0u8; 32]; MULTIBUFF_BATCH];
        let mut peer_y = [[0u8; 32]; MULTIBUFF_BATCH];
        let mut loaded: SlotMask = 0;

        for (slot, ctx) in batch.iter().enumerate() {
            if ctx.load_p256_slot(&mut private_keys[slot], &mut peer_x[slot], &mut peer_y[slot]) {
                loaded |= 1u8 << slot;
            }
        }

        let mut public_x = vec![Vec::new(); n];
        let mut public_y = vec![Vec::new(); n];
        let public_status = self
            .crypto
            .p256_public_key_mb8(&mut public_x, &mut public_y, &private_keys[..n]);

        let mut shared_keys = Zeroizing::new([[0u8; 32]; MULTIBUFF_BATCH]);
        let shared_status = self.crypto.p256_ecdh_mb8(
            &mut shared_keys[..n],
            &private_keys[..n],
            &peer_x[..n],
            &peer_y[..n],
        );

        let ok = loaded & public_status & shared_status;
        batch
            .iter()
            .zip(public_x.into_iter().zip(public_y))
            .enumerate()
            .map(|(slot, (ctx, (x, y)))| {
                if slot_succeeded(ok, slot) {
                    ctx.store_p256_output(x, y, &shared_keys[slot]);
                    RequestStatus::Success
                } else {
                    trace!("P-256 slot {} failed", slot);
                    RequestStatus::Error
                }
            })
            .collect()
    }
}

impl Drop for BatchQueue {
    fn drop(&mut self) {
        let pending = self.request_queue.get_mut().len();
        if pending > 0 {
            debug!("{} queue dropped with {} pending requests", self.algorithm, pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::event::dispatcher::LocalDispatcher;
    use crate::core::protocol::acceleration::portable::PortableMultiBuffer;
    use crate::core::protocol::shared_key::connection::SharedKeyConnectionCallbacks;
    use crate::core::protocol::acceleration::reference::ReferencePeer;
    use tokio::task::LocalSet;

    struct NoopCallbacks;

    impl SharedKeyConnectionCallbacks for NoopCallbacks {
        fn on_shared_key_method_complete(&self) {}
    }

    fn queue(algorithm: Algorithm, dispatcher: &Rc<dyn Dispatcher>) -> (Rc<BatchQueue>, Arc<CryptoMbStats>) {
        let stats = Arc::new(CryptoMbStats::new("cryptomb"));
        let queue = BatchQueue::new(
            algorithm,
            Duration::from_millis(200),
            Arc::new(PortableMultiBuffer::new()),
            stats.clone(),
            dispatcher.as_ref(),
        );
        (queue, stats)
    }

    fn request(algorithm: Algorithm, dispatcher: &Rc<dyn Dispatcher>) -> Rc<RequestContext> {
        let ctx = Rc::new(RequestContext::new(algorithm, dispatcher.clone(), Rc::new(NoopCallbacks)));
        ctx.init(&ReferencePeer::generate(algorithm).public_key()).unwrap();
        ctx
    }

    // Часы на паузе: пока есть готовые задачи, время не сдвигается
    async fn next_iteration() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn first_request_arms_timer() {
        LocalSet::new().run_until(async {
            let dispatcher: Rc<dyn Dispatcher> = Rc::new(LocalDispatcher::new("worker_0"));
            let (queue, _) = queue(Algorithm::X25519, &dispatcher);

            queue.enqueue(request(Algorithm::X25519, &dispatcher));
            assert_eq!(queue.len(), 1);
            assert!(queue.timer_armed());

            queue.enqueue(request(Algorithm::X25519, &dispatcher));
            assert_eq!(queue.len(), 2);
            assert!(queue.timer_armed());
        }).await;
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_flushes_synchronously() {
        LocalSet::new().run_until(async {
            let dispatcher: Rc<dyn Dispatcher> = Rc::new(LocalDispatcher::new("worker_0"));
            let (queue, stats) = queue(Algorithm::P256, &dispatcher);

            let requests: Vec<_> = (0..MULTIBUFF_BATCH)
                .map(|_| request(Algorithm::P256, &dispatcher))
                .collect();
            for ctx in &requests {
                queue.enqueue(ctx.clone());
            }

            assert!(queue.is_empty());
            assert!(!queue.timer_armed());
            assert_eq!(stats.p256_queue_sizes.snapshot()[MULTIBUFF_BATCH], 1);
            // Статус появляется только на следующей итерации
            assert!(requests.iter().all(|c| c.status() == RequestStatus::Retry));

            next_iteration().await;
            assert!(requests.iter().all(|c| c.status() == RequestStatus::Success));
        }).await;
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_partial_batch() {
        LocalSet::new().run_until(async {
            let dispatcher: Rc<dyn Dispatcher> = Rc::new(LocalDispatcher::new("worker_0"));
            let (queue, stats) = queue(Algorithm::X25519, &dispatcher);

            let ctx = request(Algorithm::X25519, &dispatcher);
            queue.enqueue(ctx.clone());

            tokio::time::sleep(Duration::from_millis(199)).await;
            assert_eq!(queue.len(), 1);

            tokio::time::sleep(Duration::from_millis(2)).await;
            next_iteration().await;
            assert!(queue.is_empty());
            assert!(!queue.timer_armed());
            assert_eq!(stats.x25519_queue_sizes.snapshot()[1], 1);
            assert_eq!(ctx.status(), RequestStatus::Success);
            assert_eq!(ctx.output().unwrap().secret.len(), 32);
        }).await;
    }

    #[tokio::test(start_paused = true)]
    async fn uninitialized_context_fails_its_slot_only() {
        LocalSet::new().run_until(async {
            let dispatcher: Rc<dyn Dispatcher> = Rc::new(LocalDispatcher::new("worker_0"));
            let (queue, _) = queue(Algorithm::X25519, &dispatcher);

            let good = request(Algorithm::X25519, &dispatcher);
            let bad = Rc::new(RequestContext::new(Algorithm::X25519, dispatcher.clone(), Rc::new(NoopCallbacks)));
            queue.enqueue(good.clone());
            queue.enqueue(bad.clone());
            queue.process_requests();

            next_iteration().await;
            assert_eq!(good.status(), RequestStatus::Success);
            assert_eq!(bad.status(), RequestStatus::Error);
        }).await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_flush_records_nothing() {
        LocalSet::new().run_until(async {
            let dispatcher: Rc<dyn Dispatcher> = Rc::new(LocalDispatcher::new("worker_0"));
            let (queue, stats) = queue(Algorithm::X25519, &dispatcher);
            queue.process_requests();
            assert_eq!(stats.x25519_queue_sizes.total_flushes(), 0);
        }).await;
    }
}
