use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use tokio::sync::Notify;
use tokio::task::LocalSet;
use tracing::{error, info, warn};

use cryptomb_kex::config::AppConfig;
use cryptomb_kex::core::event::dispatcher::{Dispatcher, LocalDispatcher};
use cryptomb_kex::core::monitoring::logger::init_logging;
use cryptomb_kex::core::protocol::acceleration::features::CpuFeatures;
use cryptomb_kex::core::protocol::acceleration::portable::PortableMultiBuffer;
use cryptomb_kex::core::protocol::acceleration::reference::ReferencePeer;
use cryptomb_kex::core::protocol::shared_key::connection::{ConnectionId, SharedKeyConnectionCallbacks};
use cryptomb_kex::core::protocol::shared_key::provider::CryptoMbSharedKeyProvider;
use cryptomb_kex::core::protocol::shared_key::types::{Algorithm, AsyncStatus, Completion};

/// Будит задачу рукопожатия, когда провайдер сообщает о готовности
struct NotifyOnComplete(Rc<Notify>);

impl SharedKeyConnectionCallbacks for NotifyOnComplete {
    fn on_shared_key_method_complete(&self) {
        self.0.notify_one();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandshakeOutcome {
    Verified,
    Mismatch,
    Failed,
}

#[derive(Debug, Default)]
struct WorkerReport {
    handshakes: usize,
    verified: usize,
    mismatched: usize,
    failed: usize,
}

impl WorkerReport {
    fn record(&mut self, outcome: HandshakeOutcome) {
        self.handshakes += 1;
        match outcome {
            HandshakeOutcome::Verified => self.verified += 1,
            HandshakeOutcome::Mismatch => self.mismatched += 1,
            HandshakeOutcome::Failed => self.failed += 1,
        }
    }

    fn merge(&mut self, other: &WorkerReport) {
        self.handshakes += other.handshakes;
        self.verified += other.verified;
        self.mismatched += other.mismatched;
        self.failed += other.failed;
    }
}

fn main() -> Result<()> {
    let app_config = AppConfig::from_env();
    init_logging(&app_config.log_level);

    if let Err(e) = app_config.validate() {
        error!("❌ Invalid configuration: {}", e);
        return Err(e).context("invalid configuration");
    }

    info!("🚀 Starting CryptoMb key exchange host...");
    info!("📝 Configuration loaded:");
    info!("  - Worker threads: {}", app_config.worker_threads);
    info!("  - Connections per worker: {}", app_config.connections_per_worker);
    info!("  - Poll delay: {}ms", app_config.cryptomb.poll_delay_ms);
    info!("  - Require AVX-512: {}", app_config.require_avx512);
    info!("  - Log level: {}", app_config.log_level);

    let provider = Arc::new(CryptoMbSharedKeyProvider::new(
        &app_config.cryptomb,
        Arc::new(PortableMultiBuffer::with_features(
            CpuFeatures::detect(),
            app_config.require_avx512,
        )),
    )?);

    let started = Instant::now();
    let mut workers = Vec::with_capacity(app_config.worker_threads);
    for index in 0..app_config.worker_threads {
        let provider = Arc::clone(&provider);
        let connections = app_config.connections_per_worker;
        let handle = thread::Builder::new()
            .name(format!("worker_{}", index))
            .spawn(move || run_worker(index, provider, connections))
            .context("failed to spawn worker thread")?;
        workers.push(handle);
    }

    let mut total = WorkerReport::default();
    for handle in workers {
        let report = handle
            .join()
            .map_err(|_| anyhow!("worker thread panicked"))??;
        total.merge(&report);
    }

    let elapsed = started.elapsed();
    info!("✅ {} handshakes finished in {:?}", total.handshakes, elapsed);
    info!("  - Verified: {}", total.verified);
    info!("  - Mismatched: {}", total.mismatched);
    info!("  - Failed: {}", total.failed);
    provider.stats().log_summary();

    if total.mismatched > 0 || total.failed > 0 {
        warn!("⚠️ Some handshakes did not produce a verified secret");
    }

    Ok(())
}

fn run_worker(
    index: usize,
    provider: Arc<CryptoMbSharedKeyProvider>,
    connections: usize,
) -> Result<WorkerReport> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build worker runtime")?;

    let local = LocalSet::new();
    let report = local.block_on(&runtime, async move {
        let dispatcher: Rc<dyn Dispatcher> = Rc::new(LocalDispatcher::new(format!("worker_{}", index)));
        provider.initialize_thread(Rc::clone(&dispatcher));

        let mut tasks = Vec::with_capacity(connections);
        for n in 0..connections {
            let conn = ConnectionId((index * connections + n) as u64);
            let algorithm = if n % 2 == 0 { Algorithm::X25519 } else { Algorithm::P256 };
            tasks.push(tokio::task::spawn_local(run_handshake(
                Arc::clone(&provider),
                Rc::clone(&dispatcher),
                conn,
                algorithm,
            )));
        }

        let mut report = WorkerReport::default();
        for task in tasks {
            match task.await {
                Ok(Ok(outcome)) => report.record(outcome),
                Ok(Err(e)) => {
                    error!("Handshake error: {}", e);
                    report.record(HandshakeOutcome::Failed);
                }
                Err(e) => {
                    error!("Handshake task aborted: {}", e);
                    report.record(HandshakeOutcome::Failed);
                }
            }
        }

        provider.release_thread();
        report
    });

    info!("👷 worker_{} done: {} verified of {}", index, report.verified, report.handshakes);
    Ok(report)
}

async fn run_handshake(
    provider: Arc<CryptoMbSharedKeyProvider>,
    dispatcher: Rc<dyn Dispatcher>,
    conn: ConnectionId,
    algorithm: Algorithm,
) -> Result<HandshakeOutcome> {
    let notify = Rc::new(Notify::new());
    provider.register(conn, Rc::new(NotifyOnComplete(Rc::clone(&notify))), dispatcher)?;

    let peer = ReferencePeer::generate(algorithm);
    let outcome = match provider.compute(conn, algorithm.group_id(), &peer.public_key()) {
        AsyncStatus::Retry => loop {
            notify.notified().await;
            match provider.complete(conn) {
                Completion::Retry => continue,
                Completion::Success(output) => {
                    let verified = peer
                        .agree(&output.ciphertext)
                        .map(|secret| secret == output.secret)
                        .unwrap_or(false);
                    break if verified { HandshakeOutcome::Verified } else { HandshakeOutcome::Mismatch };
                }
                Completion::Failure => break HandshakeOutcome::Failed,
            }
        },
        _ => HandshakeOutcome::Failed,
    };

    provider.unregister(conn);
    Ok(outcome)
}
