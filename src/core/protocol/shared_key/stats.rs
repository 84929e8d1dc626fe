use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::core::protocol::acceleration::multi_buffer::MULTIBUFF_BATCH;
use super::types::Algorithm;

/// Гистограмма размеров обработанных батчей (0..=8)
#[derive(Debug)]
pub struct QueueSizeHistogram {
    buckets: [AtomicU64; MULTIBUFF_BATCH + 1],
}

impl QueueSizeHistogram {
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    pub fn record(&self, batch_size: usize) {
        let bucket = batch_size.min(MULTIBUFF_BATCH);
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> [u64; MULTIBUFF_BATCH + 1] {
        std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed))
    }

    /// Количество обработанных батчей
    pub fn total_flushes(&self) -> u64 {
        self.snapshot().iter().sum()
    }

    /// Количество запросов, прошедших через батчи
    pub fn total_requests(&self) -> u64 {
        self.snapshot()
            .iter()
            .enumerate()
            .map(|(size, count)| size as u64 * count)
            .sum()
    }

    pub fn avg_batch_size(&self) -> f64 {
        let flushes = self.total_flushes();
        if flushes == 0 {
            return 0.0;
        }
        self.total_requests() as f64 / flushes as f64
    }
}

impl Default for QueueSizeHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Статистика провайдера, общая для всех рабочих потоков
#[derive(Debug)]
pub struct CryptoMbStats {
    prefix: String,
    pub x25519_queue_sizes: QueueSizeHistogram,
    pub p256_queue_sizes: QueueSizeHistogram,
}

impl CryptoMbStats {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            x25519_queue_sizes: QueueSizeHistogram::new(),
            p256_queue_sizes: QueueSizeHistogram::new(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn queue_sizes(&self, algorithm: Algorithm) -> &QueueSizeHistogram {
        match algorithm {
            Algorithm::X25519 => &self.x25519_queue_sizes,
            Algorithm::P256 => &self.p256_queue_sizes,
        }
    }

    pub fn log_summary(&self) {
        info!("📊 {} stats:", self.prefix);
        for algorithm in [Algorithm::X25519, Algorithm::P256] {
            let sizes = self.queue_sizes(algorithm);
            info!("  - {} batches: {}, requests: {}, avg batch size: {:.2}, histogram: {:?}",
                  algorithm,
                  sizes.total_flushes(),
                  sizes.total_requests(),
                  sizes.avg_batch_size(),
                  sizes.snapshot());
        }
    }
}
