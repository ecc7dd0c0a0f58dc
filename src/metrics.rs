//! Lightweight per-instance metrics for the voting cache.
//!
//! Атомарные счётчики без глобального состояния: экземпляр CacheMetrics
//! передаётся в хранилища и оркестратор через Arc, поэтому параллельные
//! тесты не мешают друг другу.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CacheMetrics {
    // ----- ArtifactStore -----
    saves: AtomicU64,
    saved_bytes: AtomicU64,
    load_hits: AtomicU64,
    load_misses: AtomicU64,
    integrity_failures: AtomicU64,
    compat_rejections: AtomicU64,

    // ----- Orchestrator -----
    tree_cache_hits: AtomicU64,
    snapshot_cache_hits: AtomicU64,
    cold_generations: AtomicU64,
    degraded_steps: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    // ArtifactStore
    pub saves: u64,
    pub saved_bytes: u64,
    pub load_hits: u64,
    pub load_misses: u64,
    pub integrity_failures: u64,
    pub compat_rejections: u64,

    // Orchestrator
    pub tree_cache_hits: u64,
    pub snapshot_cache_hits: u64,
    pub cold_generations: u64,
    pub degraded_steps: u64,
}

impl MetricsSnapshot {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.load_hits + self.load_misses;
        if total == 0 {
            0.0
        } else {
            self.load_hits as f64 / total as f64
        }
    }
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_save(&self, bytes: u64) {
        self.saves.fetch_add(1, Ordering::Relaxed);
        self.saved_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_hit(&self) {
        self.load_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.load_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_integrity_failure(&self) {
        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_compat_rejection(&self) {
        self.compat_rejections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tree_cache_hit(&self) {
        self.tree_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_snapshot_cache_hit(&self) {
        self.snapshot_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cold_generation(&self) {
        self.cold_generations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_degraded_step(&self) {
        self.degraded_steps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            saves: self.saves.load(Ordering::Relaxed),
            saved_bytes: self.saved_bytes.load(Ordering::Relaxed),
            load_hits: self.load_hits.load(Ordering::Relaxed),
            load_misses: self.load_misses.load(Ordering::Relaxed),
            integrity_failures: self.integrity_failures.load(Ordering::Relaxed),
            compat_rejections: self.compat_rejections.load(Ordering::Relaxed),
            tree_cache_hits: self.tree_cache_hits.load(Ordering::Relaxed),
            snapshot_cache_hits: self.snapshot_cache_hits.load(Ordering::Relaxed),
            cold_generations: self.cold_generations.load(Ordering::Relaxed),
            degraded_steps: self.degraded_steps.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for c in [
            &self.saves,
            &self.saved_bytes,
            &self.load_hits,
            &self.load_misses,
            &self.integrity_failures,
            &self.compat_rejections,
            &self.tree_cache_hits,
            &self.snapshot_cache_hits,
            &self.cold_generations,
            &self.degraded_steps,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}
