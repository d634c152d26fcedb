//! 性能指标收集模块
//!
//! 查询、节点缓存与三元组写入的运行时计数

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 系统全局指标
#[derive(Debug)]
pub struct Metrics {
    /// 查询统计
    query_stats: QueryStats,
    /// 节点缓存统计
    node_cache_stats: NodeCacheStats,
    /// 三元组统计
    triple_stats: TripleStats,
    /// 启动时间
    start_time: Instant,
}

/// 查询统计
#[derive(Debug)]
struct QueryStats {
    /// 总查询数
    total_queries: AtomicU64,
    /// 失败查询数
    failed_queries: AtomicU64,
    /// 查询总耗时（微秒）
    total_duration_us: AtomicU64,
    /// 计划缓存命中数
    plan_cache_hits: AtomicU64,
}

/// 节点缓存统计
#[derive(Debug)]
struct NodeCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    /// 驱逐数
    evictions: AtomicU64,
    /// 脏节点写回数
    dirty_writes: AtomicU64,
}

/// 三元组统计
#[derive(Debug)]
struct TripleStats {
    inserted: AtomicU64,
    removed: AtomicU64,
    /// 类型迁移时重写的三元组数
    migrated: AtomicU64,
}

/// 可导出的指标快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    // 查询指标
    pub total_queries: u64,
    pub failed_queries: u64,
    pub avg_query_duration_ms: f64,
    pub plan_cache_hits: u64,

    // 节点缓存指标
    pub node_cache_hits: u64,
    pub node_cache_misses: u64,
    pub node_cache_hit_rate: f64,
    pub node_cache_evictions: u64,
    pub node_cache_dirty_writes: u64,

    // 三元组指标
    pub triples_inserted: u64,
    pub triples_removed: u64,
    pub triples_migrated: u64,

    pub uptime_seconds: u64,
}

impl Metrics {
    /// 创建新的指标收集器
    pub fn new() -> Self {
        Self {
            query_stats: QueryStats {
                total_queries: AtomicU64::new(0),
                failed_queries: AtomicU64::new(0),
                total_duration_us: AtomicU64::new(0),
                plan_cache_hits: AtomicU64::new(0),
            },
            node_cache_stats: NodeCacheStats {
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                dirty_writes: AtomicU64::new(0),
            },
            triple_stats: TripleStats {
                inserted: AtomicU64::new(0),
                removed: AtomicU64::new(0),
                migrated: AtomicU64::new(0),
            },
            start_time: Instant::now(),
        }
    }

    /// 记录查询开始
    pub fn record_query_start(&self) -> QueryTimer {
        self.query_stats.total_queries.fetch_add(1, Ordering::Relaxed);
        QueryTimer::new()
    }

    /// 记录查询完成
    pub fn record_query_complete(&self, timer: QueryTimer, success: bool) {
        if !success {
            self.query_stats.failed_queries.fetch_add(1, Ordering::Relaxed);
        }
        self.query_stats
            .total_duration_us
            .fetch_add(timer.elapsed().as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_plan_cache_hit(&self) {
        self.query_stats.plan_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_node_hit(&self) {
        self.node_cache_stats.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_node_miss(&self) {
        self.node_cache_stats.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.node_cache_stats.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dirty_write(&self) {
        self.node_cache_stats.dirty_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_triple_insert(&self) {
        self.triple_stats.inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_triple_remove(&self) {
        self.triple_stats.removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_triple_migrated(&self, count: u64) {
        self.triple_stats.migrated.fetch_add(count, Ordering::Relaxed);
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_queries = self.query_stats.total_queries.load(Ordering::Relaxed);
        let total_duration_us = self.query_stats.total_duration_us.load(Ordering::Relaxed);
        let hits = self.node_cache_stats.hits.load(Ordering::Relaxed);
        let misses = self.node_cache_stats.misses.load(Ordering::Relaxed);

        let avg_query_duration_ms = if total_queries > 0 {
            (total_duration_us as f64) / (total_queries as f64) / 1000.0
        } else {
            0.0
        };

        let hit_rate = if hits + misses > 0 {
            (hits as f64) / ((hits + misses) as f64)
        } else {
            0.0
        };

        MetricsSnapshot {
            total_queries,
            failed_queries: self.query_stats.failed_queries.load(Ordering::Relaxed),
            avg_query_duration_ms,
            plan_cache_hits: self.query_stats.plan_cache_hits.load(Ordering::Relaxed),
            node_cache_hits: hits,
            node_cache_misses: misses,
            node_cache_hit_rate: hit_rate,
            node_cache_evictions: self.node_cache_stats.evictions.load(Ordering::Relaxed),
            node_cache_dirty_writes: self.node_cache_stats.dirty_writes.load(Ordering::Relaxed),
            triples_inserted: self.triple_stats.inserted.load(Ordering::Relaxed),
            triples_removed: self.triple_stats.removed.load(Ordering::Relaxed),
            triples_migrated: self.triple_stats.migrated.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 查询计时器
pub struct QueryTimer {
    start: Instant,
}

impl QueryTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// 全局指标实例
static METRICS: once_cell::sync::Lazy<Arc<Metrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(Metrics::new()));

/// 获取全局指标实例
pub fn global_metrics() -> Arc<Metrics> {
    METRICS.clone()
}
