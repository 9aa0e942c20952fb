//! 工具结果缓存
//!
//! 缓存键 = `tool:cache:{tool}:{sha256(规范化参数 JSON) 前 16 位十六进制}`，
//! 规范化时对象键递归排序，因此与参数字段顺序无关。只缓存成功结果。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::core::TtlStore;
use crate::tools::schema::ToolArgs;
use crate::tools::ToolOutput;

const KEY_PREFIX: &str = "tool:cache:";

/// 缓存命中统计
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// 结果缓存接口
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, tool: &str, args: &ToolArgs) -> Option<ToolOutput>;

    async fn set(&self, tool: &str, args: &ToolArgs, output: &ToolOutput, ttl: Duration);

    /// 清除某个工具的全部缓存，返回条数
    async fn clear_tool(&self, tool: &str) -> usize;

    fn stats(&self) -> CacheStats;
}

/// 参数的规范化 JSON：对象键递归排序
pub fn canonical_json(value: &Value) -> String {
    fn canonicalize(v: &Value) -> Value {
        match v {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = serde_json::Map::new();
                for k in keys {
                    out.insert(k.clone(), canonicalize(&map[k]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }
    canonicalize(value).to_string()
}

pub fn cache_key(tool: &str, args: &ToolArgs) -> String {
    let digest = Sha256::digest(canonical_json(&args.to_value()).as_bytes());
    let hash = hex::encode(digest);
    format!("{}{}:{}", KEY_PREFIX, tool, &hash[..16])
}

/// 基于 TtlStore 的内存缓存
#[derive(Default)]
pub struct InMemoryResultCache {
    store: TtlStore<ToolOutput>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 清理过期条目
    pub async fn sweep_expired(&self) -> usize {
        self.store.sweep_expired().await
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, tool: &str, args: &ToolArgs) -> Option<ToolOutput> {
        let hit = self.store.get(&cache_key(tool, args)).await;
        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    async fn set(&self, tool: &str, args: &ToolArgs, output: &ToolOutput, ttl: Duration) {
        if !output.success {
            return;
        }
        self.store
            .put(cache_key(tool, args), output.clone(), Some(ttl))
            .await;
    }

    async fn clear_tool(&self, tool: &str) -> usize {
        self.store
            .delete_prefix(&format!("{}{}:", KEY_PREFIX, tool))
            .await
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_independent_of_field_order() {
        let a = ToolArgs::from_value(json!({"a": 1, "b": {"y": 2, "x": 1}})).unwrap();
        let b = ToolArgs::from_value(json!({"b": {"x": 1, "y": 2}, "a": 1})).unwrap();
        assert_eq!(cache_key("t", &a), cache_key("t", &b));

        let key = cache_key("t", &a);
        assert!(key.starts_with("tool:cache:t:"));
        assert_eq!(key.len(), "tool:cache:t:".len() + 16);
    }

    #[test]
    fn test_cache_key_differs_by_tool_and_args() {
        let a = ToolArgs::new().with("q", "x");
        let b = ToolArgs::new().with("q", "y");
        assert_ne!(cache_key("t", &a), cache_key("t", &b));
        assert_ne!(cache_key("t", &a), cache_key("u", &a));
    }

    #[tokio::test]
    async fn test_only_success_is_cached() {
        let cache = InMemoryResultCache::new();
        let args = ToolArgs::new().with("q", "x");
        let ttl = Duration::from_secs(60);

        cache
            .set("t", &args, &ToolOutput::failed("nope", Default::default()), ttl)
            .await;
        assert!(cache.get("t", &args).await.is_none());

        cache.set("t", &args, &ToolOutput::ok("yes"), ttl).await;
        assert_eq!(cache.get("t", &args).await.map(|o| o.message).as_deref(), Some("yes"));

        let stats = cache.stats();
        assert_eq!(stats, CacheStats { hits: 1, misses: 1 });
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_clear_tool() {
        let cache = InMemoryResultCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("t", &ToolArgs::new().with("q", 1), &ToolOutput::ok("1"), ttl).await;
        cache.set("t", &ToolArgs::new().with("q", 2), &ToolOutput::ok("2"), ttl).await;
        cache.set("tt", &ToolArgs::new(), &ToolOutput::ok("3"), ttl).await;
        assert_eq!(cache.clear_tool("t").await, 2);
        assert!(cache.get("tt", &ToolArgs::new()).await.is_some());
    }
}
