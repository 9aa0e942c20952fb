//! 带过期时间的键值存储
//!
//! 结果缓存与门面的活跃运行表共用这一窄接口：put / get / delete / sweep_expired。
//! 读多写少，用 tokio RwLock 保护；同一 key 并发写入以最后一次为准。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }
}

/// 内存 TTL 存储；ttl 为 None 表示永不过期
pub struct TtlStore<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V> Default for TtlStore<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone + Send + Sync> TtlStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let entry = Entry {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// 读取未过期的值；过期条目视为不存在（由 sweep_expired 统一回收）
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let guard = self.entries.read().await;
        guard
            .get(key)
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    pub async fn delete(&self, key: &str) -> Option<V> {
        self.entries.write().await.remove(key).map(|e| e.value)
    }

    /// 删除所有以 prefix 开头的键，返回删除条数
    pub async fn delete_prefix(&self, prefix: &str) -> usize {
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|k, _| !k.starts_with(prefix));
        before - guard.len()
    }

    /// 清理过期条目，返回清理条数
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.entries.write().await;
        let before = guard.len();
        guard.retain(|_, e| !e.is_expired(now));
        let removed = before - guard.len();
        if removed > 0 {
            tracing::debug!(removed, "swept expired store entries");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store: TtlStore<String> = TtlStore::new();
        store.put("a", "1".to_string(), None).await;
        assert_eq!(store.get("a").await.as_deref(), Some("1"));
        assert_eq!(store.delete("a").await.as_deref(), Some("1"));
        assert!(store.get("a").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_invisible_and_swept() {
        let store: TtlStore<u32> = TtlStore::new();
        store.put("short", 1, Some(Duration::from_millis(10))).await;
        store.put("long", 2, None).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.get("short").await.is_none());
        assert_eq!(store.get("long").await, Some(2));
        assert_eq!(store.sweep_expired().await, 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let store: TtlStore<u32> = TtlStore::new();
        store.put("tool:cache:echo:1", 1, None).await;
        store.put("tool:cache:echo:2", 2, None).await;
        store.put("tool:cache:search:1", 3, None).await;
        assert_eq!(store.delete_prefix("tool:cache:echo:").await, 2);
        assert_eq!(store.len().await, 1);
    }
}
