//! 指纹化的响应缓存
//!
//! `ResponseCache` 以请求的规范化指纹为键,缓存完整的 [`ChatResponse`]。与
//! [`crate::usage::UsageTracker`] 一样采用单写者 actor 风格,内部用
//! `tokio::sync::Mutex` 守护,淘汰策略结合 TTL、LRU 顺序与优先级。

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::types::{ChatRequest, ChatResponse};

/// 请求指纹,基于 `(handle, messages, tools, options, tool_choice, response_format)` 的
/// 规范化 JSON 视图计算得到的稳定哈希,而不是对原始序列化字符串取哈希,这样
/// `extra`/`metadata` 这类 map 字段内部的 key 顺序变化不会改变指纹。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

impl CacheKey {
    /// 为给定 handle 与请求计算指纹。
    pub fn fingerprint(handle: &str, request: &ChatRequest) -> Self {
        let canonical = canonicalize(&serde_json::json!({
            "handle": handle,
            "messages": request.messages,
            "tools": request.tools,
            "options": request.options,
            "tool_choice": request.tool_choice,
            "response_format": request.response_format,
        }));

        let mut hasher = DefaultHasher::new();
        canonical.to_string().hash(&mut hasher);
        CacheKey(hasher.finish())
    }
}

/// 把一个 `serde_json::Value` 递归转换成 key 有序的形式,使序列化结果与插入顺序无关。
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut ordered = serde_json::Map::new();
            for (k, v) in entries {
                ordered.insert(k.clone(), canonicalize(v));
            }
            Value::Object(ordered)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// 缓存条目被淘汰时使用的相对优先级,作为 recency 之外的第二判据。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CachePriority {
    Low,
    Normal,
    High,
}

struct CacheEntry {
    response: ChatResponse,
    inserted_at: Instant,
    ttl: Duration,
    priority: CachePriority,
    hits: u32,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// 缓存累计统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
}

struct CacheState {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
    stats: CacheStats,
}

/// 有容量上限的响应缓存,按 TTL + LRU + 优先级淘汰。
pub struct ResponseCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    /// 创建一个最多容纳 `capacity` 条目的缓存。
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// 查询一个键。若条目已过期,会被直接移除并计为未命中。
    pub async fn get(&self, key: &CacheKey) -> Option<ChatResponse> {
        let mut state = self.state.lock().await;
        let expired = match state.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                state.stats.misses += 1;
                return None;
            }
        };

        if expired {
            state.entries.remove(key);
            state.order.retain(|k| k != key);
            state.stats.misses += 1;
            state.stats.len = state.entries.len();
            return None;
        }

        state.stats.hits += 1;
        touch_order(&mut state.order, *key);
        let entry = state.entries.get_mut(key).expect("entry checked above");
        entry.hits += 1;
        Some(entry.response.clone())
    }

    /// 插入或覆盖一个键，必要时先淘汰腾出空间。
    pub async fn put(
        &self,
        key: CacheKey,
        response: ChatResponse,
        ttl: Duration,
        priority: CachePriority,
    ) {
        let mut state = self.state.lock().await;

        if state.entries.contains_key(&key) {
            state.order.retain(|k| *k != key);
        } else if state.entries.len() >= self.capacity {
            evict_one(&mut state);
        }

        state.entries.insert(
            key,
            CacheEntry {
                response,
                inserted_at: Instant::now(),
                ttl,
                priority,
                hits: 0,
            },
        );
        state.order.push_back(key);
        state.stats.len = state.entries.len();
    }

    /// 移除所有已过期的条目。供调用方自己用 `tokio::time::interval` 定期驱动，
    /// 本 crate 作为库不自行启动后台任务。
    pub async fn sweep(&self) {
        let mut state = self.state.lock().await;
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| *key)
            .collect();
        for key in expired {
            state.entries.remove(&key);
            state.order.retain(|k| *k != key);
        }
        state.stats.len = state.entries.len();
    }

    /// 当前累计统计。
    pub async fn stats(&self) -> CacheStats {
        self.state.lock().await.stats
    }
}

fn touch_order(order: &mut VecDeque<CacheKey>, key: CacheKey) {
    order.retain(|k| *k != key);
    order.push_back(key);
}

/// 先淘汰过期条目；若没有过期条目，淘汰 `order` 头部(最久未使用)中优先级最低的那个。
fn evict_one(state: &mut CacheState) {
    if let Some(expired_key) = state
        .order
        .iter()
        .find(|key| state.entries.get(key).is_some_and(CacheEntry::is_expired))
        .copied()
    {
        state.entries.remove(&expired_key);
        state.order.retain(|k| *k != expired_key);
        state.stats.evictions += 1;
        return;
    }

    let victim = state
        .order
        .iter()
        .copied()
        .min_by_key(|key| {
            let entry = state.entries.get(key).expect("order and entries in sync");
            (entry.priority, order_index(&state.order, *key))
        })
        .expect("cache is at capacity, so at least one entry exists");

    state.entries.remove(&victim);
    state.order.retain(|k| *k != victim);
    state.stats.evictions += 1;
}

fn order_index(order: &VecDeque<CacheKey>, key: CacheKey) -> usize {
    order.iter().position(|k| *k == key).unwrap_or(0)
}
