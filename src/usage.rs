//! 进程/会话级别的用量统计
//!
//! `UsageTracker` 按 handle 以及调用方提供的逻辑会话 id 累加 [`TokenUsage`]。与
//! `ResponseCache` 一样,采用单写者 actor 风格,用 `tokio::sync::Mutex` 守护内部表,
//! 与本 crate 既有的共享可变状态风格(`Arc<dyn LLMProvider>`)保持一致。
//!
//! 统计只保存在内存中,进程退出即丢失,不做持久化——这是一个库而不是服务,持久化
//! 应由调用方在自己的进程里决定。

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::types::TokenUsage;

/// 某个 handle 或会话下累计的用量总和。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
    /// 累加过的 `record` 调用次数。
    pub calls: u64,
}

impl UsageTotals {
    fn add(&mut self, usage: &TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens.unwrap_or(0);
        self.completion_tokens += usage.completion_tokens.unwrap_or(0);
        self.reasoning_tokens += usage.reasoning_tokens.unwrap_or(0);
        self.total_tokens += usage.total_tokens.unwrap_or(0);
        self.calls += 1;
    }
}

/// 某一时刻的用量快照,目前字段与 [`UsageTotals`] 相同,单独建模是为了不把内部
/// 累加状态的表示和对外暴露的只读视图耦合在一起。
pub type UsageSnapshot = UsageTotals;

struct UsageState {
    by_handle: HashMap<String, UsageTotals>,
    by_session: HashMap<String, UsageTotals>,
}

/// 跟踪按 provider handle、以及可选逻辑会话 id 分组的累计 token 用量。
pub struct UsageTracker {
    state: Mutex<UsageState>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(UsageState {
                by_handle: HashMap::new(),
                by_session: HashMap::new(),
            }),
        }
    }

    /// 记录一次调用的用量,累加到该 handle 下,若提供了 `session` 也同时累加到该会话下。
    pub async fn record(&self, handle: &str, session: Option<&str>, usage: &TokenUsage) {
        let mut state = self.state.lock().await;
        state
            .by_handle
            .entry(handle.to_string())
            .or_default()
            .add(usage);
        if let Some(session) = session {
            state
                .by_session
                .entry(session.to_string())
                .or_default()
                .add(usage);
        }
    }

    /// 返回某个 handle 的累计用量快照,若从未记录过返回全零快照。
    pub async fn snapshot(&self, handle: &str) -> UsageSnapshot {
        let state = self.state.lock().await;
        state.by_handle.get(handle).copied().unwrap_or_default()
    }

    /// 返回某个逻辑会话的累计用量快照,若从未记录过返回全零快照。
    pub async fn session_snapshot(&self, session: &str) -> UsageSnapshot {
        let state = self.state.lock().await;
        state.by_session.get(session).copied().unwrap_or_default()
    }

    /// 清空所有累计数据。
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.by_handle.clear();
        state.by_session.clear();
    }
}
