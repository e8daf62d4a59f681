//! 状态槽位的合并函数集合。
//!
//! 并行 fan-out 的安全性完全建立在这组 reducer 的交换律与结合律之上：
//! 兄弟节点的输出以任意顺序合并都必须得到同一个状态。
//! reducer 与槽位的对应关系以数据形式写在 [`STATE_REDUCERS`]，
//! `ResearchState::apply` 逐字段执行该表。

use std::collections::BTreeMap;

use crate::state::{AgentOutput, SearchHit, SourceRecord};

/// 固定的 reducer 种类。不要为新槽位发明新的合并语义，先从这里挑。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    /// 追加并按 URL 去重（先到者保留）。
    AppendDedupeByUrl,
    /// 按 key 合并，同 key 后到者覆盖。
    KeyMerge,
    /// 数值求和。
    NumericSum,
    /// 取最大值。
    Max,
    /// 后到者覆盖。
    LastWins,
    /// 顺序追加。
    Append,
    /// 并集（去重追加）。
    Union,
}

/// 槽位 → reducer 对照表。与 `ResearchState` 字段一一对应；
/// 测试断言两边不会漂移。
pub const STATE_REDUCERS: &[(&str, Reducer)] = &[
    ("company_name", Reducer::LastWins),
    ("depth", Reducer::LastWins),
    ("queries", Reducer::Union),
    ("search_results", Reducer::AppendDedupeByUrl),
    ("sources", Reducer::AppendDedupeByUrl),
    ("research_data", Reducer::KeyMerge),
    ("agent_outputs", Reducer::KeyMerge),
    ("quality_score", Reducer::LastWins),
    ("gate", Reducer::LastWins),
    ("quality_report", Reducer::LastWins),
    ("iteration_count", Reducer::Max),
    ("total_cost", Reducer::NumericSum),
    ("total_tokens", Reducer::NumericSum),
    ("errors", Reducer::Append),
    ("gaps_detected", Reducer::Union),
    ("retry_strategies", Reducer::Union),
    ("providers_used", Reducer::Union),
    ("report", Reducer::LastWins),
];

pub fn append_dedupe_hits(existing: &mut Vec<SearchHit>, incoming: Vec<SearchHit>) {
    for hit in incoming {
        if !existing.iter().any(|h| h.url == hit.url) {
            existing.push(hit);
        }
    }
}

pub fn append_dedupe_sources(existing: &mut Vec<SourceRecord>, incoming: Vec<SourceRecord>) {
    for source in incoming {
        if !existing.iter().any(|s| s.url == source.url) {
            existing.push(source);
        }
    }
}

pub fn key_merge(existing: &mut BTreeMap<String, String>, incoming: BTreeMap<String, String>) {
    for (key, value) in incoming {
        existing.insert(key, value);
    }
}

/// agent_outputs 的 key-merge：同名 agent 重跑覆盖旧值，
/// 并行的不同 agent 互不干扰。
pub fn merge_agent_outputs(
    existing: &mut BTreeMap<String, AgentOutput>,
    incoming: Vec<AgentOutput>,
) {
    for output in incoming {
        existing.insert(output.agent.clone(), output);
    }
}

pub fn sum_assign(slot: &mut f64, value: f64) {
    debug_assert!(value >= 0.0, "cost deltas must be non-negative");
    *slot += value.max(0.0);
}

pub fn max_assign(slot: &mut u32, value: Option<u32>) {
    if let Some(v) = value {
        *slot = (*slot).max(v);
    }
}

pub fn last_wins(slot: &mut f64, value: Option<f64>) {
    if let Some(v) = value {
        *slot = v;
    }
}

pub fn last_wins_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

pub fn union_dedupe<T: PartialEq>(existing: &mut Vec<T>, incoming: Vec<T>) {
    for item in incoming {
        if !existing.contains(&item) {
            existing.push(item);
        }
    }
}
