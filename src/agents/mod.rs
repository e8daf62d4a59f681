//! Agent 框架。
//!
//! 所有 agent 遵守同一个节点契约：拿到只读状态快照，返回部分更新，
//! 绝不向节点外抛错。实现分三种形态，对外形状一致：
//! - 通用 specialist（`base::run_specialist` + 各自的 prompt/解析）
//! - 纯函数节点（multilingual 查询扩展）
//! - 外部 API 增强（financial / market / competitor：先取数再综合）

pub mod analyst;
pub mod base;
pub mod brand;
pub mod competitor;
pub mod critic;
pub mod financial;
pub mod investment;
pub mod market;
pub mod multilingual;
pub mod parsing;
pub mod product;
pub mod researcher;
pub mod sales;
pub mod social;
pub mod synthesizer;

use std::sync::Arc;

use crate::{
    cache::ResearchCache,
    config::ResearchConfig,
    providers::ProviderRouter,
    state::{ResearchState, StateUpdate},
};

/// 节点执行环境：只读配置 + 共享 router/cache。
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<ResearchConfig>,
    pub router: Arc<ProviderRouter>,
    pub cache: Arc<ResearchCache>,
}

/// 全部 agent 的标签集合。orchestrator 用它做图节点分发，
/// 共享逻辑走 `base`，不做继承层次。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Researcher,
    Analyst,
    Financial,
    Market,
    Competitor,
    Brand,
    Social,
    Sales,
    Product,
    Investment,
    Critic,
    Synthesizer,
}

impl AgentKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::Analyst => "analyst",
            Self::Financial => "financial",
            Self::Market => "market",
            Self::Competitor => "competitor",
            Self::Brand => "brand",
            Self::Social => "social",
            Self::Sales => "sales",
            Self::Product => "product",
            Self::Investment => "investment",
            Self::Critic => "critic",
            Self::Synthesizer => "synthesizer",
        }
    }

    /// 执行一个 agent 节点。任何内部失败都折叠成空结果 + errors 记录。
    pub async fn run(&self, snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
        tracing::debug!(agent = self.name(), "agent node start");
        let update = match self {
            Self::Researcher => researcher::run(snapshot, ctx).await,
            Self::Analyst => analyst::run(snapshot, ctx).await,
            Self::Financial => financial::run(snapshot, ctx).await,
            Self::Market => market::run(snapshot, ctx).await,
            Self::Competitor => competitor::run(snapshot, ctx).await,
            Self::Brand => brand::run(snapshot, ctx).await,
            Self::Social => social::run(snapshot, ctx).await,
            Self::Sales => sales::run(snapshot, ctx).await,
            Self::Product => product::run(snapshot, ctx).await,
            Self::Investment => investment::run(snapshot, ctx).await,
            Self::Critic => critic::run(snapshot, ctx).await,
            Self::Synthesizer => synthesizer::run(snapshot, ctx).await,
        };
        tracing::debug!(
            agent = self.name(),
            cost = update.cost,
            errors = update.errors.len(),
            "agent node done"
        );
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_names_are_unique() {
        let kinds = [
            AgentKind::Researcher,
            AgentKind::Analyst,
            AgentKind::Financial,
            AgentKind::Market,
            AgentKind::Competitor,
            AgentKind::Brand,
            AgentKind::Social,
            AgentKind::Sales,
            AgentKind::Product,
            AgentKind::Investment,
            AgentKind::Critic,
            AgentKind::Synthesizer,
        ];
        let mut names: Vec<&str> = kinds.iter().map(|k| k.name()).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(names.len(), before);
    }
}
