//! 工作流图：节点、依赖边、条件边。
//!
//! 节点是 agent 调用或控制函数，`depends_on` 表达数据流顺序，
//! 调度器按拓扑分层推导并行/串行。`quality_check → research` 的
//! 迭代边不在图里：orchestrator 递增 iteration_count 后把研究段
//! 作为新一轮节点重新入队，再由 `max_iterations` 与总 deadline 兜底。

use crate::{
    agents::AgentKind,
    config::{Depth, ResearchConfig},
    state::ResearchState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeId {
    /// Researcher agent：查询生成 + 搜索 fan-out。
    Research,
    Analyze,
    /// 控制节点：把原始结果按 section 分桶进 research_data。
    Extract,
    /// 控制节点：阈值检查 + 生成前 gate + 条件边。
    QualityCheck,
    Financial,
    Market,
    Competitor,
    Brand,
    Social,
    Sales,
    Product,
    Investment,
    Synthesize,
    Critic,
    /// 控制节点：生成后质量分析。
    PostAnalyze,
    SaveReport,
}

impl NodeId {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Analyze => "analyze",
            Self::Extract => "extract",
            Self::QualityCheck => "quality_check",
            Self::Financial => "financial",
            Self::Market => "market",
            Self::Competitor => "competitor",
            Self::Brand => "brand",
            Self::Social => "social",
            Self::Sales => "sales",
            Self::Product => "product",
            Self::Investment => "investment",
            Self::Synthesize => "synthesize",
            Self::Critic => "critic",
            Self::PostAnalyze => "post_analyze",
            Self::SaveReport => "save_report",
        }
    }

    /// agent 节点对应的 AgentKind；控制节点返回 None。
    pub fn agent(&self) -> Option<AgentKind> {
        match self {
            Self::Research => Some(AgentKind::Researcher),
            Self::Analyze => Some(AgentKind::Analyst),
            Self::Financial => Some(AgentKind::Financial),
            Self::Market => Some(AgentKind::Market),
            Self::Competitor => Some(AgentKind::Competitor),
            Self::Brand => Some(AgentKind::Brand),
            Self::Social => Some(AgentKind::Social),
            Self::Sales => Some(AgentKind::Sales),
            Self::Product => Some(AgentKind::Product),
            Self::Investment => Some(AgentKind::Investment),
            Self::Synthesize => Some(AgentKind::Synthesizer),
            Self::Critic => Some(AgentKind::Critic),
            Self::Extract | Self::QualityCheck | Self::PostAnalyze | Self::SaveReport => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowNode {
    pub id: NodeId,
    pub depends_on: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    pub nodes: Vec<WorkflowNode>,
}

impl WorkflowGraph {
    /// 按研究深度构图。comprehensive 在 QualityCheck 之后并行
    /// 展开全部 specialist，fan-in 到 Synthesize。
    pub fn build(depth: Depth) -> Self {
        let mut nodes = vec![
            node(NodeId::Research, &[]),
            node(NodeId::Analyze, &[NodeId::Research]),
            node(NodeId::Extract, &[NodeId::Analyze]),
            node(NodeId::QualityCheck, &[NodeId::Extract]),
        ];
        let mut synth_deps = vec![NodeId::QualityCheck];

        if depth != Depth::Quick {
            for id in [NodeId::Financial, NodeId::Market, NodeId::Competitor] {
                nodes.push(node(id, &[NodeId::QualityCheck]));
            }
            nodes.push(node(
                NodeId::Investment,
                &[NodeId::Financial, NodeId::Market, NodeId::Competitor],
            ));
            synth_deps = vec![NodeId::Investment];
        }
        if depth == Depth::Comprehensive {
            for id in [NodeId::Brand, NodeId::Social, NodeId::Sales, NodeId::Product] {
                nodes.push(node(id, &[NodeId::QualityCheck]));
                synth_deps.push(id);
            }
        }

        nodes.push(WorkflowNode {
            id: NodeId::Synthesize,
            depends_on: synth_deps,
        });
        nodes.push(node(NodeId::Critic, &[NodeId::Synthesize]));
        nodes.push(node(NodeId::PostAnalyze, &[NodeId::Critic]));
        nodes.push(node(NodeId::SaveReport, &[NodeId::PostAnalyze]));
        Self { nodes }
    }

    /// 拓扑分层：每层内的节点依赖都已满足，可以并行执行。
    pub fn waves(&self) -> Vec<Vec<NodeId>> {
        let mut done: Vec<NodeId> = Vec::new();
        let mut waves = Vec::new();
        while done.len() < self.nodes.len() {
            let ready: Vec<NodeId> = self
                .nodes
                .iter()
                .filter(|n| !done.contains(&n.id))
                .filter(|n| n.depends_on.iter().all(|d| done.contains(d)))
                .map(|n| n.id)
                .collect();
            assert!(!ready.is_empty(), "workflow graph has a dependency cycle");
            done.extend(&ready);
            waves.push(ready);
        }
        waves
    }

    /// QualityCheck 之后、SaveReport 之前的执行层（specialist 段 + 汇总段）。
    /// 研究段与控制节点由 runner 专门处理。
    pub fn execution_waves(&self) -> Vec<Vec<NodeId>> {
        self.waves()
            .into_iter()
            .map(|wave| {
                wave.into_iter()
                    .filter(|id| {
                        !matches!(
                            id,
                            NodeId::Research
                                | NodeId::Analyze
                                | NodeId::Extract
                                | NodeId::QualityCheck
                                | NodeId::PostAnalyze
                                | NodeId::SaveReport
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .filter(|wave| !wave.is_empty())
            .collect()
    }
}

fn node(id: NodeId, deps: &[NodeId]) -> WorkflowNode {
    WorkflowNode {
        id,
        depends_on: deps.to_vec(),
    }
}

// ── Conditional edge ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueDecision {
    Finish,
    Iterate,
    Blocked,
}

/// quality_check 之后的条件边。
pub fn should_continue_research(
    state: &ResearchState,
    config: &ResearchConfig,
) -> ContinueDecision {
    if let Some(gate) = &state.gate
        && !gate.can_generate
    {
        return ContinueDecision::Blocked;
    }
    if state.quality_score >= config.quality_threshold {
        return ContinueDecision::Finish;
    }
    if state.iteration_count >= config.max_iterations {
        return ContinueDecision::Finish;
    }
    ContinueDecision::Iterate
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn passing_gate() -> crate::quality::gate::GateResult {
        let mut data = BTreeMap::new();
        let rich = "Revenue $4.2B FY2024 margin 18% growth 9% CEO guidance strong quarter \
                    with detailed commentary on segments and geographies "
            .repeat(6);
        for section in ["company_info", "financial", "market", "products", "competitive", "strategy"] {
            data.insert(section.to_string(), rich.clone());
        }
        crate::quality::gate::evaluate(&data, 10)
    }

    #[test]
    fn quick_graph_skips_specialists() {
        let graph = WorkflowGraph::build(Depth::Quick);
        assert!(graph.nodes.iter().all(|n| n.id != NodeId::Financial));
        assert!(graph.nodes.iter().any(|n| n.id == NodeId::Synthesize));
    }

    #[test]
    fn comprehensive_fan_out_runs_specialists_in_one_wave() {
        let graph = WorkflowGraph::build(Depth::Comprehensive);
        let waves = graph.execution_waves();
        // 第一执行层：7 个 specialist 并行。
        assert_eq!(waves[0].len(), 7);
        assert!(waves[0].contains(&NodeId::Brand));
        // Investment 在 financial/market/competitor 之后。
        let inv_wave = waves.iter().position(|w| w.contains(&NodeId::Investment)).unwrap();
        assert!(inv_wave > 0);
        // Synthesize 收束在 Critic 之前。
        let synth = waves.iter().position(|w| w.contains(&NodeId::Synthesize)).unwrap();
        let critic = waves.iter().position(|w| w.contains(&NodeId::Critic)).unwrap();
        assert!(synth < critic);
    }

    #[test]
    fn waves_respect_dependencies() {
        let graph = WorkflowGraph::build(Depth::Standard);
        let waves = graph.waves();
        let position = |id: NodeId| waves.iter().position(|w| w.contains(&id)).unwrap();
        assert!(position(NodeId::Research) < position(NodeId::Analyze));
        assert!(position(NodeId::QualityCheck) < position(NodeId::Financial));
        assert!(position(NodeId::Investment) < position(NodeId::Synthesize));
        assert!(position(NodeId::PostAnalyze) < position(NodeId::SaveReport));
    }

    #[test]
    fn conditional_edge_blocked_wins_over_everything() {
        let config = ResearchConfig::resolve().unwrap();
        let mut state = ResearchState::new("Acme", Depth::Standard);
        state.gate = Some(crate::quality::gate::evaluate(&BTreeMap::new(), 0));
        state.quality_score = 99.0;
        assert_eq!(
            should_continue_research(&state, &config),
            ContinueDecision::Blocked
        );
    }

    #[test]
    fn conditional_edge_finishes_on_quality_or_iterations() {
        let mut config = ResearchConfig::resolve().unwrap();
        config.quality_threshold = 70.0;
        config.max_iterations = 2;
        let mut state = ResearchState::new("Acme", Depth::Standard);
        state.gate = Some(passing_gate());

        state.quality_score = 75.0;
        state.iteration_count = 1;
        assert_eq!(
            should_continue_research(&state, &config),
            ContinueDecision::Finish
        );

        state.quality_score = 50.0;
        assert_eq!(
            should_continue_research(&state, &config),
            ContinueDecision::Iterate
        );

        state.iteration_count = 2;
        assert_eq!(
            should_continue_research(&state, &config),
            ContinueDecision::Finish
        );
    }
}
