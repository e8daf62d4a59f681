//! 生成前质量 gate。
//!
//! 在 synthesizer 之前裁决：已收集的研究数据够不够生成一份报告。
//! 挡下时 orchestrator 必须跳过 synthesizer，产出只列 improvements
//! 的占位报告。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::quality::{count_data_points, count_vague};

/// 必需 section 及其最低分；required=false 的只降分不挡。
const SECTION_MINIMUMS: &[(&str, f64, bool)] = &[
    ("company_info", 30.0, true),
    ("financial", 25.0, true),
    ("market", 20.0, false),
    ("products", 20.0, false),
    ("competitive", 20.0, false),
    ("strategy", 15.0, false),
];

/// 全文最低词数（所有 section 合计）。
const MIN_TOTAL_WORDS: usize = 200;
/// 含糊表述密度上限：每 100 词允许的 "N/A"/"unknown" 次数。
const MAX_VAGUE_PER_100_WORDS: f64 = 4.0;
const MIN_SOURCE_COUNT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub can_generate: bool,
    pub block_reasons: Vec<String>,
    pub quality_score: f64,
    pub section_scores: BTreeMap<String, f64>,
    pub warnings: Vec<String>,
    pub improvements: Vec<String>,
    pub summary: String,
}

/// 对已积累的研究数据做生成前评估。
pub fn evaluate(data: &BTreeMap<String, String>, source_count: usize) -> GateResult {
    let mut section_scores = BTreeMap::new();
    let mut block_reasons = Vec::new();
    let mut warnings = Vec::new();
    let mut improvements = Vec::new();

    let mut total_words = 0usize;
    let mut total_vague = 0usize;
    let mut weighted_sum = 0.0;

    for &(section, minimum, required) in SECTION_MINIMUMS {
        let content = data.get(section).map(String::as_str).unwrap_or("");
        let words = content.split_whitespace().count();
        total_words += words;
        total_vague += count_vague(content);

        let score = score_section(content);
        section_scores.insert(section.to_string(), score);
        weighted_sum += score;

        if content.trim().is_empty() {
            if required {
                block_reasons.push(format!("MISSING_SECTION:{section}"));
                improvements.push(format!("gather {section} data before regenerating"));
            } else {
                warnings.push(format!("section `{section}` is empty"));
                improvements.push(format!("add {section} coverage"));
            }
        } else if score < minimum {
            if required {
                block_reasons.push(format!("SECTION_BELOW_MINIMUM:{section}"));
                improvements.push(format!(
                    "strengthen {section}: score {score:.0} below minimum {minimum:.0}"
                ));
            } else {
                warnings.push(format!(
                    "section `{section}` scored {score:.0}, below {minimum:.0}"
                ));
            }
        }
    }

    if source_count < MIN_SOURCE_COUNT {
        block_reasons.push("INSUFFICIENT_DATA".to_string());
        improvements.push(format!(
            "only {source_count} sources collected, need at least {MIN_SOURCE_COUNT}"
        ));
    }
    if total_words < MIN_TOTAL_WORDS {
        block_reasons.push("CONTENT_BELOW_FLOOR".to_string());
        improvements.push(format!(
            "collected {total_words} words of research, floor is {MIN_TOTAL_WORDS}"
        ));
    }
    if total_words > 0 {
        let vague_density = total_vague as f64 / total_words as f64 * 100.0;
        if vague_density > MAX_VAGUE_PER_100_WORDS {
            block_reasons.push("NOT_AVAILABLE_DOMINATED".to_string());
            improvements
                .push("most fields are placeholders; re-search with alternative sources".to_string());
        }
    }

    let quality_score = weighted_sum / SECTION_MINIMUMS.len() as f64;
    let can_generate = block_reasons.is_empty();
    let summary = if can_generate {
        format!("gate passed, pre-generation score {quality_score:.0}")
    } else {
        format!(
            "gate blocked ({}), pre-generation score {quality_score:.0}",
            block_reasons.join(", ")
        )
    };
    tracing::info!(can_generate, quality_score, "quality gate evaluated");

    GateResult {
        can_generate,
        block_reasons,
        quality_score,
        section_scores,
        warnings,
        improvements,
        summary,
    }
}

/// 单 section 打分（0..=100）：词数 60 分 + 数据点密度 40 分。
fn score_section(content: &str) -> f64 {
    if content.trim().is_empty() {
        return 0.0;
    }
    let words = content.split_whitespace().count() as f64;
    let data_points = count_data_points(content) as f64;
    let length_score = (words / 120.0).min(1.0) * 60.0;
    let data_score = (data_points / 5.0).min(1.0) * 40.0;
    length_score + data_score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strong_section() -> String {
        "Revenue reached $4.2B in FY2024 with 18% operating margin. CEO Maria Ortiz \
         guided Q1 2025 growth of 9%. Headcount 12,000. "
            .repeat(8)
    }

    #[test]
    fn empty_data_blocks_with_insufficient_data() {
        let gate = evaluate(&BTreeMap::new(), 0);
        assert!(!gate.can_generate);
        assert!(gate.block_reasons.iter().any(|r| r == "INSUFFICIENT_DATA"));
        assert!(
            gate.block_reasons
                .iter()
                .any(|r| r.starts_with("MISSING_SECTION:"))
        );
        assert!(!gate.improvements.is_empty());
    }

    #[test]
    fn complete_data_passes() {
        let mut data = BTreeMap::new();
        for (section, _, _) in SECTION_MINIMUMS {
            data.insert(section.to_string(), strong_section());
        }
        let gate = evaluate(&data, 12);
        assert!(gate.can_generate, "blocked: {:?}", gate.block_reasons);
        assert!(gate.quality_score > 70.0);
    }

    #[test]
    fn vague_domination_blocks() {
        let mut data = BTreeMap::new();
        let vague = "Revenue: N/A. Margin: unknown. Growth: not available. Outlook: TBD. "
            .repeat(10);
        for (section, _, _) in SECTION_MINIMUMS {
            data.insert(section.to_string(), vague.clone());
        }
        let gate = evaluate(&data, 10);
        assert!(!gate.can_generate);
        assert!(
            gate.block_reasons
                .iter()
                .any(|r| r == "NOT_AVAILABLE_DOMINATED")
        );
    }

    #[test]
    fn thin_required_section_blocks_but_optional_only_warns() {
        let mut data = BTreeMap::new();
        data.insert("company_info".to_string(), strong_section());
        data.insert("financial".to_string(), strong_section());
        data.insert("market".to_string(), "tiny".to_string());
        data.insert("products".to_string(), strong_section());
        data.insert("competitive".to_string(), strong_section());
        data.insert("strategy".to_string(), strong_section());
        let gate = evaluate(&data, 8);
        assert!(gate.can_generate, "blocked: {:?}", gate.block_reasons);
        assert!(gate.warnings.iter().any(|w| w.contains("market")));
    }

    #[test]
    fn score_is_deterministic() {
        let mut data = BTreeMap::new();
        data.insert("company_info".to_string(), strong_section());
        let a = evaluate(&data, 5);
        let b = evaluate(&data, 5);
        assert_eq!(a.quality_score, b.quality_score);
        assert_eq!(a.block_reasons, b.block_reasons);
    }
}
