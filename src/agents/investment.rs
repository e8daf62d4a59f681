//! Investment analyst：基于已综合的 agent 输出产出投资论点。
//! 输入不是原始搜索结果，而是 financial / market / competitor 的结论。

use serde_json::{Value, json};

use crate::{
    agents::{
        AgentContext,
        base::{self, SpecialistSpec},
        parsing,
    },
    providers::llm::TaskKind,
    state::{ResearchState, StateUpdate},
};

const SYSTEM: &str = "\
You are an investment analyst. Form a clear thesis from the prepared research. \
Commit to a rating; hedge only inside the bear case.";

const SPEC: SpecialistSpec = SpecialistSpec {
    name: "investment",
    task: TaskKind::ComplexReasoning,
    section: None,
    system: SYSTEM,
    default_max_tokens: 1536,
    default_temperature: 0.6,
    max_sources: 5,
    content_cap: 400,
};

/// 评级标尺：SB(强买)/B/H/S/SS(强卖)。
pub const RATING_SCALE: &[&str] = &["SB", "B", "H", "S", "SS"];

fn build_prompt(company: &str, context: &str) -> String {
    format!(
        "Produce an investment thesis for {company} from the research below.\n\n\
         Structure the answer exactly as:\n\
         ## Rating\nRating: SB | B | H | S | SS\n\
         ## Price Target\nPrice target: number (omit if not derivable)\n\
         ## Bull Case\n(bullet list)\n\
         ## Bear Case\n(bullet list)\n\
         ## Catalysts\n(bullet list)\n\
         ## Confidence\nConfidence: 0.0-1.0\n\n\
         Research:\n{context}"
    )
}

fn parse(text: &str) -> Value {
    json!({
        "rating": parse_rating(text),
        "price_target": price_target(text),
        "bull": parsing::extract_list_items(text, "bull case", 6, 5),
        "bear": parsing::extract_list_items(text, "bear case", 6, 5),
        "catalysts": parsing::extract_list_items(text, "catalysts", 6, 5),
    })
}

/// 评级行解析；缺失或不认识时保守给 H（持有）。
fn parse_rating(text: &str) -> &'static str {
    for item in parsing::extract_keyword_list(text, "rating", 1) {
        let token = item
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_uppercase();
        if let Some(rating) = RATING_SCALE.iter().find(|r| **r == token) {
            return rating;
        }
        // 容忍全称。
        let normalized = match token.as_str() {
            "STRONG" if item.to_uppercase().contains("STRONG BUY") => "SB",
            "STRONG" if item.to_uppercase().contains("STRONG SELL") => "SS",
            "BUY" => "B",
            "HOLD" => "H",
            "SELL" => "S",
            _ => continue,
        };
        return normalized;
    }
    "H"
}

fn price_target(text: &str) -> Option<f64> {
    let value = parsing::extract_score(text, "price target", -1.0);
    (value > 0.0).then_some(value)
}

/// 投资 agent 的上下文来自上游 agent 输出，而非搜索结果。
fn thesis_context(snapshot: &ResearchState) -> String {
    let mut context = String::new();
    for agent in ["financial", "market", "competitor", "analyst"] {
        if let Some(output) = snapshot.agent_outputs.get(agent)
            && !output.analysis.is_empty()
        {
            context.push_str(&format!(
                "### {agent}\n{}\n\n",
                parsing::truncate_chars(&output.analysis, 2000)
            ));
        }
    }
    context
}

pub async fn run(snapshot: &ResearchState, ctx: &AgentContext) -> StateUpdate {
    let context = thesis_context(snapshot);
    if context.is_empty() {
        return StateUpdate::agent_no_data(SPEC.name);
    }
    base::run_specialist(&SPEC, build_prompt, parse, snapshot, ctx, Some(context)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_parses_abbreviations_and_full_words() {
        assert_eq!(parse_rating("## Rating\nRating: SB\n"), "SB");
        assert_eq!(parse_rating("Rating: Strong Buy backed by growth"), "SB");
        assert_eq!(parse_rating("Rating: hold"), "H");
        assert_eq!(parse_rating("no rating line at all"), "H");
    }

    #[test]
    fn price_target_requires_positive_number() {
        assert_eq!(price_target("Price target: 45.5 USD"), Some(45.5));
        assert_eq!(price_target("Price target: not derivable"), None);
    }

    #[test]
    fn parse_collects_bull_and_bear_lists() {
        let reply = "## Rating\nRating: B\n\n## Price Target\nPrice target: 30\n\n\
                     ## Bull Case\n- LATAM expansion runway\n\n\
                     ## Bear Case\n- currency exposure\n- thin margins\n";
        let parsed = parse(reply);
        assert_eq!(parsed["rating"], "B");
        assert_eq!(parsed["bull"].as_array().unwrap().len(), 1);
        assert_eq!(parsed["bear"].as_array().unwrap().len(), 2);
    }
}
