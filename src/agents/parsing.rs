//! LLM 回复的宽松解析工具。
//!
//! 模型输出的标题层级、编号风格、加粗方式都不稳定，这里的提取函数
//! 对 `## Heading` / `**Heading**` / `Heading:` / 编号列表一视同仁。
//! 解析失败一律返回空值/默认值，绝不报错。

/// 判断一行是否是标题行，返回规范化后的标题文本（小写、去符号）。
fn heading_of(line: &str) -> Option<String> {
    let t = line.trim();
    if t.is_empty() {
        return None;
    }
    let stripped = if let Some(rest) = t.strip_prefix('#') {
        rest.trim_start_matches('#').trim()
    } else if t.starts_with("**") && t.trim_end_matches(':').ends_with("**") {
        t.trim_start_matches("**")
            .trim_end_matches(':')
            .trim_end_matches("**")
            .trim()
    } else if t.ends_with(':') && t.len() < 60 && !t.contains("  ") {
        t.trim_end_matches(':').trim()
    } else {
        return None;
    };
    if stripped.is_empty() {
        return None;
    }
    Some(normalize_heading(stripped))
}

fn normalize_heading(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_bullet(line: &str) -> Option<&str> {
    let t = line.trim_start();
    for prefix in ["- ", "* ", "• "] {
        if let Some(rest) = t.strip_prefix(prefix) {
            return Some(rest.trim());
        }
    }
    // "1. item" / "2) item"
    let digits: String = t.chars().take_while(|c| c.is_ascii_digit()).collect();
    if !digits.is_empty() {
        let rest = &t[digits.len()..];
        if let Some(item) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(item.trim());
        }
    }
    None
}

/// 提取某个标题下的列表项。`section_keyword` 模糊匹配标题（包含即可）。
pub fn extract_list_items(
    text: &str,
    section_keyword: &str,
    max: usize,
    min_length: usize,
) -> Vec<String> {
    let keyword = normalize_heading(section_keyword);
    let mut in_section = false;
    let mut items = Vec::new();
    for line in text.lines() {
        if let Some(heading) = heading_of(line) {
            in_section = heading.contains(&keyword);
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some(item) = is_bullet(line) {
            let item = strip_markup(item);
            if item.chars().count() >= min_length {
                items.push(item);
                if items.len() >= max {
                    break;
                }
            }
        }
    }
    items
}

/// 提取 `label: 0.8` / `label: 85` / `label is 7/10` 风格的数值。
/// 找不到或超界时返回 `default`。
pub fn extract_score(text: &str, label: &str, default: f64) -> f64 {
    let label_lower = label.to_lowercase();
    for line in text.lines() {
        let lower = line.to_lowercase();
        let Some(pos) = lower.find(&label_lower) else {
            continue;
        };
        // 数字与 '/' 不受大小写影响，后续都在小写副本上操作。
        let tail = &lower[pos + label_lower.len()..];
        let mut num = String::new();
        let mut seen_digit = false;
        for c in tail.chars() {
            if c.is_ascii_digit() || (c == '.' && seen_digit) {
                num.push(c);
                seen_digit = true;
            } else if seen_digit {
                break;
            }
        }
        if let Ok(v) = num.parse::<f64>() {
            if let Some(npos) = tail.find(&num) {
                let rest = tail[npos + num.len()..].trim_start();
                if rest.starts_with("/10") {
                    return v / 10.0;
                }
            }
            return v;
        }
    }
    default
}

/// 提取某个标题下的整段文本（到下一个标题为止），裁剪到 `max_len` 字符。
pub fn extract_section(text: &str, header: &str, max_len: usize) -> Option<String> {
    let keyword = normalize_heading(header);
    let mut in_section = false;
    let mut body = String::new();
    for line in text.lines() {
        if let Some(heading) = heading_of(line) {
            if in_section {
                break;
            }
            in_section = heading.contains(&keyword);
            continue;
        }
        if in_section {
            body.push_str(line);
            body.push('\n');
        }
    }
    let body = body.trim().to_string();
    if body.is_empty() {
        return None;
    }
    Some(truncate_chars(&body, max_len))
}

/// 提取 `keyword: a, b, c` 风格的同行关键词列表。
pub fn extract_keyword_list(text: &str, keyword: &str, max: usize) -> Vec<String> {
    let keyword_lower = keyword.to_lowercase();
    for line in text.lines() {
        let lower = line.to_lowercase();
        if !lower.contains(&keyword_lower) {
            continue;
        }
        // 取关键词后第一个冒号之后的部分，保留原始大小写。
        let Some(tail) = line
            .split_once(':')
            .or_else(|| line.split_once('：'))
            .map(|(_, t)| t.trim())
        else {
            continue;
        };
        if tail.is_empty() {
            continue;
        }
        let items: Vec<String> = tail
            .split([',', ';', '、'])
            .map(|s| strip_markup(s.trim()))
            .filter(|s| !s.is_empty() && s.chars().count() <= 80)
            .take(max)
            .collect();
        if !items.is_empty() {
            return items;
        }
    }
    Vec::new()
}

/// 去掉 markdown 粗体/行内代码等标记。
fn strip_markup(s: &str) -> String {
    s.replace("**", "")
        .replace('`', "")
        .trim()
        .trim_end_matches('.')
        .to_string()
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Overview
Acme builds rockets.

## Key Competitors
- **SpaceY** — direct rival
- Blue Moon
1. Orbital Inc.
x not a bullet

**Risks:**
- regulatory pressure

Confidence: 0.82
Market share: 12.5%
Keywords: propulsion, launch services, satellites
";

    #[test]
    fn list_items_match_heading_loosely() {
        let items = extract_list_items(SAMPLE, "competitors", 10, 3);
        assert_eq!(items, vec!["SpaceY — direct rival", "Blue Moon", "Orbital Inc"]);
    }

    #[test]
    fn list_items_respect_max_and_min_length() {
        let items = extract_list_items(SAMPLE, "competitors", 2, 3);
        assert_eq!(items.len(), 2);
        let none = extract_list_items(SAMPLE, "competitors", 10, 50);
        assert!(none.is_empty());
    }

    #[test]
    fn bold_heading_counts_as_section() {
        let items = extract_list_items(SAMPLE, "risks", 5, 3);
        assert_eq!(items, vec!["regulatory pressure"]);
    }

    #[test]
    fn score_extraction_finds_labelled_number() {
        assert_eq!(extract_score(SAMPLE, "confidence", 0.5), 0.82);
        assert_eq!(extract_score(SAMPLE, "market share", 0.0), 12.5);
        assert_eq!(extract_score(SAMPLE, "absent label", 0.4), 0.4);
    }

    #[test]
    fn score_normalizes_out_of_ten() {
        assert_eq!(extract_score("Quality: 7/10 overall", "quality", 0.0), 0.7);
    }

    #[test]
    fn section_extraction_stops_at_next_heading() {
        let body = extract_section(SAMPLE, "overview", 500).unwrap();
        assert_eq!(body, "Acme builds rockets.");
        assert!(extract_section(SAMPLE, "nonexistent", 100).is_none());
    }

    #[test]
    fn section_is_truncated_to_max_len() {
        let body = extract_section(SAMPLE, "overview", 4).unwrap();
        assert_eq!(body, "Acme…");
    }

    #[test]
    fn keyword_list_splits_on_commas() {
        let kws = extract_keyword_list(SAMPLE, "keywords", 5);
        assert_eq!(kws, vec!["propulsion", "launch services", "satellites"]);
        assert!(extract_keyword_list(SAMPLE, "missing", 5).is_empty());
    }
}
