//! Quality checks for model-written answers.
//!
//! A response starts at 100 points and loses points for each problem found:
//! wrong length, leaked placeholder values, missing structure or figures,
//! poor fit with the question's intent and repeated sentences. Agents use the
//! score to decide whether to keep the model text or fall back to their
//! deterministic rendering.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use tabula_core::domain::query::IntentType;

const SECTION_MARKERS: [&str; 6] = ["📊", "📈", "💡", "🎯", "📋", "🔍"];
const SIMILAR_SENTENCES: f64 = 0.7;
const MIN_SENTENCE_CHARS: usize = 10;
const REPETITION_FLOOR: f64 = 80.0;

const TREND_WORDS: &[&str] = &["trend", "change", "추세", "트렌드", "변화"];
const DIRECTION_WORDS: &[&str] =
    &["increase", "decrease", "grew", "rose", "fell", "declin", "flat", "증가", "감소", "상승", "하락", "유지"];
const COMPARISON_WORDS: &[&str] = &["compar", "versus", " vs", "difference", "비교", "대비", "차이"];
const TOTAL_WORDS: &[&str] = &["total", "sum", "average", "overall", "합계", "총", "평균", "전체"];

#[derive(Clone, Debug, PartialEq)]
pub struct ValidatorConfig {
    pub min_length: usize,
    pub max_length: usize,
    /// Literal fragments every answer must contain.
    pub required_elements: Vec<String>,
    /// Score at or above which a response is valid.
    pub quality_threshold: f64,
}

impl ValidatorConfig {
    pub fn analyst() -> Self {
        Self { min_length: 100, max_length: 3_000, required_elements: Vec::new(), quality_threshold: 60.0 }
    }

    pub fn marketer() -> Self {
        Self { min_length: 150, max_length: 4_000, required_elements: Vec::new(), quality_threshold: 55.0 }
    }

    pub fn manager() -> Self {
        Self { min_length: 200, max_length: 5_000, required_elements: Vec::new(), quality_threshold: 50.0 }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { min_length: 50, max_length: 5_000, required_elements: Vec::new(), quality_threshold: 60.0 }
    }
}

/// What the answer is expected to cover.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidationContext {
    pub intent: Option<IntentType>,
    /// Rows were available, so the answer should quote figures.
    pub has_data: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResponseIssue {
    pub code: &'static str,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ResponseIssue {
    fn new(code: &'static str, message: impl Into<String>, suggestion: Option<&str>) -> Self {
        Self { code, message: message.into(), suggestion: suggestion.map(str::to_owned) }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResponseCheck {
    pub valid: bool,
    /// 0-100.
    pub score: f64,
    pub issues: Vec<ResponseIssue>,
}

impl ResponseCheck {
    pub fn has_issue(&self, code: &str) -> bool {
        self.issues.iter().any(|issue| issue.code == code)
    }

    pub fn suggestions(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().filter_map(|issue| issue.suggestion.as_deref())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResponseValidator {
    config: ValidatorConfig,
}

impl ResponseValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, response: &str, context: ValidationContext) -> ResponseCheck {
        let mut issues = Vec::new();
        let mut score = 100.0;
        let length = response.chars().count();

        if length < self.config.min_length {
            issues.push(ResponseIssue::new(
                "too_short",
                format!("response has {length} characters, expected at least {}", self.config.min_length),
                Some("Include more of the analysis behind the answer."),
            ));
            score -= 20.0;
        }
        if length > self.config.max_length {
            issues.push(ResponseIssue::new(
                "too_long",
                format!("response has {length} characters, expected at most {}", self.config.max_length),
                Some("Keep only the key points."),
            ));
            score -= 10.0;
        }

        for (pattern, label) in placeholder_patterns() {
            if pattern.is_match(response) {
                issues.push(ResponseIssue::new("placeholder", format!("response contains `{label}`"), None));
                score -= 15.0;
            }
        }

        for element in &self.config.required_elements {
            if !response.contains(element.as_str()) {
                issues.push(ResponseIssue::new(
                    "missing_element",
                    format!("response does not mention `{element}`"),
                    Some("Mention every required element."),
                ));
                score -= 10.0;
            }
        }

        if !is_structured(response) {
            issues.push(ResponseIssue::new(
                "unstructured",
                "response is a single block of text",
                Some("Split the answer into sections or a list."),
            ));
            score -= 10.0;
        }

        if context.has_data && !figure_pattern().is_match(response) {
            issues.push(ResponseIssue::new(
                "no_figures",
                "response quotes no figures from the data",
                Some("Quote concrete numbers from the result rows."),
            ));
            score -= 15.0;
        }

        if let Some(intent) = context.intent {
            let fit = intent_fit(response, intent);
            if fit < 100.0 {
                issues.push(ResponseIssue::new(
                    "off_intent",
                    format!("response does not read like a {} answer", intent.as_str()),
                    None,
                ));
                score = f64::min(score, fit);
            }
        }

        let repetition = repetition_score(response);
        if repetition < REPETITION_FLOOR {
            issues.push(ResponseIssue::new("repetitive", "response repeats itself", Some("Drop repeated sentences.")));
            score -= (100.0 - repetition) / 2.0;
        }

        let score = f64::clamp(score, 0.0, 100.0);
        ResponseCheck { valid: score >= self.config.quality_threshold, score, issues }
    }
}

fn is_structured(response: &str) -> bool {
    if SECTION_MARKERS.iter().any(|marker| response.contains(marker)) {
        return true;
    }
    let paragraphs = response.split("\n\n").filter(|part| !part.trim().is_empty()).count();
    let list_lines = response.lines().filter(|line| list_item_pattern().is_match(line)).count();
    paragraphs >= 2 || list_lines >= 2
}

fn intent_fit(response: &str, intent: IntentType) -> f64 {
    let lowered = response.to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|word| lowered.contains(word));
    let mut score = 100.0;

    match intent {
        IntentType::TrendAnalysis => {
            if !mentions(TREND_WORDS) {
                score -= 10.0;
            }
            if !mentions(DIRECTION_WORDS) {
                score -= 10.0;
            }
        }
        IntentType::Ranking => {
            if !ranking_pattern().is_match(response) {
                score -= 15.0;
            }
        }
        IntentType::Comparison => {
            if !mentions(COMPARISON_WORDS) {
                score -= 10.0;
            }
        }
        IntentType::Aggregation => {
            if !mentions(TOTAL_WORDS) {
                score -= 10.0;
            }
        }
        IntentType::GeneralQuery | IntentType::Filter | IntentType::Join => {}
    }
    score
}

/// 100 when no two sentences are near duplicates, 0 when all of them are.
fn repetition_score(response: &str) -> f64 {
    let sentences: Vec<HashSet<String>> = sentence_break()
        .split(response)
        .filter(|sentence| sentence.chars().count() > MIN_SENTENCE_CHARS)
        .map(words)
        .collect();
    if sentences.len() < 2 {
        return 100.0;
    }

    let mut pairs = 0usize;
    let mut similar = 0usize;
    for (index, left) in sentences.iter().enumerate() {
        for right in &sentences[index + 1..] {
            pairs += 1;
            if jaccard(left, right) > SIMILAR_SENTENCES {
                similar += 1;
            }
        }
    }
    100.0 - similar as f64 / pairs as f64 * 100.0
}

fn words(sentence: &str) -> HashSet<String> {
    sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn jaccard(left: &HashSet<String>, right: &HashSet<String>) -> f64 {
    let union = left.union(right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(right).count() as f64 / union as f64
}

fn placeholder_patterns() -> &'static [(Regex, &'static str)] {
    static TABLE: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (r"(?i)\bundefined\b", "undefined"),
            (r"(?i)\bnull\b", "null"),
            (r"\bNaN\b", "NaN"),
            (r"\[object Object\]", "[object Object]"),
            (r"(?i)\berror:", "error:"),
        ]
        .into_iter()
        .map(|(pattern, label)| (Regex::new(pattern).expect("static placeholder pattern"), label))
        .collect()
    })
}

macro_rules! pattern {
    ($name:ident, $source:expr) => {
        fn $name() -> &'static Regex {
            static PATTERN: OnceLock<Regex> = OnceLock::new();
            PATTERN.get_or_init(|| Regex::new($source).expect("validator pattern is valid"))
        }
    };
}

pattern!(figure_pattern, r"\d+([,.]\d+)?");
pattern!(list_item_pattern, r"^\s*(?:[-*•]|\d+\.)\s+");
pattern!(ranking_pattern, r"(?i)\d+위|상위|\btop\b|\b[1-3]\.");
pattern!(sentence_break, r"[.!?]\s+");

#[cfg(test)]
mod tests {
    use super::{ResponseValidator, ValidationContext, ValidatorConfig};
    use tabula_core::domain::query::IntentType;

    fn analyst() -> ResponseValidator {
        ResponseValidator::new(ValidatorConfig::analyst())
    }

    #[test]
    fn structured_ranking_answer_with_figures_passes() {
        let answer = "Top artists over the last 30 days:\n1. Mina: 1,250\n2. Joon: 980\n3. Hana: 640\n\n\
                      Mina leads Joon by 27%, so feature her new listings on the iOS home page.";
        let check = analyst()
            .validate(answer, ValidationContext { intent: Some(IntentType::Ranking), has_data: true });

        assert!(check.valid, "unexpected issues: {:?}", check.issues);
        assert_eq!(check.score, 100.0);
        assert!(check.issues.is_empty());
    }

    #[test]
    fn leaked_placeholders_sink_the_score() {
        let check = analyst().validate(
            "Revenue was undefined and growth was NaN.",
            ValidationContext { intent: None, has_data: true },
        );

        assert!(!check.valid);
        assert!(check.has_issue("placeholder"));
        assert!(check.has_issue("too_short"));
        assert!(check.has_issue("no_figures"));
        assert!(check.score < 40.0);
    }

    #[test]
    fn repeated_sentences_are_penalized() {
        let sentence = "Revenue grew strongly across every platform this month";
        let answer = [sentence; 4].join(". ") + ".";
        let check = analyst().validate(&answer, ValidationContext::default());

        assert!(check.has_issue("repetitive"));
        assert_eq!(check.score, 40.0);
        assert!(!check.valid);
    }

    #[test]
    fn answers_that_miss_the_intent_are_capped() {
        let answer = "Sales by platform for November:\n\n- iOS sold 420 items\n- Android sold 310 items\n\n\
                      Web traffic stayed comparable to the prior period.";
        let context = ValidationContext { intent: Some(IntentType::TrendAnalysis), has_data: true };
        let check = analyst().validate(answer, context);

        assert!(check.has_issue("off_intent"));
        assert_eq!(check.score, 80.0);
        assert!(check.valid);
        assert!(check.suggestions().next().is_none());
    }

    #[test]
    fn required_elements_and_length_limits_apply() {
        let config = ValidatorConfig {
            min_length: 10,
            max_length: 40,
            required_elements: vec!["Period".to_owned()],
            quality_threshold: 60.0,
        };
        let check = ResponseValidator::new(config).validate(
            "- Total revenue was 1,200 this week.\n- Orders rose to 45 from 38 last week.",
            ValidationContext { intent: Some(IntentType::Aggregation), has_data: true },
        );

        assert!(check.has_issue("too_long"));
        assert!(check.has_issue("missing_element"));
        assert!(!check.has_issue("unstructured"));
        assert_eq!(check.score, 80.0);
    }
}
