//! Phrase tables shared by the intent fallback and the conversation slot
//! extractor. English and Korean phrasings sit side by side.

use std::sync::OnceLock;

use regex::Regex;

use tabula_core::schema::Dimension;

struct ValuePattern {
    pattern: Regex,
    value: &'static str,
}

fn compile(table: &[(&str, &'static str)]) -> Vec<ValuePattern> {
    table
        .iter()
        .map(|(pattern, value)| ValuePattern {
            pattern: Regex::new(pattern).expect("static phrase pattern"),
            value,
        })
        .collect()
}

fn countries() -> &'static [ValuePattern] {
    static TABLE: OnceLock<Vec<ValuePattern>> = OnceLock::new();
    TABLE.get_or_init(|| {
        compile(&[
            (r"(?i)\b(jp|japan|japanese)\b|일본", "JP"),
            // Bare "us" is a pronoun; only the upper-case code counts.
            (r"\bUS\b|(?i:\b(usa|united states|america|american)\b)|미국", "US"),
            (r"(?i)\b(korea|korean)\b|한국", "KR"),
            (r"(?i)\b(cn|china|chinese)\b|중국", "CN"),
            (r"(?i)\b(tw|taiwan)\b|대만", "TW"),
            (r"(?i)\b(hk|hong kong)\b|홍콩", "HK"),
            (r"(?i)\b(sg|singapore)\b|싱가포르", "SG"),
        ])
    })
}

fn platforms() -> &'static [ValuePattern] {
    static TABLE: OnceLock<Vec<ValuePattern>> = OnceLock::new();
    TABLE.get_or_init(|| {
        compile(&[
            (r"(?i)\b(ios|iphone)\b|아이폰", "iOS"),
            (r"(?i)\bandroid\b|안드로이드", "Android"),
            (r"(?i)\bweb\b|웹", "Web"),
        ])
    })
}

fn limits() -> &'static [Regex] {
    static TABLE: OnceLock<Vec<Regex>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [r"(?i)\btop\s*(\d+)", r"상위\s*(\d+)", r"(\d+)\s*개"]
            .into_iter()
            .map(|pattern| Regex::new(pattern).expect("static limit pattern"))
            .collect()
    })
}

fn dimensions() -> &'static [(Regex, Dimension)] {
    static TABLE: OnceLock<Vec<(Regex, Dimension)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (r"(?i)\b(by|per)\s+artists?\b|\bartists\b|작가별", Dimension::Artist),
            (r"(?i)\b(by|per)\s+(country|countries)\b|\bcountries\b|국가별", Dimension::Country),
            (r"(?i)\b(by|per)\s+platforms?\b|\bplatforms\b|플랫폼별", Dimension::Platform),
            (r"(?i)\b(by|per)\s+products?\b|\bproducts\b|상품별", Dimension::Product),
        ]
        .into_iter()
        .map(|(pattern, dimension)| (Regex::new(pattern).expect("static dimension pattern"), dimension))
        .collect()
    })
}

fn first_value(table: &[ValuePattern], text: &str) -> Option<&'static str> {
    table.iter().find(|entry| entry.pattern.is_match(text)).map(|entry| entry.value)
}

/// Country code mentioned in the text, first table match wins.
pub fn country(text: &str) -> Option<&'static str> {
    first_value(countries(), text)
}

pub fn platform(text: &str) -> Option<&'static str> {
    first_value(platforms(), text)
}

/// Requested row count ("top 5", "상위 5", "5개"); zero is ignored.
pub fn limit(text: &str) -> Option<u32> {
    limits().iter().find_map(|pattern| {
        pattern.captures(text).and_then(|captures| captures.get(1)).and_then(|m| m.as_str().parse().ok())
    })
    .filter(|limit| *limit > 0)
}

/// Breakdown dimension ("by artist", "per country", "artists").
pub fn dimension(text: &str) -> Option<Dimension> {
    dimensions().iter().find(|(pattern, _)| pattern.is_match(text)).map(|(_, dimension)| *dimension)
}

/// True when any keyword occurs in the lower-cased text.
pub fn mentions(lowered: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| lowered.contains(keyword))
}

#[cfg(test)]
mod tests {
    use super::{country, dimension, limit, platform};
    use tabula_core::schema::Dimension;

    #[test]
    fn countries_match_whole_words_only() {
        assert_eq!(country("recent 7 days, Japan, top 5 artists"), Some("JP"));
        assert_eq!(country("일본 매출"), Some("JP"));
        assert_eq!(country("orders from the US"), Some("US"));
        assert_eq!(country("how many users signed up"), None);
        assert_eq!(country("revenue in the USA"), Some("US"));
        assert_eq!(country("United States orders"), Some("US"));
    }

    #[test]
    fn pronouns_and_plain_words_add_no_filters() {
        assert_eq!(country("show us the top 5 artists by revenue"), None);
        assert_eq!(country("give us revenue for last week"), None);
        assert_eq!(country("Us too, please"), None);
        assert_eq!(country("status of recent orders"), None);
        assert_eq!(country("tweet engagement in chinatown"), None);
        assert_eq!(platform("webinar signups"), None);
        assert_eq!(limit("top artists"), None);
        assert_eq!(limit("order 123 status"), None);
        assert_eq!(dimension("artist Mina's revenue"), None);
        assert_eq!(dimension(""), None);
    }

    #[test]
    fn platforms_and_limits_are_extracted() {
        assert_eq!(platform("iOS orders this week"), Some("iOS"));
        assert_eq!(platform("안드로이드 주문"), Some("Android"));
        assert_eq!(platform("website traffic"), None);
        assert_eq!(limit("top 5 artists"), Some(5));
        assert_eq!(limit("상위 10 작가"), Some(10));
        assert_eq!(limit("top 0"), None);
        assert_eq!(limit("revenue today"), None);
    }

    #[test]
    fn breakdowns_are_detected() {
        assert_eq!(dimension("top 5 artists by revenue"), Some(Dimension::Artist));
        assert_eq!(dimension("revenue per country"), Some(Dimension::Country));
        assert_eq!(dimension("revenue by platform this month"), Some(Dimension::Platform));
        assert_eq!(dimension("total revenue"), None);
    }
}
