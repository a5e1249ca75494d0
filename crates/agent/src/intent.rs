//! Free text to structured [`Intent`].
//!
//! The model gets a schema-aware prompt and must answer with strict JSON.
//! When it is unavailable or answers with something unusable, a keyword and
//! regex classifier produces the intent instead, at a fixed low confidence.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;

use tabula_core::dates::DateParser;
use tabula_core::domain::conversation::{ConversationSlot, HistoryEntry};
use tabula_core::domain::query::{
    AggregateFn, Aggregation, Filter, FilterOperator, Intent, IntentEntities, IntentType, OrderBy,
    SortDirection,
};
use tabula_core::optimizer::DEFAULT_SHEET;
use tabula_core::schema::{Dimension, SchemaRegistry, QUANTITY_COLUMN, REVENUE_COLUMN};

use crate::classify::{classify_with_fallback, reported_confidence, Classified};
use crate::llm::{ChatMessage, CompletionOptions, LlmClient};
use crate::patterns::{self, mentions};

pub const FALLBACK_CONFIDENCE: f64 = 0.5;
const MODEL_DEFAULT_CONFIDENCE: f64 = 0.8;
const HISTORY_TURNS: usize = 3;
const MAX_TOKENS: u32 = 800;

const TREND_WORDS: &[&str] = &["trend", "추이", "추세"];
const COMPARISON_WORDS: &[&str] = &["compare", "versus", " vs", "비교", "대비"];
const AGGREGATION_WORDS: &[&str] = &["total", "sum", "집계", "합계"];
const RANKING_WORDS: &[&str] = &["top", "rank", "best", "상위", "랭킹", "순위"];

const LOGISTICS_WORDS: &[&str] = &["artist", "country", "shipping", "logistics", "작가", "물류", "배송"];
const USER_WORDS: &[&str] = &["customer", "user", "고객"];
const REVIEW_WORDS: &[&str] = &["review", "리뷰"];

const REVENUE_WORDS: &[&str] = &["revenue", "sales", "gmv", "매출"];
const QUANTITY_WORDS: &[&str] = &["quantity", "units", "수량"];
const ORDER_COUNT_WORDS: &[&str] = &["orders", "order count", "주문 수", "주문수", "주문 건수"];

pub struct IntentExtractor {
    llm: Arc<dyn LlmClient>,
    schema: SchemaRegistry,
}

impl IntentExtractor {
    pub fn new(llm: Arc<dyn LlmClient>, schema: SchemaRegistry) -> Self {
        Self { llm, schema }
    }

    /// Never fails; the classification source tells callers whether the
    /// model or the rules produced the intent.
    pub async fn extract(&self, query: &str, history: &[HistoryEntry], today: NaiveDate) -> Classified<Intent> {
        let messages = self.messages(query, history, today);
        let parser = DateParser::new(today);

        let mut classified = classify_with_fallback(
            self.llm.as_ref(),
            "intent",
            &messages,
            CompletionOptions::classification(MAX_TOKENS),
            |value| parse_model_intent(value, query, &parser),
            || (fallback_intent(query, &parser, &self.schema), FALLBACK_CONFIDENCE),
        )
        .await;
        classified.value.confidence = classified.confidence;
        classified
    }

    fn messages(&self, query: &str, history: &[HistoryEntry], today: NaiveDate) -> Vec<ChatMessage> {
        let intents = IntentType::ALL.iter().map(|intent| intent.as_str()).collect::<Vec<_>>().join(", ");
        let system = format!(
            "You turn business questions into structured data requests.\n\
             Today is {today}.\n\n{schema}\n\
             intentType is one of: {intents}.\n\
             Filter operators: equals, not_equals, contains, not_contains, greater_than, less_than, \
             greater_than_or_equal, less_than_or_equal, in, not_in, between, starts_with, ends_with.\n\
             Aggregation functions: sum, avg, count, max, min.\n\
             Answer with JSON only:\n\
             {{\"intentType\": \"...\", \"confidence\": 0.0-1.0, \"entities\": {{\
             \"dateRange\": {{\"start\": \"YYYY-MM-DD\", \"end\": \"YYYY-MM-DD\"}} or null, \
             \"sheets\": [], \"filters\": [{{\"column\": \"\", \"operator\": \"\", \"value\": null}}], \
             \"aggregations\": [{{\"column\": \"\", \"function\": \"\"}}], \"groupBy\": [], \
             \"orderBy\": [{{\"column\": \"\", \"direction\": \"asc|desc\"}}], \"limit\": null}}}}",
            schema = self.schema.prompt_summary(),
        );

        let mut messages = vec![ChatMessage::system(system)];
        let skip = history.len().saturating_sub(HISTORY_TURNS);
        for turn in &history[skip..] {
            messages.push(ChatMessage::user(turn.query.clone()));
            messages.push(ChatMessage::assistant(format!("{{\"intentType\": \"{}\"}}", turn.intent)));
        }
        messages.push(ChatMessage::user(query));
        messages
    }
}

// ---------------------------------------------------------------------------
// Model output
// ---------------------------------------------------------------------------

fn parse_model_intent(value: &Value, query: &str, parser: &DateParser) -> Option<(Intent, f64)> {
    let intent_type = IntentType::parse_lenient(value.get("intentType")?.as_str()?);
    let confidence = reported_confidence(value, MODEL_DEFAULT_CONFIDENCE);
    let raw = value.get("entities").cloned().unwrap_or(Value::Null);

    // only a pair of valid ISO dates is trusted; anything else re-parses the text
    let date_range = raw
        .get("dateRange")
        .and_then(|range| Some((range.get("start")?.as_str()?, range.get("end")?.as_str()?)))
        .and_then(|(start, end)| DateParser::parse_iso_pair(start, end))
        .or_else(|| parser.parse(query));

    let entities = IntentEntities {
        date_range,
        sheets: strings(raw.get("sheets")),
        filters: objects(raw.get("filters"))
            .filter_map(|filter| {
                let column = filter.get("column")?.as_str()?.trim();
                (!column.is_empty()).then(|| Filter {
                    column: column.to_owned(),
                    operator: FilterOperator::parse_lenient(
                        filter.get("operator").and_then(Value::as_str).unwrap_or("equals"),
                    ),
                    value: filter.get("value").cloned().unwrap_or(Value::Null),
                })
            })
            .collect(),
        aggregations: objects(raw.get("aggregations"))
            .filter_map(|aggregation| {
                Some(Aggregation {
                    column: aggregation.get("column")?.as_str()?.to_owned(),
                    function: AggregateFn::parse_lenient(aggregation.get("function")?.as_str()?)?,
                })
            })
            .collect(),
        group_by: strings(raw.get("groupBy")),
        order_by: objects(raw.get("orderBy"))
            .filter_map(|order| {
                let direction = match order.get("direction").and_then(Value::as_str) {
                    Some(direction) if direction.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                    _ => SortDirection::Desc,
                };
                Some(OrderBy { column: order.get("column")?.as_str()?.to_owned(), direction })
            })
            .collect(),
        limit: raw.get("limit").and_then(Value::as_u64).and_then(|limit| u32::try_from(limit).ok()),
    };

    Some((Intent { intent_type, confidence, entities }, confidence))
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn objects(value: Option<&Value>) -> impl Iterator<Item = &Value> {
    value.and_then(Value::as_array).into_iter().flatten().filter(|item| item.is_object())
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Deterministic intent for `query`. Confidence is always [`FALLBACK_CONFIDENCE`].
pub fn fallback_intent(query: &str, parser: &DateParser, schema: &SchemaRegistry) -> Intent {
    let lowered = query.to_lowercase();

    let intent_type = if mentions(&lowered, TREND_WORDS) {
        IntentType::TrendAnalysis
    } else if mentions(&lowered, COMPARISON_WORDS) {
        IntentType::Comparison
    } else if mentions(&lowered, AGGREGATION_WORDS) {
        IntentType::Aggregation
    } else if mentions(&lowered, RANKING_WORDS) || patterns::limit(query).is_some() {
        IntentType::Ranking
    } else {
        IntentType::GeneralQuery
    };

    let primary = if mentions(&lowered, LOGISTICS_WORDS) {
        "logistics"
    } else if mentions(&lowered, USER_WORDS) {
        "users"
    } else if mentions(&lowered, REVIEW_WORDS) {
        "review"
    } else {
        DEFAULT_SHEET
    };
    let mut sheets = vec![primary.to_owned()];

    let mut filters = Vec::new();
    for (dimension, value) in [
        (Dimension::Country, patterns::country(query)),
        (Dimension::Platform, patterns::platform(query)),
    ] {
        let Some(value) = value else { continue };
        if let Some(column) = dimension_target(schema, &mut sheets, dimension) {
            filters.push(Filter::equals(column, value));
        }
    }

    let group_by = patterns::dimension(query)
        .and_then(|dimension| dimension_target(schema, &mut sheets, dimension))
        .map(|column| vec![column.to_owned()])
        .unwrap_or_default();

    let has_column = |column: &str| schema.sheet(primary).is_some_and(|sheet| sheet.has_column(column));
    let mut metric = if mentions(&lowered, REVENUE_WORDS) && has_column(REVENUE_COLUMN) {
        Some(Aggregation { column: REVENUE_COLUMN.to_owned(), function: AggregateFn::Sum })
    } else if mentions(&lowered, QUANTITY_WORDS) && has_column(QUANTITY_COLUMN) {
        Some(Aggregation { column: QUANTITY_COLUMN.to_owned(), function: AggregateFn::Sum })
    } else if mentions(&lowered, ORDER_COUNT_WORDS) && has_column("order_code") {
        Some(Aggregation { column: "order_code".to_owned(), function: AggregateFn::Count })
    } else {
        None
    };
    if metric.is_none() && !group_by.is_empty() && has_column(REVENUE_COLUMN) {
        metric = Some(Aggregation { column: REVENUE_COLUMN.to_owned(), function: AggregateFn::Sum });
    }

    let order_by = match &metric {
        Some(metric) if intent_type == IntentType::Ranking || !group_by.is_empty() => {
            vec![OrderBy { column: metric.column.clone(), direction: SortDirection::Desc }]
        }
        _ => Vec::new(),
    };

    Intent {
        intent_type,
        confidence: FALLBACK_CONFIDENCE,
        entities: IntentEntities {
            date_range: parser.parse(query),
            sheets,
            filters,
            aggregations: metric.into_iter().collect(),
            group_by,
            order_by,
            limit: patterns::limit(query),
        },
    }
}

/// Column for `dimension`: on the primary sheet when it has one, otherwise on
/// the first sheet joinable to it, which is then added to `sheets`.
pub fn dimension_target(schema: &SchemaRegistry, sheets: &mut Vec<String>, dimension: Dimension) -> Option<&'static str> {
    let primary = sheets.first()?.clone();
    if let Some(column) = schema.dimension_column(&primary, dimension) {
        return Some(column);
    }
    if let Some(column) = sheets[1..].iter().find_map(|sheet| schema.dimension_column(sheet, dimension)) {
        return Some(column);
    }

    // declared foreign keys win over the default pairings
    let candidates = || {
        schema.sheets().filter(|sheet| sheet.assistant_accessible && sheet.dimension_column(dimension).is_some())
    };
    let joined = candidates()
        .find(|sheet| schema.foreign_key_between(&primary, sheet.key).is_some())
        .or_else(|| candidates().find(|sheet| schema.default_pairing(&primary, sheet.key).is_some()))?;
    sheets.push(joined.key.to_owned());
    joined.dimension_column(dimension)
}

/// Rewrites intent entities with the merged conversation slots. Slot country
/// and platform replace any filter on the matching dimension column.
pub fn apply_slots(intent: &Intent, slots: &ConversationSlot, schema: &SchemaRegistry) -> Intent {
    let mut entities = intent.entities.clone();

    entities.date_range = slots.date_range.or(entities.date_range);
    if let Some(sheets) = slots.sheets.as_ref().filter(|sheets| !sheets.is_empty()) {
        entities.sheets = sheets.clone();
    }
    if let Some(filters) = &slots.filters {
        entities.filters = filters.clone();
    }
    if slots.limit.is_some() {
        entities.limit = slots.limit;
    }
    if entities.sheets.is_empty() {
        entities.sheets.push(DEFAULT_SHEET.to_owned());
    }

    for (dimension, value) in [(Dimension::Country, &slots.country), (Dimension::Platform, &slots.platform)] {
        let Some(value) = value else { continue };
        let Some(column) = dimension_target(schema, &mut entities.sheets, dimension) else { continue };
        entities.filters.retain(|filter| filter.column != column);
        entities.filters.push(Filter::equals(column, value.as_str()));
    }

    Intent { intent_type: slots.intent.unwrap_or(intent.intent_type), confidence: intent.confidence, entities }
}
