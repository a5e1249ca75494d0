use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::date_range::DateRange;
use crate::domain::query::{Filter, IntentType};

/// How a follow-up turn refers back to earlier turns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    #[default]
    None,
    DataReference,
    PreviousResult,
    DrillDown,
    Repeat,
    SameCondition,
    ChangeFilter,
    CompareRequest,
}

impl ReferenceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::DataReference => "data_reference",
            Self::PreviousResult => "previous_result",
            Self::DrillDown => "drill_down",
            Self::Repeat => "repeat",
            Self::SameCondition => "same_condition",
            Self::ChangeFilter => "change_filter",
            Self::CompareRequest => "compare_request",
        }
    }
}

/// Conversational state carried across turns of one session.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSlot {
    pub date_range: Option<DateRange>,
    pub sheets: Option<Vec<String>>,
    pub filters: Option<Vec<Filter>>,
    pub country: Option<String>,
    pub platform: Option<String>,
    pub artist: Option<String>,
    pub limit: Option<u32>,
    pub intent: Option<IntentType>,
}

impl ConversationSlot {
    pub fn filter_count(&self) -> usize {
        self.filters.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// Field-wise override: every field set on `newer` wins, the rest is kept.
    pub fn overlay(&self, newer: &ConversationSlot) -> ConversationSlot {
        ConversationSlot {
            date_range: newer.date_range.or(self.date_range),
            sheets: newer.sheets.clone().or_else(|| self.sheets.clone()),
            filters: newer.filters.clone().or_else(|| self.filters.clone()),
            country: newer.country.clone().or_else(|| self.country.clone()),
            platform: newer.platform.clone().or_else(|| self.platform.clone()),
            artist: newer.artist.clone().or_else(|| self.artist.clone()),
            limit: newer.limit.or(self.limit),
            intent: newer.intent.or(self.intent),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSnapshot {
    pub row_count: usize,
    pub sheets: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub query: String,
    pub intent: IntentType,
    pub timestamp: DateTime<Utc>,
    pub data_snapshot: Option<DataSnapshot>,
}
