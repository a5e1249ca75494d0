use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use tabula_core::clock::Clock;
use tabula_core::config::ConversationConfig;
use tabula_core::domain::conversation::{ConversationSlot, DataSnapshot, HistoryEntry, ReferenceType};
use tabula_core::domain::query::{FilterOperator, IntentEntities, IntentType};
use tabula_core::schema::ARTIST_COLUMN;

use crate::patterns;

/// Result of folding one turn into its session.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnUpdate {
    pub enhanced_query: String,
    pub merged_slots: ConversationSlot,
    pub reference_type: ReferenceType,
}

#[derive(Debug)]
struct SessionContext {
    history: VecDeque<HistoryEntry>,
    slots: ConversationSlot,
    last_active: DateTime<Utc>,
}

impl SessionContext {
    fn new(now: DateTime<Utc>) -> Self {
        Self { history: VecDeque::new(), slots: ConversationSlot::default(), last_active: now }
    }
}

/// Per-session conversational state. Turns of one session are expected to be
/// serialized by the caller; different sessions proceed independently.
pub struct ConversationManager {
    sessions: RwLock<HashMap<String, SessionContext>>,
    clock: Arc<dyn Clock>,
    max_history: usize,
    idle_timeout: Duration,
}

impl ConversationManager {
    pub fn new(clock: Arc<dyn Clock>, config: &ConversationConfig) -> Self {
        let idle_secs = i64::try_from(config.idle_timeout_secs).unwrap_or(i64::MAX).min(i64::from(u32::MAX));
        Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
            max_history: config.max_history.max(1),
            idle_timeout: Duration::seconds(idle_secs),
        }
    }

    pub async fn analyze_and_update(
        &self,
        session_id: &str,
        query: &str,
        intent_type: IntentType,
        entities: &IntentEntities,
    ) -> TurnUpdate {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(session_id.to_owned()).or_insert_with(|| SessionContext::new(now));

        let reference_type = detect_reference(query);
        let new_slots = extract_slots(query, intent_type, entities);
        let merged_slots = merge_slots(&session.slots, &new_slots, reference_type);
        let enhanced_query = enhance_query(query, reference_type, session.history.back(), &merged_slots);

        session.history.push_back(HistoryEntry {
            query: query.to_owned(),
            intent: intent_type,
            timestamp: now,
            data_snapshot: None,
        });
        while session.history.len() > self.max_history {
            session.history.pop_front();
        }
        session.slots = merged_slots.clone();
        session.last_active = now;

        debug!(
            event_name = "conversation.turn.analyzed",
            session_id,
            reference_type = reference_type.as_str(),
            history_len = session.history.len(),
            "conversation turn analyzed"
        );

        TurnUpdate { enhanced_query, merged_slots, reference_type }
    }

    /// Annotates the latest turn of the session with what it returned.
    pub async fn save_data_snapshot(&self, session_id: &str, snapshot: DataSnapshot) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id).and_then(|session| session.history.back_mut()) {
            Some(entry) => {
                entry.data_snapshot = Some(snapshot);
                true
            }
            None => false,
        }
    }

    pub async fn clear_session(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn current_slots(&self, session_id: &str) -> Option<ConversationSlot> {
        self.sessions.read().await.get(session_id).map(|session| session.slots.clone())
    }

    pub async fn history(&self, session_id: &str) -> Vec<HistoryEntry> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|session| session.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Last `count` turns, oldest first.
    pub async fn recent_history(&self, session_id: &str, count: usize) -> Vec<HistoryEntry> {
        let history = self.history(session_id).await;
        let skip = history.len().saturating_sub(count);
        history.into_iter().skip(skip).collect()
    }

    /// Drops sessions idle for longer than the configured timeout.
    pub async fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| now - session.last_active <= self.idle_timeout);
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(event_name = "conversation.sessions.swept", evicted, remaining = sessions.len(), "idle sessions evicted");
        }
        evicted
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

// ---------------------------------------------------------------------------
// Reference detection
// ---------------------------------------------------------------------------

fn reference_patterns() -> &'static [(Regex, ReferenceType)] {
    static TABLE: OnceLock<Vec<(Regex, ReferenceType)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        [
            (
                r"(?i)^\s*(?:(?:that|those|these)\s+(?:data|numbers|figures|results?)\b|(?:it|that)\b)|^\s*(?:그것|그거|이것|이거|그\s*데이터|이\s*데이터|그\s)",
                ReferenceType::DataReference,
            ),
            (
                r"(?i)\b(?:previous|earlier|last|above)\s+(?:results?|data|analysis|answer)\b|(?:이전|아까|방금|위의?)\s*(?:결과|데이터|분석)",
                ReferenceType::PreviousResult,
            ),
            (
                r"(?i)^\s*(?:more\b|in more detail\b|drill\s+(?:down|into)\b|break\s+(?:it\s+)?down\b|details?\b)|^\s*(?:더|좀\s*더|자세히|상세히|구체적으로)",
                ReferenceType::DrillDown,
            ),
            (
                r"(?i)^\s*(?:again|once more|repeat|redo)\b|\b(?:do|run)\s+(?:it|that)\s+again\b|^\s*(?:다시|한번\s*더)",
                ReferenceType::Repeat,
            ),
            (
                r"(?i)\bsame\s+(?:period|range|dates?|conditions?|filters?)\b|같은\s*기간|동일\s*기간|같은\s*조건",
                ReferenceType::SameCondition,
            ),
            (
                r"(?i)\b(?:another|other|different)\s+(?:country|platform|artist)\b|다른\s*(?:국가|플랫폼|작가)",
                ReferenceType::ChangeFilter,
            ),
            (
                r"(?i)\bcompare\b.*\b(?:with|to|against)\b|\bcompared\s+(?:to|with)\b|(?:비교|대비).*?(?:해줘|해\s*줘|보여줘)",
                ReferenceType::CompareRequest,
            ),
        ]
        .into_iter()
        .map(|(pattern, reference)| (Regex::new(pattern).expect("static reference pattern"), reference))
        .collect()
    })
}

/// First matching phrasing wins; plain questions are `none`.
pub fn detect_reference(query: &str) -> ReferenceType {
    reference_patterns()
        .iter()
        .find(|(pattern, _)| pattern.is_match(query))
        .map(|(_, reference)| *reference)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Slots stated by this turn alone. Text patterns win over extracted entities
/// for the numeric limit.
pub fn extract_slots(query: &str, intent_type: IntentType, entities: &IntentEntities) -> ConversationSlot {
    let non_empty = |items: &Vec<String>| (!items.is_empty()).then(|| items.clone());

    let artist = entities
        .filters
        .iter()
        .find(|filter| filter.column == ARTIST_COLUMN && filter.operator == FilterOperator::Equals)
        .and_then(|filter| filter.value.as_str())
        .map(str::to_owned);

    ConversationSlot {
        date_range: entities.date_range,
        sheets: non_empty(&entities.sheets),
        filters: (!entities.filters.is_empty()).then(|| entities.filters.clone()),
        country: patterns::country(query).map(str::to_owned),
        platform: patterns::platform(query).map(str::to_owned),
        artist,
        limit: patterns::limit(query).or(entities.limit),
        intent: Some(intent_type),
    }
}

pub fn merge_slots(prior: &ConversationSlot, new: &ConversationSlot, reference: ReferenceType) -> ConversationSlot {
    match reference {
        ReferenceType::None => {
            ConversationSlot { date_range: new.date_range.or(prior.date_range), ..new.clone() }
        }
        ReferenceType::DataReference
        | ReferenceType::PreviousResult
        | ReferenceType::SameCondition
        | ReferenceType::CompareRequest => prior.overlay(new),
        ReferenceType::DrillDown => {
            let mut merged = prior.overlay(new);
            merged.filters = match (&prior.filters, &new.filters) {
                (None, None) => None,
                (prior_filters, new_filters) => Some(
                    prior_filters.iter().flatten().chain(new_filters.iter().flatten()).cloned().collect(),
                ),
            };
            merged
        }
        ReferenceType::ChangeFilter => ConversationSlot {
            country: new.country.clone().or_else(|| prior.country.clone()),
            platform: new.platform.clone().or_else(|| prior.platform.clone()),
            artist: new.artist.clone().or_else(|| prior.artist.clone()),
            ..prior.clone()
        },
        ReferenceType::Repeat => prior.clone(),
    }
}

fn enhance_query(
    query: &str,
    reference: ReferenceType,
    last: Option<&HistoryEntry>,
    slots: &ConversationSlot,
) -> String {
    let Some(last) = last else {
        return query.to_owned();
    };

    match reference {
        ReferenceType::DataReference | ReferenceType::PreviousResult => {
            format!("Based on the result of the previous question \"{}\": {query}", last.query)
        }
        ReferenceType::DrillDown => format!("Regarding \"{}\": {query}", last.query),
        ReferenceType::Repeat => last.query.clone(),
        ReferenceType::SameCondition => {
            let mut conditions = Vec::new();
            if let Some(range) = slots.date_range {
                conditions.push(format!("{}~{}", range.start(), range.end()));
            }
            if let Some(country) = &slots.country {
                conditions.push(format!("country: {country}"));
            }
            if let Some(platform) = &slots.platform {
                conditions.push(format!("platform: {platform}"));
            }
            if conditions.is_empty() {
                query.to_owned()
            } else {
                format!("[{}] {query}", conditions.join(", "))
            }
        }
        ReferenceType::None | ReferenceType::ChangeFilter | ReferenceType::CompareRequest => query.to_owned(),
    }
}
