use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use tabula_core::clock::Clock;
use tabula_core::config::DataConfig;
use tabula_core::domain::date_range::DateRange;
use tabula_core::domain::query::{Filter, JoinEdge, QueryPlan};
use tabula_core::domain::row::Row;
use tabula_core::errors::{ApplicationError, DomainError};
use tabula_core::schema::SchemaRegistry;

use crate::cache::{CacheKey, CacheStats, DataCache, TtlPolicy};
use crate::ops;
use crate::source::{DataSource, SourceError};

#[derive(Debug, Error)]
pub enum DataAccessError {
    #[error("sheet `{0}` is not registered in the schema")]
    UnknownSheet(String),
    #[error("fetching sheet `{sheet}` failed: {source}")]
    Fetch {
        sheet: String,
        #[source]
        source: SourceError,
    },
}

impl From<DataAccessError> for ApplicationError {
    fn from(error: DataAccessError) -> Self {
        match error {
            DataAccessError::UnknownSheet(sheet) => DomainError::UnknownSheet(sheet).into(),
            fetch @ DataAccessError::Fetch { .. } => Self::ServiceUnavailable(fetch.to_string()),
        }
    }
}

/// Parameters of a single-sheet read.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetRequest {
    pub sheet: String,
    pub date_range: Option<DateRange>,
    pub filters: Vec<Filter>,
    pub limit: Option<usize>,
    pub skip_cache: bool,
}

impl GetRequest {
    pub fn new(sheet: impl Into<String>) -> Self {
        Self { sheet: sheet.into(), ..Self::default() }
    }

    pub fn with_range(mut self, date_range: Option<DateRange>) -> Self {
        self.date_range = date_range;
        self
    }

    pub fn with_filters(mut self, filters: Vec<Filter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn bypass_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanOutput {
    pub rows: Vec<Row>,
    /// Row count after joins and filters, before aggregation and limit.
    pub matched_rows: usize,
    pub sheets: Vec<String>,
}

/// Cached, schema-aware access to the data source.
pub struct DataAccessLayer {
    source: Arc<dyn DataSource>,
    schema: SchemaRegistry,
    cache: DataCache<Arc<Vec<Row>>>,
}

impl DataAccessLayer {
    pub fn new(source: Arc<dyn DataSource>, schema: SchemaRegistry, cache: DataCache<Arc<Vec<Row>>>) -> Self {
        Self { source, schema, cache }
    }

    pub fn from_config(
        source: Arc<dyn DataSource>,
        schema: SchemaRegistry,
        clock: Arc<dyn Clock>,
        config: &DataConfig,
    ) -> Self {
        let policy = TtlPolicy::from_schema(&schema, config.cache_default_ttl_secs);
        let cache = DataCache::new(clock, policy, config.cache_capacity);
        Self::new(source, schema, cache)
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    /// Reads one sheet. The filtered but unlimited result is what gets
    /// cached, so reads that differ only by limit share an entry.
    pub async fn get(&self, request: &GetRequest) -> Result<Vec<Row>, DataAccessError> {
        let rows = self.filtered_rows(request).await?;
        Ok(match request.limit {
            Some(limit) => rows.iter().take(limit).cloned().collect(),
            None => rows.as_ref().clone(),
        })
    }

    async fn filtered_rows(&self, request: &GetRequest) -> Result<Arc<Vec<Row>>, DataAccessError> {
        let sheet = self
            .schema
            .sheet(&request.sheet)
            .ok_or_else(|| DataAccessError::UnknownSheet(request.sheet.clone()))?;
        let key = CacheKey::new(sheet.key, request.date_range.as_ref(), &request.filters);

        if !request.skip_cache {
            if let Some(rows) = self.cache.get(&key).await {
                return Ok(rows);
            }
        }

        let fetched = self.source.sheet_rows(sheet.name, sheet.group_key).await.map_err(|source| {
            warn!(
                event_name = "data.fetch.failed",
                sheet = sheet.key,
                error = %source,
                "sheet fetch failed"
            );
            DataAccessError::Fetch { sheet: sheet.key.to_owned(), source }
        })?;
        let fetched_count = fetched.len();

        let mut rows = fetched;
        if let (Some(range), Some(date_column)) = (request.date_range.as_ref(), sheet.date_column) {
            rows = ops::filter_by_date(rows, date_column, range);
        }
        rows = ops::apply_filters(rows, &request.filters);

        debug!(
            event_name = "data.fetch.completed",
            sheet = sheet.key,
            fetched = fetched_count,
            matched = rows.len(),
            "sheet fetched"
        );

        let rows = Arc::new(rows);
        self.cache.insert(key, Arc::clone(&rows)).await;
        Ok(rows)
    }

    /// Executes a compiled plan: per-sheet reads, left joins along the plan
    /// edges starting from the primary sheet, then aggregation, ordering and
    /// limit.
    ///
    /// The date window applies to the primary sheet (or the first sheet with
    /// a date column). Filters on columns the primary sheet owns are pushed
    /// down into its read; every other filter runs on the joined rows so it
    /// narrows the result instead of only the joined side.
    pub async fn execute_plan(&self, plan: &QueryPlan) -> Result<PlanOutput, DataAccessError> {
        let dated_sheet = plan
            .sheets
            .iter()
            .find(|sheet| self.schema.date_column(sheet).is_some())
            .map(String::as_str);

        let primary_schema = self.schema.sheet(plan.primary_sheet());
        let (pushed, deferred): (Vec<Filter>, Vec<Filter>) = plan
            .filters
            .iter()
            .cloned()
            .partition(|filter| primary_schema.is_some_and(|schema| schema.has_column(&filter.column)));

        let mut fetched = Vec::with_capacity(plan.sheets.len());
        for (index, sheet) in plan.sheets.iter().enumerate() {
            let date_range = if Some(sheet.as_str()) == dated_sheet { plan.date_range } else { None };
            let filters = if index == 0 { pushed.clone() } else { Vec::new() };
            let request = GetRequest::new(sheet.clone()).with_range(date_range).with_filters(filters);
            fetched.push((sheet.as_str(), self.filtered_rows(&request).await?));
        }

        let Some((primary, primary_rows)) = fetched.first() else {
            return Ok(PlanOutput::default());
        };
        let mut rows = primary_rows.as_ref().clone();
        let mut joined: HashSet<&str> = HashSet::from([*primary]);

        let mut pending: Vec<&JoinEdge> = plan.joins.iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|edge| {
                let left_in = joined.contains(edge.left_sheet.as_str());
                let right_in = joined.contains(edge.right_sheet.as_str());
                let (incoming, oriented) = match (left_in, right_in) {
                    (true, true) => return false,
                    (true, false) => (edge.right_sheet.as_str(), (*edge).clone()),
                    (false, true) => (edge.left_sheet.as_str(), reverse(edge)),
                    (false, false) => return true,
                };
                if let Some((name, other_rows)) = fetched.iter().find(|(name, _)| *name == incoming) {
                    rows = ops::left_join(std::mem::take(&mut rows), other_rows, &oriented);
                    joined.insert(name);
                }
                false
            });
            if pending.len() == before {
                warn!(
                    event_name = "data.plan.unreachable_join",
                    edges = pending.len(),
                    "join edges not connected to the primary sheet were skipped"
                );
                break;
            }
        }

        let mut rows = ops::apply_filters(rows, &deferred);
        let matched_rows = rows.len();

        if plan.is_aggregating() {
            rows = ops::aggregate(&rows, &plan.aggregations, &plan.group_by);
        }
        ops::sort_rows(&mut rows, &plan.order_by);
        if let Some(limit) = plan.limit {
            rows.truncate(limit as usize);
        }

        Ok(PlanOutput { rows, matched_rows, sheets: plan.sheets.clone() })
    }

    pub async fn invalidate(&self, sheet: &str) -> usize {
        self.cache.invalidate(sheet).await
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    pub async fn sweep_expired(&self) -> usize {
        self.cache.sweep_expired().await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }
}

fn reverse(edge: &JoinEdge) -> JoinEdge {
    JoinEdge {
        left_sheet: edge.right_sheet.clone(),
        right_sheet: edge.left_sheet.clone(),
        left_key: edge.right_key.clone(),
        right_key: edge.left_key.clone(),
    }
}
