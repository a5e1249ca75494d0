use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::query::{FilterOperator, Intent, JoinEdge, QueryPlan};
use crate::errors::ApplicationError;
use crate::schema::SchemaRegistry;

pub const DEFAULT_SHEET: &str = "order";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Compiles intents into executable plans. Pure and deterministic: the same
/// intent always yields the same plan.
#[derive(Clone, Debug, Default)]
pub struct QueryOptimizer {
    schema: SchemaRegistry,
}

impl QueryOptimizer {
    pub fn new(schema: SchemaRegistry) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn optimize(&self, intent: &Intent) -> QueryPlan {
        let entities = &intent.entities;

        let mut sheets = Vec::with_capacity(entities.sheets.len().max(1));
        for sheet in &entities.sheets {
            let sheet = sheet.trim();
            if !sheet.is_empty() && !sheets.iter().any(|seen: &String| seen == sheet) {
                sheets.push(sheet.to_owned());
            }
        }
        if sheets.is_empty() {
            sheets.push(DEFAULT_SHEET.to_owned());
        }

        let joins = self.infer_joins(&sheets);

        QueryPlan {
            sheets,
            date_range: entities.date_range,
            filters: entities.filters.clone(),
            aggregations: entities.aggregations.clone(),
            group_by: entities.group_by.clone(),
            order_by: entities.order_by.clone(),
            limit: entities.limit,
            joins,
        }
    }

    /// One edge per sheet pair: declared foreign key first, then the default
    /// pairing table. Pairs with neither stay unjoined.
    pub fn infer_joins(&self, sheets: &[String]) -> Vec<JoinEdge> {
        let mut joins = Vec::new();
        for (index, first) in sheets.iter().enumerate() {
            for second in &sheets[index + 1..] {
                let edge = self
                    .schema
                    .foreign_key_between(first, second)
                    .or_else(|| self.schema.default_pairing(first, second));
                if let Some(edge) = edge {
                    joins.push(edge);
                }
            }
        }
        joins
    }

    pub fn validate(&self, plan: &QueryPlan, today: NaiveDate) -> ValidationReport {
        let mut report = ValidationReport::default();

        if plan.sheets.is_empty() {
            report.errors.push("at least one sheet is required".to_owned());
        }
        for sheet in &plan.sheets {
            if !self.schema.contains(sheet) {
                report.errors.push(format!(
                    "unknown sheet `{sheet}` (known: {})",
                    self.schema.sheet_keys().join(", ")
                ));
            }
        }

        if let Some(range) = plan.date_range {
            if range.start() > range.end() {
                report.errors.push(format!(
                    "start date {} is after end date {}",
                    range.start(),
                    range.end()
                ));
            } else if range.end() > today {
                report
                    .suggestions
                    .push(format!("end date {} is in the future; data stops at {today}", range.end()));
            }
        }

        for filter in &plan.filters {
            if filter.column.trim().is_empty() {
                report.errors.push("filter is missing its column".to_owned());
            }
            let needs_pair = matches!(filter.operator, FilterOperator::Between);
            if needs_pair && filter.value.as_array().map(Vec::len) != Some(2) {
                report.errors.push(format!(
                    "filter on `{}` uses between but does not supply [low, high]",
                    filter.column
                ));
            }
        }

        if plan.limit == Some(0) {
            report.errors.push("limit must be greater than zero".to_owned());
        }

        if !plan.aggregations.is_empty() && plan.group_by.is_empty() {
            report.suggestions.push(
                "aggregation without group-by collapses everything into one row; add a grouping column for a breakdown"
                    .to_owned(),
            );
        }

        report
    }

    /// Optimize then validate; fatal problems become a typed validation error.
    pub fn compile(&self, intent: &Intent, today: NaiveDate) -> Result<QueryPlan, ApplicationError> {
        let plan = self.optimize(intent);
        let report = self.validate(&plan, today);
        if !report.is_valid() {
            return Err(ApplicationError::Validation {
                errors: report.errors,
                suggestions: report.suggestions,
            });
        }
        Ok(plan)
    }
}
