use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::date_range::DateRange;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    #[error("unknown sheet `{0}`")]
    UnknownSheet(String),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("query plan rejected: {}", errors.join("; "))]
    Validation { errors: Vec<String>, suggestions: Vec<String> },
    #[error("no rows matched ({})", describe_range(date_range.as_ref()))]
    NoData { date_range: Option<DateRange> },
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("node `{node}` failed: {message}")]
    NodeExecution { node: String, message: String },
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("no data: {message}")]
    NoData { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "I couldn't turn that question into a valid data request. Try naming the data and period more explicitly."
            }
            Self::NoData { .. } => "No data matched that question for the period used.",
            Self::ServiceUnavailable { .. } => {
                "A data or AI service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NoData { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NoData { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned }
            }
            error @ ApplicationError::Validation { .. } => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned }
            }
            error @ ApplicationError::NoData { .. } => {
                Self::NoData { message: error.to_string(), correlation_id: unassigned }
            }
            ApplicationError::ServiceUnavailable(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned }
            }
            error @ ApplicationError::NodeExecution { .. } => {
                Self::Internal { message: error.to_string(), correlation_id: unassigned }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned }
            }
        }
    }
}

fn describe_range(date_range: Option<&DateRange>) -> String {
    date_range.map(ToString::to_string).unwrap_or_else(|| "full range".to_owned())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::domain::date_range::DateRange;
    use crate::errors::{ApplicationError, DomainError, InterfaceError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface =
            ApplicationError::from(DomainError::UnknownSheet("ledger".to_owned()))
                .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn validation_error_lists_every_problem() {
        let error = ApplicationError::Validation {
            errors: vec!["unknown sheet `x`".to_owned(), "limit must be positive".to_owned()],
            suggestions: Vec::new(),
        };

        assert_eq!(
            error.to_string(),
            "query plan rejected: unknown sheet `x`; limit must be positive"
        );
    }

    #[test]
    fn no_data_is_distinct_from_failure_and_names_the_range() {
        let day = NaiveDate::from_ymd_opt(2025, 11, 1).expect("date");
        let range = DateRange::month(2025, 11).expect("month");
        let error = ApplicationError::NoData { date_range: Some(range) };

        assert_eq!(error.to_string(), "no rows matched (2025-11-01 ~ 2025-11-30)");
        assert_eq!(range.start(), day);

        let interface = error.into_interface("req-2");
        assert!(matches!(interface, InterfaceError::NoData { .. }));
        assert_eq!(
            ApplicationError::NoData { date_range: None }.to_string(),
            "no rows matched (full range)"
        );
    }

    #[test]
    fn service_unavailable_has_user_safe_message() {
        let interface =
            ApplicationError::ServiceUnavailable("connection refused".to_owned())
                .into_interface("req-3");

        assert_eq!(interface.correlation_id(), "req-3");
        assert_eq!(
            interface.user_message(),
            "A data or AI service is temporarily unavailable. Please retry shortly."
        );
        assert!(!interface.user_message().contains("connection refused"));
    }

    #[test]
    fn configuration_error_maps_to_internal() {
        let interface = ApplicationError::Configuration("workflow graph has no root".to_owned())
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
