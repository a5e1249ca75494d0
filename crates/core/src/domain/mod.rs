pub mod agent;
pub mod conversation;
pub mod date_range;
pub mod query;
pub mod row;
