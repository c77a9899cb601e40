pub mod metrics;
pub mod probe;
pub mod query;
pub mod row;
pub mod target;
