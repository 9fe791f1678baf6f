use serde::Serialize;
use ts_rs::TS;
use uuid::Uuid;

pub mod agent_execution;
pub mod company_profile;
pub mod execution_artifact;
pub mod execution_status;
pub mod project;
pub mod workflow_execution;

#[cfg(test)]
pub(crate) mod test_utils;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Serialize, TS)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Uuid>,
    pub has_more: bool,
}

pub fn clamp_page_size(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}
