pub mod metric_query;
pub mod result_cache;
