use crate::backend::TimeSeriesBackend;
use crate::config::ApiConfig;
use crate::period::PeriodResolver;
use crate::services::metric_query::MetricQueryService;
use crate::services::result_cache::ResultCache;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Source of "now" for period status and rolling windows.
#[derive(Debug, Clone, Copy)]
pub enum Clock {
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Fixed(now) => now,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub resolver: PeriodResolver,
    pub metrics: MetricQueryService,
    pub cache: ResultCache,
    pub clock: Clock,
}

impl AppState {
    pub fn new(config: &ApiConfig, backend: Arc<dyn TimeSeriesBackend>, clock: Clock) -> Self {
        let resolver = PeriodResolver::new(config.timezone);
        let metrics = MetricQueryService::new(backend, config.timezone, config.backend_timeout);
        let cache = ResultCache::new(config.cache_dir.clone());
        Self {
            resolver,
            metrics,
            cache,
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
