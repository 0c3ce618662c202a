use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::{Bucket, Sample, TimeSeriesBackend};
use crate::config::InfluxConfig;
use crate::error::QueryError;
use crate::metric::SeriesRef;
use crate::query::{flux, LabeledQuery};

const DEFAULT_PORT: u16 = 8086;

/// InfluxDB 2 over its HTTP query API.
pub struct InfluxBackend {
    http: reqwest::Client,
    query_url: String,
    token: String,
    bucket: String,
    timezone: Tz,
}

impl InfluxBackend {
    pub fn new(config: &InfluxConfig, timezone: Tz, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| anyhow::anyhow!("failed to build influx http client: {err}"))?;
        Ok(Self {
            http,
            query_url: format!("{}/api/v2/query", base_url(&config.host, config.use_ssl)),
            token: config.token.clone(),
            bucket: config.bucket.clone(),
            timezone,
        }
        .with_org(&config.org))
    }

    fn with_org(mut self, org: &str) -> Self {
        self.query_url = reqwest::Url::parse_with_params(&self.query_url, &[("org", org)])
            .map(|url| url.to_string())
            .unwrap_or_else(|_| format!("{}?org={org}", self.query_url));
        self
    }

    async fn run(&self, script: String) -> Result<String, QueryError> {
        tracing::debug!(script = %script, "influx query");
        let body = serde_json::json!({
            "query": script,
            "type": "flux",
            "dialect": {
                "header": true,
                "delimiter": ",",
                "annotations": ["datatype", "group", "default"],
            },
        });

        let resp = self
            .http
            .post(&self.query_url)
            .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.token))
            .header(reqwest::header::ACCEPT, "application/csv")
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                QueryError::BackendUnavailable(format!("influx request failed: {err}"))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(QueryError::BackendUnavailable(format!(
                "influx query failed: {status} {body}"
            )));
        }
        resp.text().await.map_err(|err| {
            QueryError::BackendUnavailable(format!("failed to read influx response: {err}"))
        })
    }
}

#[async_trait]
impl TimeSeriesBackend for InfluxBackend {
    fn name(&self) -> &'static str {
        "influx"
    }

    async fn aggregate(
        &self,
        queries: &[LabeledQuery],
    ) -> Result<BTreeMap<String, Vec<Bucket>>, QueryError> {
        if queries.is_empty() {
            return Ok(BTreeMap::new());
        }
        let script = flux::render_aggregations(&self.bucket, self.timezone.name(), queries);
        let body = self.run(script).await?;
        flux::parse_annotated_csv(&body)
    }

    async fn last_sample(
        &self,
        series: SeriesRef,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Result<Option<Sample>, QueryError> {
        let script = flux::render_last_sample(&self.bucket, series, start, stop);
        let body = self.run(script).await?;
        flux::parse_last_sample(&body)
    }
}

/// `host`, `host:port` or a full URL; bare hosts get the default port.
fn base_url(host: &str, use_ssl: bool) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        return host.to_string();
    }
    let scheme = if use_ssl { "https" } else { "http" };
    if host.contains(':') {
        format!("{scheme}://{host}")
    } else {
        format!("{scheme}://{host}:{DEFAULT_PORT}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_defaults_port_and_scheme() {
        assert_eq!(base_url("influx.local", true), "https://influx.local:8086");
        assert_eq!(base_url("influx.local:9999", false), "http://influx.local:9999");
        assert_eq!(base_url("http://10.0.0.2:8086/", true), "http://10.0.0.2:8086");
    }

    #[test]
    fn query_url_carries_org() {
        let config = InfluxConfig {
            host: "influx.local".to_string(),
            org: "home lab".to_string(),
            bucket: "readings".to_string(),
            token: "secret".to_string(),
            use_ssl: false,
        };
        let backend = InfluxBackend::new(
            &config,
            chrono_tz::Europe::Amsterdam,
            Duration::from_secs(5),
        )
        .expect("backend");
        assert_eq!(
            backend.query_url,
            "http://influx.local:8086/api/v2/query?org=home+lab"
        );
        assert_eq!(backend.name(), "influx");
    }
}
