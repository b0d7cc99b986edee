//! WMS status served as JSON over HTTP.
//!
//! Expected document:
//! ```json
//! {
//!   "sites": {"BNL_PROD": {"cloud": "US", "status": "online", "jobs": {"activated": 120}}},
//!   "clouds": {"US": {"status": "online"}}
//! }
//! ```
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::Map;
use crate::config::BackendParams;
use crate::poller::aggregate::{PANDA_STATES, RawSite, StateMapping, WmsAggregate};
use crate::poller::{PollResult, StatusSource};
use crate::status::snapshot::WmsSnapshot;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PandaSource {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl PandaSource {
    pub fn new(params: &BackendParams) -> PollResult<Self> {
        let url = params.require("url")?;
        let url = reqwest::Url::parse(url).with_context(|| format!("Invalid WMS URL `{url}`"))?;
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("pilotfactory/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Cannot create HTTP client")?;
        Ok(Self { client, url })
    }
}

impl StatusSource<WmsSnapshot> for PandaSource {
    fn query(&self) -> Pin<Box<dyn Future<Output = PollResult<Vec<u8>>> + Send + '_>> {
        Box::pin(async move {
            log::debug!("Fetching WMS status from {}", self.url);
            let response = self
                .client
                .get(self.url.clone())
                .send()
                .await
                .with_context(|| format!("Request to {} failed", self.url))?
                .error_for_status()?;
            let body = response
                .bytes()
                .await
                .with_context(|| format!("Cannot read response of {}", self.url))?;
            Ok(body.to_vec())
        })
    }

    fn parse(&self, raw: &[u8]) -> PollResult<WmsAggregate> {
        parse_wms_status(raw)
    }

    fn state_mapping(&self) -> &StateMapping {
        &PANDA_STATES
    }
}

#[derive(Deserialize)]
struct WmsDocument {
    #[serde(default)]
    sites: Map<String, SiteDocument>,
    #[serde(default)]
    clouds: Map<String, CloudDocument>,
}

#[derive(Deserialize)]
struct SiteDocument {
    cloud: Option<String>,
    status: Option<String>,
    #[serde(default)]
    jobs: Map<String, u64>,
}

#[derive(Deserialize)]
struct CloudDocument {
    status: String,
}

fn parse_wms_status(raw: &[u8]) -> PollResult<WmsAggregate> {
    let document: WmsDocument =
        serde_json::from_slice(raw).context("Cannot parse WMS status document")?;
    let sites = document
        .sites
        .into_iter()
        .map(|(name, site)| {
            let site = RawSite {
                cloud: site.cloud,
                status: site.status,
                jobs: site.jobs,
            };
            (name, site)
        })
        .collect();
    let clouds = document
        .clouds
        .into_iter()
        .map(|(name, cloud)| (name, cloud.status))
        .collect();
    Ok(WmsAggregate { sites, clouds })
}

#[cfg(test)]
mod tests {
    use super::{PandaSource, parse_wms_status};
    use crate::config::BackendParams;
    use crate::poller::aggregate::PANDA_STATES;
    use crate::status::snapshot::{Snapshot, WmsSnapshot};
    use crate::status::{CanonicalState, ServiceStatus};
    use std::time::Instant;

    #[test]
    fn parse_document() {
        let document = r#"{
            "sites": {
                "BNL_PROD": {"cloud": "US", "status": "online",
                             "jobs": {"activated": 50, "running": 20, "defined": 3}},
                "MWT2": {"cloud": "US", "status": "brokeroff", "jobs": {}},
                "CERN": {"jobs": {"activated": 1}}
            },
            "clouds": {"US": {"status": "online"}, "DE": {"status": "offline"}}
        }"#;
        let aggregate = parse_wms_status(document.as_bytes()).unwrap();
        let snapshot = WmsSnapshot::publish(aggregate, &PANDA_STATES, Instant::now());

        let jobs = snapshot.site_jobs("BNL_PROD");
        assert_eq!(jobs.get(CanonicalState::Ready), 50);
        assert_eq!(jobs.get(CanonicalState::Running), 20);
        assert_eq!(jobs.get(CanonicalState::Pending), 3);
        assert_eq!(
            snapshot.operational_status("MWT2", None),
            Some(ServiceStatus::Offline)
        );
        assert_eq!(
            snapshot.operational_status("CERN", None),
            Some(ServiceStatus::Online)
        );
        assert_eq!(
            snapshot.operational_status("CERN", Some("DE")),
            Some(ServiceStatus::Offline)
        );
    }

    #[test]
    fn parse_empty_document() {
        let aggregate = parse_wms_status(b"{}").unwrap();
        assert!(aggregate.sites.is_empty());
        assert!(aggregate.clouds.is_empty());
    }

    #[test]
    fn parse_malformed_document() {
        assert!(parse_wms_status(b"<html>Service unavailable</html>").is_err());
        assert!(parse_wms_status(br#"{"sites": {"A": {"jobs": {"activated": -1}}}}"#).is_err());
    }

    #[test]
    fn url_is_required() {
        assert!(PandaSource::new(&BackendParams::from_pairs("panda", &[])).is_err());
        let invalid = BackendParams::from_pairs("panda", &[("url", "not a url")]);
        assert!(PandaSource::new(&invalid).is_err());
        assert!(
            PandaSource::new(&BackendParams::from_pairs(
                "panda",
                &[("url", "https://wms.example/status")]
            ))
            .is_ok()
        );
    }
}
