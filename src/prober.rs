use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::StatusCode;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};

/// What a single probe learned about one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// The endpoint answered as the active login portal.
    Present,
    /// The network is not redirecting us to a portal.
    Absent,
    /// Timeout, transport error or an unexpected status.
    Inconclusive,
}

pub fn classify_status(status: StatusCode) -> ProbeVerdict {
    match status {
        StatusCode::OK => ProbeVerdict::Present,
        StatusCode::UNAUTHORIZED => ProbeVerdict::Absent,
        _ => ProbeVerdict::Inconclusive,
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeVerdict;
}

/// Plain HTTP GET probe.
#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(|err| format!("failed to create HTTP client: {err}"))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeVerdict {
        match self.client.get(url).send().await {
            Ok(response) => {
                let status = response.status();
                debug!("probe {url}: HTTP {status}");
                classify_status(status)
            }
            Err(err) => {
                debug!("probe {url} failed: {err}");
                ProbeVerdict::Inconclusive
            }
        }
    }
}

/// Races the candidate portal endpoints against each other.
#[derive(Clone)]
pub struct EndpointProber {
    endpoints: Arc<[String]>,
    probe: Arc<dyn Probe>,
    timeout: Duration,
}

impl EndpointProber {
    pub fn new(endpoints: Vec<String>, probe: Arc<dyn Probe>, timeout: Duration) -> Self {
        Self {
            endpoints: endpoints.into(),
            probe,
            timeout,
        }
    }

    /// First endpoint confirmed as the portal, or `None`.
    ///
    /// A `Present` answer wins immediately. An `Absent` answer ends the race
    /// with `None` without waiting for slower endpoints. Inconclusive answers
    /// are skipped; if all are inconclusive the race ends once every probe has
    /// settled. Losing probes keep running detached and their answers are
    /// dropped.
    pub async fn find_portal(&self) -> Option<String> {
        let started = Instant::now();
        let (tx, mut rx) = mpsc::channel(self.endpoints.len().max(1));

        for url in self.endpoints.iter().cloned() {
            let probe = Arc::clone(&self.probe);
            let tx = tx.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                let verdict = match time::timeout(timeout, probe.probe(&url)).await {
                    Ok(verdict) => verdict,
                    Err(_) => ProbeVerdict::Inconclusive,
                };
                // The race may already be decided.
                let _ = tx.send((url, verdict)).await;
            });
        }
        drop(tx);

        while let Some((url, verdict)) = rx.recv().await {
            match verdict {
                ProbeVerdict::Present => {
                    info!("portal found at {} in {:?}", url, started.elapsed());
                    return Some(url);
                }
                ProbeVerdict::Absent => {
                    info!("{} reports no portal, took {:?}", url, started.elapsed());
                    return None;
                }
                ProbeVerdict::Inconclusive => debug!("probe of {url} inconclusive"),
            }
        }

        info!("no portal endpoint answered, took {:?}", started.elapsed());
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProbe;

    const A: &str = "https://a.example/Connect/PortalMain";
    const B: &str = "https://b.example/Connect/PortalMain";

    fn prober(probe: FakeProbe) -> EndpointProber {
        EndpointProber::new(
            vec![A.to_string(), B.to_string()],
            Arc::new(probe),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(StatusCode::OK), ProbeVerdict::Present);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ProbeVerdict::Absent);
        assert_eq!(classify_status(StatusCode::FOUND), ProbeVerdict::Inconclusive);
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            ProbeVerdict::Inconclusive
        );
    }

    #[tokio::test(start_paused = true)]
    async fn absent_short_circuits_the_race() {
        let probe = FakeProbe::new()
            .answer(A, Duration::from_millis(50), ProbeVerdict::Present)
            .answer(B, Duration::from_millis(10), ProbeVerdict::Absent);

        let started = Instant::now();
        assert_eq!(prober(probe).find_portal().await, None);
        assert_eq!(started.elapsed(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn first_present_wins() {
        let probe = FakeProbe::new()
            .answer(A, Duration::from_millis(10), ProbeVerdict::Present)
            .answer(B, Duration::from_millis(50), ProbeVerdict::Present);

        let started = Instant::now();
        assert_eq!(prober(probe).find_portal().await.as_deref(), Some(A));
        assert_eq!(started.elapsed(), Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn slower_mirror_wins_when_faster_is_inconclusive() {
        let probe = FakeProbe::new()
            .answer(A, Duration::from_millis(5), ProbeVerdict::Inconclusive)
            .answer(B, Duration::from_millis(30), ProbeVerdict::Present);

        assert_eq!(prober(probe).find_portal().await.as_deref(), Some(B));
    }

    #[tokio::test(start_paused = true)]
    async fn all_timeouts_wait_for_the_full_timeout() {
        let probe = FakeProbe::new()
            .answer(A, Duration::from_secs(60), ProbeVerdict::Present)
            .answer(B, Duration::from_secs(60), ProbeVerdict::Present);

        let started = Instant::now();
        assert_eq!(prober(probe).find_portal().await, None);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn every_endpoint_is_probed() {
        let probe = Arc::new(FakeProbe::new());
        let prober = EndpointProber::new(
            vec![A.to_string(), B.to_string()],
            probe.clone(),
            Duration::from_secs(1),
        );
        assert_eq!(prober.find_portal().await, None);
        assert_eq!(probe.calls(), 2);
    }
}
