//! Run orchestration: token, candidates, then per-candidate resolution under a deadline.
use crate::location::LocationEngine;
use crate::models::{AsnInfo, LocatorResult, NetworkInfo, OcaCandidate, OcaRecord};
use crate::network::{lookup_or_unknown, resolve_hostname};
use crate::{LocatorError, OcaLocator};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Await `fut` unless the run deadline passes first.
async fn before_deadline<T, F>(deadline: Instant, stage: &'static str, fut: F) -> Result<T, LocatorError>
where
    F: Future<Output = Result<T, LocatorError>>,
{
    match tokio::time::timeout_at(deadline, fut).await {
        Ok(res) => res,
        Err(_) => Err(LocatorError::DeadlineExceeded { stage }),
    }
}

impl OcaLocator {
    /// Run the full discovery pipeline.
    ///
    /// Fails only if the token or the candidate list cannot be obtained. Otherwise the
    /// result holds exactly one record per candidate, in candidate order; candidates still
    /// in flight when the deadline passes are reported as unresolved.
    pub async fn locate(&self) -> Result<LocatorResult, LocatorError> {
        let deadline = Instant::now() + self.config.deadline;
        let query_time = Utc::now();

        let (network, token) = tokio::join!(
            async {
                tokio::time::timeout_at(deadline, self.network_info())
                    .await
                    .unwrap_or_else(|_| {
                        warn!("local network lookup did not finish before the deadline");
                        NetworkInfo::default()
                    })
            },
            before_deadline(deadline, "token extraction", self.token())
        );
        let token = token?;

        let candidates =
            before_deadline(deadline, "candidate fetch", self.speedtest.candidates(&token))
                .await?;

        let records = self
            .process_candidates(candidates, network.asn, deadline)
            .await;
        info!(
            "located {} of {} OCAs",
            records.iter().filter(|r| r.is_resolved()).count(),
            records.len()
        );

        Ok(LocatorResult {
            network,
            records,
            query_time,
            token,
        })
    }

    /// Resolve given OCA hostnames directly, without contacting fast.com.
    ///
    /// Runs under the same concurrency limit and deadline as [OcaLocator::locate].
    pub async fn locate_hostnames(&self, hostnames: &[String]) -> Vec<OcaRecord> {
        let deadline = Instant::now() + self.config.deadline;
        let network_asn = tokio::time::timeout_at(deadline, self.network_info())
            .await
            .ok()
            .and_then(|network| network.asn);
        let candidates = hostnames
            .iter()
            .map(|hostname| OcaCandidate {
                hostname: hostname.trim().to_ascii_lowercase(),
                url: format!("https://{}/speedtest", hostname.trim()),
                metadata: serde_json::Value::Null,
            })
            .collect();
        self.process_candidates(candidates, network_asn, deadline)
            .await
    }

    async fn process_candidates(
        &self,
        candidates: Vec<OcaCandidate>,
        network_asn: Option<u32>,
        deadline: Instant,
    ) -> Vec<OcaRecord> {
        let engine = self.engine();
        let total = candidates.len();
        let mut slots: Vec<Option<OcaRecord>> = vec![None; total];

        {
            let engine = &engine;
            let mut results = stream::iter(candidates.iter().cloned().enumerate())
                .map(|(idx, candidate)| async move {
                    (idx, self.process_candidate(engine, candidate, network_asn).await)
                })
                .buffer_unordered(self.config.concurrency.max(1));

            loop {
                match tokio::time::timeout_at(deadline, results.next()).await {
                    Ok(Some((idx, record))) => slots[idx] = Some(record),
                    Ok(None) => break,
                    Err(_) => {
                        let done = slots.iter().filter(|s| s.is_some()).count();
                        warn!(
                            "deadline reached with {} of {} candidates unfinished",
                            total - done,
                            total
                        );
                        break;
                    }
                }
            }
            // dropping the stream cancels whatever is still in flight
        }

        slots
            .into_iter()
            .zip(candidates)
            .map(|(slot, candidate)| slot.unwrap_or_else(|| OcaRecord::unresolved(candidate)))
            .collect()
    }

    async fn process_candidate(
        &self,
        engine: &LocationEngine,
        candidate: OcaCandidate,
        network_asn: Option<u32>,
    ) -> OcaRecord {
        let ip = resolve_hostname(self.dns.as_ref(), &candidate.hostname).await;

        let asn_info = match ip {
            Some(ip) if self.config.lookup_oca_asn => {
                lookup_or_unknown(self.whois.as_ref(), ip).await
            }
            _ => AsnInfo::default(),
        };

        let asn = asn_info.asn.or(network_asn);
        let ip_text = ip.map(|ip| ip.to_string());
        let resolution = engine
            .resolve(&candidate.hostname, ip_text.as_deref(), asn)
            .await;
        debug!(
            "{}: ip={:?} asn={:?} method={}",
            candidate.hostname, ip, asn, resolution.method
        );

        OcaRecord::assemble(candidate, ip, asn_info, resolution)
    }
}
