use crate::adapters::redis::counters::CounterStore;
use crate::config::RateLimitConfig;
use axum::http::HeaderMap;
use ipnetwork::IpNetwork;
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::net::IpAddr;
use uuid::Uuid;

/// Outcome of a `GetBundle` rate-limit check. `RateLimitedTargeted` is distinguished
/// from `RateLimited` because it signals a drain against a specific target user rather
/// than a noisy requester or IP, and is logged at WARN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Ok,
    RateLimited,
    RateLimitedTargeted,
}

#[derive(Clone, Debug)]
pub struct Metrics {
    pub(crate) decisions_total: Counter<u64>,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        let meter = global::meter("keytrans-directory");
        Self {
            decisions_total: meter
                .u64_counter("keytrans_rate_limit_decisions_total")
                .with_description("Rate limit decisions by axis and outcome")
                .build(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves the client IP for rate-limiting, trusting `X-Forwarded-For` only when the
/// immediate peer is a configured trusted proxy.
#[derive(Clone, Debug)]
pub struct IpKeyExtractor {
    pub(crate) trusted_proxies: Vec<IpNetwork>,
}

impl IpKeyExtractor {
    #[must_use]
    pub const fn new(trusted_proxies: Vec<IpNetwork>) -> Self {
        Self { trusted_proxies }
    }

    #[must_use]
    pub fn identify_client_ip(&self, headers: &HeaderMap, peer_addr: IpAddr) -> IpAddr {
        if !self.is_trusted(&peer_addr) {
            return peer_addr;
        }

        let xff = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());

        if let Some(xff_val) = xff
            && let Some(real_ip) =
                xff_val.rsplit(',').filter_map(|s| s.trim().parse::<IpAddr>().ok()).find(|ip| !self.is_trusted(ip))
        {
            return real_ip;
        }

        peer_addr
    }

    fn is_trusted(&self, ip: &IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(*ip))
    }
}

/// C3: the three-axis sliding-window rate limiter guarding `GetBundle`. Backed by the
/// Redis-resident `CounterStore`; fails closed (a store outage is folded into
/// `RateLimitDecision::RateLimited`, not treated as an allowed request).
#[derive(Clone, Debug)]
pub struct RateLimitService {
    counters: CounterStore,
    config: RateLimitConfig,
    pub extractor: IpKeyExtractor,
    metrics: Metrics,
}

impl RateLimitService {
    #[must_use]
    pub fn new(counters: CounterStore, config: RateLimitConfig, trusted_proxies: Vec<IpNetwork>) -> Self {
        Self { counters, config, extractor: IpKeyExtractor::new(trusted_proxies), metrics: Metrics::new() }
    }

    /// Checks all three axes for a `GetBundle(target, requester)` call from `ip`.
    ///
    /// Every axis is incremented regardless of whether an earlier axis already tripped,
    /// so logging always reflects which axes are under pressure; the caller rejects as
    /// soon as any axis reports over-limit.
    ///
    /// Fails closed: if the counter store is unreachable, this returns `RateLimited`
    /// rather than propagating the error, so an outage never opens the door to a drain
    /// attack.
    ///
    /// # Errors
    /// This call itself never errors; store outages are folded into the decision.
    pub async fn check_bundle_fetch(
        &self,
        requester: Uuid,
        target: Uuid,
        ip: IpAddr,
    ) -> crate::error::Result<RateLimitDecision> {
        let window = self.config.window_secs;

        let Ok(requester_count) = self.counters.increment(&format!("rl:bundle:req:{requester}"), window).await else {
            return Ok(self.fail_closed());
        };
        let Ok(target_count) = self.counters.increment(&format!("rl:bundle:tgt:{target}"), window).await else {
            return Ok(self.fail_closed());
        };
        let Ok(ip_count) = self.counters.increment(&format!("rl:bundle:ip:{ip}"), window).await else {
            return Ok(self.fail_closed());
        };

        let requester_tripped = requester_count > u64::from(self.config.requester_per_min);
        let target_tripped = target_count > u64::from(self.config.target_per_min);
        let ip_tripped = ip_count > u64::from(self.config.ip_per_min);

        let decision = if target_tripped {
            RateLimitDecision::RateLimitedTargeted
        } else if requester_tripped || ip_tripped {
            RateLimitDecision::RateLimited
        } else {
            RateLimitDecision::Ok
        };

        self.record(requester_tripped, target_tripped, ip_tripped, decision);
        Ok(decision)
    }

    /// The counter store is unreachable: deny the bundle fetch rather than risk serving
    /// an unbounded number of them while the limiter is blind.
    fn fail_closed(&self) -> RateLimitDecision {
        tracing::warn!("counter store unreachable, failing closed on bundle fetch");
        self.metrics.decisions_total.add(1, &[KeyValue::new("axis", "store_unavailable"), KeyValue::new("tripped", true)]);
        RateLimitDecision::RateLimited
    }

    fn record(&self, requester_tripped: bool, target_tripped: bool, ip_tripped: bool, decision: RateLimitDecision) {
        if target_tripped {
            tracing::warn!("rate limit tripped on target axis (possible drain attack)");
        }
        for (axis, tripped) in [("requester", requester_tripped), ("target", target_tripped), ("ip", ip_tripped)] {
            self.metrics.decisions_total.add(
                1,
                &[KeyValue::new("axis", axis), KeyValue::new("tripped", tripped)],
            );
        }
        tracing::debug!(?decision, "rate limit decision");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_proxy_forwards_for_header_is_honored() {
        let extractor = IpKeyExtractor::new(vec!["10.0.0.0/8".parse().unwrap()]);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.5".parse().unwrap());
        let peer: IpAddr = "10.0.0.5".parse().unwrap();
        assert_eq!(extractor.identify_client_ip(&headers, peer), "203.0.113.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn untrusted_peer_ignores_forwarded_for_header() {
        let extractor = IpKeyExtractor::new(vec!["10.0.0.0/8".parse().unwrap()]);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
        let peer: IpAddr = "198.51.100.9".parse().unwrap();
        assert_eq!(extractor.identify_client_ip(&headers, peer), peer);
    }
}
