//! Prometheus metrics registry
//!
//! The registry is owned by [`crate::state::AppState`] rather than living in
//! a global, so every router built in tests gets its own set of counters.
//!
//! Author: hephaex@gmail.com

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "turnstile";

/// Application metrics
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// HTTP requests by method, matched route and status
    pub http_requests: IntCounterVec,
    /// HTTP request latency by method and matched route
    pub http_duration: HistogramVec,
    /// Login attempts by role and outcome
    pub logins: IntCounterVec,
    /// Session lifecycle events by role (`created`, `replaced`, `ended`)
    pub sessions: IntCounterVec,
    /// Silent refresh outcomes
    pub silent_refresh: IntCounterVec,
    /// Signed tokens by kind
    pub tokens_issued: IntCounterVec,
    uptime: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by endpoint and status")
                .namespace(NAMESPACE),
            &["method", "endpoint", "status"],
        )?;
        let http_duration = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request latency")
                .namespace(NAMESPACE)
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["method", "endpoint"],
        )?;
        let logins = IntCounterVec::new(
            Opts::new("logins_total", "Login attempts by role and outcome").namespace(NAMESPACE),
            &["role", "outcome"],
        )?;
        let sessions = IntCounterVec::new(
            Opts::new("sessions_total", "Session lifecycle events").namespace(NAMESPACE),
            &["role", "event"],
        )?;
        let silent_refresh = IntCounterVec::new(
            Opts::new("silent_refresh_total", "Silent refresh outcomes").namespace(NAMESPACE),
            &["outcome"],
        )?;
        let tokens_issued = IntCounterVec::new(
            Opts::new("tokens_issued_total", "Signed tokens by kind").namespace(NAMESPACE),
            &["kind"],
        )?;
        let uptime = Gauge::with_opts(
            Opts::new("uptime_seconds", "Time since server start").namespace(NAMESPACE),
        )?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_duration.clone()))?;
        registry.register(Box::new(logins.clone()))?;
        registry.register(Box::new(sessions.clone()))?;
        registry.register(Box::new(silent_refresh.clone()))?;
        registry.register(Box::new(tokens_issued.clone()))?;
        registry.register(Box::new(uptime.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            http_requests,
            http_duration,
            logins,
            sessions,
            silent_refresh,
            tokens_issued,
            uptime,
        })
    }

    /// Record one finished HTTP request
    pub fn observe_request(&self, method: &str, endpoint: &str, status: u16, seconds: f64) {
        self.http_requests
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_duration
            .with_label_values(&[method, endpoint])
            .observe(seconds);
    }

    /// Render all metrics in the text exposition format
    pub fn render(&self, uptime_secs: u64) -> Result<String, prometheus::Error> {
        self.uptime.set(uptime_secs as f64);

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
