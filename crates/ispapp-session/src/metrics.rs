use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static CONNECTION_CHECKS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "ispapp_connection_checks_total",
            "connectivity probes by outcome",
        ),
        &["result"],
    )
    .expect("valid metric definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static SIGNUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("ispapp_signup_total", "device signup attempts by outcome"),
        &["result"],
    )
    .expect("valid metric definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static TOKEN_REFRESHES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "ispapp_token_refresh_total",
            "token refresh attempts by outcome",
        ),
        &["result"],
    )
    .expect("valid metric definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static POLL_TICKS_SKIPPED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::with_opts(Opts::new(
        "ispapp_poll_ticks_skipped_total",
        "poller ticks skipped because a check was still in flight",
    ))
    .expect("valid metric definition");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn gather() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(target: "ispapp::session", error = %err, "metrics encode error");
    }
    buffer
}
