// src/metrics.rs
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::net::ToSocketAddrs;
use std::thread;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static MESSAGES_DECODED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("fast_messages_decoded", "Messages decoded successfully")
        .expect("fast_messages_decoded");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static FIELDS_DECODED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("fast_fields_decoded", "Fields decoded across all messages")
        .expect("fast_fields_decoded");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static BYTES_CONSUMED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new("fast_bytes_consumed", "Wire bytes consumed by the decoder")
        .expect("fast_bytes_consumed");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static DECODE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("fast_decode_errors", "Decode errors by kind"),
        &["kind"],
    )
    .expect("fast_decode_errors");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

static DECODE_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    // Buckets in seconds: 100ns .. 100us
    let buckets = vec![1e-7, 2e-7, 5e-7, 1e-6, 2e-6, 5e-6, 1e-5, 2e-5, 5e-5, 1e-4];
    let h = Histogram::with_opts(
        HistogramOpts::new("fast_decode_seconds", "Per-message decode latency").buckets(buckets),
    )
    .expect("fast_decode_seconds");
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub fn inc_message(fields: usize, bytes: usize) {
    MESSAGES_DECODED.inc();
    FIELDS_DECODED.inc_by(fields as u64);
    BYTES_CONSUMED.inc_by(bytes as u64);
}

pub fn inc_decode_error(kind: &str) {
    DECODE_ERRORS.with_label_values(&[kind]).inc();
}

pub fn observe_decode_ns(ns: u64) {
    let secs = (ns as f64) / 1_000_000_000.0;
    DECODE_LATENCY.observe(secs);
}

pub fn spawn_http<A: ToSocketAddrs + Send + 'static>(addr: A) -> thread::JoinHandle<()> {
    let addr_string = addr
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "0.0.0.0:9100".to_string());

    thread::spawn(move || {
        let server = tiny_http::Server::http(&addr_string).expect("start metrics http");
        log::info!("prometheus metrics listening on http://{addr_string}/metrics");
        let encoder = TextEncoder::new();
        loop {
            if let Ok(req) = server.recv() {
                let url = req.url().to_string();
                if url == "/metrics" {
                    let metric_families = REGISTRY.gather();
                    let mut buf = Vec::with_capacity(16 * 1024);
                    encoder.encode(&metric_families, &mut buf).ok();
                    let resp = tiny_http::Response::from_data(buf)
                        .with_status_code(200)
                        .with_header(
                            tiny_http::Header::from_bytes(
                                &b"Content-Type"[..],
                                &b"text/plain; version=0.0.4"[..],
                            )
                            .unwrap(),
                        );
                    let _ = req.respond(resp);
                } else if url == "/live" || url == "/healthz" {
                    let _ =
                        req.respond(tiny_http::Response::from_string("OK").with_status_code(200));
                } else {
                    let _ = req.respond(tiny_http::Response::empty(404));
                }
            }
        }
    })
}
