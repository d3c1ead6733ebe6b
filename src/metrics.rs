use prometheus::{
    Encoder, GaugeVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Label value for secret-by-id lookups.
pub const LOOKUP_SECRET: &str = "secret";
/// Label value for key-map lookups.
pub const LOOKUP_KEY: &str = "key";

/// Process-wide instruments. Cache metrics are labelled by lookup type and
/// tenant fingerprint only, so cardinality stays bounded by the number of
/// live tenants.
pub struct Metrics {
    registry: Registry,
    cache_hits: IntCounterVec,
    cache_miss: IntCounterVec,
    cache_size: IntGaugeVec,
    num_clients: IntGauge,
    http_request_total: IntCounterVec,
    http_request_duration: GaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let cache_hits = IntCounterVec::new(Opts::new("cache_hits", "cache hits"), &["type"])
            .expect("valid metric definition");
        let cache_miss = IntCounterVec::new(Opts::new("cache_miss", "cache miss"), &["type"])
            .expect("valid metric definition");
        let cache_size =
            IntGaugeVec::new(Opts::new("cache_size", "cache size"), &["type", "client"])
                .expect("valid metric definition");
        let num_clients = IntGauge::new("num_clients", "number of clients")
            .expect("valid metric definition");
        let http_request_total = IntCounterVec::new(
            Opts::new("http_request_total", "http request total"),
            &["endpoint", "status_code"],
        )
        .expect("valid metric definition");
        let http_request_duration = GaugeVec::new(
            Opts::new("http_request_duration", "http request duration"),
            &["endpoint"],
        )
        .expect("valid metric definition");

        registry
            .register(Box::new(cache_hits.clone()))
            .expect("metric registered once");
        registry
            .register(Box::new(cache_miss.clone()))
            .expect("metric registered once");
        registry
            .register(Box::new(cache_size.clone()))
            .expect("metric registered once");
        registry
            .register(Box::new(num_clients.clone()))
            .expect("metric registered once");
        registry
            .register(Box::new(http_request_total.clone()))
            .expect("metric registered once");
        registry
            .register(Box::new(http_request_duration.clone()))
            .expect("metric registered once");

        Self {
            registry,
            cache_hits,
            cache_miss,
            cache_size,
            num_clients,
            http_request_total,
            http_request_duration,
        }
    }

    pub fn tick_cache_hit(&self, lookup: &str) {
        self.cache_hits.with_label_values(&[lookup]).inc();
    }

    pub fn tick_cache_miss(&self, lookup: &str) {
        self.cache_miss.with_label_values(&[lookup]).inc();
    }

    pub fn set_cache_size(&self, lookup: &str, client: &str, size: usize) {
        self.cache_size
            .with_label_values(&[lookup, client])
            .set(size as i64);
    }

    pub fn set_num_clients(&self, count: usize) {
        self.num_clients.set(count as i64);
    }

    pub fn tick_http_request(&self, endpoint: &str, status_code: &str) {
        self.http_request_total
            .with_label_values(&[endpoint, status_code])
            .inc();
    }

    pub fn observe_http_duration(&self, endpoint: &str, seconds: f64) {
        self.http_request_duration
            .with_label_values(&[endpoint])
            .set(seconds);
    }

    /// Text exposition of everything registered, plus the content type to
    /// serve it under.
    pub fn render(&self) -> (String, &'static str) {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(err) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %err, "failed to encode metrics");
        }
        let output = String::from_utf8(buffer).unwrap_or_default();
        (output, prometheus::TEXT_FORMAT)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
