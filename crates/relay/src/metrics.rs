use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

#[derive(Default)]
pub struct RelayMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    ws_messages_total: Mutex<HashMap<String, u64>>,
    ws_decode_errors_total: Mutex<HashMap<String, u64>>,
    lock_denied_total: AtomicU64,
    dropped_channels_total: AtomicU64,
    active_connections: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_http_request(method: &str, path: &str, status_code: u16, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_http_request(method, path, status_code, latency_ms);
    }
}

pub fn record_ws_message(kind: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_message(kind);
    }
}

pub fn record_ws_decode_error(reason: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_decode_error(reason);
    }
}

pub fn increment_lock_denied() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_lock_denied();
    }
}

pub fn increment_dropped_channels() {
    if let Some(metrics) = global_metrics() {
        metrics.increment_dropped_channels();
    }
}

pub fn set_active_connections(count: usize) {
    if let Some(metrics) = global_metrics() {
        metrics.set_active_connections(count);
    }
}

impl RelayMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_ws_message(&self, kind: &str) {
        increment_label_counter(&self.ws_messages_total, &normalize_label(kind), 1);
    }

    pub fn record_ws_decode_error(&self, reason: &str) {
        increment_label_counter(&self.ws_decode_errors_total, &normalize_label(reason), 1);
    }

    pub fn increment_lock_denied(&self) {
        self.lock_denied_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_dropped_channels(&self) {
        self.dropped_channels_total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn set_active_connections(&self, count: usize) {
        self.active_connections.store(count as u64, Ordering::SeqCst);
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE relay_request_rate_total counter\n");
        append_counter_lines(&mut output, "relay_request_rate_total", &self.request_rate_total);

        output.push_str(
            "# HELP relay_request_errors_total Total HTTP error responses by endpoint.\n",
        );
        output.push_str("# TYPE relay_request_errors_total counter\n");
        append_counter_lines(&mut output, "relay_request_errors_total", &self.request_errors_total);

        output.push_str("# HELP relay_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP relay_request_duration_ms_count Count of HTTP request latency samples by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_count",
            &self.request_duration_count,
        );

        output.push_str(
            "# HELP relay_ws_messages_total Total dispatched websocket messages by kind.\n",
        );
        output.push_str("# TYPE relay_ws_messages_total counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_messages_total",
            "kind",
            &self.ws_messages_total,
        );

        output.push_str(
            "# HELP relay_ws_decode_errors_total Total skipped websocket frames by reason.\n",
        );
        output.push_str("# TYPE relay_ws_decode_errors_total counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_decode_errors_total",
            "reason",
            &self.ws_decode_errors_total,
        );

        output.push_str("# HELP relay_lock_denied_total Total denied lock acquisitions.\n");
        output.push_str("# TYPE relay_lock_denied_total counter\n");
        output.push_str(&format!(
            "relay_lock_denied_total {}\n",
            self.lock_denied_total.load(Ordering::SeqCst)
        ));

        output.push_str(
            "# HELP relay_dropped_channels_total Outbound channels pruned after a failed send.\n",
        );
        output.push_str("# TYPE relay_dropped_channels_total counter\n");
        output.push_str(&format!(
            "relay_dropped_channels_total {}\n",
            self.dropped_channels_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP relay_active_connections Currently open websocket connections.\n");
        output.push_str("# TYPE relay_active_connections gauge\n");
        output.push_str(&format!(
            "relay_active_connections {}\n",
            self.active_connections.load(Ordering::SeqCst)
        ));

        output
    }
}

fn lock_map<T>(map: &Mutex<T>) -> MutexGuard<'_, T> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

fn normalize_endpoint(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let mut normalized_segments = Vec::new();
    for segment in path.split('/').filter(|segment| !segment.is_empty()) {
        if uuid::Uuid::parse_str(segment).is_ok() {
            normalized_segments.push("{uuid}".to_string());
            continue;
        }

        if segment.chars().all(|character| character.is_ascii_digit()) {
            normalized_segments.push("{number}".to_string());
            continue;
        }

        normalized_segments.push(segment.to_string());
    }

    if normalized_segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", normalized_segments.join("/"))
    }
}

fn normalize_label(label: &str) -> String {
    let normalized = label.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = lock_map(map);
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = lock_map(map);
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = lock_map(map);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left_key, _), (right_key, _)| {
        left_key
            .method
            .cmp(&right_key.method)
            .then_with(|| left_key.endpoint.cmp(&right_key.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    label_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = lock_map(map);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{{label_name}=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::{escape_label_value, normalize_endpoint, RelayMetrics};

    #[test]
    fn render_prometheus_includes_http_and_collaboration_metrics() {
        let metrics = RelayMetrics::default();
        metrics.record_http_request("get", "/xml", 200, 3);
        metrics.record_http_request("GET", "/missing/42", 404, 1);
        metrics.record_ws_message("acquire_lock");
        metrics.record_ws_message("acquire_lock");
        metrics.record_ws_message("update_xml");
        metrics.record_ws_decode_error("unknown_type");
        metrics.increment_lock_denied();
        metrics.increment_dropped_channels();
        metrics.increment_dropped_channels();
        metrics.set_active_connections(3);

        let rendered = metrics.render_prometheus();

        assert!(rendered.contains("relay_request_rate_total{method=\"GET\",endpoint=\"/xml\"} 1"));
        assert!(rendered
            .contains("relay_request_errors_total{method=\"GET\",endpoint=\"/missing/{number}\"} 1"));
        assert!(!rendered.contains("relay_request_errors_total{method=\"GET\",endpoint=\"/xml\"}"));
        assert!(rendered.contains("relay_request_duration_ms_sum{method=\"GET\",endpoint=\"/xml\"} 3"));
        assert!(rendered.contains("relay_ws_messages_total{kind=\"acquire_lock\"} 2"));
        assert!(rendered.contains("relay_ws_messages_total{kind=\"update_xml\"} 1"));
        assert!(rendered.contains("relay_ws_decode_errors_total{reason=\"unknown_type\"} 1"));
        assert!(rendered.contains("relay_lock_denied_total 1"));
        assert!(rendered.contains("relay_dropped_channels_total 2"));
        assert!(rendered.contains("relay_active_connections 3"));
    }

    #[test]
    fn active_connections_is_a_gauge() {
        let metrics = RelayMetrics::default();
        metrics.set_active_connections(5);
        metrics.set_active_connections(2);
        assert!(metrics.render_prometheus().contains("relay_active_connections 2\n"));
    }

    #[test]
    fn endpoints_collapse_identifiers() {
        assert_eq!(normalize_endpoint(""), "/");
        assert_eq!(normalize_endpoint("/"), "/");
        assert_eq!(
            normalize_endpoint("/ws/00000000-0000-0000-0000-000000000001/7"),
            "/ws/{uuid}/{number}"
        );
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label_value("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }
}
