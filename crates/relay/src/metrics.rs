use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock, PoisonError,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

/// Gauges sampled from the room directory when metrics are scraped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveGauges {
    pub rooms: usize,
    pub clients: usize,
}

#[derive(Default)]
pub struct RelayMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    ws_messages_total: Mutex<HashMap<String, u64>>,
    ws_errors_total: Mutex<HashMap<String, u64>>,
    ws_evictions_total: Mutex<HashMap<String, u64>>,
    rooms_created_total: AtomicU64,
    rooms_removed_total: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_ws_message(kind: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_message(kind);
    }
}

pub fn record_ws_error(code: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_error(code);
    }
}

pub fn record_ws_eviction(reason: &str) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_eviction(reason);
    }
}

pub fn record_room_created() {
    if let Some(metrics) = global_metrics() {
        metrics.rooms_created_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn record_room_removed() {
    if let Some(metrics) = global_metrics() {
        metrics.rooms_removed_total.fetch_add(1, Ordering::SeqCst);
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

    pub fn record_ws_error(&self, code: &str) {
        increment_label_counter(&self.ws_errors_total, &normalize_label(code), 1);
    }

    pub fn record_ws_eviction(&self, reason: &str) {
        increment_label_counter(&self.ws_evictions_total, &normalize_label(reason), 1);
    }

    pub fn render_prometheus(&self, gauges: LiveGauges) -> String {
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

        output.push_str("# HELP relay_ws_messages_total Inbound websocket messages by type.\n");
        output.push_str("# TYPE relay_ws_messages_total counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_messages_total",
            "type",
            &self.ws_messages_total,
        );

        output.push_str("# HELP relay_ws_errors_total Websocket error replies by code.\n");
        output.push_str("# TYPE relay_ws_errors_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_errors_total", "code", &self.ws_errors_total);

        output.push_str("# HELP relay_ws_evictions_total Connections closed by the server by reason.\n");
        output.push_str("# TYPE relay_ws_evictions_total counter\n");
        append_label_counter_lines(
            &mut output,
            "relay_ws_evictions_total",
            "reason",
            &self.ws_evictions_total,
        );

        output.push_str("# HELP relay_rooms_created_total Room sessions started.\n");
        output.push_str("# TYPE relay_rooms_created_total counter\n");
        output.push_str(&format!(
            "relay_rooms_created_total {}\n",
            self.rooms_created_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP relay_rooms_removed_total Room sessions torn down.\n");
        output.push_str("# TYPE relay_rooms_removed_total counter\n");
        output.push_str(&format!(
            "relay_rooms_removed_total {}\n",
            self.rooms_removed_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP relay_active_rooms Room sessions currently running.\n");
        output.push_str("# TYPE relay_active_rooms gauge\n");
        output.push_str(&format!("relay_active_rooms {}\n", gauges.rooms));

        output.push_str("# HELP relay_connected_clients Participants connected across all rooms.\n");
        output.push_str("# TYPE relay_connected_clients gauge\n");
        output.push_str(&format!("relay_connected_clients {}\n", gauges.clients));

        output
    }
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
    let mut guard = map.lock().unwrap_or_else(PoisonError::into_inner);
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().unwrap_or_else(PoisonError::into_inner);
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().unwrap_or_else(PoisonError::into_inner);
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
    let guard = map.lock().unwrap_or_else(PoisonError::into_inner);
    if guard.is_empty() {
        return;
    }

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
