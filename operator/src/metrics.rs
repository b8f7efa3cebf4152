use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

const PREFIX: &str = "nopea";

const SYNC_BUCKETS: [f64; 8] = [0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0];

fn name(name: &str) -> String {
    format!("{}_{}", PREFIX, name)
}

pub struct Metrics {
    registry: Registry,
    pub sync_duration: HistogramVec,
    pub sync_total: IntCounterVec,
    pub sync_error_total: IntCounterVec,
    pub workers_active: IntGauge,
    pub git_clone_duration: HistogramVec,
    pub git_fetch_duration: HistogramVec,
    pub drift_detected_total: IntCounterVec,
    pub drift_healed_total: IntCounterVec,
    pub leader_status: IntGaugeVec,
    pub leader_transitions_total: IntCounterVec,
    pub worker_restarts_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let sync_duration = HistogramVec::new(
            HistogramOpts::new(name("sync_duration_seconds"), "Duration of sync operations")
                .buckets(SYNC_BUCKETS.to_vec()),
            &["repo"],
        )
        .unwrap();
        let sync_total = IntCounterVec::new(
            Opts::new(name("sync_total"), "Total sync operations by outcome"),
            &["repo", "status"],
        )
        .unwrap();
        let sync_error_total = IntCounterVec::new(
            Opts::new(name("sync_error_total"), "Total sync errors by taxonomy entry"),
            &["repo", "error"],
        )
        .unwrap();
        let workers_active = IntGauge::new(
            name("workers_active"),
            "Number of repository workers currently running",
        )
        .unwrap();
        let git_clone_duration = HistogramVec::new(
            HistogramOpts::new(name("git_clone_duration_seconds"), "Duration of git clones"),
            &["repo"],
        )
        .unwrap();
        let git_fetch_duration = HistogramVec::new(
            HistogramOpts::new(name("git_fetch_duration_seconds"), "Duration of git fetches"),
            &["repo"],
        )
        .unwrap();
        let drift_detected_total = IntCounterVec::new(
            Opts::new(name("drift_detected_total"), "Drift observations per resource"),
            &["repo", "resource"],
        )
        .unwrap();
        let drift_healed_total = IntCounterVec::new(
            Opts::new(name("drift_healed_total"), "Successful heals per resource"),
            &["repo", "resource"],
        )
        .unwrap();
        let leader_status = IntGaugeVec::new(
            Opts::new(name("leader_status"), "1 while this instance holds the lease"),
            &["pod"],
        )
        .unwrap();
        let leader_transitions_total = IntCounterVec::new(
            Opts::new(name("leader_transitions_total"), "Leadership acquisitions"),
            &["pod"],
        )
        .unwrap();
        let worker_restarts_total = IntCounterVec::new(
            Opts::new(
                name("worker_restarts_total"),
                "Worker restarts after a crash",
            ),
            &["repo"],
        )
        .unwrap();

        registry.register(Box::new(sync_duration.clone())).unwrap();
        registry.register(Box::new(sync_total.clone())).unwrap();
        registry.register(Box::new(sync_error_total.clone())).unwrap();
        registry.register(Box::new(workers_active.clone())).unwrap();
        registry.register(Box::new(git_clone_duration.clone())).unwrap();
        registry.register(Box::new(git_fetch_duration.clone())).unwrap();
        registry.register(Box::new(drift_detected_total.clone())).unwrap();
        registry.register(Box::new(drift_healed_total.clone())).unwrap();
        registry.register(Box::new(leader_status.clone())).unwrap();
        registry
            .register(Box::new(leader_transitions_total.clone()))
            .unwrap();
        registry
            .register(Box::new(worker_restarts_total.clone()))
            .unwrap();

        Metrics {
            registry,
            sync_duration,
            sync_total,
            sync_error_total,
            workers_active,
            git_clone_duration,
            git_fetch_duration,
            drift_detected_total,
            drift_healed_total,
            leader_status,
            leader_transitions_total,
            worker_restarts_total,
        }
    }

    /// Prometheus exposition format for the /metrics endpoint.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let mut out = vec![];
        if encoder.encode(&self.registry.gather(), &mut out).is_err() {
            return String::new();
        }
        String::from_utf8(out).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_carries_prefix_and_labels() {
        let metrics = Metrics::new();
        metrics
            .sync_total
            .with_label_values(&["my-app", "success"])
            .inc();
        metrics.workers_active.set(2);
        metrics
            .sync_duration
            .with_label_values(&["my-app"])
            .observe(0.42);

        let exported = metrics.export();
        assert!(exported.contains("nopea_sync_total{repo=\"my-app\",status=\"success\"} 1"));
        assert!(exported.contains("nopea_workers_active 2"));
        assert!(exported.contains("nopea_sync_duration_seconds_bucket"));
    }

    #[test]
    fn test_separate_instances_do_not_collide() {
        let a = Metrics::new();
        let b = Metrics::new();
        a.workers_active.set(1);
        b.workers_active.set(5);
        assert!(a.export().contains("nopea_workers_active 1"));
        assert!(b.export().contains("nopea_workers_active 5"));
    }
}
