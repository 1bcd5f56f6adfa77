use actix_web_prom::{PrometheusMetrics, PrometheusMetricsBuilder};
use prometheus::core::Collector;
use prometheus::{GaugeVec, IntCounterVec, Opts};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock, RwLock, Weak},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

#[derive(Debug, Default, Clone)]
pub enum Kind {
    #[default]
    Default,
    GaugeVec,
    IntCounterVec,
}

#[derive(Debug, Default, Clone)]
pub struct MetricConfig<'a> {
    pub kind: Kind,
    pub name: &'a str,
    pub help: &'a str,
    pub label_names: &'a [&'a str],
}

pub type SharedRegistrar = Arc<Registrar>;

/// Metrics emitted by the repository.
pub const REPOSITORY_METRICS: &[MetricConfig<'static>] = &[
    MetricConfig {
        kind: Kind::IntCounterVec,
        name: "repository_statements_total",
        help: "Total no. of statements executed",
        label_names: &["kind"],
    },
    MetricConfig {
        kind: Kind::IntCounterVec,
        name: "repository_statement_errors_total",
        help: "Total no. of failed statements",
        label_names: &["kind"],
    },
    MetricConfig {
        kind: Kind::GaugeVec,
        name: "repository_statement_duration_seconds",
        help: "Statement execution time in seconds",
        label_names: &["kind"],
    },
    MetricConfig {
        kind: Kind::IntCounterVec,
        name: "repository_rows_affected_total",
        help: "Total no. of rows affected by write statements",
        label_names: &["kind"],
    },
    MetricConfig {
        kind: Kind::IntCounterVec,
        name: "repository_implicit_transactions_total",
        help: "Implicit transactions opened for batch operations",
        label_names: &["status"],
    },
    MetricConfig {
        kind: Kind::IntCounterVec,
        name: "repository_connection_acquisition_total",
        help: "Total number of connection acquisition attempts",
        label_names: &["status"],
    },
    MetricConfig {
        kind: Kind::GaugeVec,
        name: "repository_connection_acquisition_seconds",
        help: "Time taken to acquire a connection",
        label_names: &["status"],
    },
    MetricConfig {
        kind: Kind::IntCounterVec,
        name: "repository_connection_health_checks_total",
        help: "Total no. of pooled connection health checks",
        label_names: &["status"],
    },
];

type Store<M> = Arc<RwLock<HashMap<String, M>>>;

/// Metric handles registered in one Prometheus registry.
#[derive(Clone, Default)]
struct Handles {
    int_counters_vecs: Store<IntCounterVec>,
    gauges_vecs: Store<GaugeVec>,
}

/// Every registrar built on the same `PrometheusMetrics` shares its handles,
/// so a metric registered by one is usable from all of them.
fn handles_for(prometheus: &Arc<PrometheusMetrics>) -> Handles {
    static SHARED: OnceLock<Mutex<Vec<(Weak<PrometheusMetrics>, Handles)>>> = OnceLock::new();

    let mut shared = SHARED
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    shared.retain(|(owner, _)| owner.strong_count() > 0);

    if let Some((_, handles)) = shared
        .iter()
        .find(|(owner, _)| owner.as_ptr() == Arc::as_ptr(prometheus))
    {
        return handles.clone();
    }

    let handles = Handles::default();
    shared.push((Arc::downgrade(prometheus), handles.clone()));
    handles
}

/// An abstracted metrics registrar for Prometheus.
#[derive(Clone)]
pub struct Registrar {
    prometheus: Arc<PrometheusMetrics>,
    int_counters_vecs: Store<IntCounterVec>,
    gauges_vecs: Store<GaugeVec>,
}

impl std::fmt::Debug for Registrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registrar")
            .field("prometheus", &format!("{:?}", self.prometheus.registry))
            .field(
                "int_counters_vecs",
                &format!("{:?}", self.int_counters_vecs),
            )
            .field("gauges_vecs", &format!("{:?}", self.gauges_vecs))
            .finish()
    }
}

impl Default for Registrar {
    fn default() -> Self {
        let prometheus = PrometheusMetricsBuilder::new("repository")
            .build()
            .expect("default Prometheus registry");

        Self::new(Arc::new(prometheus))
    }
}

pub trait Registry {
    fn with_metric_configs<'a>(&self, metrics: &'a [MetricConfig<'a>]) -> Result<(), Error>;
    fn with_metric_config<'a>(&self, metric: &'a MetricConfig<'a>) -> Result<(), Error>;
}

impl Registry for Registrar {
    fn with_metric_config<'a>(&self, metric: &'a MetricConfig<'a>) -> Result<(), Error> {
        log::info!(
            "Attempting to register metric with name {:?} and labels {:?}",
            metric.name,
            metric.label_names
        );
        let opts = Opts::new(metric.name, metric.help);

        match &metric.kind {
            Kind::Default => {
                log::error!("Metric {:?} has no kind, skipping it", metric.name);
                Ok(())
            }
            Kind::GaugeVec => {
                let gauge = GaugeVec::new(opts, metric.label_names)?;
                self.register(metric.name, gauge, &self.gauges_vecs)
            }
            Kind::IntCounterVec => {
                let counter = IntCounterVec::new(opts, metric.label_names)?;
                self.register(metric.name, counter, &self.int_counters_vecs)
            }
        }
    }

    fn with_metric_configs<'a>(&self, metrics: &'a [MetricConfig<'a>]) -> Result<(), Error> {
        for metric in metrics {
            self.with_metric_config(metric)?;
        }
        Ok(())
    }
}

impl Registrar {
    pub fn new(prometheus: Arc<PrometheusMetrics>) -> Self {
        let handles = handles_for(&prometheus);
        Self {
            prometheus,
            int_counters_vecs: handles.int_counters_vecs,
            gauges_vecs: handles.gauges_vecs,
        }
    }

    /// Registrar with every repository metric registered.
    pub fn for_repository(prometheus: Arc<PrometheusMetrics>) -> Result<SharedRegistrar, Error> {
        let registrar = Self::new(prometheus);
        registrar.with_metric_configs(REPOSITORY_METRICS)?;
        Ok(Arc::new(registrar))
    }

    pub fn registry(&self) -> &prometheus::Registry {
        &self.prometheus.registry
    }

    fn register<M>(
        &self,
        name: &str,
        metric: M,
        store: &RwLock<HashMap<String, M>>,
    ) -> Result<(), Error>
    where
        M: Collector + Clone + 'static,
    {
        match self.prometheus.registry.register(Box::new(metric.clone())) {
            Ok(()) => {
                store.write().unwrap().insert(name.to_string(), metric);
                Ok(())
            }
            Err(prometheus::Error::AlreadyReg) => {
                if store.read().unwrap().contains_key(name) {
                    log::info!("Metric {:?} is already registered.", name);
                } else {
                    log::warn!(
                        "Metric {:?} was registered outside this registrar and will not be updated",
                        name
                    );
                }
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to register metric {:?}. {:?}", name, e);
                Err(Error::Prometheus(e))
            }
        }
    }

    pub fn inc_int_counter_vec_mut(&self, key: &str, labels: &[&str]) {
        self.inc_by_int_counter_vec_mut(key, labels, 1)
    }

    pub fn inc_by_int_counter_vec_mut(&self, key: &str, labels: &[&str], value: u64) {
        let counters = self.int_counters_vecs.read().unwrap();
        if let Some(counter) = counters.get(key) {
            counter.with_label_values(labels).inc_by(value)
        }
    }

    pub fn set_gauge_vec_mut(&self, key: &str, labels: &[&str], value: f64) {
        let gauges = self.gauges_vecs.read().unwrap();
        if let Some(gauge) = gauges.get(key) {
            gauge.with_label_values(labels).set(value)
        }
    }

    pub fn int_counter_value(&self, key: &str, labels: &[&str]) -> Option<u64> {
        let counters = self.int_counters_vecs.read().unwrap();
        counters
            .get(key)
            .map(|counter| counter.with_label_values(labels).get())
    }
}
