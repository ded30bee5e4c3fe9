use crate::clock::{Clock, SystemClock};
use crate::config::MetricsConfig;
use crate::counter::Counter;
use crate::error::{MetricsError, Result};
use crate::gauge::Gauge;
use crate::histogram::Histogram;
use crate::meter::Meter;
use crate::metric::{Metric, MetricName};
use crate::timer::Timer;
use crate::value::{MetricEntry, MetricsReport};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::convert::Infallible;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, warn};

/// Observer of registry membership changes.
///
/// Listeners are called synchronously on the registering thread, after the
/// map lock has been released. Each listener sees every metric added exactly
/// once, and never sees a removal before the matching addition. A listener
/// that returns an error or panics is logged and skipped; the remaining
/// listeners are still notified and the caller never sees the failure.
///
/// Deliveries are serialized across threads. A listener may call back into
/// the registry on the same thread.
pub trait MetricsListener: Send + Sync {
    fn on_metric_added(&self, name: &MetricName, metric: &Metric) -> anyhow::Result<()>;

    fn on_metric_removed(&self, name: &MetricName, metric: &Metric) -> anyhow::Result<()> {
        let _ = (name, metric);
        Ok(())
    }
}

/// One name's entry. Empty until its factory finishes.
#[derive(Default)]
struct Slot {
    metric: OnceLock<Metric>,
    init: Mutex<()>,
    announced: AtomicBool,
}

/// Concurrent map from [`MetricName`] to [`Metric`].
///
/// # Concurrency Model
///
/// - **Lookups** take the read side of an `RwLock` and clone the `Arc`
///   handle out, so the lock is never held while a metric is updated
/// - **Creation** reserves a per-name slot under the write lock, releases
///   it, then runs the factory under that slot's own mutex. The factory runs
///   at most once per name, concurrent callers of the same name wait for it
///   and all get the same instance, while every other name stays available.
///   A factory may read the registry and create other metrics, but must not
///   create the name it is building
/// - **Notifications** are delivered under a separate reentrant lock, so a
///   listener added while metrics are being created is told about each of
///   them exactly once
/// - **Reporting** copies the entry list under the read lock and iterates
///   the copy, so reporters never hold up registration or metric updates
///
/// A name whose factory is still running, or failed, is invisible to
/// [`MetricsRegistry::get`], [`MetricsRegistry::names`] and reports.
///
/// # Duplicate Names
///
/// [`MetricsRegistry::add`] rejects a name that is already registered with
/// [`MetricsError::DuplicateMetric`]. [`MetricsRegistry::get_or_create`]
/// and the typed accessors return the existing entry instead.
///
/// # Example
///
/// ```rust
/// use tally_metrics::{MetricName, MetricsRegistry};
///
/// let registry = MetricsRegistry::new();
/// let requests = registry.meter(MetricName::new("requests", "http", "api")).unwrap();
/// requests.mark(1);
///
/// let report = registry.collect();
/// assert_eq!(report.metrics.len(), 1);
/// ```
pub struct MetricsRegistry {
    metrics: RwLock<HashMap<MetricName, Arc<Slot>>>,
    listeners: RwLock<Vec<Arc<dyn MetricsListener>>>,
    events: ReentrantMutex<()>,
    config: MetricsConfig,
    clock: Arc<dyn Clock>,
    start_tick: u64,
}

impl MetricsRegistry {
    /// Creates a registry with the default configuration and system clock.
    pub fn new() -> Self {
        Self::build(MetricsConfig::default(), SystemClock::shared())
    }

    /// Creates a registry with a custom configuration.
    pub fn with_config(config: MetricsConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock::shared())
    }

    /// Creates a registry whose metrics read time from `clock`.
    pub fn with_clock(config: MetricsConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    fn build(config: MetricsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            events: ReentrantMutex::new(()),
            start_tick: clock.tick(),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Milliseconds since the registry was created.
    pub fn uptime_ms(&self) -> u64 {
        self.clock.tick().saturating_sub(self.start_tick) / 1_000_000
    }

    /// Returns the metric registered under `name`, creating it with `factory` if absent.
    ///
    /// The factory is invoked at most once per name, even when many threads
    /// race to create the same metric. It runs without any registry-wide
    /// lock held, so it may look up or create other metrics. Creating
    /// `name` itself from inside the factory deadlocks.
    pub fn get_or_create<F>(&self, name: MetricName, factory: F) -> Metric
    where
        F: FnOnce() -> Metric,
    {
        match self.get_or_try_create::<Infallible, _>(name, || Ok(factory())) {
            Ok(metric) => metric,
            Err(never) => match never {},
        }
    }

    fn get_or_try_create<E, F>(&self, name: MetricName, factory: F) -> std::result::Result<Metric, E>
    where
        F: FnOnce() -> std::result::Result<Metric, E>,
    {
        self.initialize(&name, factory).map(|(metric, _)| metric)
    }

    /// Registers `metric` under `name`, rejecting names already in use.
    pub fn add(&self, name: MetricName, metric: Metric) -> Result<()> {
        match self.initialize::<Infallible, _>(&name, || Ok(metric)) {
            Ok((_, true)) => Ok(()),
            Ok((_, false)) => Err(MetricsError::DuplicateMetric(name)),
            Err(never) => match never {},
        }
    }

    /// Unregisters `name`, returning the metric that was registered under it.
    pub fn remove(&self, name: &MetricName) -> Option<Metric> {
        let _events = self.events.lock();
        let (slot, metric) = {
            let mut metrics = self.metrics.write();
            let metric = metrics.get(name)?.metric.get()?.clone();
            (metrics.remove(name)?, metric)
        };

        debug!(metric = %name, kind = metric.kind(), "removed metric");
        if slot.announced.load(Ordering::Acquire) {
            self.notify(name, |listener| listener.on_metric_removed(name, &metric));
        }
        Some(metric)
    }

    pub fn get(&self, name: &MetricName) -> Option<Metric> {
        self.metrics.read().get(name)?.metric.get().cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<MetricName> {
        self.entries().into_iter().map(|(name, _)| name).collect()
    }

    pub fn len(&self) -> usize {
        self.metrics
            .read()
            .values()
            .filter(|slot| slot.metric.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn counter(&self, name: MetricName) -> Result<Arc<Counter>> {
        match self.get_or_create(name.clone(), || Metric::from(Counter::new())) {
            Metric::Counter(counter) => Ok(counter),
            other => Err(type_mismatch(name, "counter", &other)),
        }
    }

    /// Returns the gauge under `name`, registering one that reads `read` if absent.
    pub fn gauge<F>(&self, name: MetricName, read: F) -> Result<Arc<Gauge>>
    where
        F: Fn() -> f64 + Send + Sync + 'static,
    {
        match self.get_or_create(name.clone(), || Metric::from(Gauge::new(read))) {
            Metric::Gauge(gauge) => Ok(gauge),
            other => Err(type_mismatch(name, "gauge", &other)),
        }
    }

    /// Returns the histogram under `name`, creating a forward-decaying one if absent.
    pub fn histogram(&self, name: MetricName) -> Result<Arc<Histogram>> {
        let metric = self.get_or_try_create(name.clone(), || {
            Histogram::exponentially_decaying(
                self.config.reservoir_size,
                self.config.alpha,
                self.clock.clone(),
            )
            .map(Metric::from)
        })?;

        match metric {
            Metric::Histogram(histogram) => Ok(histogram),
            other => Err(type_mismatch(name, "histogram", &other)),
        }
    }

    pub fn meter(&self, name: MetricName) -> Result<Arc<Meter>> {
        let metric = self.get_or_try_create(name.clone(), || {
            Meter::with_tick_interval(self.clock.clone(), self.config.tick_interval)
                .map(Metric::from)
        })?;

        match metric {
            Metric::Meter(meter) => Ok(meter),
            other => Err(type_mismatch(name, "meter", &other)),
        }
    }

    pub fn timer(&self, name: MetricName) -> Result<Arc<Timer>> {
        let metric = self.get_or_try_create(name.clone(), || {
            Timer::new(self.clock.clone(), &self.config).map(Metric::from)
        })?;

        match metric {
            Metric::Timer(timer) => Ok(timer),
            other => Err(type_mismatch(name, "timer", &other)),
        }
    }

    /// Subscribes `listener` and replays every metric already announced to it.
    pub fn add_listener(&self, listener: Arc<dyn MetricsListener>) {
        let _events = self.events.lock();
        self.listeners.write().push(listener.clone());

        for (name, slot) in self.slots() {
            if !slot.announced.load(Ordering::Acquire) {
                continue;
            }
            if let Some(metric) = slot.metric.get() {
                notify_one(listener.as_ref(), &name, |l| l.on_metric_added(&name, metric));
            }
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn MetricsListener>) {
        let _events = self.events.lock();
        self.listeners
            .write()
            .retain(|registered| !Arc::ptr_eq(registered, listener));
    }

    /// Calls `callback` for every registered metric, in name order.
    ///
    /// Iterates a copy of the entry list, so callbacks may register or
    /// remove metrics. A callback that fails or panics is logged and the
    /// remaining metrics are still reported.
    pub fn report<F>(&self, callback: F)
    where
        F: FnMut(&MetricName, &Metric) -> anyhow::Result<()>,
    {
        self.report_matching(|_, _| true, callback);
    }

    /// Like [`MetricsRegistry::report`], restricted to metrics accepted by `predicate`.
    pub fn report_matching<P, F>(&self, mut predicate: P, mut callback: F)
    where
        P: FnMut(&MetricName, &Metric) -> bool,
        F: FnMut(&MetricName, &Metric) -> anyhow::Result<()>,
    {
        for (name, metric) in self.entries() {
            if !predicate(&name, &metric) {
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| callback(&name, &metric))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(metric = %name, error = %err, "report callback failed"),
                Err(_) => error!(metric = %name, "report callback panicked"),
            }
        }
    }

    /// Reads every registered metric into a serializable report.
    pub fn collect(&self) -> MetricsReport {
        let mut report = MetricsReport::new(self.clock.time(), self.uptime_ms());
        let rate_unit = self.config.rate_unit;

        self.report(|name, metric| {
            report.metrics.push(MetricEntry {
                name: name.clone(),
                value: metric.value(rate_unit),
            });
            Ok(())
        });
        report
    }

    /// Returns the metric in `name`'s slot and whether this call created it.
    fn initialize<E, F>(
        &self,
        name: &MetricName,
        factory: F,
    ) -> std::result::Result<(Metric, bool), E>
    where
        F: FnOnce() -> std::result::Result<Metric, E>,
    {
        let slot = self.slot(name);
        if let Some(metric) = slot.metric.get() {
            return Ok((metric.clone(), false));
        }

        let metric = {
            let _init = slot.init.lock();
            if let Some(metric) = slot.metric.get() {
                return Ok((metric.clone(), false));
            }
            let metric = factory()?;
            // Writers of the cell hold `init`, so it is still empty here.
            let _ = slot.metric.set(metric.clone());
            metric
        };

        debug!(metric = %name, kind = metric.kind(), "registered metric");
        self.announce(name, &slot, &metric);
        Ok((metric, true))
    }

    /// The slot registered under `name`, reserving an empty one if absent.
    fn slot(&self, name: &MetricName) -> Arc<Slot> {
        if let Some(slot) = self.metrics.read().get(name) {
            return slot.clone();
        }
        self.metrics.write().entry(name.clone()).or_default().clone()
    }

    /// Notifies listeners of a new metric unless it was removed in the meantime.
    fn announce(&self, name: &MetricName, slot: &Arc<Slot>, metric: &Metric) {
        let _events = self.events.lock();
        let registered = self
            .metrics
            .read()
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        if !registered {
            return;
        }

        slot.announced.store(true, Ordering::Release);
        self.notify(name, |listener| listener.on_metric_added(name, metric));
    }

    fn slots(&self) -> Vec<(MetricName, Arc<Slot>)> {
        let mut slots: Vec<_> = self
            .metrics
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), slot.clone()))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        slots
    }

    fn entries(&self) -> Vec<(MetricName, Metric)> {
        self.slots()
            .into_iter()
            .filter_map(|(name, slot)| Some((name, slot.metric.get()?.clone())))
            .collect()
    }

    /// Delivers `event` to a copy of the listener list, outside the map lock.
    fn notify<F>(&self, name: &MetricName, event: F)
    where
        F: Fn(&dyn MetricsListener) -> anyhow::Result<()>,
    {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            notify_one(listener.as_ref(), name, &event);
        }
    }
}

fn notify_one<F>(listener: &dyn MetricsListener, name: &MetricName, event: F)
where
    F: FnOnce(&dyn MetricsListener) -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| event(listener))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(metric = %name, error = %err, "metrics listener failed"),
        Err(_) => error!(metric = %name, "metrics listener panicked"),
    }
}

fn type_mismatch(name: MetricName, expected: &'static str, actual: &Metric) -> MetricsError {
    MetricsError::TypeMismatch {
        name,
        expected,
        actual: actual.kind(),
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("metrics", &self.len())
            .field("listeners", &self.listeners.read().len())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::value::MetricValue;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn name(name: &str) -> MetricName {
        MetricName::new(name, "test", "registry")
    }

    fn manual_registry() -> (Arc<ManualClock>, MetricsRegistry) {
        let clock = Arc::new(ManualClock::new());
        let registry = MetricsRegistry::with_clock(MetricsConfig::default(), clock.clone()).unwrap();
        (clock, registry)
    }

    #[derive(Default)]
    struct RecordingListener {
        added: Mutex<Vec<MetricName>>,
        removed: Mutex<Vec<MetricName>>,
    }

    impl MetricsListener for RecordingListener {
        fn on_metric_added(&self, name: &MetricName, _metric: &Metric) -> anyhow::Result<()> {
            self.added.lock().push(name.clone());
            Ok(())
        }

        fn on_metric_removed(&self, name: &MetricName, _metric: &Metric) -> anyhow::Result<()> {
            self.removed.lock().push(name.clone());
            Ok(())
        }
    }

    struct FailingListener;

    impl MetricsListener for FailingListener {
        fn on_metric_added(&self, _name: &MetricName, _metric: &Metric) -> anyhow::Result<()> {
            anyhow::bail!("listener is broken")
        }
    }

    struct PanickingListener;

    impl MetricsListener for PanickingListener {
        fn on_metric_added(&self, _name: &MetricName, _metric: &Metric) -> anyhow::Result<()> {
            panic!("listener blew up")
        }
    }

    #[test]
    fn test_registry_creation() {
        let registry = MetricsRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = MetricsConfig {
            reservoir_size: 0,
            ..MetricsConfig::default()
        };
        assert!(matches!(
            MetricsRegistry::with_config(config),
            Err(MetricsError::InvalidReservoirSize(0))
        ));
    }

    #[test]
    fn test_get_or_create_returns_the_same_instance() {
        let registry = MetricsRegistry::new();

        let first = registry.get_or_create(name("hits"), || Metric::from(Counter::new()));
        let second = registry.get_or_create(name("hits"), || panic!("factory called twice"));

        assert!(first.same_instance(&second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_or_create_is_atomic_under_contention() {
        for threads in [1, 8, 64] {
            let registry = Arc::new(MetricsRegistry::new());
            let factory_calls = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(threads));

            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let registry = registry.clone();
                    let factory_calls = factory_calls.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        let metric = registry.get_or_create(name("shared"), || {
                            factory_calls.fetch_add(1, Ordering::SeqCst);
                            Metric::from(Counter::new())
                        });
                        match metric {
                            Metric::Counter(counter) => {
                                counter.inc(1);
                                counter
                            }
                            other => panic!("unexpected {}", other.kind()),
                        }
                    })
                })
                .collect();

            let counters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            assert_eq!(factory_calls.load(Ordering::SeqCst), 1);
            assert!(counters.iter().all(|c| Arc::ptr_eq(c, &counters[0])));
            assert_eq!(counters[0].count(), threads as i64);
        }
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let registry = MetricsRegistry::new();
        registry.add(name("jobs"), Metric::from(Counter::new())).unwrap();

        let err = registry
            .add(name("jobs"), Metric::from(Counter::new()))
            .unwrap_err();
        assert!(matches!(err, MetricsError::DuplicateMetric(ref n) if *n == name("jobs")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_typed_accessors() {
        let registry = MetricsRegistry::new();

        let counter = registry.counter(name("c")).unwrap();
        counter.inc(2);
        assert_eq!(registry.counter(name("c")).unwrap().count(), 2);

        let histogram = registry.histogram(name("h")).unwrap();
        histogram.update(1.0).unwrap();
        assert!(Arc::ptr_eq(&histogram, &registry.histogram(name("h")).unwrap()));

        let meter = registry.meter(name("m")).unwrap();
        meter.mark(1);
        assert_eq!(registry.meter(name("m")).unwrap().count(), 1);

        let timer = registry.timer(name("t")).unwrap();
        timer.update(Duration::from_millis(3));
        assert_eq!(registry.timer(name("t")).unwrap().count(), 1);

        let gauge = registry.gauge(name("g"), || 7.0).unwrap();
        assert_eq!(gauge.value(), 7.0);
        let again = registry.gauge(name("g"), || 0.0).unwrap();
        assert_eq!(again.value(), 7.0);

        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_type_mismatch() {
        let registry = MetricsRegistry::new();
        registry.counter(name("mixed")).unwrap();

        let err = registry.meter(name("mixed")).unwrap_err();
        match err {
            MetricsError::TypeMismatch {
                name: n,
                expected,
                actual,
            } => {
                assert_eq!(n, name("mixed"));
                assert_eq!(expected, "meter");
                assert_eq!(actual, "counter");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_remove_and_get() {
        let registry = MetricsRegistry::new();
        registry.counter(name("gone")).unwrap();

        assert!(registry.get(&name("gone")).is_some());
        let removed = registry.remove(&name("gone")).unwrap();
        assert_eq!(removed.kind(), "counter");
        assert!(registry.get(&name("gone")).is_none());
        assert!(registry.remove(&name("gone")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_names_are_sorted() {
        let registry = MetricsRegistry::new();
        for n in ["zeta", "alpha", "mid"] {
            registry.counter(name(n)).unwrap();
        }

        let names: Vec<_> = registry
            .names()
            .iter()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_listeners_are_notified_and_replayed() {
        let registry = MetricsRegistry::new();
        registry.counter(name("before")).unwrap();

        let listener = Arc::new(RecordingListener::default());
        registry.add_listener(listener.clone());
        assert_eq!(*listener.added.lock(), vec![name("before")]);

        registry.counter(name("after")).unwrap();
        registry.counter(name("after")).unwrap();
        assert_eq!(*listener.added.lock(), vec![name("before"), name("after")]);

        registry.remove(&name("before"));
        assert_eq!(*listener.removed.lock(), vec![name("before")]);

        let as_dyn: Arc<dyn MetricsListener> = listener.clone();
        registry.remove_listener(&as_dyn);
        registry.counter(name("unseen")).unwrap();
        assert_eq!(listener.added.lock().len(), 2);
    }

    #[test]
    fn test_failing_listeners_are_isolated() {
        let registry = MetricsRegistry::new();
        let recording = Arc::new(RecordingListener::default());

        registry.add_listener(Arc::new(FailingListener));
        registry.add_listener(Arc::new(PanickingListener));
        registry.add_listener(recording.clone());

        let counter = registry.counter(name("survives")).unwrap();
        counter.inc(1);

        assert_eq!(*recording.added.lock(), vec![name("survives")]);
        assert_eq!(registry.counter(name("survives")).unwrap().count(), 1);
    }

    #[test]
    fn test_report_isolates_failing_callbacks() {
        let registry = MetricsRegistry::new();
        for n in ["a", "b", "c", "d"] {
            registry.counter(name(n)).unwrap();
        }

        let mut seen = Vec::new();
        registry.report(|metric_name, _| {
            seen.push(metric_name.name().to_string());
            match metric_name.name() {
                "b" => anyhow::bail!("cannot report b"),
                "c" => panic!("report of c blew up"),
                _ => Ok(()),
            }
        });

        assert_eq!(seen, ["a", "b", "c", "d"]);
    }

    #[test]
    fn test_report_matching_filters() {
        let registry = MetricsRegistry::new();
        registry.counter(name("requests")).unwrap();
        registry.meter(name("throughput")).unwrap();
        registry.timer(name("latency")).unwrap();

        let mut kinds = Vec::new();
        registry.report_matching(
            |_, metric| !matches!(metric, Metric::Counter(_)),
            |_, metric| {
                kinds.push(metric.kind());
                Ok(())
            },
        );

        assert_eq!(kinds, ["timer", "meter"]);
    }

    #[test]
    fn test_report_callbacks_may_register_metrics() {
        let registry = MetricsRegistry::new();
        registry.counter(name("seed")).unwrap();

        registry.report(|_, _| {
            registry.counter(name("spawned"))?;
            Ok(())
        });

        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_collect() {
        let (clock, registry) = manual_registry();
        registry.counter(name("jobs")).unwrap().inc(4);
        registry.histogram(name("sizes")).unwrap().update(10.0).unwrap();
        clock.advance(Duration::from_secs(2));

        let report = registry.collect();
        assert_eq!(report.uptime_ms, 2000);
        assert_eq!(report.metrics.len(), 2);

        match report.get(&name("jobs")) {
            Some(MetricValue::Counter(value)) => assert_eq!(value.count, 4),
            other => panic!("unexpected {other:?}"),
        }
        match report.get(&name("sizes")) {
            Some(MetricValue::Histogram(value)) => {
                assert_eq!(value.count, 1);
                assert_eq!(value.max, 10.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_factory_may_use_the_registry() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.counter(name("base")).unwrap().inc(3);

        let (done_tx, done_rx) = mpsc::channel();
        let shared = registry.clone();
        thread::spawn(move || {
            let metric = shared.get_or_create(name("derived"), || {
                let base = shared.counter(name("base")).unwrap();
                assert_eq!(shared.len(), 1);
                assert_eq!(shared.collect().metrics.len(), 1);
                shared.timer(name("nested")).unwrap();
                Metric::from(Gauge::new(move || base.count() as f64 * 2.0))
            });
            done_tx.send(metric).unwrap();
        });

        let metric = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("factory deadlocked the registry");
        match metric {
            Metric::Gauge(gauge) => assert_eq!(gauge.value(), 6.0),
            other => panic!("unexpected {}", other.kind()),
        }
        assert_eq!(registry.names(), vec![name("base"), name("derived"), name("nested")]);
    }

    #[test]
    fn test_slow_factory_does_not_block_other_names() {
        let registry = Arc::new(MetricsRegistry::new());
        registry.counter(name("ready")).unwrap();

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let shared = registry.clone();
        let creator = thread::spawn(move || {
            shared.get_or_create(name("slow"), || {
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
                Metric::from(Counter::new())
            })
        });
        started_rx.recv().unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let shared = registry.clone();
        thread::spawn(move || {
            let seen = (shared.len(), shared.names(), shared.collect().metrics.len());
            shared.meter(name("other")).unwrap();
            done_tx.send(seen).unwrap();
        });

        let (len, names, reported) = done_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("registry blocked behind a running factory");
        assert_eq!(len, 1);
        assert_eq!(names, vec![name("ready")]);
        assert_eq!(reported, 1);
        assert!(registry.get(&name("slow")).is_none());

        release_tx.send(()).unwrap();
        assert_eq!(creator.join().unwrap().kind(), "counter");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_failed_factory_leaves_the_name_free() {
        let registry = MetricsRegistry::new();

        let failed: std::result::Result<Metric, MetricsError> = registry
            .get_or_try_create(name("retry"), || {
                Err(MetricsError::InvalidReservoirSize(0))
            });
        assert!(failed.is_err());
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());

        let timer = registry.timer(name("retry")).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(timer.count(), 0);
    }

    #[test]
    fn test_listener_added_during_creation_sees_each_metric_once() {
        for _ in 0..20 {
            let registry = Arc::new(MetricsRegistry::new());
            let listener = Arc::new(RecordingListener::default());
            let barrier = Arc::new(Barrier::new(9));

            let mut handles: Vec<_> = (0..8)
                .map(|worker| {
                    let registry = registry.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        for i in 0..50 {
                            registry.counter(name(&format!("w{worker}-{i}"))).unwrap();
                        }
                    })
                })
                .collect();
            handles.push({
                let registry = registry.clone();
                let listener = listener.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.add_listener(listener);
                })
            });
            for handle in handles {
                handle.join().unwrap();
            }

            let mut added = listener.added.lock().clone();
            added.sort();
            assert_eq!(added, registry.names());
        }
    }

    #[derive(Default)]
    struct EventLog {
        events: Mutex<Vec<(&'static str, MetricName)>>,
    }

    impl MetricsListener for EventLog {
        fn on_metric_added(&self, name: &MetricName, _metric: &Metric) -> anyhow::Result<()> {
            self.events.lock().push(("added", name.clone()));
            Ok(())
        }

        fn on_metric_removed(&self, name: &MetricName, _metric: &Metric) -> anyhow::Result<()> {
            self.events.lock().push(("removed", name.clone()));
            Ok(())
        }
    }

    #[test]
    fn test_removal_is_never_reported_before_addition() {
        for _ in 0..20 {
            let registry = Arc::new(MetricsRegistry::new());
            let log = Arc::new(EventLog::default());
            let barrier = Arc::new(Barrier::new(5));

            let mut handles: Vec<_> = (0..4)
                .map(|worker| {
                    let registry = registry.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        for i in 0..50 {
                            let metric_name = name(&format!("w{worker}-{i}"));
                            registry.counter(metric_name.clone()).unwrap();
                            registry.remove(&metric_name).unwrap();
                        }
                    })
                })
                .collect();
            handles.push({
                let registry = registry.clone();
                let log = log.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.add_listener(log);
                })
            });
            for handle in handles {
                handle.join().unwrap();
            }

            let events = log.events.lock();
            let mut per_name: HashMap<&MetricName, Vec<&str>> = HashMap::new();
            for (event, metric_name) in events.iter() {
                per_name.entry(metric_name).or_default().push(*event);
            }
            for (metric_name, seen) in per_name {
                assert_eq!(seen, ["added", "removed"], "events for {metric_name}");
            }
            assert!(registry.is_empty());
        }
    }
}
