//! Ties [`crate::source`], [`crate::registry`], [`crate::plan`] and [`crate::cleanup`] together
//! into a running reconciliation loop.
//!
//! Four activities run concurrently: an interval-driven reconciliation loop, an event consumer
//! that drains container lifecycle events, a cleanup ticker, and a debounced event-triggered
//! reconcile. The container runtime's blocking event stream is bridged in on its own OS thread
//! (see [`crate::source::docker::spawn_event_watcher`]); everything else is a `tokio` task.
//! At most one `run_once` executes at a time - both the interval and the debounced event path
//! route through the same dedicated reconciler task via an mpsc "wake" channel, rather than
//! racing two tasks against a mutex.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cleanup::CleanupTracker;
use crate::endpoint::Changes;
use crate::plan;
use crate::plan::Policy;
use crate::provider::Provider;
use crate::registry::Registry;
use crate::source::{ContainerEvent, Source};

const CLEANUP_TICK: Duration = Duration::from_secs(60);
const DEBOUNCE_DELAY: Duration = Duration::from_secs(2);

/// Capacity of the channel the event watcher thread enqueues onto; bound so a slow reconciler
/// applies backpressure instead of growing memory unboundedly.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Statuses that warrant scheduling a reconcile. `start` additionally unmarks the container's
/// endpoints in [`Controller::handle_event`]; everything else Docker forwards (`pause`,
/// `unpause`, ...) is logged but otherwise ignored, per the event-handling rules.
const RECONCILE_TRIGGERING_STATUSES: &[&str] = &["start", "die", "stop", "kill"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub policy: Policy,
    pub interval: Duration,
    pub cleanup_delay: Duration,
    pub cleanup_on_stop: bool,
    pub once: bool,
    pub dry_run: bool,
}

pub struct Controller {
    source: Source,
    provider: Box<dyn Provider>,
    registry: Box<dyn Registry>,
    cleanup: Mutex<CleanupTracker>,
    config: ControllerConfig,
}

impl Controller {
    pub fn new(
        source: Source,
        mut provider: Box<dyn Provider>,
        mut registry: Box<dyn Registry>,
        config: ControllerConfig,
    ) -> Self {
        if config.dry_run {
            provider.set_dry_run(true);
            registry.set_dry_run(true);
        }
        Controller {
            source,
            provider,
            registry,
            cleanup: Mutex::new(CleanupTracker::new(config.cleanup_delay)),
            config,
        }
    }

    /// Runs until `events` is dropped and all spawned tasks finish, or forever if `once` is
    /// false. With `once` set, performs a single reconciliation pass and returns.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ContainerEvent>) {
        if self.config.once {
            self.run_once().await;
            return;
        }

        let (wake_tx, wake_rx) = mpsc::channel::<()>(1);

        let reconciler = tokio::spawn(reconciler_task(Arc::clone(&self), wake_rx));
        let interval_ticker = tokio::spawn(interval_task(self.config.interval, wake_tx.clone()));
        let cleanup_ticker = tokio::spawn(cleanup_task(Arc::clone(&self)));
        let event_consumer = tokio::spawn(async move {
            let mut debounce: Option<JoinHandle<()>> = None;
            while let Some(event) = events.recv().await {
                self.handle_event(&event).await;
                if !triggers_reconcile(&event.status) {
                    continue;
                }
                if debounce.as_ref().map(|h| h.is_finished()).unwrap_or(true) {
                    let wake_tx = wake_tx.clone();
                    debounce = Some(tokio::spawn(async move {
                        tokio::time::sleep(DEBOUNCE_DELAY).await;
                        let _ = wake_tx.send(()).await;
                    }));
                }
            }
        });

        let _ = tokio::join!(reconciler, interval_ticker, cleanup_ticker, event_consumer);
    }

    async fn handle_event(&self, event: &ContainerEvent) {
        debug!("received container event: {:?}", event);
        if event.status == "start" {
            // Fast hysteresis: a just-restarted container's endpoints should never be deleted
            // even if the cleanup ticker fires before the next full reconcile.
            match self.source.endpoints() {
                Ok(endpoints) => {
                    let mut cleanup = self.cleanup.lock().expect("cleanup tracker lock poisoned");
                    for endpoint in endpoints
                        .iter()
                        .filter(|e| e.container_id.as_deref() == Some(event.container_id.as_str()))
                    {
                        cleanup.unmark_for_deletion(&endpoint.id());
                    }
                }
                Err(e) => warn!("could not re-query endpoints after start event: {e}"),
            }
        }
    }

    /// One full desired-vs-current diff-and-apply pass.
    async fn run_once(&self) {
        if let Err(e) = self.run_once_fallible().await {
            error!("reconciliation cycle failed: {e}");
        }
    }

    async fn run_once_fallible(&self) -> Result<(), String> {
        let desired = self.source.endpoints().map_err(|e| e.to_string())?;
        let current = self.registry.records(self.provider.as_ref()).map_err(|e| e.to_string())?;

        if desired.is_empty() && current.is_empty() {
            debug!("running reconciliation: 0 desired / 0 current");
        } else {
            info!("running reconciliation: {} desired / {} current", desired.len(), current.len());
        }

        let mut changes = plan::generate(&current, &desired, self.config.policy);

        if !changes.delete.is_empty() {
            let mut cleanup = self.cleanup.lock().expect("cleanup tracker lock poisoned");
            for endpoint in changes.delete.drain(..) {
                if self.config.cleanup_on_stop {
                    cleanup.mark_for_deletion(endpoint.id());
                } else {
                    debug!("{} is no longer desired but cleanup_on_stop is disabled, leaving it", endpoint.dnsname);
                }
            }
        }

        if changes.create.is_empty() && changes.update_old.is_empty() {
            debug!("no creates or updates to apply this cycle");
        } else {
            self.registry.sync(self.provider.as_ref(), &changes).map_err(|e| e.to_string())?;
        }

        self.process_cleanup().await;
        Ok(())
    }

    async fn process_cleanup(&self) {
        let eligible = {
            let mut cleanup = self.cleanup.lock().expect("cleanup tracker lock poisoned");
            cleanup.get_eligible_for_deletion()
        };
        if eligible.is_empty() {
            return;
        }

        let current = match self.registry.records(self.provider.as_ref()) {
            Ok(c) => c,
            Err(e) => {
                error!("could not refresh records before cleanup: {e}");
                return;
            }
        };

        let mut changes = Changes::default();
        for id in eligible {
            match current.iter().find(|e| e.id() == id) {
                Some(endpoint) => changes.delete.push(endpoint.clone()),
                None => warn!("{:?} was eligible for deletion but no longer exists, discarding", id),
            }
        }

        if !changes.is_empty() {
            if let Err(e) = self.registry.sync(self.provider.as_ref(), &changes) {
                error!("cleanup deletion failed: {e}");
            }
        }
    }
}

fn triggers_reconcile(status: &str) -> bool {
    RECONCILE_TRIGGERING_STATUSES.contains(&status)
}

async fn reconciler_task(controller: Arc<Controller>, mut wake_rx: mpsc::Receiver<()>) {
    while wake_rx.recv().await.is_some() {
        controller.run_once().await;
    }
}

async fn interval_task(interval: Duration, wake_tx: mpsc::Sender<()>) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; reconcile once at startup before waiting a full interval.
    loop {
        ticker.tick().await;
        let _ = wake_tx.send(()).await;
    }
}

async fn cleanup_task(controller: Arc<Controller>) {
    let mut ticker = tokio::time::interval(CLEANUP_TICK);
    ticker.tick().await; // skip the immediate first tick, run_once already handles startup cleanup
    loop {
        ticker.tick().await;
        controller.process_cleanup().await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::endpoint::{Endpoint, RecordType};
    use crate::plan::Policy;
    use crate::provider::MockProvider;
    use crate::registry::MockRegistry;
    use crate::source::{Container, LabelFilter, MockContainerRuntime};

    use super::*;

    fn ep(name: &str, container_id: &str) -> Endpoint {
        Endpoint {
            dnsname: name.to_string(),
            targets: vec!["10.0.0.1".to_string()],
            record_type: RecordType::A,
            record_ttl: None,
            proxied: false,
            container_id: Some(container_id.to_string()),
            container_name: Some("web-1".to_string()),
        }
    }

    fn default_config() -> ControllerConfig {
        ControllerConfig {
            policy: Policy::Sync,
            interval: Duration::from_secs(60),
            cleanup_delay: Duration::from_secs(900),
            cleanup_on_stop: true,
            once: false,
            dry_run: false,
        }
    }

    fn empty_runtime() -> MockContainerRuntime {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_list_containers().returning(|| Ok(vec![]));
        runtime
    }

    #[tokio::test]
    async fn run_once_does_not_sync_when_nothing_changed() {
        let source = Source::new(Box::new(empty_runtime()), "sherpa.dns".to_string(), LabelFilter::None);
        let mut registry = MockRegistry::new();
        registry.expect_records().returning(|_provider| Ok(vec![]));
        registry.expect_sync().times(0);
        let provider = MockProvider::new();

        let controller = Controller::new(source, Box::new(provider), Box::new(registry), default_config());
        controller.run_once().await;
    }

    #[tokio::test]
    async fn run_once_marks_no_longer_desired_records_for_cleanup_instead_of_deleting() {
        let source = Source::new(Box::new(empty_runtime()), "sherpa.dns".to_string(), LabelFilter::None);
        let gone = ep("web.example.com", "abc123");
        let mut registry = MockRegistry::new();
        registry.expect_records().returning(move |_provider| Ok(vec![gone.clone()]));
        registry.expect_sync().times(0);
        let provider = MockProvider::new();

        let controller = Controller::new(source, Box::new(provider), Box::new(registry), default_config());
        controller.run_once().await;

        let pending = controller.cleanup.lock().unwrap().get_pending_status();
        assert_eq!(pending.len(), 1);
        assert!(pending.contains_key(&("web.example.com".to_string(), RecordType::A)));
    }

    #[tokio::test]
    async fn run_once_leaves_stale_records_alone_when_cleanup_on_stop_disabled() {
        let source = Source::new(Box::new(empty_runtime()), "sherpa.dns".to_string(), LabelFilter::None);
        let gone = ep("web.example.com", "abc123");
        let mut registry = MockRegistry::new();
        registry.expect_records().returning(move |_provider| Ok(vec![gone.clone()]));
        registry.expect_sync().times(0);
        let provider = MockProvider::new();

        let mut config = default_config();
        config.cleanup_on_stop = false;
        let controller = Controller::new(source, Box::new(provider), Box::new(registry), config);
        controller.run_once().await;

        assert!(controller.cleanup.lock().unwrap().get_pending_status().is_empty());
    }

    #[tokio::test]
    async fn process_cleanup_deletes_only_ids_that_aged_past_the_delay() {
        let source = Source::new(Box::new(empty_runtime()), "sherpa.dns".to_string(), LabelFilter::None);
        let stale = ep("web.example.com", "abc123");
        let mut registry = MockRegistry::new();
        registry.expect_records().returning(move |_provider| Ok(vec![stale.clone()]));
        registry
            .expect_sync()
            .withf(|_provider, changes| changes.delete.len() == 1 && changes.delete[0].dnsname == "web.example.com")
            .times(1)
            .returning(|_provider, _changes| Ok(()));
        let provider = MockProvider::new();

        let mut config = default_config();
        config.cleanup_delay = Duration::from_millis(0);
        let controller = Controller::new(source, Box::new(provider), Box::new(registry), config);
        controller.run_once().await;

        assert!(controller.cleanup.lock().unwrap().get_pending_status().is_empty());
    }

    #[tokio::test]
    async fn start_event_unmarks_the_restarted_container_endpoints() {
        let mut runtime = MockContainerRuntime::new();
        runtime.expect_list_containers().returning(|| {
            let mut labels = HashMap::new();
            labels.insert("sherpa.dns/hostname".to_string(), "web.example.com".to_string());
            let mut networks = HashMap::new();
            networks.insert(
                "bridge".to_string(),
                crate::source::ContainerNetwork {
                    ip_address: Some("10.0.0.5".to_string()),
                    global_ipv6_address: None,
                },
            );
            Ok(vec![Container {
                id: "abc123".to_string(),
                name: "web-1".to_string(),
                labels,
                networks,
            }])
        });
        let source = Source::new(Box::new(runtime), "sherpa.dns".to_string(), LabelFilter::None);
        let registry = MockRegistry::new();
        let provider = MockProvider::new();

        let controller = Controller::new(source, Box::new(provider), Box::new(registry), default_config());
        controller
            .cleanup
            .lock()
            .unwrap()
            .mark_for_deletion(("web.example.com".to_string(), RecordType::A));

        controller
            .handle_event(&ContainerEvent {
                status: "start".to_string(),
                container_id: "abc123".to_string(),
            })
            .await;

        assert!(controller.cleanup.lock().unwrap().get_pending_status().is_empty());
    }

    #[test]
    fn only_start_die_stop_kill_trigger_a_reconcile() {
        assert!(triggers_reconcile("start"));
        assert!(triggers_reconcile("die"));
        assert!(triggers_reconcile("stop"));
        assert!(triggers_reconcile("kill"));
        assert!(!triggers_reconcile("pause"));
        assert!(!triggers_reconcile("unpause"));
        assert!(!triggers_reconcile("exec_start"));
    }
}
