//! Manager: a named-viewer registry with lazy start, per-viewer monitor
//! tasks, idle eviction, and config-driven reconciliation.
//!
//! Viewers come in two populations sharing one registry: config-driven
//! viewers (declared in [`crate::config::Config`]) and service viewers
//! (registered programmatically under a `svc:` prefix).
//! `update_configs` only ever rebuilds the former; `remove_service_viewers`
//! only ever clears the latter.


use crate::config::{LogParserConfig, LogSourceConfig, LogViewerConfig, LogViewerSettings, ParserKind};
use crate::deriver::Deriver;
use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::events::{publish_optional, Event, EventBus};
use crate::parser::{JsonParser, LogfmtParser, NoneParser, Parser, RegexParser, SyslogParser};
use crate::source::command::CommandSource;
use crate::source::docker::DockerSource;
use crate::source::file::FileSource;
use crate::source::kubernetes::KubernetesSource;
use crate::source::service::{ServiceLogProvider, ServiceSource};
use crate::source::ssh::SshSource;
use crate::source::LogSource;
use crate::viewer::Viewer;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SERVICE_PREFIX: &str = "svc:";
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const MAX_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(1);

struct Monitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    service: bool,
}

pub struct Manager {
    viewers: RwLock<HashMap<String, Arc<Viewer>>>,
    /// Per-viewer field name consulted by trace correlation's ID
    /// expansion pass, from each viewer's parser config.
    id_fields: RwLock<HashMap<String, String>>,
    monitors: Mutex<HashMap<String, Monitor>>,
    parent: StdMutex<Option<CancellationToken>>,
    cleanup: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    /// Zero disables idle eviction.
    idle_timeout: Duration,
    event_bus: Option<Arc<dyn EventBus>>,
}

impl Manager {
    pub fn new(idle_timeout: Duration, event_bus: Option<Arc<dyn EventBus>>) -> Arc<Self> {
        Arc::new(Manager {
            viewers: RwLock::new(HashMap::new()),
            id_fields: RwLock::new(HashMap::new()),
            monitors: Mutex::new(HashMap::new()),
            parent: StdMutex::new(None),
            cleanup: Mutex::new(None),
            idle_timeout,
            event_bus,
        })
    }

    /// Builds a manager from settings, parsing `idle_timeout` from its
    /// string form (`"0"` disables eviction; absent means 5 minutes).
    pub fn from_settings(settings: &LogViewerSettings, event_bus: Option<Arc<dyn EventBus>>) -> Result<Arc<Self>> {
        let idle_timeout = match settings.idle_timeout.as_deref() {
            None => DEFAULT_IDLE_TIMEOUT,
            Some("0") => Duration::ZERO,
            Some(raw) => crate::util::duration::parse_duration(raw)?,
        };
        Ok(Manager::new(idle_timeout, event_bus))
    }

    /// Constructs viewers for every config entry without starting any of
    /// them. Returns one error per entry that failed to build; the rest
    /// are registered regardless.
    pub async fn initialize(&self, configs: &[LogViewerConfig]) -> Vec<Error> {
        let mut errors = Vec::new();
        for cfg in configs {
            match build_viewer(cfg) {
                Ok(viewer) => {
                    self.register(cfg, viewer).await;
                }
                Err(e) => errors.push(e),
            }
        }
        errors
    }

    async fn register(&self, cfg: &LogViewerConfig, viewer: Arc<Viewer>) {
        if let Some(id_field) = cfg.parser.as_ref().and_then(|p| p.id.clone()) {
            self.id_fields.write().await.insert(cfg.name.clone(), id_field);
        }
        self.viewers.write().await.insert(cfg.name.clone(), viewer);
    }

    /// Registers a programmatically-built viewer, typically a service
    /// viewer named with the `svc:` prefix.
    pub async fn add_viewer(&self, viewer: Arc<Viewer>) {
        self.viewers.write().await.insert(viewer.name().to_string(), viewer);
    }

    /// Builds and registers a `svc:<name>` viewer over an in-process
    /// log provider.
    pub async fn add_service_viewer(&self, name: &str, provider: Arc<dyn ServiceLogProvider>) -> Arc<Viewer> {
        let viewer = Arc::new(Viewer::new(
            format!("{SERVICE_PREFIX}{name}"),
            Arc::new(ServiceSource::new(name, provider)),
            Arc::new(NoneParser),
            Deriver::default(),
            0,
        ));
        self.add_viewer(viewer.clone()).await;
        viewer
    }

    /// Stashes the lifetime context and arms the idle-eviction sweep.
    /// No viewer starts producing here; startup is lazy, per viewer, on
    /// first access.
    pub async fn start(self: &Arc<Self>, ctx: CancellationToken) {
        *self.parent.lock().unwrap() = Some(ctx.clone());
        if self.idle_timeout.is_zero() {
            return;
        }
        let interval = MAX_CLEANUP_INTERVAL.min(self.idle_timeout / 2).max(Duration::from_millis(10));
        let cancel = ctx.child_token();
        let sweep_cancel = cancel.clone();
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sweep_cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => this.evict_idle_viewers().await,
                }
            }
        });
        *self.cleanup.lock().await = Some((cancel, handle));
    }

    fn parent_token(&self) -> CancellationToken {
        self.parent
            .lock()
            .unwrap()
            .clone()
            .expect("Manager::start must be called before using the manager")
    }

    pub async fn get_viewer(&self, name: &str) -> Option<Arc<Viewer>> {
        self.viewers.read().await.get(name).cloned()
    }

    /// Field name consulted by trace correlation's ID expansion pass
    /// for `viewer`, if one was configured.
    pub async fn id_field(&self, viewer: &str) -> Option<String> {
        self.id_fields.read().await.get(viewer).cloned()
    }

    /// Starts `name` if it isn't running yet, refreshing its
    /// last-accessed stamp either way. A successful cold start emits
    /// `log.connected` and spawns the monitor task; a failed one emits
    /// `log.error`.
    pub async fn ensure_started(&self, name: &str) -> Result<()> {
        let viewer = self
            .viewers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("viewer", name.to_string()))?;
        viewer.touch();
        if viewer.is_started() {
            return Ok(());
        }

        let parent = self.parent_token();
        if let Err(e) = viewer.start(parent.clone()).await {
            publish_optional(self.event_bus.as_ref(), Event::LogError { viewer: name.to_string(), error: e.to_string() });
            return Err(e);
        }
        tracing::info!(viewer = name, source = %viewer.source_name(), "viewer started");
        publish_optional(
            self.event_bus.as_ref(),
            Event::LogConnected { viewer: name.to_string(), source: viewer.source_name() },
        );
        self.spawn_monitor(name, &viewer, parent).await;
        Ok(())
    }

    /// [`Manager::ensure_started`] composed with the lookup.
    pub async fn get_and_start(&self, name: &str) -> Result<Arc<Viewer>> {
        self.ensure_started(name).await?;
        self.get_viewer(name).await.ok_or_else(|| Error::not_found("viewer", name.to_string()))
    }

    /// Start-on-demand, then a live entry stream.
    pub async fn subscribe(&self, name: &str) -> Result<broadcast::Receiver<Entry>> {
        let viewer = self.get_and_start(name).await?;
        Ok(viewer.subscribe())
    }

    /// One monitor task per started viewer: forwards source errors as
    /// `log.error`, translates connection flips into
    /// `log.connected`/`log.disconnected`, and emits one final
    /// `log.disconnected` when the error stream closes on a connected
    /// viewer.
    async fn spawn_monitor(&self, name: &str, viewer: &Arc<Viewer>, parent: CancellationToken) {
        let mut err_rx = match viewer.take_error_receiver() {
            Some(rx) => rx,
            None => return,
        };
        let cancel = parent.child_token();
        let monitor_cancel = cancel.clone();
        let viewer = Arc::clone(viewer);
        let bus = self.event_bus.clone();
        let viewer_name = name.to_string();
        let service = name.starts_with(SERVICE_PREFIX);

        let handle = tokio::spawn(async move {
            let source = viewer.source_name();
            let mut was_connected = viewer.status().connected;
            let mut poll = tokio::time::interval(MONITOR_POLL_INTERVAL);
            poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = monitor_cancel.cancelled() => break,
                    err = err_rx.recv() => match err {
                        Some(e) => {
                            tracing::warn!(viewer = %viewer_name, error = %e, "source error");
                            publish_optional(bus.as_ref(), Event::LogError {
                                viewer: viewer_name.clone(),
                                error: e.to_string(),
                            });
                        }
                        None => {
                            if was_connected {
                                publish_optional(bus.as_ref(), Event::LogDisconnected {
                                    viewer: viewer_name.clone(),
                                    source: source.clone(),
                                    error: viewer.status().last_error,
                                    reason: None,
                                });
                            }
                            break;
                        }
                    },
                    _ = poll.tick() => {
                        let connected = viewer.status().connected;
                        if connected && !was_connected {
                            publish_optional(bus.as_ref(), Event::LogConnected {
                                viewer: viewer_name.clone(),
                                source: source.clone(),
                            });
                        } else if !connected && was_connected {
                            publish_optional(bus.as_ref(), Event::LogDisconnected {
                                viewer: viewer_name.clone(),
                                source: source.clone(),
                                error: viewer.status().last_error,
                                reason: None,
                            });
                        }
                        was_connected = connected;
                    }
                }
            }
        });

        let mut monitors = self.monitors.lock().await;
        if let Some(old) = monitors.insert(name.to_string(), Monitor { cancel, handle, service }) {
            old.cancel.cancel();
        }
    }

    /// Every sweep: stop running viewers that have no subscribers and
    /// haven't been touched within the idle timeout. Evicted viewers
    /// stay registered, so a later access restarts them.
    async fn evict_idle_viewers(&self) {
        let candidates: Vec<(String, Arc<Viewer>)> = {
            let viewers = self.viewers.read().await;
            viewers
                .iter()
                .filter(|(_, v)| v.is_started() && v.subscriber_count() == 0 && v.idle_for() >= self.idle_timeout)
                .map(|(name, v)| (name.clone(), v.clone()))
                .collect()
        };
        for (name, viewer) in candidates {
            tracing::info!(viewer = %name, "stopping idle viewer");
            viewer.stop().await;
            self.retire_monitor(&name).await;
            publish_optional(
                self.event_bus.as_ref(),
                Event::LogDisconnected {
                    viewer: name.clone(),
                    source: viewer.source_name(),
                    error: None,
                    reason: Some("idle timeout".to_string()),
                },
            );
        }
    }

    async fn retire_monitor(&self, name: &str) {
        let monitor = self.monitors.lock().await.remove(name);
        if let Some(monitor) = monitor {
            monitor.cancel.cancel();
            let _ = monitor.handle.await;
        }
    }

    /// Replaces the config-driven population wholesale: every
    /// non-service viewer is stopped (with its monitor joined) and the
    /// registry is rebuilt from `configs`, preserving service viewers
    /// untouched. Returns one error per config entry that failed to
    /// build.
    pub async fn update_configs(&self, configs: &[LogViewerConfig]) -> Vec<Error> {
        let stale: Vec<(String, Arc<Viewer>)> = {
            let viewers = self.viewers.read().await;
            viewers
                .iter()
                .filter(|(name, _)| !name.starts_with(SERVICE_PREFIX))
                .map(|(name, v)| (name.clone(), v.clone()))
                .collect()
        };
        for (name, viewer) in &stale {
            viewer.stop().await;
            self.retire_monitor(name).await;
        }
        {
            let mut viewers = self.viewers.write().await;
            for (name, _) in &stale {
                viewers.remove(name);
            }
        }
        self.id_fields.write().await.clear();

        self.initialize(configs).await
    }

    /// Mirror of `update_configs` for the service population: stops and
    /// removes every `svc:`-prefixed viewer, leaving config-driven
    /// viewers untouched.
    pub async fn remove_service_viewers(&self) {
        let stale: Vec<(String, Arc<Viewer>)> = {
            let viewers = self.viewers.read().await;
            viewers
                .iter()
                .filter(|(name, _)| name.starts_with(SERVICE_PREFIX))
                .map(|(name, v)| (name.clone(), v.clone()))
                .collect()
        };
        for (name, viewer) in &stale {
            viewer.stop().await;
            self.retire_monitor(name).await;
        }
        let mut viewers = self.viewers.write().await;
        for (name, _) in &stale {
            viewers.remove(name);
        }
    }

    /// Stops everything: the cleanup sweep, every viewer, and every
    /// monitor task. Waits for the monitors so no task outlives the
    /// manager's shutdown.
    pub async fn stop(&self) {
        let cleanup = self.cleanup.lock().await.take();
        if let Some((cancel, handle)) = cleanup {
            cancel.cancel();
            let _ = handle.await;
        }

        let all: Vec<Arc<Viewer>> = self.viewers.read().await.values().cloned().collect();
        for viewer in all {
            viewer.stop().await;
        }

        let monitors: Vec<Monitor> = {
            let mut map = self.monitors.lock().await;
            map.drain().map(|(_, m)| m).collect()
        };
        for monitor in &monitors {
            monitor.cancel.cancel();
        }
        // joined by population, config-driven first, mirroring the two
        // startup wait-groups
        let (config, service): (Vec<Monitor>, Vec<Monitor>) = monitors.into_iter().partition(|m| !m.service);
        futures::future::join_all(config.into_iter().map(|m| m.handle)).await;
        futures::future::join_all(service.into_iter().map(|m| m.handle)).await;
    }
}

fn build_viewer(cfg: &LogViewerConfig) -> Result<Arc<Viewer>> {
    let source = build_source(&cfg.source)?;
    let parser = build_parser(cfg.parser.as_ref())?;
    let deriver = Deriver::from_config(&cfg.derive)?;
    Ok(Arc::new(Viewer::new(cfg.name.clone(), source, parser, deriver, cfg.buffer.max_entries)))
}

fn build_source(cfg: &LogSourceConfig) -> Result<Arc<dyn LogSource>> {
    Ok(match cfg {
        LogSourceConfig::File { path, current, rotated_pattern, decompress } => Arc::new(
            FileSource::new(path.clone()).with_rotation(*current, rotated_pattern.clone(), decompress.clone()),
        ),
        LogSourceConfig::Command { command } => Arc::new(CommandSource::new(command.clone())),
        LogSourceConfig::Ssh { host, path } => Arc::new(SshSource::new(host.clone(), path.clone())),
        LogSourceConfig::Docker { container, since, follow } => {
            Arc::new(DockerSource::new(container.clone(), since.clone(), *follow))
        }
        LogSourceConfig::Kubernetes { pod, namespace, container, since, follow } => Arc::new(KubernetesSource::new(
            pod.clone(),
            namespace.clone(),
            container.clone(),
            since.clone(),
            *follow,
        )),
        LogSourceConfig::Service { .. } => {
            return Err(Error::not_supported("manager", "service sources are registered programmatically"));
        }
    })
}

fn build_parser(cfg: Option<&LogParserConfig>) -> Result<Arc<dyn Parser>> {
    let cfg = match cfg {
        None => return Ok(Arc::new(NoneParser)),
        Some(cfg) => cfg,
    };
    Ok(match cfg.kind {
        ParserKind::None => Arc::new(NoneParser),
        ParserKind::Syslog => Arc::new(SyslogParser),
        ParserKind::Json => Arc::new(JsonParser {
            timestamp_field: cfg.timestamp.clone().unwrap_or_else(|| "timestamp".to_string()),
            level_field: cfg.level.clone().unwrap_or_else(|| "level".to_string()),
            message_field: cfg.message.clone().unwrap_or_else(|| "message".to_string()),
            timestamp_format: cfg.timestamp_format.clone(),
        }),
        ParserKind::Logfmt => Arc::new(LogfmtParser {
            timestamp_field: cfg.timestamp.clone().unwrap_or_else(|| "timestamp".to_string()),
            level_field: cfg.level.clone().unwrap_or_else(|| "level".to_string()),
            message_field: cfg.message.clone().unwrap_or_else(|| "message".to_string()),
            timestamp_format: cfg.timestamp_format.clone(),
        }),
        ParserKind::Regex => {
            let pattern = cfg
                .pattern
                .as_deref()
                .ok_or_else(|| Error::validation("regex_parser", "missing pattern"))?;
            Arc::new(RegexParser::new(
                pattern,
                cfg.timestamp.clone(),
                cfg.level.clone(),
                cfg.message.clone(),
                cfg.timestamp_format.clone(),
            )?)
        }
    })
}
