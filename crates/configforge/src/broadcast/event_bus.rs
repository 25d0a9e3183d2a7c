//! Application-level event fan-out.

use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::kube::model::KubeConfig;
use crate::watch::FileChangeEvent;

pub const CONFIGS_DIR_NAME: &str = "configs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AppEvent {
    ConfigFileAdded { path: PathBuf },
    ConfigFileChanged { path: PathBuf },
    ConfigFileRemoved { path: PathBuf },
    ReloadConfigRequested,
    ActiveConfigChanged { config: Option<KubeConfig> },
    Notification { message: String, severity: Severity },
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
        .unwrap_or(false)
}

/// Maps a watcher event onto the application vocabulary. Non-YAML files are
/// dropped.
pub fn map_file_event(event: &FileChangeEvent) -> Option<AppEvent> {
    match event {
        FileChangeEvent::Created { path } if is_yaml(path) => Some(AppEvent::ConfigFileAdded {
            path: path.clone(),
        }),
        FileChangeEvent::Modified { path } if is_yaml(path) => {
            Some(AppEvent::ConfigFileChanged { path: path.clone() })
        }
        FileChangeEvent::Deleted { path } if is_yaml(path) => {
            Some(AppEvent::ConfigFileRemoved { path: path.clone() })
        }
        FileChangeEvent::Renamed { to, .. } if is_yaml(to) => {
            Some(AppEvent::ConfigFileAdded { path: to.clone() })
        }
        FileChangeEvent::DirectoryChanged { path }
            if path.file_name().is_some_and(|n| n == CONFIGS_DIR_NAME) =>
        {
            Some(AppEvent::ReloadConfigRequested)
        }
        _ => None,
    }
}

/// Publish/subscribe bus shared by the engine and its front ends.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: AppEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn notify(&self, message: impl Into<String>, severity: Severity) {
        self.publish(AppEvent::Notification {
            message: message.into(),
            severity,
        });
    }

    pub fn request_reload(&self) {
        self.publish(AppEvent::ReloadConfigRequested);
    }

    pub fn notify_active_config_changed(&self, config: Option<KubeConfig>) {
        self.publish(AppEvent::ActiveConfigChanged { config });
    }

    /// Republishes mapped watcher events until the watcher's channel closes.
    pub fn forward_from(&self, mut receiver: broadcast::Receiver<FileChangeEvent>) -> JoinHandle<()> {
        let bus = self.clone();
        std::thread::spawn(move || {
            info!("Starting file event bridge");
            loop {
                match receiver.blocking_recv() {
                    Ok(event) => {
                        if let Some(app_event) = map_file_event(&event) {
                            debug!("Forwarding {:?}", app_event);
                            bus.publish(app_event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("File event bridge lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("File watcher closed, stopping file event bridge");
                        break;
                    }
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.request_reload();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscribers_see_publish_order() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.notify("saved", Severity::Success);
        bus.request_reload();

        for rx in [&mut a, &mut b] {
            assert_eq!(
                rx.try_recv().unwrap(),
                AppEvent::Notification {
                    message: "saved".into(),
                    severity: Severity::Success
                }
            );
            assert_eq!(rx.try_recv().unwrap(), AppEvent::ReloadConfigRequested);
        }
    }

    #[test]
    fn test_lagging_subscriber_skips() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.notify(format!("n{}", i), Severity::Info);
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(3))
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            AppEvent::Notification {
                message: "n3".into(),
                severity: Severity::Info
            }
        );
    }

    #[test]
    fn test_map_file_event() {
        let yaml = PathBuf::from("/k/configs/dev.yaml");
        assert_eq!(
            map_file_event(&FileChangeEvent::Created { path: yaml.clone() }),
            Some(AppEvent::ConfigFileAdded { path: yaml.clone() })
        );
        assert_eq!(
            map_file_event(&FileChangeEvent::Modified { path: yaml.clone() }),
            Some(AppEvent::ConfigFileChanged { path: yaml.clone() })
        );
        assert_eq!(
            map_file_event(&FileChangeEvent::Deleted { path: yaml.clone() }),
            Some(AppEvent::ConfigFileRemoved { path: yaml.clone() })
        );
        assert_eq!(
            map_file_event(&FileChangeEvent::Renamed {
                from: "/k/configs/old.yml".into(),
                to: yaml.clone()
            }),
            Some(AppEvent::ConfigFileAdded { path: yaml })
        );
        assert_eq!(
            map_file_event(&FileChangeEvent::DirectoryChanged {
                path: "/k/configs".into()
            }),
            Some(AppEvent::ReloadConfigRequested)
        );
        assert_eq!(
            map_file_event(&FileChangeEvent::DirectoryChanged {
                path: "/k/other".into()
            }),
            None
        );
        assert_eq!(
            map_file_event(&FileChangeEvent::Modified {
                path: "/k/configs/notes.txt".into()
            }),
            None
        );
    }

    #[test]
    fn test_forward_from_ends_when_sender_dropped() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let (tx, file_rx) = broadcast::channel(16);

        let bridge = bus.forward_from(file_rx);
        tx.send(FileChangeEvent::Modified {
            path: "/k/configs/a.yaml".into(),
        })
        .unwrap();
        drop(tx);
        bridge.join().unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            AppEvent::ConfigFileChanged {
                path: "/k/configs/a.yaml".into()
            }
        );
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_string(&AppEvent::Notification {
            message: "ok".into(),
            severity: Severity::Error,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"notification\""));
        assert!(json.contains("\"severity\":\"error\""));
    }
}
