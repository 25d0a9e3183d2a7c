//! Kubernetes config commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use configforge::kube::normalize_file_name;
use configforge::{
    AppEvent, ConfigFile, ConfigSynchronizer, EventBus, FileStatus, FileStore, ForgeError,
    Settings, Severity, StoreMonitor,
};
use log::{info, warn};
use tokio::sync::broadcast::error::TryRecvError;

use super::print_json;
use crate::cli::KubeCommand;
use crate::error::{CliError, Result};

fn synchronizer(settings: &Settings) -> ConfigSynchronizer {
    ConfigSynchronizer::new(settings.store_layout(), Arc::new(FileStore::new()))
}

/// Finds a file by exact name, stem, or name with `.yaml` appended.
pub fn find_by_name(files: Vec<ConfigFile>, name: &str) -> Option<ConfigFile> {
    let normalized = normalize_file_name(name).ok();
    files.into_iter().find(|f| {
        f.file_name == name
            || f.display_name() == name
            || normalized.as_deref() == Some(f.file_name.as_str())
    })
}

fn stored(sync: &ConfigSynchronizer, name: &str) -> Result<ConfigFile> {
    find_by_name(sync.discover()?, name)
        .ok_or_else(|| CliError::Usage(format!("no stored config named '{}'", name)))
}

fn status_label(status: &FileStatus) -> String {
    match status {
        FileStatus::Valid => "valid".into(),
        FileStatus::Invalid(reason) => format!("invalid: {}", reason),
        FileStatus::Unknown => "unknown".into(),
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into())
}

fn print_files(files: &[ConfigFile]) {
    for file in files {
        let marker = if file.is_active { "*" } else { " " };
        println!(
            "{} {:<32} {:<16} {}",
            marker,
            file.file_name,
            format_time(file.modified),
            status_label(&file.status)
        );
    }
}

fn print_event(event: &AppEvent) -> Result<()> {
    match event {
        AppEvent::Notification { message, severity } => {
            let tag = match severity {
                Severity::Info => "info",
                Severity::Success => "ok",
                Severity::Error => "error",
            };
            println!("[{}] {}", tag, message);
        }
        other => println!("{}", serde_json::to_string(other)?),
    }
    Ok(())
}

fn watch(settings: &Settings) -> Result<()> {
    let bus = EventBus::new(settings.event_capacity);
    let sync = Arc::new(synchronizer(settings).with_event_bus(bus.clone()));
    let mut receiver = bus.subscribe();
    let mut monitor = StoreMonitor::start_with_extensions(sync, bus, &settings.watch_extensions)?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::Relaxed))?;

    println!("Watching {} (Ctrl-C to stop)", settings.kube_dir.display());
    while running.load(Ordering::Relaxed) {
        match receiver.try_recv() {
            Ok(event) => print_event(&event)?,
            Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(100)),
            Err(TryRecvError::Lagged(skipped)) => {
                warn!("Dropped {} events", skipped);
            }
            Err(TryRecvError::Closed) => break,
        }
    }

    monitor.stop();
    info!("Stopped watching");
    Ok(())
}

pub fn run(settings: &Settings, command: KubeCommand) -> Result<()> {
    let sync = synchronizer(settings);

    match command {
        KubeCommand::List(list) => {
            let files = sync.discover_validated()?;
            if list.json {
                return print_json(&files);
            }
            if files.is_empty() {
                println!("No configs in {}", sync.layout().configs_dir.display());
                return Ok(());
            }
            print_files(&files);
        }
        KubeCommand::Current => {
            let content = sync.load_active()?;
            if content.trim().is_empty() {
                println!("No active config at {}", sync.layout().active_path.display());
                return Ok(());
            }
            let name = sync.active_marker()?;
            println!("config:  {}", name.as_deref().unwrap_or("(untracked)"));
            match configforge::kube::decode(&content) {
                Ok(config) => {
                    let context = config.current_context_name().unwrap_or("(none)");
                    println!("context: {}", context);
                    if let Some(ctx) = config.current() {
                        println!("cluster: {}", ctx.context.cluster);
                        println!("user:    {}", ctx.context.user);
                        if let Some(ns) = &ctx.context.namespace {
                            println!("namespace: {}", ns);
                        }
                    }
                }
                Err(e) => println!("context: unreadable ({})", e),
            }
        }
        KubeCommand::Use { name } => {
            let file = stored(&sync, &name)?;
            let config = sync.activate(&file)?;
            println!(
                "Switched to {} (context {})",
                file.file_name,
                config.current_context_name().unwrap_or("none")
            );
        }
        KubeCommand::Create { name, from } => {
            let content = sync.store().read(&from)?;
            let mut file = sync.create_config_file(&name, &content)?;
            let status = sync.validate(&mut file);
            println!("Created {} ({})", file.file_name, status_label(&status));
        }
        KubeCommand::Duplicate { source, target } => {
            let file = stored(&sync, &source)?;
            let copy = sync.duplicate_config_file(&file, &target)?;
            println!("Duplicated {} as {}", file.file_name, copy.file_name);
        }
        KubeCommand::Rename { source, target } => {
            let file = stored(&sync, &source)?;
            let renamed = sync.rename_config_file(&file, &target)?;
            println!("Renamed {} to {}", file.file_name, renamed.file_name);
        }
        KubeCommand::Delete { name } => {
            let file = stored(&sync, &name)?;
            sync.delete_config_file(&file)?;
            println!("Deleted {}", file.file_name);
        }
        KubeCommand::Backup { name } => {
            let content = sync.load_active()?;
            if content.trim().is_empty() {
                return Err(ForgeError::Validation("no active config to back up".into()).into());
            }
            let backup = sync.create_custom_backup(&content, name.as_deref())?;
            println!("Created backup {}", backup.file_name);
        }
        KubeCommand::Backups(list) => {
            let backups = sync.get_backup_files()?;
            if list.json {
                return print_json(&backups);
            }
            if backups.is_empty() {
                println!("No backups");
                return Ok(());
            }
            print_files(&backups);
        }
        KubeCommand::Restore { name } => {
            let backup = find_by_name(sync.get_backup_files()?, &name)
                .ok_or_else(|| CliError::Usage(format!("no backup named '{}'", name)))?;
            sync.restore_from(&backup)?;
            println!("Restored active config from {}", backup.file_name);
        }
        KubeCommand::Validate { name } => {
            let files = match name {
                Some(name) => {
                    let mut file = stored(&sync, &name)?;
                    sync.validate(&mut file);
                    vec![file]
                }
                None => sync.discover_validated()?,
            };
            print_files(&files);
            let invalid = files.iter().filter(|f| !f.is_valid()).count();
            if invalid > 0 {
                return Err(CliError::Usage(format!("{} invalid config(s)", invalid)));
            }
        }
        KubeCommand::Watch => watch(settings)?,
    }
    Ok(())
}
