mod channel;
mod config;
mod debounce;
mod detector;
mod engine;
#[cfg(test)]
mod fake_remote;
mod hash;
mod resolver;
mod store;
mod supervisor;
mod watch;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use sync_core::{EventSource, MetadataStore, RemoteClient, SyncFolder, SyncFolderUpdate};
use sync_remote::HttpRemoteClient;
use tracing::{error, info};
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::EnvFilter;

use crate::channel::{Request, Response};
use crate::config::{Cli, Settings};
use crate::engine::{EngineEvent, SyncEngine};
use crate::store::SqliteMetadataStore;
use crate::watch::NotifyEventSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_dir = Settings::default_config_dir().join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = RollingBuilder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix("sync-agent")
        .filename_suffix("log")
        .max_log_files(3)
        .build(&log_dir)?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(non_blocking)
        .init();

    info!("starting sync-agent");

    let settings = Settings::load_or_default(&cli.config)?;
    let db_path = Settings::default_config_dir().join("sync-agent.db");
    std::fs::create_dir_all(db_path.parent().unwrap())?;

    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open(&db_path)?);
    let remote_base = format!("{}:{}", settings.server_url, settings.server_port);
    let remote: Arc<dyn RemoteClient> = Arc::new(HttpRemoteClient::new(remote_base));
    let event_source: Arc<dyn EventSource> = Arc::new(NotifyEventSource::new()?);

    let engine = Arc::new(SyncEngine::new(
        store.clone(),
        remote,
        event_source,
        settings.max_concurrent_transfers,
    ));

    if !settings.username.is_empty() {
        info!("username configured in settings; waiting for login command");
    }

    if let Err(e) = engine.restore_watches().await {
        error!("failed to restore watches: {e}");
    }

    let shutdown_rx = supervisor::install_shutdown_signal();
    let tick_interval = Duration::from_secs(settings.sync_interval);
    let tick_handle = tokio::spawn(supervisor::run_tick_loop(
        engine.clone(),
        tick_interval,
        shutdown_rx.clone(),
    ));

    let writer = channel::spawn_writer(tokio::io::stdout());

    let event_driven_handle = engine.clone().spawn_event_driven_path();

    let mut engine_events = engine.subscribe();
    let writer_for_events = writer.clone();
    let mut shutdown_for_events = shutdown_rx.clone();
    let events_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                event = engine_events.recv() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    };
                    let response = match event {
                        EngineEvent::FolderStatus { folder_id, status } => Response::event(
                            "folder_status",
                            json!({"folderId": folder_id, "status": status}),
                        ),
                        EngineEvent::FileChanged { folder_id, relative_path, state } => Response::event(
                            "file_changed",
                            json!({"folderId": folder_id, "relativePath": relative_path, "state": state}),
                        ),
                        EngineEvent::Error { folder_id, relative_path, message } => Response::event(
                            "sync_error",
                            json!({"folderId": folder_id, "relativePath": relative_path, "message": message}),
                        ),
                        EngineEvent::AuthRequired => Response::event("auth_required", json!({})),
                    };
                    if writer_for_events.send(response).await.is_err() {
                        break;
                    }
                }
                _ = shutdown_for_events.changed() => break,
            }
        }
    });

    let engine_for_reader = engine.clone();
    let writer_for_reader = writer.clone();
    let config_path = cli.config.clone();

    let mut shutdown_for_reader = shutdown_rx.clone();
    let reader = tokio::spawn(async move {
        tokio::select! {
            _ = channel::run_reader(tokio::io::stdin(), move |request| {
                let engine = engine_for_reader.clone();
                let writer = writer_for_reader.clone();
                let config_path = config_path.clone();
                async move {
                    handle_command(engine, writer, config_path, request).await;
                }
            }) => {}
            _ = shutdown_for_reader.changed() => {}
        }
    });

    let _ = shutdown_rx.clone().changed().await;
    engine.stop().await;
    tick_handle.abort();
    reader.abort();
    events_handle.abort();
    event_driven_handle.abort();

    info!("sync-agent shutdown complete");
    Ok(())
}

async fn handle_command(
    engine: Arc<SyncEngine>,
    writer: tokio::sync::mpsc::Sender<Response>,
    config_path: std::path::PathBuf,
    request: Request,
) {
    let id = request.id;
    let response = match request.command.as_str() {
        "ping" => Response::ok("pong", id, channel::pong()),
        "login" => {
            let username = request.payload["username"].as_str().unwrap_or_default();
            let password = request.payload["password"].as_str().unwrap_or_default();
            match engine.login(username, password).await {
                Ok(()) => Response::ok("login", id, json!({"authenticated": true})),
                Err(e) => Response::err("login", id, e.to_string()),
            }
        }
        "add_sync_folder" => {
            let local_path = request.payload["localPath"].as_str().unwrap_or_default();
            let remote_path = request.payload["remotePath"].as_str().unwrap_or_default();
            let folder = SyncFolder::new(
                uuid::Uuid::new_v4().to_string(),
                local_path.to_string(),
                remote_path.to_string(),
            );
            let folder_id = folder.id.clone();
            match engine.add_folder(folder).await {
                Ok(()) => Response::ok("add_sync_folder", id, json!({"id": folder_id})),
                Err(e) => Response::err("add_sync_folder", id, e.to_string()),
            }
        }
        "logout" => {
            engine.logout();
            Response::ok("logout", id, json!({}))
        }
        "remove_sync_folder" => {
            let folder_id = request.payload["id"].as_str().unwrap_or_default();
            match engine.remove_folder(folder_id).await {
                Ok(()) => Response::ok("remove_sync_folder", id, json!({})),
                Err(e) => Response::err("remove_sync_folder", id, e.to_string()),
            }
        }
        "pause_sync" => {
            let folder_id = request.payload["id"].as_str().unwrap_or_default();
            match engine.pause(folder_id).await {
                Ok(()) => Response::ok("pause_sync", id, json!({})),
                Err(e) => Response::err("pause_sync", id, e.to_string()),
            }
        }
        "resume_sync" => {
            let folder_id = request.payload["id"].as_str().unwrap_or_default();
            match engine.resume(folder_id).await {
                Ok(()) => Response::ok("resume_sync", id, json!({})),
                Err(e) => Response::err("resume_sync", id, e.to_string()),
            }
        }
        "update_sync_folder" => {
            let folder_id = request.payload["id"].as_str().unwrap_or_default();
            let update = SyncFolderUpdate {
                enabled: request.payload["enabled"].as_bool(),
                conflict_policy: None,
            };
            match engine.update_folder(folder_id, &update).await {
                Ok(()) => Response::ok("update_sync_folder", id, json!({})),
                Err(e) => Response::err("update_sync_folder", id, e.to_string()),
            }
        }
        "get_sync_state" => match engine.state().await {
            Ok(state) => Response::ok(
                "get_sync_state",
                id,
                json!({
                    "authenticated": state.authenticated,
                    "folders": state.folders.len(),
                }),
            ),
            Err(e) => Response::err("get_sync_state", id, e.to_string()),
        },
        "get_folders" => match engine.state().await {
            Ok(state) => match serde_json::to_value(&state.folders) {
                Ok(data) => Response::ok("get_folders", id, data),
                Err(e) => Response::err("get_folders", id, e.to_string()),
            },
            Err(e) => Response::err("get_folders", id, e.to_string()),
        },
        "get_conflicts" => {
            let folder_id = request.payload["folderId"].as_str().unwrap_or_default();
            match engine.pending_conflicts(folder_id).await {
                Ok(conflicts) => match serde_json::to_value(&conflicts) {
                    Ok(data) => Response::ok("get_conflicts", id, data),
                    Err(e) => Response::err("get_conflicts", id, e.to_string()),
                },
                Err(e) => Response::err("get_conflicts", id, e.to_string()),
            }
        }
        "resolve_conflict" => {
            let conflict_id = request.payload["id"].as_str().unwrap_or_default();
            match parse_resolution_tag(request.payload["resolution"].as_str()) {
                Ok(tag) => match engine.resolve_conflict(conflict_id, tag).await {
                    Ok(()) => Response::ok("resolve_conflict", id, json!({})),
                    Err(e) => Response::err("resolve_conflict", id, e.to_string()),
                },
                Err(e) => Response::err("resolve_conflict", id, e),
            }
        }
        "resolve_all_conflicts" => {
            let folder_id = request.payload["folderId"].as_str().unwrap_or_default();
            match parse_resolution_tag(request.payload["resolution"].as_str()) {
                Ok(tag) => match engine.resolve_all_conflicts(folder_id, tag).await {
                    Ok(count) => Response::ok("resolve_all_conflicts", id, json!({"resolved": count})),
                    Err(e) => Response::err("resolve_all_conflicts", id, e.to_string()),
                },
                Err(e) => Response::err("resolve_all_conflicts", id, e),
            }
        }
        "get_settings" => match Settings::load_or_default(&config_path) {
            Ok(settings) => match serde_json::to_value(&settings) {
                Ok(data) => Response::ok("get_settings", id, data),
                Err(e) => Response::err("get_settings", id, e.to_string()),
            },
            Err(e) => Response::err("get_settings", id, e.to_string()),
        },
        "update_settings" => match serde_json::from_value::<Settings>(request.payload.clone()) {
            Ok(settings) => match settings.save(&config_path) {
                Ok(()) => Response::ok("update_settings", id, json!({})),
                Err(e) => Response::err("update_settings", id, e.to_string()),
            },
            Err(e) => Response::err("update_settings", id, e.to_string()),
        },
        other => Response::err("unknown_command", id, format!("unrecognized command: {other}")),
    };

    if writer.send(response).await.is_err() {
        error!("output channel closed, dropping response");
    }
}

fn parse_resolution_tag(value: Option<&str>) -> std::result::Result<sync_core::ResolutionTag, String> {
    match value {
        Some("local") => Ok(sync_core::ResolutionTag::Local),
        Some("remote") => Ok(sync_core::ResolutionTag::Remote),
        Some("both") => Ok(sync_core::ResolutionTag::Both),
        Some("manual") => Ok(sync_core::ResolutionTag::Manual),
        other => Err(format!("invalid resolution tag: {other:?}")),
    }
}
