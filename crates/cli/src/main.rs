use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use mirrorback_core::config::{self, Settings};
use mirrorback_core::logging::{self, LogFormat};
use mirrorback_core::{
    APP_NAME, ClientConfig, MediaFireClient, ProgressSink, RemoteFile, TransferOptions,
    TransferOutcome, TransferProgress, safe_remote_name,
};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "mirrorback")]
#[command(about = "Mirror local files into a MediaFire folder", long_about = None)]
struct Cli {
    #[arg(long)]
    json: bool,

    #[arg(long)]
    events: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    Settings {
        #[command(subcommand)]
        cmd: SettingsCmd,
    },
    Folders {
        #[command(subcommand)]
        cmd: FoldersCmd,
    },
    Files {
        #[command(subcommand)]
        cmd: FilesCmd,
    },
    /// Upload a file as a new remote file.
    Upload {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        folder: String,
    },
    /// Replace the contents of an existing remote file, matched by name.
    Update {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        folder: String,
    },
    /// Mirror one file into the configured folder, updating it when present.
    Put {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        key: Option<String>,
    },
}

#[derive(Subcommand)]
enum SettingsCmd {
    Get,
}

#[derive(Subcommand)]
enum FoldersCmd {
    List {
        #[arg(long)]
        parent: Option<String>,
    },
}

#[derive(Subcommand)]
enum FilesCmd {
    List {
        #[arg(long)]
        folder: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: true,
        }
    }
}

struct NdjsonProgressSink {
    task_id: String,
}

impl ProgressSink for NdjsonProgressSink {
    fn on_progress(&self, p: TransferProgress) {
        let line = serde_json::json!({
            "type": "task.progress",
            "taskId": self.task_id,
            "remoteName": p.remote_name,
            "phase": p.phase,
            "chunksTotal": p.chunks_total,
            "chunksDone": p.chunks_done,
            "bytesTotal": p.bytes_total,
            "bytesSent": p.bytes_sent,
        });
        println!("{line}");
    }
}

#[derive(Clone, Copy)]
enum TransferKind {
    Upload,
    Update,
}

impl TransferKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Update => "update",
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    });

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = cli
        .config_dir
        .or_else(|| {
            std::env::var("MIRRORBACK_CONFIG_DIR")
                .ok()
                .map(PathBuf::from)
        })
        .unwrap_or_else(default_config_dir);

    match cli.cmd {
        Command::Settings { cmd } => match cmd {
            SettingsCmd::Get => settings_get(&config_dir, cli.json),
        },
        Command::Folders { cmd } => match cmd {
            FoldersCmd::List { parent } => folders_list(&config_dir, parent, cli.json).await,
        },
        Command::Files { cmd } => match cmd {
            FilesCmd::List { folder } => files_list(&config_dir, folder, cli.json).await,
        },
        Command::Upload { file, name, folder } => {
            transfer_run(
                &config_dir,
                TransferKind::Upload,
                file,
                name,
                folder,
                cli.json,
                cli.events,
            )
            .await
        }
        Command::Update { file, name, folder } => {
            transfer_run(
                &config_dir,
                TransferKind::Update,
                file,
                name,
                folder,
                cli.json,
                cli.events,
            )
            .await
        }
        Command::Put { file, key } => put_run(&config_dir, file, key, cli.json, cli.events).await,
    }
}

fn settings_get(config_dir: &Path, json: bool) -> Result<(), CliError> {
    let settings = load_settings(config_dir)?;
    let password_present = std::env::var(&settings.account.password_env)
        .map(|v| !v.is_empty())
        .unwrap_or(false);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "settings": settings,
                "secrets": { "passwordPresent": password_present }
            })
        );
    } else {
        let text = toml::to_string(&settings)
            .map_err(|e| CliError::new("config.invalid", e.to_string()))?;
        print!("{text}");
        println!("# password present: {password_present}");
    }
    Ok(())
}

async fn folders_list(
    config_dir: &Path,
    parent: Option<String>,
    json: bool,
) -> Result<(), CliError> {
    let settings = load_settings(config_dir)?;
    let client = connect(&settings)?;
    let parent = parent.unwrap_or_else(|| settings.mirror.root_folder_key.clone());

    let folders = client
        .list_subfolders(&parent)
        .await
        .map_err(map_core_err)?;

    if json {
        println!("{}", to_json(&folders)?);
    } else {
        for f in folders {
            println!("{}\t{}", f.folder_key, f.name);
        }
    }
    Ok(())
}

async fn files_list(
    config_dir: &Path,
    folder: Option<String>,
    json: bool,
) -> Result<(), CliError> {
    let settings = load_settings(config_dir)?;
    let client = connect(&settings)?;
    let folder_key = match folder {
        Some(key) => key,
        None => mirror_folder_key(&client, &settings).await?,
    };

    let files = client
        .list_folder_contents(&folder_key)
        .await
        .map_err(map_core_err)?;

    if json {
        println!("{}", to_json(&files)?);
    } else {
        for f in files {
            println!("{}\t{}\t{}", f.quick_key, f.content_hash, f.name);
        }
    }
    Ok(())
}

async fn transfer_run(
    config_dir: &Path,
    kind: TransferKind,
    file: PathBuf,
    name: Option<String>,
    folder: String,
    json: bool,
    events: bool,
) -> Result<(), CliError> {
    let settings = load_settings(config_dir)?;
    let client = connect(&settings)?;
    let remote_name = match name {
        Some(name) => name,
        None => local_file_name(&file)?,
    };

    let task_id = format!("tsk_{}", uuid::Uuid::new_v4());
    emit_state(events, &task_id, kind.as_str(), "running", None);

    let sink = NdjsonProgressSink {
        task_id: task_id.clone(),
    };
    let opts = TransferOptions {
        progress: if events { Some(&sink) } else { None },
    };

    let res = match kind {
        TransferKind::Upload => client
            .upload_new_with(&file, &remote_name, &folder, opts)
            .await
            .map_err(map_core_err),
        TransferKind::Update => {
            let existing = find_remote(&client, &folder, &remote_name).await?.ok_or_else(|| {
                CliError::new(
                    "remote.not_found",
                    format!("no file named {remote_name} in folder {folder}"),
                )
            })?;
            client
                .update_existing_with(&file, &remote_name, existing.as_existing(&folder), opts)
                .await
                .map_err(map_core_err)
        }
    };
    finish(res, events, &task_id, kind.as_str(), json)
}

async fn put_run(
    config_dir: &Path,
    file: PathBuf,
    key: Option<String>,
    json: bool,
    events: bool,
) -> Result<(), CliError> {
    let settings = load_settings(config_dir)?;
    let client = connect(&settings)?;
    let key = match key {
        Some(key) => key,
        None => local_file_name(&file)?,
    };
    let remote_name = safe_remote_name(&key);
    let folder_key = mirror_folder_key(&client, &settings).await?;

    let existing = find_remote(&client, &folder_key, &remote_name).await?;
    let kind = if existing.is_some() {
        TransferKind::Update
    } else {
        TransferKind::Upload
    };
    tracing::info!(
        event = "put.resolved",
        remote_name = %remote_name,
        folder_key = %folder_key,
        kind = kind.as_str(),
        "put.resolved"
    );

    let task_id = format!("tsk_{}", uuid::Uuid::new_v4());
    emit_state(events, &task_id, kind.as_str(), "running", None);

    let sink = NdjsonProgressSink {
        task_id: task_id.clone(),
    };
    let opts = TransferOptions {
        progress: if events { Some(&sink) } else { None },
    };

    let res = match existing {
        Some(remote) => client
            .update_existing_with(&file, &remote_name, remote.as_existing(&folder_key), opts)
            .await,
        None => {
            client
                .upload_new_with(&file, &remote_name, &folder_key, opts)
                .await
        }
    };
    finish(res.map_err(map_core_err), events, &task_id, kind.as_str(), json)
}

fn finish(
    res: Result<TransferOutcome, CliError>,
    events: bool,
    task_id: &str,
    kind: &str,
    json: bool,
) -> Result<(), CliError> {
    let outcome = match res {
        Ok(outcome) => outcome,
        Err(e) => {
            emit_state(events, task_id, kind, "failed", None);
            return Err(e);
        }
    };

    if events {
        emit_state(events, task_id, kind, "succeeded", Some(&outcome));
        return Ok(());
    }

    if json {
        println!("{}", to_json(&outcome)?);
    } else {
        println!(
            "remoteName={} destinationId={}",
            outcome.remote_name,
            outcome.destination_id.as_deref().unwrap_or("-")
        );
        println!(
            "path={:?} bytes={} chunksSent={} reauthenticated={}",
            outcome.path, outcome.bytes, outcome.chunks_sent, outcome.reauthenticated
        );
    }
    Ok(())
}

fn emit_state(
    events: bool,
    task_id: &str,
    kind: &str,
    state: &str,
    outcome: Option<&TransferOutcome>,
) {
    if !events {
        return;
    }
    let mut line = serde_json::json!({
        "type": "task.state",
        "taskId": task_id,
        "kind": kind,
        "state": state,
    });
    if let Some(o) = outcome {
        line["destinationId"] = serde_json::json!(o.destination_id);
        line["chunksSent"] = serde_json::json!(o.chunks_sent);
    }
    println!("{line}");
}

async fn mirror_folder_key(
    client: &MediaFireClient,
    settings: &Settings,
) -> Result<String, CliError> {
    let folder = client
        .find_folder(&settings.mirror.root_folder_key, &settings.mirror.folder_name)
        .await
        .map_err(map_core_err)?;
    Ok(folder.folder_key)
}

async fn find_remote(
    client: &MediaFireClient,
    folder_key: &str,
    remote_name: &str,
) -> Result<Option<RemoteFile>, CliError> {
    let files = client
        .list_folder_contents(folder_key)
        .await
        .map_err(map_core_err)?;
    Ok(files.into_iter().find(|f| f.name == remote_name))
}

fn connect(settings: &Settings) -> Result<MediaFireClient, CliError> {
    let mut settings = settings.clone();
    if let Ok(email) = std::env::var("MIRRORBACK_EMAIL") {
        settings.account.email = email;
    }
    let password = std::env::var(&settings.account.password_env)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            CliError::new(
                "auth.missing_password",
                format!("{} is not set", settings.account.password_env),
            )
        })?;

    let cfg = ClientConfig::from_settings(&settings, password).map_err(map_core_err)?;
    MediaFireClient::connect(cfg).map_err(map_core_err)
}

fn local_file_name(file: &Path) -> Result<String, CliError> {
    file.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CliError::new(
                "config.invalid",
                format!("cannot derive a remote name from {}", file.display()),
            )
        })
}

fn default_config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join(APP_NAME)
}

fn load_settings(config_dir: &Path) -> Result<Settings, CliError> {
    config::load_settings(config_dir).map_err(map_core_err)
}

fn to_json<T: Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string(value).map_err(|e| CliError::new("output.encode_failed", e.to_string()))
}

fn map_core_err(e: mirrorback_core::Error) -> CliError {
    let code = match &e {
        mirrorback_core::Error::InvalidConfig { .. } => "config.invalid",
        mirrorback_core::Error::Io(_) => "io.failed",
        mirrorback_core::Error::Auth { .. } => "auth.failed",
        mirrorback_core::Error::UploadRejected { .. } => "upload.rejected",
        mirrorback_core::Error::TransferFailed { .. } => "transfer.failed",
        mirrorback_core::Error::Api { .. } => "api.unavailable",
    };
    let message = match &e {
        mirrorback_core::Error::InvalidConfig { message }
        | mirrorback_core::Error::Auth { message }
        | mirrorback_core::Error::UploadRejected { message }
        | mirrorback_core::Error::TransferFailed { message }
        | mirrorback_core::Error::Api { message } => message.clone(),
        mirrorback_core::Error::Io(io) => io.to_string(),
    };
    if e.is_retryable() {
        CliError::retryable(code, message)
    } else {
        CliError::new(code, message)
    }
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e).unwrap_or_else(|_| "{\"code\":\"unknown\",\"message\":\"json encode failed\",\"details\":{},\"retryable\":false}".to_string());
    let _ = writeln!(std::io::stderr(), "{json}");
}
