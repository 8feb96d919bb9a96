use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use whiteboard::config::{ConfigError, ProvisionConfig, SessionConfig};
use whiteboard::frame::{
    CONNECTED, CREATE_SHAPE, CURSOR_POSITION, ERROR, FRAME_CODE, Frame, SNAPSHOT, UPDATE_SHAPE, USER_ENTERED,
    USER_EXITED,
};
use whiteboard::provision::{ProvisionClient, ProvisionError, SpawnRequest, SpawnResult};
use whiteboard::session::handlers::handler;
use whiteboard::session::{ConnectionCoordinates, SessionError, TransportSession};

/// Event sent after a command to learn when the relay has processed it.
const SYNC_EVENT: &str = "sync";
const UNKNOWN_EVENT_CODE: &str = "E_UNKNOWN_EVENT";
const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("config: {0}; pass --realtime-url and --status-url or set PROVISION_* vars")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("relay rejected frame: {0}")]
    Rejected(String),
    #[error("timed out waiting for relay")]
    Timeout,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "whiteboard-cli", about = "Whiteboard session CLI")]
struct Cli {
    #[arg(long, env = "WHITEBOARD_REALTIME_URL", requires = "status_url")]
    realtime_url: Option<String>,

    #[arg(long, env = "WHITEBOARD_STATUS_URL", requires = "realtime_url")]
    status_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spawn (or look up) a backend and print its spawn result.
    Spawn,
    /// Print every relay event as a JSON line.
    Watch {
        #[arg(long, default_value_t = 0, help = "Stop after this many seconds; 0 runs until interrupted")]
        seconds: u64,
    },
    CreateShape(CreateShapeArgs),
    UpdateShape(UpdateShapeArgs),
    Cursor {
        x: f64,
        y: f64,
    },
}

#[derive(Args, Debug)]
struct CreateShapeArgs {
    #[arg(long, help = "Shape id; random if omitted")]
    id: Option<String>,
    #[arg(long, default_value_t = 0.0)]
    x: f64,
    #[arg(long, default_value_t = 0.0)]
    y: f64,
    #[arg(long, default_value_t = 100.0)]
    w: f64,
    #[arg(long, default_value_t = 100.0)]
    h: f64,
    #[arg(long, default_value = "#FFEB3B")]
    color: String,
}

#[derive(Args, Debug)]
struct UpdateShapeArgs {
    id: String,
    #[arg(long)]
    x: f64,
    #[arg(long)]
    y: f64,
    #[arg(long)]
    w: f64,
    #[arg(long)]
    h: f64,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let explicit = match (cli.realtime_url, cli.status_url) {
        (Some(realtime_url), Some(status_url)) => Some(ConnectionCoordinates { realtime_url, status_url }),
        _ => None,
    };

    match cli.command {
        Command::Spawn => {
            let spawned = spawn_backend().await?;
            print_json(&serde_json::to_value(&spawned)?)
        }
        Command::Watch { seconds } => run_watch(resolve(explicit).await?, seconds).await,
        Command::CreateShape(args) => {
            let shape = json!({
                "id": args.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                "x": args.x,
                "y": args.y,
                "w": args.w,
                "h": args.h,
                "color": args.color,
            });
            run_command(resolve(explicit).await?, CREATE_SHAPE, shape).await
        }
        Command::UpdateShape(args) => {
            let geometry = json!({ "id": args.id, "x": args.x, "y": args.y, "w": args.w, "h": args.h });
            run_command(resolve(explicit).await?, UPDATE_SHAPE, geometry).await
        }
        Command::Cursor { x, y } => run_command(resolve(explicit).await?, CURSOR_POSITION, json!({ "x": x, "y": y })).await,
    }
}

// =============================================================================
// COORDINATES
// =============================================================================

async fn resolve(explicit: Option<ConnectionCoordinates>) -> Result<ConnectionCoordinates, CliError> {
    match explicit {
        Some(coordinates) => Ok(coordinates),
        None => Ok(spawn_backend().await?.coordinates()),
    }
}

async fn spawn_backend() -> Result<SpawnResult, CliError> {
    let config = ProvisionConfig::from_env()?;
    let client = ProvisionClient::from_config(&config)?;
    let spawned = client.spawn(&SpawnRequest::from_config(&config)).await?;
    eprintln!("backend: {} (spawned: {})", spawned.name, spawned.spawned);
    Ok(spawned)
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn run_watch(coordinates: ConnectionCoordinates, seconds: u64) -> Result<(), CliError> {
    let session = TransportSession::connect(coordinates, &SessionConfig::from_env())?;
    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    for event in [CONNECTED, SNAPSHOT, USER_ENTERED, USER_EXITED, CURSOR_POSITION, UPDATE_SHAPE, ERROR] {
        let tx = tx.clone();
        session.on(
            event,
            handler(move |args| {
                let _ = tx.send(Frame::new(event, args.to_vec()));
            }),
        );
    }
    drop(tx);

    session.ready().await?;
    eprintln!("connected as {}", session.participant_id().unwrap_or_default());

    let deadline = async {
        if seconds == 0 {
            let _ = tokio::signal::ctrl_c().await;
        } else {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                println!("{}", frame.to_text()?);
            }
        }
    }

    session.destroy();
    Ok(())
}

/// Send one frame, then wait until the relay has processed it.
///
/// The relay answers an unknown event with an error to the sender only, in
/// order, so the `sync` error marks everything before it as handled.
async fn run_command(coordinates: ConnectionCoordinates, event: &str, payload: Value) -> Result<(), CliError> {
    let session = TransportSession::connect(coordinates, &SessionConfig::from_env())?;
    let (tx, mut errors) = mpsc::unbounded_channel::<Value>();
    session.on(
        ERROR,
        handler(move |args| {
            let _ = tx.send(args.first().cloned().unwrap_or(Value::Null));
        }),
    );
    session.send(event, vec![payload])?;
    session.send(SYNC_EVENT, Vec::new())?;
    session.ready().await?;

    let result = match tokio::time::timeout(SYNC_TIMEOUT, errors.recv()).await {
        Err(_) => Err(CliError::Timeout),
        Ok(None) => Err(CliError::Session(SessionError::Closed)),
        Ok(Some(error)) if error.get(FRAME_CODE).and_then(Value::as_str) == Some(UNKNOWN_EVENT_CODE) => Ok(()),
        Ok(Some(error)) => Err(CliError::Rejected(error.to_string())),
    };

    session.destroy();
    result?;
    println!("ok");
    Ok(())
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
