//! collab-session - headless client for a collaborative coding session
//!
//! Joins a session on the real-time server and drives it from stdin:
//! - plain text is sent as chat
//! - `:code <text>` replaces the shared buffer
//! - `:cursor <line> <col>` moves the local cursor
//! - `:run` sends the buffer to the execution service
//! - `:who` lists participants and who is typing
//! - `:quit` leaves the session

use anyhow::Context;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use collab_session::execution::{CodeExecutor, ExecutionRequest, HttpExecutor};
use collab_session::sync::protocol::{CursorPosition, ParticipantInfo};
use collab_session::{ClientConfig, CollabSession, SessionEvent, WebSocketTransport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "collab_session=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = ClientConfig::from_env().context("Failed to read configuration")?;
    let user_id = config
        .user_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let local = ParticipantInfo::new(user_id.clone(), config.display_name.clone());

    let url = config.connect_url(&user_id)?;
    info!("Connecting to {} as {}", config.server_url, local.username);
    let transport = WebSocketTransport::connect(url, config.transport());
    if let Err(e) = transport.wait_connected(CONNECT_TIMEOUT).await {
        warn!("Server not reachable yet ({}), joining offline", e);
    }

    let executor = HttpExecutor::new(config.execution_url.clone(), config.execution_timeout)?;

    let session = CollabSession::join(
        transport.clone(),
        local,
        config.session_id.clone(),
        config.language.clone(),
        config.session.clone(),
    )?;

    let mut events = session.events();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => print_event(&event),
                Err(e) => warn!("Event stream lagged: {}", e),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };

        let Some(line) = line else { break };
        match handle_line(&session, &executor, &config.language, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => error!("{:#}", e),
        }
    }

    session.leave().await;
    transport.shutdown();
    printer.abort();
    info!("Session closed");

    Ok(())
}

/// Run one stdin command. Returns false when the user asked to quit.
async fn handle_line(
    session: &CollabSession,
    executor: &HttpExecutor,
    language: &str,
    line: &str,
) -> anyhow::Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }

    let (command, rest) = match line.split_once(' ') {
        Some((command, rest)) => (command, rest),
        None => (line, ""),
    };

    match command {
        ":quit" => return Ok(false),
        ":code" => {
            let code = rest.replace("\\n", "\n");
            let offset = code.len();
            session.edit(code, Some(offset))?;
        }
        ":cursor" => {
            let mut parts = rest.split_whitespace().map(str::parse::<u32>);
            match (parts.next(), parts.next()) {
                (Some(Ok(line)), Some(Ok(column))) => {
                    session.move_cursor(CursorPosition::new(line, column))?
                }
                _ => anyhow::bail!("Usage: :cursor <line> <col>"),
            }
        }
        ":run" => {
            let request = ExecutionRequest::new(session.code(), language);
            let output = executor.execute(request).await?;
            println!("--- stdout ({:.1} ms)", output.execution_time_ms);
            print!("{}", output.stdout);
            if output.has_errors() {
                println!("--- stderr");
                print!("{}", output.stderr);
            }
        }
        ":who" => {
            let typing = session.typing_participants();
            for participant in session.participants() {
                let marker = if typing.contains(&participant.id) { " (typing)" } else { "" };
                println!("{} [{}]{}", participant.name, participant.color, marker);
            }
            if session.is_stale() {
                println!("(offline, view may be out of date)");
            }
        }
        _ if command.starts_with(':') => anyhow::bail!("Unknown command: {}", command),
        _ => session.send_chat(line)?,
    }

    Ok(true)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Joined { session_id } => println!("* joined {}", session_id),
        SessionEvent::CodeChanged { author_id, code } => {
            println!("* code from {} ({} bytes)", author_id, code.len())
        }
        SessionEvent::ParticipantJoined(participant) => println!("* {} joined", participant.name),
        SessionEvent::ParticipantLeft { participant_id } => println!("* {} left", participant_id),
        SessionEvent::ChatAppended(message) => {
            println!("<{}> {}", message.author.username, message.text)
        }
        SessionEvent::SnapshotLoaded => println!("* session state loaded"),
        SessionEvent::ConnectionChanged { connected } => {
            println!("* {}", if *connected { "reconnected" } else { "connection lost" })
        }
        SessionEvent::Left { session_id } => println!("* left {}", session_id),
        SessionEvent::CursorMoved { .. }
        | SessionEvent::SelectionChanged { .. }
        | SessionEvent::TypingChanged { .. } => {}
    }
}

