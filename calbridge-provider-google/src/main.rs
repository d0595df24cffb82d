//! calbridge-provider-google - Google Calendar provider for calbridge
//!
//! This binary implements the calbridge provider protocol, communicating
//! with calbridge via JSON over stdin/stdout. Logs go to stderr.
//!
//! The provider manages its own credentials and sessions:
//!   ~/.config/calbridge/providers/google/app_config.toml
//!   ~/.config/calbridge/providers/google/session/{account}.toml

mod api;
mod app_config;
mod commands;
mod google_event;
mod session;

use calbridge_core::ErrorKind;
use calbridge_core::remote::protocol::{Command, Request, Response};
use std::io::{self, BufRead, Write};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                tracing::error!("Failed to read stdin: {}", e);
                break;
            }
        };

        // Skip empty lines
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(request).await,
            Err(e) => Response::error(&format!("Failed to parse request: {}", e), ErrorKind::Fatal),
        };

        if writeln!(stdout, "{}", response)
            .and_then(|_| stdout.flush())
            .is_err()
        {
            break;
        }
    }
}

async fn handle_request(request: Request) -> String {
    tracing::debug!(command = ?request.command, "handling request");

    let result = match request.command {
        Command::ListCalendars => commands::list_calendars::handle(request.params).await,
        Command::ListEvents => commands::list_events::handle(request.params).await,
        Command::InsertEvent => commands::insert_event::handle(request.params).await,
        Command::UpdateEvent => commands::update_event::handle(request.params).await,
        Command::BatchEvents => commands::batch_events::handle(request.params).await,
    };

    match result {
        Ok(data) => Response::success(data),
        Err(e) => {
            let error = commands::backend_error(&e);
            tracing::warn!(kind = ?error.kind, "{}", error.message);
            Response::error(&error.message, error.kind)
        }
    }
}
