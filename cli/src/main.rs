//! webrcon CLI: talk to a game server's WebSocket RCON from the terminal.
//!
//! Usage:
//! ```bash
//! # Run a command and print the reply
//! webrcon exec --address 127.0.0.1:28016 --password hunter2 status
//!
//! # Fire-and-forget
//! webrcon send --address 127.0.0.1:28016 --password hunter2 say hello
//!
//! # Collect every reply to a command for two seconds
//! webrcon stream --address 127.0.0.1:28016 --password hunter2 --window-ms 2000 playerlist
//!
//! # Follow server broadcasts until Ctrl-C
//! webrcon tail --address 127.0.0.1:28016 --password hunter2
//! ```
//!
//! `WEBRCON_ADDRESS` and `WEBRCON_PASSWORD` are used when the flags are absent.
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use std::env;
use std::process;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tracing_subscriber::EnvFilter;

use webrcon_core::{ClientConfig, CommandResponse, ConnectionEvent, ServerEndpoint};
use webrcon_ws::RconClient;

/// Flags that take a value; everything else that is not a switch is part of
/// the command text.
const VALUE_FLAGS: &[&str] = &["--address", "--password", "--timeout-ms", "--window-ms"];
const SWITCHES: &[&str] = &["--secure", "--json"];

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "exec" => cmd_exec(&args[2..]).await,
        "send" => cmd_send(&args[2..]).await,
        "stream" => cmd_stream(&args[2..]).await,
        "tail" => cmd_tail(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("webrcon {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("webrcon {}", env!("CARGO_PKG_VERSION"));
    println!("Run commands against a game server's WebSocket RCON\n");
    println!("USAGE:");
    println!("    webrcon <COMMAND> [FLAGS] [RCON COMMAND...]\n");
    println!("COMMANDS:");
    println!("    exec       Run a command and print its reply");
    println!("    send       Run a command without waiting for a reply");
    println!("    stream     Print every reply to a command within a time window");
    println!("    tail       Print server broadcasts until interrupted");
    println!("    version    Print version");
    println!("    help       Print this help\n");
    println!("FLAGS:");
    println!("    --address <HOST:PORT>  RCON address  [env: WEBRCON_ADDRESS]");
    println!("    --password <PASSWORD>  RCON password [env: WEBRCON_PASSWORD]");
    println!("    --secure               Connect with wss://");
    println!("    --timeout-ms <MS>      Reply timeout for exec (default 6000)");
    println!("    --window-ms <MS>       Reply window for stream (default 5000)");
    println!("    --json                 Print frames and connection events as JSON");
}

async fn connect(args: &[String]) -> Result<RconClient> {
    let address = parse_flag(args, "--address")
        .or_else(|| env::var("WEBRCON_ADDRESS").ok())
        .ok_or_else(|| anyhow!("--address is required"))?;
    let password = parse_flag(args, "--password")
        .or_else(|| env::var("WEBRCON_PASSWORD").ok())
        .ok_or_else(|| anyhow!("--password is required"))?;
    let endpoint = ServerEndpoint::new(address, password, has_switch(args, "--secure"));

    let mut config = ClientConfig::default();
    if let Some(ms) = parse_flag(args, "--timeout-ms") {
        config.response_timeout_ms = ms.parse().context("--timeout-ms must be a number")?;
    }
    if let Some(ms) = parse_flag(args, "--window-ms") {
        config.stream_timeout_ms = ms.parse().context("--window-ms must be a number")?;
    }

    let client = RconClient::new(&endpoint, config)?;
    client
        .connect()
        .await
        .with_context(|| format!("connecting to {}", endpoint.address))?;
    Ok(client)
}

async fn cmd_exec(args: &[String]) -> Result<()> {
    let command = command_text(args)?;
    let client = connect(args).await?;
    let reply = client.send_command_get_response(&command).await?;
    print_reply(&reply, has_switch(args, "--json"));
    client.disconnect();
    Ok(())
}

async fn cmd_send(args: &[String]) -> Result<()> {
    let command = command_text(args)?;
    let client = connect(args).await?;
    if !client.send_command(&command) {
        bail!("failed to send command");
    }
    // Give the socket task a moment to flush before closing.
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.disconnect();
    Ok(())
}

async fn cmd_stream(args: &[String]) -> Result<()> {
    let command = command_text(args)?;
    let json = has_switch(args, "--json");
    let client = connect(args).await?;
    let window = ClientConfig {
        stream_timeout_ms: match parse_flag(args, "--window-ms") {
            Some(ms) => ms.parse().context("--window-ms must be a number")?,
            None => ClientConfig::default().stream_timeout_ms,
        },
        ..Default::default()
    }
    .stream_timeout();

    let mut replies = client.stream_command(&command, window);
    let mut count = 0usize;
    while let Some(reply) = replies.recv().await {
        print_reply(&reply, json);
        count += 1;
    }
    tracing::info!(count, "reply window closed");
    client.disconnect();
    Ok(())
}

async fn cmd_tail(args: &[String]) -> Result<()> {
    let json = has_switch(args, "--json");
    let client = connect(args).await?;
    let mut events = client.connection_events();

    client.subscribe_on_message_general("cli", move |m: &CommandResponse| print_reply(m, json));
    client.subscribe_on_message_player_related("cli", move |m: &CommandResponse| {
        print_reply(m, json)
    });
    client.subscribe_on_message_command("cli", move |m: &CommandResponse| print_reply(m, json));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ConnectionEvent::ReconnectExhausted { attempts }) => {
                    client.disconnect();
                    bail!("connection lost; gave up after {attempts} reconnect attempts");
                }
                Ok(event) if json => {
                    println!("{}", serde_json::to_string(&event).unwrap_or_default());
                }
                Ok(event) => tracing::debug!(?event, "connection event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "missed connection events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    client.disconnect();
    Ok(())
}

fn print_reply(reply: &CommandResponse, json: bool) {
    if json {
        println!("{}", serde_json::to_string(reply).unwrap_or_default());
    } else {
        println!("[{}] {}", reply.kind, reply.message);
    }
}

fn command_text(args: &[String]) -> Result<String> {
    let mut words = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        if VALUE_FLAGS.contains(&arg) {
            i += 2;
            continue;
        }
        if !SWITCHES.contains(&arg) {
            words.push(arg);
        }
        i += 1;
    }
    if words.is_empty() {
        bail!("an RCON command is required");
    }
    Ok(words.join(" "))
}

fn parse_flag(args: &[String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

fn has_switch(args: &[String], switch: &str) -> bool {
    args.iter().any(|a| a == switch)
}
