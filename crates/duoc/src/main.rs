#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use duo_common::{AuthAction, Frame};
use duoc::config::Args;
use duoc::tls::load_connector;
use duoc::{Client, ClientError};
use std::io::{BufRead, Write};
use tokio::sync::mpsc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let connector = load_connector(&args.cert)
        .with_context(|| format!("loading trusted certificate {}", args.cert.display()))?;

    let mut client = match Client::connect(&args.host, args.port, &connector).await {
        Ok(client) => {
            println!("Now connected to chat server@ port {}", args.port);
            client
        }
        Err(ClientError::Rejected) => {
            println!("The chat server is full, try again later");
            return Ok(());
        }
        Err(e) => {
            anyhow::bail!("failed to connect to chat server @ port {}: {e}", args.port);
        }
    };

    let mut input = spawn_stdin_reader();
    tokio::select! {
        result = run(&mut client, &mut input) => result?,
        _ = tokio::signal::ctrl_c() => println!("\nShutting down client..."),
    }
    let _ = client.close().await;
    Ok(())
}

/// Read stdin on a plain thread so an idle read never holds the runtime open.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn run(client: &mut Client, input: &mut mpsc::Receiver<String>) -> Result<()> {
    let Some(name) = authenticate(client, input).await? else {
        return Ok(());
    };
    chat(client, input, &name).await
}

/// Print `text` without a newline and wait for the next trimmed line.
async fn prompt(input: &mut mpsc::Receiver<String>, text: &str) -> Option<String> {
    print!("{text}");
    let _ = std::io::stdout().flush();
    input.recv().await.map(|line| line.trim().to_string())
}

/// Loop on register/login until logged in. `None` if stdin closes first.
async fn authenticate(
    client: &mut Client,
    input: &mut mpsc::Receiver<String>,
) -> Result<Option<String>> {
    loop {
        let Some(answer) = prompt(
            input,
            "Do you want to register or log in? (Type register or login) > ",
        )
        .await
        else {
            return Ok(None);
        };
        let Ok(action) = answer.parse::<AuthAction>() else {
            println!("Enter register or login");
            continue;
        };
        let Some(username) = prompt(input, "Type your username > ").await else {
            return Ok(None);
        };
        let Some(password) = prompt(input, "Type your password > ").await else {
            return Ok(None);
        };

        match action {
            AuthAction::Register => {
                if client.register(&username, &password).await? {
                    println!("Successfully registered");
                } else {
                    println!("Username already exists");
                }
            }
            AuthAction::Login => {
                if client.login(&username, &password).await? {
                    println!("Successfully logged in");
                    return Ok(Some(username));
                }
                println!("Incorrect details");
            }
        }
    }
}

async fn chat(client: &mut Client, input: &mut mpsc::Receiver<String>, name: &str) -> Result<()> {
    let me = format!("{name} (Me)> ");
    loop {
        print!("{me}");
        let _ = std::io::stdout().flush();

        tokio::select! {
            frame = client.recv() => match frame {
                Ok(Some(Frame::Text(line))) => {
                    // Overwrite the pending prompt.
                    print!("\r{}\r", " ".repeat(me.len()));
                    println!("{line}");
                }
                Ok(Some(Frame::Int(n))) => debug!(value = n, "ignoring int frame"),
                Ok(None) => {
                    println!("\nServer closed the connection.");
                    return Ok(());
                }
                Err(e) => {
                    debug!(error = %e, "receive failed");
                    println!("\nServer closed the connection.");
                    return Ok(());
                }
            },
            line = input.recv() => match line {
                Some(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        client.send_text(line).await?;
                    }
                }
                None => return Ok(()),
            },
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
