/// Interactive terminal chat client
use crate::config::Config;
use crate::error::ChatError;
use crate::session::Session;
use crate::sync::Synchronizer;
use crate::types::{ChatEvent, ChatMessage, Delivery, Role};
use colored::*;
use std::collections::HashSet;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

pub async fn run(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    let session = Session::open(&config.data_dir)?;

    if let Some(user_id) = &config.seed_user_id {
        session
            .set_user_id(user_id)
            .map_err(|e| anyhow::anyhow!("Failed to store user id: {}", e))?;
    }

    let sync = Synchronizer::new(config, session)
        .map_err(|e| anyhow::anyhow!("Failed to start chat client: {}", e))?;

    print_banner();

    let printer = spawn_event_printer(&sync);
    let poller = sync.start();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => {
                print_history(&sync.snapshot().await);
            }
            "/retry" => {
                let failed_key = sync
                    .snapshot()
                    .await
                    .iter()
                    .rev()
                    .find(|m| m.delivery == Delivery::Failed)
                    .map(|m| m.client_key.clone());
                match failed_key {
                    Some(key) => {
                        if let Err(e) = sync.resend(&key).await {
                            eprintln!("{} {}", "✗".red().bold(), e.to_string().red());
                        }
                    }
                    None => println!("{}", "Nothing to retry".yellow()),
                }
            }
            "/logout" => {
                sync.logout().await;
                println!("{}", "Logged out; session cleared".yellow());
            }
            command if command.starts_with('/') => {
                eprintln!("{} Unknown command: {}", "✗".red().bold(), command.red());
                print_usage();
            }
            text => {
                println!("{} {}", "you ▸".cyan().bold(), text);
                match sync.send(text).await {
                    Ok(_) => {}
                    Err(ChatError::InvalidMessage(_)) => {}
                    Err(e) => eprintln!("{} {}", "✗".red().bold(), e.to_string().red()),
                }
            }
        }
    }

    sync.stop().await;
    let _ = poller.await;
    printer.abort();

    Ok(())
}

/// Prints incoming messages and delivery transitions as they happen.
fn spawn_event_printer(sync: &Synchronizer) -> tokio::task::JoinHandle<()> {
    let mut events = sync.subscribe();
    let sync = sync.clone();

    tokio::spawn(async move {
        // Server ids already rendered; own sends are echoed by the
        // input loop and registered here on confirmation.
        let mut printed: HashSet<String> = HashSet::new();
        let mut initial_sync_done = false;

        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event printer lagged {} events", n);
                    continue;
                }
                Err(_) => break,
            };
            match event {
                ChatEvent::Synced { .. } => {
                    let snapshot = sync.snapshot().await;
                    for message in &snapshot {
                        let Some(id) = &message.id else { continue };
                        if printed.contains(id) {
                            continue;
                        }
                        // After the initial history dump only the
                        // counterpart's messages are new to the screen.
                        if initial_sync_done && message.role == Role::User {
                            printed.insert(id.clone());
                            continue;
                        }
                        print_message(message);
                        printed.insert(id.clone());
                    }
                    initial_sync_done = true;
                }
                ChatEvent::ConversationEstablished { conversation_id } => {
                    println!(
                        "{}",
                        format!("(conversation {})", conversation_id).dimmed()
                    );
                }
                ChatEvent::MessageConfirmed { message_id, .. } => {
                    printed.insert(message_id);
                    println!("{}", "✓ delivered".dimmed());
                }
                ChatEvent::MessageFailed { reason, .. } => {
                    eprintln!(
                        "{} Not delivered: {} {}",
                        "✗".red().bold(),
                        reason.red(),
                        "(/retry to resend)".dimmed()
                    );
                }
                ChatEvent::MessagePending { .. } => {}
            }
        }
    })
}

fn print_banner() {
    println!("{}", "⚡ SupportLink Chat".bright_cyan().bold());
    println!("{}", "Type a message and press Enter to send.".dimmed());
    print_usage();
    println!("{}", "─".repeat(60).dimmed());
}

fn print_usage() {
    println!(
        "  {}   reprint the conversation",
        "/history".cyan()
    );
    println!("  {}     resend the last failed message", "/retry".cyan());
    println!("  {}    clear the stored session", "/logout".cyan());
    println!("  {}      exit", "/quit".cyan());
}

fn print_history(messages: &[ChatMessage]) {
    if messages.is_empty() {
        println!("{}", "No messages yet".yellow());
        return;
    }
    println!("{}", "─".repeat(60).dimmed());
    for message in messages {
        print_message(message);
    }
    println!("{}", "─".repeat(60).dimmed());
}

fn print_message(message: &ChatMessage) {
    let prefix = match message.role {
        Role::User => "you ▸".cyan().bold(),
        Role::Admin => "agent ▸".green().bold(),
    };
    let marker = match message.delivery {
        Delivery::Pending => " …".dimmed(),
        Delivery::Confirmed => "".normal(),
        Delivery::Failed => " ✗".red(),
    };
    println!(
        "{} {}{} {}",
        prefix,
        message.text,
        marker,
        message
            .created_at
            .format("%H:%M")
            .to_string()
            .dimmed()
    );
}
