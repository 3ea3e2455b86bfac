//! Interactive console session.
//!
//! The session owns the sing-box child for its lifetime: it runs both background polls,
//! executes line commands from stdin and prints notifications and status transitions
//! through the output writer. Leaving the session cancels the polls and stops the process.

mod commands;

use crate::cli::{spawn_output_writer, OutputLine};
use crate::manager::Manager;
use crate::model::PollSettings;
use crate::notify::{Level, Notification};
use crate::render;
use anyhow::{Context, Result};
use commands::Command;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub(crate) async fn run(
    manager: Arc<Manager>,
    polls: PollSettings,
    mut notes: UnboundedReceiver<Notification>,
) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let _ = out_tx.send(OutputLine::Stdout(
        "singbox-manager console. Type `help` for commands.".into(),
    ));

    let polls = manager.spawn_polls(polls);
    let mut status_rx = manager.subscribe();
    let mut last_label = status_rx.borrow_and_update().label();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let res = loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line.context("failed to read stdin") {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                };
                match commands::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(Command::Quit)) => break Ok(()),
                    Ok(Some(cmd)) => execute(&manager, cmd, &out_tx).await,
                    Err(msg) => {
                        let _ = out_tx.send(OutputLine::Stderr(msg));
                    }
                }
            }
            Some(note) = notes.recv() => {
                let _ = out_tx.send(route(&note));
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let status = *status_rx.borrow_and_update();
                // Commands already announce their own outcome; only report drift and transitions.
                if status.label() != last_label {
                    last_label = status.label();
                    let _ = out_tx.send(OutputLine::Stderr(render::status_line(&status)));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("[console] interrupted");
                break Ok(());
            }
        }
    };

    polls.cancel().await;
    if manager.status().observed.is_running() {
        let _ = out_tx.send(OutputLine::Stderr("Stopping sing-box…".into()));
        let _ = manager.stop().await;
    }
    while let Ok(note) = notes.try_recv() {
        let _ = out_tx.send(route(&note));
    }

    drop(out_tx);
    let _ = out_handle.await;
    res
}

fn route(note: &Notification) -> OutputLine {
    match note.level {
        Level::Success => OutputLine::Stdout(note.to_message()),
        Level::Error => OutputLine::Stderr(note.to_message()),
    }
}

/// Run one command to completion. Outcomes are reported through notifications;
/// only data views are printed here.
async fn execute(manager: &Manager, cmd: Command, out: &UnboundedSender<OutputLine>) {
    let print = |lines: Vec<String>| {
        for line in lines {
            let _ = out.send(OutputLine::Stdout(line));
        }
    };

    match cmd {
        Command::Help => print(commands::HELP.iter().map(|s| s.to_string()).collect()),
        Command::List => {
            if let Ok((profiles, active)) = manager.profiles().await {
                print(render::profile_lines(&profiles, active.as_deref()));
            }
        }
        Command::Add { name, file } => match tokio::fs::read_to_string(&file).await {
            Ok(content) => {
                let _ = manager.add(&name, &content).await;
            }
            Err(e) => {
                let _ = out.send(OutputLine::Stderr(format!(
                    "[error] Add failed: cannot read {}: {e}",
                    file.display()
                )));
            }
        },
        Command::Activate(id) => {
            let _ = manager.activate(id.as_deref()).await;
        }
        Command::Remove(id) => {
            let _ = manager.remove(&id).await;
        }
        Command::Edit(id) => {
            let _ = manager.edit(&id).await;
        }
        Command::Start => {
            let _ = manager.start().await;
        }
        Command::Stop => {
            let _ = manager.stop().await;
        }
        Command::Restart => {
            let _ = manager.restart().await;
        }
        Command::Status => print(vec![render::status_line(&manager.status())]),
        Command::Groups => print(render::group_lines(&manager.groups().await)),
        Command::Select { group, node } => {
            let _ = manager.select(&group, &node).await;
        }
        Command::Delay(group) => print(render::delay_lines(&group, &manager.delay(&group).await)),
        Command::Version => {
            if let Ok(version) = manager.version().await {
                print(vec![format!("sing-box {version}")]);
            }
        }
        Command::Quit => {}
    }
}
