//! `pmb run`: execute a local command and report how it went

use std::process::ExitStatus;
use std::time::Duration;

use anyhow::{bail, Result};
use pmb_core::ops::{self, Notification};
use pmb_core::Connection;
use tracing::{debug, info, warn};

/// How often a blocked `--wait-trigger` reminds the user it is still waiting
const WAIT_REMINDER: Duration = Duration::from_secs(600);

/// Level of the bookkeeping notifications around triggers
const TRIGGER_NOTE_LEVEL: f64 = 3.0;

pub struct RunOptions {
    pub message: Option<String>,
    pub send_trigger: Option<String>,
    pub wait_trigger: Option<String>,
    pub trigger_always: bool,
    pub level: f64,
}

/// Final notification text for a finished command
pub fn completion_message(command: &str, message: Option<&str>, result: &str) -> String {
    match message.filter(|m| !m.is_empty()) {
        Some(message) => format!("{}. Command completed {}.", message, result),
        None => format!("Command [{}] completed {}.", command, result),
    }
}

fn describe_outcome(outcome: &std::io::Result<ExitStatus>) -> (bool, String) {
    match outcome {
        Ok(status) if status.success() => (true, "successfully".to_string()),
        Ok(status) => (false, format!("with error '{}'", status)),
        Err(e) => (false, format!("with error '{}'", e)),
    }
}

/// Notification whose delivery is not worth failing the command over
async fn note(conn: &mut Connection, message: String) {
    let note = Notification {
        message,
        url: String::new(),
        level: TRIGGER_NOTE_LEVEL,
    };
    if let Err(e) = ops::send_notification(conn, &note).await {
        debug!(error = %e, "Trigger notification not acknowledged");
    }
}

async fn wait_for_trigger(conn: &mut Connection, name: &str) -> Result<bool> {
    info!(trigger = %name, "Waiting for trigger before starting...");
    let wait = ops::wait_for_trigger(conn, name);
    tokio::pin!(wait);
    loop {
        tokio::select! {
            success = &mut wait => return Ok(success?),
            _ = tokio::time::sleep(WAIT_REMINDER) => {
                warn!(trigger = %name, "Still waiting for trigger...");
            }
        }
    }
}

pub async fn run(conn: &mut Connection, options: &RunOptions, command: &[String]) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("A command is required");
    };

    if let Some(name) = &options.wait_trigger {
        let previous_ok = wait_for_trigger(conn, name).await?;
        info!(trigger = %name, "Trigger received");
        note(conn, format!("Received trigger {}", name)).await;

        if !options.trigger_always && !previous_ok {
            bail!("Previous command failed, not running.");
        }
    }

    let command_line = command.join(" ");
    info!(command = %command_line, "Waiting for command to finish...");
    let outcome = tokio::process::Command::new(program).args(args).status().await;
    let (success, result) = describe_outcome(&outcome);
    info!(success, "Process complete");

    let notification = Notification {
        message: completion_message(&command_line, options.message.as_deref(), &result),
        url: String::new(),
        level: options.level,
    };
    let notified = ops::send_notification(conn, &notification).await;

    if let Some(name) = &options.send_trigger {
        info!(trigger = %name, "Sending trigger");
        note(conn, format!("Sending trigger {}", name)).await;
        ops::send_trigger(conn, name, success).await?;
    }

    notified?;
    Ok(())
}
