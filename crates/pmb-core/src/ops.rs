//! Request/acknowledge round trips used by the commands
//!
//! Each operation sends one message and waits for the reply whose `origin`
//! is this connection's id. Other traffic arriving meanwhile is discarded.

use std::time::Duration;

use tracing::debug;

use crate::connection::Connection;
use crate::error::{BusError, BusResult};
use crate::identity::generate_random_id;
use crate::message::Message;

pub const COPY_TIMEOUT: Duration = Duration::from_secs(5);
pub const OPEN_URL_TIMEOUT: Duration = Duration::from_secs(5);
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Sender name carried by triggers fired from a finished command
pub const TRIGGER_FROM: &str = "run";

/// A notification to show on the active introducer's desktop
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub message: String,
    pub url: String,
    pub level: f64,
}

fn replied_to(message: &Message, id: &str) -> bool {
    message.origin() == Some(id)
}

/// Ask the introducer to copy `data` to its clipboard
pub async fn remote_copy(conn: &mut Connection, data: &str) -> BusResult<()> {
    conn.send(&Message::CopyData { data: data.to_string() }).await?;
    let id = conn.id().to_string();
    conn.wait_for(COPY_TIMEOUT, "DataCopied", |m| {
        matches!(m, Message::DataCopied { .. }) && replied_to(m, &id)
    })
    .await?;
    debug!(%id, "Data copied");
    Ok(())
}

/// Ask the introducer to open `url`
pub async fn open_url(conn: &mut Connection, url: &str) -> BusResult<()> {
    conn.send(&Message::OpenUrl { data: url.to_string() }).await?;
    let id = conn.id().to_string();
    conn.wait_for(OPEN_URL_TIMEOUT, "URLOpened", |m| {
        matches!(m, Message::UrlOpened { .. }) && replied_to(m, &id)
    })
    .await?;
    Ok(())
}

/// Display a notification; returns the generated notification id
pub async fn send_notification(conn: &mut Connection, note: &Notification) -> BusResult<String> {
    let notification_id = generate_random_id("notify");
    conn.send(&Message::Notification {
        notification_id: notification_id.clone(),
        message: note.message.clone(),
        level: note.level,
        url: note.url.clone(),
    })
    .await?;

    let id = conn.id().to_string();
    conn.wait_for(NOTIFY_TIMEOUT, "NotificationDisplayed", |m| {
        matches!(m, Message::NotificationDisplayed { .. }) && replied_to(m, &id)
    })
    .await?;
    Ok(notification_id)
}

/// Fire a named trigger and wait until it is on the wire
pub async fn send_trigger(conn: &Connection, trigger: &str, success: bool) -> BusResult<()> {
    conn.send_and_flush(&Message::Trigger {
        trigger: trigger.to_string(),
        from: TRIGGER_FROM.to_string(),
        success,
    })
    .await
}

/// Put one line of a named stream on a sub-channel and wait until it is on
/// the wire
pub async fn send_stream_line(conn: &Connection, identifier: &str, data: &str) -> BusResult<()> {
    conn.send_and_flush(&Message::Stream {
        identifier: identifier.to_string(),
        data: data.to_string(),
    })
    .await
}

/// Next streamed line as `(identifier, data)`; other traffic is skipped
pub async fn next_stream_line(conn: &mut Connection) -> BusResult<(String, String)> {
    match conn.wait_until(|m| matches!(m, Message::Stream { .. })).await? {
        Message::Stream { identifier, data } => Ok((identifier, data)),
        _ => Err(BusError::Closed),
    }
}

/// Block until a trigger named `trigger` arrives; returns its success flag
pub async fn wait_for_trigger(conn: &mut Connection, trigger: &str) -> BusResult<bool> {
    let message = conn
        .wait_until(|m| {
            matches!(m, Message::Trigger { trigger: name, from, .. }
                if name == trigger && from == TRIGGER_FROM)
        })
        .await?;

    match message {
        Message::Trigger { success, .. } => Ok(success),
        _ => Ok(false),
    }
}
