//! Line-oriented TCP transport.
//!
//! The executor itself only sees channels; this module bridges them to a
//! plain text socket so operator stations and motion controllers can attach
//! with nothing fancier than a TCP client.
//!
//! Inbound lines:
//! - `piloting_mode <value>`: piloting-mode channel
//! - `heartbeat k=v ...`: a `piloting_mode=` entry is authoritative
//! - `nav <lat> <lon> <heading>`: odometry feed
//! - `backend_ready <backend>` / `backend_done <backend> [succeeded|aborted]`:
//!   the motion-controller side of the action contract
//! - anything else: command channel (grammar in `helm-core`)
//!
//! Outbound lines are JSON objects tagged with `type`: `heartbeat`, `viz`,
//! `endofline`, `goal`, and `cancel`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};

use crate::actions::{GoalStatus, ServerGoal};
use crate::backends::{
    BackendServers, HoverFeedback, HoverGoal, PathFeedback, PathGoal, SurveyAreaGoal,
    SurveyFeedback,
};
use crate::nav::NavFix;
use crate::status::{EndOfLine, Heartbeat, VizItem};

/// Executor-bound channel ends, one clone per connection.
#[derive(Clone)]
pub struct Inbound {
    pub command_tx: mpsc::Sender<String>,
    pub mode_tx: mpsc::Sender<String>,
    pub nav_tx: Arc<watch::Sender<Option<NavFix>>>,
    pub backend_tx: mpsc::Sender<BackendEvent>,
}

/// Motion-controller traffic parsed off the wire.
#[derive(Debug, Clone)]
pub enum BackendEvent {
    Ready { backend: String },
    Done { backend: String, status: GoalStatus },
}

/// Merge the publisher streams into one outbound line stream.
pub async fn pump_outbound(
    mut heartbeat: broadcast::Receiver<Heartbeat>,
    mut viz: broadcast::Receiver<VizItem>,
    mut endofline: broadcast::Receiver<EndOfLine>,
    outbound: broadcast::Sender<String>,
) {
    use broadcast::error::RecvError;
    loop {
        let message = tokio::select! {
            received = heartbeat.recv() => match received {
                Ok(hb) => serde_json::json!({"type": "heartbeat", "heartbeat": hb}),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            received = viz.recv() => match received {
                Ok(item) => serde_json::json!({"type": "viz", "item": item}),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            received = endofline.recv() => match received {
                Ok(boundary) => {
                    serde_json::json!({"type": "endofline", "boundary": boundary.to_string()})
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        };
        let _ = outbound.send(message.to_string());
    }
}

/// Forward backend goals to connected controllers and feed their ready/done
/// lines back into the action servers.
pub async fn run_backend_bridge(
    mut servers: BackendServers,
    outbound: broadcast::Sender<String>,
    mut events: mpsc::Receiver<BackendEvent>,
) {
    let mut follower_goal: Option<ServerGoal<PathGoal, PathFeedback>> = None;
    let mut planner_goal: Option<ServerGoal<PathGoal, PathFeedback>> = None;
    let mut hover_goal: Option<ServerGoal<HoverGoal, HoverFeedback>> = None;
    let mut survey_goal: Option<ServerGoal<SurveyAreaGoal, SurveyFeedback>> = None;
    let mut cancel_poll = tokio::time::interval(Duration::from_millis(100));

    loop {
        tokio::select! {
            Some(goal) = servers.path_follower.recv() => {
                announce_goal(&outbound, "path_follower", &goal.goal);
                follower_goal = Some(goal);
            }
            Some(goal) = servers.path_planner.recv() => {
                announce_goal(&outbound, "path_planner", &goal.goal);
                planner_goal = Some(goal);
            }
            Some(goal) = servers.hover.recv() => {
                announce_goal(&outbound, "hover", &goal.goal);
                hover_goal = Some(goal);
            }
            Some(goal) = servers.survey_area.recv() => {
                announce_goal(&outbound, "survey_area", &goal.goal);
                survey_goal = Some(goal);
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    BackendEvent::Ready { backend } => match backend.as_str() {
                        "path_follower" => servers.path_follower.advertise(),
                        "path_planner" => servers.path_planner.advertise(),
                        "hover" => servers.hover.advertise(),
                        "survey_area" => servers.survey_area.advertise(),
                        other => tracing::warn!("Ready line for unknown backend `{}`", other),
                    },
                    BackendEvent::Done { backend, status } => {
                        let finished = match backend.as_str() {
                            "path_follower" => finish_goal(&mut follower_goal, status),
                            "path_planner" => finish_goal(&mut planner_goal, status),
                            "hover" => finish_goal(&mut hover_goal, status),
                            "survey_area" => finish_goal(&mut survey_goal, status),
                            other => {
                                tracing::warn!("Done line for unknown backend `{}`", other);
                                true
                            }
                        };
                        if !finished {
                            tracing::warn!("Done line for `{}` with no active goal", backend);
                        }
                    }
                }
            }
            _ = cancel_poll.tick() => {
                forward_cancel(&outbound, "path_follower", &mut follower_goal);
                forward_cancel(&outbound, "path_planner", &mut planner_goal);
                forward_cancel(&outbound, "hover", &mut hover_goal);
                forward_cancel(&outbound, "survey_area", &mut survey_goal);
            }
            else => break,
        }
    }
}

fn announce_goal<G: Serialize>(outbound: &broadcast::Sender<String>, backend: &str, goal: &G) {
    match serde_json::to_value(goal) {
        Ok(goal) => {
            let _ = outbound
                .send(serde_json::json!({"type": "goal", "backend": backend, "goal": goal}).to_string());
        }
        Err(err) => tracing::error!("Cannot serialize {} goal: {}", backend, err),
    }
}

fn finish_goal<G, F>(slot: &mut Option<ServerGoal<G, F>>, status: GoalStatus) -> bool {
    match slot.take() {
        Some(goal) => {
            match status {
                GoalStatus::Succeeded => goal.succeed(),
                GoalStatus::Aborted => goal.abort(),
            }
            true
        }
        None => false,
    }
}

fn forward_cancel<G, F>(
    outbound: &broadcast::Sender<String>,
    backend: &str,
    slot: &mut Option<ServerGoal<G, F>>,
) {
    if slot.as_ref().is_some_and(|goal| goal.is_cancelled()) {
        slot.take();
        let _ = outbound.send(serde_json::json!({"type": "cancel", "backend": backend}).to_string());
    }
}

/// Accept loop for the line transport.
pub async fn serve(listener: TcpListener, inbound: Inbound, outbound: broadcast::Sender<String>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::info!("Transport client connected from {}", peer);
                let inbound = inbound.clone();
                let outbound_rx = outbound.subscribe();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, inbound, outbound_rx).await {
                        tracing::debug!("Transport client dropped: {}", err);
                    }
                });
            }
            Err(err) => {
                tracing::warn!("Transport accept failed: {}", err);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    inbound: Inbound,
    mut outbound: broadcast::Receiver<String>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => dispatch_line(&line, &inbound).await,
                    None => break,
                }
            }
            message = outbound.recv() => {
                match message {
                    Ok(mut message) => {
                        message.push('\n');
                        writer.write_all(message.as_bytes()).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Transport client lagged; skipped {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
    Ok(())
}

async fn dispatch_line(line: &str, inbound: &Inbound) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    let (head, rest) = line
        .split_once(char::is_whitespace)
        .map(|(head, rest)| (head, rest.trim()))
        .unwrap_or((line, ""));
    match head {
        "piloting_mode" => {
            let _ = inbound.mode_tx.send(rest.to_string()).await;
        }
        "heartbeat" => {
            for entry in rest.split_whitespace() {
                if let Some(mode) = entry.strip_prefix("piloting_mode=") {
                    let _ = inbound.mode_tx.send(mode.to_string()).await;
                }
            }
        }
        "nav" => match parse_nav(rest) {
            Some(fix) => {
                let _ = inbound.nav_tx.send(Some(fix));
            }
            None => tracing::error!("Malformed nav line `{}`", line),
        },
        "backend_ready" => {
            if rest.is_empty() {
                tracing::error!("Malformed backend_ready line `{}`", line);
            } else {
                let _ = inbound
                    .backend_tx
                    .send(BackendEvent::Ready {
                        backend: rest.to_string(),
                    })
                    .await;
            }
        }
        "backend_done" => {
            let mut parts = rest.split_whitespace();
            match parts.next() {
                Some(backend) => {
                    let status = match parts.next() {
                        Some("aborted") => GoalStatus::Aborted,
                        _ => GoalStatus::Succeeded,
                    };
                    let _ = inbound
                        .backend_tx
                        .send(BackendEvent::Done {
                            backend: backend.to_string(),
                            status,
                        })
                        .await;
                }
                None => tracing::error!("Malformed backend_done line `{}`", line),
            }
        }
        _ => {
            let _ = inbound.command_tx.send(line.to_string()).await;
        }
    }
}

fn parse_nav(rest: &str) -> Option<NavFix> {
    let mut parts = rest.split_whitespace();
    let lat_deg: f64 = parts.next()?.parse().ok()?;
    let lon_deg: f64 = parts.next()?.parse().ok()?;
    let heading_deg: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(NavFix {
        lat_deg,
        lon_deg,
        heading_deg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nav_line() {
        assert_eq!(
            parse_nav("43.0 -70.0 90.0"),
            Some(NavFix {
                lat_deg: 43.0,
                lon_deg: -70.0,
                heading_deg: 90.0
            })
        );
        assert_eq!(parse_nav("43.0 -70.0"), None);
        assert_eq!(parse_nav("43.0 -70.0 90.0 extra"), None);
        assert_eq!(parse_nav("a b c"), None);
    }
}
