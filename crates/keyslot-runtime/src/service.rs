//! [`RelayService`] – the request contract of the relay.
//!
//! Every operation takes already-parsed inputs (`payload`, `authenticated`,
//! optional `team`) and returns a typed outcome or a [`KeyslotError`]; the
//! HTTP layer only translates.
//!
//! | Operation | Auth | Mutates |
//! |---|---|---|
//! | [`submit_color_event`](RelayService::submit_color_event) | yes | queue, broker, serial |
//! | [`submit_reward_event`](RelayService::submit_reward_event) | yes | queue, broker |
//! | [`peek_team`](RelayService::peek_team) | no | no |
//! | [`pop_next`](RelayService::pop_next) | no | queue |
//! | [`list_queue`](RelayService::list_queue) | no | no |
//! | [`list_rewards`](RelayService::list_rewards) | no | no |
//! | [`last_reward`](RelayService::last_reward) | no | freshness flag |
//! | [`clear_queue`](RelayService::clear_queue) | yes | queue, reward store |
//! | [`clear_team_rewards`](RelayService::clear_team_rewards) | yes | queue |
//! | [`set_reward_config`](RelayService::set_reward_config) | no | reward store |
//! | [`get_reward_config`](RelayService::get_reward_config) | no | no |
//! | [`status`](RelayService::status) | no | no |
//!
//! The credential is checked before the payload is looked at, so a rejected
//! caller learns nothing about validation and changes nothing.
//!
//! Locks are never held across an `.await`: queue work happens in a short
//! synchronous critical section, then forwarding runs unlocked.  Serial writes
//! block, so they run on Tokio's blocking pool.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use keyslot_hal::ColorSender;
use keyslot_memory::{EventQueue, RewardStore};
use keyslot_middleware::{BrokerPayload, BrokerPublisher};
use keyslot_types::{
    ColorEvent, ConnectionState, EventRecord, KeyslotError, RewardConfig, RewardEvent, Submission,
};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Options & outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Which accepted submissions are forwarded to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    pub forward_color_events: bool,
    pub forward_reward_events: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            forward_color_events: true,
            forward_reward_events: true,
        }
    }
}

/// Result of an accepted submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub status: &'static str,
    pub team: String,
    pub color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// The payload reached the broker transport.
    pub forwarded: bool,
    /// The code was written to the serial device; absent without one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<bool>,
}

/// Most recent record plus whether it arrived since the previous read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastReward {
    #[serde(flatten)]
    pub record: EventRecord,
    pub is_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearOutcome {
    pub status: &'static str,
    pub removed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigAccepted {
    pub status: &'static str,
    pub entries: usize,
}

/// Snapshot for the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub broker: ConnectionState,
    pub endpoint: String,
    pub topic: String,
    pub queue_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_port: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// RelayService
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the queue and reward store and forwards accepted events.
pub struct RelayService {
    queue: Mutex<EventQueue>,
    rewards: RwLock<RewardStore>,
    publisher: Arc<BrokerPublisher>,
    serial: Option<SerialOutput>,
    options: RelayOptions,
}

struct SerialOutput {
    id: String,
    sender: Arc<Mutex<Box<dyn ColorSender>>>,
}

impl RelayService {
    pub fn new(publisher: Arc<BrokerPublisher>, options: RelayOptions) -> Self {
        Self {
            queue: Mutex::new(EventQueue::new()),
            rewards: RwLock::new(RewardStore::new()),
            publisher,
            serial: None,
            options,
        }
    }

    /// Also write accepted color codes to `sender`.
    pub fn with_color_sender(mut self, sender: Box<dyn ColorSender>) -> Self {
        self.serial = Some(SerialOutput {
            id: sender.id().to_string(),
            sender: Arc::new(Mutex::new(sender)),
        });
        self
    }

    // -----------------------------------------------------------------------
    // Submissions
    // -----------------------------------------------------------------------

    /// Accept a `{team, color}` submission.
    ///
    /// The record is queued first; forwarding failures are logged and only
    /// show up as `forwarded: false`.
    pub async fn submit_color_event(
        &self,
        payload: &Value,
        authenticated: bool,
    ) -> Result<SubmitOutcome, KeyslotError> {
        ensure_authenticated(authenticated)?;
        let event = ColorEvent::from_payload(payload)?;
        let record = Submission::Color(event).into_record(None);
        let (team, color) = (record.team.clone(), record.color.clone());
        self.lock_queue()?.append(record);
        info!(team = %team, color = %color, "color event queued");

        let destination = self.read_rewards()?.destination_for(&color);
        let forwarded = if self.options.forward_color_events {
            let code = destination.clone().unwrap_or_else(|| color.clone());
            self.publisher.publish(&BrokerPayload::Text(code)).await
        } else {
            false
        };
        let serial = self.send_serial(&color).await;

        Ok(SubmitOutcome {
            status: "success",
            team,
            color,
            destination,
            forwarded,
            serial,
        })
    }

    /// Accept a reward submission and publish it as a JSON object.
    pub async fn submit_reward_event(
        &self,
        payload: &Value,
        authenticated: bool,
    ) -> Result<SubmitOutcome, KeyslotError> {
        ensure_authenticated(authenticated)?;
        let event = RewardEvent::from_payload(payload)?;
        let destination = self.read_rewards()?.destination_for(&event.reward);
        let record = Submission::Reward(event).into_record(destination.clone());
        let message = reward_message(&record);
        let (team, color) = (record.team.clone(), record.color.clone());
        self.lock_queue()?.append(record);
        info!(team = %team, reward = %color, destination = ?destination, "reward event queued");

        let forwarded = if self.options.forward_reward_events {
            self.publisher.publish(&BrokerPayload::Json(message)).await
        } else {
            false
        };

        Ok(SubmitOutcome {
            status: "success",
            team,
            color,
            destination,
            forwarded,
            serial: None,
        })
    }

    // -----------------------------------------------------------------------
    // Consumers
    // -----------------------------------------------------------------------

    /// Most recent record for `team` without removing it.
    pub fn peek_team(&self, team: Option<&str>) -> Result<Option<EventRecord>, KeyslotError> {
        let team = required_team(team)?;
        Ok(self.lock_queue()?.peek_latest_by_team(team).cloned())
    }

    /// Remove the oldest record for `team`, or the global head without one.
    pub fn pop_next(&self, team: Option<&str>) -> Result<Option<EventRecord>, KeyslotError> {
        let mut queue = self.lock_queue()?;
        let popped = match non_empty(team) {
            Some(team) => queue.pop_by_team(team),
            None => queue.pop_front(),
        };
        if let Some(record) = &popped {
            info!(team = %record.team, color = %record.color, remaining = queue.len(), "record popped");
        }
        Ok(popped)
    }

    pub fn list_queue(&self) -> Result<Vec<EventRecord>, KeyslotError> {
        Ok(self.lock_queue()?.list_all())
    }

    pub fn list_rewards(&self, team: Option<&str>) -> Result<Vec<EventRecord>, KeyslotError> {
        let queue = self.lock_queue()?;
        Ok(match non_empty(team) {
            Some(team) => queue.list_by_team(team),
            None => queue.list_all(),
        })
    }

    /// Most recent record in scope, reporting and clearing its freshness.
    ///
    /// `Ok(None)` means the whole queue is empty.  A named team with no
    /// records is [`KeyslotError::NotFound`].
    pub fn last_reward(&self, team: Option<&str>) -> Result<Option<LastReward>, KeyslotError> {
        let mut queue = self.lock_queue()?;
        match non_empty(team) {
            Some(team) => {
                let record = queue
                    .peek_latest_by_team(team)
                    .cloned()
                    .ok_or_else(|| KeyslotError::NotFound(format!("no rewards for team '{team}'")))?;
                let is_new = queue.take_fresh(Some(team));
                Ok(Some(LastReward { record, is_new }))
            }
            None => {
                let Some(record) = queue.latest().cloned() else {
                    return Ok(None);
                };
                let is_new = queue.take_fresh(None);
                Ok(Some(LastReward { record, is_new }))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Empty the queue and forget the reward configuration.
    ///
    /// Both locks are taken before either is touched, so a failure leaves
    /// both intact.
    pub fn clear_queue(&self, authenticated: bool) -> Result<ClearOutcome, KeyslotError> {
        ensure_authenticated(authenticated)?;
        let mut queue = self.lock_queue()?;
        let mut rewards = self.write_rewards()?;
        let removed = queue.clear_all();
        rewards.clear();
        info!(removed, "queue and reward configuration cleared");
        Ok(ClearOutcome {
            status: "cleared",
            removed,
        })
    }

    /// Remove every record of `team`.
    pub fn clear_team_rewards(
        &self,
        team: &str,
        authenticated: bool,
    ) -> Result<ClearOutcome, KeyslotError> {
        ensure_authenticated(authenticated)?;
        let removed = self.lock_queue()?.clear_by_team(team);
        if removed == 0 {
            return Err(KeyslotError::NotFound(format!("no rewards for team '{team}'")));
        }
        info!(team = %team, removed, "team records cleared");
        Ok(ClearOutcome {
            status: "cleared",
            removed,
        })
    }

    /// Replace the reward configuration wholesale.
    pub fn set_reward_config(&self, payload: &Value) -> Result<ConfigAccepted, KeyslotError> {
        let config = RewardConfig::from_payload(payload)?;
        let entries = config.rewards.len();
        self.write_rewards()?.set(config);
        Ok(ConfigAccepted {
            status: "accepted",
            entries,
        })
    }

    /// Derived colorName → destination mapping.
    pub fn get_reward_config(&self) -> Result<BTreeMap<String, String>, KeyslotError> {
        Ok(self.read_rewards()?.destination_map())
    }

    pub fn status(&self) -> Result<StatusReport, KeyslotError> {
        let queue_length = self.lock_queue()?.len();
        let serial_port = self.serial.as_ref().map(|output| output.id.clone());
        Ok(StatusReport {
            broker: self.publisher.state(),
            endpoint: self.publisher.endpoint(),
            topic: self.publisher.topic().to_string(),
            queue_length,
            serial_port,
        })
    }

    pub fn publisher(&self) -> &Arc<BrokerPublisher> {
        &self.publisher
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn send_serial(&self, code: &str) -> Option<bool> {
        let output = self.serial.as_ref()?;
        let sender = Arc::clone(&output.sender);
        let code = code.to_string();
        let written = tokio::task::spawn_blocking(move || {
            sender
                .lock()
                .map_err(|_| poisoned("serial sender"))?
                .send_color(&code)
        })
        .await;
        match written {
            Ok(Ok(())) => Some(true),
            Ok(Err(e)) => {
                warn!(port = %output.id, error = %e, "serial send failed");
                Some(false)
            }
            Err(e) => {
                warn!(port = %output.id, error = %e, "serial send task failed");
                Some(false)
            }
        }
    }

    fn lock_queue(&self) -> Result<MutexGuard<'_, EventQueue>, KeyslotError> {
        self.queue.lock().map_err(|_| poisoned("event queue"))
    }

    fn read_rewards(&self) -> Result<RwLockReadGuard<'_, RewardStore>, KeyslotError> {
        self.rewards.read().map_err(|_| poisoned("reward store"))
    }

    fn write_rewards(&self) -> Result<RwLockWriteGuard<'_, RewardStore>, KeyslotError> {
        self.rewards.write().map_err(|_| poisoned("reward store"))
    }
}

fn ensure_authenticated(authenticated: bool) -> Result<(), KeyslotError> {
    if authenticated {
        Ok(())
    } else {
        warn!("rejected unauthenticated request");
        Err(KeyslotError::Unauthorized)
    }
}

fn non_empty(team: Option<&str>) -> Option<&str> {
    team.map(str::trim).filter(|t| !t.is_empty())
}

fn required_team(team: Option<&str>) -> Result<&str, KeyslotError> {
    non_empty(team).ok_or_else(|| KeyslotError::Validation("missing 'team' parameter".to_string()))
}

fn poisoned(what: &str) -> KeyslotError {
    KeyslotError::Internal(format!("{what} lock poisoned"))
}

/// JSON object published for a reward record.
fn reward_message(record: &EventRecord) -> Value {
    json!({
        "team": record.team,
        "reward": record.color,
        "destination": record.destination,
        "gate": record.gate,
        "level": record.level,
        "gameNumber": record.game_number,
        "timestamp": record.timestamp,
    })
}
