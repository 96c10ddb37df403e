/// Chat synchronizer — poll loop and optimistic send reconciliation
///
/// Owns the timeline. Polls the gateway on a fixed interval and
/// replaces the confirmed view with each server snapshot; sends append
/// an optimistic entry first and reconcile it by client key once the
/// server answers. The conversation id is established lazily on the
/// first send and persisted before the next poll can observe it.
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::gateway::ChatGateway;
use crate::session::Session;
use crate::timeline::Timeline;
use crate::types::{ChatEvent, ChatMessage, Delivery, OutgoingMessage, Role, SyncState};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

pub struct Synchronizer {
    config: Config,
    gateway: Arc<ChatGateway>,
    session: Session,
    timeline: Arc<RwLock<Timeline>>,
    events: broadcast::Sender<ChatEvent>,

    /// True once a read attempt has succeeded for this conversation
    synced: Arc<RwLock<bool>>,

    /// Consecutive poll failures, drives the backoff
    failures: Arc<RwLock<u32>>,

    /// Shutdown signal for the poll loop
    shutdown: Arc<RwLock<bool>>,
}

impl Synchronizer {
    pub fn new(config: Config, session: Session) -> Result<Self> {
        let gateway = Arc::new(ChatGateway::new(&config)?);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            gateway,
            session,
            timeline: Arc::new(RwLock::new(Timeline::new())),
            events,
            synced: Arc::new(RwLock::new(false)),
            failures: Arc::new(RwLock::new(0)),
            shutdown: Arc::new(RwLock::new(false)),
        })
    }

    /// Subscribe to synchronizer events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Current timeline, oldest first.
    pub async fn snapshot(&self) -> Vec<ChatMessage> {
        self.timeline.read().await.snapshot()
    }

    pub async fn state(&self) -> SyncState {
        if self.timeline.read().await.has_pending() {
            return SyncState::Sending;
        }
        if *self.synced.read().await {
            SyncState::Synced
        } else {
            SyncState::Uninitialized
        }
    }

    /// Spawn the poll loop. The first tick fires immediately.
    pub fn start(&self) -> JoinHandle<()> {
        let sync = self.clone();
        tokio::spawn(async move { sync.run_poller().await })
    }

    /// Signal the poll loop to stop at its next tick.
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }

    async fn run_poller(&self) {
        info!(
            "Synchronizer polling every {} ms",
            self.config.poll_interval.as_millis()
        );

        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut skip_ticks = 0u32;

        loop {
            ticker.tick().await;

            if *self.shutdown.read().await {
                break;
            }

            if skip_ticks > 0 {
                skip_ticks -= 1;
                continue;
            }

            if self.poll_once().await.is_err() {
                let failures = *self.failures.read().await;
                // Stretch the effective interval, doubling per
                // consecutive failure up to the configured cap.
                let factor = (1u32 << failures.min(31)).min(self.config.max_backoff_factor.max(1));
                skip_ticks = factor - 1;
                debug!("Backing off: skipping {} ticks", skip_ticks);
            }
        }

        info!("Synchronizer stopped");
    }

    /// One synchronization pass. Also serves as the manual refresh
    /// affordance. With no conversation established yet this is a
    /// no-op: no request is issued and the state stays uninitialized.
    pub async fn poll_once(&self) -> Result<()> {
        let conversation_id = match self.session.conversation_id() {
            Some(id) if !id.is_empty() => id,
            _ => {
                debug!("No conversation yet, skipping poll");
                return Ok(());
            }
        };

        match self.gateway.list_messages(&conversation_id).await {
            Ok(messages) => {
                let message_count = messages.len();
                {
                    let mut timeline = self.timeline.write().await;
                    timeline.apply_snapshot(&messages);
                }
                *self.synced.write().await = true;
                *self.failures.write().await = 0;
                let _ = self.events.send(ChatEvent::Synced { message_count });
                Ok(())
            }
            Err(e) => {
                let failures = {
                    let mut failures = self.failures.write().await;
                    *failures = failures.saturating_add(1);
                    *failures
                };
                warn!("Poll failed ({} consecutive): {}", failures, e);
                Err(e)
            }
        }
    }

    /// Send a message. The entry is appended optimistically before any
    /// network activity, so the timeline grows by exactly one right
    /// away; the returned client key identifies the entry across its
    /// delivery-state changes. A gateway failure marks the entry
    /// failed and is reported via events, not as an error here.
    pub async fn send(&self, text: &str) -> Result<String> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::InvalidMessage(
                "cannot send an empty message".to_string(),
            ));
        }

        let entry = ChatMessage::outgoing(text);
        let client_key = entry.client_key.clone();
        {
            let mut timeline = self.timeline.write().await;
            timeline.push(entry);
        }
        let _ = self.events.send(ChatEvent::MessagePending {
            client_key: client_key.clone(),
        });

        self.deliver(&client_key, text).await;
        Ok(client_key)
    }

    /// Retry a failed send, reusing its client key and text.
    pub async fn resend(&self, client_key: &str) -> Result<()> {
        let text = {
            let mut timeline = self.timeline.write().await;
            match timeline.get(client_key) {
                Some(entry) if entry.delivery == Delivery::Failed => {
                    let text = entry.text.clone();
                    timeline.reset_pending(client_key);
                    text
                }
                Some(_) => {
                    return Err(ChatError::InvalidMessage(format!(
                        "message {} is not in a failed state",
                        client_key
                    )))
                }
                None => {
                    return Err(ChatError::InvalidMessage(format!(
                        "unknown message {}",
                        client_key
                    )))
                }
            }
        };

        let _ = self.events.send(ChatEvent::MessagePending {
            client_key: client_key.to_string(),
        });
        self.deliver(client_key, &text).await;
        Ok(())
    }

    /// Logout: clear the persisted session and drop the local view.
    pub async fn logout(&self) {
        if let Err(e) = self.session.clear() {
            warn!("Failed to clear session on logout: {}", e);
        }
        self.timeline.write().await.clear();
        *self.synced.write().await = false;
        info!("Session cleared");
    }

    /// Run the gateway write for an already-appended entry and
    /// reconcile the outcome into the timeline.
    async fn deliver(&self, client_key: &str, text: &str) {
        let conversation_id = self.session.conversation_id().filter(|id| !id.is_empty());
        let first_message = conversation_id.is_none();

        let outgoing = OutgoingMessage {
            user_id: self.session.user_id().unwrap_or_default(),
            admin_id: self.config.counterpart_id.clone(),
            conversation_id,
            text: text.to_string(),
            role: Role::User,
        };

        match self.gateway.append_message(&outgoing).await {
            Ok(confirmed) => {
                if first_message {
                    match confirmed.conversation_id.as_deref() {
                        Some(conversation_id) => {
                            // Durable before the next poll relies on it
                            if let Err(e) = self.session.set_conversation_id(conversation_id) {
                                warn!("Failed to persist conversation id: {}", e);
                            }
                            info!("Conversation established: {}", conversation_id);
                            let _ = self.events.send(ChatEvent::ConversationEstablished {
                                conversation_id: conversation_id.to_string(),
                            });
                        }
                        None => warn!("send-message result carried no conversation id"),
                    }
                }

                let message_id = confirmed.id.clone();
                {
                    let mut timeline = self.timeline.write().await;
                    if !timeline.confirm(client_key, &confirmed) {
                        debug!("Confirmed entry {} no longer in timeline", client_key);
                    }
                }
                let _ = self.events.send(ChatEvent::MessageConfirmed {
                    client_key: client_key.to_string(),
                    message_id,
                });
            }
            Err(e) => {
                warn!("Send failed for {}: {}", client_key, e);
                {
                    let mut timeline = self.timeline.write().await;
                    timeline.fail(client_key);
                }
                let _ = self.events.send(ChatEvent::MessageFailed {
                    client_key: client_key.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }
}

impl Clone for Synchronizer {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            gateway: self.gateway.clone(),
            session: self.session.clone(),
            timeline: self.timeline.clone(),
            events: self.events.clone(),
            synced: self.synced.clone(),
            failures: self.failures.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}
