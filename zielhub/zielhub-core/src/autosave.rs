//! Client-resident autosave scheduler.
//!
//! This is the protocol the editing client must implement for the server's
//! upsert contract to hold. The whole session is explicit state — a pending
//! edit buffer, an in-flight flag, and the promoted id (or none) — plus a
//! debounce timer. Invariants:
//!
//! - a save fires only after the quiet window elapses with no further edits;
//! - at most one save is in flight, and edits arriving mid-flight are
//!   coalesced into exactly one follow-up save;
//! - the first successful create promotes the session to its durable id
//!   before the next save is issued; the session never creates twice;
//! - a failed save keeps the latest content unsaved and is retried only by
//!   an explicit `flush`, never by a background timer.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::store::EntryPatch;

#[derive(Clone, Debug, Error)]
#[error("save failed: {0}")]
pub struct SaveError(pub String);

/// The wire the scheduler saves over. Production clients put the HTTP calls
/// behind this; tests use an in-memory double.
#[async_trait]
pub trait SaveTransport: Send + Sync {
    async fn create_entry(&self, draft: &EntryPatch) -> Result<Uuid, SaveError>;
    async fn update_entry(&self, id: Uuid, draft: &EntryPatch) -> Result<(), SaveError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveStatus {
    /// Nothing edited yet.
    Idle,
    /// Edits buffered, waiting for the quiet window.
    Pending,
    /// A save call is in flight.
    Saving,
    /// Everything the user typed has reached the server.
    Saved,
    /// The last save failed; content is retained unsaved.
    Failed,
}

struct SessionState {
    pending: Option<EntryPatch>,
    in_flight: bool,
    entry_id: Option<Uuid>,
    dirty: bool,
    last_error: Option<String>,
    timer: Option<JoinHandle<()>>,
}

pub struct AutosaveSession {
    transport: Arc<dyn SaveTransport>,
    quiet: Duration,
    state: Mutex<SessionState>,
}

impl AutosaveSession {
    pub fn new(transport: Arc<dyn SaveTransport>, quiet: Duration) -> Arc<Self> {
        Arc::new(Self {
            transport,
            quiet,
            state: Mutex::new(SessionState {
                pending: None,
                in_flight: false,
                entry_id: None,
                dirty: false,
                last_error: None,
                timer: None,
            }),
        })
    }

    /// Buffer an edit and restart the debounce timer. The latest edit always
    /// replaces the buffer; intermediate keystrokes are never saved
    /// individually.
    pub async fn record_edit(self: &Arc<Self>, draft: EntryPatch) {
        let mut st = self.state.lock().await;
        st.pending = Some(draft);
        st.dirty = true;
        if let Some(timer) = st.timer.take() {
            timer.abort();
        }
        let session = self.clone();
        st.timer = Some(tokio::spawn(async move {
            sleep(session.quiet).await;
            session.run_saves().await;
        }));
    }

    /// Save immediately. This is the user/navigation-triggered path, and the
    /// only retry after a failure.
    pub async fn flush(self: &Arc<Self>) {
        {
            let mut st = self.state.lock().await;
            if let Some(timer) = st.timer.take() {
                timer.abort();
            }
        }
        self.clone().run_saves().await;
    }

    /// Drain the pending buffer, one save at a time. Holds the in-flight
    /// slot for the whole drain so a second loop can never start; edits that
    /// land while a save is running are picked up as the next iteration.
    async fn run_saves(self: Arc<Self>) {
        let mut draft = {
            let mut st = self.state.lock().await;
            if st.in_flight {
                // the running loop will pick the pending edit up
                return;
            }
            let Some(draft) = st.pending.take() else {
                return;
            };
            st.in_flight = true;
            draft
        };

        loop {
            let target = { self.state.lock().await.entry_id };
            let result = match target {
                Some(id) => self
                    .transport
                    .update_entry(id, &draft)
                    .await
                    .map(|_| None),
                None => self.transport.create_entry(&draft).await.map(Some),
            };

            let mut st = self.state.lock().await;
            match result {
                Ok(promoted) => {
                    // Promotion is monotonic: set once, before the next save
                    // is issued, so a queued edit becomes an update.
                    if st.entry_id.is_none() {
                        if let Some(id) = promoted {
                            st.entry_id = Some(id);
                        }
                    }
                    match st.pending.take() {
                        Some(next) => draft = next,
                        None => {
                            st.in_flight = false;
                            st.dirty = false;
                            st.last_error = None;
                            return;
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "autosave failed");
                    // keep the latest content: an edit that raced in wins
                    // over the draft we just failed to save
                    if st.pending.is_none() {
                        st.pending = Some(draft);
                    }
                    st.last_error = Some(err.to_string());
                    st.in_flight = false;
                    return;
                }
            }
        }
    }

    /// The promoted durable id, once the first create has succeeded.
    pub async fn entry_id(&self) -> Option<Uuid> {
        self.state.lock().await.entry_id
    }

    /// Navigation guard: true while any edit has not reached the server.
    pub async fn has_unsaved(&self) -> bool {
        let st = self.state.lock().await;
        st.dirty || st.in_flight || st.pending.is_some()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.lock().await.last_error.clone()
    }

    pub async fn status(&self) -> SaveStatus {
        let st = self.state.lock().await;
        if st.in_flight {
            SaveStatus::Saving
        } else if st.last_error.is_some() {
            SaveStatus::Failed
        } else if st.pending.is_some() {
            SaveStatus::Pending
        } else if st.entry_id.is_some() {
            SaveStatus::Saved
        } else {
            SaveStatus::Idle
        }
    }
}
