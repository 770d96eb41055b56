//! Audit events for role and permission changes
//!
//! Provides:
//! - Structured events carrying actor, target principal, role/permission and scope
//! - The [`AuditSink`] collaborator interface
//! - A bounded lock-free queue drained by a background flush thread
//!
//! Emission is best-effort. The engine logs sink failures and carries on.

use crate::core::model::{PermissionId, RoleId, TeamId, UserId};
use crate::error::{AuthzError, Result};
use chrono::{DateTime, Utc};
use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Kind of change being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    RoleAttached,
    RoleDetached,
    PermissionAttached,
    PermissionDetached,
    RolePermissionAttached,
    RolePermissionDetached,
    RolePermissionsSynced,
    RoleUpdated,
    RoleDeleted,
    PermissionUpdated,
    UserRemoved,
    AccessRequested,
    AccessApproved,
    AccessRejected,
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    /// Principal that performed the change
    pub actor: Option<UserId>,
    /// Principal whose access changed
    pub target_user: Option<UserId>,
    pub role: Option<RoleId>,
    pub permission: Option<PermissionId>,
    pub team: Option<TeamId>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, timestamp: DateTime<Utc>) -> Self {
        AuditEvent {
            kind,
            actor: None,
            target_user: None,
            role: None,
            permission: None,
            team: None,
            timestamp,
            metadata: Value::Null,
        }
    }

    pub fn by(mut self, actor: Option<UserId>) -> Self {
        self.actor = actor;
        self
    }

    pub fn for_user(mut self, user: UserId) -> Self {
        self.target_user = Some(user);
        self
    }

    pub fn with_role(mut self, role: RoleId) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_permission(mut self, permission: PermissionId) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn in_team(mut self, team: Option<TeamId>) -> Self {
        self.team = team;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Receiver of audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: &AuditEvent) -> Result<()> {
        Ok(())
    }
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Maximum events handed to the flush callback at once
const FLUSH_BATCH: usize = 1000;

/// Audit sink with background flushing
///
/// Events go into a bounded queue; when full, the oldest event is dropped
/// and counted. A flush thread drains the queue into a callback every
/// `flush_interval`, and once more on [`stop`](Self::stop).
pub struct AuditLogger {
    queue: Arc<ArrayQueue<AuditEvent>>,
    dropped: Arc<AtomicU64>,
    flush_thread: Option<JoinHandle<()>>,
    flush_interval: Duration,
    running: Arc<Mutex<bool>>,
}

impl AuditLogger {
    /// Create a new audit logger
    ///
    /// # Arguments
    /// * `capacity` - Queue capacity (at least 1)
    /// * `flush_interval` - How often to hand events to the callback
    pub fn new(capacity: usize, flush_interval: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(AuthzError::Config("audit queue capacity must be at least 1".to_string()));
        }

        Ok(AuditLogger {
            queue: Arc::new(ArrayQueue::new(capacity)),
            dropped: Arc::new(AtomicU64::new(0)),
            flush_thread: None,
            flush_interval,
            running: Arc::new(Mutex::new(false)),
        })
    }

    /// Start the background flush thread
    ///
    /// # Arguments
    /// * `flush_callback` - Function called with batches of events
    pub fn start<F>(&mut self, flush_callback: F)
    where
        F: Fn(&[AuditEvent]) + Send + 'static,
    {
        if self.flush_thread.is_some() {
            return;
        }
        *self.running.lock() = true;

        let queue = Arc::clone(&self.queue);
        let flush_interval = self.flush_interval;
        let running = Arc::clone(&self.running);

        let flush_thread = thread::spawn(move || {
            while *running.lock() {
                thread::sleep(flush_interval);
                drain(&queue, &flush_callback);
            }
            // Final drain so nothing logged before stop is lost
            drain(&queue, &flush_callback);
        });

        self.flush_thread = Some(flush_thread);
    }

    /// Stop the background flush thread
    pub fn stop(&mut self) {
        *self.running.lock() = false;

        if let Some(thread) = self.flush_thread.take() {
            let _ = thread.join();
        }
    }

    /// Queue an event (non-blocking)
    pub fn log(&self, event: AuditEvent) {
        if self.queue.force_push(event).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// (queued, dropped) counts
    pub fn stats(&self) -> (usize, u64) {
        (self.queue.len(), self.dropped.load(Ordering::Relaxed))
    }
}

fn drain<F: Fn(&[AuditEvent])>(queue: &ArrayQueue<AuditEvent>, flush_callback: &F) {
    loop {
        let mut batch = Vec::new();
        while batch.len() < FLUSH_BATCH {
            match queue.pop() {
                Some(event) => batch.push(event),
                None => break,
            }
        }
        if batch.is_empty() {
            return;
        }
        flush_callback(&batch);
    }
}

impl AuditSink for AuditLogger {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        self.log(event.clone());
        Ok(())
    }
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        self.stop();
    }
}
