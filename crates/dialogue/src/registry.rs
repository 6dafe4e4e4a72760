//! Process-wide session registry.
//!
//! Maps `session_id -> DialogueFsm` with lazy creation, per-entry locks, a
//! per-session turn permit (one turn in flight; a second caller is rejected,
//! not queued), and a background sweeper that destroys machines idle beyond
//! the inactivity threshold.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use charla_domain::{Error, Result, TraceEvent};

use crate::fsm::{DialogueFsm, FsmConfig};

struct SessionEntry {
    fsm: Arc<Mutex<DialogueFsm>>,
    turn_permit: Arc<Semaphore>,
}

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub fsm: FsmConfig,
    pub inactivity_threshold: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            fsm: FsmConfig::default(),
            inactivity_threshold: Duration::from_secs(3_600),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

/// Exclusive access to a session for the duration of one turn. Dropping the
/// guard releases the permit.
#[derive(Debug)]
pub struct TurnGuard {
    fsm: Arc<Mutex<DialogueFsm>>,
    _permit: OwnedSemaphorePermit,
}

impl TurnGuard {
    pub fn fsm(&self) -> &Arc<Mutex<DialogueFsm>> {
        &self.fsm
    }
}

/// The only cross-turn mutable state in the process.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    config: RegistryConfig,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Look up a session's machine, creating it lazily on first use.
    pub fn get_or_create(&self, session_id: &str) -> Arc<Mutex<DialogueFsm>> {
        // Fast path: session already exists.
        {
            let sessions = self.sessions.read();
            if let Some(entry) = sessions.get(session_id) {
                return entry.fsm.clone();
            }
        }

        let mut sessions = self.sessions.write();
        // Re-check under the write lock; another turn may have won the race.
        if let Some(entry) = sessions.get(session_id) {
            return entry.fsm.clone();
        }

        let fsm = Arc::new(Mutex::new(DialogueFsm::new(
            session_id,
            self.config.fsm.clone(),
        )));
        fsm.lock().attach(Arc::downgrade(&fsm));
        sessions.insert(
            session_id.to_owned(),
            SessionEntry {
                fsm: fsm.clone(),
                turn_permit: Arc::new(Semaphore::new(1)),
            },
        );
        drop(sessions);

        TraceEvent::SessionCreated {
            session_id: session_id.to_owned(),
        }
        .emit();
        fsm
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<DialogueFsm>>> {
        self.sessions.read().get(session_id).map(|e| e.fsm.clone())
    }

    /// Claim the session for one turn. A turn already in flight means the
    /// caller must back off — overlapping turns are rejected, not queued.
    pub fn begin_turn(&self, session_id: &str) -> Result<TurnGuard> {
        let fsm = self.get_or_create(session_id);
        let permit = {
            let sessions = self.sessions.read();
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| Error::SessionBusy {
                    session_id: session_id.to_owned(),
                })?;
            entry.turn_permit.clone().try_acquire_owned()
        };
        match permit {
            Ok(permit) => Ok(TurnGuard {
                fsm,
                _permit: permit,
            }),
            Err(_) => Err(Error::SessionBusy {
                session_id: session_id.to_owned(),
            }),
        }
    }

    /// Explicit teardown of one session.
    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id);
        match removed {
            Some(entry) => {
                entry.fsm.lock().destroy();
                TraceEvent::SessionDestroyed {
                    session_id: session_id.to_owned(),
                }
                .emit();
                true
            }
            None => false,
        }
    }

    /// One sweep pass: destroy every session idle beyond the threshold.
    /// Returns how many were removed.
    pub fn sweep_once(&self) -> usize {
        let threshold = self.config.inactivity_threshold;
        let stale: Vec<(String, u64)> = {
            let sessions = self.sessions.read();
            sessions
                .iter()
                .filter_map(|(id, entry)| {
                    let idle = entry.fsm.lock().idle_for();
                    (idle >= threshold).then(|| (id.clone(), idle.as_millis() as u64))
                })
                .collect()
        };

        let mut removed = 0;
        let mut sessions = self.sessions.write();
        for (session_id, idle_ms) in stale {
            // Re-check idleness under the write lock; the session may have
            // been touched between the scan and now.
            let still_stale = sessions
                .get(&session_id)
                .map(|e| e.fsm.lock().idle_for() >= threshold)
                .unwrap_or(false);
            if !still_stale {
                continue;
            }
            if let Some(entry) = sessions.remove(&session_id) {
                entry.fsm.lock().destroy();
                removed += 1;
                TraceEvent::SessionExpired {
                    session_id,
                    idle_ms,
                }
                .emit();
            }
        }
        removed
    }

    /// Spawn the periodic sweeper. The task holds only a weak reference so
    /// dropping the registry stops it.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let interval = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = weak.upgrade() else { break };
                let removed = registry.sweep_once();
                if removed > 0 {
                    tracing::info!(removed, "session sweeper removed stale sessions");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn registry(inactivity: Duration) -> SessionRegistry {
        SessionRegistry::new(RegistryConfig {
            inactivity_threshold: inactivity,
            cleanup_interval: Duration::from_millis(50),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn lazy_creation_and_reuse() {
        let reg = registry(Duration::from_secs(3600));
        assert!(reg.is_empty());

        let a = reg.get_or_create("s1");
        let b = reg.get_or_create("s1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
    }

    #[tokio::test]
    async fn session_reuse_preserves_turn_count() {
        let reg = registry(Duration::from_secs(3600));

        {
            let guard = reg.begin_turn("s1").unwrap();
            let mut fsm = guard.fsm().lock();
            fsm.start_new_turn(Uuid::new_v4()).unwrap();
            fsm.transition(
                charla_domain::DialogueState::Analyzing,
                "preprocessed",
                None,
            )
            .unwrap();
            fsm.transition(charla_domain::DialogueState::Generating, "ok", None)
                .unwrap();
            fsm.handle_success();
            fsm.end_turn();
        }
        {
            let guard = reg.begin_turn("s1").unwrap();
            let mut fsm = guard.fsm().lock();
            fsm.start_new_turn(Uuid::new_v4()).unwrap();
            fsm.end_turn();
            assert_eq!(fsm.turn_count(), 2);
        }
    }

    #[tokio::test]
    async fn second_turn_on_busy_session_is_rejected() {
        let reg = registry(Duration::from_secs(3600));
        let _guard = reg.begin_turn("s1").unwrap();
        let err = reg.begin_turn("s1").unwrap_err();
        assert!(matches!(err, Error::SessionBusy { .. }));
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        let reg = registry(Duration::from_secs(3600));
        let _g1 = reg.begin_turn("s1").unwrap();
        let _g2 = reg.begin_turn("s2").unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_stale_sessions() {
        let reg = registry(Duration::from_millis(10));
        reg.get_or_create("old");
        tokio::time::sleep(Duration::from_millis(50)).await;
        reg.get_or_create("fresh");

        let removed = reg.sweep_once();
        assert_eq!(removed, 1);
        assert!(reg.get("old").is_none());
        assert!(reg.get("fresh").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn touched_sessions_survive_the_sweep() {
        let reg = registry(Duration::from_millis(100));
        let fsm = reg.get_or_create("s1");
        tokio::time::sleep(Duration::from_millis(80)).await;
        fsm.lock().touch();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(reg.sweep_once(), 0);
        assert!(reg.get("s1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_recreates_fresh() {
        let reg = registry(Duration::from_millis(10));
        {
            let guard = reg.begin_turn("s1").unwrap();
            let mut fsm = guard.fsm().lock();
            fsm.start_new_turn(Uuid::new_v4()).unwrap();
            fsm.end_turn();
            assert_eq!(fsm.turn_count(), 1);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(reg.sweep_once(), 1);

        let fsm = reg.get_or_create("s1");
        assert_eq!(fsm.lock().turn_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_runs_on_interval() {
        let reg = Arc::new(registry(Duration::from_millis(10)));
        reg.get_or_create("doomed");
        let _handle = reg.spawn_sweeper();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(reg.get("doomed").is_none());
    }

    #[tokio::test]
    async fn remove_destroys_the_machine() {
        let reg = registry(Duration::from_secs(3600));
        let fsm = reg.get_or_create("s1");
        assert!(reg.remove("s1"));
        assert!(fsm.lock().is_destroyed());
        assert!(!reg.remove("s1"));
    }
}
