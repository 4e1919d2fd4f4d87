//! 会话存储：按 sessionId 保存 OrchestrationState
//!
//! MemorySessionStore 有 TTL 与容量上限：写入超过容量时先清理过期项，再淘汰最久未更新的项。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::state::OrchestrationState;

pub trait SessionStore: Send + Sync {
    fn put(&self, state: OrchestrationState);
    fn get(&self, session_id: &str) -> Option<OrchestrationState>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// 清理过期会话，返回清理数量
    fn cleanup_expired(&self) -> usize;
}

struct Entry {
    state: OrchestrationState,
    updated: Instant,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

pub struct MemorySessionStore {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn remove_expired(&self, inner: &mut Inner) -> usize {
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner.entries.retain(|_, e| e.updated.elapsed() < ttl);
        before - inner.entries.len()
    }
}

impl SessionStore for MemorySessionStore {
    fn put(&self, state: OrchestrationState) {
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let id = state.session_id.clone();
        inner.entries.insert(
            id,
            Entry {
                state,
                updated: Instant::now(),
                seq,
            },
        );

        if inner.entries.len() > self.max_entries {
            let expired = self.remove_expired(&mut inner);
            if expired > 0 {
                tracing::debug!(expired, "expired sessions removed");
            }
        }
        while inner.entries.len() > self.max_entries {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    tracing::debug!(session_id = %key, "session evicted (capacity)");
                    inner.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn get(&self, session_id: &str) -> Option<OrchestrationState> {
        let mut inner = self.lock();
        let expired = inner
            .entries
            .get(session_id)
            .map(|e| e.updated.elapsed() >= self.ttl)?;
        if expired {
            inner.entries.remove(session_id);
            return None;
        }
        inner.entries.get(session_id).map(|e| e.state.clone())
    }

    fn len(&self) -> usize {
        self.lock().entries.len()
    }

    fn cleanup_expired(&self) -> usize {
        let mut inner = self.lock();
        self.remove_expired(&mut inner)
    }
}
