//! # セッションテーブル
//!
//! 生存中のセッションとその状態、発行済みチャレンジを記録する。
//! チャレンジの一意性保証と観測用。ロックは `.await` を跨いで保持しない。

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use crate::session::HandshakeState;

/// 記録しておく発行済みチャレンジの上限
const MAX_CHALLENGE_HISTORY: usize = 65_536;

#[derive(Default)]
struct Inner {
    sessions: HashMap<Uuid, HandshakeState>,
    challenges: HashSet<[u8; 32]>,
    challenge_order: VecDeque<[u8; 32]>,
}

/// 全接続で共有されるセッションテーブル。
#[derive(Default)]
pub struct SessionTable {
    inner: Mutex<Inner>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// セッションを登録する。
    pub fn register(&self, id: Uuid) {
        self.lock().sessions.insert(id, HandshakeState::Idle);
    }

    /// 状態遷移を記録する。
    pub fn update(&self, id: Uuid, state: HandshakeState) {
        if let Some(entry) = self.lock().sessions.get_mut(&id) {
            *entry = state;
        }
    }

    /// セッションを削除する。
    pub fn remove(&self, id: Uuid) {
        self.lock().sessions.remove(&id);
    }

    pub fn state(&self, id: Uuid) -> Option<HandshakeState> {
        self.lock().sessions.get(&id).copied()
    }

    /// 生存中のセッション数。
    pub fn live_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// `Verified` のセッション数。
    pub fn verified_sessions(&self) -> usize {
        self.lock()
            .sessions
            .values()
            .filter(|s| **s == HandshakeState::Verified)
            .count()
    }

    /// チャレンジを記録する。既に発行済みなら `false`。
    pub fn claim_challenge(&self, nonce: [u8; 32]) -> bool {
        let mut inner = self.lock();
        if !inner.challenges.insert(nonce) {
            return false;
        }
        inner.challenge_order.push_back(nonce);
        if inner.challenge_order.len() > MAX_CHALLENGE_HISTORY {
            if let Some(oldest) = inner.challenge_order.pop_front() {
                inner.challenges.remove(&oldest);
            }
        }
        true
    }
}
