//! The waiting pool and everything the matchmaker reads while pairing.
//!
//! All mutable collections live in one [`PoolInner`] behind a single async
//! mutex. `find_and_remove_match` scans and removes under that one guard, so
//! two concurrent callers can never both claim the same candidate.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use wallette_shared::auth::AuthProof;
use wallette_shared::protocol::{MatchCriteria, WalletProfile};
use wallette_shared::{Identity, MatchMode};

/// Two identities removed from the pool together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMatch {
    /// `[caller, partner]`
    pub pair: [Identity; 2],
    pub mode: MatchMode,
}

struct StoredProfile {
    tokens: BTreeSet<String>,
    profile: WalletProfile,
}

#[derive(Default)]
struct PoolInner {
    waiting: VecDeque<Identity>,
    waiting_set: HashSet<Identity>,
    /// Always a subset of `waiting_set`.
    random_set: HashSet<Identity>,
    criteria: HashMap<Identity, MatchCriteria>,
    profiles: HashMap<Identity, StoredProfile>,
    auth_proofs: HashMap<Identity, AuthProof>,
    listeners: Vec<mpsc::UnboundedSender<Identity>>,
}

impl PoolInner {
    fn criteria_of(&self, identity: &Identity) -> MatchCriteria {
        self.criteria.get(identity).cloned().unwrap_or_default()
    }

    fn remove_waiting(&mut self, identity: &Identity) -> bool {
        if !self.waiting_set.remove(identity) {
            return false;
        }
        self.waiting.retain(|id| id != identity);
        self.random_set.remove(identity);
        true
    }

    fn excluded_either_way(&self, a: &Identity, b: &Identity) -> bool {
        let excludes = |owner: &Identity, other: &Identity| {
            self.criteria
                .get(owner)
                .map(|c| c.excludes(other))
                .unwrap_or(false)
        };
        excludes(a, b) || excludes(b, a)
    }

    fn notify(&mut self, identity: &Identity) {
        self.listeners.retain(|tx| tx.send(identity.clone()).is_ok());
    }
}

pub struct PoolStore {
    inner: Mutex<PoolInner>,
    excluded_tokens: BTreeSet<String>,
    max_exclude_list: usize,
}

impl PoolStore {
    pub fn new(excluded_tokens: impl IntoIterator<Item = String>, max_exclude_list: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            excluded_tokens: excluded_tokens
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .collect(),
            max_exclude_list,
        }
    }

    /// Receives the identity touched by every mutating operation.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<Identity> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().await.listeners.push(tx);
        rx
    }

    /// Emit a change for `identity` without mutating anything (a fresh
    /// connection, for instance).
    pub async fn notify(&self, identity: &Identity) {
        self.inner.lock().await.notify(identity);
    }

    /// Blocks every other pool operation until the guard drops.
    #[cfg(test)]
    pub(crate) async fn hold_lock(&self) -> impl Sized + '_ {
        self.inner.lock().await
    }

    /// Returns `true` if the identity was not already waiting.
    pub async fn enqueue(&self, identity: &Identity) -> bool {
        let mut inner = self.inner.lock().await;
        let inserted = inner.waiting_set.insert(identity.clone());
        if inserted {
            inner.waiting.push_back(identity.clone());
            if !inner.criteria_of(identity).match_tokens {
                inner.random_set.insert(identity.clone());
            }
            debug!(identity = %identity, waiting = inner.waiting.len(), "Enqueued");
        }
        inner.notify(identity);
        inserted
    }

    pub async fn dequeue(&self, identity: &Identity) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.remove_waiting(identity);
        if removed {
            debug!(identity = %identity, waiting = inner.waiting.len(), "Dequeued");
        }
        removed
    }

    /// Replaces the criteria wholesale and moves a waiting identity between
    /// the random and token pools.
    pub async fn set_match_criteria(&self, identity: &Identity, criteria: MatchCriteria) {
        let criteria = MatchCriteria::bounded(
            criteria.match_tokens,
            criteria.exclude_list,
            self.max_exclude_list,
        );
        let mut inner = self.inner.lock().await;
        if inner.waiting_set.contains(identity) {
            if criteria.match_tokens {
                inner.random_set.remove(identity);
            } else {
                inner.random_set.insert(identity.clone());
            }
        }
        inner.criteria.insert(identity.clone(), criteria);
        inner.notify(identity);
    }

    pub async fn match_criteria(&self, identity: &Identity) -> MatchCriteria {
        self.inner.lock().await.criteria_of(identity)
    }

    /// Atomically pick a partner for `caller` and remove both from the pool.
    ///
    /// Token mode walks the queue in FIFO order and takes the first candidate
    /// sharing at least one non-excluded token. Random mode takes the first
    /// random-eligible candidate. Exclusion is checked in both directions, and
    /// a candidate in the other mode is never considered.
    pub async fn find_and_remove_match(&self, caller: &Identity) -> Option<PoolMatch> {
        let mut inner = self.inner.lock().await;
        if !inner.waiting_set.contains(caller) {
            return None;
        }

        let mode = if inner.random_set.contains(caller) {
            MatchMode::Random
        } else {
            MatchMode::Tokens
        };

        let partner = match mode {
            MatchMode::Random => inner
                .waiting
                .iter()
                .filter(|c| *c != caller && inner.random_set.contains(*c))
                .find(|c| !inner.excluded_either_way(caller, c))
                .cloned(),
            MatchMode::Tokens => {
                let mine = self.tokens_of(&inner, caller);
                if mine.is_empty() {
                    None
                } else {
                    inner
                        .waiting
                        .iter()
                        .filter(|c| *c != caller && !inner.random_set.contains(*c))
                        .filter(|c| !inner.excluded_either_way(caller, c))
                        .find(|c| !mine.is_disjoint(&self.tokens_of(&inner, c)))
                        .cloned()
                }
            }
        }?;

        inner.remove_waiting(caller);
        inner.remove_waiting(&partner);
        info!(
            caller = %caller,
            partner = %partner,
            mode = %mode,
            waiting = inner.waiting.len(),
            "Removed matched pair from pool"
        );

        Some(PoolMatch {
            pair: [caller.clone(), partner],
            mode,
        })
    }

    /// Token intersection of two profiles, minus globally excluded tokens.
    pub async fn matched_tokens(&self, a: &Identity, b: &Identity) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mine = self.tokens_of(&inner, a);
        let theirs = self.tokens_of(&inner, b);
        mine.intersection(&theirs).cloned().collect()
    }

    pub async fn profile(&self, identity: &Identity) -> Option<WalletProfile> {
        let inner = self.inner.lock().await;
        inner.profiles.get(identity).map(|p| p.profile.clone())
    }

    pub async fn set_profile(&self, identity: &Identity, profile: WalletProfile) {
        let tokens = profile.token_set();
        let mut inner = self.inner.lock().await;
        debug!(identity = %identity, tokens = tokens.len(), "Profile replaced");
        inner
            .profiles
            .insert(identity.clone(), StoredProfile { tokens, profile });
        inner.notify(identity);
    }

    pub async fn auth_proof(&self, identity: &Identity) -> Option<AuthProof> {
        self.inner.lock().await.auth_proofs.get(identity).cloned()
    }

    pub async fn set_auth_proof(&self, identity: &Identity, proof: AuthProof) {
        let mut inner = self.inner.lock().await;
        inner.auth_proofs.insert(identity.clone(), proof);
        inner.notify(identity);
    }

    /// Drop everything held for `identity`.
    pub async fn forget(&self, identity: &Identity) {
        let mut inner = self.inner.lock().await;
        inner.remove_waiting(identity);
        inner.criteria.remove(identity);
        inner.profiles.remove(identity);
        inner.auth_proofs.remove(identity);
        debug!(identity = %identity, "Forgot identity");
    }

    pub async fn is_waiting(&self, identity: &Identity) -> bool {
        self.inner.lock().await.waiting_set.contains(identity)
    }

    pub async fn waiting_len(&self) -> usize {
        self.inner.lock().await.waiting.len()
    }

    /// Snapshot of the queue, oldest first.
    pub async fn waiting_list(&self) -> Vec<Identity> {
        self.inner.lock().await.waiting.iter().cloned().collect()
    }

    fn tokens_of(&self, inner: &PoolInner, identity: &Identity) -> BTreeSet<String> {
        inner
            .profiles
            .get(identity)
            .map(|p| {
                p.tokens
                    .iter()
                    .filter(|t| !self.excluded_tokens.contains(*t))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
