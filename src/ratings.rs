use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    store::{dislikes_key, likes_key, user_rating_key, KvStore},
    utils::now_ts,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RatingKind {
    Like,
    Dislike,
}

impl RatingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RatingKind::Like => "like",
            RatingKind::Dislike => "dislike",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "like" => Some(RatingKind::Like),
            "dislike" => Some(RatingKind::Dislike),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RatingCounts {
    pub likes: i64,
    pub dislikes: i64,
}

/// Toggle policy used by the HTTP layer: requesting the rating the user
/// already holds clears it, requesting the opposite replaces it.
pub fn apply_toggle(current: Option<RatingKind>, requested: RatingKind) -> Option<RatingKind> {
    if current == Some(requested) {
        None
    } else {
        Some(requested)
    }
}

fn counter_key(content_id: &str, kind: RatingKind) -> String {
    match kind {
        RatingKind::Like => likes_key(content_id),
        RatingKind::Dislike => dislikes_key(content_id),
    }
}

#[derive(Clone)]
pub struct RatingService {
    store: KvStore,
    write_lock: Arc<Mutex<()>>,
}

impl RatingService {
    pub fn new(store: KvStore, write_lock: Arc<Mutex<()>>) -> Self {
        Self { store, write_lock }
    }

    /// Applies `new_rating` for `(user_id, content_id)` and returns the
    /// resulting counters.
    ///
    /// Retract-then-apply: any prior vote is decremented (floored at 0)
    /// before the new one lands, so a user holds at most one active rating
    /// per content item. `None` is the full un-rate path. This is the bare
    /// contract; calling it twice with the same `Some` double-increments.
    /// Idempotence comes from [`apply_toggle`] in the HTTP layer.
    pub fn set_rating(
        &self,
        content_id: &str,
        user_id: &str,
        new_rating: Option<RatingKind>,
    ) -> Result<RatingCounts> {
        let _guard = self.write_lock.lock();
        let ts = now_ts();
        let rating_key = user_rating_key(user_id, content_id);
        let current = self.store.get(&rating_key)?.and_then(|s| RatingKind::parse(&s));

        if let Some(prior) = current {
            let key = counter_key(content_id, prior);
            let n = self.store.get_counter(&key)?;
            self.store.put_counter(&key, n - 1, ts)?;
        }

        match new_rating {
            None => self.store.delete(&rating_key)?,
            Some(kind) => {
                let key = counter_key(content_id, kind);
                let n = self.store.get_counter(&key)?;
                self.store.put_counter(&key, n + 1, ts)?;
                self.store.put(&rating_key, kind.as_str(), ts)?;
            }
        }

        self.counts_checked(content_id)
    }

    pub fn counts_checked(&self, content_id: &str) -> Result<RatingCounts> {
        Ok(RatingCounts {
            likes: self.store.get_counter(&likes_key(content_id))?,
            dislikes: self.store.get_counter(&dislikes_key(content_id))?,
        })
    }

    /// Read path that degrades to zeroed counters on store failure.
    pub fn counts(&self, content_id: &str) -> RatingCounts {
        match self.counts_checked(content_id) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("ratings.read_failed content={content_id} err={e}");
                RatingCounts::default()
            }
        }
    }

    pub fn user_rating_checked(&self, content_id: &str, user_id: &str) -> Result<Option<RatingKind>> {
        let v = self.store.get(&user_rating_key(user_id, content_id))?;
        Ok(v.and_then(|s| RatingKind::parse(&s)))
    }

    /// Read path that degrades to "no rating" on store failure.
    pub fn user_rating(&self, content_id: &str, user_id: &str) -> Option<RatingKind> {
        match self.user_rating_checked(content_id, user_id) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("ratings.read_failed content={content_id} user={user_id} err={e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (tempfile::TempDir, RatingService) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kv.sqlite");
        let store = KvStore::new(path.to_str().unwrap()).unwrap();
        store.init_db().unwrap();
        let svc = RatingService::new(store, Arc::new(Mutex::new(())));
        (dir, svc)
    }

    #[test]
    fn like_then_dislike_retracts_prior() {
        let (_dir, svc) = service();
        let c = svc.set_rating("g1", "u1", Some(RatingKind::Like)).unwrap();
        assert_eq!(c, RatingCounts { likes: 1, dislikes: 0 });

        let c = svc.set_rating("g1", "u1", Some(RatingKind::Dislike)).unwrap();
        assert_eq!(c, RatingCounts { likes: 0, dislikes: 1 });
    }

    #[test]
    fn unrate_restores_counts_and_drops_record() {
        let (_dir, svc) = service();
        let before = svc.counts("g1");
        svc.set_rating("g1", "u1", Some(RatingKind::Like)).unwrap();
        let after = svc.set_rating("g1", "u1", None).unwrap();
        assert_eq!(after, before);
        assert_eq!(svc.user_rating("g1", "u1"), None);
    }

    #[test]
    fn bare_double_like_double_increments() {
        // The literal contract: without the toggle policy, repeating the
        // same rating re-applies it. The retract step cancels one of them.
        let (_dir, svc) = service();
        svc.set_rating("g1", "u1", Some(RatingKind::Like)).unwrap();
        let c = svc.set_rating("g1", "u1", Some(RatingKind::Like)).unwrap();
        assert_eq!(c, RatingCounts { likes: 1, dislikes: 0 });

        // A second user's repeat via the raw contract does stack.
        svc.set_rating("g1", "u2", Some(RatingKind::Like)).unwrap();
        let c = svc.counts("g1");
        assert_eq!(c.likes, 2);
    }

    #[test]
    fn counters_floor_at_zero() {
        let (_dir, svc) = service();
        // Rating record exists but the counter key was never written (or was
        // wiped): retraction must not push the counter below zero.
        svc.store.put("user:u1:rating:g1", "like", now_ts()).unwrap();

        let c = svc.set_rating("g1", "u1", None).unwrap();
        assert_eq!(c, RatingCounts { likes: 0, dislikes: 0 });
    }

    #[test]
    fn ratings_are_independent_per_user() {
        let (_dir, svc) = service();
        svc.set_rating("g1", "u1", Some(RatingKind::Like)).unwrap();
        svc.set_rating("g1", "u2", Some(RatingKind::Like)).unwrap();
        svc.set_rating("g1", "u3", Some(RatingKind::Dislike)).unwrap();
        assert_eq!(svc.counts("g1"), RatingCounts { likes: 2, dislikes: 1 });
        assert_eq!(svc.user_rating("g1", "u2"), Some(RatingKind::Like));
    }

    #[test]
    fn ratings_are_independent_per_content() {
        let (_dir, svc) = service();
        svc.set_rating("g1", "u1", Some(RatingKind::Like)).unwrap();
        svc.set_rating("g2", "u1", Some(RatingKind::Dislike)).unwrap();
        assert_eq!(svc.counts("g1"), RatingCounts { likes: 1, dislikes: 0 });
        assert_eq!(svc.counts("g2"), RatingCounts { likes: 0, dislikes: 1 });
    }

    #[test]
    fn toggle_transition_table() {
        use RatingKind::*;
        // no-rating --like--> liked
        assert_eq!(apply_toggle(None, Like), Some(Like));
        // liked --like--> no-rating
        assert_eq!(apply_toggle(Some(Like), Like), None);
        // liked --dislike--> disliked
        assert_eq!(apply_toggle(Some(Like), Dislike), Some(Dislike));
        // disliked --dislike--> no-rating
        assert_eq!(apply_toggle(Some(Dislike), Dislike), None);
        // disliked --like--> liked
        assert_eq!(apply_toggle(Some(Dislike), Like), Some(Like));
        // no-rating --dislike--> disliked
        assert_eq!(apply_toggle(None, Dislike), Some(Dislike));
    }

    #[test]
    fn toggled_repeat_is_idempotent_on_counts() {
        let (_dir, svc) = service();
        let before = svc.counts("g1");

        // Two like requests through the toggle policy: like, then clear.
        let current = svc.user_rating("g1", "u1");
        svc.set_rating("g1", "u1", apply_toggle(current, RatingKind::Like))
            .unwrap();
        let current = svc.user_rating("g1", "u1");
        let after = svc
            .set_rating("g1", "u1", apply_toggle(current, RatingKind::Like))
            .unwrap();

        assert_eq!(after, before);
        assert_eq!(svc.user_rating("g1", "u1"), None);
    }
}
