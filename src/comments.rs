use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    ratings::RatingKind,
    store::{comments_key, user_comment_rating_key, KvStore},
    utils::now_ts,
};

static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(\w+)").expect("mention regex"));

/// Ordered `@word` captures from comment text. Duplicates are kept as-is;
/// whoever fans out notifications decides how to treat repeats.
pub fn extract_mentions(text: &str) -> Vec<String> {
    MENTION_RE
        .captures_iter(text)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// One node of a content item's comment tree. The whole tree is stored as a
/// single JSON value under `comments:{contentId}`, so field names here are
/// the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user: String,
    pub text: String,
    pub date: String,
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub dislikes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Comment>,
}

impl Comment {
    pub fn new(id: String, user: String, text: String, date: String, parent_id: Option<String>) -> Self {
        Self {
            id,
            user,
            text,
            date,
            likes: 0,
            dislikes: 0,
            parent_id,
            mentions: None,
            replies: Vec::new(),
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum AddOutcome {
    Saved(Vec<Comment>),
    ParentNotFound,
}

#[derive(Debug, PartialEq)]
pub enum RateOutcome {
    Saved(Vec<Comment>),
    CommentNotFound,
}

fn insert_reply(nodes: &mut Vec<Comment>, parent_id: &str, reply: &Comment) -> bool {
    for node in nodes.iter_mut() {
        if node.id == parent_id {
            node.replies.push(reply.clone());
            return true;
        }
        if insert_reply(&mut node.replies, parent_id, reply) {
            return true;
        }
    }
    false
}

fn find_comment_mut<'a>(nodes: &'a mut Vec<Comment>, id: &str) -> Option<&'a mut Comment> {
    for node in nodes.iter_mut() {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_comment_mut(&mut node.replies, id) {
            return Some(found);
        }
    }
    None
}

#[derive(Clone)]
pub struct CommentService {
    store: KvStore,
    write_lock: Arc<Mutex<()>>,
}

impl CommentService {
    pub fn new(store: KvStore, write_lock: Arc<Mutex<()>>) -> Self {
        Self { store, write_lock }
    }

    fn load_tree_checked(&self, content_id: &str) -> Result<Vec<Comment>> {
        match self.store.get(&comments_key(content_id))? {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("decode comment tree for {content_id}")),
        }
    }

    fn save_tree(&self, content_id: &str, tree: &[Comment]) -> Result<()> {
        let raw = serde_json::to_string(tree)?;
        self.store.put(&comments_key(content_id), &raw, now_ts())
    }

    /// Read path that degrades to an empty tree on store failure.
    pub fn list(&self, content_id: &str) -> Vec<Comment> {
        match self.load_tree_checked(content_id) {
            Ok(tree) => tree,
            Err(e) => {
                log::warn!("comments.read_failed content={content_id} err={e}");
                Vec::new()
            }
        }
    }

    /// Inserts `comment` into the tree for `content_id`: top-level when
    /// `parent_id` is absent, otherwise under the matching parent at any
    /// depth. A missing parent leaves the stored tree untouched. Mentions
    /// are extracted from the text here so callers cannot forge them.
    pub fn add_comment(&self, content_id: &str, mut comment: Comment) -> Result<AddOutcome> {
        let _guard = self.write_lock.lock();

        let mentions = extract_mentions(&comment.text);
        comment.mentions = if mentions.is_empty() { None } else { Some(mentions) };

        let mut tree = self.load_tree_checked(content_id)?;
        match comment.parent_id.clone() {
            None => tree.push(comment),
            Some(parent_id) => {
                if !insert_reply(&mut tree, &parent_id, &comment) {
                    log::warn!(
                        "comments.parent_missing content={content_id} parent={parent_id} comment={}",
                        comment.id
                    );
                    return Ok(AddOutcome::ParentNotFound);
                }
            }
        }

        self.save_tree(content_id, &tree)?;
        Ok(AddOutcome::Saved(tree))
    }

    /// Per-comment variant of the rating contract: retract the user's prior
    /// vote on the comment (floored at 0), apply the new one, persist the
    /// rating record under its own `user:{u}:comment:{c}` namespace, and
    /// rewrite the tree. Returns the full updated tree.
    pub fn update_comment_rating(
        &self,
        content_id: &str,
        comment_id: &str,
        user_id: &str,
        new_rating: Option<RatingKind>,
    ) -> Result<RateOutcome> {
        let _guard = self.write_lock.lock();
        let ts = now_ts();
        let rating_key = user_comment_rating_key(user_id, comment_id);
        let prior = self.store.get(&rating_key)?.and_then(|s| RatingKind::parse(&s));

        let mut tree = self.load_tree_checked(content_id)?;
        let Some(node) = find_comment_mut(&mut tree, comment_id) else {
            log::warn!("comments.rate_missing content={content_id} comment={comment_id}");
            return Ok(RateOutcome::CommentNotFound);
        };

        if let Some(prior) = prior {
            match prior {
                RatingKind::Like => node.likes = (node.likes - 1).max(0),
                RatingKind::Dislike => node.dislikes = (node.dislikes - 1).max(0),
            }
        }

        match new_rating {
            None => self.store.delete(&rating_key)?,
            Some(kind) => {
                match kind {
                    RatingKind::Like => node.likes += 1,
                    RatingKind::Dislike => node.dislikes += 1,
                }
                self.store.put(&rating_key, kind.as_str(), ts)?;
            }
        }

        self.save_tree(content_id, &tree)?;
        Ok(RateOutcome::Saved(tree))
    }

    pub fn user_comment_rating_checked(
        &self,
        comment_id: &str,
        user_id: &str,
    ) -> Result<Option<RatingKind>> {
        let v = self.store.get(&user_comment_rating_key(user_id, comment_id))?;
        Ok(v.and_then(|s| RatingKind::parse(&s)))
    }

    /// The caller's own ratings across a tree, keyed by comment id. Clients
    /// use this to render toggle state next to each comment. Read path:
    /// individual lookup failures degrade to "no rating".
    pub fn user_comment_ratings(
        &self,
        tree: &[Comment],
        user_id: &str,
    ) -> BTreeMap<String, RatingKind> {
        let mut out = BTreeMap::new();
        let mut stack: Vec<&Comment> = tree.iter().collect();
        while let Some(node) = stack.pop() {
            match self.user_comment_rating_checked(&node.id, user_id) {
                Ok(Some(kind)) => {
                    out.insert(node.id.clone(), kind);
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!("comments.read_failed comment={} user={user_id} err={e}", node.id);
                }
            }
            stack.extend(node.replies.iter());
        }
        out
    }
}
