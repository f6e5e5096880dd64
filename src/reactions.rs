//! Pure reaction aggregation. Shared by the message bubble (compact chips) and
//! the reaction details sheet; no internal state, safe to call on every render.

use serde::{Deserialize, Serialize};

use crate::state::{ReactionRecord, UserProfile};

/// Compact per-emoji rollup for display on a message bubble.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: u32,
    pub user_ids: Vec<String>,
    pub reacted_by_me: bool,
}

/// Per-emoji, per-user attribution for the details sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionDetail {
    pub emoji: String,
    pub users: Vec<UserProfile>,
}

/// Groups raw reactions by emoji, preserving the insertion order of each
/// emoji's first occurrence.
pub fn aggregate(reactions: &[ReactionRecord], my_user_id: &str) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();
    for r in reactions {
        match groups.iter_mut().find(|g| g.emoji == r.emoji) {
            Some(g) => {
                g.count += 1;
                g.user_ids.push(r.user_id.clone());
                g.reacted_by_me |= r.user_id == my_user_id;
            }
            None => groups.push(ReactionGroup {
                emoji: r.emoji.clone(),
                count: 1,
                user_ids: vec![r.user_id.clone()],
                reacted_by_me: r.user_id == my_user_id,
            }),
        }
    }
    groups
}

/// Grouped-by-emoji-then-per-user view. `lookup` resolves a user id to a
/// cached profile; unknown users fall back to a bare id entry so attribution
/// never silently drops a reactor.
pub fn detailed<F>(reactions: &[ReactionRecord], lookup: F) -> Vec<ReactionDetail>
where
    F: Fn(&str) -> Option<UserProfile>,
{
    let mut groups: Vec<ReactionDetail> = Vec::new();
    for r in reactions {
        let user = lookup(&r.user_id).unwrap_or_else(|| UserProfile {
            user_id: r.user_id.clone(),
            name: None,
            picture_url: None,
        });
        match groups.iter_mut().find(|g| g.emoji == r.emoji) {
            Some(g) => g.users.push(user),
            None => groups.push(ReactionDetail {
                emoji: r.emoji.clone(),
                users: vec![user],
            }),
        }
    }
    groups
}

/// Applies one local toggle to a raw reaction list: removes the (user, emoji)
/// pair if present, appends it otherwise. Used for the optimistic update; the
/// authoritative transport echo replaces the whole list afterwards.
pub fn toggle(reactions: &mut Vec<ReactionRecord>, user_id: &str, emoji: &str, now: i64) {
    let before = reactions.len();
    reactions.retain(|r| !(r.user_id == user_id && r.emoji == emoji));
    if reactions.len() == before {
        reactions.push(ReactionRecord {
            user_id: user_id.to_string(),
            emoji: emoji.to_string(),
            created_at: now,
        });
    }
}
