use serde::{Deserialize, Serialize};

use commons_types::{Reaction, UserId};

/// One reaction pill: every reaction sharing an emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub reacted_by_current_user: bool,
    pub user_ids: Vec<UserId>,
}

/// Group reactions by emoji in first-seen order, so pills keep their
/// position as counts change.
pub fn aggregate(reactions: &[Reaction], current_user: UserId) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();

    for reaction in reactions {
        let group = match groups.iter().position(|g| g.emoji == reaction.emoji) {
            Some(idx) => &mut groups[idx],
            None => {
                groups.push(ReactionGroup {
                    emoji: reaction.emoji.clone(),
                    count: 0,
                    reacted_by_current_user: false,
                    user_ids: Vec::new(),
                });
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };

        // Uniqueness is enforced on insert, but snapshots come from the server
        // and are not trusted to be clean.
        if group.user_ids.contains(&reaction.user_id) {
            continue;
        }
        group.count += 1;
        group.user_ids.push(reaction.user_id);
        if reaction.user_id == current_user {
            group.reacted_by_current_user = true;
        }
    }

    groups
}

pub fn contains(reactions: &[Reaction], user_id: UserId, emoji: &str) -> bool {
    reactions
        .iter()
        .any(|r| r.user_id == user_id && r.emoji == emoji)
}

/// Add `(user, emoji)`. Returns false when it was already present.
pub fn insert(reactions: &mut Vec<Reaction>, user_id: UserId, emoji: &str) -> bool {
    if contains(reactions, user_id, emoji) {
        return false;
    }
    reactions.push(Reaction {
        user_id,
        emoji: emoji.to_string(),
    });
    true
}

/// Remove `(user, emoji)`. Returns false when it was absent.
pub fn remove(reactions: &mut Vec<Reaction>, user_id: UserId, emoji: &str) -> bool {
    let before = reactions.len();
    reactions.retain(|r| !(r.user_id == user_id && r.emoji == emoji));
    reactions.len() != before
}

/// Bring `(user, emoji)` to `present`. Returns true if anything changed.
pub fn set(reactions: &mut Vec<Reaction>, user_id: UserId, emoji: &str, present: bool) -> bool {
    if present {
        insert(reactions, user_id, emoji)
    } else {
        remove(reactions, user_id, emoji)
    }
}

/// Flip `(user, emoji)`, returning whether it is present afterwards.
pub fn toggle(reactions: &mut Vec<Reaction>, user_id: UserId, emoji: &str) -> bool {
    if remove(reactions, user_id, emoji) {
        false
    } else {
        insert(reactions, user_id, emoji);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(user_id: UserId, emoji: &str) -> Reaction {
        Reaction {
            user_id,
            emoji: emoji.to_string(),
        }
    }

    #[test]
    fn groups_in_first_seen_order() {
        let reactions = vec![r(2, "🔥"), r(1, "👍"), r(3, "🔥"), r(1, "🎉")];
        let groups = aggregate(&reactions, 1);

        let emojis: Vec<&str> = groups.iter().map(|g| g.emoji.as_str()).collect();
        assert_eq!(emojis, vec!["🔥", "👍", "🎉"]);
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].user_ids, vec![2, 3]);
        assert!(!groups[0].reacted_by_current_user);
        assert!(groups[1].reacted_by_current_user);
    }

    #[test]
    fn order_is_stable_when_counts_change() {
        let mut reactions = vec![r(2, "😂"), r(3, "👍")];
        insert(&mut reactions, 4, "👍");
        insert(&mut reactions, 5, "👍");

        let groups = aggregate(&reactions, 1);
        assert_eq!(groups[0].emoji, "😂");
        assert_eq!(groups[1].emoji, "👍");
        assert_eq!(groups[1].count, 3);
    }

    #[test]
    fn duplicate_rows_count_once() {
        let reactions = vec![r(1, "👍"), r(1, "👍")];
        let groups = aggregate(&reactions, 1);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 1);
    }

    #[test]
    fn insert_and_remove_are_idempotent() {
        let mut reactions = Vec::new();
        assert!(insert(&mut reactions, 1, "👍"));
        assert!(!insert(&mut reactions, 1, "👍"));
        assert_eq!(reactions.len(), 1);

        assert!(remove(&mut reactions, 1, "👍"));
        assert!(!remove(&mut reactions, 1, "👍"));
        assert!(reactions.is_empty());
    }

    #[test]
    fn double_toggle_restores_grouped_state() {
        let mut reactions = vec![r(2, "👍"), r(3, "❤️")];
        let before = aggregate(&reactions, 1);

        assert!(toggle(&mut reactions, 1, "👍"));
        assert_ne!(aggregate(&reactions, 1), before);
        assert!(!toggle(&mut reactions, 1, "👍"));

        assert_eq!(aggregate(&reactions, 1), before);
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(aggregate(&[], 1).is_empty());
    }
}
