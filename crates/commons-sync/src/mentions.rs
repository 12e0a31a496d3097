use serde::{Deserialize, Serialize};

use commons_types::{CurrentUser, Role, UserId};

/// Highlight color used for broadcast and direct mentions.
pub const MENTION_COLOR: &str = "#faa61a";

const BROADCAST_MARKER: &str = "@everyone";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MentionKind {
    None,
    Role,
    Broadcast,
    Direct,
}

/// How a message should be highlighted for the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub kind: MentionKind,
    pub color: Option<String>,
}

impl Mention {
    pub const NONE: Mention = Mention {
        kind: MentionKind::None,
        color: None,
    };

    pub fn is_mentioned(&self) -> bool {
        self.kind != MentionKind::None
    }
}

/// Resolve the single mention kind that applies to `text`.
///
/// Priority: a role mention whose color parses, then `@everyone`, then a
/// direct mention (reply to the user, or `@username` / `@nickname`).
/// Longer role names are tried first so `@Super Admin` is not taken for
/// `@Admin`.
pub fn resolve(
    text: &str,
    roles: &[Role],
    me: &CurrentUser,
    reply_target_author: Option<UserId>,
) -> Mention {
    let lowered = text.to_lowercase();

    let mut by_length: Vec<&Role> = roles.iter().filter(|r| !r.name.is_empty()).collect();
    by_length.sort_by(|a, b| b.name.chars().count().cmp(&a.name.chars().count()));

    for role in by_length {
        if !lowered.contains(&format!("@{}", role.name.to_lowercase())) {
            continue;
        }
        if let Some(color) = role.color.as_deref().and_then(parse_color) {
            return Mention {
                kind: MentionKind::Role,
                color: Some(color),
            };
        }
    }

    if text.contains(BROADCAST_MARKER) {
        return Mention {
            kind: MentionKind::Broadcast,
            color: Some(MENTION_COLOR.to_string()),
        };
    }

    let named = |name: &str| !name.is_empty() && lowered.contains(&format!("@{}", name.to_lowercase()));
    let direct = reply_target_author == Some(me.id)
        || named(&me.username)
        || me.nickname.as_deref().is_some_and(named);

    if direct {
        return Mention {
            kind: MentionKind::Direct,
            color: Some(MENTION_COLOR.to_string()),
        };
    }

    Mention::NONE
}

/// Normalize a role color into a `#rrggbb` / `#rrggbbaa` token. Accepts hex
/// (3, 4, 6 or 8 digits) and `rgb()` / `rgba()` notation.
pub fn parse_color(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if let Some(hex) = raw.strip_prefix('#') {
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let hex = hex.to_ascii_lowercase();
        return match hex.len() {
            3 | 4 => Some(format!("#{}", hex.chars().flat_map(|c| [c, c]).collect::<String>())),
            6 | 8 => Some(format!("#{}", hex)),
            _ => None,
        };
    }

    let lower = raw.to_ascii_lowercase();
    let inner = lower
        .strip_prefix("rgba(")
        .or_else(|| lower.strip_prefix("rgb("))?
        .strip_suffix(')')?;
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    if parts.len() != 3 && parts.len() != 4 {
        return None;
    }

    let mut out = String::from("#");
    for part in &parts[..3] {
        let channel: u8 = part.parse().ok()?;
        out.push_str(&format!("{:02x}", channel));
    }
    if let Some(alpha) = parts.get(3) {
        let alpha: f64 = alpha.parse().ok()?;
        if !(0.0..=1.0).contains(&alpha) {
            return None;
        }
        out.push_str(&format!("{:02x}", (alpha * 255.0).round() as u8));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn me() -> CurrentUser {
        CurrentUser {
            id: 7,
            username: "Alice".into(),
            nickname: Some("Ally".into()),
        }
    }

    fn role(name: &str, color: Option<&str>) -> Role {
        Role {
            id: 1,
            name: name.into(),
            color: color.map(str::to_string),
        }
    }

    #[test]
    fn role_with_color_wins_over_everything() {
        let roles = vec![role("Mods", Some("#3BA55C"))];
        let m = resolve("@mods and @everyone and @alice", &roles, &me(), None);
        assert_eq!(m.kind, MentionKind::Role);
        assert_eq!(m.color.as_deref(), Some("#3ba55c"));
    }

    #[test]
    fn longer_role_name_matches_first() {
        let roles = vec![role("Admin", Some("#ff0000")), role("Super Admin", Some("#00ff00"))];
        let m = resolve("ping @super admin", &roles, &me(), None);
        assert_eq!(m.color.as_deref(), Some("#00ff00"));
    }

    #[test]
    fn role_without_color_falls_through() {
        let roles = vec![role("Mods", None), role("Crew", Some("not a color"))];
        let m = resolve("@mods @crew @everyone", &roles, &me(), None);
        assert_eq!(m.kind, MentionKind::Broadcast);
        assert_eq!(m.color.as_deref(), Some(MENTION_COLOR));
    }

    #[test]
    fn broadcast_marker_is_case_sensitive() {
        let m = resolve("hello @Everyone", &[], &me(), None);
        assert_eq!(m, Mention::NONE);
    }

    #[test]
    fn direct_by_username_or_nickname() {
        assert_eq!(resolve("hey @ALICE", &[], &me(), None).kind, MentionKind::Direct);
        assert_eq!(resolve("hey @ally!", &[], &me(), None).kind, MentionKind::Direct);
        assert!(!resolve("hey alice", &[], &me(), None).is_mentioned());
    }

    #[test]
    fn reply_to_own_message_is_direct() {
        let m = resolve("agreed", &[], &me(), Some(7));
        assert_eq!(m.kind, MentionKind::Direct);
        assert!(!resolve("agreed", &[], &me(), Some(8)).is_mentioned());
    }

    #[test]
    fn parses_color_notations() {
        assert_eq!(parse_color("#ABC").as_deref(), Some("#aabbcc"));
        assert_eq!(parse_color("rgb(255, 0, 16)").as_deref(), Some("#ff0010"));
        assert_eq!(parse_color("rgba(0,0,0,1)").as_deref(), Some("#000000ff"));
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("rgb(300,0,0)"), None);
        assert_eq!(parse_color(""), None);
    }
}
