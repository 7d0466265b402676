//! Membership configuration model.
//!
//! A [`Configuration`] is one membership-change entry in joint-consensus
//! form: `old_members` is the configuration being replaced and `new_members`
//! the one taking effect. Outside of a change, `old_members` is empty.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{LogIndex, MemberId, Term, Timestamp};

/// Role of a member within a configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MemberRole {
    /// Votes in elections and counts towards commit quorums.
    Active = 1,
    /// Receives replicated entries but never votes.
    Passive = 2,
}

impl MemberRole {
    /// Stable one-byte code used by the binary codec.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Maps a wire code back to a role, `None` for unknown codes.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MemberRole::Active),
            2 => Some(MemberRole::Passive),
            _ => None,
        }
    }
}

/// A member entry of a configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Member identity.
    pub id: MemberId,
    /// Role in this configuration.
    pub role: MemberRole,
    /// When the role was last changed.
    pub last_updated: Timestamp,
}

impl Member {
    /// Creates a member entry.
    pub fn new(id: impl Into<MemberId>, role: MemberRole, last_updated: Timestamp) -> Self {
        Self {
            id: id.into(),
            role,
            last_updated,
        }
    }

    /// Creates an active member updated now.
    pub fn active(id: impl Into<MemberId>) -> Self {
        Self::new(id, MemberRole::Active, Timestamp::now())
    }

    /// Creates a passive member updated now.
    pub fn passive(id: impl Into<MemberId>) -> Self {
        Self::new(id, MemberRole::Passive, Timestamp::now())
    }

    /// Returns true if this member votes.
    pub fn is_active(&self) -> bool {
        self.role == MemberRole::Active
    }
}

/// A joint-consensus membership configuration entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Log index of the entry that carries this configuration.
    pub index: LogIndex,
    /// Term of that entry.
    pub term: Term,
    /// When the configuration was created.
    pub time: Timestamp,
    /// Members of the configuration taking effect.
    pub new_members: Vec<Member>,
    /// Members of the configuration being replaced. Empty outside a change.
    pub old_members: Vec<Member>,
}

impl Configuration {
    /// Creates a configuration that is not part of a membership change.
    pub fn new(index: LogIndex, term: Term, time: Timestamp, members: Vec<Member>) -> Self {
        Self {
            index,
            term,
            time,
            new_members: members,
            old_members: Vec::new(),
        }
    }

    /// Creates a joint configuration transitioning from `old_members` to `new_members`.
    pub fn joint(
        index: LogIndex,
        term: Term,
        time: Timestamp,
        new_members: Vec<Member>,
        old_members: Vec<Member>,
    ) -> Self {
        Self {
            index,
            term,
            time,
            new_members,
            old_members,
        }
    }

    /// Returns true while both the old and new member sets must agree.
    pub fn requires_joint_consensus(&self) -> bool {
        !self.old_members.is_empty()
    }

    /// Union of new and old members by id. New entries take precedence.
    pub fn all_members(&self) -> Vec<Member> {
        let mut by_id: BTreeMap<&MemberId, &Member> = BTreeMap::new();
        for member in &self.old_members {
            by_id.insert(&member.id, member);
        }
        for member in &self.new_members {
            by_id.insert(&member.id, member);
        }
        by_id.into_values().cloned().collect()
    }

    /// Voting members of the configuration taking effect.
    pub fn active_members(&self) -> impl Iterator<Item = &Member> {
        self.new_members.iter().filter(|m| m.is_active())
    }

    /// Returns the member entry for `id` in the new configuration.
    pub fn member(&self, id: &MemberId) -> Option<&Member> {
        self.new_members.iter().find(|m| &m.id == id)
    }

    /// Majority of the voting members of the new configuration.
    pub fn quorum_size(&self) -> usize {
        self.active_members().count() / 2 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, role: MemberRole, millis: i64) -> Member {
        Member::new(id, role, Timestamp::from_millis(millis))
    }

    #[test]
    fn test_role_codes_round_trip() {
        for role in [MemberRole::Active, MemberRole::Passive] {
            assert_eq!(MemberRole::from_code(role.code()), Some(role));
        }
        assert_eq!(MemberRole::from_code(0), None);
        assert_eq!(MemberRole::from_code(3), None);
    }

    #[test]
    fn test_plain_configuration_is_not_joint() {
        let config = Configuration::new(
            LogIndex::new(1),
            Term::new(1),
            Timestamp::from_millis(10),
            vec![member("a", MemberRole::Active, 1)],
        );
        assert!(!config.requires_joint_consensus());
    }

    #[test]
    fn test_all_members_prefers_new_entries() {
        let config = Configuration::joint(
            LogIndex::new(5),
            Term::new(2),
            Timestamp::from_millis(10),
            vec![
                member("a", MemberRole::Active, 20),
                member("c", MemberRole::Passive, 20),
            ],
            vec![
                member("a", MemberRole::Passive, 5),
                member("b", MemberRole::Active, 5),
            ],
        );

        assert!(config.requires_joint_consensus());
        let all = config.all_members();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], member("a", MemberRole::Active, 20));
        assert_eq!(all[1].id, MemberId::from("b"));
        assert_eq!(all[2].id, MemberId::from("c"));
    }

    #[test]
    fn test_quorum_counts_only_active_members() {
        let config = Configuration::new(
            LogIndex::new(1),
            Term::new(1),
            Timestamp::from_millis(0),
            vec![
                member("a", MemberRole::Active, 0),
                member("b", MemberRole::Active, 0),
                member("c", MemberRole::Active, 0),
                member("d", MemberRole::Passive, 0),
            ],
        );
        assert_eq!(config.active_members().count(), 3);
        assert_eq!(config.quorum_size(), 2);
    }

    #[test]
    fn test_member_lookup() {
        let config = Configuration::new(
            LogIndex::new(1),
            Term::new(1),
            Timestamp::from_millis(0),
            vec![member("a", MemberRole::Passive, 3)],
        );
        assert_eq!(
            config.member(&MemberId::from("a")).map(|m| m.role),
            Some(MemberRole::Passive)
        );
        assert!(config.member(&MemberId::from("z")).is_none());
    }
}
