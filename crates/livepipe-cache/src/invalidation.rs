//! Declarative cache invalidation.
//!
//! Each [`Mutation`] recorded in a transaction names the parameters of a
//! write. [`INVALIDATION_RULES`] says which caches each kind of mutation
//! touches, and [`Mutation::affected_keys`] expands those cache kinds into
//! concrete keys using the mutation's parameters.

use async_trait::async_trait;

use crate::error::CacheError;
use crate::registry::{CacheKey, CacheKind};

/// A committed-state change that makes cached data stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    UserRegistered {
        user_id: i64,
        name: String,
    },
    /// Covers renames; both names lose their name→id entry.
    UserProfileUpdated {
        user_id: i64,
        old_name: String,
        new_name: String,
    },
    ThemeUpdated {
        user_id: i64,
    },
    IconReplaced {
        user_id: i64,
    },
    LivestreamReserved {
        livestream_id: i64,
        owner_id: i64,
        tag_ids: Vec<i64>,
    },
    TagCreated {
        tag_id: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    UserRegistered,
    UserProfileUpdated,
    ThemeUpdated,
    IconReplaced,
    LivestreamReserved,
    TagCreated,
}

impl MutationKind {
    pub const ALL: [MutationKind; 6] = [
        MutationKind::UserRegistered,
        MutationKind::UserProfileUpdated,
        MutationKind::ThemeUpdated,
        MutationKind::IconReplaced,
        MutationKind::LivestreamReserved,
        MutationKind::TagCreated,
    ];
}

/// The caches one kind of mutation clears.
#[derive(Debug)]
pub struct InvalidationRule {
    pub mutation: MutationKind,
    pub clears: &'static [CacheKind],
}

pub static INVALIDATION_RULES: &[InvalidationRule] = &[
    InvalidationRule {
        mutation: MutationKind::UserRegistered,
        clears: &[CacheKind::User, CacheKind::UserIdByName, CacheKind::Theme],
    },
    InvalidationRule {
        mutation: MutationKind::UserProfileUpdated,
        clears: &[CacheKind::User, CacheKind::UserIdByName],
    },
    InvalidationRule {
        mutation: MutationKind::ThemeUpdated,
        clears: &[CacheKind::Theme],
    },
    InvalidationRule {
        mutation: MutationKind::IconReplaced,
        clears: &[CacheKind::IconDigest],
    },
    InvalidationRule {
        mutation: MutationKind::LivestreamReserved,
        clears: &[
            CacheKind::Livestream,
            CacheKind::LivestreamIdsByUser,
            CacheKind::TagIdsByLivestream,
            CacheKind::LivestreamIdsByTag,
        ],
    },
    InvalidationRule {
        mutation: MutationKind::TagCreated,
        clears: &[CacheKind::TagCatalog],
    },
];

/// Returns the rule for `kind`, if one is declared.
pub fn rule_for(kind: MutationKind) -> Option<&'static InvalidationRule> {
    INVALIDATION_RULES.iter().find(|rule| rule.mutation == kind)
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::UserRegistered { .. } => MutationKind::UserRegistered,
            Self::UserProfileUpdated { .. } => MutationKind::UserProfileUpdated,
            Self::ThemeUpdated { .. } => MutationKind::ThemeUpdated,
            Self::IconReplaced { .. } => MutationKind::IconReplaced,
            Self::LivestreamReserved { .. } => MutationKind::LivestreamReserved,
            Self::TagCreated { .. } => MutationKind::TagCreated,
        }
    }

    /// The user whose per-user entries this mutation affects. For a
    /// reservation this is the livestream owner.
    fn user_id(&self) -> Option<i64> {
        match self {
            Self::UserRegistered { user_id, .. }
            | Self::UserProfileUpdated { user_id, .. }
            | Self::ThemeUpdated { user_id }
            | Self::IconReplaced { user_id } => Some(*user_id),
            Self::LivestreamReserved { owner_id, .. } => Some(*owner_id),
            Self::TagCreated { .. } => None,
        }
    }

    fn user_names(&self) -> Vec<&str> {
        match self {
            Self::UserRegistered { name, .. } => vec![name.as_str()],
            Self::UserProfileUpdated {
                old_name, new_name, ..
            } if old_name == new_name => vec![old_name.as_str()],
            Self::UserProfileUpdated {
                old_name, new_name, ..
            } => vec![old_name.as_str(), new_name.as_str()],
            _ => Vec::new(),
        }
    }

    fn livestream_id(&self) -> Option<i64> {
        match self {
            Self::LivestreamReserved { livestream_id, .. } => Some(*livestream_id),
            _ => None,
        }
    }

    fn tag_ids(&self) -> &[i64] {
        match self {
            Self::LivestreamReserved { tag_ids, .. } => tag_ids,
            _ => &[],
        }
    }

    fn expand(&self, kind: CacheKind, keys: &mut Vec<CacheKey>) {
        match kind {
            CacheKind::User => keys.extend(self.user_id().map(CacheKey::User)),
            CacheKind::UserIdByName => keys.extend(
                self.user_names()
                    .into_iter()
                    .map(|name| CacheKey::UserIdByName(name.to_string())),
            ),
            CacheKind::Theme => keys.extend(self.user_id().map(CacheKey::Theme)),
            CacheKind::IconDigest => keys.extend(self.user_id().map(CacheKey::IconDigest)),
            CacheKind::Livestream => keys.extend(self.livestream_id().map(CacheKey::Livestream)),
            CacheKind::LivestreamIdsByUser => {
                keys.extend(self.user_id().map(CacheKey::LivestreamIdsByUser));
            }
            CacheKind::TagIdsByLivestream => {
                keys.extend(self.livestream_id().map(CacheKey::TagIdsByLivestream));
            }
            CacheKind::LivestreamIdsByTag => keys.extend(
                self.tag_ids()
                    .iter()
                    .copied()
                    .map(CacheKey::LivestreamIdsByTag),
            ),
            CacheKind::TagCatalog => keys.push(CacheKey::TagCatalog),
        }
    }

    /// Every cache key this mutation makes stale.
    pub fn affected_keys(&self) -> Vec<CacheKey> {
        let mut keys = Vec::new();
        if let Some(rule) = rule_for(self.kind()) {
            for &kind in rule.clears {
                self.expand(kind, &mut keys);
            }
        }
        keys
    }
}

/// A target that can drop cache entries.
#[async_trait]
pub trait InvalidationSink: Send + Sync {
    async fn invalidate(&self, key: &CacheKey) -> Result<(), CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample(kind: MutationKind) -> Mutation {
        match kind {
            MutationKind::UserRegistered => Mutation::UserRegistered {
                user_id: 1,
                name: "alice".into(),
            },
            MutationKind::UserProfileUpdated => Mutation::UserProfileUpdated {
                user_id: 1,
                old_name: "alice".into(),
                new_name: "alicia".into(),
            },
            MutationKind::ThemeUpdated => Mutation::ThemeUpdated { user_id: 1 },
            MutationKind::IconReplaced => Mutation::IconReplaced { user_id: 1 },
            MutationKind::LivestreamReserved => Mutation::LivestreamReserved {
                livestream_id: 10,
                owner_id: 1,
                tag_ids: vec![3, 4, 5],
            },
            MutationKind::TagCreated => Mutation::TagCreated { tag_id: 3 },
        }
    }

    #[test]
    fn every_mutation_kind_has_exactly_one_rule() {
        for kind in MutationKind::ALL {
            let count = INVALIDATION_RULES
                .iter()
                .filter(|rule| rule.mutation == kind)
                .count();
            assert_eq!(count, 1, "{kind:?} must have exactly one rule");
        }
        assert_eq!(INVALIDATION_RULES.len(), MutationKind::ALL.len());
    }

    #[test]
    fn every_rule_template_expands_to_a_key() {
        for kind in MutationKind::ALL {
            let mutation = sample(kind);
            assert_eq!(mutation.kind(), kind);
            let keys = mutation.affected_keys();
            let kinds: HashSet<CacheKind> = keys.iter().map(CacheKey::kind).collect();
            for cleared in rule_for(kind).unwrap().clears {
                assert!(
                    kinds.contains(cleared),
                    "{kind:?} declares {cleared:?} but expands no key for it"
                );
            }
        }
    }

    #[test]
    fn every_cache_is_cleared_by_some_rule() {
        let cleared: HashSet<CacheKind> = INVALIDATION_RULES
            .iter()
            .flat_map(|rule| rule.clears.iter().copied())
            .collect();
        for kind in CacheKind::ALL {
            assert!(cleared.contains(&kind), "{kind:?} is never invalidated");
        }
    }

    #[test]
    fn reservation_clears_every_attached_tag_list() {
        let keys = sample(MutationKind::LivestreamReserved).affected_keys();
        for tag_id in [3, 4, 5] {
            assert!(keys.contains(&CacheKey::LivestreamIdsByTag(tag_id)));
        }
        assert!(keys.contains(&CacheKey::LivestreamIdsByUser(1)));
        assert!(keys.contains(&CacheKey::TagIdsByLivestream(10)));
        assert!(!keys.contains(&CacheKey::LivestreamIdsByTag(10)));
    }

    #[test]
    fn rename_clears_both_name_keys_and_the_id_key() {
        let keys = sample(MutationKind::UserProfileUpdated).affected_keys();
        assert!(keys.contains(&CacheKey::User(1)));
        assert!(keys.contains(&CacheKey::UserIdByName("alice".into())));
        assert!(keys.contains(&CacheKey::UserIdByName("alicia".into())));

        let unchanged = Mutation::UserProfileUpdated {
            user_id: 1,
            old_name: "bob".into(),
            new_name: "bob".into(),
        };
        let name_keys = unchanged
            .affected_keys()
            .into_iter()
            .filter(|k| k.kind() == CacheKind::UserIdByName)
            .count();
        assert_eq!(name_keys, 1);
    }
}
