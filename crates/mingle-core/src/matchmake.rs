//! Random-chat matchmaking.
//!
//! Pairing is snapshot-and-select: every call takes its own presence
//! snapshot, filters it, picks a candidate uniformly at random, and creates
//! a conversation. No lock spans the sequence and no waiting queue carries
//! state between calls; a candidate that vanishes between snapshot and
//! pairing surfaces as [`MatchError::PartnerUnavailable`] and the caller
//! re-invokes.

use crate::group::{GroupError, GroupManager};
use crate::presence::PresenceRegistry;
use mingle_protocol::types::{ConversationId, SearchFilters, UserProfile};
use mingle_store::traits::{ConversationStore, ProfileDirectory, StoreError};
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Age distance considered "same age group".
const SAME_AGE_SPREAD: u8 = 5;

/// Matchmaking errors.
#[derive(Debug, Error)]
pub enum MatchError {
    /// The requesting connection has no resolved user.
    ///
    /// Matchmaking raises this explicitly; the send/mark operations treat
    /// the same condition as a silent no-op. The asymmetry is inherited
    /// behavior and is kept as-is.
    #[error("User not authenticated")]
    Unauthenticated,

    /// No present user satisfied the filters.
    #[error("No candidates available")]
    NoCandidatesAvailable,

    /// The selected candidate disconnected before pairing completed.
    #[error("Selected partner is no longer available")]
    PartnerUnavailable,

    /// The requester's profile could not be resolved.
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// Group membership failed.
    #[error(transparent)]
    Group(#[from] GroupError),

    /// Store collaborator failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Apply demographic filters to a candidate list.
///
/// Candidates missing a constrained attribute are excluded; unconstrained
/// attributes pass everyone through. The same-age-group rule needs the
/// requester's age and is skipped when the requester has none.
#[must_use]
pub fn apply_filters(
    candidates: Vec<UserProfile>,
    requester: &UserProfile,
    filters: &SearchFilters,
) -> Vec<UserProfile> {
    candidates
        .into_iter()
        .filter(|candidate| {
            if filters.age_range_enabled {
                match candidate.age {
                    Some(age) if age >= filters.min_age && age <= filters.max_age => {}
                    _ => return false,
                }
            }

            if !filters.gender_preferences.is_empty() {
                match &candidate.gender {
                    Some(gender) if filters.gender_preferences.contains(gender) => {}
                    _ => return false,
                }
            }

            if filters.same_age_group_only {
                if let Some(requester_age) = requester.age {
                    match candidate.age {
                        Some(age) if age.abs_diff(requester_age) <= SAME_AGE_SPREAD => {}
                        _ => return false,
                    }
                }
            }

            true
        })
        .collect()
}

/// Pairs a requesting connection with another present, eligible user.
pub struct Matchmaker {
    presence: Arc<PresenceRegistry>,
    groups: Arc<GroupManager>,
    profiles: Arc<dyn ProfileDirectory>,
    store: Arc<dyn ConversationStore>,
}

impl Matchmaker {
    /// Create a matchmaker over the shared registries and collaborators.
    #[must_use]
    pub fn new(
        presence: Arc<PresenceRegistry>,
        groups: Arc<GroupManager>,
        profiles: Arc<dyn ProfileDirectory>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            presence,
            groups,
            profiles,
            store,
        }
    }

    /// Find a partner for the requesting connection and create the chat.
    ///
    /// Both connections are members of the new conversation group before
    /// this returns; the id goes to the requester only. Candidates whose
    /// profile cannot be resolved are skipped; every connection of the
    /// requesting user is excluded, so a multi-device user never matches
    /// themself.
    ///
    /// # Errors
    ///
    /// [`MatchError::Unauthenticated`] when the connection has no resolved
    /// user, [`MatchError::ProfileNotFound`] when the requester has no
    /// profile, [`MatchError::NoCandidatesAvailable`] when the filtered
    /// snapshot is empty, and [`MatchError::PartnerUnavailable`] when the
    /// selected candidate vanished after the snapshot.
    pub async fn find_match(
        &self,
        connection_id: &str,
        filters: Option<&SearchFilters>,
    ) -> Result<ConversationId, MatchError> {
        let user_id = self
            .presence
            .user_of(connection_id)
            .ok_or(MatchError::Unauthenticated)?;

        let requester = self
            .profiles
            .profile(&user_id)
            .await?
            .ok_or_else(|| MatchError::ProfileNotFound(user_id.clone()))?;

        let candidate_ids: Vec<_> = self
            .presence
            .active_users()
            .into_iter()
            .filter(|candidate| candidate != &user_id)
            .collect();

        let mut candidates = Vec::with_capacity(candidate_ids.len());
        for candidate_id in candidate_ids {
            if let Some(profile) = self.profiles.profile(&candidate_id).await? {
                candidates.push(profile);
            }
        }

        if let Some(filters) = filters {
            candidates = apply_filters(candidates, &requester, filters);
        }

        if candidates.is_empty() {
            debug!(connection = %connection_id, "Matchmaking found no candidates");
            return Err(MatchError::NoCandidatesAvailable);
        }

        let selected = &candidates[rand::thread_rng().gen_range(0..candidates.len())];

        let partner_connection = self
            .presence
            .connection_of(&selected.user_id)
            .ok_or(MatchError::PartnerUnavailable)?;

        let conversation_id = self
            .store
            .create_conversation(&[user_id.clone(), selected.user_id.clone()])
            .await?;

        self.groups.join(connection_id, conversation_id)?;
        self.groups.join(&partner_connection, conversation_id)?;

        info!(
            conversation = conversation_id,
            requester = %user_id,
            partner = %selected.user_id,
            "Matched"
        );
        Ok(conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mingle_store::{MemoryDirectory, MemoryStore};

    fn profile(id: &str, age: u8, gender: &str) -> UserProfile {
        UserProfile::new(id, id.to_uppercase())
            .with_age(age)
            .with_gender(gender)
    }

    struct Fixture {
        presence: Arc<PresenceRegistry>,
        groups: Arc<GroupManager>,
        directory: Arc<MemoryDirectory>,
        store: Arc<MemoryStore>,
        matchmaker: Matchmaker,
    }

    fn fixture() -> Fixture {
        let presence = Arc::new(PresenceRegistry::new());
        let groups = Arc::new(GroupManager::new());
        let directory = Arc::new(MemoryDirectory::new());
        let store = Arc::new(MemoryStore::new());
        let matchmaker = Matchmaker::new(
            presence.clone(),
            groups.clone(),
            directory.clone() as Arc<dyn ProfileDirectory>,
            store.clone() as Arc<dyn ConversationStore>,
        );
        Fixture {
            presence,
            groups,
            directory,
            store,
            matchmaker,
        }
    }

    #[test]
    fn test_same_age_group_filter() {
        let requester = profile("me", 22, "male");
        let candidates = vec![profile("young", 20, "female"), profile("older", 40, "female")];
        let filters = SearchFilters {
            same_age_group_only: true,
            ..SearchFilters::default()
        };

        let eligible = apply_filters(candidates, &requester, &filters);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].user_id, "young");
    }

    #[test]
    fn test_age_range_and_gender_filters() {
        let requester = profile("me", 25, "male");
        let candidates = vec![
            profile("a", 19, "female"),
            profile("b", 27, "female"),
            profile("c", 27, "male"),
            UserProfile::new("no-age", "No Age").with_gender("female"),
        ];
        let filters = SearchFilters {
            age_range_enabled: true,
            min_age: 20,
            max_age: 30,
            gender_preferences: vec!["female".to_string()],
            same_age_group_only: false,
        };

        let eligible = apply_filters(candidates, &requester, &filters);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].user_id, "b");
    }

    #[test]
    fn test_unconstrained_filters_pass_through() {
        let requester = profile("me", 25, "male");
        let candidates = vec![profile("a", 19, "female"), UserProfile::new("bare", "Bare")];

        let eligible = apply_filters(candidates.clone(), &requester, &SearchFilters::default());
        assert_eq!(eligible.len(), candidates.len());
    }

    #[tokio::test]
    async fn test_unauthenticated_raises() {
        let fx = fixture();

        assert!(matches!(
            fx.matchmaker.find_match("conn-unknown", None).await,
            Err(MatchError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_requester_profile_required() {
        let fx = fixture();
        fx.presence.join("conn-1", "ghost");

        assert!(matches!(
            fx.matchmaker.find_match("conn-1", None).await,
            Err(MatchError::ProfileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_never_matches_self() {
        let fx = fixture();
        fx.directory.insert(profile("alice", 25, "female"));
        // alice on two devices, nobody else present
        fx.presence.join("conn-1", "alice");
        fx.presence.join("conn-2", "alice");

        assert!(matches!(
            fx.matchmaker.find_match("conn-1", None).await,
            Err(MatchError::NoCandidatesAvailable)
        ));
    }

    #[tokio::test]
    async fn test_scenario_filtered_match() {
        let fx = fixture();
        fx.directory.insert(profile("a", 25, "male"));
        fx.directory.insert(profile("b", 27, "female"));
        fx.presence.join("conn-a", "a");
        fx.presence.join("conn-b", "b");

        let filters = SearchFilters {
            age_range_enabled: true,
            min_age: 20,
            max_age: 30,
            gender_preferences: vec!["female".to_string()],
            same_age_group_only: false,
        };

        let conversation_id = fx
            .matchmaker
            .find_match("conn-a", Some(&filters))
            .await
            .unwrap();

        let conversation = fx.store.conversation(conversation_id).await.unwrap().unwrap();
        let mut members = conversation.members.clone();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);

        // Both connections are in the group before the call returned
        let mut group = fx.groups.members(conversation_id);
        group.sort();
        assert_eq!(group, vec!["conn-a", "conn-b"]);
    }

    #[tokio::test]
    async fn test_candidates_without_profile_are_skipped() {
        let fx = fixture();
        fx.directory.insert(profile("a", 25, "male"));
        fx.presence.join("conn-a", "a");
        fx.presence.join("conn-x", "unprofiled");

        assert!(matches!(
            fx.matchmaker.find_match("conn-a", None).await,
            Err(MatchError::NoCandidatesAvailable)
        ));
    }

    #[tokio::test]
    async fn test_no_filters_matches_any_present_user() {
        let fx = fixture();
        fx.directory.insert(profile("a", 25, "male"));
        fx.directory.insert(profile("b", 48, "female"));
        fx.presence.join("conn-a", "a");
        fx.presence.join("conn-b", "b");

        let conversation_id = fx.matchmaker.find_match("conn-a", None).await.unwrap();
        assert_eq!(fx.groups.member_count(conversation_id), 2);
    }
}
