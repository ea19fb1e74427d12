//! # comprehensive tracker tests
//!
//! why: verify quorum, election and membership scenarios end to end
//! relations: tests dtang-core, with dtang-linkeddata for the authorization path
//! what: commit, voting, joint consensus, restore, authorized changes

use dtang_core::{
    ConfChangeError, ConfChangeSingle, ConfChangeTransition, ConfChangeV2, ConfState, NodeId, ProgressTracker,
    TrackerConfig, VoteResult,
};

fn ids(list: &[&str]) -> Vec<NodeId> {
    list.iter().map(|s| NodeId::from(*s)).collect()
}

fn tracker(voters: &[&str]) -> ProgressTracker {
    let mut t = ProgressTracker::new(TrackerConfig { max_inflight: 16 });
    for id in voters {
        t.apply_simple(&[ConfChangeSingle::add_node(*id)], 1).unwrap();
    }
    t
}

fn ack(t: &mut ProgressTracker, id: &str, index: u64) {
    t.progress_mut(&NodeId::from(id)).unwrap().maybe_update(index);
}

// assert the learner/voter disjointness invariant
fn assert_disjoint(t: &ProgressTracker) {
    let cfg = t.config();
    for id in &cfg.learners {
        assert!(!cfg.voters.contains(id), "{id} is both learner and voter");
    }
}

// =============================================================================
// SECTION 1: COMMIT INDEX TESTS
// =============================================================================

mod commit {
    use super::*;

    #[test]
    fn commit_is_zero_without_acks() {
        let t = tracker(&["a", "b", "c"]);
        assert_eq!(t.committed(), 0);
    }

    #[test]
    fn commit_needs_a_majority() {
        let mut t = tracker(&["a", "b", "c", "d", "e"]);
        ack(&mut t, "a", 10);
        ack(&mut t, "b", 10);
        assert_eq!(t.committed(), 0);
        ack(&mut t, "c", 8);
        assert_eq!(t.committed(), 8);
    }

    #[test]
    fn joint_commit_is_held_back_by_new_members() {
        let mut t = tracker(&["a", "b", "c"]);
        t.enter_joint(
            false,
            &[
                ConfChangeSingle::remove_node("b"),
                ConfChangeSingle::remove_node("c"),
                ConfChangeSingle::add_node("d"),
                ConfChangeSingle::add_node("e"),
            ],
            1,
        )
        .unwrap();

        ack(&mut t, "a", 5);
        ack(&mut t, "b", 5);
        ack(&mut t, "c", 3);
        ack(&mut t, "d", 1);
        ack(&mut t, "e", 1);

        // outgoing (a b c) has committed 5, incoming (a d e) only 1
        assert_eq!(t.committed(), 1);
    }

    #[test]
    fn single_voter_commits_alone() {
        let mut t = tracker(&["a"]);
        ack(&mut t, "a", 42);
        assert_eq!(t.committed(), 42);
        assert!(t.is_singleton());
    }
}

// =============================================================================
// SECTION 2: ELECTION TESTS
// =============================================================================

mod election {
    use super::*;

    #[test]
    fn majority_wins() {
        let mut t = tracker(&["a", "b", "c"]);
        t.record_vote("a".into(), true);
        assert_eq!(t.tally_votes(), (1, 0, VoteResult::Pending));
        t.record_vote("b".into(), true);
        assert_eq!(t.tally_votes(), (2, 0, VoteResult::Won));
    }

    #[test]
    fn majority_rejection_loses() {
        let mut t = tracker(&["a", "b", "c"]);
        t.record_vote("a".into(), true);
        t.record_vote("b".into(), false);
        t.record_vote("c".into(), false);
        assert_eq!(t.tally_votes(), (1, 2, VoteResult::Lost));
    }

    #[test]
    fn first_vote_sticks() {
        let mut t = tracker(&["a", "b", "c"]);
        t.record_vote("a".into(), true);
        t.record_vote("a".into(), false);
        t.record_vote("b".into(), true);
        assert_eq!(t.tally_votes(), (2, 0, VoteResult::Won));
    }

    #[test]
    fn reset_starts_a_new_round() {
        let mut t = tracker(&["a", "b", "c"]);
        t.record_vote("a".into(), false);
        t.reset_votes();
        t.record_vote("a".into(), true);
        assert_eq!(t.tally_votes(), (1, 0, VoteResult::Pending));
    }

    #[test]
    fn untracked_voters_are_not_counted() {
        let mut t = tracker(&["a", "b", "c"]);
        t.record_vote("stranger".into(), true);
        t.record_vote("a".into(), true);
        let (granted, rejected, result) = t.tally_votes();
        assert_eq!((granted, rejected), (1, 0));
        assert_eq!(result, VoteResult::Pending);
    }

    #[test]
    fn learner_votes_are_not_counted() {
        let mut t = tracker(&["a", "b", "c"]);
        t.apply_simple(&[ConfChangeSingle::add_learner("l")], 1).unwrap();
        t.record_vote("l".into(), true);
        assert_eq!(t.tally_votes(), (0, 0, VoteResult::Pending));
    }

    #[test]
    fn joint_election_needs_both_halves() {
        let mut t = tracker(&["a", "b", "c"]);
        t.enter_joint(
            true,
            &[ConfChangeSingle::remove_node("c"), ConfChangeSingle::add_node("d")],
            1,
        )
        .unwrap();

        t.record_vote("a".into(), true);
        t.record_vote("c".into(), true);
        // outgoing (a b c) won, incoming (a b d) still pending
        assert_eq!(t.tally_votes().2, VoteResult::Pending);
        t.record_vote("d".into(), true);
        assert_eq!(t.tally_votes().2, VoteResult::Won);
    }

    #[test]
    fn quorum_activity() {
        let mut t = tracker(&["a", "b", "c"]);
        t.visit(|_, pr| pr.recent_active = false);
        assert!(!t.quorum_active());
        t.visit(|id, pr| pr.recent_active = id.as_str() != "c");
        assert!(t.quorum_active());
    }
}

// =============================================================================
// SECTION 3: VISIT ORDER TESTS
// =============================================================================

mod visit_order {
    use super::*;

    #[test]
    fn visit_is_ascending_regardless_of_insertion() {
        let mut t = tracker(&["did:dtang:zz", "did:dtang:aa", "did:dtang:mm"]);
        t.apply_simple(&[ConfChangeSingle::add_learner("did:dtang:bb")], 1).unwrap();
        let mut seen = Vec::new();
        t.visit(|id, _| seen.push(id.clone()));
        assert_eq!(
            seen,
            ids(&["did:dtang:aa", "did:dtang:bb", "did:dtang:mm", "did:dtang:zz"])
        );
    }

    #[test]
    fn voter_and_learner_lists_are_sorted() {
        let mut t = tracker(&["c", "a", "b"]);
        t.apply_simple(&[ConfChangeSingle::add_learner("z"), ConfChangeSingle::add_learner("y")], 1)
            .unwrap();
        assert_eq!(t.voter_nodes(), ids(&["a", "b", "c"]));
        assert_eq!(t.learner_nodes(), ids(&["y", "z"]));
    }
}

// =============================================================================
// SECTION 4: JOINT CONSENSUS TESTS
// =============================================================================

mod joint_consensus {
    use super::*;

    #[test]
    fn enter_then_leave_lands_on_target() {
        let mut t = tracker(&["a", "b", "c"]);
        t.enter_joint(
            false,
            &[ConfChangeSingle::add_node("d"), ConfChangeSingle::remove_node("a")],
            1,
        )
        .unwrap();
        let target = t.config().voters.incoming.clone();
        assert!(t.config().is_joint());
        assert_disjoint(&t);

        t.leave_joint(1).unwrap();
        assert!(!t.config().is_joint());
        assert_eq!(t.config().voters.incoming, target);
        assert!(t.config().voters.outgoing.is_empty());
        assert!(t.config().learners_next.is_empty());
        assert_disjoint(&t);
    }

    #[test]
    fn fresh_learner_added_with_joint_entry_skips_learners_next() {
        let mut t = tracker(&["a", "b", "c"]);
        t.enter_joint(
            false,
            &[ConfChangeSingle::add_node("d"), ConfChangeSingle::add_learner("l")],
            1,
        )
        .unwrap();
        assert!(t.config().learners.contains(&NodeId::from("l")));
        assert!(t.config().learners_next.is_empty());
    }

    #[test]
    fn fresh_learner_is_added_without_a_joint_step() {
        let mut t = tracker(&["a", "b", "c"]);
        t.apply_simple(&[ConfChangeSingle::add_learner("l")], 1).unwrap();
        assert!(!t.config().is_joint());
        assert_eq!(t.conf_state().learners, ids(&["l"]));
        assert!(t.progress(&NodeId::from("l")).unwrap().is_learner());
        assert_disjoint(&t);

        // still refused while a joint transition is in flight
        t.enter_joint(false, &[ConfChangeSingle::add_node("d")], 1).unwrap();
        assert_eq!(
            t.apply_simple(&[ConfChangeSingle::add_learner("m")], 1),
            Err(ConfChangeError::SimpleChangeInJoint)
        );
    }

    #[test]
    fn demote_and_swap() {
        let mut t = tracker(&["a", "b", "c"]);
        t.enter_joint(
            false,
            &[ConfChangeSingle::add_learner("c"), ConfChangeSingle::add_node("d")],
            1,
        )
        .unwrap();
        assert_disjoint(&t);
        assert_eq!(t.conf_state().learners_next, ids(&["c"]));

        t.leave_joint(1).unwrap();
        let cs = t.conf_state();
        assert_eq!(cs.voters, ids(&["a", "b", "d"]));
        assert_eq!(cs.learners, ids(&["c"]));
        assert!(cs.learners_next.is_empty());
        assert_disjoint(&t);
    }

    #[test]
    fn failed_change_leaves_state_untouched() {
        let mut t = tracker(&["a", "b", "c"]);
        let before = t.conf_state();
        let err = t
            .apply_simple(&[ConfChangeSingle::add_node("d"), ConfChangeSingle::remove_node("a")], 1)
            .unwrap_err();
        assert_eq!(err, ConfChangeError::TooManyVoterChanges);
        assert_eq!(t.conf_state(), before);
        assert!(t.progress(&NodeId::from("d")).is_none());
    }

    #[test]
    fn conf_change_v2_dispatch() {
        let mut t = tracker(&["a", "b", "c"]);

        let cc = ConfChangeV2::new(
            ConfChangeTransition::Auto,
            vec![ConfChangeSingle::add_node("d"), ConfChangeSingle::add_node("e")],
        );
        let cs = t.apply_conf_change(&cc, 5).unwrap();
        assert!(cs.auto_leave);
        assert_eq!(cs.voters_outgoing, ids(&["a", "b", "c"]));

        let cs = t.apply_conf_change(&ConfChangeV2::leave(), 5).unwrap();
        assert_eq!(cs.voters, ids(&["a", "b", "c", "d", "e"]));
        assert!(cs.voters_outgoing.is_empty());
        assert!(!cs.auto_leave);

        let single = ConfChangeV2::new(ConfChangeTransition::Auto, vec![ConfChangeSingle::remove_node("e")]);
        let cs = t.apply_conf_change(&single, 5).unwrap();
        assert_eq!(cs.voters, ids(&["a", "b", "c", "d"]));
    }

    #[test]
    fn explicit_transition_keeps_auto_leave_off() {
        let mut t = tracker(&["a"]);
        let cc = ConfChangeV2::new(ConfChangeTransition::Explicit, vec![ConfChangeSingle::add_node("b")]);
        let cs = t.apply_conf_change(&cc, 1).unwrap();
        assert!(!cs.auto_leave);
        assert!(t.config().is_joint());
    }
}

// =============================================================================
// SECTION 5: RESTORE TESTS
// =============================================================================

mod restore {
    use super::*;

    #[test]
    fn restore_simple_state() {
        let cs = ConfState {
            voters: ids(&["a", "b", "c"]),
            learners: ids(&["l"]),
            ..ConfState::default()
        };
        let mut t = ProgressTracker::default();
        t.restore(&cs, 10).unwrap();
        assert_eq!(t.conf_state(), cs);
        assert_eq!(t.progress(&NodeId::from("a")).unwrap().next_index, 10);
    }

    #[test]
    fn restore_joint_state() {
        let cs = ConfState {
            voters: ids(&["a", "b", "d"]),
            voters_outgoing: ids(&["a", "b", "c"]),
            learners: ids(&["l"]),
            learners_next: ids(&["c"]),
            auto_leave: true,
        };
        let mut t = ProgressTracker::default();
        t.restore(&cs, 3).unwrap();
        assert_eq!(t.conf_state(), cs);
        assert_disjoint(&t);
    }

    #[test]
    fn restore_round_trips_live_state() {
        let mut live = tracker(&["a", "b", "c"]);
        live.enter_joint(
            false,
            &[ConfChangeSingle::add_learner("b"), ConfChangeSingle::add_node("x")],
            1,
        )
        .unwrap();
        let cs = live.conf_state();

        let mut restored = ProgressTracker::default();
        restored.restore(&cs, 1).unwrap();
        assert_eq!(restored.conf_state(), cs);
    }

    #[test]
    fn restore_without_voters_fails_cleanly() {
        let mut t = tracker(&["a"]);
        let cs = ConfState {
            learners: ids(&["l"]),
            ..ConfState::default()
        };
        assert_eq!(t.restore(&cs, 1), Err(ConfChangeError::RemovedAllVoters));
        assert_eq!(t.voter_nodes(), ids(&["a"]));
    }

    #[test]
    fn conf_state_serializes() {
        let t = tracker(&["a", "b"]);
        let json = serde_json::to_string(&t.conf_state()).unwrap();
        let back: ConfState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t.conf_state());
    }
}

// =============================================================================
// SECTION 6: AUTHORIZED MEMBERSHIP TESTS
// =============================================================================

mod authorized {
    use super::*;
    use dtang_core::{apply_authorized, MembershipError, MembershipPolicy, CONF_CHANGE_ACTION};
    use dtang_linkeddata::keys::encode_public_key;
    use dtang_linkeddata::{
        sign, DidDocument, DocumentRegistry, KeyResolver, ObjectCapability, PublicKey,
        ED25519_VERIFICATION_KEY_2018,
    };

    #[test]
    fn genesis_node_adds_a_peer() {
        let (cluster, cluster_key) = DidDocument::new_random().unwrap();
        let (node, node_key) = DidDocument::generate("did:dtang:node-a").unwrap();
        let cap = ObjectCapability::delegate(
            cluster.id.clone(),
            cluster.primary_key_id().unwrap(),
            node.primary_key_id().unwrap(),
            &cluster_key,
        )
        .unwrap();

        let mut registry = DocumentRegistry::new();
        assert!(registry.insert(cluster.clone()));
        assert!(registry.insert(node.clone()));
        let policy = MembershipPolicy::new(cluster.id.clone());

        let mut t = tracker(&[node.id.as_str()]);
        let inv = cap.invoke(CONF_CHANGE_ACTION, &node_key).unwrap();
        let cc = ConfChangeV2::new(
            ConfChangeTransition::Auto,
            vec![ConfChangeSingle::add_node("did:dtang:node-b")],
        );
        let cs = apply_authorized(&mut t, &policy, &inv, &registry, &cc, 7).unwrap();
        assert_eq!(cs.voters, ids(&["did:dtang:node-a", "did:dtang:node-b"]));
    }

    #[test]
    fn unknown_invoker_is_refused() {
        let (cluster, cluster_key) = DidDocument::new_random().unwrap();
        let (node, node_key) = DidDocument::generate("did:dtang:node-a").unwrap();
        let cap = ObjectCapability::delegate(
            cluster.id.clone(),
            cluster.primary_key_id().unwrap(),
            node.primary_key_id().unwrap(),
            &cluster_key,
        )
        .unwrap();

        // the node's document was never registered
        let mut registry = DocumentRegistry::new();
        assert!(registry.insert(cluster.clone()));
        let policy = MembershipPolicy::new(cluster.id.clone());

        let mut t = tracker(&["did:dtang:node-a"]);
        let before = t.conf_state();
        let inv = cap.invoke(CONF_CHANGE_ACTION, &node_key).unwrap();
        let cc = ConfChangeV2::new(
            ConfChangeTransition::Auto,
            vec![ConfChangeSingle::add_node("did:dtang:node-b")],
        );
        assert_eq!(
            apply_authorized(&mut t, &policy, &inv, &registry, &cc, 7),
            Err(MembershipError::Unauthorized)
        );
        assert_eq!(t.conf_state(), before);
    }

    #[test]
    fn key_claiming_the_root_as_controller_grants_nothing() {
        let (cluster, _) = DidDocument::new_random().unwrap();
        let (mut evil, evil_key) = DidDocument::generate("did:dtang:evil").unwrap();
        // second key names the cluster as controller but holds the attacker's key
        evil.public_key.push(PublicKey {
            id: "did:dtang:evil#keys-2".to_string(),
            key_type: ED25519_VERIFICATION_KEY_2018.to_string(),
            controller: cluster.id.clone(),
            public_key_base58: encode_public_key(&evil_key.verifying_key()),
        });
        sign(&mut evil, &evil_key).unwrap();

        let mut registry = DocumentRegistry::new();
        assert!(registry.insert(cluster.clone()));
        assert!(!registry.insert(evil.clone()));
        assert!(evil.resolve_key("did:dtang:evil#keys-2").is_none());

        let cap = ObjectCapability::delegate(
            cluster.id.clone(),
            "did:dtang:evil#keys-2",
            "did:dtang:evil#keys-1",
            &evil_key,
        )
        .unwrap();
        let inv = cap.invoke(CONF_CHANGE_ACTION, &evil_key).unwrap();
        let policy = MembershipPolicy::new(cluster.id.clone());
        let cc = ConfChangeV2::new(
            ConfChangeTransition::Auto,
            vec![ConfChangeSingle::add_node("did:dtang:evil")],
        );

        let mut t = tracker(&["did:dtang:node-a"]);
        let before = t.conf_state();
        assert_eq!(
            apply_authorized(&mut t, &policy, &inv, &registry, &cc, 7),
            Err(MembershipError::Unauthorized)
        );
        // resolving against the forged document itself does not help either
        assert_eq!(
            apply_authorized(&mut t, &policy, &inv, &evil, &cc, 7),
            Err(MembershipError::Unauthorized)
        );
        assert_eq!(t.conf_state(), before);
    }

    #[test]
    fn delegated_peer_changes_membership_with_its_chain() {
        let (cluster, cluster_key) = DidDocument::new_random().unwrap();
        let (node, node_key) = DidDocument::generate("did:dtang:node-a").unwrap();
        let (peer, peer_key) = DidDocument::generate("did:dtang:node-b").unwrap();
        let root_cap = ObjectCapability::delegate(
            cluster.id.clone(),
            cluster.primary_key_id().unwrap(),
            node.primary_key_id().unwrap(),
            &cluster_key,
        )
        .unwrap();
        let peer_cap = ObjectCapability::delegate(
            root_cap.id.to_string(),
            node.primary_key_id().unwrap(),
            peer.primary_key_id().unwrap(),
            &node_key,
        )
        .unwrap();

        let mut registry = DocumentRegistry::new();
        for doc in [cluster.clone(), node, peer] {
            assert!(registry.insert(doc));
        }
        let policy = MembershipPolicy::new(cluster.id.clone());
        let inv = peer_cap.invoke(CONF_CHANGE_ACTION, &peer_key).unwrap();

        assert_eq!(policy.authorize_delegated(&inv, &[root_cap], &registry), Ok(()));
        assert!(matches!(
            policy.authorize(&inv, &registry),
            Err(MembershipError::UntrustedRoot(_))
        ));
    }
}
