use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use tether_sessions::{
    identity_equals, merge_session_identity, IdentitySource, IdentityState, SessionIdentity,
};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// Ids drawn from a tiny alphabet so collisions and blanks are common.
fn id_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(None),
        Just(Some(String::new())),
        Just(Some("   ".to_string())),
        "[a-c]{1,2}".prop_map(Some),
    ]
}

fn source_strategy() -> impl Strategy<Value = IdentitySource> {
    prop_oneof![
        Just(IdentitySource::Ensure),
        Just(IdentitySource::Status),
        Just(IdentitySource::Event),
    ]
}

fn identity_strategy() -> impl Strategy<Value = SessionIdentity> {
    (
        any::<bool>(),
        id_strategy(),
        id_strategy(),
        id_strategy(),
        source_strategy(),
        0i64..10_000,
    )
        .prop_map(|(claims_resolved, record, backend, agent, source, offset)| SessionIdentity {
            // Raw fragments may claim any state; normalization re-derives it.
            state: if claims_resolved {
                IdentityState::Resolved
            } else {
                IdentityState::Pending
            },
            record_id: record,
            backend_session_id: backend,
            agent_session_id: agent,
            source,
            last_updated_at: base_time() + Duration::seconds(offset),
        })
}

fn ids(identity: &SessionIdentity) -> (Option<String>, Option<String>, Option<String>) {
    (
        identity.record_id.clone(),
        identity.backend_session_id.clone(),
        identity.agent_session_id.clone(),
    )
}

proptest! {
    #[test]
    fn property_resolved_state_matches_ids(
        a in proptest::option::of(identity_strategy()),
        b in proptest::option::of(identity_strategy()),
    ) {
        if let Some(m) = merge_session_identity(a.as_ref(), b.as_ref(), base_time()) {
            let has_session_id = m.backend_session_id.is_some() || m.agent_session_id.is_some();
            prop_assert_eq!(m.is_resolved(), has_session_id);
        } else {
            prop_assert!(a.is_none() && b.is_none());
        }
    }

    #[test]
    fn property_unresolved_fragment_never_regresses(
        a in identity_strategy(),
        b in identity_strategy(),
        f in identity_strategy(),
    ) {
        let merged = merge_session_identity(Some(&a), Some(&b), base_time()).unwrap();
        prop_assume!(merged.is_resolved());
        let fragment = f.normalized();
        prop_assume!(!fragment.is_resolved());

        let next = merge_session_identity(Some(&merged), Some(&fragment), base_time()).unwrap();
        prop_assert!(next.is_resolved());
        prop_assert_eq!(ids(&next), ids(&merged));
        prop_assert_eq!(next.source, merged.source);
    }

    #[test]
    fn property_set_ids_survive_any_fragment(
        a in identity_strategy(),
        f in identity_strategy(),
    ) {
        let current = a.normalized();
        let next = merge_session_identity(Some(&current), Some(&f), base_time()).unwrap();
        // A field can change value, but never go from set to unset.
        if current.record_id.is_some() { prop_assert!(next.record_id.is_some()); }
        if current.backend_session_id.is_some() { prop_assert!(next.backend_session_id.is_some()); }
        if current.agent_session_id.is_some() { prop_assert!(next.agent_session_id.is_some()); }
    }

    #[test]
    fn property_reapplying_fragment_is_noop(
        a in proptest::option::of(identity_strategy()),
        b in identity_strategy(),
        later in 1i64..10_000,
    ) {
        let t1 = base_time();
        let t2 = t1 + Duration::seconds(later);
        let once = merge_session_identity(a.as_ref(), Some(&b), t1).unwrap();
        let twice = merge_session_identity(Some(&once), Some(&b), t2).unwrap();
        prop_assert_eq!(ids(&twice), ids(&once));
        prop_assert!(identity_equals(Some(&once), Some(&twice)));
        prop_assert_eq!(twice.last_updated_at, t2);
    }

    #[test]
    fn property_result_is_stamped_with_now(
        a in proptest::option::of(identity_strategy()),
        b in proptest::option::of(identity_strategy()),
        offset in 0i64..100_000,
    ) {
        let now = base_time() + Duration::seconds(offset);
        if let Some(m) = merge_session_identity(a.as_ref(), b.as_ref(), now) {
            prop_assert_eq!(m.last_updated_at, now);
        }
    }

    #[test]
    fn property_equality_ignores_timestamps(a in identity_strategy(), shift in 1i64..10_000) {
        let mut b = a.clone();
        b.last_updated_at = a.last_updated_at + Duration::seconds(shift);
        prop_assert!(identity_equals(Some(&a), Some(&b)));
    }
}

#[test]
fn ensure_status_event_sequence_resolves_once() {
    let t = base_time();
    let ensure = SessionIdentity::pending(IdentitySource::Ensure, t).with_record_id("rec");
    let status = SessionIdentity::pending(IdentitySource::Status, t);
    let event = SessionIdentity::pending(IdentitySource::Event, t).with_backend_session_id("sess");

    let s1 = merge_session_identity(None, Some(&ensure), t).unwrap();
    let s2 = merge_session_identity(Some(&s1), Some(&status), t).unwrap();
    assert_eq!(s2.state, IdentityState::Pending);
    assert_eq!(s2.record_id.as_deref(), Some("rec"));
    let s3 = merge_session_identity(Some(&s2), Some(&event), t).unwrap();
    assert!(s3.is_resolved());
    // A late, empty status poll does not undo the event.
    let s4 = merge_session_identity(Some(&s3), Some(&status), t).unwrap();
    assert!(identity_equals(Some(&s3), Some(&s4)));
}
