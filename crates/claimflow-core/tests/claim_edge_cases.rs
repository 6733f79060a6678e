//! Edge-case tests for claim decoding, partition routing, and entity merging.

use chrono::{TimeZone, Utc};
use claimflow_core::{
    encode_record, partition_key, ClaimEvent, ClaimRecord, EntityId, EntityState, EntityUpdate,
    Header, PartitionRouter, RecordSplitter,
};
use uuid::Uuid;

fn record(pet: EntityId, claim_id: &str, cents: i64, day: u32) -> ClaimRecord {
    ClaimRecord {
        policy_number: "POL-9".to_string(),
        pet_id: pet,
        claim_id: claim_id.to_string(),
        customer_name: "Casey".to_string(),
        claim_amount_cents: cents,
        date_of_loss: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
        claim_date: Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap(),
        status: "Submitted".to_string(),
        description: "limping".to_string(),
        term_number: None,
        approved_amount_cents: None,
        veterinarian: None,
    }
}

fn apply(state: &mut EntityState, event: &ClaimEvent) {
    let update = EntityUpdate::from_event(event).unwrap();
    state.merge_update(&update);
}

// ---------------------------------------------------------------
// Codec
// ---------------------------------------------------------------

#[test]
fn splitter_and_header_decode_a_whole_file() {
    let pet = EntityId::new(Uuid::new_v4());
    let header = Header::canonical();
    let mut file = format!("{}\r\n", header.to_line());
    for i in 0..5 {
        file.push_str(&encode_record(&record(pet, &format!("C{i}"), 100 * i, 2)));
        file.push_str("\r\n");
    }

    let mut splitter = RecordSplitter::new();
    let mut lines = Vec::new();
    // Feed in awkward 7-byte pieces
    for piece in file.as_bytes().chunks(7) {
        splitter.push(piece, &mut lines);
    }
    assert!(splitter.finish().is_none());

    assert_eq!(lines.len(), 6);
    let parsed = Header::parse(lines[0].as_text().unwrap()).unwrap();
    for (i, line) in lines[1..].iter().enumerate() {
        let decoded = parsed.decode(line.as_text().unwrap()).unwrap();
        assert_eq!(decoded.claim_id, format!("C{i}"));
        assert_eq!(decoded.claim_amount_cents, 100 * i as i64);
    }
}

#[test]
fn header_with_bom_is_accepted() {
    let line = format!("\u{feff}{}", Header::canonical().to_line());
    assert!(Header::parse(&line).is_ok());
}

// ---------------------------------------------------------------
// Partition routing
// ---------------------------------------------------------------

#[test]
fn partition_key_always_in_range_for_many_counts() {
    for count in [1u32, 2, 3, 16, 32, 33, 1024] {
        let router = PartitionRouter::new(count).unwrap();
        for _ in 0..200 {
            let id = EntityId::new(Uuid::new_v4());
            let p = router.partition_for(&id);
            assert!(p < count);
            assert_eq!(p, partition_key(&id, count));
        }
    }
}

// ---------------------------------------------------------------
// Entity merge through events
// ---------------------------------------------------------------

#[test]
fn duplicate_event_yields_same_state() {
    let pet = EntityId::new(Uuid::new_v4());
    let event = ClaimEvent::new(1, "t", &record(pet, "C1", 100, 2), 0).unwrap();

    let mut once = EntityState::empty(pet);
    apply(&mut once, &event);

    let mut twice = EntityState::empty(pet);
    apply(&mut twice, &event);
    apply(&mut twice, &event);

    assert_eq!(once, twice);
}

#[test]
fn distinct_claims_commute() {
    let pet = EntityId::new(Uuid::new_v4());
    let e1 = ClaimEvent::new(1, "t", &record(pet, "C1", 100, 2), 0).unwrap();
    let e2 = ClaimEvent::new(1, "t", &record(pet, "C2", 300, 3), 0).unwrap();

    let mut a = EntityState::empty(pet);
    apply(&mut a, &e1);
    apply(&mut a, &e2);

    let mut b = EntityState::empty(pet);
    apply(&mut b, &e2);
    apply(&mut b, &e1);

    assert_eq!(a, b);
}

#[test]
fn later_claim_revision_wins_out_of_order() {
    let pet = EntityId::new(Uuid::new_v4());
    let chunk_a = ClaimEvent::new(1, "t", &record(pet, "C1", 10_000, 2), 0).unwrap();
    let chunk_b = ClaimEvent::new(1, "t", &record(pet, "C1", 15_000, 9), 0).unwrap();

    let mut state = EntityState::empty(pet);
    apply(&mut state, &chunk_b);
    apply(&mut state, &chunk_a);

    assert_eq!(state.claims.len(), 1);
    assert_eq!(state.claim("C1").unwrap().claimed_amount_cents, 15_000);
}
