//! End-to-end lead lifecycle through the state store.

use chrono::{Duration, TimeZone, Utc};
use database::{
    dead_letter, do_not_contact, lead_history, lead_state, CandidateQuery, Database, LeadStatus,
    NewLeadState,
};

const SMB: &str = "8c46e0c9-c1f9-4201-a8d6-6221bafeada6";

async fn test_db() -> Database {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    db.migrate().await.unwrap();
    db
}

#[tokio::test]
async fn test_lead_drains_out_of_candidate_set() {
    let db = test_db().await;
    let now = Utc.with_ymd_and_hms(2025, 9, 15, 12, 0, 0).unwrap();

    lead_state::upsert_lead(db.pool(), &NewLeadState::active("kept@example.com", SMB, "id-1"))
        .await
        .unwrap();
    lead_state::upsert_lead(db.pool(), &NewLeadState::active("done@example.com", SMB, "id-2"))
        .await
        .unwrap();
    lead_state::upsert_lead(db.pool(), &NewLeadState::active("quit@example.com", SMB, "id-3"))
        .await
        .unwrap();

    let query = CandidateQuery::new(vec![SMB.to_string()], now);
    assert_eq!(lead_state::select_drain_candidates(db.pool(), &query).await.unwrap().len(), 3);

    // One kept, one completed, one unsubscribed
    lead_state::stamp_drain_check(db.pool(), "kept@example.com", now).await.unwrap();

    lead_state::record_disposition(db.pool(), "done@example.com", LeadStatus::Completed, now)
        .await
        .unwrap();
    lead_history::record_completion(db.pool(), "done@example.com", SMB, "SMB", "completed", now)
        .await
        .unwrap();

    lead_state::record_disposition(db.pool(), "quit@example.com", LeadStatus::Unsubscribed, now)
        .await
        .unwrap();
    do_not_contact::add_to_dnc(db.pool(), "quit@example.com", "instantly_drain", "unsubscribed", "drain", now)
        .await
        .unwrap();

    // Nothing eligible right after the run
    assert!(lead_state::select_drain_candidates(db.pool(), &query).await.unwrap().is_empty());

    // The kept lead returns once the window has passed
    let tomorrow = CandidateQuery::new(vec![SMB.to_string()], now + Duration::hours(25));
    let candidates = lead_state::select_drain_candidates(db.pool(), &tomorrow).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].email, "kept@example.com");

    assert!(lead_history::is_in_cooldown(db.pool(), "done@example.com", now, Duration::days(90))
        .await
        .unwrap());
    assert!(do_not_contact::is_suppressed(db.pool(), "quit@example.com").await.unwrap());
    assert!(dead_letter::recent_dead_letters(db.pool(), 10).await.unwrap().is_empty());
}
