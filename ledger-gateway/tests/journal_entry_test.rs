//! Journal posting tests against the in-memory backend.

mod common;

use common::{entry_date, post_request, seed_accounts, spawn_engine};
use gateway_core::idempotency::{operations, Begin};
use gateway_core::idempotency::IdempotencyStore;
use gateway_core::GatewayError;
use ledger_gateway::models::JournalLine;
use ledger_gateway::services::ReverseEntry;
use rust_decimal::Decimal;

#[tokio::test]
async fn post_valid_two_line_entry() {
    let ledger = spawn_engine();
    seed_accounts(&ledger).await;

    let entry = ledger
        .engine
        .create_journal_entry(post_request(
            vec![
                JournalLine::debit("1000", Decimal::new(10000, 2)),
                JournalLine::credit("4000", Decimal::new(10000, 2)),
            ],
            "SALE:1:2024-01:post",
        ))
        .await
        .unwrap();

    assert_eq!(entry.entry_no, 1);
    assert_eq!(entry.period, "2024-01");
    assert!(entry.is_posted());
    assert!(entry.locked);

    let lines = ledger.engine.entry_lines(entry.entry_id).await.unwrap();
    assert_eq!(lines.len(), 2);
    let total: Decimal = lines.iter().map(|l| l.signed_amount()).sum();
    assert_eq!(total, Decimal::ZERO);
}

#[tokio::test]
async fn reject_unbalanced_entry_with_no_partial_write() {
    let ledger = spawn_engine();
    seed_accounts(&ledger).await;

    // Debit total 8000.00 vs credit total 7999.99.
    let err = ledger
        .engine
        .create_journal_entry(post_request(
            vec![
                JournalLine::debit("1000", Decimal::new(800000, 2)),
                JournalLine::credit("4000", Decimal::new(799999, 2)),
            ],
            "SALE:2:2024-01:post",
        ))
        .await
        .unwrap_err();

    match err {
        GatewayError::LedgerImbalance { debits, credits } => {
            assert_eq!(debits, Decimal::new(800000, 2));
            assert_eq!(credits, Decimal::new(799999, 2));
        }
        other => panic!("expected ledger imbalance, got {:?}", other),
    }
    assert_eq!(ledger.store.entry_count(), 0);

    // The failure is audited.
    assert_eq!(
        ledger.audit.entries_for_operation("JOURNAL_POST_FAILED").len(),
        1
    );
}

#[tokio::test]
async fn duplicate_key_returns_original_entry_exactly_once() {
    let ledger = spawn_engine();
    seed_accounts(&ledger).await;

    let lines = vec![
        JournalLine::debit("1000", Decimal::new(25000, 2)),
        JournalLine::credit("4000", Decimal::new(25000, 2)),
    ];

    let first = ledger
        .engine
        .create_journal_entry(post_request(lines.clone(), "SALE:3:2024-01:post"))
        .await
        .unwrap();
    let second = ledger
        .engine
        .create_journal_entry(post_request(lines, "SALE:3:2024-01:post"))
        .await
        .unwrap();

    assert_eq!(first.entry_id, second.entry_id);
    assert_eq!(ledger.store.entry_count(), 1);
}

#[tokio::test]
async fn unknown_and_inactive_accounts_fail_closed() {
    let ledger = spawn_engine();
    seed_accounts(&ledger).await;

    let err = ledger
        .engine
        .create_journal_entry(post_request(
            vec![
                JournalLine::debit("9999", Decimal::new(100, 2)),
                JournalLine::credit("4000", Decimal::new(100, 2)),
            ],
            "SALE:4:2024-01:post",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));

    ledger.store.deactivate_account("4000");
    let err = ledger
        .engine
        .create_journal_entry(post_request(
            vec![
                JournalLine::debit("1000", Decimal::new(100, 2)),
                JournalLine::credit("4000", Decimal::new(100, 2)),
            ],
            "SALE:5:2024-01:post",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
    assert_eq!(ledger.store.entry_count(), 0);
}

#[tokio::test]
async fn empty_line_list_is_rejected() {
    let ledger = spawn_engine();
    seed_accounts(&ledger).await;

    let err = ledger
        .engine
        .create_journal_entry(post_request(vec![], "SALE:6:2024-01:post"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Validation(_)));
}

#[tokio::test]
async fn entry_numbers_are_gapless_per_period() {
    let ledger = spawn_engine();
    seed_accounts(&ledger).await;

    let mut numbers = Vec::new();
    for i in 0..3 {
        let entry = ledger
            .engine
            .create_journal_entry(post_request(
                vec![
                    JournalLine::debit("1000", Decimal::new(100, 2)),
                    JournalLine::credit("4000", Decimal::new(100, 2)),
                ],
                &format!("SALE:seq-{}:2024-01:post", i),
            ))
            .await
            .unwrap();
        numbers.push(entry.entry_no);
    }
    assert_eq!(numbers, vec![1, 2, 3]);

    // A new period restarts its own sequence.
    let mut feb = post_request(
        vec![
            JournalLine::debit("1000", Decimal::new(100, 2)),
            JournalLine::credit("4000", Decimal::new(100, 2)),
        ],
        "SALE:seq-feb:2024-02:post",
    );
    feb.entry_date = chrono::NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
    let entry = ledger.engine.create_journal_entry(feb).await.unwrap();
    assert_eq!(entry.entry_no, 1);
    assert_eq!(entry.period, "2024-02");
}

#[tokio::test]
async fn reversal_zeroes_every_account_touched() {
    let ledger = spawn_engine();
    seed_accounts(&ledger).await;

    let original = ledger
        .engine
        .create_journal_entry(post_request(
            vec![
                JournalLine::debit("1000", Decimal::new(123456, 2)),
                JournalLine::credit("4000", Decimal::new(123456, 2)),
            ],
            "SALE:7:2024-01:post",
        ))
        .await
        .unwrap();

    let reversal = ledger
        .engine
        .reverse_entry(ReverseEntry {
            caller: "finance-portal".to_string(),
            entry_id: original.entry_id,
            idempotency_key: "SALE:7:2024-01:reverse".to_string(),
            actor: "tester".to_string(),
            entry_date: entry_date(),
            description: None,
        })
        .await
        .unwrap();

    assert_eq!(reversal.entry_type, "reversal");
    assert_eq!(reversal.reverses_entry_id, Some(original.entry_id));
    assert_eq!(
        ledger.engine.account_net("1000").await.unwrap(),
        Decimal::ZERO
    );
    assert_eq!(
        ledger.engine.account_net("4000").await.unwrap(),
        Decimal::ZERO
    );

    // Reversing again with the same key replays the same reversal.
    let replay = ledger
        .engine
        .reverse_entry(ReverseEntry {
            caller: "finance-portal".to_string(),
            entry_id: original.entry_id,
            idempotency_key: "SALE:7:2024-01:reverse".to_string(),
            actor: "tester".to_string(),
            entry_date: entry_date(),
            description: None,
        })
        .await
        .unwrap();
    assert_eq!(replay.entry_id, reversal.entry_id);
    assert_eq!(ledger.store.entry_count(), 2);
}

#[tokio::test]
async fn authority_denial_has_zero_side_effects() {
    let ledger = spawn_engine();
    seed_accounts(&ledger).await;

    let mut req = post_request(
        vec![
            JournalLine::debit("1000", Decimal::new(100, 2)),
            JournalLine::credit("4000", Decimal::new(100, 2)),
        ],
        "SALE:8:2024-01:post",
    );
    req.caller = "unknown-service".to_string();

    let err = ledger.engine.create_journal_entry(req).await.unwrap_err();
    assert!(matches!(err, GatewayError::AuthorityViolation { .. }));
    assert_eq!(ledger.store.entry_count(), 0);

    // The denied call consumed no idempotency record: the key is still fresh.
    let begin = ledger
        .idempotency
        .begin(
            operations::JOURNAL_POST,
            "SALE:8:2024-01:post",
            "tester",
            operations::ttl(operations::JOURNAL_POST),
        )
        .await
        .unwrap();
    assert!(matches!(begin, Begin::Fresh(_)));
}

#[tokio::test]
async fn reversing_a_missing_entry_is_not_found() {
    let ledger = spawn_engine();
    seed_accounts(&ledger).await;

    let err = ledger
        .engine
        .reverse_entry(ReverseEntry {
            caller: "finance-portal".to_string(),
            entry_id: uuid::Uuid::new_v4(),
            idempotency_key: "SALE:9:2024-01:reverse".to_string(),
            actor: "tester".to_string(),
            entry_date: entry_date(),
            description: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
}
