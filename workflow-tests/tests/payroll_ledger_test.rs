//! End-to-end workflow: payroll run -> accrual posting -> approval ->
//! payment settlement, with advances and the full audit trail.

use gateway_core::authority::services;
use ledger_gateway::services::ReverseEntry;
use payroll_gateway::services::{ApprovePayroll, ProcessPayment};
use rust_decimal::Decimal;
use workflow_tests::{month, Harness, CASH_ACCOUNT};

#[tokio::test]
async fn full_payroll_lifecycle_moves_money_exactly_once() {
    let h = Harness::spawn().await;
    h.seed_standard_components().await;
    let employee_id = h.seed_employee_with_contract(5000).await;
    h.seed_paid_advance(employee_id, 3000, 3, 1000, month(2024, 1))
        .await;

    // Create with ledger posting: gross 6000, insurance 550, advance 1000,
    // net 4450.
    let payroll = h
        .gateway
        .create_payroll(h.create_request(employee_id, month(2024, 1), "wf-create"))
        .await
        .unwrap();
    assert_eq!(payroll.net, Decimal::from(4450));

    // Accrual entry effects.
    assert_eq!(
        h.ledger.account_net(&h.accounts.basic_expense).await.unwrap(),
        Decimal::from(5000)
    );
    assert_eq!(
        h.ledger
            .account_net(&h.accounts.insurance_payable)
            .await
            .unwrap(),
        Decimal::from(-550)
    );
    // The advance repayment reduces the receivable.
    assert_eq!(
        h.ledger
            .account_net(&h.accounts.advance_receivable)
            .await
            .unwrap(),
        Decimal::from(-1000)
    );
    assert_eq!(
        h.ledger
            .account_net(&h.accounts.salaries_payable)
            .await
            .unwrap(),
        Decimal::from(-4450)
    );

    // Approve and pay.
    h.gateway
        .approve_payroll(ApprovePayroll {
            caller: services::FINANCE_PORTAL.to_string(),
            payroll_id: payroll.payroll_id,
            idempotency_key: "wf-approve".to_string(),
            actor: "approver".to_string(),
        })
        .await
        .unwrap();
    let paid = h
        .gateway
        .process_payment(ProcessPayment {
            caller: services::FINANCE_PORTAL.to_string(),
            payroll_id: payroll.payroll_id,
            idempotency_key: "wf-pay".to_string(),
            actor: "treasurer".to_string(),
            payment_method: "bank".to_string(),
            payment_reference: "TRX-9".to_string(),
            settlement_account: CASH_ACCOUNT.to_string(),
        })
        .await
        .unwrap();
    assert_eq!(paid.status, "paid");

    // The settlement cleared the liability against cash.
    assert_eq!(
        h.ledger
            .account_net(&h.accounts.salaries_payable)
            .await
            .unwrap(),
        Decimal::ZERO
    );
    assert_eq!(
        h.ledger.account_net(CASH_ACCOUNT).await.unwrap(),
        Decimal::from(-4450)
    );

    // Two journal entries total: accrual + settlement.
    assert_eq!(h.ledger_store.entry_count(), 2);

    // Replaying the whole lifecycle changes nothing.
    h.gateway
        .create_payroll(h.create_request(employee_id, month(2024, 1), "wf-create"))
        .await
        .unwrap();
    assert_eq!(h.payroll_store.payroll_count(), 1);
    assert_eq!(h.ledger_store.entry_count(), 2);
    assert_eq!(
        h.ledger.account_net(CASH_ACCOUNT).await.unwrap(),
        Decimal::from(-4450)
    );
}

#[tokio::test]
async fn every_governed_mutation_is_audited() {
    let h = Harness::spawn().await;
    h.seed_standard_components().await;
    let employee_id = h.seed_employee_with_contract(5000).await;

    let payroll = h
        .gateway
        .create_payroll(h.create_request(employee_id, month(2024, 1), "audit-create"))
        .await
        .unwrap();
    h.gateway
        .approve_payroll(ApprovePayroll {
            caller: services::FINANCE_PORTAL.to_string(),
            payroll_id: payroll.payroll_id,
            idempotency_key: "audit-approve".to_string(),
            actor: "approver".to_string(),
        })
        .await
        .unwrap();

    // A failure path writes its own *_FAILED entry.
    h.gateway
        .create_payroll(h.create_request(employee_id, month(2024, 1), "audit-dup"))
        .await
        .unwrap_err();

    assert_eq!(h.audit.entries_for_operation("PAYROLL_CREATE").len(), 1);
    assert_eq!(h.audit.entries_for_operation("PAYROLL_APPROVE").len(), 1);
    assert_eq!(
        h.audit.entries_for_operation("PAYROLL_CREATE_FAILED").len(),
        1
    );
    // The ledger posting audited itself, with the payroll gateway as the
    // source service.
    let postings = h.audit.entries_for_operation("JOURNAL_POST");
    assert_eq!(postings.len(), 1);
    assert_eq!(postings[0].source_service, "payroll-gateway");
}

#[tokio::test]
async fn reversing_the_accrual_zeroes_every_account_it_touched() {
    let h = Harness::spawn().await;
    h.seed_standard_components().await;
    let employee_id = h.seed_employee_with_contract(5000).await;

    let payroll = h
        .gateway
        .create_payroll(h.create_request(employee_id, month(2024, 1), "rev-create"))
        .await
        .unwrap();
    let entry_id = payroll.journal_entry_id.unwrap();

    h.ledger
        .reverse_entry(ReverseEntry {
            caller: services::FINANCE_PORTAL.to_string(),
            entry_id,
            idempotency_key: "rev-reverse".to_string(),
            actor: "controller".to_string(),
            entry_date: month(2024, 1),
            description: None,
        })
        .await
        .unwrap();

    for code in h.accounts.all_codes() {
        assert_eq!(
            h.ledger.account_net(code).await.unwrap(),
            Decimal::ZERO,
            "account {} should net to zero after reversal",
            code
        );
    }
}
