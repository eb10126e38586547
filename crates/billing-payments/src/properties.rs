//! End-to-end behaviour across initiator, both reconciliation channels and
//! the ledger.

use std::sync::Arc;

use chrono::{Duration, Utc};

use billing_core::{
    intent::{IntentStatus, PaymentIntent, PaymentPurpose},
    subscription::SubscriptionStatus,
};
use billing_gateway::MockFailure;

use crate::callback::CallbackAck;
use crate::events::PaymentEvent;
use crate::initiator::InitiatePayment;
use crate::poller::PaymentState;
use crate::store::BillingStore;
use crate::testing::{callback_body, Harness};

fn request(business_id: &str, purpose: PaymentPurpose) -> InitiatePayment {
    InitiatePayment {
        business_id: business_id.into(),
        user_id: "user-1".into(),
        phone: "0712345678".into(),
        amount: 2000,
        purpose,
    }
}

async fn initiate(h: &Harness, business_id: &str) -> PaymentIntent {
    h.initiator
        .initiate(request(business_id, PaymentPurpose::Subscription))
        .await
        .unwrap()
        .intent
}

#[tokio::test]
async fn subscription_payment_replayed_three_times_extends_once() {
    let mut h = Harness::new();
    let trial_end = Utc::now() + Duration::days(4);
    h.ledger.open_account("biz-1", SubscriptionStatus::Trial, trial_end).unwrap();

    let intent = initiate(&h, "biz-1").await;
    let body = callback_body(intent.checkout_key(), 0, Some("ABC123XYZ"));

    for _ in 0..3 {
        assert_eq!(h.callbacks.receive(&body, None), CallbackAck::accepted());
    }

    let stored = h.store.get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::Completed);
    assert_eq!(stored.gateway_receipt_number.as_deref(), Some("ABC123XYZ"));
    assert!(stored.gateway_transaction_time.is_some());

    let account = h.ledger.account("biz-1").unwrap();
    assert_eq!(account.status, SubscriptionStatus::Active);
    assert!(account.is_serviceable);
    assert_eq!(account.period_ends_at, trial_end + Duration::days(30));
    assert_eq!(account.extensions.len(), 1);
    assert!(account.was_extended_by(&intent.id));

    let events = h.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        PaymentEvent::PaymentCompleted { receipt_number: Some(r), period_ends_at: Some(_), .. }
            if r == "ABC123XYZ"
    ));
}

#[tokio::test]
async fn poll_without_metadata_then_callback_keeps_receipt() {
    let mut h = Harness::new();
    let trial_end = Utc::now() + Duration::days(4);
    h.ledger.open_account("biz-1", SubscriptionStatus::Trial, trial_end).unwrap();

    let intent = initiate(&h, "biz-1").await;
    h.gateway.resolve(intent.checkout_key(), 0, None).await;

    let view = h.poller.check_status(&intent.id, 1).await.unwrap();
    assert_eq!(view.state, PaymentState::Completed);
    let polled = h.store.get_intent(&intent.id).unwrap().unwrap();
    assert!(polled.gateway_receipt_number.is_none());
    assert!(polled.gateway_transaction_time.is_none());

    let body = callback_body(intent.checkout_key(), 0, Some("ABC123XYZ"));
    assert_eq!(h.callbacks.receive(&body, None), CallbackAck::accepted());

    let stored = h.store.get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(stored.status, IntentStatus::Completed);
    assert_eq!(stored.gateway_receipt_number.as_deref(), Some("ABC123XYZ"));
    assert!(stored.gateway_transaction_time.is_some());
    assert_ne!(stored.gateway_transaction_time, stored.resolved_at);
    assert_eq!(stored.resolved_at, polled.resolved_at);

    let account = h.ledger.account("biz-1").unwrap();
    assert_eq!(account.extensions.len(), 1);
    assert_eq!(account.period_ends_at, trial_end + Duration::days(30));
    assert_eq!(h.drain_events().len(), 1);
    assert!(h.backlog.is_empty());
}

#[tokio::test]
async fn cancelled_payment_fails_without_ledger_change_and_later_poll_is_local() {
    let mut h = Harness::new();
    let trial_end = Utc::now() + Duration::days(4);
    h.ledger.open_account("biz-1", SubscriptionStatus::Trial, trial_end).unwrap();

    let intent = initiate(&h, "biz-1").await;
    h.callbacks.receive(&callback_body(intent.checkout_key(), 1032, None), None);

    let view = h.poller.check_status(&intent.id, 3).await.unwrap();
    assert_eq!(view.state, PaymentState::Failed);
    assert_eq!(h.gateway.query_calls(), 0);

    let stored = h.store.get_intent(&intent.id).unwrap().unwrap();
    assert_eq!(stored.failure_code, Some(1032));
    assert!(stored.gateway_receipt_number.is_none());

    let account = h.ledger.account("biz-1").unwrap();
    assert_eq!(account.period_ends_at, trial_end);
    assert_eq!(account.status, SubscriptionStatus::Trial);
    assert!(account.extensions.is_empty());

    assert!(matches!(h.drain_events().as_slice(), [PaymentEvent::PaymentFailed { .. }]));
}

#[tokio::test]
async fn mixed_sequential_deliveries_resolve_exactly_once() {
    // Each pattern interleaves callbacks (true) and polls (false).
    let patterns: [&[bool]; 5] = [
        &[true],
        &[false],
        &[true, false, true],
        &[false, false, true, true, false],
        &[true, true, true, false, false, false, true],
    ];

    for pattern in patterns {
        let mut h = Harness::new();
        h.ledger
            .open_account("biz-1", SubscriptionStatus::Active, Utc::now() + Duration::days(1))
            .unwrap();
        let intent = initiate(&h, "biz-1").await;
        h.gateway.resolve(intent.checkout_key(), 0, Some("ABC123XYZ")).await;
        let body = callback_body(intent.checkout_key(), 0, Some("ABC123XYZ"));

        for (attempt, via_callback) in (1..).zip(pattern.iter()) {
            if *via_callback {
                h.callbacks.receive(&body, None);
            } else {
                let view = h.poller.check_status(&intent.id, attempt).await.unwrap();
                assert_eq!(view.state, PaymentState::Completed);
            }
        }

        assert_eq!(h.ledger.account("biz-1").unwrap().extensions.len(), 1, "pattern {pattern:?}");
        assert_eq!(h.drain_events().len(), 1, "pattern {pattern:?}");
        // The gateway is only asked while the intent is still pending.
        let queries_before_terminal = usize::from(!pattern[0]);
        assert_eq!(h.gateway.query_calls(), queries_before_terminal, "pattern {pattern:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deliveries_extend_once() {
    let h = Arc::new(Harness::new());
    let start_end = Utc::now() + Duration::days(2);
    h.ledger.open_account("biz-1", SubscriptionStatus::Trial, start_end).unwrap();

    let intent = initiate(&h, "biz-1").await;
    h.gateway.resolve(intent.checkout_key(), 0, Some("ABC123XYZ")).await;
    let body = callback_body(intent.checkout_key(), 0, Some("ABC123XYZ"));

    let mut tasks = Vec::new();
    for n in 0..32_u32 {
        let h = h.clone();
        let body = body.clone();
        let id = intent.id.clone();
        tasks.push(tokio::spawn(async move {
            if n % 2 == 0 {
                h.callbacks.receive(&body, None);
            } else {
                h.poller.check_status(&id, 1).await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let account = h.ledger.account("biz-1").unwrap();
    assert_eq!(account.extensions.len(), 1);
    assert_eq!(account.period_ends_at, start_end + Duration::days(30));
    assert_eq!(
        h.store.get_intent(&intent.id).unwrap().unwrap().status,
        IntentStatus::Completed
    );
    assert!(h.backlog.is_empty());

    let Ok(mut h) = Arc::try_unwrap(h) else {
        panic!("harness still shared");
    };
    assert_eq!(h.drain_events().len(), 1);
}

#[tokio::test]
async fn period_never_shortens() {
    let now = Utc::now();
    let starts = [
        now - Duration::days(90),
        now - Duration::minutes(1),
        now + Duration::minutes(1),
        now + Duration::days(400),
    ];

    for start in starts {
        let h = Harness::new();
        h.ledger.open_account("biz-1", SubscriptionStatus::Active, start).unwrap();

        for _ in 0..3 {
            let before = h.ledger.account("biz-1").unwrap().period_ends_at;
            let intent = initiate(&h, "biz-1").await;
            h.callbacks
                .receive(&callback_body(intent.checkout_key(), 0, Some("R")), None);
            let after = h.ledger.account("biz-1").unwrap().period_ends_at;

            assert!(after > before);
            assert!(after >= Utc::now() + Duration::days(29));
        }

        assert_eq!(h.ledger.account("biz-1").unwrap().extensions.len(), 3);
    }
}

#[tokio::test]
async fn unknown_checkout_has_no_side_effects() {
    let mut h = Harness::new();
    let trial_end = Utc::now() + Duration::days(4);
    h.ledger.open_account("biz-1", SubscriptionStatus::Trial, trial_end).unwrap();

    let ack = h.callbacks.receive(&callback_body("ws_CO_never_issued", 0, Some("R1")), None);

    assert_eq!(ack, CallbackAck::accepted());
    assert!(h.store.list_for_business("biz-1").unwrap().is_empty());
    assert_eq!(h.ledger.account("biz-1").unwrap().period_ends_at, trial_end);
    assert!(h.drain_events().is_empty());
    assert!(h.backlog.is_empty());
}

#[tokio::test]
async fn general_payment_never_touches_ledger() {
    let h = Harness::new();
    let trial_end = Utc::now() + Duration::days(4);
    h.ledger.open_account("biz-1", SubscriptionStatus::Trial, trial_end).unwrap();

    let intent = h
        .initiator
        .initiate(request("biz-1", PaymentPurpose::General))
        .await
        .unwrap()
        .intent;
    h.callbacks.receive(&callback_body(intent.checkout_key(), 0, Some("R1")), None);

    assert_eq!(
        h.store.get_intent(&intent.id).unwrap().unwrap().status,
        IntentStatus::Completed
    );
    assert_eq!(h.ledger.account("biz-1").unwrap().period_ends_at, trial_end);
}

#[tokio::test]
async fn failed_push_leaves_nothing_to_reconcile() {
    let mut h = Harness::new();
    h.gateway.fail_pushes(MockFailure::Rejection).await;

    assert!(h.initiator.initiate(request("biz-1", PaymentPurpose::Subscription)).await.is_err());

    // The mock numbers its checkout ids, so this is the id a success would have used.
    h.callbacks.receive(&callback_body("ws_CO_mock_1", 0, Some("R1")), None);

    assert!(h.store.list_for_business("biz-1").unwrap().is_empty());
    assert!(h.drain_events().is_empty());
}

#[tokio::test]
async fn history_lists_newest_first() {
    let h = Harness::new();
    let first = initiate(&h, "biz-1").await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = initiate(&h, "biz-1").await;
    initiate(&h, "biz-2").await;

    let history = h.store.list_for_business("biz-1").unwrap();
    let ids: Vec<_> = history.iter().map(|i| i.id.clone()).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}
