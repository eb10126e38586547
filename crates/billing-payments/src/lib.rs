//! # billing-payments
//!
//! Payment initiation, exactly-once reconciliation and the subscription
//! ledger service.
//!
//! ## Two racing channels, one outcome
//!
//! A push payment resolves on the payer's handset, minutes later or never.
//! The result reaches us through two channels that race each other:
//!
//! ```text
//!                    ┌──────────────────┐
//!   gateway ────────▶│ CallbackReceiver │──┐
//!   (webhook)        └──────────────────┘  │   ┌────────────┐   ┌─────────────┐
//!                                          ├──▶│ Reconciler │──▶│ BillingStore│
//!   UI poll ────────▶┌──────────────────┐  │   └─────┬──────┘   │ (per-intent │
//!                    │   StatusPoller   │──┘         │          │    lock)    │
//!                    └──────────────────┘            ▼          └─────────────┘
//!                                             EventPublisher ──▶ NotificationDispatcher
//! ```
//!
//! Either channel may deliver zero, one or many times. The store's resolve is
//! a conditional transition under the intent's lock, so exactly one delivery
//! moves the intent to a terminal state and extends the subscription; the
//! rest are absorbed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use billing_payments::{InitiatePayment, PushInitiator, StatusPoller};
//!
//! let initiated = initiator.initiate(InitiatePayment { .. }).await?;
//! let view = poller.check_status(&initiated.intent.id, 1).await?;
//! ```

mod backlog;
mod callback;
mod events;
mod initiator;
mod ledger;
mod poller;
mod reconcile;
mod store;

#[cfg(test)]
mod properties;
#[cfg(test)]
mod testing;

pub use backlog::{
    BacklogEntry, ReconcileSource, ReconciliationBacklog, DEFAULT_BACKLOG_CAPACITY,
    MAX_PAYLOAD_BYTES,
};
pub use callback::{parse_callback, CallbackAck, CallbackReceiver};
pub use events::{
    EventPublisher, LogNotificationSink, NotificationDispatcher, NotificationSink, PaymentEvent,
};
pub use initiator::{InitiatePayment, InitiatedPayment, PushInitiator};
pub use ledger::SubscriptionLedger;
pub use poller::{PaymentState, PaymentStatusView, PollPolicy, StatusPoller};
pub use reconcile::{Reconciliation, Reconciler};
pub use store::{BillingStore, MemoryBillingStore, ResolveOutcome};
