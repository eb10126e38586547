//! # billing-core
//!
//! Domain model for mobile-money subscription billing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   push    ┌──────────────────┐
//! │ PushInitiator│──────────▶│  PaymentGateway  │ (Daraja, mock, ...)
//! └──────┬───────┘           └────────┬─────────┘
//!        │ PENDING                    │ callback / status query
//!        ▼                            ▼
//! ┌──────────────┐  resolve  ┌──────────────────┐  extend  ┌──────────────┐
//! │PaymentIntent │◀──────────│    Reconciler    │─────────▶│ Subscription │
//! │   (store)    │  (once)   │                  │  (once)  │   Account    │
//! └──────────────┘           └──────────────────┘          └──────────────┘
//! ```
//!
//! This crate holds the types and pure transitions. Storage, reconciliation
//! and HTTP live in `billing-payments` and `billing-server`; the concrete
//! gateway client lives in `billing-gateway`.

pub mod error;
pub mod gateway;
pub mod intent;
pub mod phone;
pub mod subscription;

pub use error::{BillingError, Result};
pub use gateway::{
    CallbackMetadata, GatewayResult, PaymentGateway, PaymentMetadata, PushAccepted, PushRequest,
    StatusQuery,
};
pub use intent::{IntentId, IntentStatus, PaymentIntent, PaymentPurpose, Resolution};
pub use phone::PhoneNumber;
pub use subscription::{
    PeriodExtension, Serviceability, SubscriptionAccount, SubscriptionStatus, EXTENSION_DAYS,
};
