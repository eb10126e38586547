//! # billing-gateway
//!
//! Gateway implementations for the billing system.
//!
//! ## Gateways
//!
//! - **Daraja** (default): M-Pesa STK push via the Safaricom Daraja API
//! - **Mock**: scriptable in-process gateway for tests and local demos
//!
//! ## Usage
//!
//! ```rust,ignore
//! use billing_gateway::DarajaGateway;
//!
//! let gateway = DarajaGateway::from_env()?;
//! let accepted = gateway.push(&request).await?;
//! ```

#[cfg(feature = "daraja")]
pub mod daraja;
pub mod mock;

#[cfg(feature = "daraja")]
pub use daraja::{DarajaConfig, DarajaEnvironment, DarajaGateway};
pub use mock::{MockFailure, MockGateway};

// Re-export core types for convenience
pub use billing_core::{
    BillingError, GatewayResult, PaymentGateway, PushAccepted, PushRequest, Result, StatusQuery,
};
