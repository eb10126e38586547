//! Application State

use std::sync::Arc;

use billing_core::PaymentGateway;
use billing_payments::{
    CallbackReceiver, EventPublisher, MemoryBillingStore, PushInitiator, Reconciler,
    ReconciliationBacklog, StatusPoller, SubscriptionLedger,
};

use crate::config::ServerConfig;

pub type Store = MemoryBillingStore;

/// Services that need a configured gateway
pub struct PaymentServices {
    pub gateway_name: String,
    pub initiator: PushInitiator<Store>,
    pub poller: StatusPoller<Store>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Intent and account storage
    pub store: Arc<Store>,

    pub ledger: Arc<SubscriptionLedger<Store>>,

    pub callbacks: Arc<CallbackReceiver<Store>>,

    pub backlog: Arc<ReconciliationBacklog>,

    /// Push and poll (optional - None if the gateway is not configured)
    pub payments: Option<Arc<PaymentServices>>,
}

impl AppState {
    /// Wire every service over one store and one event channel
    pub fn new(
        gateway: Option<Arc<dyn PaymentGateway>>,
        events: EventPublisher,
        config: &ServerConfig,
    ) -> Self {
        let store = Arc::new(Store::new());
        let backlog = Arc::new(ReconciliationBacklog::with_capacity(config.backlog_capacity));
        let reconciler = Arc::new(Reconciler::new(store.clone(), events, backlog.clone()));

        let payments = gateway.map(|gateway| {
            Arc::new(PaymentServices {
                gateway_name: gateway.name().to_string(),
                initiator: PushInitiator::new(gateway.clone(), store.clone(), backlog.clone()),
                poller: StatusPoller::new(
                    gateway,
                    store.clone(),
                    reconciler.clone(),
                    config.poll_policy,
                ),
            })
        });

        Self {
            ledger: Arc::new(SubscriptionLedger::new(store.clone())),
            callbacks: Arc::new(CallbackReceiver::new(
                reconciler,
                backlog.clone(),
                config.callback_token.clone(),
            )),
            store,
            backlog,
            payments,
        }
    }
}
