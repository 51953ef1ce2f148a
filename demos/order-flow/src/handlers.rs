//! Demo handlers.

use crate::events::{OrderConfirmed, OrderPlaced, OrderRejected};
use courier_core::BoxFuture;
use courier_core::cancellation::CancellationSignal;
use courier_core::handler::{Handler, HandlerError};
use courier_core::message::{DomainMessage, IntegrationMessage};
use courier_runtime::Publisher;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

/// Reserves stock for placed orders and announces the result to other
/// services.
pub struct ReserveStock {
    stock: Mutex<HashMap<String, u32>>,
    announcements: Publisher,
}

impl ReserveStock {
    pub fn new(stock: impl IntoIterator<Item = (&'static str, u32)>, announcements: Publisher) -> Self {
        Self {
            stock: Mutex::new(stock.into_iter().map(|(sku, count)| (sku.to_string(), count)).collect()),
            announcements,
        }
    }

    fn reserve(&self, sku: &str, quantity: u32) -> Result<u32, String> {
        let mut stock = self.stock.lock().map_err(|_| "stock ledger poisoned".to_string())?;
        let available = stock.get_mut(sku).ok_or_else(|| format!("unknown sku {sku}"))?;
        if *available < quantity {
            return Err(format!("only {available} of {sku} left"));
        }
        *available -= quantity;
        Ok(*available)
    }
}

impl Handler<DomainMessage<OrderPlaced>> for ReserveStock {
    fn handle<'a>(
        &'a self,
        message: &'a DomainMessage<OrderPlaced>,
        cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            let order = message.content();
            let metadata = Some(message.metadata().clone());

            match self.reserve(&order.sku, order.quantity) {
                Ok(left) => {
                    info!(order_id = order.order_id, sku = %order.sku, left, "Stock reserved");
                    let confirmed = OrderConfirmed {
                        order_id: order.order_id,
                        reserved: order.quantity,
                    };
                    self.announcements.publish(confirmed, metadata, None, Some(cancel)).await?;
                }
                Err(reason) => {
                    info!(order_id = order.order_id, reason = %reason, "Stock reservation refused");
                    let rejected = OrderRejected {
                        order_id: order.order_id,
                        reason,
                    };
                    self.announcements.publish(rejected, metadata, None, Some(cancel)).await?;
                }
            }
            Ok(())
        })
    }
}

/// Stands in for a downstream service reacting to order announcements.
pub struct NotifyCustomer;

impl Handler<IntegrationMessage<OrderConfirmed>> for NotifyCustomer {
    fn handle<'a>(
        &'a self,
        message: &'a IntegrationMessage<OrderConfirmed>,
        _cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            info!(
                order_id = message.content().order_id,
                correlation_id = message.metadata().correlation_id(),
                "Customer notified of confirmation"
            );
            Ok(())
        })
    }
}

impl Handler<IntegrationMessage<OrderRejected>> for NotifyCustomer {
    fn handle<'a>(
        &'a self,
        message: &'a IntegrationMessage<OrderRejected>,
        _cancel: &'a CancellationSignal,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            info!(
                order_id = message.content().order_id,
                reason = %message.content().reason,
                "Customer notified of rejection"
            );
            Ok(())
        })
    }
}
