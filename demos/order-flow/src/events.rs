//! Payloads exchanged by the demo.

use courier_core::mapper::MessageMapper;
use courier_core::message::Payload;
use serde::{Deserialize, Serialize};

/// A customer placed an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: u64,
    pub sku: String,
    pub quantity: u32,
}
impl Payload for OrderPlaced {}

/// Stock was reserved for an order. Published to other services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: u64,
    pub reserved: u32,
}
impl Payload for OrderConfirmed {}

/// Stock could not be reserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRejected {
    pub order_id: u64,
    pub reason: String,
}
impl Payload for OrderRejected {}

/// Mapper knowing every payload above.
pub fn mapper() -> MessageMapper {
    MessageMapper::builder()
        .register::<OrderPlaced>()
        .register::<OrderConfirmed>()
        .register::<OrderRejected>()
        .build()
}
