//! Transaction handlers and the t_code dispatch table.
//!
//! Each handler applies one record variant to the summary store and then
//! drives the company rollup. All handlers run on the consumer thread, so
//! publishes for a given key leave in wire order.

use crate::area::AreaMap;
use crate::codec;
use crate::error::FeedError;
use crate::record::{Payload, TransactionMessage, T_CODE_H01, T_CODE_H05P};
use crate::store::SummaryStore;
use crate::summary::summary_key;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

/// Capability shared by all transaction handlers.
pub trait PacketHandler: Send + Sync {
    /// Applies one decoded packet. Errors drop the packet; the stream
    /// continues with the next frame.
    fn handle(&self, msg: &TransactionMessage) -> Result<(), FeedError>;

    /// Handler name for logs.
    fn name(&self) -> &'static str;
}

fn trim_text(field: &[u8], what: &str) -> Result<String, FeedError> {
    codec::trim_right(field)
        .map(str::to_string)
        .map_err(|_| FeedError::InvalidPacket(format!("{what} is not valid text")))
}

/// Applies `ELD001` full quota snapshots.
pub struct H01Handler {
    store: Arc<SummaryStore>,
    areas: Arc<AreaMap>,
}

impl H01Handler {
    pub fn new(store: Arc<SummaryStore>, areas: Arc<AreaMap>) -> Self {
        Self { store, areas }
    }
}

impl PacketHandler for H01Handler {
    fn handle(&self, msg: &TransactionMessage) -> Result<(), FeedError> {
        let Payload::H01(rec) = &msg.payload else {
            return Err(FeedError::Unexpected(
                "quota snapshot handler received a different payload".into(),
            ));
        };

        let stock_id = trim_text(&rec.stock_id, "stock_id")?;
        let area_center = trim_text(&rec.area_center, "area_center")?;
        if !self.areas.is_valid_area(&area_center) {
            return Err(FeedError::InvalidPacket(format!(
                "area center {area_center:?} is not configured"
            )));
        }

        // Decode every numeric field before touching the store, so a bad
        // field leaves the cached summary exactly as it was.
        let margin_amount = codec::decode_overpunch(&rec.margin_amount)?;
        let margin_buy_order_amount = codec::decode_overpunch(&rec.margin_buy_order_amount)?;
        let margin_sell_match_amount = codec::decode_overpunch(&rec.margin_sell_match_amount)?;
        let margin_qty = codec::decode_overpunch(&rec.margin_qty)?;
        let margin_buy_order_qty = codec::decode_overpunch(&rec.margin_buy_order_qty)?;
        let margin_sell_match_qty = codec::decode_overpunch(&rec.margin_sell_match_qty)?;
        let short_amount = codec::decode_overpunch(&rec.short_amount)?;
        let short_sell_order_amount = codec::decode_overpunch(&rec.short_sell_order_amount)?;
        let short_qty = codec::decode_overpunch(&rec.short_qty)?;
        let short_sell_order_qty = codec::decode_overpunch(&rec.short_sell_order_qty)?;
        let margin_buy_match_amount = codec::decode_overpunch(&rec.margin_buy_match_amount)?;
        let margin_buy_match_qty = codec::decode_overpunch(&rec.margin_buy_match_qty)?;
        let margin_after_hour_buy_order_amount =
            codec::decode_overpunch(&rec.margin_after_hour_buy_order_amount)?;
        let margin_after_hour_buy_order_qty =
            codec::decode_overpunch(&rec.margin_after_hour_buy_order_qty)?;
        let short_sell_match_amount = codec::decode_overpunch(&rec.short_sell_match_amount)?;
        let short_sell_match_qty = codec::decode_overpunch(&rec.short_sell_match_qty)?;
        let short_after_hour_sell_order_amount =
            codec::decode_overpunch(&rec.short_after_hour_sell_order_amount)?;
        let short_after_hour_sell_order_qty =
            codec::decode_overpunch(&rec.short_after_hour_sell_order_qty)?;

        let key = summary_key(&area_center, &stock_id);
        let branches = self.areas.branches_for(&area_center).to_vec();

        let updated = self.store.try_mutate(&key, |summary| {
            summary.stock_id = stock_id.clone();
            summary.area_center = area_center.clone();
            summary.belong_branches = branches.clone();

            let inputs = &mut summary.inputs;
            inputs.margin_amount = margin_amount;
            inputs.margin_buy_order_amount = margin_buy_order_amount;
            inputs.margin_sell_match_amount = margin_sell_match_amount;
            inputs.margin_qty = margin_qty;
            inputs.margin_buy_order_qty = margin_buy_order_qty;
            inputs.margin_sell_match_qty = margin_sell_match_qty;
            inputs.short_amount = short_amount;
            inputs.short_sell_order_amount = short_sell_order_amount;
            inputs.short_qty = short_qty;
            inputs.short_sell_order_qty = short_sell_order_qty;
            inputs.margin_buy_match_amount = margin_buy_match_amount;
            inputs.margin_buy_match_qty = margin_buy_match_qty;
            inputs.margin_after_hour_buy_order_amount = margin_after_hour_buy_order_amount;
            inputs.margin_after_hour_buy_order_qty = margin_after_hour_buy_order_qty;
            inputs.short_sell_match_amount = short_sell_match_amount;
            inputs.short_sell_match_qty = short_sell_match_qty;
            inputs.short_after_hour_sell_order_amount = short_after_hour_sell_order_amount;
            inputs.short_after_hour_sell_order_qty = short_after_hour_sell_order_qty;
            // margin_buy_offset_qty / short_sell_offset_qty keep their
            // last-seen values: snapshots do not carry offsets.

            summary.recompute().map_err(FeedError::from)
        })?;

        debug!(
            stock_id = %updated.stock_id,
            area_center = %updated.area_center,
            margin_available_qty = updated.margin_available_qty,
            "quota snapshot applied"
        );

        self.store.sync(&key, &updated).map_err(|e| {
            error!(key = %key, error = %e, "publish failed after quota snapshot");
            e
        })?;
        self.store.update_company_rollup(&stock_id)
    }

    fn name(&self) -> &'static str {
        "h01"
    }
}

/// Applies `ELD002` day-trade offset records.
pub struct H05pHandler {
    store: Arc<SummaryStore>,
    areas: Arc<AreaMap>,
}

impl H05pHandler {
    pub fn new(store: Arc<SummaryStore>, areas: Arc<AreaMap>) -> Self {
        Self { store, areas }
    }
}

impl PacketHandler for H05pHandler {
    fn handle(&self, msg: &TransactionMessage) -> Result<(), FeedError> {
        let Payload::H05p(rec) = &msg.payload else {
            return Err(FeedError::Unexpected(
                "offset handler received a different payload".into(),
            ));
        };

        let stock_id = trim_text(&rec.stock_id, "stock_id")?;
        // The broker field carries the area center on this record.
        let area_center = trim_text(&rec.broker_id, "broker_id")?;
        if !self.areas.is_valid_area(&area_center) {
            return Err(FeedError::InvalidPacket(format!(
                "broker id {area_center:?} is not a configured area center"
            )));
        }

        let margin_buy_offset_qty = codec::decode_overpunch(&rec.margin_buy_offset_qty)?;
        let short_sell_offset_qty = codec::decode_overpunch(&rec.short_sell_offset_qty)?;

        let key = summary_key(&area_center, &stock_id);
        let branches = self.areas.branches_for(&area_center).to_vec();

        let updated = self.store.try_mutate(&key, |summary| {
            // Stored verbatim: an all-zero offset record is a clear.
            summary.inputs.margin_buy_offset_qty = margin_buy_offset_qty;
            summary.inputs.short_sell_offset_qty = short_sell_offset_qty;

            // Backfill identity when this key was first created here.
            if summary.stock_id.is_empty() {
                summary.stock_id = stock_id.clone();
            }
            if summary.area_center.is_empty() {
                summary.area_center = area_center.clone();
            }
            if summary.belong_branches.is_empty() {
                summary.belong_branches = branches.clone();
            }

            summary.recompute().map_err(FeedError::from)
        })?;

        debug!(
            stock_id = %updated.stock_id,
            area_center = %updated.area_center,
            margin_buy_offset_qty,
            short_sell_offset_qty,
            "offsets applied"
        );

        self.store.sync(&key, &updated).map_err(|e| {
            error!(key = %key, error = %e, "publish failed after offset update");
            e
        })?;
        self.store.update_company_rollup(&stock_id)
    }

    fn name(&self) -> &'static str {
        "h05p"
    }
}

/// Routes decoded packets to the handler registered for their transaction
/// code.
pub struct Dispatcher {
    handlers: HashMap<[u8; 6], Box<dyn PacketHandler>>,
}

impl Dispatcher {
    /// Builds the standard table: `ELD001` and `ELD002`.
    pub fn new(store: Arc<SummaryStore>, areas: Arc<AreaMap>) -> Self {
        let mut handlers: HashMap<[u8; 6], Box<dyn PacketHandler>> = HashMap::new();
        handlers.insert(
            *T_CODE_H01,
            Box::new(H01Handler::new(Arc::clone(&store), Arc::clone(&areas))),
        );
        handlers.insert(*T_CODE_H05P, Box::new(H05pHandler::new(store, areas)));
        Self { handlers }
    }

    /// Dispatches one packet; unknown transaction codes are an error.
    pub fn dispatch(&self, msg: &TransactionMessage) -> Result<(), FeedError> {
        match self.handlers.get(&msg.t_code) {
            Some(handler) => {
                debug!(handler = handler.name(), "dispatching");
                handler.handle(msg)
            }
            None => Err(FeedError::UnknownTransactionCode(
                String::from_utf8_lossy(&msg.t_code).into_owned(),
            )),
        }
    }
}
