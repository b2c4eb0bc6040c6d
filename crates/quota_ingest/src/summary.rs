//! The per-(area, stock) quota aggregate and its derived-output math.

use crate::codec::DecodeError;
use serde::{Deserialize, Serialize};

/// Area-center value of the company-wide rollup.
pub const COMPANY_AREA: &str = "ALL";
/// Document key prefix shared by all summaries.
pub const KEY_PREFIX: &str = "summary:";

/// Key of the per-area summary: `summary:<area>:<stock>`.
pub fn summary_key(area_center: &str, stock_id: &str) -> String {
    format!("{KEY_PREFIX}{area_center}:{stock_id}")
}

/// Key of the company rollup: `summary:ALL:<stock>`.
pub fn company_key(stock_id: &str) -> String {
    summary_key(COMPANY_AREA, stock_id)
}

/// Raw quota inputs preserved between updates.
///
/// The first eighteen fields arrive with every full snapshot; the two
/// offsets arrive separately and survive snapshot updates. Held in memory
/// only — the published document carries just the derived outputs, so a
/// reloaded summary starts from zero inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaInputs {
    pub margin_amount: i64,
    pub margin_buy_order_amount: i64,
    pub margin_sell_match_amount: i64,
    pub margin_qty: i64,
    pub margin_buy_order_qty: i64,
    pub margin_sell_match_qty: i64,
    pub short_amount: i64,
    pub short_sell_order_amount: i64,
    pub short_qty: i64,
    pub short_sell_order_qty: i64,
    pub margin_buy_match_amount: i64,
    pub margin_buy_match_qty: i64,
    pub margin_after_hour_buy_order_amount: i64,
    pub margin_after_hour_buy_order_qty: i64,
    pub short_sell_match_amount: i64,
    pub short_sell_match_qty: i64,
    pub short_after_hour_sell_order_amount: i64,
    pub short_after_hour_sell_order_qty: i64,

    /// Last-seen day-trade buy offset; not overwritten by snapshots.
    pub margin_buy_offset_qty: i64,
    /// Last-seen day-trade sell offset; not overwritten by snapshots.
    pub short_sell_offset_qty: i64,
}

/// The eight derived availability figures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivedQuota {
    pub margin_available_amount: i64,
    pub margin_available_qty: i64,
    pub short_available_amount: i64,
    pub short_available_qty: i64,
    pub after_margin_available_amount: i64,
    pub after_margin_available_qty: i64,
    pub after_short_available_amount: i64,
    pub after_short_available_qty: i64,
}

fn add(a: i64, b: i64) -> Result<i64, DecodeError> {
    a.checked_add(b).ok_or(DecodeError::Overflow)
}

fn sub(a: i64, b: i64) -> Result<i64, DecodeError> {
    a.checked_sub(b).ok_or(DecodeError::Overflow)
}

impl QuotaInputs {
    /// Computes the derived availability figures from the raw inputs.
    ///
    /// Pure: the result depends on nothing but `self`. All arithmetic is
    /// checked; overflow is an error, never a wrap.
    pub fn derive(&self) -> Result<DerivedQuota, DecodeError> {
        let margin_available_amount = add(
            sub(self.margin_amount, self.margin_buy_order_amount)?,
            self.margin_sell_match_amount,
        )?;
        let margin_available_qty = add(
            add(
                sub(self.margin_qty, self.margin_buy_order_qty)?,
                self.margin_sell_match_qty,
            )?,
            self.margin_buy_offset_qty,
        )?;
        let short_available_amount = sub(self.short_amount, self.short_sell_order_amount)?;
        let short_available_qty = add(
            sub(self.short_qty, self.short_sell_order_qty)?,
            self.short_sell_offset_qty,
        )?;

        let after_margin_available_amount = sub(
            add(
                sub(self.margin_amount, self.margin_buy_match_amount)?,
                self.margin_sell_match_amount,
            )?,
            self.margin_after_hour_buy_order_amount,
        )?;
        let after_margin_available_qty = add(
            sub(
                add(
                    sub(self.margin_qty, self.margin_buy_match_qty)?,
                    self.margin_sell_match_qty,
                )?,
                self.margin_after_hour_buy_order_qty,
            )?,
            self.margin_buy_offset_qty,
        )?;
        let after_short_available_amount = sub(
            sub(self.short_amount, self.short_sell_match_amount)?,
            self.short_after_hour_sell_order_amount,
        )?;
        let after_short_available_qty = add(
            sub(
                sub(self.short_qty, self.short_sell_order_qty)?,
                self.short_after_hour_sell_order_qty,
            )?,
            self.short_sell_offset_qty,
        )?;

        Ok(DerivedQuota {
            margin_available_amount,
            margin_available_qty,
            short_available_amount,
            short_available_qty,
            after_margin_available_amount,
            after_margin_available_qty,
            after_short_available_amount,
            after_short_available_qty,
        })
    }
}

/// The central aggregate, one per `summary:<area>:<stock>` key.
///
/// The serialized form is the published document: identity, the eight
/// derived outputs, and the branch list. The raw inputs stay in memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub stock_id: String,
    pub area_center: String,
    pub margin_available_amount: i64,
    pub margin_available_qty: i64,
    pub short_available_amount: i64,
    pub short_available_qty: i64,
    pub after_margin_available_amount: i64,
    pub after_margin_available_qty: i64,
    pub after_short_available_amount: i64,
    pub after_short_available_qty: i64,
    pub belong_branches: Vec<String>,
    #[serde(skip)]
    pub inputs: QuotaInputs,
}

impl Summary {
    /// Recomputes the eight derived outputs from the raw inputs, replacing
    /// whatever was there before.
    pub fn recompute(&mut self) -> Result<(), DecodeError> {
        let d = self.inputs.derive()?;
        self.margin_available_amount = d.margin_available_amount;
        self.margin_available_qty = d.margin_available_qty;
        self.short_available_amount = d.short_available_amount;
        self.short_available_qty = d.short_available_qty;
        self.after_margin_available_amount = d.after_margin_available_amount;
        self.after_margin_available_qty = d.after_margin_available_qty;
        self.after_short_available_amount = d.after_short_available_amount;
        self.after_short_available_qty = d.after_short_available_qty;
        Ok(())
    }

    /// Adds `other`'s derived outputs into this summary, componentwise.
    /// Used to build the company rollup.
    pub fn accumulate(&mut self, other: &Summary) -> Result<(), DecodeError> {
        self.margin_available_amount = add(self.margin_available_amount, other.margin_available_amount)?;
        self.margin_available_qty = add(self.margin_available_qty, other.margin_available_qty)?;
        self.short_available_amount = add(self.short_available_amount, other.short_available_amount)?;
        self.short_available_qty = add(self.short_available_qty, other.short_available_qty)?;
        self.after_margin_available_amount =
            add(self.after_margin_available_amount, other.after_margin_available_amount)?;
        self.after_margin_available_qty =
            add(self.after_margin_available_qty, other.after_margin_available_qty)?;
        self.after_short_available_amount =
            add(self.after_short_available_amount, other.after_short_available_amount)?;
        self.after_short_available_qty =
            add(self.after_short_available_qty, other.after_short_available_qty)?;
        Ok(())
    }
}
