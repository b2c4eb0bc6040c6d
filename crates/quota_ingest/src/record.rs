//! Fixed-layout wire records and the frame decoder.
//!
//! Every frame carries a 169-byte header followed by a payload selected by
//! the six-byte transaction code: `ELD001` is a full per-(area, stock) quota
//! snapshot, `ELD002` a pair of day-trade offsets. All text fields are
//! right-space-padded ASCII; all numeric fields are overpunch-encoded.

use crate::codec;
use crate::error::FeedError;

/// Fixed header length preceding the payload.
pub const HEADER_LEN: usize = 169;

/// Transaction code of the full quota snapshot record.
pub const T_CODE_H01: &[u8; 6] = b"ELD001";
/// Transaction code of the offset record.
pub const T_CODE_H05P: &[u8; 6] = b"ELD002";

/// Largest possible frame: header, full quota record, delimiter.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + H01Record::LEN + 1;

// Header field offsets. The 61 filler bytes at 39..100 are skipped.
const P_CODE: usize = 0;
const T_CODE: usize = 4;
const SRC_ID: usize = 10;
const TIMESTAMP: usize = 13;
const JRNSEQN: usize = 100;
const SYSTEM: usize = 110;
const LIB: usize = 118;
const FILE: usize = 128;
const MEMBER: usize = 138;
const FILE_RRNC: usize = 148;
const ENTRY_TYPE: usize = 158;
const RCD_LEN_CNT: usize = 159;

/// Copies a fixed-width field out of the frame buffer.
fn take<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

/// Generates a fixed-layout record struct: one `[u8; N]` per field in wire
/// order, a `LEN` constant, a space-filled `blank()` constructor, and a
/// bounds-checked `parse()`.
macro_rules! fixed_record {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $field:ident : $len:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            $( pub $field: [u8; $len], )+
        }

        impl $name {
            /// Encoded record length in bytes.
            pub const LEN: usize = 0 $( + $len )+;

            /// A record with every field space-filled, i.e. empty text and
            /// zero numerics. Matches what the host sends for absent values.
            pub fn blank() -> Self {
                Self {
                    $( $field: [b' '; $len], )+
                }
            }

            /// Serializes the record into its wire layout.
            pub fn to_bytes(&self) -> Vec<u8> {
                let mut out = Vec::with_capacity(Self::LEN);
                $( out.extend_from_slice(&self.$field); )+
                out
            }

            /// Parses the record from the start of `buf`.
            pub fn parse(buf: &[u8]) -> Result<Self, FeedError> {
                if buf.len() < Self::LEN {
                    return Err(FeedError::InvalidPacket(format!(
                        concat!(stringify!($name), " payload truncated: {} of {} bytes"),
                        buf.len(),
                        Self::LEN,
                    )));
                }
                let mut pos = 0;
                $(
                    let $field: [u8; $len] = take(buf, pos);
                    #[allow(unused_assignments)]
                    {
                        pos += $len;
                    }
                )+
                Ok(Self { $( $field, )+ })
            }
        }
    };
}

fixed_record! {
    /// `ELD001` — full quota snapshot for one (area center, stock).
    H01Record {
        broker_id: 4,
        area_center: 3,
        stock_id: 6,
        financing_company: 4,
        margin_amount: 11,
        margin_buy_order_amount: 11,
        margin_sell_match_amount: 11,
        margin_qty: 6,
        margin_buy_order_qty: 6,
        margin_sell_match_qty: 6,
        short_amount: 11,
        short_sell_order_amount: 11,
        short_buy_match_amount: 11,
        short_qty: 6,
        short_sell_order_qty: 6,
        short_buy_match_qty: 6,
        popular_margin_mark: 1,
        popular_short_mark: 1,
        remark: 12,
        edit_date: 8,
        edit_time: 6,
        editor: 10,
        margin_buy_match_amount: 11,
        margin_buy_match_qty: 6,
        margin_after_hour_buy_order_amount: 11,
        margin_after_hour_buy_order_qty: 6,
        short_sell_match_amount: 11,
        short_sell_match_qty: 6,
        short_after_hour_sell_order_amount: 11,
        short_after_hour_sell_order_qty: 6,
        day_trade_margin_buy_match_amount: 11,
        day_trade_short_sell_match_amount: 11,
    }
}

fixed_record! {
    /// `ELD002` — day-trade offset record for one (broker/area, stock).
    ///
    /// The broker field doubles as the area-center identifier on this
    /// record.
    H05pRecord {
        dummy: 1,
        broker_id: 2,
        dummy2: 1,
        stock_id: 6,
        financing_company: 4,
        account: 7,
        margin_buy_match_qty: 6,
        short_sell_match_qty: 6,
        day_trade_margin_match_qty: 6,
        day_trade_short_match_qty: 6,
        margin_buy_offset_qty: 6,
        short_sell_offset_qty: 6,
        comment: 12,
        edit_date: 8,
        edit_time: 6,
        author: 10,
        force_margin_buy_match_qty: 6,
        force_short_sell_match_qty: 6,
        in_quota_margin_buy_offset_qty: 6,
        in_quota_short_sell_offset_qty: 6,
    }
}

/// The payload variant selected by the transaction code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Full quota snapshot (`ELD001`).
    H01(Box<H01Record>),
    /// Offset record (`ELD002`).
    H05p(Box<H05pRecord>),
    /// A structurally valid frame whose transaction code has no layout here.
    Other,
}

/// A decoded view over one framed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMessage {
    pub p_code: [u8; 4],
    pub t_code: [u8; 6],
    pub src_id: [u8; 3],
    pub timestamp: [u8; 26],
    pub jrnseqn: [u8; 10],
    /// Originating system; carries the expected area center for `ELD001`.
    pub system: [u8; 8],
    pub lib: [u8; 10],
    pub file: [u8; 10],
    pub member: [u8; 10],
    pub file_rrnc: [u8; 10],
    /// Host operation: `'A'` update, `'C'` create, `'D'` delete, `'F'` wipe.
    /// Only `'A'` and `'C'` are dispatched.
    pub entry_type: u8,
    pub rcd_len_cnt: [u8; 10],
    pub payload: Payload,
}

/// Decodes one frame's content (delimiter already stripped).
///
/// Validates the header, gates on `entry_type`, parses the payload selected
/// by the transaction code, and cross-checks the `ELD001` payload area
/// center against the header `system` field. Unknown transaction codes
/// yield `Payload::Other`; rejecting them is the dispatcher's call.
pub fn decode_frame(content: &[u8]) -> Result<TransactionMessage, FeedError> {
    if content.len() < HEADER_LEN {
        return Err(FeedError::InvalidPacket(format!(
            "header truncated: {} of {HEADER_LEN} bytes",
            content.len()
        )));
    }

    let entry_type = content[ENTRY_TYPE];
    if !matches!(entry_type, b'A' | b'C') {
        return Err(FeedError::InvalidPacket(format!(
            "entry type {:?} is not dispatched",
            entry_type as char
        )));
    }

    let t_code: [u8; 6] = take(content, T_CODE);
    let system: [u8; 8] = take(content, SYSTEM);
    let body = &content[HEADER_LEN..];

    let payload = if &t_code == T_CODE_H01 {
        let record = H01Record::parse(body)?;
        cross_check_area(&system, &record)?;
        Payload::H01(Box::new(record))
    } else if &t_code == T_CODE_H05P {
        Payload::H05p(Box::new(H05pRecord::parse(body)?))
    } else {
        Payload::Other
    };

    Ok(TransactionMessage {
        p_code: take(content, P_CODE),
        t_code,
        src_id: take(content, SRC_ID),
        timestamp: take(content, TIMESTAMP),
        jrnseqn: take(content, JRNSEQN),
        system,
        lib: take(content, LIB),
        file: take(content, FILE),
        member: take(content, MEMBER),
        file_rrnc: take(content, FILE_RRNC),
        entry_type,
        rcd_len_cnt: take(content, RCD_LEN_CNT),
        payload,
    })
}

/// The snapshot's area center must match the header's originating system.
fn cross_check_area(system: &[u8; 8], record: &H01Record) -> Result<(), FeedError> {
    let header_area = codec::trim_right(system)
        .map_err(|_| FeedError::InvalidPacket("system field is not valid text".into()))?;
    let data_area = codec::trim_right(&record.area_center)
        .map_err(|_| FeedError::InvalidPacket("area_center field is not valid text".into()))?;
    if header_area != data_area {
        return Err(FeedError::InvalidPacket(format!(
            "header area center {header_area:?} does not match payload {data_area:?}"
        )));
    }
    Ok(())
}
