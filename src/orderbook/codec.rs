//! Fixed-width big-endian signed integer codec and the composite sort
//! keys built from it.
//!
//! Grounded in the original system's `encode`/`decode` pair
//! (`int.to_bytes(8, 'big', signed=True)` / `int.from_bytes(..., 'big',
//! signed=True)`): every key and value in the store is a concatenation
//! of these 8-byte words.

/// Width in bytes of a single encoded integer.
pub const WORD_SIZE: usize = 8;

/// Width in bytes of a composite key or value (two words).
pub const PAIR_SIZE: usize = WORD_SIZE * 2;

/// Encode a signed 64-bit integer as 8-byte two's-complement
/// big-endian.
pub fn encode(i: i64) -> [u8; WORD_SIZE] {
    i.to_be_bytes()
}

/// Decode 8 big-endian bytes back into a signed 64-bit integer.
pub fn decode(bytes: &[u8; WORD_SIZE]) -> i64 {
    i64::from_be_bytes(*bytes)
}

/// A 16-byte sort key: `encode(price_signed) || encode(id)`.
///
/// Lexicographic byte ordering of this key equals price-time priority:
/// ascending for asks, descending-by-price for bids once the caller
/// negates `price` before calling [`sort_key`].
pub type SortKey = [u8; PAIR_SIZE];

/// Build the sort key for a resting order.
///
/// `price_signed` must already have been negated by the caller for the
/// bid side (see [`crate::orderbook::types::Side::price_sign`]).
pub fn sort_key(price_signed: i64, id: i64) -> SortKey {
    let mut out = [0u8; PAIR_SIZE];
    out[..WORD_SIZE].copy_from_slice(&encode(price_signed));
    out[WORD_SIZE..].copy_from_slice(&encode(id));
    out
}

/// Split a sort key back into `(price_signed, id)`.
pub fn decode_sort_key(key: &SortKey) -> (i64, i64) {
    let mut price_bytes = [0u8; WORD_SIZE];
    let mut id_bytes = [0u8; WORD_SIZE];
    price_bytes.copy_from_slice(&key[..WORD_SIZE]);
    id_bytes.copy_from_slice(&key[WORD_SIZE..]);
    (decode(&price_bytes), decode(&id_bytes))
}

/// The 16-byte value stored alongside a resting order's key:
/// `encode(qty_remaining) || encode(account_id)`.
pub type ValueWord = [u8; PAIR_SIZE];

/// Build the value word for a resting order.
pub fn value_word(qty_remaining: i64, account_id: i64) -> ValueWord {
    let mut out = [0u8; PAIR_SIZE];
    out[..WORD_SIZE].copy_from_slice(&encode(qty_remaining));
    out[WORD_SIZE..].copy_from_slice(&encode(account_id));
    out
}

/// Split a value word back into `(qty_remaining, account_id)`.
pub fn decode_value_word(value: &ValueWord) -> (i64, i64) {
    let mut qty_bytes = [0u8; WORD_SIZE];
    let mut acct_bytes = [0u8; WORD_SIZE];
    qty_bytes.copy_from_slice(&value[..WORD_SIZE]);
    acct_bytes.copy_from_slice(&value[WORD_SIZE..]);
    (decode(&qty_bytes), decode(&acct_bytes))
}

/// An 8-byte id key, used as the key into the `ids` keyspace.
pub type IdKey = [u8; WORD_SIZE];

/// Build the id key for the `ids` keyspace.
pub fn id_key(id: i64) -> IdKey {
    encode(id)
}
