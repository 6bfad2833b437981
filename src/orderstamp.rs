//! Order stamps: string-comparable position keys
//!
//! An order stamp places an item in a total order without any coordination
//! between replicas. Stamps compare lexicographically; between any two
//! distinct stamps another one can always be generated with [`between`], and
//! two replicas generating a stamp for the same gap get distinct results
//! because every generated stamp ends with a random suffix.
//!
//! # Alphabet
//!
//! Generated characters are restricted to `[CHAR_MIN, CHAR_MAX)`. Code
//! point 0 and 254 are never produced, which leaves room at both edges of
//! the space. All characters are below U+0100, so byte-wise (UTF-8)
//! comparison agrees with code point comparison.
//!
//! # Example
//!
//! ```rust
//! use richsync_core::orderstamp;
//!
//! let head = orderstamp::present();
//! let tail = orderstamp::past();
//! assert!(tail < head);
//!
//! let mid = orderstamp::between(&tail, &head);
//! assert!(tail < mid && mid < head);
//! ```

use crate::config::DEFAULT_STAMP_SUFFIX_LEN;
use crate::error::StampError;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lowest character code used in generated stamps (inclusive)
pub const CHAR_MIN: u32 = 1;

/// Highest character code used in generated stamps (exclusive)
pub const CHAR_MAX: u32 = 254;

/// Reference date for [`past`]: 2015-01-01 01:00:00 UTC
pub const MIN_REF_DATE_MS: u64 = 1_420_074_000_000;

/// Last timestamp handed out by [`present`]
static LAST_PRESENT_MS: AtomicU64 = AtomicU64::new(0);

/// An opaque, lexicographically comparable position key
///
/// Stamps are immutable: an item that moves gets a new stamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderStamp(String);

impl OrderStamp {
    /// Wrap a raw stamp string (e.g. one read back from storage)
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the stamp, returning its raw string form
    pub fn into_string(self) -> String {
        self.0
    }

    /// Concatenate a sub-stamp under this one
    ///
    /// The result sorts right after `self` and keeps the relative order of
    /// every `child` nested this way. Used when normalization moves nodes up
    /// one level and must keep them next to their former parent.
    pub fn nest(&self, child: &OrderStamp) -> OrderStamp {
        let mut out = String::with_capacity(self.0.len() + child.0.len() + 1);
        out.push_str(&self.0);
        out.push(to_char(CHAR_MIN));
        out.push_str(&child.0);
        OrderStamp(out)
    }
}

impl fmt::Display for OrderStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Stamps contain control characters, so escape them.
        write!(f, "{}", self.0.escape_debug())
    }
}

impl From<&str> for OrderStamp {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Generates stamps with a configurable random suffix length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StampGenerator {
    suffix_len: usize,
}

impl Default for StampGenerator {
    fn default() -> Self {
        Self {
            suffix_len: DEFAULT_STAMP_SUFFIX_LEN,
        }
    }
}

impl StampGenerator {
    /// Create a generator appending `suffix_len` random characters
    ///
    /// # Panics
    ///
    /// Panics if `suffix_len` is zero.
    pub fn new(suffix_len: usize) -> Self {
        assert!(suffix_len > 0, "stamp suffix length must be at least 1");
        Self { suffix_len }
    }

    /// Length of the random suffix
    pub fn suffix_len(&self) -> usize {
        self.suffix_len
    }

    /// Generate a stamp strictly between `a` and `b`
    ///
    /// The operands may be given in either order.
    ///
    /// # Panics
    ///
    /// Panics where [`StampGenerator::try_between`] returns an error: if
    /// `a == b`, or if no stamp over the alphabet exists between them.
    ///
    /// # Example
    ///
    /// ```rust
    /// use richsync_core::orderstamp::{OrderStamp, StampGenerator};
    ///
    /// let gen = StampGenerator::new(4);
    /// let a = OrderStamp::from("a");
    /// let b = OrderStamp::from("b");
    /// let c = gen.between(&b, &a);
    /// assert!(a < c && c < b);
    /// ```
    pub fn between(&self, a: &OrderStamp, b: &OrderStamp) -> OrderStamp {
        match self.try_between(a, b) {
            Ok(stamp) => stamp,
            Err(err) => panic!("{}", err),
        }
    }

    /// Generate a stamp strictly between `a` and `b`, if one exists
    ///
    /// # Errors
    ///
    /// [`StampError::Equal`] when `a == b`. [`StampError::NoRoom`] when the
    /// larger operand is the smaller one followed only by `CHAR_MIN`
    /// characters; generated stamps never end that way.
    pub fn try_between(&self, a: &OrderStamp, b: &OrderStamp) -> Result<OrderStamp, StampError> {
        if a == b {
            return Err(StampError::Equal(a.0.clone()));
        }
        let (lo_stamp, hi_stamp) = if a < b { (a, b) } else { (b, a) };
        let lo: Vec<u32> = lo_stamp.0.chars().map(u32::from).collect();
        let hi: Vec<u32> = hi_stamp.0.chars().map(u32::from).collect();

        let mut rng = rand::thread_rng();
        let prefix = common_prefix_len(&lo, &hi);
        let mut out: Vec<u32> = lo[..prefix].to_vec();

        if prefix == lo.len() {
            // lo is a prefix of hi: anything longer than lo that sorts
            // before hi's remainder works.
            let rest = &hi[prefix..];
            let split = rest.iter().position(|&c| c > CHAR_MIN).ok_or_else(|| StampError::NoRoom {
                lo: lo_stamp.0.clone(),
                hi: hi_stamp.0.clone(),
            })?;
            out.extend_from_slice(&rest[..split]);
            let upper = rest[split].min(CHAR_MAX);
            out.push(rng.gen_range(CHAR_MIN..upper));
        } else {
            let (left, right) = (lo[prefix], hi[prefix]);
            let upper = right.min(CHAR_MAX);
            if left + 1 < upper {
                out.push(rng.gen_range(left + 1..upper));
            } else {
                // No room at this position. Keep lo's char (so the result
                // stays below hi) and find a position in lo's remainder that
                // can be bumped.
                out.push(left);
                for &c in &lo[prefix + 1..] {
                    if c + 1 < CHAR_MAX {
                        out.push(rng.gen_range(c + 1..CHAR_MAX));
                        break;
                    }
                    out.push(c);
                }
            }
        }

        // The suffix makes concurrent results distinct. It also makes the
        // result strictly longer than lo when lo was copied in full. The last
        // character is never CHAR_MIN so the gap after a stamp stays open.
        for _ in 1..self.suffix_len {
            out.push(rng.gen_range(CHAR_MIN..CHAR_MAX));
        }
        out.push(rng.gen_range(CHAR_MIN + 1..CHAR_MAX));

        Ok(OrderStamp(out.into_iter().map(to_char).collect()))
    }
}

/// A fixed stamp that sorts before every stamp produced by [`present`]
///
/// Use it to insert at the tail edge of a list.
pub fn past() -> OrderStamp {
    from_timestamp(MIN_REF_DATE_MS, "")
}

/// A stamp sorting after every stamp previously produced by this function
///
/// Use it to insert at the head edge of a list. Within one process the
/// embedded timestamp never repeats, so results are strictly increasing.
pub fn present() -> OrderStamp {
    let now = Utc::now().timestamp_millis().max(0) as u64;
    let mut issued = now;
    let _ = LAST_PRESENT_MS.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
        issued = now.max(last + 1);
        Some(issued)
    });
    from_timestamp(issued, &uuid::Uuid::new_v4().simple().to_string())
}

/// A stamp built from a millisecond timestamp and a unique id
///
/// Stamps built this way sort by timestamp first. Pass the key of the item
/// being ordered rather than a fresh id on every call.
pub fn from_timestamp(timestamp_ms: u64, unique_id: &str) -> OrderStamp {
    let mut out = encode_number(timestamp_ms);
    out.push_str(unique_id);
    OrderStamp(out)
}

/// Same as [`from_timestamp`] for a calendar date
///
/// Dates before the Unix epoch clamp to zero.
pub fn from_date(date: DateTime<Utc>, unique_id: &str) -> OrderStamp {
    from_timestamp(date.timestamp_millis().max(0) as u64, unique_id)
}

/// A stamp for a list index, sorting numerically
///
/// ```rust
/// use richsync_core::orderstamp::from_index;
///
/// assert!(from_index(9) < from_index(10));
/// assert!(from_index(99) < from_index(100));
/// ```
pub fn from_index(index: u64) -> OrderStamp {
    OrderStamp(encode_number(index))
}

/// Convenience wrapper around [`StampGenerator::between`] with the default
/// suffix length
///
/// # Panics
///
/// Panics if `a == b`, or if no stamp exists between them.
pub fn between(a: &OrderStamp, b: &OrderStamp) -> OrderStamp {
    StampGenerator::default().between(a, b)
}

/// Fallible form of [`between`]
pub fn try_between(a: &OrderStamp, b: &OrderStamp) -> Result<OrderStamp, StampError> {
    StampGenerator::default().try_between(a, b)
}

/// Length-prefixed decimal encoding
///
/// The digit count is encoded as a letter ahead of the digits, so a number
/// with more digits always sorts after one with fewer.
fn encode_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + 1);
    out.push((b'A' + digits.len() as u8) as char);
    out.push_str(&digits);
    out
}

fn common_prefix_len(a: &[u32], b: &[u32]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn to_char(code: u32) -> char {
    // Generated codes are below CHAR_MAX; copied ones came from a valid char.
    char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
}
