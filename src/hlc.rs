//! Hybrid Logical Clock: value type, packed serialization, and the
//! `now`/`send`/`receive` engine (spec.md §4.1).

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Error;

const PHYSICAL_WIDTH: usize = 15;
const LOGICAL_WIDTH: usize = 5;
const DELIMITER: char = ':';
const BASE36_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A Hybrid Logical Clock value: `(physical, logical, node)` compared
/// lexicographically in that order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hlc {
    pub physical: u64,
    pub logical: u32,
    pub node: String,
}

impl Hlc {
    pub fn new(physical: u64, logical: u32, node: impl Into<String>) -> Self {
        Self {
            physical,
            logical,
            node: node.into(),
        }
    }

    /// Lexicographically order-preserving packed form for the
    /// `(physical, logical)` prefix; `node` is appended verbatim.
    #[must_use]
    pub fn pack(&self) -> String {
        format!(
            "{:0phys_width$}{delim}{log:0log_width$}{delim}{node}",
            self.physical,
            delim = DELIMITER,
            log = to_base36(self.logical, LOGICAL_WIDTH),
            node = self.node,
            phys_width = PHYSICAL_WIDTH,
            log_width = LOGICAL_WIDTH,
        )
    }

    /// Parses a packed HLC. Returns `None` for the empty string or any
    /// string whose physical/logical fields are not parseable integers.
    #[must_use]
    pub fn parse(packed: &str) -> Option<Self> {
        if packed.is_empty() {
            return None;
        }

        let mut parts = packed.splitn(3, DELIMITER);
        let physical_s = parts.next()?;
        let logical_s = parts.next()?;
        let node = parts.next().unwrap_or_default();

        let physical = physical_s.parse::<u64>().ok()?;
        let logical = from_base36(logical_s)?;

        Some(Self {
            physical,
            logical,
            node: node.to_string(),
        })
    }
}

fn to_base36(mut value: u32, width: usize) -> String {
    if value == 0 {
        return "0".repeat(width);
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36_ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();

    let s = String::from_utf8(digits).expect("base36 alphabet is ASCII");
    if s.len() >= width {
        s
    } else {
        format!("{}{}", "0".repeat(width - s.len()), s)
    }
}

fn from_base36(s: &str) -> Option<u32> {
    if s.is_empty() {
        return None;
    }
    let mut value: u32 = 0;
    for c in s.chars() {
        let digit = c.to_digit(36)?;
        value = value.checked_mul(36)?.checked_add(digit)?;
    }
    Some(value)
}

/// `compare_hlc`: total order over parsed values.
#[must_use]
pub fn compare_hlc(a: &Hlc, b: &Hlc) -> Ordering {
    a.cmp(b)
}

/// `compare_packed`: invalid packed strings compare as strictly less than
/// any valid one; two invalid strings compare equal.
#[must_use]
pub fn compare_packed(a: &str, b: &str) -> Ordering {
    match (Hlc::parse(a), Hlc::parse(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_hlc(&a, &b),
    }
}

fn wall_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as u64
}

/// `now(node)`: a fresh, non-monotonic reading of the wall clock.
#[must_use]
pub fn now(node: impl Into<String>) -> Hlc {
    Hlc::new(wall_ms(), 0, node)
}

/// Mutable HLC engine state for a single replica, implementing the
/// `send`/`receive` operations from spec.md §4.1.
#[derive(Clone, Debug)]
pub struct HlcClock {
    node: String,
    state: Hlc,
}

impl HlcClock {
    /// Initializes state via `now(node)`, per the Replicator's
    /// construction contract (spec.md §4.4).
    #[must_use]
    pub fn new(node: impl Into<String>) -> Self {
        let node = node.into();
        let state = now(node.clone());
        Self { node, state }
    }

    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    #[must_use]
    pub fn current(&self) -> &Hlc {
        &self.state
    }

    /// `send(state) -> HLC`: advances and returns the new local clock
    /// value. Every call returns a value strictly greater than every
    /// prior value returned by this engine.
    pub fn send(&mut self) -> Hlc {
        let p_now = wall_ms();
        let p_old = self.state.physical;
        let c_old = self.state.logical;

        let p_new = p_now.max(p_old);
        let c_new = if p_now > p_old { 0 } else { c_old + 1 };

        self.state = Hlc::new(p_new, c_new, self.node.clone());
        self.state.clone()
    }

    /// `receive(state, remote, now, max_drift) -> HLC`. Leaves `self`
    /// unmutated and returns `Err` if `max_drift` is exceeded.
    pub fn receive(
        &mut self,
        remote: &Hlc,
        now_ms: Option<u64>,
        max_drift: Option<u64>,
    ) -> Result<Hlc, Error> {
        let now_ms = now_ms.unwrap_or_else(wall_ms);

        if let Some(max_drift) = max_drift {
            let drift = remote.physical as i64 - now_ms as i64;
            if drift > max_drift as i64 {
                return Err(Error::TimeDrift {
                    drift_ms: drift,
                    max_drift_ms: max_drift,
                });
            }
        }

        let new = if now_ms > self.state.physical && now_ms > remote.physical {
            Hlc::new(now_ms, 0, self.node.clone())
        } else if self.state.physical < remote.physical {
            Hlc::new(remote.physical, remote.logical + 1, self.node.clone())
        } else if self.state.physical > remote.physical {
            Hlc::new(self.state.physical, self.state.logical + 1, self.node.clone())
        } else {
            Hlc::new(
                self.state.physical,
                self.state.logical.max(remote.logical) + 1,
                self.node.clone(),
            )
        };

        self.state = new.clone();
        Ok(new)
    }
}
