//! Resource quantities and resource lists.
//!
//! A `Quantity` is a count of milli-units of some named resource ("cpu",
//! "memory", "nvidia.com/gpu"). Executors report quantities as strings in
//! the usual Kubernetes notation (`"100m"`, `"2"`, `"4Gi"`); parsing
//! failures are protocol errors and fail the carrying request.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when parsing a quantity string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity string")]
    Empty,

    #[error("unparseable quantity: {0:?}")]
    Malformed(String),

    #[error("quantity out of range: {0:?}")]
    OutOfRange(String),
}

/// A resource quantity in integer milli-units.
///
/// `Quantity::from_whole(2)` is two full units (2000 milli-units);
/// `"500m"` parses to 500 milli-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Quantity(i64);

/// Multiplier suffixes accepted on the wire. Binary suffixes follow the
/// 1024 ladder, decimal ones the 1000 ladder.
const SUFFIXES: &[(&str, i64)] = &[
    ("Ki", 1 << 10),
    ("Mi", 1 << 20),
    ("Gi", 1 << 30),
    ("Ti", 1 << 40),
    ("k", 1_000),
    ("K", 1_000),
    ("M", 1_000_000),
    ("G", 1_000_000_000),
    ("T", 1_000_000_000_000),
];

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    /// Build from raw milli-units.
    pub fn from_millis(millis: i64) -> Self {
        Quantity(millis)
    }

    /// Build from whole units.
    pub fn from_whole(units: i64) -> Self {
        Quantity(units.saturating_mul(1000))
    }

    /// Raw milli-unit value.
    pub fn millis(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(other.0))
    }

    /// Subtraction clamped at zero. Accounting releases must never drive
    /// a band negative.
    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_sub(other.0).max(0))
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }

        // Milli-unit notation: "1500m" → 1500.
        if let Some(num) = s.strip_suffix('m') {
            let millis: i64 = num
                .parse()
                .map_err(|_| QuantityError::Malformed(s.to_string()))?;
            if millis < 0 {
                return Err(QuantityError::OutOfRange(s.to_string()));
            }
            return Ok(Quantity(millis));
        }

        // Suffixed whole values: "4Gi", "500M". Longest suffix first so
        // "Mi" is not mistaken for "M".
        for (suffix, mult) in SUFFIXES {
            if let Some(num) = s.strip_suffix(suffix) {
                let units: i64 = num
                    .parse()
                    .map_err(|_| QuantityError::Malformed(s.to_string()))?;
                let millis = units
                    .checked_mul(*mult)
                    .and_then(|v| v.checked_mul(1000))
                    .ok_or_else(|| QuantityError::OutOfRange(s.to_string()))?;
                if millis < 0 {
                    return Err(QuantityError::OutOfRange(s.to_string()));
                }
                return Ok(Quantity(millis));
            }
        }

        // Plain decimal: "2", "1.5". At most milli precision.
        let (int_part, frac_part) = match s.split_once('.') {
            Some((i, f)) => (i, f),
            None => (s, ""),
        };
        if frac_part.len() > 3 || (!frac_part.is_empty() && !frac_part.chars().all(|c| c.is_ascii_digit())) {
            return Err(QuantityError::Malformed(s.to_string()));
        }
        let units: i64 = int_part
            .parse()
            .map_err(|_| QuantityError::Malformed(s.to_string()))?;
        if units < 0 {
            return Err(QuantityError::OutOfRange(s.to_string()));
        }
        let mut frac_millis: i64 = 0;
        if !frac_part.is_empty() {
            let padded = format!("{frac_part:0<3}");
            frac_millis = padded
                .parse()
                .map_err(|_| QuantityError::Malformed(s.to_string()))?;
        }
        let millis = units
            .checked_mul(1000)
            .and_then(|v| v.checked_add(frac_millis))
            .ok_or_else(|| QuantityError::OutOfRange(s.to_string()))?;
        Ok(Quantity(millis))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}", self.0 / 1000)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl Serialize for Quantity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A named set of resource quantities.
///
/// Backed by a `BTreeMap` so iteration order (and therefore the derived
/// `Hash`/`Eq` used by NodeType keys) is deterministic. A resource absent
/// from the map is zero.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, Hash)]
pub struct ResourceList(BTreeMap<String, Quantity>);

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a wire-level `resource name → quantity string` map.
    pub fn parse(raw: &BTreeMap<String, String>) -> Result<Self, QuantityError> {
        let mut list = ResourceList::new();
        for (name, value) in raw {
            list.0.insert(name.clone(), value.parse()?);
        }
        Ok(list)
    }

    pub fn get(&self, resource: &str) -> Quantity {
        self.0.get(resource).copied().unwrap_or(Quantity::ZERO)
    }

    pub fn set(&mut self, resource: impl Into<String>, quantity: Quantity) {
        self.0.insert(resource.into(), quantity);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Quantity)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every quantity is zero (or the list is empty).
    pub fn is_zero(&self) -> bool {
        self.0.values().all(|q| q.is_zero())
    }

    /// Component-wise add.
    pub fn add_assign(&mut self, other: &ResourceList) {
        for (name, q) in &other.0 {
            let entry = self.0.entry(name.clone()).or_insert(Quantity::ZERO);
            *entry = entry.saturating_add(*q);
        }
    }

    /// Component-wise subtract, clamped at zero per resource.
    pub fn sub_assign_saturating(&mut self, other: &ResourceList) {
        for (name, q) in &other.0 {
            let entry = self.0.entry(name.clone()).or_insert(Quantity::ZERO);
            *entry = entry.saturating_sub(*q);
        }
    }

    /// True iff every resource named in `self` fits within `available`.
    /// Resources missing from `available` count as zero.
    pub fn fits_within(&self, available: &ResourceList) -> bool {
        self.0.iter().all(|(name, q)| *q <= available.get(name))
    }

    /// True iff `self + extra` still fits within `available`.
    pub fn fits_with(&self, extra: &ResourceList, available: &ResourceList) -> bool {
        let mut combined = self.clone();
        combined.add_assign(extra);
        combined.fits_within(available)
    }

    /// Sum of two lists, by value.
    pub fn plus(&self, other: &ResourceList) -> ResourceList {
        let mut out = self.clone();
        out.add_assign(other);
        out
    }
}

impl FromIterator<(String, Quantity)> for ResourceList {
    fn from_iter<T: IntoIterator<Item = (String, Quantity)>>(iter: T) -> Self {
        ResourceList(iter.into_iter().collect())
    }
}

/// Convenience constructor used heavily in tests and the default oracle.
pub fn cpu_mem(cpu_millis: i64, memory_bytes: i64) -> ResourceList {
    let mut list = ResourceList::new();
    list.set("cpu", Quantity::from_millis(cpu_millis));
    list.set("memory", Quantity::from_whole(memory_bytes));
    list
}
