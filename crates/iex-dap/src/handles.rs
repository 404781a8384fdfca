//! Variable-reference handle registry.
//!
//! DAP identifies structured values by opaque integer references. Each
//! session owns one registry; handles are minted per `scopes` request and
//! resolved back to their string id on `variables` requests.

use std::collections::HashMap;

/// First minted handle. Zero is reserved by the protocol to mean "no
/// children", so references start well above it.
const START_HANDLE: i64 = 1000;

#[derive(Debug, Default)]
pub struct Handles {
    next: i64,
    values: HashMap<i64, String>,
}

impl Handles {
    pub fn new() -> Self {
        Self {
            next: START_HANDLE,
            values: HashMap::new(),
        }
    }

    /// Mints a fresh reference for `value`.
    pub fn create(&mut self, value: impl Into<String>) -> i64 {
        let handle = self.next;
        self.next += 1;
        self.values.insert(handle, value.into());
        handle
    }

    pub fn get(&self, handle: i64) -> Option<&str> {
        self.values.get(&handle).map(String::as_str)
    }
}
