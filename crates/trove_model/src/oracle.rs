//! Price oracle boundary
//!
//! Feed selection and fallback happen upstream; the core only sees a single
//! numeraire price per collateral unit (1e18 scale) and a trust flag.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PriceReading {
    pub value: u128,
    pub trusted: bool,
}

pub trait PriceFeed {
    fn fetch_price(&mut self) -> PriceReading;
}

/// Feed that returns whatever it was last set to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedPrice {
    reading: PriceReading,
}

impl FixedPrice {
    pub fn new(value: u128) -> Self {
        Self {
            reading: PriceReading { value, trusted: true },
        }
    }

    pub fn set(&mut self, value: u128) {
        self.reading.value = value;
    }

    pub fn set_trusted(&mut self, trusted: bool) {
        self.reading.trusted = trusted;
    }
}

impl PriceFeed for FixedPrice {
    fn fetch_price(&mut self) -> PriceReading {
        self.reading
    }
}

/// Log when the core acts on a price the upstream marked as untrusted
pub(crate) fn note_untrusted(reading: &PriceReading) {
    if !reading.trusted {
        log::warn!("Acting on untrusted price {}", reading.value);
    }
}
