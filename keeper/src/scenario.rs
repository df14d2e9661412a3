//! Scenario loading: initial positions, pool deposits and a scripted price path

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use trove_model::math::DECIMAL_PRECISION;
use trove_model::{DepositorId, Params, PositionId, PriceFeed, PriceReading, Protocol};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioPosition {
    pub id: u64,
    /// Decimal collateral amount, e.g. `"15.5"`
    pub collateral: String,
    /// Decimal debt amount excluding the protection reserve
    pub net_debt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioDeposit {
    pub depositor: u64,
    pub amount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: String,
    #[serde(default = "default_trusted")]
    pub trusted: bool,
}

fn default_trusted() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub positions: Vec<ScenarioPosition>,
    #[serde(default)]
    pub deposits: Vec<ScenarioDeposit>,
    /// First point is the opening price
    pub prices: Vec<PricePoint>,
}

/// Parse a non-negative decimal string into a 1e18-scaled amount
pub fn parse_amount(text: &str) -> Result<u128> {
    let text = text.trim();
    let (whole, frac) = match text.split_once('.') {
        Some((w, f)) => (w, f),
        None => (text, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        bail!("Empty amount");
    }
    if frac.len() > 18 {
        bail!("Amount {} has more than 18 decimals", text);
    }

    let digits = |s: &str| -> Result<u128> {
        if s.is_empty() {
            return Ok(0);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            bail!("Invalid amount: {}", text);
        }
        s.parse::<u128>().context(format!("Invalid amount: {}", text))
    };

    let whole = digits(whole)?
        .checked_mul(DECIMAL_PRECISION)
        .context(format!("Amount too large: {}", text))?;
    let frac = digits(frac)? * 10u128.pow(18 - frac.len() as u32);
    whole
        .checked_add(frac)
        .context(format!("Amount too large: {}", text))
}

/// Price feed that steps through a fixed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedFeed {
    path: Vec<PriceReading>,
    cursor: usize,
}

impl ScriptedFeed {
    pub fn new(path: Vec<PriceReading>) -> Result<Self> {
        if path.is_empty() {
            bail!("Price path is empty");
        }
        Ok(Self { path, cursor: 0 })
    }

    /// Move to the next price; false once the path is exhausted
    pub fn advance(&mut self) -> bool {
        if self.cursor + 1 >= self.path.len() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn tick(&self) -> u64 {
        self.cursor as u64
    }

    pub fn remaining(&self) -> usize {
        self.path.len() - self.cursor - 1
    }
}

impl PriceFeed for ScriptedFeed {
    fn fetch_price(&mut self) -> PriceReading {
        self.path[self.cursor]
    }
}

pub type KeeperProtocol = Protocol<ScriptedFeed>;

impl Scenario {
    /// Load a JSON scenario; `~` in the path is expanded
    pub fn load(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let text = std::fs::read_to_string(expanded_path.as_ref())
            .context(format!("Failed to read scenario from {}", path))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse scenario JSON")
    }

    pub fn price_path(&self) -> Result<Vec<PriceReading>> {
        self.prices
            .iter()
            .map(|p| {
                Ok(PriceReading {
                    value: parse_amount(&p.price)?,
                    trusted: p.trusted,
                })
            })
            .collect()
    }

    /// Build the protocol at the opening price and apply the initial state
    pub fn build(&self, params: Params) -> Result<KeeperProtocol> {
        let feed = ScriptedFeed::new(self.price_path()?)?;
        let mut protocol = Protocol::new(params, feed).context("Failed to create protocol")?;

        for pos in &self.positions {
            let collateral = parse_amount(&pos.collateral)?;
            let net_debt = parse_amount(&pos.net_debt)?;
            protocol
                .open_position(PositionId(pos.id), collateral, net_debt)
                .context(format!("Failed to open position {}", pos.id))?;
        }

        for dep in &self.deposits {
            let amount = parse_amount(&dep.amount)?;
            protocol
                .provide_to_pool(DepositorId(dep.depositor), amount)
                .context(format!("Failed to deposit for depositor {}", dep.depositor))?;
        }

        log::info!(
            "Scenario loaded: {} positions, {} deposits, {} price points",
            self.positions.len(),
            self.deposits.len(),
            self.prices.len()
        );
        Ok(protocol)
    }
}
