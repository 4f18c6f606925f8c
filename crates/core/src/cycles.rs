//! Triangular cycle model
//!
//! A cycle is three pairs on one exchange that start and end in the same
//! asset, e.g. `USDT -> BTC -> ETH -> USDT` via BTC/USDT, ETH/BTC, ETH/USDT.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{CoreError, CoreResult, Side, Symbol};

/// Three legs with the side each one is traded on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriangularCycle {
    legs: [Symbol; 3],
    sides: [Side; 3],
    start_asset: String,
}

impl TriangularCycle {
    /// Derive sides and start asset for an ordered triple of pairs.
    ///
    /// The start asset is the one shared by the first and last leg. Holding
    /// a pair's quote asset means buying it (pay ask); holding its base
    /// asset means selling it (receive bid).
    pub fn new(legs: [Symbol; 3]) -> CoreResult<Self> {
        if legs[0] == legs[1] || legs[1] == legs[2] || legs[0] == legs[2] {
            return Err(CoreError::InvalidCycle(format!(
                "duplicate leg in {} -> {} -> {}",
                legs[0], legs[1], legs[2]
            )));
        }

        let (base, quote) = legs[0]
            .assets()
            .ok_or_else(|| CoreError::InvalidCycle(format!("malformed symbol {}", legs[0])))?;

        let found = [quote, base]
            .into_iter()
            .find_map(|start| walk(&legs, start).map(|sides| (start.to_string(), sides)));

        match found {
            Some((start_asset, sides)) => Ok(Self {
                legs,
                sides,
                start_asset,
            }),
            None => Err(CoreError::InvalidCycle(format!(
                "{} -> {} -> {} does not return to its start asset",
                legs[0], legs[1], legs[2]
            ))),
        }
    }

    pub fn legs(&self) -> &[Symbol; 3] {
        &self.legs
    }

    pub fn sides(&self) -> &[Side; 3] {
        &self.sides
    }

    pub fn start_asset(&self) -> &str {
        &self.start_asset
    }

    /// `BTC/USDT -> ETH/BTC -> ETH/USDT`
    pub fn path(&self) -> String {
        format!("{} -> {} -> {}", self.legs[0], self.legs[1], self.legs[2])
    }

    /// Amount of the start asset held after walking the cycle with one unit.
    ///
    /// `prices[i]` must be the execution price for `sides[i]`. Returns `None`
    /// on a zero price or arithmetic overflow.
    pub fn final_amount(&self, prices: &[Decimal; 3]) -> Option<Decimal> {
        let mut amount = Decimal::ONE;
        for (side, price) in self.sides.iter().zip(prices) {
            amount = match side {
                Side::Buy => amount.checked_div(*price)?,
                Side::Sell => amount.checked_mul(*price)?,
            };
        }
        Some(amount)
    }
}

fn walk(legs: &[Symbol; 3], start: &str) -> Option<[Side; 3]> {
    let mut holding = start;
    let mut sides = [Side::Buy; 3];

    for (i, leg) in legs.iter().enumerate() {
        let (base, quote) = leg.assets()?;
        if holding == quote {
            sides[i] = Side::Buy;
            holding = base;
        } else if holding == base {
            sides[i] = Side::Sell;
            holding = quote;
        } else {
            return None;
        }
    }

    (holding == start).then_some(sides)
}

/// Enumerate every triangular cycle among `symbols`.
///
/// Rotations of the same cycle are reported once; both traversal
/// directions are reported.
pub fn discover_triangles(symbols: &[Symbol]) -> Vec<TriangularCycle> {
    let mut symbols: Vec<&Symbol> = symbols.iter().filter(|s| s.assets().is_some()).collect();
    symbols.sort();
    symbols.dedup();

    let mut cycles = Vec::new();
    let n = symbols.len();

    for i in 0..n {
        for j in (i + 1)..n {
            // Consecutive legs must share an asset
            let shared = symbols[i]
                .assets()
                .map(|(b, q)| symbols[j].involves(b) || symbols[j].involves(q))
                .unwrap_or(false);
            if !shared {
                continue;
            }

            for k in (j + 1)..n {
                for order in [[i, j, k], [i, k, j]] {
                    let legs = order.map(|idx| symbols[idx].clone());
                    if let Ok(cycle) = TriangularCycle::new(legs) {
                        cycles.push(cycle);
                    }
                }
            }
        }
    }

    cycles
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legs(a: &str, b: &str, c: &str) -> [Symbol; 3] {
        [a.into(), b.into(), c.into()]
    }

    #[test]
    fn test_usdt_btc_eth_cycle() {
        let cycle = TriangularCycle::new(legs("BTC/USDT", "ETH/BTC", "ETH/USDT")).unwrap();
        assert_eq!(cycle.start_asset(), "USDT");
        assert_eq!(cycle.sides(), &[Side::Buy, Side::Buy, Side::Sell]);
        assert_eq!(cycle.path(), "BTC/USDT -> ETH/BTC -> ETH/USDT");
    }

    #[test]
    fn test_reverse_direction() {
        let cycle = TriangularCycle::new(legs("ETH/USDT", "ETH/BTC", "BTC/USDT")).unwrap();
        assert_eq!(cycle.start_asset(), "USDT");
        assert_eq!(cycle.sides(), &[Side::Buy, Side::Sell, Side::Sell]);
    }

    #[test]
    fn test_start_asset_from_base_of_first_leg() {
        let cycle = TriangularCycle::new(legs("ETH/BTC", "BTC/USDT", "ETH/USDT")).unwrap();
        assert_eq!(cycle.start_asset(), "ETH");
        assert_eq!(cycle.sides(), &[Side::Sell, Side::Sell, Side::Buy]);
        assert_eq!(cycle.legs()[0], Symbol::from("ETH/BTC"));
    }

    #[test]
    fn test_final_amount() {
        let cycle = TriangularCycle::new(legs("BTC/USDT", "ETH/BTC", "ETH/USDT")).unwrap();
        let prices = [Decimal::from(60_000), Decimal::new(5, 2), Decimal::from(3_100)];
        let amount = cycle.final_amount(&prices).unwrap();
        let expected = Decimal::new(10333, 4);
        assert!((amount - expected).abs() < Decimal::new(1, 4));
    }

    #[test]
    fn test_zero_price_yields_none() {
        let cycle = TriangularCycle::new(legs("BTC/USDT", "ETH/BTC", "ETH/USDT")).unwrap();
        let prices = [Decimal::ZERO, Decimal::ONE, Decimal::ONE];
        assert!(cycle.final_amount(&prices).is_none());
    }

    #[test]
    fn test_rejects_open_path() {
        let err = TriangularCycle::new(legs("BTC/USDT", "ETH/BTC", "SOL/EUR"));
        assert!(matches!(err, Err(CoreError::InvalidCycle(_))));

        let dup = TriangularCycle::new(legs("BTC/USDT", "BTC/USDT", "ETH/USDT"));
        assert!(dup.is_err());
    }

    #[test]
    fn test_discover_triangles() {
        let symbols: Vec<Symbol> = ["BTC/USDT", "ETH/BTC", "ETH/USDT", "SOL/EUR"]
            .into_iter()
            .map(Symbol::from)
            .collect();

        let cycles = discover_triangles(&symbols);
        // One triangle, two directions
        assert_eq!(cycles.len(), 2);
        assert!(cycles.iter().all(|c| !c.legs().contains(&Symbol::from("SOL/EUR"))));
        assert_ne!(cycles[0].sides(), cycles[1].sides());
    }
}
