// Copyright 2024 Trestle Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//! # Gas Pricing Policy
//!
//! Pure fee computations for both gas markets, bounded by the per-chain
//! `max-gas-price` ceiling. The signer decides which path applies by probing
//! the latest header for a base fee.

use ethers::types::U256;

use crate::error::{Error, Result};

/// Legacy gas price: the node's suggestion scaled by the configured
/// multiplier, clamped to the ceiling.
pub fn legacy_gas_price(suggested: U256, multiplier: f64, max_gas_price: U256) -> U256 {
    let scaled = scale_gas_price(suggested, multiplier);
    std::cmp::min(scaled, max_gas_price)
}

/// Multiplies a gas price by a float factor, flooring the result.
fn scale_gas_price(estimate: U256, multiplier: f64) -> U256 {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return estimate;
    }
    // gas prices fit u128 comfortably; anything larger is already absurd and
    // passes through unscaled rather than losing precision.
    if estimate > U256::from(u128::MAX) {
        return estimate;
    }
    let scaled = (estimate.as_u128() as f64 * multiplier).floor();
    if scaled >= u128::MAX as f64 {
        U256::from(u128::MAX)
    } else {
        U256::from(scaled as u128)
    }
}

/// EIP-1559 fee pair `(tip, max_fee)` for a block with the given base fee.
///
/// When the ceiling sits below the base fee there is no valid pair; the
/// degenerate `{tip: 1, max_fee: base_fee + 1}` is returned so the
/// transaction can still be priced, and the operator sees the ceiling breach
/// in the logs. Otherwise `max_fee = tip + 2 * base_fee`, clamped to the
/// ceiling with the tip absorbing the cut (down to zero, never below).
pub fn london_fees(base_fee: U256, suggested_tip: U256, max_gas_price: U256) -> Result<(U256, U256)> {
    if max_gas_price < base_fee {
        tracing::warn!(
            %base_fee,
            %max_gas_price,
            "max gas price is below the base fee; pricing at base fee + 1 wei"
        );
        return Ok((U256::one(), base_fee + U256::one()));
    }

    let mut tip = suggested_tip;
    let mut max_fee = tip + base_fee * 2u64;
    if max_fee < tip {
        return Err(Error::GasPolicy {
            max_fee,
            tip,
            max_gas_price,
        });
    }
    if max_fee > max_gas_price {
        max_fee = max_gas_price;
        tip = max_gas_price - base_fee;
    }
    debug_assert!(tip <= max_fee);
    Ok((tip, max_fee))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::exp10(9)
    }

    #[test]
    fn london_fees_within_ceiling() {
        // base 100 gwei, tip 2 gwei, ceiling 250 gwei -> (2, 202)
        let (tip, max_fee) = london_fees(gwei(100), gwei(2), gwei(250)).unwrap();
        assert_eq!(tip, gwei(2));
        assert_eq!(max_fee, gwei(202));
    }

    #[test]
    fn london_fees_clamped_to_ceiling() {
        // base 100 gwei, tip 2 gwei, ceiling 150 gwei -> (50, 150)
        let (tip, max_fee) = london_fees(gwei(100), gwei(2), gwei(150)).unwrap();
        assert_eq!(tip, gwei(50));
        assert_eq!(max_fee, gwei(150));
    }

    #[test]
    fn london_fees_tip_can_clamp_to_zero() {
        let (tip, max_fee) = london_fees(gwei(100), gwei(2), gwei(100)).unwrap();
        assert_eq!(tip, U256::zero());
        assert_eq!(max_fee, gwei(100));
    }

    #[test]
    fn london_fees_ceiling_below_base_fee_escape_hatch() {
        let (tip, max_fee) = london_fees(gwei(100), gwei(2), gwei(90)).unwrap();
        assert_eq!(tip, U256::one());
        assert_eq!(max_fee, gwei(100) + U256::one());
    }

    #[test]
    fn london_fees_uphold_ordering_invariant() {
        for (base, tip, max) in [(1u64, 1u64, 500u64), (30, 4, 80), (7, 0, 7)] {
            let (tip, max_fee) = london_fees(gwei(base), gwei(tip), gwei(max)).unwrap();
            assert!(tip <= max_fee);
            assert!(max_fee <= gwei(max));
        }
    }

    #[test]
    fn legacy_price_scales_and_floors() {
        assert_eq!(
            legacy_gas_price(U256::from(1000u64), 1.5, U256::from(10_000u64)),
            U256::from(1500u64)
        );
        // flooring
        assert_eq!(
            legacy_gas_price(U256::from(999u64), 1.5, U256::from(10_000u64)),
            U256::from(1498u64)
        );
    }

    #[test]
    fn legacy_price_clamped_to_ceiling() {
        assert_eq!(
            legacy_gas_price(gwei(30), 2.0, gwei(40)),
            gwei(40)
        );
    }

    #[test]
    fn degenerate_multiplier_passes_suggestion_through() {
        assert_eq!(
            legacy_gas_price(gwei(30), f64::NAN, gwei(100)),
            gwei(30)
        );
        assert_eq!(legacy_gas_price(gwei(30), 0.0, gwei(100)), gwei(30));
    }
}
