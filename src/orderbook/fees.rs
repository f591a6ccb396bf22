//! Tiered maker/taker fee schedule.
//!
//! Extends the flat-rate `FeeSchedule::calculate_fee` pattern into a
//! tiered lookup, grounded in the original system's
//! `_get_fee_schedule`/`_get_fee_rate`: tiers are ordered by
//! `min_volume` descending, and the first tier whose `min_volume` is
//! strictly less than the account's 30-day volume applies; failing
//! that, the smallest-volume tier is the fallback.

use serde::{Deserialize, Serialize};

/// One row of a fee schedule: the rates that apply once 30-day volume
/// exceeds `min_volume`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    pub min_volume: i64,
    pub maker_bps: i32,
    pub taker_bps: i32,
}

/// An external seam for 30-day trailing volume, left to a
/// collaborator per `spec.md` §9 open question (iii). Defaults to
/// [`ZeroVolumeLookup`] so the engine is runnable standalone.
pub trait VolumeLookup: Send + Sync {
    fn volume_30d(&self, account_id: i64) -> i64;
}

/// Always reports zero volume, landing every account on the
/// smallest-volume tier.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroVolumeLookup;

impl VolumeLookup for ZeroVolumeLookup {
    fn volume_30d(&self, _account_id: i64) -> i64 {
        0
    }
}

/// A tiered fee schedule for one market.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    /// Sorted descending by `min_volume`; construction enforces this.
    tiers: Vec<FeeTier>,
}

impl FeeSchedule {
    /// Build a schedule from an arbitrary tier list, sorting it
    /// descending by `min_volume`.
    pub fn new(mut tiers: Vec<FeeTier>) -> Self {
        tiers.sort_by(|a, b| b.min_volume.cmp(&a.min_volume));
        FeeSchedule { tiers }
    }

    /// A single flat tier applying to every account regardless of
    /// volume; useful for tests and as a minimal default.
    pub fn flat(maker_bps: i32, taker_bps: i32) -> Self {
        FeeSchedule::new(vec![FeeTier {
            min_volume: 0,
            maker_bps,
            taker_bps,
        }])
    }

    /// Select the tier for `volume`: the first tier (in descending
    /// `min_volume` order) whose `min_volume < volume`, else the
    /// smallest-volume (last) tier.
    pub fn rate_for(&self, volume: i64) -> FeeTier {
        self.tiers
            .iter()
            .find(|t| t.min_volume < volume)
            .copied()
            .or_else(|| self.tiers.last().copied())
            .expect("fee schedule must contain at least one tier")
    }
}

/// Computes fees for a single fill, given the schedule and a
/// [`VolumeLookup`].
pub struct FeeEngine<'a> {
    schedule: &'a FeeSchedule,
    volume: &'a dyn VolumeLookup,
}

impl<'a> FeeEngine<'a> {
    pub fn new(schedule: &'a FeeSchedule, volume: &'a dyn VolumeLookup) -> Self {
        FeeEngine { schedule, volume }
    }

    /// Fee owed by `account_id` on a fill of `qty` at the given
    /// `is_maker` role, using `qty * bps / 10000` with a 128-bit
    /// intermediate to avoid overflow at extreme sizes.
    pub fn calculate_fee(&self, account_id: i64, qty: i64, is_maker: bool) -> i64 {
        let tier = self.schedule.rate_for(self.volume.volume_30d(account_id));
        let bps = if is_maker { tier.maker_bps } else { tier.taker_bps };
        let fee = (qty as i128) * (bps as i128) / 10_000;
        fee as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_tier_schedule() -> FeeSchedule {
        FeeSchedule::new(vec![
            FeeTier {
                min_volume: 1_000_000,
                maker_bps: 0,
                taker_bps: 5,
            },
            FeeTier {
                min_volume: 100_000,
                maker_bps: 2,
                taker_bps: 8,
            },
            FeeTier {
                min_volume: 0,
                maker_bps: 5,
                taker_bps: 10,
            },
        ])
    }

    #[test]
    fn smallest_tier_applies_below_every_threshold() {
        let schedule = three_tier_schedule();
        let tier = schedule.rate_for(0);
        assert_eq!(tier.maker_bps, 5);
        assert_eq!(tier.taker_bps, 10);
    }

    #[test]
    fn middle_tier_applies_strictly_above_its_threshold() {
        let schedule = three_tier_schedule();
        let tier = schedule.rate_for(100_001);
        assert_eq!(tier.maker_bps, 2);
    }

    #[test]
    fn exact_threshold_does_not_yet_qualify() {
        let schedule = three_tier_schedule();
        // min_volume < volume is strict, so landing exactly on a
        // threshold does not yet earn that tier.
        let tier = schedule.rate_for(100_000);
        assert_eq!(tier.maker_bps, 5);
    }

    #[test]
    fn fee_uses_wide_intermediate_without_overflow() {
        let schedule = FeeSchedule::flat(10, 10);
        let engine = FeeEngine::new(&schedule, &ZeroVolumeLookup);
        let fee = engine.calculate_fee(1, i64::MAX / 2, true);
        assert!(fee > 0);
    }

    #[test]
    fn taker_and_maker_rates_can_differ() {
        let schedule = FeeSchedule::flat(2, 8);
        let engine = FeeEngine::new(&schedule, &ZeroVolumeLookup);
        assert_eq!(engine.calculate_fee(1, 10_000, true), 2);
        assert_eq!(engine.calculate_fee(1, 10_000, false), 8);
    }
}
