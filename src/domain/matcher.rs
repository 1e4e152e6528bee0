//! Pair Matcher: does a UTxO hold a configured pool?
//!
//! Pure logic shared by the block follower, the snapshot poller and the
//! aggregator's live fallback. A match needs the pool's security token
//! plus the shape rules selected by the pair name.

use std::fmt;

use super::pair::{PairShape, WatchedPair};
use super::utxo::CanonicalUtxo;
use super::volume::clears_floor;

/// Why a UTxO was not accepted for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Security token absent or zero.
    NoSecurityToken,
    /// A non-base leg is not held at all.
    MissingToken,
    /// A leg does not clear the minimum volume floor.
    BelowFloor,
    /// The pair name does not fit any shape rule.
    MisconfiguredPair,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NoSecurityToken => "security token not held",
            Self::MissingToken => "pair token missing",
            Self::BelowFloor => "volume below floor",
            Self::MisconfiguredPair => "pair name violates shape",
        };
        f.write_str(reason)
    }
}

/// Matches UTxOs against watched pairs.
#[derive(Debug, Clone, Copy)]
pub struct PairMatcher {
    /// Minimum decimal volume each checked leg must exceed.
    floor: f64,
}

impl PairMatcher {
    pub const fn new(floor: f64) -> Self {
        Self { floor }
    }

    pub const fn floor(&self) -> f64 {
        self.floor
    }

    /// Boolean form of [`PairMatcher::check`].
    pub fn matches(&self, utxo: &CanonicalUtxo, pair: &WatchedPair) -> bool {
        self.check(utxo, pair).is_ok()
    }

    /// Validate `utxo` against `pair`, returning the first failed rule.
    pub fn check(&self, utxo: &CanonicalUtxo, pair: &WatchedPair) -> Result<(), Rejection> {
        let security = &pair.security_token;
        if !utxo.assets.holds(&security.policy, &security.name) {
            return Err(Rejection::NoSecurityToken);
        }

        let (t1, t2) = (&pair.token1, &pair.token2);
        match pair.shape() {
            PairShape::AdaFirst => {
                if !t2.present_in(utxo) {
                    return Err(Rejection::MissingToken);
                }
            }
            PairShape::AdaSecond => {
                if !t1.present_in(utxo) {
                    return Err(Rejection::MissingToken);
                }
            }
            PairShape::Native => {
                if !t1.present_in(utxo) || !t2.present_in(utxo) {
                    return Err(Rejection::MissingToken);
                }
            }
            PairShape::Misconfigured => return Err(Rejection::MisconfiguredPair),
        }

        let leg1 = clears_floor(t1.amount_in(utxo), t1.decimals, self.floor);
        let leg2 = clears_floor(t2.amount_in(utxo), t2.decimals, self.floor);
        if leg1 && leg2 { Ok(()) } else { Err(Rejection::BelowFloor) }
    }
}
