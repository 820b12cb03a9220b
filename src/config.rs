// LNP/BP Core Library implementing LNPBP specifications & standards
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

use crate::error::ConfigError;
use crate::side::Side;

/// Hard protocol cap on the number of HTLCs a node will accept towards it,
/// independent of any per-node policy (BOLT-2).
pub const MAX_ACCEPTED_HTLC_LIMIT: u16 = 483;

/// Per-side channel parameters, negotiated once at open and immutable for
/// the lifetime of the channel.
///
/// Accessing these fields directly is almost always wrong: the BOLT-2
/// accessor rule interleaves which side's config applies to a given
/// observer, which is why [`crate::Channel`] exposes `to_self_delay`,
/// `channel_reserve_sat`, `dust_limit_sat`, `htlc_minimum_msat`,
/// `max_htlc_value_in_flight_msat` and `max_accepted_htlcs` as methods
/// rather than letting callers index `config[side]` directly.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, Debug, Getters, StrictEncode, StrictDecode
)]
#[getter(as_copy)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ChannelConfig {
    /// The threshold below which outputs on this side's commitment
    /// transaction will be omitted.
    pub dust_limit_sat: u64,

    /// The maximum aggregate value, in millisatoshi, of HTLCs this side
    /// will accept in flight towards it at once.
    pub max_htlc_value_in_flight_msat: u64,

    /// The maximum number of HTLCs this side will accept in flight towards
    /// it at once. Must not exceed [`MAX_ACCEPTED_HTLC_LIMIT`].
    pub max_accepted_htlcs: u16,

    /// The minimum balance this side requires the counterparty keep
    /// unencumbered in the channel.
    pub channel_reserve_sat: u64,

    /// The smallest HTLC value, in millisatoshi, this side will accept.
    pub htlc_minimum_msat: u64,

    /// The number of blocks the counterparty must wait before spending its
    /// own `to_local` output, should it broadcast this side's commitment.
    pub to_self_delay: u16,
}

impl ChannelConfig {
    /// Checks the config against BOLT-2/3 limits that do not depend on the
    /// counterparty's config (the cross-side reserve-vs-dust check is
    /// performed once both configs are known, in [`Self::validate_pair`]).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_accepted_htlcs > MAX_ACCEPTED_HTLC_LIMIT {
            return Err(ConfigError::MaxAcceptedHtlcsTooLarge(
                self.max_accepted_htlcs,
            ));
        }
        Ok(())
    }

    /// Checks that a side's reserve is not set below the dust limit it is
    /// asking the counterparty to observe.
    pub fn validate_pair(
        local: &ChannelConfig,
        remote: &ChannelConfig,
    ) -> Result<(), ConfigError> {
        local.validate()?;
        remote.validate()?;
        if local.channel_reserve_sat < remote.dust_limit_sat {
            return Err(ConfigError::ReserveBelowDust {
                reserve: local.channel_reserve_sat,
                dust_limit: remote.dust_limit_sat,
            });
        }
        if remote.channel_reserve_sat < local.dust_limit_sat {
            return Err(ConfigError::ReserveBelowDust {
                reserve: remote.channel_reserve_sat,
                dust_limit: local.dust_limit_sat,
            });
        }
        Ok(())
    }
}

/// Both sides' configs plus the BOLT-2 accessor rule for reading them from
/// the perspective of an observing side.
///
/// The rule is fixed and does not depend on which value is requested in the
/// way a naive `config[side]` lookup would suggest:
/// - `to_self_delay` and `channel_reserve_sat`, as seen by `side`, come from
///   the *other* side's config (they are limits the other side imposes).
/// - `dust_limit_sat`, `htlc_minimum_msat`, `max_htlc_value_in_flight_msat`
///   and `max_accepted_htlcs`, as seen from the perspective of a recipient
///   `side`, come from `side`'s own config (they are self-imposed limits a
///   recipient enforces on what it will accept).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct ChannelConfigPair {
    configs: [ChannelConfig; 2],
}

impl ChannelConfigPair {
    pub fn new(
        local: ChannelConfig,
        remote: ChannelConfig,
    ) -> Result<Self, ConfigError> {
        ChannelConfig::validate_pair(&local, &remote)?;
        Ok(ChannelConfigPair {
            configs: [local, remote],
        })
    }

    /// The raw, per-side config as negotiated; prefer the accessor methods
    /// below unless you genuinely need the unmapped value.
    #[inline]
    pub fn raw(&self, side: Side) -> &ChannelConfig {
        &self.configs[side]
    }

    /// `to_self_delay` imposed on `side` by the other side.
    #[inline]
    pub fn to_self_delay(&self, side: Side) -> u16 {
        self.configs[side.other()].to_self_delay
    }

    /// `channel_reserve_sat` imposed on `side` by the other side: the
    /// minimum balance `side` must keep unencumbered.
    #[inline]
    pub fn channel_reserve_sat(&self, side: Side) -> u64 {
        self.configs[side.other()].channel_reserve_sat
    }

    /// `dust_limit_sat` as enforced by `side` acting as recipient.
    #[inline]
    pub fn dust_limit_sat(&self, side: Side) -> u64 {
        self.configs[side].dust_limit_sat
    }

    /// `htlc_minimum_msat` as enforced by `side` acting as recipient.
    #[inline]
    pub fn htlc_minimum_msat(&self, side: Side) -> u64 {
        self.configs[side].htlc_minimum_msat
    }

    /// `max_htlc_value_in_flight_msat` as enforced by `side` acting as
    /// recipient.
    #[inline]
    pub fn max_htlc_value_in_flight_msat(&self, side: Side) -> u64 {
        self.configs[side].max_htlc_value_in_flight_msat
    }

    /// `max_accepted_htlcs` as enforced by `side` acting as recipient.
    #[inline]
    pub fn max_accepted_htlcs(&self, side: Side) -> u16 {
        self.configs[side].max_accepted_htlcs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(reserve: u64, dust: u64) -> ChannelConfig {
        ChannelConfig {
            dust_limit_sat: dust,
            max_htlc_value_in_flight_msat: 1_000_000_000,
            max_accepted_htlcs: 30,
            channel_reserve_sat: reserve,
            htlc_minimum_msat: 1,
            to_self_delay: 144,
        }
    }

    #[test]
    fn accessor_rule_swaps_to_self_delay_and_reserve() {
        let mut local = cfg(10_000, 354);
        local.to_self_delay = 100;
        let mut remote = cfg(20_000, 354);
        remote.to_self_delay = 200;
        let pair = ChannelConfigPair::new(local, remote).unwrap();

        assert_eq!(pair.to_self_delay(Side::Local), 200);
        assert_eq!(pair.to_self_delay(Side::Remote), 100);
        assert_eq!(pair.channel_reserve_sat(Side::Local), 20_000);
        assert_eq!(pair.channel_reserve_sat(Side::Remote), 10_000);
    }

    #[test]
    fn accessor_rule_keeps_dust_and_minimum_on_recipient() {
        let local = cfg(10_000, 354);
        let remote = cfg(10_000, 500);
        let pair = ChannelConfigPair::new(local, remote).unwrap();

        assert_eq!(pair.dust_limit_sat(Side::Local), 354);
        assert_eq!(pair.dust_limit_sat(Side::Remote), 500);
    }

    #[test]
    fn rejects_htlc_cap_above_protocol_max() {
        let mut local = cfg(10_000, 354);
        local.max_accepted_htlcs = 500;
        let remote = cfg(10_000, 354);
        assert!(matches!(
            ChannelConfigPair::new(local, remote),
            Err(ConfigError::MaxAcceptedHtlcsTooLarge(500))
        ));
    }

    #[test]
    fn rejects_reserve_below_counterparty_dust() {
        let local = cfg(100, 354);
        let remote = cfg(10_000, 354);
        assert!(matches!(
            ChannelConfigPair::new(local, remote),
            Err(ConfigError::ReserveBelowDust { .. })
        ));
    }
}
