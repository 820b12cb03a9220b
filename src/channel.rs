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

use std::collections::BTreeMap;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::PublicKey;
use bitcoin::OutPoint;

use crate::config::{ChannelConfig, ChannelConfigPair};
use crate::error::{AdmissionError, ConstructionError, RemovalError};
use crate::htlc::{Htlc, HtlcNotification, HtlcState, RemovalType};
use crate::keys::{commitment_number_obscurer, Basepoints};
use crate::side::Side;
use crate::view::ChannelView;

/// Base weight, in weight units, of a commitment transaction carrying no
/// HTLC outputs (one P2WSH input, `to_local` and `to_remote` outputs).
pub const COMMITMENT_BASE_WEIGHT: u64 = 724;

/// Additional weight contributed by each non-dust HTLC output.
pub const HTLC_OUTPUT_WEIGHT: u64 = 172;

/// Weight of a second-stage HTLC-timeout transaction, used for dust
/// trimming of offered HTLCs.
pub const HTLC_TIMEOUT_WEIGHT: u64 = 663;

/// Weight of a second-stage HTLC-success transaction, used for dust
/// trimming of received HTLCs.
pub const HTLC_SUCCESS_WEIGHT: u64 = 703;

/// The bidirectional commitment-state machine for one payment channel.
///
/// Owns both sides' views, the full HTLC table, and the static parameters
/// negotiated at open. All mutating operations are synchronous and leave
/// the channel unmodified on any error (§5, §7).
#[derive(Clone, PartialEq, Debug, Getters)]
pub struct Channel {
    #[getter(as_copy)]
    funding_outpoint: OutPoint,

    #[getter(as_copy)]
    funding_msat: u64,

    #[getter(as_copy)]
    funder: Side,

    #[getter(skip)]
    configs: ChannelConfigPair,

    #[getter(skip)]
    basepoints: [Basepoints; 2],

    #[getter(skip)]
    funding_pubkeys: [PublicKey; 2],

    #[getter(as_copy)]
    commitment_number_obscurer: u64,

    #[getter(skip)]
    htlcs: BTreeMap<(Side, u64), Htlc>,

    #[getter(skip)]
    views: [ChannelView; 2],

    /// True between a `sending_commit` and the matching `rcvd_rev_and_ack`;
    /// the authoritative gate on re-invoking `sending_commit` (§4.4).
    #[getter(skip)]
    awaiting_revoke_and_ack: bool,

    /// HTLCs that moved `PENDING_ADD -> COMMITTED` on either view during the
    /// handshake round currently in flight, awaiting the matching
    /// `rcvd_rev_and_ack` to confirm they are now irrevocably committed on
    /// both sides and report `Locked`.
    #[getter(skip)]
    pending_locks: Vec<(Side, u64)>,

    /// HTLCs that moved `PENDING_REMOVE -> REMOVED_NEW` on either view
    /// during the round in flight, awaiting confirmation at
    /// `rcvd_rev_and_ack` that a `FAIL` removal is now fully committed on
    /// both sides so `Failed` can be reported.
    #[getter(skip)]
    pending_removals: Vec<(Side, u64)>,
}

impl Channel {
    /// Initializes a new channel (§4.1). Fails without creating a channel
    /// if the push amount exceeds the funding amount, or if the funder
    /// cannot afford the fee of the very first (HTLC-less) commitment
    /// transaction while both reserves are observed.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        funding_outpoint: OutPoint,
        funding_sat: u64,
        push_msat: u64,
        feerate_per_kw: u64,
        local_cfg: ChannelConfig,
        remote_cfg: ChannelConfig,
        local_basepoints: Basepoints,
        remote_basepoints: Basepoints,
        local_fundkey: PublicKey,
        remote_fundkey: PublicKey,
        funder: Side,
    ) -> Result<Channel, ConstructionError> {
        let funding_msat = funding_sat * 1000;
        if push_msat > funding_msat {
            return Err(ConstructionError::PushExceedsFunding {
                push_msat,
                funding_msat,
            });
        }

        let mut owed = [0u64; 2];
        owed[funder] = funding_msat - push_msat;
        owed[funder.other()] = push_msat;

        let configs = ChannelConfigPair::new(local_cfg, remote_cfg)
            .map_err(|_| ConstructionError::CannotAffordInitialFee)?;

        let (funder_payment, other_payment) = match funder {
            Side::Local => (local_basepoints.payment, remote_basepoints.payment),
            Side::Remote => (remote_basepoints.payment, local_basepoints.payment),
        };
        let obscurer = commitment_number_obscurer(&funder_payment, &other_payment);

        let channel = Channel {
            funding_outpoint,
            funding_msat,
            funder,
            configs,
            basepoints: [local_basepoints, remote_basepoints],
            funding_pubkeys: [local_fundkey, remote_fundkey],
            commitment_number_obscurer: obscurer,
            htlcs: BTreeMap::new(),
            views: [
                ChannelView::new(feerate_per_kw, owed),
                ChannelView::new(feerate_per_kw, owed),
            ],
            awaiting_revoke_and_ack: false,
            pending_locks: Vec::new(),
            pending_removals: Vec::new(),
        };

        if !channel.affordable(Side::Local, true) || !channel.affordable(Side::Remote, true) {
            return Err(ConstructionError::CannotAffordInitialFee);
        }

        log::debug!(
            "opened channel over {} with funder {:?}, initial split {}/{}",
            funding_outpoint,
            funder,
            owed[Side::Local],
            owed[Side::Remote],
        );

        Ok(channel)
    }

    #[inline]
    pub fn configs(&self) -> &ChannelConfigPair {
        &self.configs
    }

    #[inline]
    pub fn basepoints(&self, side: Side) -> &Basepoints {
        &self.basepoints[side]
    }

    #[inline]
    pub fn funding_pubkey(&self, side: Side) -> PublicKey {
        self.funding_pubkeys[side]
    }

    #[inline]
    pub fn view(&self, side: Side) -> &ChannelView {
        &self.views[side]
    }

    /// Looks up an HTLC by its stable `(offerer, id)` identity without
    /// mutating anything (§4.3).
    #[inline]
    pub fn get_htlc(&self, offerer: Side, id: u64) -> Option<&Htlc> {
        self.htlcs.get(&(offerer, id))
    }

    fn is_dust(&self, htlc: &Htlc, side: Side, dust_limit_sat: u64) -> bool {
        let feerate = self.views[side].feerate_per_kw();
        let offered_by_side_owner = htlc.offerer == side;
        let htlc_tx_weight = if offered_by_side_owner {
            HTLC_TIMEOUT_WEIGHT
        } else {
            HTLC_SUCCESS_WEIGHT
        };
        let htlc_tx_fee_sat = feerate * htlc_tx_weight / 1000;
        htlc.msat / 1000 < dust_limit_sat + htlc_tx_fee_sat
    }

    fn nondust_count_staged(&self, side: Side) -> usize {
        let dust_limit = self.configs.dust_limit_sat(side);
        self.htlcs
            .values()
            .filter(|h| h.is_live_on(side) && !self.is_dust(h, side, dust_limit))
            .count()
    }

    fn nondust_count_committed(&self, side: Side) -> usize {
        let dust_limit = self.configs.dust_limit_sat(side);
        self.htlcs
            .values()
            .filter(|h| h.is_committed_on(side) && !self.is_dust(h, side, dust_limit))
            .count()
    }

    /// The commitment transaction weight for `side`'s view given the HTLCs
    /// currently staged onto it (used for admission affordability, §4.2).
    pub fn commitment_weight_staged(&self, side: Side) -> u64 {
        COMMITMENT_BASE_WEIGHT + HTLC_OUTPUT_WEIGHT * self.nondust_count_staged(side) as u64
    }

    /// The commitment transaction weight for `side`'s actual, currently
    /// committed state (used by the materializer, §4.6).
    pub fn commitment_weight_committed(&self, side: Side) -> u64 {
        COMMITMENT_BASE_WEIGHT + HTLC_OUTPUT_WEIGHT * self.nondust_count_committed(side) as u64
    }

    /// The affordability check from §4.2, also reused by `new`'s
    /// funding-commitment check (`initial = true` relaxes the funder's own
    /// reserve requirement, per invariant (2)'s special case).
    fn affordable(&self, side: Side, initial: bool) -> bool {
        let feerate = self.views[side].feerate_per_kw();
        let weight = self.commitment_weight_staged(side);
        let fee_sat = feerate * weight / 1000;

        let funder = self.funder;
        let funder_balance_sat = self.views[side].owed_msat(funder) / 1000;
        if funder_balance_sat < fee_sat {
            return false;
        }
        let funder_after_fee = funder_balance_sat - fee_sat;

        let other = funder.other();
        let other_balance_sat = self.views[side].owed_msat(other) / 1000;
        let other_reserve = self.configs.channel_reserve_sat(other);
        if other_balance_sat < other_reserve {
            return false;
        }

        if initial {
            return true;
        }
        let funder_reserve = self.configs.channel_reserve_sat(funder);
        funder_after_fee >= funder_reserve
    }

    // ----------------------------------------------------------------
    // 4.2 HTLC admission
    // ----------------------------------------------------------------

    /// Validates and stages a new HTLC offer (§4.2). On any error the
    /// channel is left completely unmodified.
    #[allow(clippy::too_many_arguments)]
    pub fn add_htlc(
        &mut self,
        sender: Side,
        id: u64,
        msat: u64,
        cltv_expiry: u32,
        payment_hash: [u8; 32],
        routing_packet: Vec<u8>,
    ) -> Result<(), AdmissionError> {
        if cltv_expiry == 0 || cltv_expiry >= 500_000_000 {
            return Err(AdmissionError::InvalidExpiry(cltv_expiry));
        }

        let candidate = Htlc::new(sender, id, msat, cltv_expiry, payment_hash, routing_packet);

        if let Some(existing) = self.htlcs.get(&(sender, id)) {
            return if existing.same_offer(&candidate) {
                Err(AdmissionError::Duplicate)
            } else {
                Err(AdmissionError::DuplicateIdDifferent)
            };
        }

        let recipient = sender.other();
        let minimum = self.configs.htlc_minimum_msat(recipient);
        if msat < minimum {
            return Err(AdmissionError::BelowMinimum {
                proposed: msat,
                minimum,
            });
        }

        let live_from_sender: Vec<&Htlc> = self
            .htlcs
            .values()
            .filter(|h| h.offerer == sender && h.is_live_outbound())
            .collect();

        let count_limit = self.configs.max_accepted_htlcs(recipient);
        let proposed_count = live_from_sender.len() as u16 + 1;
        if proposed_count > count_limit {
            return Err(AdmissionError::TooManyHtlcs {
                proposed: proposed_count,
                limit: count_limit,
            });
        }

        let value_limit = self.configs.max_htlc_value_in_flight_msat(recipient);
        let proposed_value: u64 = live_from_sender.iter().map(|h| h.msat).sum::<u64>() + msat;
        if proposed_value > value_limit {
            return Err(AdmissionError::MaxHtlcValueExceeded {
                proposed: proposed_value,
                limit: value_limit,
            });
        }

        // Check affordability on a scratch copy first: `owed_msat` clamps at
        // zero, so mutating `self` directly and rolling back on failure would
        // lose how far underwater the sender went and restore the wrong
        // balance (§7, §8).
        let mut probe = self.clone();
        probe.htlcs.insert((sender, id), candidate.clone());
        probe.views[Side::Local].add_owed_msat(sender, -(msat as i64));
        probe.views[Side::Remote].add_owed_msat(sender, -(msat as i64));

        if !probe.affordable(Side::Local, false) || !probe.affordable(Side::Remote, false) {
            return Err(AdmissionError::ChannelCapacityExceeded);
        }

        *self = probe;
        log::trace!("admitted htlc {:?}/{} for {} msat", sender, id, msat);
        Ok(())
    }

    // ----------------------------------------------------------------
    // 4.3 HTLC removal
    // ----------------------------------------------------------------

    fn precheck_removal(&self, offerer: Side, id: u64) -> Result<&Htlc, RemovalError> {
        let htlc = self.htlcs.get(&(offerer, id)).ok_or(RemovalError::NoSuchId)?;
        if htlc.removal_in_progress() {
            return Err(RemovalError::AlreadyFulfilled);
        }
        let recipient = offerer.other();
        if htlc.state(recipient) != HtlcState::Committed {
            return Err(RemovalError::HtlcUncommitted);
        }
        if !htlc.is_irrevocably_committed() {
            return Err(RemovalError::HtlcNotIrrevocable);
        }
        Ok(htlc)
    }

    /// Stages a failure for an existing, recipient-committed HTLC (§4.3).
    pub fn fail_htlc(&mut self, offerer: Side, id: u64) -> Result<(), RemovalError> {
        self.precheck_removal(offerer, id)?;
        let htlc = self.htlcs.get_mut(&(offerer, id)).expect("checked above");
        htlc.removal = Some(RemovalType::Fail);
        htlc.set_state(Side::Local, HtlcState::PendingRemove);
        htlc.set_state(Side::Remote, HtlcState::PendingRemove);
        log::trace!("staged fail for htlc {:?}/{}", offerer, id);
        Ok(())
    }

    /// Stages a fulfillment for an existing, recipient-committed HTLC,
    /// verifying the preimage against `payment_hash` (§4.3).
    pub fn fulfill_htlc(
        &mut self,
        offerer: Side,
        id: u64,
        preimage: [u8; 32],
    ) -> Result<(), RemovalError> {
        let htlc = self.precheck_removal(offerer, id)?;
        if sha256::Hash::hash(&preimage).into_inner() != htlc.payment_hash {
            return Err(RemovalError::BadPreimage);
        }
        let htlc = self.htlcs.get_mut(&(offerer, id)).expect("checked above");
        htlc.removal = Some(RemovalType::Fulfill(preimage));
        htlc.set_state(Side::Local, HtlcState::PendingRemove);
        htlc.set_state(Side::Remote, HtlcState::PendingRemove);
        log::trace!("staged fulfillment for htlc {:?}/{}", offerer, id);
        Ok(())
    }

    // ----------------------------------------------------------------
    // 4.4 Commitment handshake
    // ----------------------------------------------------------------

    /// Applies the pending-change promotion rules of the staging table
    /// (§4.4) to `target` view, returning whether anything changed and
    /// recording transitions that downstream notifications depend on.
    fn promote_staged(&mut self, target: Side) -> bool {
        let mut changed = false;
        for (&(offerer, id), htlc) in self.htlcs.iter_mut() {
            match htlc.state(target) {
                HtlcState::PendingAdd => {
                    htlc.set_state(target, HtlcState::Committed);
                    // A fresh HTLC starts PENDING_ADD on both views, so this
                    // runs once from sending_commit (target=Remote) and once
                    // from rcvd_commit (target=Local) for the same id; only
                    // enqueue it once so rcvd_rev_and_ack reports it once.
                    if !self.pending_locks.contains(&(offerer, id)) {
                        self.pending_locks.push((offerer, id));
                    }
                    changed = true;
                }
                HtlcState::PendingRemove => {
                    htlc.set_state(target, HtlcState::RemovedNew);
                    if !self.pending_removals.contains(&(offerer, id)) {
                        self.pending_removals.push((offerer, id));
                    }
                    changed = true;
                }
                _ => {}
            }
        }
        if changed {
            self.views[target].advance_commitment_number();
        }
        changed
    }

    /// `sending_commit`: promotes staged changes into the remote view.
    /// Rejected (returns `false` without mutating anything) while
    /// [`Self::awaiting_revoke_and_ack`] is already true, since a second
    /// commitment may not be sent before the first is revoked (§4.4).
    pub fn sending_commit(&mut self) -> (bool, Vec<HtlcNotification>) {
        if self.awaiting_revoke_and_ack {
            log::warn!("sending_commit invoked while awaiting revoke_and_ack");
            return (false, Vec::new());
        }
        let changed = self.promote_staged(Side::Remote);
        if changed {
            self.awaiting_revoke_and_ack = true;
        }
        (changed, Vec::new())
    }

    /// `rcvd_commit`: promotes staged changes into the local view, firing
    /// `Fulfilled` synchronously for any HTLC we offered whose fulfillment
    /// has just become part of our own commitment.
    pub fn rcvd_commit(&mut self) -> (bool, Vec<HtlcNotification>) {
        let pending_before: Vec<(Side, u64)> = self
            .htlcs
            .iter()
            .filter(|(_, h)| h.state(Side::Local) == HtlcState::PendingRemove)
            .map(|(&k, _)| k)
            .collect();

        let changed = self.promote_staged(Side::Local);

        let mut notifications = Vec::new();
        for (offerer, id) in pending_before {
            if offerer != Side::Local {
                continue;
            }
            let htlc = self.htlcs.get(&(offerer, id)).expect("just iterated");
            if htlc.state(Side::Local) != HtlcState::RemovedNew {
                continue;
            }
            if let Some(RemovalType::Fulfill(preimage)) = &htlc.removal {
                notifications.push(HtlcNotification::Fulfilled {
                    offerer,
                    id,
                    preimage: *preimage,
                });
            }
        }
        (changed, notifications)
    }

    /// `sending_rev_and_ack`: finalizes the local view's newly-removed
    /// HTLCs, applying the balance realization rule (§4.4).
    pub fn sending_rev_and_ack(&mut self) -> (bool, Vec<HtlcNotification>) {
        let mut changed = false;
        let ids: Vec<(Side, u64)> = self
            .htlcs
            .iter()
            .filter(|(_, h)| h.state(Side::Local) == HtlcState::RemovedNew)
            .map(|(&k, _)| k)
            .collect();
        for key in ids {
            let htlc = self.htlcs.get_mut(&key).expect("just iterated");
            htlc.set_state(Side::Local, HtlcState::RemovedCommitted);
            self.realize_balance(Side::Local, &key);
            changed = true;
        }
        (changed, Vec::new())
    }

    /// `rcvd_rev_and_ack`: finalizes the remote view's newly-removed HTLCs,
    /// clears the ordering gate, garbage-collects fully-removed HTLCs, and
    /// reports the HTLCs that became irrevocably locked or fully failed
    /// during the handshake round that is now complete.
    pub fn rcvd_rev_and_ack(&mut self) -> (bool, Vec<HtlcNotification>) {
        let mut changed = false;
        let ids: Vec<(Side, u64)> = self
            .htlcs
            .iter()
            .filter(|(_, h)| h.state(Side::Remote) == HtlcState::RemovedNew)
            .map(|(&k, _)| k)
            .collect();
        for key in &ids {
            let htlc = self.htlcs.get_mut(key).expect("just iterated");
            htlc.set_state(Side::Remote, HtlcState::RemovedCommitted);
            self.realize_balance(Side::Remote, key);
            changed = true;
        }

        self.awaiting_revoke_and_ack = false;

        let mut notifications = Vec::new();
        for (offerer, id) in self.pending_locks.drain(..) {
            if let Some(htlc) = self.htlcs.get(&(offerer, id)) {
                if htlc.is_irrevocably_committed() {
                    notifications.push(HtlcNotification::Locked { offerer, id });
                }
            }
        }
        for (offerer, id) in self.pending_removals.drain(..) {
            if let Some(htlc) = self.htlcs.get(&(offerer, id)) {
                if htlc.is_fully_removed() && matches!(htlc.removal, Some(RemovalType::Fail)) {
                    notifications.push(HtlcNotification::Failed { offerer, id });
                }
            }
        }

        self.htlcs.retain(|_, h| !h.is_fully_removed());

        (changed, notifications)
    }

    /// Moves an HTLC's escrowed value to its final destination on `view`
    /// the moment that view stops including it as a live, pending change —
    /// each view's `RemovedNew` transition fires exactly once per HTLC, so
    /// this never double-applies.
    fn realize_balance(&mut self, view: Side, key: &(Side, u64)) {
        let htlc = self.htlcs.get(key).expect("realize_balance: htlc present");
        let offerer = htlc.offerer;
        let msat = htlc.msat;
        match &htlc.removal {
            Some(RemovalType::Fail) => {
                self.views[view].add_owed_msat(offerer, msat as i64);
            }
            Some(RemovalType::Fulfill(_)) => {
                self.views[view].add_owed_msat(offerer.other(), msat as i64);
            }
            None => {}
        }
    }

    /// True between a `sending_commit` and the matching `rcvd_rev_and_ack`.
    #[inline]
    pub fn awaiting_revoke_and_ack(&self) -> bool {
        self.awaiting_revoke_and_ack
    }

    // ----------------------------------------------------------------
    // 4.5 Fee operations
    // ----------------------------------------------------------------

    /// A monotone upper bound on the feerate the funder could still afford
    /// on its own view, computed assuming no currently-live HTLC becomes
    /// dust at the candidate rate (the maximal-weight case). This is a
    /// pre-filter, not a tight solver (§9): a caller that accepts its
    /// answer must still confirm with [`Self::can_afford_feerate`].
    pub fn approx_max_feerate(&self) -> u64 {
        let side = self.funder;
        let live_htlcs = self.htlcs.values().filter(|h| h.is_live_on(side)).count() as u64;
        let weight = COMMITMENT_BASE_WEIGHT + HTLC_OUTPUT_WEIGHT * live_htlcs;
        let funder_balance_sat = self.views[side].owed_msat(self.funder) / 1000;
        let funder_reserve = self.configs.channel_reserve_sat(self.funder);
        let affordable_fee_sat = funder_balance_sat.saturating_sub(funder_reserve);
        if weight == 0 {
            return u64::MAX;
        }
        affordable_fee_sat * 1000 / weight
    }

    /// Authoritative affordability check at a specific feerate: recomputes
    /// the commitment fee on both views at `feerate` and verifies both
    /// reserves (§4.5).
    pub fn can_afford_feerate(&self, feerate: u64) -> bool {
        let mut probe = self.clone();
        probe.views[Side::Local].set_feerate(feerate);
        probe.views[Side::Remote].set_feerate(feerate);
        probe.affordable(Side::Local, false) && probe.affordable(Side::Remote, false)
    }

    /// Overwrites `view[side]`'s feerate. Enforcement of who is allowed to
    /// propose fee changes is left to the session driver (§4.5).
    pub fn adjust_fee(&mut self, feerate: u64, side: Side) {
        self.views[side].set_feerate(feerate);
        log::debug!("adjusted feerate on {:?} view to {} sat/kw", side, feerate);
    }

    /// Sets an exact absolute fee against the funder's balance on both
    /// views, for a cooperative-close-style transaction. Returns `false` if
    /// the funder cannot cover `fee_sat` in full on a given view, zeroing
    /// that view's funder balance instead of going negative; the residual
    /// shortfall is left for the caller to handle (§4.5, §9).
    pub fn force_fee(&mut self, fee_sat: u64) -> bool {
        let funder = self.funder;
        let fee_msat = fee_sat.saturating_mul(1000);
        let mut fully_covered = true;
        for side in [Side::Local, Side::Remote] {
            let balance = self.views[side].owed_msat(funder);
            if balance >= fee_msat {
                self.views[side].set_owed_msat(funder, balance - fee_msat);
            } else {
                fully_covered = false;
                self.views[side].set_owed_msat(funder, 0);
            }
        }
        if !fully_covered {
            log::warn!(
                "force_fee of {} sat could not be fully covered by funder {:?}",
                fee_sat,
                funder
            );
        }
        fully_covered
    }

    /// The feerate implied by `side`'s commitment transaction as it would
    /// actually be constructed, accounting for dust-trimmed HTLC outputs
    /// changing the real weight from the theoretical maximum, and for the
    /// integer rounding fee-to-weight introduces (§4.5). If `weight_hint` is
    /// given (e.g. the weight of an already-signed transaction received from
    /// the counterparty) it is used instead of recomputing the weight
    /// locally.
    pub fn actual_feerate(&self, side: Side, weight_hint: Option<u64>) -> u64 {
        let weight = weight_hint.unwrap_or_else(|| self.commitment_weight_committed(side));
        if weight == 0 {
            return 0;
        }
        let feerate = self.views[side].feerate_per_kw();
        let fee_sat = feerate * weight / 1000;
        fee_sat * 1000 / weight
    }

    // ----------------------------------------------------------------
    // 4.6 iteration helpers used by the materializer (tx.rs)
    // ----------------------------------------------------------------

    /// HTLCs committed on `side`'s actual current commitment.
    pub fn committed_htlcs(&self, side: Side) -> Vec<&Htlc> {
        self.htlcs.values().filter(|h| h.is_committed_on(side)).collect()
    }

    pub fn is_htlc_dust(&self, htlc: &Htlc, side: Side) -> bool {
        let dust_limit = self.configs.dust_limit_sat(side);
        self.is_dust(htlc, side, dust_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn basepoints(seed: u8) -> Basepoints {
        let key = dummy_pubkey(seed);
        Basepoints {
            revocation: key,
            payment: key,
            htlc: key,
            delayed_payment: key,
        }
    }

    fn dummy_pubkey(seed: u8) -> PublicKey {
        use bitcoin::secp256k1::{Secp256k1, SecretKey};
        let mut bytes = [0u8; 32];
        bytes[31] = seed;
        bytes[0] = 1;
        let sk = SecretKey::from_slice(&bytes).unwrap();
        PublicKey::from_secret_key(&Secp256k1::new(), &sk)
    }

    fn outpoint() -> OutPoint {
        OutPoint::from_str("fd2105607605d2302994ffea703b09f66b6351816ee737a93e42a841ea20bb:0")
            .unwrap()
    }

    fn cfg() -> ChannelConfig {
        ChannelConfig {
            dust_limit_sat: 354,
            max_htlc_value_in_flight_msat: 500_000_000_000,
            max_accepted_htlcs: 30,
            channel_reserve_sat: 10_000,
            htlc_minimum_msat: 1,
            to_self_delay: 144,
        }
    }

    fn new_channel(funding_sat: u64, push_msat: u64) -> Channel {
        Channel::new(
            outpoint(),
            funding_sat,
            push_msat,
            253,
            cfg(),
            cfg(),
            basepoints(1),
            basepoints(2),
            dummy_pubkey(3),
            dummy_pubkey(4),
            Side::Local,
        )
        .unwrap()
    }

    fn round_trip(channel: &mut Channel) {
        assert!(channel.sending_commit().0);
        assert!(channel.rcvd_commit().0);
        assert!(channel.sending_rev_and_ack().0);
        assert!(channel.rcvd_rev_and_ack().0);
    }

    #[test]
    fn open_with_no_push() {
        let channel = new_channel(1_000_000, 0);
        assert_eq!(channel.view(Side::Local).owed_msat(Side::Remote), 0);
        assert_eq!(channel.view(Side::Local).commitment_number(), 0);
        assert_eq!(channel.view(Side::Remote).commitment_number(), 0);
        assert!(channel.committed_htlcs(Side::Local).is_empty());
    }

    #[test]
    fn add_commit_revoke_round_trip_locks_htlc() {
        let mut channel = new_channel(1_000_000, 0);
        let initial_local = channel.view(Side::Local).owed_msat(Side::Local);

        channel
            .add_htlc(Side::Local, 0, 100_000_000, 500, [9u8; 32], vec![0u8; 1300])
            .unwrap();
        round_trip(&mut channel);

        let htlc = channel.get_htlc(Side::Local, 0).unwrap();
        assert!(htlc.is_irrevocably_committed());
        assert_eq!(channel.view(Side::Local).commitment_number(), 1);
        assert_eq!(channel.view(Side::Remote).commitment_number(), 1);
        assert_eq!(
            channel.view(Side::Local).owed_msat(Side::Local),
            initial_local - 100_000_000
        );
    }

    #[test]
    fn fulfill_moves_balance_to_recipient() {
        let mut channel = new_channel(1_000_000, 0);
        let preimage = [5u8; 32];
        let hash = sha256::Hash::hash(&preimage).into_inner();
        channel
            .add_htlc(Side::Local, 0, 100_000_000, 500, hash, vec![0u8; 1300])
            .unwrap();
        round_trip(&mut channel);

        channel.fulfill_htlc(Side::Local, 0, preimage).unwrap();
        round_trip(&mut channel);

        assert!(channel.get_htlc(Side::Local, 0).is_none());
        assert_eq!(channel.view(Side::Remote).owed_msat(Side::Remote), 100_000_000);
    }

    #[test]
    fn fulfill_with_wrong_preimage_is_rejected_and_channel_unchanged() {
        let mut channel = new_channel(1_000_000, 0);
        let hash = sha256::Hash::hash(&[5u8; 32]).into_inner();
        channel
            .add_htlc(Side::Local, 0, 100_000_000, 500, hash, vec![0u8; 1300])
            .unwrap();
        round_trip(&mut channel);

        let before = channel.clone();
        let result = channel.fulfill_htlc(Side::Local, 0, [0xffu8; 32]);
        assert_eq!(result, Err(RemovalError::BadPreimage));
        assert_eq!(channel, before);
    }

    #[test]
    fn capacity_rejection_leaves_channel_unchanged() {
        let mut channel = new_channel(1_000_000, 950_000_000);
        let before = channel.clone();
        let result = channel.add_htlc(Side::Local, 1, 60_000_000, 500, [1u8; 32], vec![0u8; 1300]);
        assert_eq!(result, Err(AdmissionError::ChannelCapacityExceeded));
        assert_eq!(channel, before);
    }

    #[test]
    fn duplicate_add_is_idempotent() {
        let mut channel = new_channel(1_000_000, 0);
        channel
            .add_htlc(Side::Local, 0, 100_000_000, 500, [9u8; 32], vec![0u8; 1300])
            .unwrap();
        let before = channel.clone();
        let result =
            channel.add_htlc(Side::Local, 0, 100_000_000, 500, [9u8; 32], vec![0u8; 1300]);
        assert_eq!(result, Err(AdmissionError::Duplicate));
        assert_eq!(channel, before);
    }

    #[test]
    fn deep_copy_is_equal_and_independent() {
        let mut channel = new_channel(1_000_000, 0);
        channel
            .add_htlc(Side::Local, 0, 100_000_000, 500, [9u8; 32], vec![0u8; 1300])
            .unwrap();

        let copy = channel.clone();
        assert_eq!(channel, copy);

        channel.adjust_fee(5000, Side::Local);
        assert_ne!(
            channel.view(Side::Local).feerate_per_kw(),
            copy.view(Side::Local).feerate_per_kw()
        );
    }

    #[test]
    fn sending_commit_blocked_while_awaiting_revoke() {
        let mut channel = new_channel(1_000_000, 0);
        channel
            .add_htlc(Side::Local, 0, 100_000_000, 500, [9u8; 32], vec![0u8; 1300])
            .unwrap();
        assert!(channel.sending_commit().0);
        assert!(channel.awaiting_revoke_and_ack());
        let (changed, _) = channel.sending_commit();
        assert!(!changed);
    }
}
