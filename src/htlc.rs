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

use crate::side::Side;

/// Fixed length of a BOLT-4 onion routing packet. Opaque to this crate: the
/// bytes are copied in and out but never interpreted here.
pub const TOTAL_PACKET_SIZE: usize = 1300;

/// Per-side lifecycle of a single HTLC. Both sides advance independently;
/// an HTLC's state as a whole is the pair `(local_state, remote_state)`.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[derive(StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum HtlcState {
    /// Staged for addition; not yet reflected on this side's commitment.
    #[display("pending_add")]
    PendingAdd,

    /// Present on this side's current commitment transaction.
    #[display("committed")]
    Committed,

    /// Staged for removal; still present on this side's current commitment.
    #[display("pending_remove")]
    PendingRemove,

    /// Removed from the staged changes, but not yet reflected on this
    /// side's commitment transaction.
    #[display("removed_new")]
    RemovedNew,

    /// Absent from this side's current commitment transaction. Once both
    /// sides reach this state the HTLC is fully settled and collectible.
    #[display("removed_committed")]
    RemovedCommitted,
}

/// How an HTLC is being taken off the books.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Display, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub enum RemovalType {
    /// The HTLC timed out or was refused downstream; funds return to the
    /// offerer.
    #[display("fail")]
    Fail,

    /// The HTLC was redeemed with its preimage; funds move to the
    /// non-offerer.
    #[display("fulfill")]
    Fulfill([u8; 32]),
}

impl RemovalType {
    pub fn preimage(&self) -> Option<[u8; 32]> {
        match self {
            RemovalType::Fail => None,
            RemovalType::Fulfill(preimage) => Some(*preimage),
        }
    }
}

/// A single Hashed Time-Locked Contract, identified by the side that
/// offered it plus a per-offerer monotonic id.
#[derive(Clone, PartialEq, Eq, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct Htlc {
    pub offerer: Side,
    pub id: u64,
    pub msat: u64,
    /// Absolute block height at which the HTLC times out. Always
    /// `0 < cltv_expiry < 500_000_000`, the boundary BOLT-11/BIP-65 use to
    /// distinguish block heights from unix timestamps.
    pub cltv_expiry: u32,
    pub payment_hash: [u8; 32],
    /// Opaque onion routing packet, always [`TOTAL_PACKET_SIZE`] bytes long.
    /// Kept as `Vec<u8>` rather than a fixed-size array since
    /// `strict_encoding`'s derive only has built-in array support for a
    /// handful of small lengths.
    pub routing_packet: Vec<u8>,
    pub removal: Option<RemovalType>,
    state: [HtlcState; 2],
}

impl Htlc {
    pub fn new(
        offerer: Side,
        id: u64,
        msat: u64,
        cltv_expiry: u32,
        payment_hash: [u8; 32],
        routing_packet: Vec<u8>,
    ) -> Self {
        Htlc {
            offerer,
            id,
            msat,
            cltv_expiry,
            payment_hash,
            routing_packet,
            removal: None,
            state: [HtlcState::PendingAdd, HtlcState::PendingAdd],
        }
    }

    /// Compares the negotiable content of two HTLC offers, ignoring state
    /// and removal bookkeeping. Used to distinguish a harmless
    /// retransmission (identical content) from a conflicting reuse of the
    /// same `(offerer, id)` pair.
    pub fn same_offer(&self, other: &Htlc) -> bool {
        self.offerer == other.offerer
            && self.id == other.id
            && self.msat == other.msat
            && self.cltv_expiry == other.cltv_expiry
            && self.payment_hash == other.payment_hash
            && self.routing_packet == other.routing_packet
    }

    #[inline]
    pub fn state(&self, side: Side) -> HtlcState {
        self.state[side]
    }

    #[inline]
    pub fn set_state(&mut self, side: Side, state: HtlcState) {
        self.state[side] = state;
    }

    /// Whether this HTLC would appear, in some form, on a commitment
    /// transaction freshly rebuilt for `side` from currently staged state:
    /// true in every state except `REMOVED_COMMITTED`, which means the
    /// HTLC has fully dropped out of that view.
    pub fn is_live_on(&self, side: Side) -> bool {
        self.state(side) != HtlcState::RemovedCommitted
    }

    /// Whether this HTLC is on `side`'s *actual, already-signed* current
    /// commitment transaction — used by the materializer (§4.6), which only
    /// ever renders `COMMITTED` HTLCs, never staged-but-unsent changes.
    pub fn is_committed_on(&self, side: Side) -> bool {
        self.state(side) == HtlcState::Committed
    }

    /// "Live" in the admission-cap sense (§4.2, invariant 6): offered and
    /// not yet fully removed on both sides.
    pub fn is_live_outbound(&self) -> bool {
        !self.is_fully_removed()
    }

    /// Irrevocably committed: `COMMITTED` on both sides.
    pub fn is_irrevocably_committed(&self) -> bool {
        self.state(Side::Local) == HtlcState::Committed
            && self.state(Side::Remote) == HtlcState::Committed
    }

    /// Fully removed and garbage-collectible: `REMOVED_COMMITTED` on both
    /// sides.
    pub fn is_fully_removed(&self) -> bool {
        self.state(Side::Local) == HtlcState::RemovedCommitted
            && self.state(Side::Remote) == HtlcState::RemovedCommitted
    }

    /// Whether a removal (fail or fulfill) has already been staged on
    /// either view.
    pub fn removal_in_progress(&self) -> bool {
        matches!(
            self.state(Side::Local),
            HtlcState::PendingRemove
                | HtlcState::RemovedNew
                | HtlcState::RemovedCommitted
        ) || matches!(
            self.state(Side::Remote),
            HtlcState::PendingRemove
                | HtlcState::RemovedNew
                | HtlcState::RemovedCommitted
        )
    }
}

/// A single HTLC transition as reported back to the session driver from a
/// handshake operation, replacing the source's inverted callback style (see
/// the design notes on callback -> record rewrite).
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum HtlcNotification {
    /// An HTLC this side offered has become irrevocably committed on both
    /// commitments ("theirs_locked" in the source naming, fired from the
    /// offerer's perspective as well as the recipient's).
    Locked { offerer: Side, id: u64 },

    /// An HTLC this side offered failed and is now fully removed: funds
    /// returned to the offerer.
    Failed { offerer: Side, id: u64 },

    /// An HTLC this side offered was fulfilled by the counterparty and the
    /// fulfillment has now become part of our own commitment; the session
    /// driver may now settle the upstream HTLC that funded it.
    Fulfilled {
        offerer: Side,
        id: u64,
        preimage: [u8; 32],
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Htlc {
        Htlc::new(
            Side::Local,
            0,
            100_000_000,
            500,
            [7u8; 32],
            vec![0u8; TOTAL_PACKET_SIZE],
        )
    }

    #[test]
    fn fresh_htlc_is_pending_add_on_both_sides() {
        let htlc = sample();
        assert_eq!(htlc.state(Side::Local), HtlcState::PendingAdd);
        assert_eq!(htlc.state(Side::Remote), HtlcState::PendingAdd);
        assert!(!htlc.is_irrevocably_committed());
        assert!(!htlc.is_fully_removed());
    }

    #[test]
    fn same_offer_ignores_state() {
        let mut a = sample();
        let mut b = sample();
        a.set_state(Side::Local, HtlcState::Committed);
        b.set_state(Side::Remote, HtlcState::PendingRemove);
        assert!(a.same_offer(&b));

        b.msat += 1;
        assert!(!a.same_offer(&b));
    }

    #[test]
    fn fully_removed_requires_both_sides() {
        let mut htlc = sample();
        htlc.set_state(Side::Local, HtlcState::RemovedCommitted);
        assert!(!htlc.is_fully_removed());
        htlc.set_state(Side::Remote, HtlcState::RemovedCommitted);
        assert!(htlc.is_fully_removed());
    }
}
