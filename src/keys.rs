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

use bitcoin::hashes::{sha256, Hash, HashEngine};
use bitcoin::secp256k1::{self, PublicKey, Scalar, Secp256k1};

/// The five public basepoints a side publishes once at channel open, from
/// which all of that side's per-commitment keys are derived together with a
/// per-commitment point. This does not include the funding pubkey, which is
/// static per channel rather than per commitment lineage and is kept
/// separately on [`crate::Channel`].
#[derive(Copy, Clone, PartialEq, Eq, Debug, StrictEncode, StrictDecode)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate")
)]
pub struct Basepoints {
    /// Used by the counterparty to derive this side's revocation key for
    /// old, superseded commitments.
    pub revocation: PublicKey,
    /// Used to derive this side's key on the counterparty's `to_remote`
    /// output.
    pub payment: PublicKey,
    /// Used to derive this side's HTLC-spending keys.
    pub htlc: PublicKey,
    /// Used to derive this side's key on its own, delayed `to_local`
    /// output.
    pub delayed_payment: PublicKey,
}

/// Keys derived for one side's commitment transaction at one particular
/// commitment number, given that side's `per_commitment_point`.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct DerivedKeys {
    pub local_payment: PublicKey,
    pub local_delayed: PublicKey,
    pub local_htlc: PublicKey,
    pub remote_htlc: PublicKey,
    pub revocation: PublicKey,
}

/// The key-derivation oracle consumed by the commitment-tx materializer.
///
/// The core is agnostic to how basepoints become per-commitment keys beyond
/// the standard BOLT-3 tweaking scheme; a caller embedding this crate in a
/// hardware-backed signer can substitute its own implementation. The
/// concrete [`Bolt3KeyDeriver`] below performs the derivation directly using
/// `secp256k1` and is what callers get by default.
pub trait KeyDeriver {
    /// Errors from key derivation are collapsed to `None` per the
    /// materializer's "key derivation failure returns nothing" contract.
    fn derive(
        &self,
        local_basepoints: &Basepoints,
        remote_basepoints: &Basepoints,
        per_commitment_point: &PublicKey,
    ) -> Option<DerivedKeys>;
}

/// Standard BOLT-3 key derivation: `pubkey = basepoint + SHA256(point ||
/// basepoint) * G` for payment/delayed/htlc keys, and the two-tweak
/// combination for the revocation key.
#[derive(Debug, Default)]
pub struct Bolt3KeyDeriver;

impl Bolt3KeyDeriver {
    fn tweaked(
        secp: &Secp256k1<secp256k1::VerifyOnly>,
        basepoint: PublicKey,
        per_commitment_point: &PublicKey,
    ) -> Option<PublicKey> {
        let mut engine = sha256::Hash::engine();
        engine.input(&per_commitment_point.serialize());
        engine.input(&basepoint.serialize());
        let tweak = sha256::Hash::from_engine(engine);
        let tweak = Scalar::from_be_bytes(tweak.into_inner()).ok()?;
        let mut tweaked = basepoint;
        tweaked.add_exp_assign(secp, &tweak).ok()?;
        Some(tweaked)
    }

    fn revocation_key(
        secp: &Secp256k1<secp256k1::VerifyOnly>,
        revocation_basepoint: PublicKey,
        per_commitment_point: &PublicKey,
    ) -> Option<PublicKey> {
        let mut engine = sha256::Hash::engine();
        engine.input(&revocation_basepoint.serialize());
        engine.input(&per_commitment_point.serialize());
        let basepoint_tweak = sha256::Hash::from_engine(engine);
        let basepoint_tweak = Scalar::from_be_bytes(basepoint_tweak.into_inner()).ok()?;
        let mut tweaked_basepoint = revocation_basepoint;
        tweaked_basepoint
            .mul_assign(secp, &basepoint_tweak)
            .ok()?;

        let mut engine = sha256::Hash::engine();
        engine.input(&per_commitment_point.serialize());
        engine.input(&revocation_basepoint.serialize());
        let point_tweak = sha256::Hash::from_engine(engine);
        let point_tweak = Scalar::from_be_bytes(point_tweak.into_inner()).ok()?;
        let mut tweaked_point = *per_commitment_point;
        tweaked_point.mul_assign(secp, &point_tweak).ok()?;

        tweaked_basepoint.combine(&tweaked_point).ok()
    }
}

impl KeyDeriver for Bolt3KeyDeriver {
    fn derive(
        &self,
        local_basepoints: &Basepoints,
        remote_basepoints: &Basepoints,
        per_commitment_point: &PublicKey,
    ) -> Option<DerivedKeys> {
        let secp = Secp256k1::verification_only();
        Some(DerivedKeys {
            local_payment: Self::tweaked(
                &secp,
                local_basepoints.payment,
                per_commitment_point,
            )?,
            local_delayed: Self::tweaked(
                &secp,
                local_basepoints.delayed_payment,
                per_commitment_point,
            )?,
            local_htlc: Self::tweaked(
                &secp,
                local_basepoints.htlc,
                per_commitment_point,
            )?,
            remote_htlc: Self::tweaked(
                &secp,
                remote_basepoints.htlc,
                per_commitment_point,
            )?,
            revocation: Self::revocation_key(
                &secp,
                remote_basepoints.revocation,
                per_commitment_point,
            )?,
        })
    }
}

/// Lower 48 bits of SHA-256 over the two sides' payment basepoints,
/// funder-first. XOR-ed into each commitment number before it is split
/// across the commitment transaction's locktime and sequence fields, so
/// that an outside observer cannot infer how many updates a channel has
/// seen from chain data alone.
pub fn commitment_number_obscurer(
    funder_payment_basepoint: &PublicKey,
    other_payment_basepoint: &PublicKey,
) -> u64 {
    const LOWER_48_BITS: u64 = 0x0000_FFFF_FFFF_FFFF;

    let mut engine = sha256::Hash::engine();
    engine.input(&funder_payment_basepoint.serialize());
    engine.input(&other_payment_basepoint.serialize());
    let digest = sha256::Hash::from_engine(engine);

    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[24..]);
    u64::from_be_bytes(buf) & LOWER_48_BITS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn pk(hex: &str) -> PublicKey {
        PublicKey::from_str(hex).unwrap()
    }

    #[test]
    fn obscurer_is_symmetric_given_basepoint_order() {
        let a = pk("034f355bdcb7cc0af728ef3cceb9615d90684bb5b2ca5f859ab0f0b704075871aa");
        let b = pk("032c0b7cf95324a07d05398b240174dc0c2be444d96b159aa6c7f7b1e668680991");
        assert_eq!(
            commitment_number_obscurer(&a, &b),
            commitment_number_obscurer(&a, &b),
        );
        assert_ne!(
            commitment_number_obscurer(&a, &b),
            commitment_number_obscurer(&b, &a),
        );
    }

    #[test]
    fn obscurer_matches_known_test_vector() {
        let local = pk("034f355bdcb7cc0af728ef3cceb9615d90684bb5b2ca5f859ab0f0b704075871aa");
        let remote = pk("032c0b7cf95324a07d05398b240174dc0c2be444d96b159aa6c7f7b1e668680991");
        assert_eq!(commitment_number_obscurer(&local, &remote), 0x2bb038521914);
    }

    #[test]
    fn derived_keys_are_deterministic() {
        let base = pk("036d6caac248af96f6afa7f904f550253a0f3ef3f5aa2fe6838a95b216691468e2");
        let per_commitment_point =
            pk("025f7117a78150fe2ef97db7cfc83bd57b2e2c0d0dd25eaf467a4a1c2a45ce1486");
        let basepoints = Basepoints {
            revocation: base,
            payment: base,
            htlc: base,
            delayed_payment: base,
        };
        let deriver = Bolt3KeyDeriver;
        let first = deriver
            .derive(&basepoints, &basepoints, &per_commitment_point)
            .unwrap();
        let second = deriver
            .derive(&basepoints, &basepoints, &per_commitment_point)
            .unwrap();
        assert_eq!(first.local_payment, second.local_payment);
        assert_eq!(
            first.local_payment,
            pk("0235f2dbfaa89b57ec7b055afe29849ef7ddfeb1cefdb9ebdc43f5494984db29e5")
        );
    }
}
