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

//! Deterministic construction of the unsigned BOLT-3 commitment transaction
//! for one side's view, given that side's per-commitment point (§4.6).

use bitcoin::blockdata::opcodes::all::*;
use bitcoin::blockdata::script;
use bitcoin::{PackedLockTime, Sequence, Transaction, TxIn, TxOut, Witness};
use bitcoin_scripts::{LockScript, PubkeyScript, WitnessScript};

use crate::channel::{Channel, HTLC_SUCCESS_WEIGHT, HTLC_TIMEOUT_WEIGHT};
use crate::htlc::Htlc;
use crate::keys::{Bolt3KeyDeriver, DerivedKeys, KeyDeriver};
use crate::side::Side;

trait ScriptGenerators {
    fn ln_to_local(revocationpubkey: bitcoin::secp256k1::PublicKey, local_delayedpubkey: bitcoin::secp256k1::PublicKey, to_self_delay: u16) -> Self;
    fn ln_to_remote_v1(remote_pubkey: bitcoin::secp256k1::PublicKey) -> Self;
    fn ln_offered_htlc(
        revocationpubkey: bitcoin::secp256k1::PublicKey,
        local_htlcpubkey: bitcoin::secp256k1::PublicKey,
        remote_htlcpubkey: bitcoin::secp256k1::PublicKey,
        payment_hash: &[u8; 32],
    ) -> Self;
    fn ln_received_htlc(
        revocationpubkey: bitcoin::secp256k1::PublicKey,
        local_htlcpubkey: bitcoin::secp256k1::PublicKey,
        remote_htlcpubkey: bitcoin::secp256k1::PublicKey,
        cltv_expiry: u32,
        payment_hash: &[u8; 32],
    ) -> Self;
}

impl ScriptGenerators for WitnessScript {
    fn ln_to_local(
        revocationpubkey: bitcoin::secp256k1::PublicKey,
        local_delayedpubkey: bitcoin::secp256k1::PublicKey,
        to_self_delay: u16,
    ) -> Self {
        let lock_script: LockScript = script::Builder::new()
            .push_opcode(OP_IF)
            .push_key(&bitcoin::PublicKey::new(revocationpubkey))
            .push_opcode(OP_ELSE)
            .push_int(to_self_delay as i64)
            .push_opcode(OP_CSV)
            .push_opcode(OP_DROP)
            .push_key(&bitcoin::PublicKey::new(local_delayedpubkey))
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_CHECKSIG)
            .into_script()
            .into();
        lock_script.into()
    }

    fn ln_to_remote_v1(_remote_pubkey: bitcoin::secp256k1::PublicKey) -> Self {
        unimplemented!("to_remote v1 is a plain P2WPKH output, not a witness script")
    }

    fn ln_offered_htlc(
        revocationpubkey: bitcoin::secp256k1::PublicKey,
        local_htlcpubkey: bitcoin::secp256k1::PublicKey,
        remote_htlcpubkey: bitcoin::secp256k1::PublicKey,
        payment_hash: &[u8; 32],
    ) -> Self {
        let lock_script: LockScript = script::Builder::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(&bitcoin::PublicKey::new(revocationpubkey).pubkey_hash())
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_IF)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ELSE)
            .push_key(&bitcoin::PublicKey::new(remote_htlcpubkey))
            .push_opcode(OP_SWAP)
            .push_opcode(OP_SIZE)
            .push_int(32)
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_NOTIF)
            .push_opcode(OP_DROP)
            .push_int(2)
            .push_opcode(OP_SWAP)
            .push_key(&bitcoin::PublicKey::new(local_htlcpubkey))
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .push_opcode(OP_ELSE)
            .push_opcode(OP_HASH160)
            .push_slice(payment_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_ENDIF)
            .into_script()
            .into();
        lock_script.into()
    }

    fn ln_received_htlc(
        revocationpubkey: bitcoin::secp256k1::PublicKey,
        local_htlcpubkey: bitcoin::secp256k1::PublicKey,
        remote_htlcpubkey: bitcoin::secp256k1::PublicKey,
        cltv_expiry: u32,
        payment_hash: &[u8; 32],
    ) -> Self {
        let lock_script: LockScript = script::Builder::new()
            .push_opcode(OP_DUP)
            .push_opcode(OP_HASH160)
            .push_slice(&bitcoin::PublicKey::new(revocationpubkey).pubkey_hash())
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_IF)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ELSE)
            .push_key(&bitcoin::PublicKey::new(remote_htlcpubkey))
            .push_opcode(OP_SWAP)
            .push_opcode(OP_SIZE)
            .push_int(32)
            .push_opcode(OP_EQUAL)
            .push_opcode(OP_IF)
            .push_opcode(OP_HASH160)
            .push_slice(payment_hash)
            .push_opcode(OP_EQUALVERIFY)
            .push_int(2)
            .push_opcode(OP_SWAP)
            .push_key(&bitcoin::PublicKey::new(local_htlcpubkey))
            .push_int(2)
            .push_opcode(OP_CHECKMULTISIG)
            .push_opcode(OP_ELSE)
            .push_opcode(OP_DROP)
            .push_int(cltv_expiry as i64)
            .push_opcode(OP_CLTV)
            .push_opcode(OP_DROP)
            .push_opcode(OP_CHECKSIG)
            .push_opcode(OP_ENDIF)
            .push_opcode(OP_ENDIF)
            .into_script()
            .into();
        lock_script.into()
    }
}

impl ScriptGenerators for PubkeyScript {
    fn ln_to_local(
        revocationpubkey: bitcoin::secp256k1::PublicKey,
        local_delayedpubkey: bitcoin::secp256k1::PublicKey,
        to_self_delay: u16,
    ) -> Self {
        WitnessScript::ln_to_local(revocationpubkey, local_delayedpubkey, to_self_delay).to_p2wsh()
    }

    fn ln_to_remote_v1(remote_pubkey: bitcoin::secp256k1::PublicKey) -> Self {
        bitcoin::PublicKey::new(remote_pubkey)
            .wpubkey_hash()
            .expect("derived keys are always compressed")
            .into()
    }

    fn ln_offered_htlc(
        revocationpubkey: bitcoin::secp256k1::PublicKey,
        local_htlcpubkey: bitcoin::secp256k1::PublicKey,
        remote_htlcpubkey: bitcoin::secp256k1::PublicKey,
        payment_hash: &[u8; 32],
    ) -> Self {
        WitnessScript::ln_offered_htlc(revocationpubkey, local_htlcpubkey, remote_htlcpubkey, payment_hash).to_p2wsh()
    }

    fn ln_received_htlc(
        revocationpubkey: bitcoin::secp256k1::PublicKey,
        local_htlcpubkey: bitcoin::secp256k1::PublicKey,
        remote_htlcpubkey: bitcoin::secp256k1::PublicKey,
        cltv_expiry: u32,
        payment_hash: &[u8; 32],
    ) -> Self {
        WitnessScript::ln_received_htlc(
            revocationpubkey,
            local_htlcpubkey,
            remote_htlcpubkey,
            cltv_expiry,
            payment_hash,
        )
        .to_p2wsh()
    }
}

/// One non-dust HTLC output on an assembled commitment transaction, kept
/// alongside the [`TxOut`] so the second-stage HTLC transaction can be
/// built afterwards.
#[derive(Clone, Debug)]
pub struct HtlcOutput {
    pub htlc: Htlc,
    pub output_index: usize,
}

/// A second-stage HTLC-timeout (for an HTLC `side` offered) or HTLC-success
/// (for an HTLC `side` received) transaction, spending one non-dust HTLC
/// output of the commitment transaction back to a revocable `to_local`-style
/// output (§4.6, points 4-5).
#[derive(Clone, Debug)]
pub struct HtlcTx {
    pub transaction: Transaction,
    pub htlc: Htlc,
    pub witness_script: WitnessScript,
}

/// The unsigned commitment transaction for one view, plus the second-stage
/// HTLC transactions spending each of its non-dust HTLC outputs and their
/// witness scripts.
#[derive(Clone, Debug)]
pub struct CommitmentTx {
    pub transaction: Transaction,
    pub to_local_output_index: Option<usize>,
    pub to_remote_output_index: Option<usize>,
    pub htlc_outputs: Vec<HtlcOutput>,
    pub htlc_txs: Vec<HtlcTx>,
}

/// Builds `side`'s current, unsigned commitment transaction from `channel`,
/// deriving per-commitment keys via `deriver` at `per_commitment_point`
/// (§4.6). Returns `None` if key derivation fails.
pub fn build_commitment_tx(
    channel: &Channel,
    side: Side,
    per_commitment_point: &bitcoin::secp256k1::PublicKey,
    deriver: &dyn KeyDeriver,
) -> Option<CommitmentTx> {
    let other = side.other();
    let keys = deriver.derive(
        channel.basepoints(side),
        channel.basepoints(other),
        per_commitment_point,
    )?;
    Some(assemble(channel, side, &keys))
}

/// Convenience wrapper using the standard [`Bolt3KeyDeriver`].
pub fn build_commitment_tx_bolt3(
    channel: &Channel,
    side: Side,
    per_commitment_point: &bitcoin::secp256k1::PublicKey,
) -> Option<CommitmentTx> {
    build_commitment_tx(channel, side, per_commitment_point, &Bolt3KeyDeriver)
}

fn assemble(channel: &Channel, side: Side, keys: &DerivedKeys) -> CommitmentTx {
    let view = channel.view(side);
    let to_self_delay = channel.configs().to_self_delay(side);

    let fee_sat = view.feerate_per_kw() * channel.commitment_weight_committed(side) / 1000;
    let mut local_sat = view.owed_msat(side) / 1000;
    let remote_sat = view.owed_msat(side.other()) / 1000;
    local_sat = local_sat.saturating_sub(fee_sat);

    let dust_limit = channel.configs().dust_limit_sat(side);

    // `(output, htlc)` pairs, `htlc` only set for HTLC outputs; sorted
    // below per BIP69 (scriptPubkey, then value), with CLTV breaking ties
    // among otherwise-identical HTLC outputs (BOLT-3's extension to BIP69).
    let mut entries: Vec<(TxOut, Option<Htlc>)> = Vec::new();

    if local_sat > dust_limit {
        let script_pubkey: PubkeyScript =
            PubkeyScript::ln_to_local(keys.revocation, keys.local_delayed, to_self_delay);
        entries.push((
            TxOut {
                value: local_sat,
                script_pubkey: script_pubkey.into(),
            },
            None,
        ));
    }
    if remote_sat > dust_limit {
        let script_pubkey: PubkeyScript = PubkeyScript::ln_to_remote_v1(keys.local_payment);
        entries.push((
            TxOut {
                value: remote_sat,
                script_pubkey: script_pubkey.into(),
            },
            None,
        ));
    }

    for htlc in channel.committed_htlcs(side) {
        if channel.is_htlc_dust(htlc, side) {
            continue;
        }
        let offered_by_us = htlc.offerer == side;
        let script_pubkey: PubkeyScript = if offered_by_us {
            PubkeyScript::ln_offered_htlc(
                keys.revocation,
                keys.local_htlc,
                keys.remote_htlc,
                &htlc.payment_hash,
            )
        } else {
            PubkeyScript::ln_received_htlc(
                keys.revocation,
                keys.local_htlc,
                keys.remote_htlc,
                htlc.cltv_expiry,
                &htlc.payment_hash,
            )
        };
        entries.push((
            TxOut {
                value: htlc.msat / 1000,
                script_pubkey: script_pubkey.into(),
            },
            Some(htlc.clone()),
        ));
    }

    entries.sort_by(|(out_a, htlc_a), (out_b, htlc_b)| {
        out_a
            .script_pubkey
            .cmp(&out_b.script_pubkey)
            .then(out_a.value.cmp(&out_b.value))
            .then(
                htlc_a
                    .as_ref()
                    .map(|h| h.cltv_expiry)
                    .cmp(&htlc_b.as_ref().map(|h| h.cltv_expiry)),
            )
    });

    let mut to_local_output_index = None;
    let mut to_remote_output_index = None;
    let mut htlc_outputs = Vec::new();
    let mut outputs = Vec::with_capacity(entries.len());
    for (index, (out, htlc)) in entries.into_iter().enumerate() {
        match htlc {
            Some(htlc) => htlc_outputs.push(HtlcOutput {
                htlc,
                output_index: index,
            }),
            None if to_local_output_index.is_none() && out.value == local_sat && local_sat > dust_limit => {
                to_local_output_index = Some(index);
            }
            None => {
                to_remote_output_index = Some(index);
            }
        }
        outputs.push(out);
    }

    let obscured = view.commitment_number() ^ channel.commitment_number_obscurer();
    let locktime = 0x20000000 | (obscured >> 24) as u32 & 0x00ff_ffff;
    let sequence = 0x80000000 | (obscured & 0x00ff_ffff) as u32;

    let transaction = Transaction {
        version: 2,
        lock_time: PackedLockTime(locktime),
        input: vec![TxIn {
            previous_output: channel.funding_outpoint(),
            script_sig: bitcoin::Script::new(),
            sequence: Sequence(sequence),
            witness: Witness::new(),
        }],
        output: outputs,
    };

    let commitment_txid = transaction.txid();
    let htlc_txs = htlc_outputs
        .iter()
        .map(|ho| build_htlc_tx(channel, side, keys, to_self_delay, commitment_txid, ho))
        .collect();

    CommitmentTx {
        transaction,
        to_local_output_index,
        to_remote_output_index,
        htlc_outputs,
        htlc_txs,
    }
}

/// Builds the second-stage transaction spending one non-dust HTLC output of
/// a just-assembled commitment transaction, per BOLT-3: an HTLC-timeout
/// transaction (locktime = the HTLC's `cltv_expiry`) for an HTLC `side`
/// offered, or an HTLC-success transaction (locktime 0) for one `side`
/// received, paying into a revocable `to_local`-style output after
/// deducting that transaction's own fee (§4.6, points 4-5).
fn build_htlc_tx(
    channel: &Channel,
    side: Side,
    keys: &DerivedKeys,
    to_self_delay: u16,
    commitment_txid: bitcoin::Txid,
    htlc_output: &HtlcOutput,
) -> HtlcTx {
    let htlc = &htlc_output.htlc;
    let offered_by_us = htlc.offerer == side;
    let weight = if offered_by_us {
        HTLC_TIMEOUT_WEIGHT
    } else {
        HTLC_SUCCESS_WEIGHT
    };
    let feerate = channel.view(side).feerate_per_kw();
    let fee_sat = feerate * weight / 1000;
    let amount_sat = (htlc.msat / 1000).saturating_sub(fee_sat);

    let witness_script = WitnessScript::ln_to_local(keys.revocation, keys.local_delayed, to_self_delay);
    let script_pubkey: PubkeyScript = PubkeyScript::ln_to_local(keys.revocation, keys.local_delayed, to_self_delay);

    let cltv_expiry = if offered_by_us { htlc.cltv_expiry } else { 0 };

    let transaction = Transaction {
        version: 2,
        lock_time: PackedLockTime(cltv_expiry),
        input: vec![TxIn {
            previous_output: bitcoin::OutPoint::new(commitment_txid, htlc_output.output_index as u32),
            script_sig: bitcoin::Script::new(),
            sequence: Sequence(0),
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: amount_sat,
            script_pubkey: script_pubkey.into(),
        }],
    };

    HtlcTx {
        transaction,
        htlc: htlc.clone(),
        witness_script,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::keys::Basepoints;
    use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
    use std::str::FromStr;

    fn dummy_pubkey(seed: u8) -> PublicKey {
        let mut bytes = [0u8; 32];
        bytes[31] = seed;
        bytes[0] = 1;
        let sk = SecretKey::from_slice(&bytes).unwrap();
        PublicKey::from_secret_key(&Secp256k1::new(), &sk)
    }

    fn basepoints(seed: u8) -> Basepoints {
        let key = dummy_pubkey(seed);
        Basepoints {
            revocation: key,
            payment: key,
            htlc: key,
            delayed_payment: key,
        }
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

    fn new_channel() -> Channel {
        Channel::new(
            bitcoin::OutPoint::from_str(
                "fd2105607605d2302994ffea703b09f66b6351816ee737a93e42a841ea20bb:0",
            )
            .unwrap(),
            1_000_000,
            0,
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

    #[test]
    fn builds_two_output_commitment_with_no_htlcs() {
        let channel = new_channel();
        let per_commitment_point = dummy_pubkey(9);
        let commitment = build_commitment_tx_bolt3(&channel, Side::Local, &per_commitment_point)
            .expect("key derivation succeeds");
        assert_eq!(commitment.transaction.output.len(), 2);
        assert!(commitment.htlc_outputs.is_empty());
        assert_eq!(commitment.transaction.input.len(), 1);
    }

    #[test]
    fn dust_htlc_is_excluded_from_outputs() {
        let mut channel = new_channel();
        channel
            .add_htlc(Side::Local, 0, 100, 500, [7u8; 32], vec![0u8; 1300])
            .unwrap();
        assert!(channel.sending_commit().0);
        assert!(channel.rcvd_commit().0);
        assert!(channel.sending_rev_and_ack().0);
        assert!(channel.rcvd_rev_and_ack().0);

        let per_commitment_point = dummy_pubkey(9);
        let commitment = build_commitment_tx_bolt3(&channel, Side::Local, &per_commitment_point)
            .expect("key derivation succeeds");
        assert!(commitment.htlc_outputs.is_empty());
    }

    #[test]
    fn nondust_htlc_adds_output() {
        let mut channel = new_channel();
        channel
            .add_htlc(Side::Local, 0, 100_000_000, 500, [7u8; 32], vec![0u8; 1300])
            .unwrap();
        assert!(channel.sending_commit().0);
        assert!(channel.rcvd_commit().0);
        assert!(channel.sending_rev_and_ack().0);
        assert!(channel.rcvd_rev_and_ack().0);

        let per_commitment_point = dummy_pubkey(9);
        let commitment = build_commitment_tx_bolt3(&channel, Side::Local, &per_commitment_point)
            .expect("key derivation succeeds");
        assert_eq!(commitment.htlc_outputs.len(), 1);
        assert_eq!(commitment.transaction.output.len(), 3);

        // The HTLC is offered by Local, so from Local's own view this is an
        // HTLC-timeout transaction, locked to the HTLC's cltv_expiry.
        assert_eq!(commitment.htlc_txs.len(), 1);
        let htlc_tx = &commitment.htlc_txs[0];
        assert_eq!(htlc_tx.transaction.lock_time.0, 500);
        assert_eq!(
            htlc_tx.transaction.input[0].previous_output.txid,
            commitment.transaction.txid()
        );
        assert_eq!(
            htlc_tx.transaction.input[0].previous_output.vout as usize,
            commitment.htlc_outputs[0].output_index
        );
    }

    #[test]
    fn received_nondust_htlc_builds_success_tx_with_zero_locktime() {
        let mut channel = new_channel();
        channel
            .add_htlc(Side::Remote, 0, 100_000_000, 500, [7u8; 32], vec![0u8; 1300])
            .unwrap();
        assert!(channel.sending_commit().0);
        assert!(channel.rcvd_commit().0);
        assert!(channel.sending_rev_and_ack().0);
        assert!(channel.rcvd_rev_and_ack().0);

        let per_commitment_point = dummy_pubkey(9);
        let commitment = build_commitment_tx_bolt3(&channel, Side::Local, &per_commitment_point)
            .expect("key derivation succeeds");
        assert_eq!(commitment.htlc_txs.len(), 1);
        assert_eq!(commitment.htlc_txs[0].transaction.lock_time.0, 0);
    }
}
