// LNP/BP Core Library implementing LNPBP specifications & standards
// Written in 2019 by
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

#![recursion_limit = "256"]
// Coding conventions
#![deny(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    unused_mut,
    unused_imports,
    dead_code,
    //missing_docs
)]

#[macro_use]
extern crate amplify;
#[macro_use]
extern crate strict_encoding;

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_with;
#[cfg(feature = "serde")]
extern crate serde_crate as serde;

mod channel;
pub mod config;
pub mod error;
pub mod htlc;
pub mod keys;
pub mod side;
pub mod tx;
pub mod view;

pub use channel::{
    Channel, COMMITMENT_BASE_WEIGHT, HTLC_OUTPUT_WEIGHT, HTLC_SUCCESS_WEIGHT,
    HTLC_TIMEOUT_WEIGHT,
};
pub use config::{ChannelConfig, ChannelConfigPair, MAX_ACCEPTED_HTLC_LIMIT};
pub use error::{AdmissionError, ConfigError, ConstructionError, RemovalError};
pub use htlc::{Htlc, HtlcNotification, HtlcState, RemovalType, TOTAL_PACKET_SIZE};
pub use keys::{commitment_number_obscurer, Basepoints, Bolt3KeyDeriver, DerivedKeys, KeyDeriver};
pub use side::Side;
pub use tx::{build_commitment_tx, build_commitment_tx_bolt3, CommitmentTx, HtlcOutput, HtlcTx};
pub use view::{ChannelView, MAX_COMMITMENT_NUMBER};
