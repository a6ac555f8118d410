// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS wire messages used by the reliability protocol.
//!
//! | Submessage     | Direction       | Purpose                                   |
//! |----------------|-----------------|-------------------------------------------|
//! | DATA           | writer → reader | one complete change                       |
//! | DATA_FRAG      | writer → reader | consecutive fragments of a large change   |
//! | HEARTBEAT      | writer → reader | announce available range, solicit ACKNACK |
//! | HEARTBEAT_FRAG | writer → reader | announce available fragments              |
//! | GAP            | writer → reader | declare sequences irrelevant              |
//! | ACKNACK        | reader → writer | acknowledge prefix, request missing set   |
//! | NACK_FRAG      | reader → writer | request missing fragments                 |
//! | INFO_TS        | both            | source timestamp of following DATA        |
//! | INFO_DST       | both            | destination participant                   |

mod builder;
mod codec;
mod sets;
mod submessages;

pub use builder::{MessageBuilder, OutboundMessage};
pub use codec::{
    decode_message, encode_message, encode_submessage, DecodeError, Placement, RtpsHeader,
    SubmessageIter,
};
pub use sets::{word_count_for_bits, FragmentNumberSet, SequenceNumberSet};
pub use submessages::*;
