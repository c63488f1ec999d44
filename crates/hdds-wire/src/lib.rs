// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # hdds-wire - the wire-level RTPS engine
//!
//! Everything between bytes arriving on a socket and ordered, defragmented,
//! de-duplicated samples handed to a delivery handler, plus the reciprocal
//! reliability traffic on the sending side.
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                     Embedding DDS stack                            |
//! |    readers/writers | discovery policy | history cache | types      |
//! +--------------------------------------------------------------------+
//! |                          hdds-wire                                 |
//! |  receive: validate -> defrag -> reorder -> delivery queue          |
//! |  transmit: xmsg builder -> packer -> send queue                    |
//! |  plist codec | instance map | quiescence GC | timed events         |
//! +--------------------------------------------------------------------+
//! |                     transports (UDP, ...)                          |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`receive::Receiver`] | datagram validation and protocol dispatch |
//! | [`defrag::Defrag`] | per-writer sample reassembly |
//! | [`reorder::Reorder`] | in-order presentation with gap accounting |
//! | [`dqueue::DeliveryQueue`] | reception-to-delivery hand-off |
//! | [`plist::Plist`] | parameter-list codec (QoS, GUIDs, locators) |
//! | [`xmsg::Xmsg`] / [`xmsg::Xpack`] | outbound message construction |
//! | [`tkmap::TkMap`] | serialized key -> instance handle |
//! | [`gc::Gc`] | quiescence-based deferred reclamation |
//!
//! ## See Also
//!
//! - [RTPS Specification](https://www.omg.org/spec/DDSI-RTPS/2.5/)

/// Address sets for outbound traffic.
pub mod addrset;
/// MSB-first fixed bitmaps backing every SN/FN set.
pub mod bitset;
/// Engine tuning knobs.
pub mod config;
/// Per-proxy-writer defragmentation.
pub mod defrag;
/// Delivery queue between reception and user delivery.
pub mod dqueue;
/// Quiescence-based garbage collection and thread states.
pub mod gc;
/// Parameter-list codec.
pub mod plist;
/// Proxy endpoints and the GUID index.
pub mod proxy;
/// Receive-buffer memory discipline.
pub mod rbuf;
/// Sequence-number reordering.
pub mod reorder;
/// The receive path.
pub mod receive;
/// RTPS framing constants and set encodings.
pub mod rtps;
/// Sample descriptors.
pub mod sample;
/// Operator counters.
pub mod stats;
/// Instance map.
pub mod tkmap;
/// Transport contract, UDP, wait set, stream framing.
pub mod transport;
/// Wire-level identifier and scalar types.
pub mod types;
/// Writer history cache contract.
pub mod whc;
/// Timed events.
pub mod xevent;
/// Outbound message construction and packing.
pub mod xmsg;

pub use config::{Config, DefragDropMode, DeliveryMode, LocalParticipants};
pub use receive::{recv_thread_loop, Receiver};
pub use sample::{Rsample, SampleInfo};
pub use stats::{Stats, StatsSnapshot};
pub use types::{EntityId, FragNr, Guid, GuidPrefix, Locator, LocatorKind, SeqNr, VendorId};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
