// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound message construction and packing.
//!
//! An [`Xmsg`] is one submessage (or a small addressed group of them) with
//! exactly one destination mode; an [`Xpack`] aggregates compatible xmsgs
//! into RTPS packets and hands them to a [`PacketSink`]. The [`SendQueue`]
//! runs a bounded background sender with retransmit-merge heuristics.

mod msg;
mod pack;
mod sendq;

pub use msg::{Xmsg, XmsgDest, XmsgKind};
pub use pack::{PacketSink, Xpack};
pub use sendq::SendQueue;
