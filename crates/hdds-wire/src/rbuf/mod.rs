// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receive-buffer memory discipline.
//!
//! Every received datagram lives in an [`Rmsg`] drawn from a per-thread
//! [`RbufPool`]; every piece of state derived from it ([`Rdata`] descriptors,
//! defragmenter and reorderer entries) keeps the message alive through a
//! biased reference count, so the buffer goes back to the pool exactly when
//! the last stored reference is dropped.
//!
//! ## Reference protocol
//!
//! ```text
//! new_rmsg              refcount = UNCOMMITTED_BIAS (2^31)
//! rdata stored          refcount += RDATA_BIAS      (2^20, once per rdata)
//! commit                refcount -= UNCOMMITTED_BIAS
//! fragchain_adjust(n)   refcount -= RDATA_BIAS - n  (per rdata, once)
//! fragchain_unref       refcount -= 1               (per rdata)
//! refcount == 0         buffer returns to the pool
//! ```
//!
//! The two biases let the receive thread defer all bookkeeping until a batch
//! of defragment/reorder calls has settled: provisional references are
//! booked in bulk and reconciled with the actual number of storing places in
//! one signed adjustment.

mod pool;
mod rdata;
mod rmsg;

pub use pool::{PoolStats, RbufPool};
pub use rdata::{fragchain_adjust, fragchain_unref, FragChain, Rdata};
pub use rmsg::{Rmsg, RMSG_RDATA_BIAS, RMSG_UNCOMMITTED_BIAS};
