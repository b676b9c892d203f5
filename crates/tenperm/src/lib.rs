#![warn(missing_docs)]

//! Plan search, selection and caching for N-dimensional tensor
//! transposition on accelerator devices.
//!
//! The crate computes execution strategies for `output[p(i)] = alpha *
//! input[i] + beta * output[p(i)]` over large device-resident tensors: it
//! partitions the axes into cooperating groups, enumerates candidate
//! plans across five strategies, ranks them with an analytic
//! memory-transaction model (or by timing them on real buffers), and
//! caches the winner per shape fingerprint.
//!
//! The per-element kernels, the device allocator and the stream machinery
//! are external collaborators plugged in through the [`kernel`] and
//! [`memory`] traits.

mod base;

/// Bounded recency-ordered plan cache.
pub mod cache;
/// Global configuration.
pub mod config;
/// Analytic cost model.
pub mod cost;
/// Backend seam for the data-movement kernels.
pub mod kernel;
/// Device memory capability and scoped buffers.
pub mod memory;
/// Axis partitioning, launch geometry, index tables, enumeration and the
/// plan itself.
pub mod plan;
/// Empirical candidate selection.
pub mod tune;

mod error;

pub use base::*;
pub use error::PermuteError;

pub use tenperm_common::{DeviceId, Dim3, ElemSize, HardwareProperties, StreamId};
