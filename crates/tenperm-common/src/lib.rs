#![warn(missing_docs)]

//! Common types shared between the tenperm planning core and its backends.

mod device;
mod dim;
mod elem;
mod props;

pub use device::*;
pub use dim::*;
pub use elem::*;
pub use props::*;
