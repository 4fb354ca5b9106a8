// SPDX-License-Identifier: GPL-3.0-only

//! Hardware backends
//!
//! - [`sensor`]: depth sensor abstraction, format selection, the delivery
//!   queue and a synthetic sensor

pub mod sensor;
