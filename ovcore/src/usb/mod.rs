// Copyright lowRISC contributors.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

//! USB capture decoding: packet decoding (C10) and capture-record framing
//! (C11).

pub mod decoder;
pub mod sniffer;
