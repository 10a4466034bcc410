/*
 * SPDX-FileCopyrightText: 2023 Tommaso Fontana
 *
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use crate::prelude::*;
use arbitrary::Arbitrary;

#[derive(Arbitrary, Debug)]
pub struct FuzzCase {
    data: Vec<u8>,
}

/// The streaming decoder must reject or decode arbitrary bytes without
/// panicking.
pub fn harness(data: FuzzCase) {
    let _ = decode_graph(&data.data, |_, _| {});
}
