// Copyright (c), Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Returns the current epoch time in milliseconds since the UNIX epoch.
pub fn current_epoch_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("fixed start time")
        .as_millis() as u64
}

/// Returns the duration since the offset.
/// Returns `None` if the offset is greater than the current time.
pub(crate) fn checked_duration_since(offset: u64) -> Option<Duration> {
    let now = current_epoch_time();
    (offset <= now).then(|| Duration::from_millis(now - offset))
}

/// Creates a [Duration] from a given number of minutes.
/// Can be removed once the `Duration::from_mins` method is stabilized.
pub(crate) fn from_mins(mins: u16) -> Duration {
    // widen before multiplying, 2^16 * 60 does not fit in a u16
    Duration::from_secs(mins as u64 * 60)
}
