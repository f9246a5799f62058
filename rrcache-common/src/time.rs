// Copyright 2026 rrcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the unix epoch, the unit record expiry is expressed in.
pub type StdTime = u32;

/// Current wall clock time in whole seconds.
///
/// Clocks set before the epoch read as `0`; clocks past the `u32` range saturate.
pub fn stdtime_now() -> StdTime {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().min(StdTime::MAX as u64) as StdTime)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdtime_now_is_monotonic_enough() {
        let a = stdtime_now();
        let b = stdtime_now();
        assert!(a > 0);
        assert!(b >= a);
    }
}
