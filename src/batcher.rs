//! Copyright © 2025-2026 Dunimd Team. All Rights Reserved.
//!
//! This file is part of Vista.
//! The Vista project belongs to the Dunimd Team.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! You may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//!     http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

//! # Vista Batcher Module
//!
//! Latency-targeting adaptive batch sizing for bulk writes. Batches start
//! small so progress is visible immediately, then grow multiplicatively
//! while per-batch latency stays under the target and shrink when it
//! overshoots.

use std::time::Duration;

const DEFAULT_TARGET_LATENCY: Duration = Duration::from_millis(200);
const INIT_BATCH_SIZE: usize = 1;
const MAX_GROWTH_FACTOR: f64 = 2.0;

/// Adaptive batch sizer targeting a fixed per-batch latency.
#[derive(Clone, Debug)]
pub struct VistaDynamicBatcher {
    target_latency: Duration,
    batch_size: usize,
}

impl Default for VistaDynamicBatcher {
    fn default() -> Self {
        VistaDynamicBatcher::new(DEFAULT_TARGET_LATENCY)
    }
}

impl VistaDynamicBatcher {
    pub fn new(target_latency: Duration) -> Self {
        VistaDynamicBatcher {
            target_latency,
            batch_size: INIT_BATCH_SIZE,
        }
    }

    /// The batch size to use for the next round trip.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Records the latency of the last batch and resizes.
    ///
    /// The growth/shrink factor is the target-to-measured latency ratio,
    /// clamped so a single noisy measurement never more than doubles or
    /// halves the batch.
    pub fn record_latency(&mut self, latency: Duration) {
        let measured = latency.as_secs_f64();
        let factor = if measured > 0.0 {
            (self.target_latency.as_secs_f64() / measured)
                .clamp(1.0 / MAX_GROWTH_FACTOR, MAX_GROWTH_FACTOR)
        } else {
            MAX_GROWTH_FACTOR
        };

        self.batch_size = ((self.batch_size as f64 * factor) as usize).max(1);
    }
}
