/* Copyright 2024-2025 Joachim Metz <joachim.metz@gmail.com>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License. You may
 * obtain a copy of the License at https://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
 * WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the
 * License for the specific language governing permissions and limitations
 * under the License.
 */

/// QCOW file header signature ("QFI\xfb").
pub const QCOW_FILE_HEADER_SIGNATURE: [u8; 4] = [0x51, 0x46, 0x49, 0xfb];

/// Default number of entries retained by the level 2 table cache.
pub const QCOW_DEFAULT_LEVEL2_CACHE_CAPACITY: usize = 8;

/// Default number of entries retained by the cluster block cache.
pub const QCOW_DEFAULT_CLUSTER_CACHE_CAPACITY: usize = 16;

/// Size in bytes of an AES-CBC sector.
pub const QCOW_SECTOR_SIZE: u64 = 512;

/// Known incompatible feature flags (version 3). Bit 0: dirty bit.
pub const QCOW_SUPPORTED_INCOMPATIBLE_FEATURE_FLAGS: u64 = 1;
