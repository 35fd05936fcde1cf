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

/// Fate of a QCOW block range, resolved from an L1/L2 table walk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QcowBlockRangeType {
    /// Compressed cluster; `data_offset`/`size` describe the on-disk deflate stream.
    Compressed,
    /// Unallocated in this file; defer to the backing file, if any.
    InBackingFile,
    /// Raw (optionally encrypted) cluster data in this file.
    InFile,
    /// Unallocated with no backing file; reads as zero.
    Sparse,
    /// Explicitly zeroed cluster (version 3 "all zero" bit); reads as zero.
    Zero,
}

/// A contiguous run of media offsets sharing one resolved fate.
#[derive(Clone, Debug)]
pub struct QcowBlockRange {
    /// Offset into the media (logical) address space.
    pub media_offset: u64,

    /// Offset into the underlying file, meaningful only for `InFile`/`Compressed`.
    pub data_offset: u64,

    /// Size in bytes of `media_offset..media_offset+size`.
    pub size: u64,

    /// On-disk byte length of the deflate stream, meaningful only for `Compressed`.
    pub compressed_size: u64,

    /// Fate of this range.
    pub range_type: QcowBlockRangeType,
}

impl QcowBlockRange {
    /// Creates a new block range.
    pub fn new(media_offset: u64, data_offset: u64, size: u64, range_type: QcowBlockRangeType) -> Self {
        Self {
            media_offset,
            data_offset,
            size,
            compressed_size: 0,
            range_type,
        }
    }

    /// Creates a new compressed block range with an explicit on-disk size.
    pub fn new_compressed(media_offset: u64, data_offset: u64, size: u64, compressed_size: u64) -> Self {
        Self {
            media_offset,
            data_offset,
            size,
            compressed_size,
            range_type: QcowBlockRangeType::Compressed,
        }
    }
}
