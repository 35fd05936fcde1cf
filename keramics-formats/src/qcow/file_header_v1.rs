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

use keramics_core::ErrorTrace;
use keramics_types::{bytes_to_u32_be, bytes_to_u64_be};

use super::constants::*;

/// QEMU Copy-On-Write (QCOW) file header version 1.
pub struct QcowFileHeaderV1 {
    pub backing_file_name_offset: u64,
    pub backing_file_name_size: u32,
    pub media_size: u64,
    pub number_of_cluster_block_bits: u32,
    pub number_of_level2_table_bits: u32,
    pub encryption_method: u32,
    pub level1_table_offset: u64,
}

impl QcowFileHeaderV1 {
    /// Creates a new file header.
    pub fn new() -> Self {
        Self {
            backing_file_name_offset: 0,
            backing_file_name_size: 0,
            media_size: 0,
            number_of_cluster_block_bits: 0,
            number_of_level2_table_bits: 0,
            encryption_method: 0,
            level1_table_offset: 0,
        }
    }

    /// Reads the file header from a buffer.
    pub fn read_data(&mut self, data: &[u8]) -> Result<(), ErrorTrace> {
        if data.len() < 48 {
            return Err(keramics_core::error_trace_new!(
                "Unsupported QCOW file header version 1 data size"
            ));
        }
        if data[0..4] != QCOW_FILE_HEADER_SIGNATURE {
            return Err(keramics_core::error_trace_new!(
                "Unsupported QCOW file header version 1 signature"
            ));
        }
        let format_version: u32 = bytes_to_u32_be!(data, 4);

        if format_version != 1 {
            return Err(keramics_core::error_trace_new!(format!(
                "Unsupported format version: {}",
                format_version
            )));
        }
        self.backing_file_name_offset = bytes_to_u64_be!(data, 8);
        self.backing_file_name_size = bytes_to_u32_be!(data, 16);
        // offset 20..24: modification_time, ignored by a read-only accessor.
        self.media_size = bytes_to_u64_be!(data, 24);
        self.number_of_cluster_block_bits = data[32] as u32;
        self.number_of_level2_table_bits = data[33] as u32;
        // offset 34..36: unused padding.
        self.encryption_method = bytes_to_u32_be!(data, 36);
        self.level1_table_offset = bytes_to_u64_be!(data, 40);

        if self.number_of_cluster_block_bits == 0 || self.number_of_cluster_block_bits > 63 {
            return Err(keramics_core::error_trace_new!(format!(
                "Invalid number of cluster block bits: {} value out of bounds",
                self.number_of_cluster_block_bits
            )));
        }
        if self.number_of_level2_table_bits == 0 || self.number_of_level2_table_bits > 63 {
            return Err(keramics_core::error_trace_new!(format!(
                "Invalid number of level2 table bits: {} value out of bounds",
                self.number_of_level2_table_bits
            )));
        }
        Ok(())
    }
}
