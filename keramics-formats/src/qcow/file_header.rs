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

use std::io::SeekFrom;

use keramics_core::mediator::{Mediator, MediatorReference};
use keramics_core::{DataStreamReference, ErrorTrace};
use keramics_types::ByteString;

use super::enums::{QcowCompressionMethod, QcowEncryptionMethod};
use super::file_header_common::QcowFileHeaderCommon;
use super::file_header_v1::QcowFileHeaderV1;
use super::file_header_v2::QcowFileHeaderV2;
use super::file_header_v3::QcowFileHeaderV3;

/// Version-independent, in-memory view of a QCOW file header.
pub struct QcowFileHeader {
    mediator: MediatorReference,

    /// Format version, 1, 2 or 3.
    pub format_version: u32,

    /// `cluster_size = 1 << cluster_bits`.
    pub cluster_bits: u32,

    /// `l2_size = 1 << level2_bits`; for v2/v3 this is always `cluster_bits - 3`.
    pub level2_bits: u32,

    /// Logical device size in bytes.
    pub media_size: u64,

    /// Absolute file offset of the level 1 table.
    pub level1_table_offset: u64,

    /// Number of entries in the level 1 table.
    pub level1_table_number_of_references: u32,

    pub encryption_method: QcowEncryptionMethod,
    pub compression_method: QcowCompressionMethod,

    /// Version 3 only; zero for v1/v2.
    pub compatible_feature_flags: u64,

    /// Version 3 only; zero for v1/v2.
    pub incompatible_feature_flags: u64,

    pub backing_filename: Option<ByteString>,

    pub number_of_snapshots: u32,
    pub snapshots_offset: u64,
}

impl QcowFileHeader {
    /// Creates a new file header.
    pub fn new() -> Self {
        Self {
            mediator: Mediator::current(),
            format_version: 0,
            cluster_bits: 0,
            level2_bits: 0,
            media_size: 0,
            level1_table_offset: 0,
            level1_table_number_of_references: 0,
            encryption_method: QcowEncryptionMethod::None,
            compression_method: QcowCompressionMethod::Zlib,
            compatible_feature_flags: 0,
            incompatible_feature_flags: 0,
            backing_filename: None,
            number_of_snapshots: 0,
            snapshots_offset: 0,
        }
    }

    /// Retrieves the cluster size in bytes, `1 << cluster_bits`.
    pub fn cluster_size(&self) -> u64 {
        1u64 << self.cluster_bits
    }

    /// Retrieves the level 2 table size in entries, `1 << level2_bits`.
    pub fn level2_size(&self) -> u64 {
        1u64 << self.level2_bits
    }

    /// Maps an on-disk encryption method code to [`QcowEncryptionMethod`].
    fn map_encryption_method(value: u32) -> QcowEncryptionMethod {
        match value {
            0 => QcowEncryptionMethod::None,
            1 => QcowEncryptionMethod::AesCbc128,
            2 => QcowEncryptionMethod::Luks,
            _ => QcowEncryptionMethod::Unknown,
        }
    }

    /// Reads the (optional) backing filename at `offset`, `size` bytes long.
    fn read_backing_filename(
        &self,
        data_stream: &DataStreamReference,
        offset: u64,
        size: u32,
    ) -> Result<Option<ByteString>, ErrorTrace> {
        if offset == 0 || size == 0 {
            return Ok(None);
        }
        if size > 1023 {
            return Err(keramics_core::error_trace_new!(format!(
                "Invalid backing file name size: {} value out of bounds",
                size
            )));
        }
        let mut data: Vec<u8> = vec![0; size as usize];

        keramics_core::data_stream_read_exact_at_position!(
            data_stream,
            &mut data,
            SeekFrom::Start(offset)
        );
        if self.mediator.debug_output {
            self.mediator.debug_print(format!(
                "QcowFileHeader backing filename data of size: {} at offset: {} (0x{:08x})\n",
                data.len(),
                offset,
                offset
            ));
            self.mediator.debug_print_data(&data, true);
        }
        Ok(Some(ByteString::from(&data)))
    }

    /// Reads the file header at a specific position in a data stream.
    pub fn read_at_position(
        &mut self,
        data_stream: &DataStreamReference,
        position: SeekFrom,
    ) -> Result<(), ErrorTrace> {
        let base_offset: u64 = match position {
            SeekFrom::Start(offset) => offset,
            _ => {
                return Err(keramics_core::error_trace_new!(
                    "Unsupported seek position, expected an absolute offset"
                ));
            }
        };
        let mut common_data: [u8; 8] = [0; 8];

        keramics_core::data_stream_read_exact_at_position!(data_stream, &mut common_data, position);

        let mut common: QcowFileHeaderCommon = QcowFileHeaderCommon::new();
        match common.read_data(&common_data) {
            Ok(_) => {}
            Err(mut error) => {
                keramics_core::error_trace_add_frame!(error, "Unable to read QCOW file header");
                return Err(error);
            }
        }
        self.format_version = common.format_version;

        match self.format_version {
            1 => {
                let mut data: [u8; 48] = [0; 48];
                keramics_core::data_stream_read_exact_at_position!(
                    data_stream,
                    &mut data,
                    SeekFrom::Start(base_offset)
                );
                if self.mediator.debug_output {
                    self.mediator.debug_print(format!(
                        "QcowFileHeaderV1 data of size: {}\n",
                        data.len()
                    ));
                    self.mediator.debug_print_data(&data, true);
                }
                let mut header: QcowFileHeaderV1 = QcowFileHeaderV1::new();
                match header.read_data(&data) {
                    Ok(_) => {}
                    Err(mut error) => {
                        keramics_core::error_trace_add_frame!(
                            error,
                            "Unable to read version 1 file header"
                        );
                        return Err(error);
                    }
                }
                self.cluster_bits = header.number_of_cluster_block_bits;
                self.level2_bits = header.number_of_level2_table_bits;
                self.media_size = header.media_size;
                self.level1_table_offset = header.level1_table_offset;

                let cluster_size: u64 = 1u64 << self.cluster_bits;
                let l2_span: u64 = cluster_size * (1u64 << self.level2_bits);
                self.level1_table_number_of_references =
                    (self.media_size.div_ceil(l2_span)).max(1) as u32;
                self.encryption_method = Self::map_encryption_method(header.encryption_method);
                self.compression_method = QcowCompressionMethod::Zlib;
                self.backing_filename = self.read_backing_filename(
                    data_stream,
                    header.backing_file_name_offset,
                    header.backing_file_name_size,
                )?;
            }
            2 => {
                let mut data: [u8; 72] = [0; 72];
                keramics_core::data_stream_read_exact_at_position!(
                    data_stream,
                    &mut data,
                    SeekFrom::Start(base_offset)
                );
                if self.mediator.debug_output {
                    self.mediator.debug_print(format!(
                        "QcowFileHeaderV2 data of size: {}\n",
                        data.len()
                    ));
                    self.mediator.debug_print_data(&data, true);
                }
                let mut header: QcowFileHeaderV2 = QcowFileHeaderV2::new();
                match header.read_data(&data) {
                    Ok(_) => {}
                    Err(mut error) => {
                        keramics_core::error_trace_add_frame!(
                            error,
                            "Unable to read version 2 file header"
                        );
                        return Err(error);
                    }
                }
                self.cluster_bits = header.number_of_cluster_block_bits;
                self.level2_bits = self.cluster_bits - 3;
                self.media_size = header.media_size;
                self.level1_table_offset = header.level1_table_offset;
                self.level1_table_number_of_references = header.level1_table_number_of_references;
                self.encryption_method = Self::map_encryption_method(header.encryption_method);
                self.compression_method = QcowCompressionMethod::Zlib;
                self.number_of_snapshots = header.number_of_snapshots;
                self.snapshots_offset = header.snapshots_offset;
                self.backing_filename = self.read_backing_filename(
                    data_stream,
                    header.backing_file_name_offset,
                    header.backing_file_name_size,
                )?;
            }
            3 => {
                let mut data: [u8; 104] = [0; 104];
                keramics_core::data_stream_read_exact_at_position!(
                    data_stream,
                    &mut data,
                    SeekFrom::Start(base_offset)
                );
                if self.mediator.debug_output {
                    self.mediator.debug_print(format!(
                        "QcowFileHeaderV3 data of size: {}\n",
                        data.len()
                    ));
                    self.mediator.debug_print_data(&data, true);
                }
                let mut header: QcowFileHeaderV3 = QcowFileHeaderV3::new();
                match header.read_data(&data) {
                    Ok(_) => {}
                    Err(mut error) => {
                        keramics_core::error_trace_add_frame!(
                            error,
                            "Unable to read version 3 file header"
                        );
                        return Err(error);
                    }
                }
                self.cluster_bits = header.number_of_cluster_block_bits;
                self.level2_bits = self.cluster_bits - 3;
                self.media_size = header.media_size;
                self.level1_table_offset = header.level1_table_offset;
                self.level1_table_number_of_references = header.level1_table_number_of_references;
                self.encryption_method = Self::map_encryption_method(header.encryption_method);
                self.compression_method = match header.compression_method {
                    0 => QcowCompressionMethod::Zlib,
                    _ => QcowCompressionMethod::Unknown,
                };
                self.compatible_feature_flags = header.compatible_feature_flags;
                self.incompatible_feature_flags = header.incompatible_feature_flags;
                self.number_of_snapshots = header.number_of_snapshots;
                self.snapshots_offset = header.snapshots_offset;
                self.backing_filename = self.read_backing_filename(
                    data_stream,
                    header.backing_file_name_offset,
                    header.backing_file_name_size,
                )?;
            }
            _ => {
                return Err(keramics_core::error_trace_new!(format!(
                    "Unsupported format version: {}",
                    self.format_version
                )));
            }
        }
        if self.cluster_bits == 0 || self.cluster_bits > 30 {
            return Err(keramics_core::error_trace_new!(format!(
                "Invalid number of cluster block bits: {} value out of bounds",
                self.cluster_bits
            )));
        }
        if self.level1_table_offset != 0 && self.level1_table_offset % self.cluster_size() != 0 {
            return Err(keramics_core::error_trace_new!(format!(
                "Level 1 table offset: {} is not cluster-aligned",
                self.level1_table_offset
            )));
        }
        let level1_span: u128 = self.cluster_size() as u128
            * self.level2_size() as u128
            * self.level1_table_number_of_references as u128;
        if level1_span < self.media_size as u128 {
            return Err(keramics_core::error_trace_new!(format!(
                "Level 1 table with {} references cannot span media size: {}",
                self.level1_table_number_of_references, self.media_size
            )));
        }
        Ok(())
    }
}
