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
use keramics_types::{ByteString, bytes_to_u16_be, bytes_to_u32_be, bytes_to_u64_be};

/// Fixed-size portion of an on-disk snapshot table entry, in bytes.
const QCOW_SNAPSHOT_RECORD_HEADER_SIZE: u64 = 40;

/// A single entry of the QCOW snapshot table.
///
/// Snapshot metadata is informational only: there is no support here for switching the active
/// media view to a snapshot, only for enumerating what a file's snapshot table records.
#[derive(Clone, Debug)]
pub struct QcowSnapshot {
    pub id: ByteString,
    pub name: ByteString,
    pub date_seconds: u32,
    pub date_nanoseconds: u32,
    pub vm_clock_nanoseconds: u64,
    pub vm_state_size: u32,
    pub level1_table_offset: u64,
    pub level1_table_number_of_references: u32,
}

impl QcowSnapshot {
    fn new() -> Self {
        Self {
            id: ByteString::new(),
            name: ByteString::new(),
            date_seconds: 0,
            date_nanoseconds: 0,
            vm_clock_nanoseconds: 0,
            vm_state_size: 0,
            level1_table_offset: 0,
            level1_table_number_of_references: 0,
        }
    }
}

/// Reads the full snapshot table starting at `snapshots_offset`.
///
/// Records are variable length, padded to an 8-byte boundary, so the table can only be walked
/// sequentially from the start; there is no way to seek directly to entry `n`.
pub fn read_snapshot_table(
    data_stream: &DataStreamReference,
    snapshots_offset: u64,
    number_of_snapshots: u32,
) -> Result<Vec<QcowSnapshot>, ErrorTrace> {
    let mediator: MediatorReference = Mediator::current();
    let mut snapshots: Vec<QcowSnapshot> = Vec::with_capacity(number_of_snapshots as usize);
    let mut record_offset: u64 = snapshots_offset;

    for snapshot_index in 0..number_of_snapshots {
        let mut header_data: [u8; QCOW_SNAPSHOT_RECORD_HEADER_SIZE as usize] =
            [0; QCOW_SNAPSHOT_RECORD_HEADER_SIZE as usize];

        keramics_core::data_stream_read_exact_at_position!(
            data_stream,
            &mut header_data,
            SeekFrom::Start(record_offset)
        );
        if mediator.debug_output {
            mediator.debug_print(format!(
                "QcowSnapshot: {} header data of size: {} at offset: {} (0x{:08x})\n",
                snapshot_index,
                header_data.len(),
                record_offset,
                record_offset
            ));
            mediator.debug_print_data(&header_data, true);
        }
        let mut snapshot: QcowSnapshot = QcowSnapshot::new();

        snapshot.level1_table_offset = bytes_to_u64_be!(header_data, 0);
        snapshot.level1_table_number_of_references = bytes_to_u32_be!(header_data, 8);
        let id_size: u16 = bytes_to_u16_be!(header_data, 12);
        let name_size: u16 = bytes_to_u16_be!(header_data, 14);
        snapshot.date_seconds = bytes_to_u32_be!(header_data, 16);
        snapshot.date_nanoseconds = bytes_to_u32_be!(header_data, 20);
        snapshot.vm_clock_nanoseconds = bytes_to_u64_be!(header_data, 24);
        snapshot.vm_state_size = bytes_to_u32_be!(header_data, 32);
        let extra_data_size: u32 = bytes_to_u32_be!(header_data, 36);

        // extra_data carries forward-compatible fields from newer writers; skipped uninterpreted.
        let variable_size: u64 =
            extra_data_size as u64 + id_size as u64 + name_size as u64;
        let mut variable_data: Vec<u8> = vec![0; variable_size as usize];

        keramics_core::data_stream_read_exact_at_position!(
            data_stream,
            &mut variable_data,
            SeekFrom::Start(record_offset + QCOW_SNAPSHOT_RECORD_HEADER_SIZE)
        );
        let id_offset: usize = extra_data_size as usize;
        let name_offset: usize = id_offset + id_size as usize;
        let name_end_offset: usize = name_offset + name_size as usize;

        snapshot.id.read_data(&variable_data[id_offset..name_offset]);
        snapshot.name.read_data(&variable_data[name_offset..name_end_offset]);

        let record_size: u64 = QCOW_SNAPSHOT_RECORD_HEADER_SIZE + variable_size;
        let padded_record_size: u64 = record_size.div_ceil(8) * 8;

        snapshots.push(snapshot);
        record_offset += padded_record_size;
    }
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;

    use keramics_core::open_fake_data_stream;

    fn build_record(id: &str, name: &str) -> Vec<u8> {
        let mut record: Vec<u8> = Vec::new();
        record.extend_from_slice(&196608u64.to_be_bytes());
        record.extend_from_slice(&1u32.to_be_bytes());
        record.extend_from_slice(&(id.len() as u16).to_be_bytes());
        record.extend_from_slice(&(name.len() as u16).to_be_bytes());
        record.extend_from_slice(&0x665a7878u32.to_be_bytes());
        record.extend_from_slice(&0u32.to_be_bytes());
        record.extend_from_slice(&0u64.to_be_bytes());
        record.extend_from_slice(&0u32.to_be_bytes());
        record.extend_from_slice(&0u32.to_be_bytes());
        record.extend_from_slice(id.as_bytes());
        record.extend_from_slice(name.as_bytes());

        while record.len() % 8 != 0 {
            record.push(0);
        }
        record
    }

    #[test]
    fn test_read_snapshot_table_single_entry() -> Result<(), ErrorTrace> {
        let test_data: Vec<u8> = build_record("snap1", "before upgrade");
        let data_stream: DataStreamReference = open_fake_data_stream(&test_data);

        let snapshots: Vec<QcowSnapshot> = read_snapshot_table(&data_stream, 0, 1)?;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].id, "snap1".as_bytes());
        assert_eq!(snapshots[0].name, "before upgrade".as_bytes());
        assert_eq!(snapshots[0].level1_table_offset, 196608);
        assert_eq!(snapshots[0].level1_table_number_of_references, 1);

        Ok(())
    }

    #[test]
    fn test_read_snapshot_table_multiple_entries_with_unequal_sizes() -> Result<(), ErrorTrace> {
        let mut test_data: Vec<u8> = build_record("a", "first");
        test_data.extend_from_slice(&build_record("second-snapshot-id", "b"));

        let data_stream: DataStreamReference = open_fake_data_stream(&test_data);

        let snapshots: Vec<QcowSnapshot> = read_snapshot_table(&data_stream, 0, 2)?;
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].id, "a".as_bytes());
        assert_eq!(snapshots[1].id, "second-snapshot-id".as_bytes());
        assert_eq!(snapshots[1].name, "b".as_bytes());

        Ok(())
    }

    #[test]
    fn test_read_snapshot_table_empty() -> Result<(), ErrorTrace> {
        let data_stream: DataStreamReference = open_fake_data_stream(&[]);

        let snapshots: Vec<QcowSnapshot> = read_snapshot_table(&data_stream, 0, 0)?;
        assert!(snapshots.is_empty());

        Ok(())
    }
}
