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

use std::io;
use std::sync::{Arc, RwLock};

use keramics_core::FileResolverReference;

use super::enums::QcowErrorKind;
use super::file::QcowFile;

/// A single layer of an opened backing chain: the live file plus the name it was opened from,
/// used only to detect a cycle while the chain is being followed.
pub type QcowImageLayer = Arc<RwLock<QcowFile>>;

/// A QCOW storage media image: a file together with the chain of backing files it depends on.
///
/// Layers are ordered from the deepest backing file (index 0) to the file originally requested
/// (the last index); each layer's `backing_file` points at the previous one, mirroring how
/// [`QcowFile::read_at_media`] walks the chain when it encounters an unallocated cluster.
pub struct QcowImage {
    layers: Vec<QcowImageLayer>,
}

impl QcowImage {
    /// Creates a new, empty storage media image.
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Retrieves the number of layers in the backing chain, including the top-level file.
    pub fn get_number_of_layers(&self) -> usize {
        self.layers.len()
    }

    /// Retrieves a layer by index; index 0 is the deepest backing file.
    pub fn get_layer_by_index(&self, layer_index: usize) -> io::Result<QcowImageLayer> {
        self.layers.get(layer_index).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("No layer with index: {}", layer_index),
            )
        })
    }

    /// Retrieves the top-level (most recently opened) layer.
    pub fn top_layer(&self) -> io::Result<QcowImageLayer> {
        self.layers.last().cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Image has no layers")
        })
    }

    /// Opens `filename` through `file_resolver`, then follows `backing_filename` links until an
    /// image with no backing file is reached, wiring each [`QcowFile`] to its parent.
    ///
    /// A filename that reappears earlier in the same chain is rejected with a `CorruptTable`
    /// [`io::Error`] rather than followed again, which would otherwise recurse forever.
    pub fn open(&mut self, file_resolver: &FileResolverReference, filename: &str) -> io::Result<()> {
        let mut files: Vec<QcowFile> = Vec::new();
        let mut visited_filenames: Vec<String> = vec![filename.to_string()];

        let mut file: QcowFile = Self::open_one(file_resolver, filename)?;

        while let Some(backing_filename) = file.get_backing_filename() {
            if visited_filenames.contains(&backing_filename) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "{:?}: Cyclic backing file chain detected at: {}",
                        QcowErrorKind::CorruptTable,
                        backing_filename
                    ),
                ));
            }
            visited_filenames.push(backing_filename.clone());

            let backing_file: QcowFile = Self::open_one(file_resolver, &backing_filename)?;

            files.push(file);
            file = backing_file;
        }
        files.push(file);

        let mut layers: Vec<QcowImageLayer> = Vec::with_capacity(files.len());
        while let Some(mut file) = files.pop() {
            if let Some(parent) = layers.last() {
                let parent: Arc<RwLock<QcowFile>> = Arc::clone(parent);
                file.set_parent(parent);
            }
            layers.push(Arc::new(RwLock::new(file)));
        }
        self.layers = layers;

        Ok(())
    }

    /// Resolves and reads a single file's header/tables, without following its backing chain.
    fn open_one(file_resolver: &FileResolverReference, filename: &str) -> io::Result<QcowFile> {
        let mut path_components: Vec<&str> = vec![filename];
        let data_stream = match file_resolver.get_data_stream(&mut path_components)? {
            Some(data_stream) => data_stream,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("No such file: {}", filename),
                ));
            }
        };
        let mut file: QcowFile = QcowFile::new();
        file.read_data_stream(&data_stream)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error.to_string()))?;

        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::SeekFrom;

    use keramics_core::{DataStream, DataStreamReference, FileResolver, open_fake_data_stream};

    /// An in-memory file resolver backed by a fixed set of named byte buffers, so backing-chain
    /// tests don't need real files on disk.
    struct MapFileResolver {
        files: std::collections::HashMap<String, Vec<u8>>,
    }

    impl FileResolver for MapFileResolver {
        fn get_data_stream<'a>(
            &'a self,
            path_components: &mut Vec<&'a str>,
        ) -> io::Result<Option<DataStreamReference>> {
            let name: &str = path_components[path_components.len() - 1];
            Ok(self.files.get(name).map(|data| open_fake_data_stream(data)))
        }
    }

    fn build_header_v3(
        cluster_bits: u32,
        media_size: u64,
        level1_table_offset: u64,
        backing_filename: Option<&str>,
    ) -> Vec<u8> {
        let (backing_offset, backing_size): (u64, u32) = match backing_filename {
            Some(name) => (4096, name.len() as u32),
            None => (0, 0),
        };
        let mut header: Vec<u8> = Vec::new();
        header.extend_from_slice(b"QFI\xfb");
        header.extend_from_slice(&3u32.to_be_bytes());
        header.extend_from_slice(&backing_offset.to_be_bytes());
        header.extend_from_slice(&backing_size.to_be_bytes());
        header.extend_from_slice(&cluster_bits.to_be_bytes());
        header.extend_from_slice(&media_size.to_be_bytes());
        header.extend_from_slice(&0u32.to_be_bytes());
        header.extend_from_slice(&1u32.to_be_bytes());
        header.extend_from_slice(&level1_table_offset.to_be_bytes());
        header.extend_from_slice(&0u64.to_be_bytes()); // refcount_table_offset
        header.extend_from_slice(&0u32.to_be_bytes()); // refcount_table_clusters
        header.extend_from_slice(&0u32.to_be_bytes()); // number_of_snapshots
        header.extend_from_slice(&0u64.to_be_bytes()); // snapshots_offset
        header.extend_from_slice(&0u64.to_be_bytes()); // incompatible_feature_flags
        header.extend_from_slice(&0u64.to_be_bytes()); // compatible_feature_flags
        header.extend_from_slice(&0u64.to_be_bytes()); // autoclear_feature_flags
        header.extend_from_slice(&4u32.to_be_bytes()); // reference_count_order
        header.extend_from_slice(&104u32.to_be_bytes()); // header_size
        header
    }

    /// Builds a sparse (no allocations) single-L1-entry v3 image referencing `backing_filename`.
    fn build_sparse_image(backing_filename: Option<&str>) -> Vec<u8> {
        let cluster_bits: u32 = 9;
        let cluster_size: u64 = 1 << cluster_bits;
        let media_size: u64 = cluster_size;
        let level1_table_offset: u64 = cluster_size;

        let mut data: Vec<u8> =
            build_header_v3(cluster_bits, media_size, level1_table_offset, backing_filename);
        data.resize(4096, 0);
        if let Some(name) = backing_filename {
            data[4096..4096 + name.len()].copy_from_slice(name.as_bytes());
        }
        data.resize(level1_table_offset as usize, 0);
        data.extend_from_slice(&0u64.to_be_bytes());
        data
    }

    /// Builds a single-cluster, fully-allocated v3 image with no backing file.
    fn build_allocated_image(fill_byte: u8) -> Vec<u8> {
        let cluster_bits: u32 = 9;
        let cluster_size: u64 = 1 << cluster_bits;
        let media_size: u64 = cluster_size;
        let level1_table_offset: u64 = cluster_size;
        let level2_table_offset: u64 = cluster_size * 2;
        let cluster_data_offset: u64 = cluster_size * 3;

        let mut data: Vec<u8> = build_header_v3(cluster_bits, media_size, level1_table_offset, None);
        data.resize(level1_table_offset as usize, 0);
        data.extend_from_slice(&level2_table_offset.to_be_bytes());
        data.resize(level2_table_offset as usize, 0);
        data.extend_from_slice(&cluster_data_offset.to_be_bytes());
        data.resize(cluster_data_offset as usize, 0);
        data.extend_from_slice(&vec![fill_byte; cluster_size as usize]);
        data
    }

    #[test]
    fn test_open_single_layer_with_no_backing_file() -> io::Result<()> {
        let mut files: std::collections::HashMap<String, Vec<u8>> = std::collections::HashMap::new();
        files.insert("leaf.qcow2".to_string(), build_allocated_image(0xab));
        let file_resolver = FileResolverReference::new(Box::new(MapFileResolver { files }));

        let mut image: QcowImage = QcowImage::new();
        image.open(&file_resolver, "leaf.qcow2")?;

        assert_eq!(image.get_number_of_layers(), 1);

        Ok(())
    }

    #[test]
    fn test_open_follows_backing_chain_and_reads_through_it() -> io::Result<()> {
        let mut files: std::collections::HashMap<String, Vec<u8>> = std::collections::HashMap::new();
        files.insert("base.qcow2".to_string(), build_allocated_image(0x5a));
        files.insert(
            "leaf.qcow2".to_string(),
            build_sparse_image(Some("base.qcow2")),
        );
        let file_resolver = FileResolverReference::new(Box::new(MapFileResolver { files }));

        let mut image: QcowImage = QcowImage::new();
        image.open(&file_resolver, "leaf.qcow2")?;

        assert_eq!(image.get_number_of_layers(), 2);

        let top: QcowImageLayer = image.top_layer()?;
        let mut buf: Vec<u8> = vec![0; 512];
        let read_count: usize = match top.write() {
            Ok(mut file) => {
                file.seek(SeekFrom::Start(0))
                    .map_err(|error| keramics_core::error_to_io_error!(error))?;
                file.read(&mut buf)
                    .map_err(|error| keramics_core::error_to_io_error!(error))?
            }
            Err(error) => return Err(io::Error::new(io::ErrorKind::Other, error.to_string())),
        };
        assert_eq!(read_count, 512);
        assert_eq!(buf, vec![0x5au8; 512]);

        Ok(())
    }

    #[test]
    fn test_open_rejects_cyclic_backing_chain() {
        let mut files: std::collections::HashMap<String, Vec<u8>> = std::collections::HashMap::new();
        files.insert(
            "a.qcow2".to_string(),
            build_sparse_image(Some("b.qcow2")),
        );
        files.insert(
            "b.qcow2".to_string(),
            build_sparse_image(Some("a.qcow2")),
        );
        let file_resolver = FileResolverReference::new(Box::new(MapFileResolver { files }));

        let mut image: QcowImage = QcowImage::new();
        let result = image.open(&file_resolver, "a.qcow2");

        assert!(result.is_err());
    }

    #[test]
    fn test_open_missing_file_is_not_found() {
        let files: std::collections::HashMap<String, Vec<u8>> = std::collections::HashMap::new();
        let file_resolver = FileResolverReference::new(Box::new(MapFileResolver { files }));

        let mut image: QcowImage = QcowImage::new();
        let result = image.open(&file_resolver, "missing.qcow2");

        match result {
            Err(error) => assert_eq!(error.kind(), io::ErrorKind::NotFound),
            Ok(_) => panic!("expected an error"),
        }
    }
}
