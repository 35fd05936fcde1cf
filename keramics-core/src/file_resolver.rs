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
use std::ops::Deref;
use std::sync::Arc;

use super::data_stream::DataStreamReference;

/// Resolves relative paths, such as those of backing files, into data streams.
pub trait FileResolver {
    /// Retrieves a data stream with the specified path.
    fn get_data_stream<'a>(
        &'a self,
        path_components: &mut Vec<&'a str>,
    ) -> io::Result<Option<DataStreamReference>>;
}

/// Shared, clonable reference to a file resolver.
#[derive(Clone)]
pub struct FileResolverReference(Arc<dyn FileResolver + Send + Sync>);

impl FileResolverReference {
    /// Creates a new file resolver reference.
    pub fn new(file_resolver: Box<dyn FileResolver + Send + Sync>) -> Self {
        Self(Arc::from(file_resolver))
    }
}

impl Deref for FileResolverReference {
    type Target = dyn FileResolver + Send + Sync;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}
