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

use std::error::Error;
use std::fmt;

use keramics_core::ErrorTrace;

use super::enums::QcowErrorKind;

/// QCOW error, a classified [`QcowErrorKind`] carrying an [`ErrorTrace`] for diagnostics.
#[derive(Debug)]
pub struct QcowError {
    pub kind: QcowErrorKind,
    trace: ErrorTrace,
}

impl QcowError {
    /// Creates a new QCOW error with the given kind, wrapping a trace.
    pub fn new(kind: QcowErrorKind, trace: ErrorTrace) -> Self {
        Self { kind, trace }
    }
}

impl Error for QcowError {}

impl fmt::Display for QcowError {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{:?}: {}", self.kind, self.trace.to_string())
    }
}

/// Wraps an [`ErrorTrace`] into a [`QcowError`] of the given kind.
#[macro_export]
macro_rules! qcow_error {
    ( $kind:expr, $error:expr ) => {
        $crate::qcow::QcowError::new($kind, $error)
    };
}
