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

/// QCOW compression method (version 3 only; versions 1 and 2 are always deflate).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QcowCompressionMethod {
    Zlib,
    Unknown,
}

/// QCOW encryption method.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QcowEncryptionMethod {
    None,
    AesCbc128,
    Luks,
    Unknown,
}

/// Error kind, classifying an [`crate::qcow::QcowError`] for callers that need to branch on it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QcowErrorKind {
    InvalidSignature,
    UnsupportedVersion,
    InvalidHeader,
    CorruptTable,
    EncryptionRequired,
    InvalidKey,
    DecompressionFailed,
    IoError,
    OutOfRange,
    Cancelled,
}
