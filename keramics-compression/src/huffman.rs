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

use keramics_core::mediator::{Mediator, MediatorReference};

use super::traits::Bitstream;

/// Canonical Huffman decode tree, built from a per-symbol code-length table.
pub struct HuffmanTree {
    /// Mediator.
    mediator: MediatorReference,

    /// Largest code length, in bits, this tree can represent.
    largest_code_size: usize,

    /// Upper bound on the number of symbols this tree can hold.
    maximum_code_size: usize,

    /// Symbols, ordered first by code length then by symbol value.
    symbols: Vec<u16>,

    /// Number of symbols of each code length, indexed by length.
    code_size_counts: Vec<isize>,
}

impl HuffmanTree {
    /// Creates a new Huffman tree able to hold up to `number_of_symbols` symbols with codes no
    /// longer than `largest_code_size` bits.
    pub fn new(number_of_symbols: usize, largest_code_size: usize) -> Self {
        Self {
            mediator: Mediator::current(),
            largest_code_size,
            maximum_code_size: number_of_symbols,
            symbols: vec![0u16; number_of_symbols],
            code_size_counts: vec![0isize; largest_code_size + 1],
        }
    }

    /// Builds the tree from a per-symbol code-length table.
    pub fn build(&mut self, code_sizes: &[u8]) -> io::Result<()> {
        if code_sizes.len() > self.maximum_code_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Unsupported number of Huffman code sizes",
            ));
        }
        for count in self.code_size_counts.iter_mut() {
            *count = 0;
        }
        for &code_size in code_sizes {
            if code_size as usize > self.largest_code_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Huffman code size exceeds largest code size",
                ));
            }
            self.code_size_counts[code_size as usize] += 1;
        }
        self.code_size_counts[0] = 0;

        let mut left: isize = 1;
        for code_size in 1..=self.largest_code_size {
            left <<= 1;
            left -= self.code_size_counts[code_size];

            if left < 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Over-subscribed Huffman code",
                ));
            }
        }
        if self.mediator.debug_output {
            self.mediator
                .debug_print(format!("HuffmanTree incomplete codes left: {}\n", left));
        }
        let mut offsets: Vec<usize> = vec![0; self.largest_code_size + 2];
        for code_size in 1..self.largest_code_size {
            offsets[code_size + 1] = offsets[code_size] + self.code_size_counts[code_size] as usize;
        }
        for (symbol_index, &code_size) in code_sizes.iter().enumerate() {
            if code_size != 0 {
                let offset: usize = offsets[code_size as usize];
                self.symbols[offset] = symbol_index as u16;
                offsets[code_size as usize] += 1;
            }
        }
        Ok(())
    }

    /// Decodes a single symbol from the bitstream.
    pub fn decode_symbol(&self, bitstream: &mut dyn Bitstream) -> io::Result<u16> {
        let mut code: isize = 0;
        let mut first: isize = 0;
        let mut index: isize = 0;

        for code_size in 1..=self.largest_code_size {
            code |= bitstream.get_value(1) as isize;
            let count: isize = self.code_size_counts[code_size];

            if code - first < count {
                return Ok(self.symbols[(index + (code - first)) as usize]);
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Invalid Huffman code",
        ))
    }
}
