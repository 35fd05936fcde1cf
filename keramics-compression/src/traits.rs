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

/// A bit-oriented view over a byte buffer, shared by the codec's bit readers.
pub trait Bitstream {
    /// Reads the next `number_of_bits` bits, least-significant bit first.
    fn get_value(&mut self, number_of_bits: usize) -> u32;

    /// Discards the next `number_of_bits` bits without interpreting them.
    fn skip_bits(&mut self, number_of_bits: usize) {
        let _ = self.get_value(number_of_bits);
    }
}
