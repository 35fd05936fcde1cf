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

const UNITS: [&str; 9] = ["", "K", "M", "G", "T", "P", "E", "Z", "Y"];

/// Formats an integer as bytes size.
pub fn format_as_bytesize(value: u64, base: u64) -> String {
    let mut factor: u64 = 1;
    let mut next_factor: u64 = base;
    let mut units_index: usize = 0;

    while next_factor <= value {
        factor = next_factor;
        next_factor *= base;
        units_index += 1;
    }
    if units_index > 0 {
        let float_value: f64 = value as f64 / factor as f64;
        let mut base_string: &str = "B";
        if base == 1024 {
            base_string = "iB";
        }
        return format!("{:.1} {}{}", float_value, UNITS[units_index], base_string);
    }
    return format!("{} B", value);
}

/// Formats data as a lower case hexadecimal string.
pub fn format_as_string(data: &[u8]) -> String {
    data.iter()
        .map(|byte_value| format!("{:02x}", byte_value))
        .collect::<Vec<String>>()
        .join("")
}

/// Formats data as a hexdump, optionally grouping bytes in blocks of 16.
pub fn format_as_hexdump(data: &[u8], group: bool) -> String {
    let mut output: String = String::new();
    let data_size: usize = data.len();
    let mut data_offset: usize = 0;

    while data_offset < data_size {
        let line_size: usize = std::cmp::min(16, data_size - data_offset);
        let line: &[u8] = &data[data_offset..data_offset + line_size];

        output.push_str(&format!("{:08x}  ", data_offset));

        for (byte_index, byte_value) in line.iter().enumerate() {
            output.push_str(&format!("{:02x} ", byte_value));

            if group && byte_index == 7 {
                output.push(' ');
            }
        }
        for _ in line_size..16 {
            output.push_str("   ");
        }
        if group && line_size <= 8 {
            output.push(' ');
        }
        output.push_str(" ");

        for byte_value in line.iter() {
            let character: char = *byte_value as char;

            if character.is_ascii_graphic() || character == ' ' {
                output.push(character);
            } else {
                output.push('.');
            }
        }
        output.push('\n');

        data_offset += line_size;
    }
    output
}
