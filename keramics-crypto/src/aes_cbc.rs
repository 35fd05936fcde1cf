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

use aes::Aes128;
use cbc::cipher::generic_array::GenericArray;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};

use keramics_core::ErrorTrace;

type Aes128CbcDecryptor = cbc::Decryptor<Aes128>;

/// Size in bytes of the sector an individual CBC chain (and IV) covers.
const SECTOR_SIZE: usize = 512;

/// AES-128-CBC decryption context, keyed once and reused across sectors.
///
/// Each 512-byte sector is decrypted as its own CBC chain, with an IV derived from the sector's
/// logical index rather than from any value stored on disk.
pub struct Aes128CbcCipher {
    key: [u8; 16],
}

impl Aes128CbcCipher {
    /// Creates a new cipher context from a 128-bit key.
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }

    /// Derives the per-sector IV: the little-endian logical sector index, zero-padded to 16 bytes.
    fn sector_iv(sector_index: u64) -> [u8; 16] {
        let mut iv: [u8; 16] = [0; 16];
        iv[0..8].copy_from_slice(&sector_index.to_le_bytes());
        iv
    }

    /// Decrypts `buf` in place, sector by sector, starting at `first_sector_index`.
    ///
    /// `buf.len()` must be a multiple of 512 bytes; each 512-byte sector is decrypted as an
    /// independent CBC chain keyed by its own logical sector index.
    pub fn decrypt_sectors(&self, first_sector_index: u64, buf: &mut [u8]) -> Result<(), ErrorTrace> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(keramics_core::error_trace_new!(format!(
                "Unsupported buffer size: {} is not a multiple of the sector size",
                buf.len()
            )));
        }
        for (sector_offset, sector) in buf.chunks_mut(SECTOR_SIZE).enumerate() {
            let sector_index: u64 = first_sector_index + sector_offset as u64;
            let iv: [u8; 16] = Self::sector_iv(sector_index);

            let mut decryptor: Aes128CbcDecryptor =
                Aes128CbcDecryptor::new((&self.key).into(), (&iv).into());

            for block in sector.chunks_mut(16) {
                let block_ref = GenericArray::from_mut_slice(block);
                decryptor.decrypt_block_mut(block_ref);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_iv() {
        let iv: [u8; 16] = Aes128CbcCipher::sector_iv(0);
        assert_eq!(iv, [0u8; 16]);

        let iv: [u8; 16] = Aes128CbcCipher::sector_iv(1);
        assert_eq!(
            iv,
            [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_decrypt_sectors_round_trip() -> Result<(), ErrorTrace> {
        use aes::cipher::BlockEncryptMut;

        type Aes128CbcEncryptor = cbc::Encryptor<Aes128>;

        let key: [u8; 16] = [
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e,
            0x0f, 0x10,
        ];
        let plaintext: [u8; 512] = [0xaa; 512];
        let iv: [u8; 16] = Aes128CbcCipher::sector_iv(0);

        let mut ciphertext: Vec<u8> = plaintext.to_vec();
        let mut encryptor: Aes128CbcEncryptor = Aes128CbcEncryptor::new((&key).into(), (&iv).into());
        for block in ciphertext.chunks_mut(16) {
            let block_ref = GenericArray::from_mut_slice(block);
            encryptor.encrypt_block_mut(block_ref);
        }

        let cipher: Aes128CbcCipher = Aes128CbcCipher::new(key);
        cipher.decrypt_sectors(0, &mut ciphertext)?;

        assert_eq!(ciphertext, plaintext.to_vec());

        Ok(())
    }

    #[test]
    fn test_decrypt_sectors_with_unsupported_size() {
        let cipher: Aes128CbcCipher = Aes128CbcCipher::new([0; 16]);
        let mut buf: Vec<u8> = vec![0; 511];

        let result = cipher.decrypt_sectors(0, &mut buf);
        assert!(result.is_err());
    }
}
