/*
    HiMDFox
    https://github.com/dbalsom/himdfox

    Copyright 2024-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! A mock recorder. It runs the device half of the handshake with the real
//! retail-MAC math, so any deviation in the host implementation fails the
//! same way it would against hardware.

use himdfox::{
    crypto::{self, MAIN_KEY},
    secure::{IcvInfo, SecureDevice, Stage2Info, EXPECTED_DEVICE_KEY, HOST_LEAF_ID},
    HimdError,
    HIMD_EKB_VERSION,
};

pub struct MockDevice {
    disc_id: [u8; 16],
    device_nonce: [u8; 8],
    device_leaf_id: [u8; 8],
    host_nonce:  Option<[u8; 8]>,
    device_mac:  Option<[u8; 8]>,
    session_key: Option<[u8; 8]>,
    pub generation: u32,
    pub icv: [u8; 16],
    pub written: Option<IcvInfo>,
    /// Corrupt the stage-2 MAC to exercise the host's verification.
    pub tamper_stage2_mac: bool,
}

impl MockDevice {
    pub fn new(disc_id: [u8; 16], generation: u32) -> Self {
        Self {
            disc_id,
            device_nonce: [0xD0, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7],
            device_leaf_id: [0x01, 0x04, 0x00, 0x00, 0x00, 0x00, 0x12, 0x34],
            host_nonce: None,
            device_mac: None,
            session_key: None,
            generation,
            icv: [0u8; 16],
            written: None,
            tamper_stage2_mac: false,
        }
    }

    fn session_key(&self) -> Result<[u8; 8], HimdError> {
        self.session_key
            .ok_or_else(|| HimdError::DeviceError("no session established".to_string()))
    }
}

impl SecureDevice for MockDevice {
    fn write_host_leaf_id(&mut self, leaf_id: &[u8; 8], host_nonce: &[u8; 8]) -> Result<(), HimdError> {
        if *leaf_id != HOST_LEAF_ID {
            return Err(HimdError::DeviceError("unknown host leaf id".to_string()));
        }
        self.host_nonce = Some(*host_nonce);
        Ok(())
    }

    fn get_authentication_stage2_info(&mut self) -> Result<Stage2Info, HimdError> {
        let host_nonce = self
            .host_nonce
            .ok_or_else(|| HimdError::DeviceError("stage 2 before stage 1".to_string()))?;

        let mut message = Vec::with_capacity(32);
        message.extend_from_slice(&self.disc_id);
        message.extend_from_slice(&host_nonce);
        message.extend_from_slice(&self.device_nonce);
        let mut mac = crypto::retail_mac(&message, &MAIN_KEY);
        self.device_mac = Some(mac);
        if self.tamper_stage2_mac {
            mac[0] ^= 0xFF;
        }

        Ok(Stage2Info {
            disc_id: self.disc_id,
            mac,
            device_leaf_id: self.device_leaf_id,
            device_nonce: self.device_nonce,
            key_type: 1,
            key_level: 9,
            ekb_id: HIMD_EKB_VERSION,
            key: EXPECTED_DEVICE_KEY,
        })
    }

    fn write_authentication_stage3_info(&mut self, host_mac: &[u8; 8], ekb_id: u32) -> Result<(), HimdError> {
        if ekb_id != HIMD_EKB_VERSION {
            return Err(HimdError::EkbMismatch);
        }
        let host_nonce = self.host_nonce.unwrap();
        let mut message = Vec::with_capacity(32);
        message.extend_from_slice(&self.disc_id);
        message.extend_from_slice(&self.device_nonce);
        message.extend_from_slice(&host_nonce);
        if crypto::retail_mac(&message, &MAIN_KEY) != *host_mac {
            return Err(HimdError::DeviceMacMismatch);
        }

        let mut key_material = Vec::with_capacity(32);
        key_material.extend_from_slice(&self.disc_id);
        key_material.extend_from_slice(&self.device_mac.unwrap());
        key_material.extend_from_slice(host_mac);
        self.session_key = Some(crypto::retail_mac(&key_material, &MAIN_KEY));
        Ok(())
    }

    fn read_icv(&mut self) -> Result<IcvInfo, HimdError> {
        let session_key = self.session_key()?;
        let mut header = [0u8; 8];
        header[0] = 0x01;
        header[4..8].copy_from_slice(&self.generation.to_be_bytes());

        let mut header_icv = [0u8; 24];
        header_icv[..8].copy_from_slice(&header);
        header_icv[8..].copy_from_slice(&self.icv);
        let mac = crypto::create_icv_mac(&header_icv, &session_key);
        Ok(IcvInfo {
            header,
            icv: self.icv,
            mac,
        })
    }

    fn write_icv(&mut self, header: &[u8; 8], icv: &[u8; 16], mac: &[u8; 8]) -> Result<(), HimdError> {
        let session_key = self.session_key()?;
        let mut header_icv = [0u8; 24];
        header_icv[..8].copy_from_slice(header);
        header_icv[8..].copy_from_slice(icv);
        if crypto::create_icv_mac(&header_icv, &session_key) != *mac {
            return Err(HimdError::IcvMacMismatch);
        }
        self.icv = *icv;
        self.generation = u32::from_be_bytes(header[4..8].try_into().unwrap());
        self.written = Some(IcvInfo {
            header: *header,
            icv: *icv,
            mac: *mac,
        });
        Ok(())
    }
}
