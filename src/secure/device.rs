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

    src/secure/device.rs

    The device transport seam. A physically attached recorder speaks five
    vendor SCSI opcodes (0x30..0x34) for the authentication handshake and
    ICV exchange, plus housekeeping commands; the USB mass-storage plumbing
    underneath is a separate crate's concern. The known-device table maps
    USB ids to the recorders this handshake has been exercised against.
*/

use crate::HimdError;

/// Payload of the stage-2 read (opcode 0x31).
#[derive(Clone, Debug)]
pub struct Stage2Info {
    pub disc_id: [u8; 16],
    pub mac: [u8; 8],
    pub device_leaf_id: [u8; 8],
    pub device_nonce:   [u8; 8],
    pub key_type:  u32,
    pub key_level: u32,
    pub ekb_id:    u32,
    pub key: [u8; 16],
}

/// Payload of the ICV read (opcode 0x33).
#[derive(Clone, Debug)]
pub struct IcvInfo {
    pub header: [u8; 8],
    pub icv:    [u8; 16],
    pub mac:    [u8; 8],
}

pub trait SecureDevice {
    /// Opcode 0x30: hand the device our leaf id and nonce.
    fn write_host_leaf_id(&mut self, leaf_id: &[u8; 8], host_nonce: &[u8; 8]) -> Result<(), HimdError>;

    /// Opcode 0x31: read the disc id, device identity and challenge MAC.
    fn get_authentication_stage2_info(&mut self) -> Result<Stage2Info, HimdError>;

    /// Opcode 0x32: prove ourselves with the host MAC and the agreed EKB.
    fn write_authentication_stage3_info(&mut self, host_mac: &[u8; 8], ekb_id: u32) -> Result<(), HimdError>;

    /// Opcode 0x33: read the current ICV, its header and MAC.
    fn read_icv(&mut self) -> Result<IcvInfo, HimdError>;

    /// Opcode 0x34: push a recomputed ICV, signed with the session key.
    fn write_icv(&mut self, header: &[u8; 8], icv: &[u8; 16], mac: &[u8; 8]) -> Result<(), HimdError>;

    fn reformat_himd(&mut self) -> Result<(), HimdError> {
        Err(HimdError::UnsupportedOperation)
    }

    fn wipe(&mut self) -> Result<(), HimdError> {
        Err(HimdError::UnsupportedOperation)
    }
}

/// One known recorder model.
#[derive(Clone, Copy, Debug)]
pub struct DeviceId {
    pub vendor_id:  u16,
    pub product_id: u16,
    pub name: &'static str,
}

/// Recorders the handshake has been verified against. All first- and
/// second-generation Hi-MD units share the Sony vendor id.
pub const KNOWN_DEVICES: &[DeviceId] = &[
    DeviceId {
        vendor_id:  0x054C,
        product_id: 0x017F,
        name: "Sony MZ-NH1",
    },
    DeviceId {
        vendor_id:  0x054C,
        product_id: 0x0181,
        name: "Sony MZ-NH3D",
    },
    DeviceId {
        vendor_id:  0x054C,
        product_id: 0x0183,
        name: "Sony MZ-NH900",
    },
    DeviceId {
        vendor_id:  0x054C,
        product_id: 0x0185,
        name: "Sony MZ-NH700 / MZ-NH800",
    },
    DeviceId {
        vendor_id:  0x054C,
        product_id: 0x0187,
        name: "Sony MZ-NH600",
    },
    DeviceId {
        vendor_id:  0x054C,
        product_id: 0x01EA,
        name: "Sony MZ-DH10P",
    },
    DeviceId {
        vendor_id:  0x054C,
        product_id: 0x0287,
        name: "Sony MZ-RH1 / MZ-M200",
    },
];

/// Look a recorder up by USB ids.
pub fn find_device(vendor_id: u16, product_id: u16) -> Option<&'static DeviceId> {
    KNOWN_DEVICES
        .iter()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_device() {
        assert_eq!(find_device(0x054C, 0x0287).unwrap().name, "Sony MZ-RH1 / MZ-M200");
        assert!(find_device(0x054C, 0xFFFF).is_none());
    }
}
