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

    src/date_time.rs

    DOS (FAT) date/time codec. Track slots store recording and licence times
    as a big-endian pair of FAT-packed words: date in the high word, time in
    the low word, two-second resolution, 1980 epoch. An all-zero word pair is
    preserved as-is so that free slots stay free.
*/

use std::fmt::{Display, Formatter, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DosDateTime {
    pub year:   u16,
    pub month:  u8,
    pub day:    u8,
    pub hour:   u8,
    pub minute: u8,
    pub second: u8,
}

impl Default for DosDateTime {
    fn default() -> Self {
        Self {
            year:   1980,
            month:  1,
            day:    1,
            hour:   0,
            minute: 0,
            second: 0,
        }
    }
}

impl Display for DosDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(
            f,
            "{:04}/{:02}/{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

impl DosDateTime {
    /// Pack into the on-disc `(date, time)` word pair.
    pub fn pack(&self) -> (u16, u16) {
        let date = (self.year.saturating_sub(1980) << 9) | ((self.month as u16) << 5) | self.day as u16;
        let time = ((self.hour as u16) << 11) | ((self.minute as u16) << 5) | (self.second as u16 >> 1);
        (date, time)
    }

    /// Unpack from the on-disc word pair. Zero words decode to the zero
    /// month/day form and re-pack to zero, so raw images round-trip.
    pub fn unpack(date: u16, time: u16) -> Self {
        Self {
            year:   1980u16.wrapping_add(date >> 9),
            month:  ((date >> 5) & 0x0F) as u8,
            day:    (date & 0x1F) as u8,
            hour:   (time >> 11) as u8,
            minute: ((time >> 5) & 0x3F) as u8,
            second: ((time & 0x1F) << 1) as u8,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.pack() == (0, 0)
    }
}
