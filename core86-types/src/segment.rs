//! Segment selectors, raw descriptors and the per-segment descriptor cache.

/// `{index:13, table-indicator:1, RPL:2}` naming a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentSelector(pub u16);

impl SegmentSelector {
    #[must_use]
    #[inline]
    pub const fn index(self) -> u16 {
        self.0 >> 3
    }

    /// `true` selects the LDT, `false` the GDT.
    #[must_use]
    #[inline]
    pub const fn table_indicator(self) -> bool {
        self.0 & 0b100 != 0
    }

    #[must_use]
    #[inline]
    pub const fn rpl(self) -> u8 {
        (self.0 & 0b011) as u8
    }

    #[must_use]
    #[inline]
    pub const fn is_null(self) -> bool {
        self.index() == 0 && !self.table_indicator()
    }
}

/// Which segment register an effective address or instruction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentReg {
    Es,
    Cs,
    Ss,
    Ds,
}

impl SegmentReg {
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Es => 0,
            Self::Cs => 1,
            Self::Ss => 2,
            Self::Ds => 3,
        }
    }
}

/// The access-rights byte of an 8-byte descriptor (byte 5).
///
/// Bit 7 is present, bits 6-5 are DPL, bit 4 is the S (descriptor type)
/// bit, and bits 3-0 are the type field -- interpreted as
/// executable/conforming/readable/accessed for code/data (S=1) or as a
/// system-descriptor type (S=0, e.g. 0x2 = LDT, 0x1/0x3 = TSS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessByte(pub u8);

impl AccessByte {
    #[must_use]
    #[inline]
    pub const fn present(self) -> bool {
        self.0 & 0x80 != 0
    }

    #[must_use]
    #[inline]
    pub const fn dpl(self) -> u8 {
        (self.0 >> 5) & 0b11
    }

    #[must_use]
    #[inline]
    pub const fn is_code_or_data(self) -> bool {
        self.0 & 0x10 != 0
    }

    #[must_use]
    #[inline]
    pub const fn is_code(self) -> bool {
        self.is_code_or_data() && self.0 & 0x08 != 0
    }

    #[must_use]
    #[inline]
    pub const fn is_data(self) -> bool {
        self.is_code_or_data() && self.0 & 0x08 == 0
    }

    #[must_use]
    #[inline]
    pub const fn is_conforming(self) -> bool {
        self.is_code() && self.0 & 0x04 != 0
    }

    /// For a code segment: readable. For a data segment: writable.
    #[must_use]
    #[inline]
    pub const fn rw(self) -> bool {
        self.0 & 0x02 != 0
    }

    #[must_use]
    #[inline]
    pub const fn accessed(self) -> bool {
        self.0 & 0x01 != 0
    }

    #[must_use]
    #[inline]
    pub const fn system_type(self) -> u8 {
        self.0 & 0x0F
    }

    #[must_use]
    #[inline]
    pub const fn with_accessed(self) -> Self {
        Self(self.0 | 0x01)
    }

    /// Sets the "busy" bit (bit 1) of a TSS-type system descriptor.
    #[must_use]
    #[inline]
    pub const fn with_busy(self) -> Self {
        Self(self.0 | 0x02)
    }
}

pub const SYSTEM_TYPE_LDT: u8 = 0x02;
pub const SYSTEM_TYPE_TSS_AVAILABLE: u8 = 0x01;
pub const SYSTEM_TYPE_TSS_BUSY: u8 = 0x03;

/// An 8-byte segment descriptor as read from a GDT/LDT slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawDescriptor {
    pub limit: u16,
    pub base: u32,
    pub access: AccessByte,
}

impl RawDescriptor {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        let limit = u16::from_le_bytes([bytes[0], bytes[1]]);
        let base_low = u16::from_le_bytes([bytes[2], bytes[3]]);
        let base_mid = bytes[4];
        let access = bytes[5];
        let base = u32::from(base_low) | (u32::from(base_mid) << 16);
        Self {
            limit,
            base,
            access: AccessByte(access),
        }
    }

    #[must_use]
    pub fn to_bytes(self) -> [u8; 8] {
        let [l0, l1] = self.limit.to_le_bytes();
        let base_low = (self.base & 0xFFFF) as u16;
        let [b0, b1] = base_low.to_le_bytes();
        let base_mid = ((self.base >> 16) & 0xFF) as u8;
        [l0, l1, b0, b1, base_mid, self.access.0, 0, 0]
    }
}

/// The translation cache backing a loaded segment register: once a
/// descriptor is loaded, every subsequent effective-address computation
/// for that register goes through this cache rather than re-walking the
/// GDT/LDT. A cache entry is valid only if the underlying selector was
/// loaded through the descriptor-loading protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DescriptorCache {
    pub base: u32,
    pub limit: u16,
    pub access: AccessByte,
    pub valid: bool,
}

impl DescriptorCache {
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            base: 0,
            limit: 0,
            access: AccessByte(0),
            valid: false,
        }
    }

    #[must_use]
    pub const fn from_descriptor(desc: RawDescriptor) -> Self {
        Self {
            base: desc.base,
            limit: desc.limit,
            access: desc.access,
            valid: true,
        }
    }

    /// Real-mode-style cache populated directly from a segment value
    /// shifted left by four, used by reset and by `LMSW`-driven
    /// real-to-protected transitions.
    #[must_use]
    pub const fn real_mode(selector: u16) -> Self {
        Self {
            base: (selector as u32) << 4,
            limit: 0xFFFF,
            access: AccessByte(0x93),
            valid: true,
        }
    }

    #[must_use]
    #[inline]
    pub const fn contains_offset(&self, offset: u16) -> bool {
        offset <= self.limit
    }
}

/// The cache backing the task register (TR) additionally snapshots the
/// ring-0 stack pointer and stack selector out of the TSS, used for the
/// inner-privilege stack switch on a privilege-raising interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskCache {
    pub cache: DescriptorCache,
    pub sp0: u16,
    pub ss0: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_decomposes_fields() {
        let sel = SegmentSelector(0x002B);
        assert_eq!(sel.index(), 5);
        assert_eq!(sel.rpl(), 3);
        assert!(!sel.table_indicator());
        assert!(!sel.is_null());
        assert!(SegmentSelector(0).is_null());
    }

    #[test]
    fn raw_descriptor_round_trips() {
        let desc = RawDescriptor {
            limit: 0xFFFF,
            base: 0x00F0_0000,
            access: AccessByte(0x93),
        };
        let bytes = desc.to_bytes();
        assert_eq!(RawDescriptor::from_bytes(bytes), desc);
    }

    #[test]
    fn access_byte_field_extraction() {
        // Present, DPL=0, code segment, readable.
        let code = AccessByte(0x9A);
        assert!(code.present());
        assert_eq!(code.dpl(), 0);
        assert!(code.is_code());
        assert!(code.rw());

        // Present, DPL=0, data segment, writable.
        let data = AccessByte(0x92);
        assert!(data.is_data());
        assert!(data.rw());
    }

    #[test]
    fn cache_reports_limit_containment() {
        let cache = DescriptorCache::from_descriptor(RawDescriptor {
            limit: 0x0FFF,
            base: 0x1000,
            access: AccessByte(0x92),
        });
        assert!(cache.contains_offset(0x0FFF));
        assert!(!cache.contains_offset(0x1000));
    }
}
