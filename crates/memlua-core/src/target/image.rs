//! In-memory process image: regions, protections and modules

use memlua_sdk::{BridgeError, BridgeResult};

/// Page protection of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Protection {
    /// Writable
    pub writable: bool,
    /// Executable
    pub executable: bool,
    /// Copy-on-write
    pub copy_on_write: bool,
}

impl Protection {
    /// Read-only data
    pub const READ_ONLY: Protection = Protection {
        writable: false,
        executable: false,
        copy_on_write: false,
    };
    /// Read-write data
    pub const READ_WRITE: Protection = Protection {
        writable: true,
        executable: false,
        copy_on_write: false,
    };
    /// Code
    pub const READ_EXECUTE: Protection = Protection {
        writable: false,
        executable: true,
        copy_on_write: false,
    };

    /// Parse a letter set such as `rw`, `rx` or `rwc` (`r` is implied)
    pub fn parse(letters: &str) -> BridgeResult<Self> {
        let mut protection = Protection::READ_ONLY;
        for c in letters.chars() {
            match c.to_ascii_lowercase() {
                'r' => {}
                'w' => protection.writable = true,
                'x' => protection.executable = true,
                'c' => protection.copy_on_write = true,
                _ => {
                    return Err(BridgeError::InvalidArgument(format!(
                        "invalid protection letters: {:?}",
                        letters
                    )))
                }
            }
        }
        Ok(protection)
    }
}

/// Region filter built from flags such as `+W*X-C`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtectionFilter {
    writable: Option<bool>,
    executable: Option<bool>,
    copy_on_write: Option<bool>,
}

impl ProtectionFilter {
    /// Accept every region
    pub fn any() -> Self {
        Self::default()
    }

    /// Parse flags; an empty string accepts every region
    pub fn parse(flags: &str) -> BridgeResult<Self> {
        crate::scan::validate_protection(flags)?;
        let mut filter = Self::any();
        let chars: Vec<char> = flags.chars().collect();
        for pair in chars.chunks(2) {
            let wanted = match pair[0] {
                '+' => Some(true),
                '-' => Some(false),
                _ => None,
            };
            match pair[1].to_ascii_uppercase() {
                'W' => filter.writable = wanted,
                'X' => filter.executable = wanted,
                _ => filter.copy_on_write = wanted,
            }
        }
        Ok(filter)
    }

    /// True if `protection` passes the filter
    pub fn matches(&self, protection: Protection) -> bool {
        fn check(wanted: Option<bool>, actual: bool) -> bool {
            wanted.map_or(true, |w| w == actual)
        }
        check(self.writable, protection.writable)
            && check(self.executable, protection.executable)
            && check(self.copy_on_write, protection.copy_on_write)
    }
}

/// Contiguous mapped range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// First address
    pub base: u64,
    /// Contents
    pub bytes: Vec<u8>,
    /// Protection
    pub protection: Protection,
    /// Owning module
    pub module: Option<String>,
}

impl Region {
    /// Read-write region at `base`
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self {
            base,
            bytes,
            protection: Protection::READ_WRITE,
            module: None,
        }
    }

    /// Set the protection
    pub fn with_protection(mut self, protection: Protection) -> Self {
        self.protection = protection;
        self
    }

    /// Attribute the region to a module
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// One past the last address
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.bytes.len() as u64)
    }

    fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }

    fn belongs_to(&self, module: &str) -> bool {
        self.module
            .as_deref()
            .map_or(false, |m| m.eq_ignore_ascii_case(module))
    }
}

/// Set of non-overlapping regions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    regions: Vec<Region>,
}

impl Image {
    /// Empty image
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a region; overlapping an existing one is rejected
    pub fn map(&mut self, region: Region) -> BridgeResult<()> {
        if region.bytes.is_empty() {
            return Err(BridgeError::InvalidArgument("region is empty".to_string()));
        }
        if let Some(other) = self
            .regions
            .iter()
            .find(|r| region.base < r.end() && r.base < region.end())
        {
            return Err(BridgeError::InvalidArgument(format!(
                "region {:#x}..{:#x} overlaps {:#x}..{:#x}",
                region.base,
                region.end(),
                other.base,
                other.end()
            )));
        }
        self.regions.push(region);
        self.regions.sort_by_key(|r| r.base);
        Ok(())
    }

    /// Regions in address order
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Regions selected by `filter` and optionally a module
    pub fn select<'a>(
        &'a self,
        filter: &'a ProtectionFilter,
        module: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Region> + 'a {
        self.regions.iter().filter(move |r| {
            filter.matches(r.protection) && module.map_or(true, |m| r.belongs_to(m))
        })
    }

    /// Exactly `len` bytes at `address`, if mapped in one region
    pub fn read(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let region = self.regions.iter().find(|r| r.contains(address))?;
        let offset = (address - region.base) as usize;
        region.bytes.get(offset..offset.checked_add(len)?).map(<[u8]>::to_vec)
    }

    /// Up to `max` bytes at `address`, stopping at the region end
    pub fn read_upto(&self, address: u64, max: usize) -> Option<Vec<u8>> {
        let region = self.regions.iter().find(|r| r.contains(address))?;
        let offset = (address - region.base) as usize;
        let end = offset.saturating_add(max).min(region.bytes.len());
        Some(region.bytes[offset..end].to_vec())
    }

    /// Overwrite `bytes` at `address`; false unless fully inside one region
    pub fn write(&mut self, address: u64, bytes: &[u8]) -> bool {
        let Some(region) = self.regions.iter_mut().find(|r| r.contains(address)) else {
            return false;
        };
        let offset = (address - region.base) as usize;
        match region.bytes.get_mut(offset..offset.saturating_add(bytes.len())) {
            Some(slot) if slot.len() == bytes.len() => {
                slot.copy_from_slice(bytes);
                true
            }
            _ => false,
        }
    }
}

/// Candidate start addresses: `address % modulus == remainder`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Stride {
    modulus: u64,
    remainder: u64,
}

impl Stride {
    /// Every address
    pub const EVERY: Stride = Stride {
        modulus: 1,
        remainder: 0,
    };

    /// Build from a wire alignment type code and its parameter
    pub fn from_wire(code: i64, param: &str) -> BridgeResult<Self> {
        let param = param.trim();
        let invalid = || {
            BridgeError::InvalidArgument(format!("invalid alignment parameter {:?}", param))
        };
        match code {
            0 => Ok(Self::EVERY),
            1 => match u64::from_str_radix(param, 16) {
                Ok(modulus) if modulus > 0 => Ok(Self {
                    modulus,
                    remainder: 0,
                }),
                _ => Err(invalid()),
            },
            2 if !param.is_empty() && param.len() < 16 => {
                let remainder = u64::from_str_radix(param, 16).map_err(|_| invalid())?;
                Ok(Self {
                    modulus: 16u64.pow(param.len() as u32),
                    remainder,
                })
            }
            2 => Err(invalid()),
            other => Err(BridgeError::InvalidArgument(format!(
                "unknown alignment type {}",
                other
            ))),
        }
    }

    fn first_from(&self, address: u64) -> Option<u64> {
        let offset = address % self.modulus;
        if offset <= self.remainder {
            address.checked_add(self.remainder - offset)
        } else {
            (address - offset)
                .checked_add(self.modulus)?
                .checked_add(self.remainder)
        }
    }
}

/// Addresses in `region` within `start..=end` on `stride` where a cell of
/// `width` bytes fits and `hit` accepts the bytes from there on
pub(crate) fn sweep(
    region: &Region,
    start: u64,
    end: u64,
    stride: Stride,
    width: usize,
    mut hit: impl FnMut(&[u8]) -> bool,
) -> Vec<u64> {
    let mut found = Vec::new();
    let Some(last) = region.end().checked_sub(width.max(1) as u64) else {
        return found;
    };
    let last = last.min(end);
    let mut cursor = stride.first_from(region.base.max(start));
    while let Some(address) = cursor {
        if address > last || address < region.base {
            break;
        }
        let offset = (address - region.base) as usize;
        if hit(&region.bytes[offset..]) {
            found.push(address);
        }
        cursor = address.checked_add(stride.modulus);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_what_validation_accepts() {
        for flags in ["", "+W", "*X-C", "+w-x*c", "W", "+", "+Q", "+W-", "++"] {
            assert_eq!(
                ProtectionFilter::parse(flags).is_ok(),
                crate::scan::validate_protection(flags).is_ok(),
                "{:?}",
                flags
            );
        }
        let unfiltered = ProtectionFilter::parse("").unwrap();
        assert!(unfiltered.matches(Protection::READ_ONLY));
        assert!(unfiltered.matches(Protection::parse("rwxc").unwrap()));
    }

    #[test]
    fn test_filter_semantics() {
        let filter = ProtectionFilter::parse("+W*X-C").unwrap();
        assert!(filter.matches(Protection::READ_WRITE));
        assert!(!filter.matches(Protection::READ_ONLY));
        assert!(!filter.matches(Protection::parse("rwc").unwrap()));
        assert!(filter.matches(Protection::parse("rwx").unwrap()));

        let code = ProtectionFilter::parse("+X").unwrap();
        assert!(code.matches(Protection::READ_EXECUTE));
        assert!(!code.matches(Protection::READ_WRITE));
        assert!(ProtectionFilter::parse("").unwrap().matches(Protection::READ_ONLY));
        assert!(ProtectionFilter::parse("+Z").is_err());
    }

    #[test]
    fn test_read_write_within_region() {
        let mut image = Image::new();
        image.map(Region::new(0x1000, vec![0; 16])).unwrap();
        assert!(image.write(0x1004, &[1, 2, 3, 4]));
        assert_eq!(image.read(0x1004, 4), Some(vec![1, 2, 3, 4]));
        assert_eq!(image.read(0x100E, 4), None);
        assert_eq!(image.read_upto(0x100E, 4), Some(vec![0, 0]));
        assert!(!image.write(0x100E, &[1, 2, 3]));
        assert!(!image.write(0x2000, &[1]));
    }

    #[test]
    fn test_overlap_rejected() {
        let mut image = Image::new();
        image.map(Region::new(0x1000, vec![0; 0x100])).unwrap();
        assert!(image.map(Region::new(0x10F0, vec![0; 0x20])).is_err());
        assert!(image.map(Region::new(0x1100, vec![0; 0x20])).is_ok());
        assert_eq!(image.regions()[1].base, 0x1100);
    }

    #[test]
    fn test_module_selection() {
        let mut image = Image::new();
        image
            .map(Region::new(0x1000, vec![0; 8]).with_module("Game.exe"))
            .unwrap();
        image.map(Region::new(0x2000, vec![0; 8])).unwrap();
        let any = ProtectionFilter::any();
        assert_eq!(image.select(&any, Some("game.exe")).count(), 1);
        assert_eq!(image.select(&any, None).count(), 2);
    }

    #[test]
    fn test_stride_and_sweep() {
        let region = Region::new(0x1000, vec![0xAA; 0x40]);
        let all = sweep(&region, 0, u64::MAX, Stride::EVERY, 4, |_| true);
        assert_eq!(all.len(), 0x3D);

        let aligned = Stride::from_wire(1, "10").unwrap();
        let hits = sweep(&region, 0, u64::MAX, aligned, 4, |_| true);
        assert_eq!(hits, vec![0x1000, 0x1010, 0x1020, 0x1030]);

        let digits = Stride::from_wire(2, "8").unwrap();
        let hits = sweep(&region, 0x1010, 0x1030, digits, 1, |_| true);
        assert_eq!(hits, vec![0x1018, 0x1028]);

        assert!(Stride::from_wire(1, "0").is_err());
        assert!(Stride::from_wire(2, "").is_err());
        assert!(Stride::from_wire(7, "").is_err());
    }
}
