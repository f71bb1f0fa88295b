//! Hardware-generation and kernel-revision detection.
//!
//! Both are resolved exactly once, right after the device is opened, and
//! every later encoding decision dispatches on the result instead of
//! re-comparing version numbers at each call site.

use thiserror::Error;

/// Product IDs reported in the top half of the PP core-version word.
const PP_PRODUCT_MALI200: u32 = 0xC807;
const PP_PRODUCT_MALI400: u32 = 0xCD07;

/// Magic byte in the top half of the reported API-version word.
const API_VERSION_MAGIC: u32 = 0x6D; // 'm'

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("API version word {0:#010x} is missing the magic marker")]
    BadMagic(u32),
    #[error("kernel API version {0} predates r2p1 and is not supported")]
    TooOld(u32),
    #[error("PP core version {0:#010x} is not a Mali-200/400 part")]
    UnknownProduct(u32),
}

/// The two fragment-processor generations this stack drives.
///
/// Register layouts, the PLB block cap and a handful of command encodings
/// differ between the two; everything that cares holds one of these from
/// context setup onward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HardwareGeneration {
    Mali200,
    Mali400,
}

impl HardwareGeneration {
    pub fn from_pp_core_version(word: u32) -> Result<Self, VersionError> {
        match word >> 16 {
            PP_PRODUCT_MALI200 => Ok(HardwareGeneration::Mali200),
            PP_PRODUCT_MALI400 => Ok(HardwareGeneration::Mali400),
            _ => Err(VersionError::UnknownProduct(word)),
        }
    }

    /// Upper bound on PLB blocks (`block_w * block_h`) the primitive-list
    /// builder can address on this generation.
    pub fn plb_block_cap(self) -> u32 {
        match self {
            HardwareGeneration::Mali200 => 250,
            HardwareGeneration::Mali400 => 500,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HardwareGeneration::Mali200 => "Mali-200",
            HardwareGeneration::Mali400 => "Mali-400",
        }
    }
}

/// Kernel driver struct revisions.
///
/// The reported API version number moved in steps; numbers in between
/// known releases behave like the nearest older release, since the kernel
/// only grows its structs at the documented points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum KernelApi {
    R2P1,
    R3P0,
    R3P1,
    R3P2,
}

impl KernelApi {
    /// Decode the raw `GET_API_VERSION` result.
    pub fn from_api_version(word: u32) -> Result<Self, VersionError> {
        if word >> 16 != API_VERSION_MAGIC {
            return Err(VersionError::BadMagic(word));
        }
        let version = word & 0xFFFF;
        match version {
            0..=6 => Err(VersionError::TooOld(version)),
            7..=9 => Ok(KernelApi::R2P1),
            10..=13 => Ok(KernelApi::R3P0),
            14..=18 => Ok(KernelApi::R3P1),
            _ => Ok(KernelApi::R3P2),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            KernelApi::R2P1 => "r2p1",
            KernelApi::R3P0 => "r3p0",
            KernelApi::R3P1 => "r3p1",
            KernelApi::R3P2 => "r3p2",
        }
    }
}

/// Everything detected at startup that the encoders dispatch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HardwareInfo {
    pub generation: HardwareGeneration,
    pub kernel_api: KernelApi,
    /// Active fragment-processor cores (1 on Mali-200, 1/2/4 on Mali-400).
    pub pp_core_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_maps_to_revisions() {
        assert_eq!(
            KernelApi::from_api_version(0x6D0007).unwrap(),
            KernelApi::R2P1
        );
        assert_eq!(
            KernelApi::from_api_version(0x6D000A).unwrap(),
            KernelApi::R3P0
        );
        assert_eq!(
            KernelApi::from_api_version(0x6D000E).unwrap(),
            KernelApi::R3P1
        );
        assert_eq!(
            KernelApi::from_api_version(0x6D0013).unwrap(),
            KernelApi::R3P2
        );
        // In-between numbers fall back to the nearest older revision.
        assert_eq!(
            KernelApi::from_api_version(0x6D0008).unwrap(),
            KernelApi::R2P1
        );
    }

    #[test]
    fn ancient_and_unmarked_versions_are_rejected() {
        assert!(matches!(
            KernelApi::from_api_version(0x6D0003),
            Err(VersionError::TooOld(3))
        ));
        assert!(matches!(
            KernelApi::from_api_version(0x0000_000A),
            Err(VersionError::BadMagic(_))
        ));
    }

    #[test]
    fn pp_product_ids_resolve_generations() {
        assert_eq!(
            HardwareGeneration::from_pp_core_version(0xC807_0002).unwrap(),
            HardwareGeneration::Mali200
        );
        assert_eq!(
            HardwareGeneration::from_pp_core_version(0xCD07_0101).unwrap(),
            HardwareGeneration::Mali400
        );
        assert!(HardwareGeneration::from_pp_core_version(0x0BEE_0000).is_err());
    }

    #[test]
    fn block_caps_per_generation() {
        assert_eq!(HardwareGeneration::Mali200.plb_block_cap(), 250);
        assert_eq!(HardwareGeneration::Mali400.plb_block_cap(), 500);
    }
}
