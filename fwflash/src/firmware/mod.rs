//! Firmware segment retrieval.
//!
//! A flash operation needs four segments: the second-stage bootloader, the
//! partition table, the OTA boot selector (`boot_app0`) and the application
//! image. Each is fetched by name from a [`ContentProvider`]; all four are
//! fetched concurrently and the call fails as a whole if any one fails.

pub mod provider;

use {
    crate::error::{Error, Result},
    log::{debug, info},
    serde::{Deserialize, Deserializer, Serialize},
    std::{fmt, sync::Arc, thread},
};

pub use provider::{ContentProvider, DirProvider};

#[cfg(feature = "http")]
pub use provider::HttpProvider;

/// Default flash offset of the application image.
pub const DEFAULT_APP_OFFSET: u32 = 0x10000;

/// Role of a segment within a flash operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentRole {
    /// Second-stage bootloader.
    Bootloader,
    /// Partition table.
    PartitionTable,
    /// OTA data selecting the boot partition.
    BootSelector,
    /// Application image.
    Application,
}

impl SegmentRole {
    /// All roles in flash-plan order.
    pub const ALL: [Self; 4] = [
        Self::Bootloader,
        Self::PartitionTable,
        Self::BootSelector,
        Self::Application,
    ];

    /// Resource name on the content provider (empty = the base resource).
    #[must_use]
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Bootloader => "bootloader",
            Self::PartitionTable => "partitions",
            Self::BootSelector => "boot_app0",
            Self::Application => "",
        }
    }

    /// Flash address for this role given the application offset.
    #[must_use]
    pub fn address(&self, app_offset: u32) -> u32 {
        match self {
            Self::Bootloader => 0x0000,
            Self::PartitionTable => 0x8000,
            Self::BootSelector => 0xE000,
            Self::Application => app_offset,
        }
    }
}

impl fmt::Display for SegmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootloader => write!(f, "bootloader"),
            Self::PartitionTable => write!(f, "partitions"),
            Self::BootSelector => write!(f, "boot_app0"),
            Self::Application => write!(f, "application"),
        }
    }
}

/// One fetched, immutable firmware blob with its target address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareSegment {
    /// Role within the flash plan.
    pub role: SegmentRole,
    /// Display name.
    pub name: String,
    /// Target flash address.
    pub address: u32,
    /// Segment contents.
    pub bytes: Arc<[u8]>,
}

impl FirmwareSegment {
    /// Wrap fetched bytes.
    pub fn new(role: SegmentRole, address: u32, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            role,
            name: role.to_string(),
            address,
            bytes: bytes.into(),
        }
    }

    /// Segment length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the segment holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Metadata published at `<base>/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    /// Application image file name.
    pub filename: String,
    /// Application image size in bytes.
    pub size: u64,
    /// Target chip name.
    pub chip: String,
    /// Application flash offset.
    #[serde(deserialize_with = "deserialize_offset")]
    pub offset: u32,
}

/// Accepts `65536`, `"65536"` or `"0x10000"`.
fn deserialize_offset<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Offset {
        Number(u32),
        Text(String),
    }

    match Offset::deserialize(deserializer)? {
        Offset::Number(n) => Ok(n),
        Offset::Text(s) => parse_offset(&s).map_err(serde::de::Error::custom),
    }
}

/// Parse a flash offset (decimal, or hex with `0x` prefix; underscores allowed).
pub fn parse_offset(s: &str) -> std::result::Result<u32, String> {
    let s: String = s.trim().chars().filter(|c| *c != '_').collect();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("Invalid offset '{s}': {e}"))
}

/// Fetch and parse `<base>/info`.
pub fn fetch_info(provider: &dyn ContentProvider) -> Result<FirmwareInfo> {
    let body = provider.get("info")?;
    serde_json::from_slice(&body).map_err(|e| Error::InvalidInfo(e.to_string()))
}

/// Fetch one segment.
pub fn fetch(role: SegmentRole, provider: &dyn ContentProvider, address: u32) -> Result<FirmwareSegment> {
    debug!("Fetching {role} from {}", provider.describe());
    let bytes = provider.get(role.resource())?;
    if bytes.is_empty() {
        return Err(Error::EmptyResponse(role.to_string()));
    }
    debug!("Fetched {role}: {} bytes", bytes.len());
    Ok(FirmwareSegment::new(role, address, bytes))
}

/// Fetch all four segments concurrently, in plan order.
///
/// Every fetch is joined before returning; the first failure in role order
/// is reported.
pub fn fetch_all(provider: &dyn ContentProvider, app_offset: u32) -> Result<Vec<FirmwareSegment>> {
    info!("Downloading firmware from {}", provider.describe());

    let results: Vec<Result<FirmwareSegment>> = thread::scope(|scope| {
        let handles: Vec<_> = SegmentRole::ALL
            .iter()
            .map(|&role| scope.spawn(move || fetch(role, provider, role.address(app_offset))))
            .collect();

        handles
            .into_iter()
            .zip(SegmentRole::ALL)
            .map(|(handle, role)| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(Error::Network(format!("{role} fetch panicked"))))
            })
            .collect()
    });

    results.into_iter().collect()
}
