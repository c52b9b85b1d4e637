//! Array Configuration
//!
//! Immutable geometry of an assembled array plus the YAML volume description
//! the `stripecache` binary loads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SECTOR_SIZE_U64;
use crate::error::{Error, Result};

// =============================================================================
// RAID Level
// =============================================================================

/// RAID level of the array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RaidLevel {
    /// Concatenation
    Linear,
    /// Striping, no redundancy
    Raid0,
    /// Mirroring
    Raid1,
    /// Dedicated parity disk
    Raid4,
    /// Rotating single parity
    Raid5,
    /// Rotating dual parity (P + Q)
    Raid6,
    /// Striped mirrors
    Raid10,
}

impl RaidLevel {
    /// Minimum member count for the level.
    pub fn min_disks(&self) -> usize {
        match self {
            RaidLevel::Raid4 | RaidLevel::Raid5 | RaidLevel::Raid10 => 2,
            RaidLevel::Raid6 => 3,
            RaidLevel::Linear | RaidLevel::Raid0 | RaidLevel::Raid1 => 1,
        }
    }

    /// Number of members per stripe holding redundancy rather than data.
    pub fn parity_disks(&self) -> usize {
        match self {
            RaidLevel::Raid4 | RaidLevel::Raid5 => 1,
            RaidLevel::Raid6 => 2,
            _ => 0,
        }
    }

    /// Whether the level stripes data in chunks.
    pub fn is_striped(&self) -> bool {
        matches!(
            self,
            RaidLevel::Raid0
                | RaidLevel::Raid4
                | RaidLevel::Raid5
                | RaidLevel::Raid6
                | RaidLevel::Raid10
        )
    }

    /// Whether sub-stripe writes go through the partial-chunk cache.
    pub fn has_parity(&self) -> bool {
        self.parity_disks() > 0
    }
}

impl std::fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RaidLevel::Linear => write!(f, "linear"),
            RaidLevel::Raid0 => write!(f, "raid0"),
            RaidLevel::Raid1 => write!(f, "raid1"),
            RaidLevel::Raid4 => write!(f, "raid4"),
            RaidLevel::Raid5 => write!(f, "raid5"),
            RaidLevel::Raid6 => write!(f, "raid6"),
            RaidLevel::Raid10 => write!(f, "raid10"),
        }
    }
}

// =============================================================================
// Layout
// =============================================================================

/// Parity placement variant, meaningful for RAID-5 and RAID-6 only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    LeftAsymmetric,
    RightAsymmetric,
    #[default]
    LeftSymmetric,
    RightSymmetric,
}

impl Layout {
    /// All four variants, in md numbering order.
    pub const ALL: [Layout; 4] = [
        Layout::LeftAsymmetric,
        Layout::RightAsymmetric,
        Layout::LeftSymmetric,
        Layout::RightSymmetric,
    ];

    /// Parity rotates upwards with the stripe index.
    pub fn is_right(&self) -> bool {
        matches!(self, Layout::RightAsymmetric | Layout::RightSymmetric)
    }

    /// Data members keep their physical order instead of following parity.
    pub fn is_asymmetric(&self) -> bool {
        matches!(self, Layout::LeftAsymmetric | Layout::RightAsymmetric)
    }
}

// =============================================================================
// Array Configuration
// =============================================================================

fn default_sector_size() -> u32 {
    512
}

/// Geometry of an assembled array. Immutable once the array is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayConfig {
    /// Array identity, generated on first use when absent
    #[serde(default)]
    pub uuid: Option<Uuid>,

    /// RAID level
    pub level: RaidLevel,

    /// Number of member disks
    pub raid_disks: usize,

    /// Chunk size in 512-byte sectors
    pub chunk_sectors: u32,

    /// Parity layout
    #[serde(default)]
    pub layout: Layout,

    /// Logical sector size exposed by the array
    #[serde(default = "default_sector_size")]
    pub sector_size: u32,

    /// Total addressable size of the array in bytes
    pub array_size: u64,
}

impl ArrayConfig {
    /// Create a config with the default layout and 512-byte sectors.
    pub fn new(level: RaidLevel, raid_disks: usize, chunk_sectors: u32, array_size: u64) -> Self {
        Self {
            uuid: None,
            level,
            raid_disks,
            chunk_sectors,
            layout: Layout::default(),
            sector_size: default_sector_size(),
            array_size,
        }
    }

    /// Builder-style layout override.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Number of data members per stripe.
    pub fn data_disk_count(&self) -> usize {
        self.raid_disks - self.level.parity_disks()
    }

    /// Chunk size in bytes (one data-disk row).
    pub fn chunk_bytes(&self) -> u64 {
        self.chunk_sectors as u64 * SECTOR_SIZE_U64
    }

    /// Size of one chunk group: a chunk on every data disk.
    pub fn full_chunk_bytes(&self) -> u64 {
        self.chunk_bytes() * self.data_disk_count() as u64
    }

    /// Whether the level carries parity.
    pub fn has_parity(&self) -> bool {
        self.level.has_parity()
    }

    /// Returns the array UUID, generating one if the config has none.
    pub fn ensure_uuid(&mut self) -> Uuid {
        *self.uuid.get_or_insert_with(Uuid::new_v4)
    }

    /// Reject configurations the geometry resolver cannot serve.
    pub fn validate(&self) -> Result<()> {
        if self.raid_disks < self.level.min_disks() {
            return Err(Error::InvalidGeometry(format!(
                "{} needs at least {} disks, got {}",
                self.level,
                self.level.min_disks(),
                self.raid_disks
            )));
        }
        if self.sector_size < 512 || !self.sector_size.is_power_of_two() {
            return Err(Error::InvalidGeometry(format!(
                "sector size {} must be a power of two >= 512",
                self.sector_size
            )));
        }
        if self.level.is_striped() {
            if self.chunk_sectors == 0 {
                return Err(Error::InvalidGeometry("chunk size must be > 0".into()));
            }
            if self.chunk_bytes() % self.sector_size as u64 != 0 {
                return Err(Error::InvalidGeometry(format!(
                    "chunk of {} bytes is not a multiple of the {}-byte sector",
                    self.chunk_bytes(),
                    self.sector_size
                )));
            }
        }
        if self.array_size % self.sector_size as u64 != 0 {
            return Err(Error::InvalidGeometry(format!(
                "array size {} is not a multiple of the {}-byte sector",
                self.array_size, self.sector_size
            )));
        }
        if self.has_parity() && usize::try_from(self.full_chunk_bytes()).is_err() {
            return Err(Error::InvalidGeometry(
                "chunk group does not fit in memory".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Volume Config File
// =============================================================================

/// One member image in the volume description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSpec {
    /// Path to the member's backing image
    pub path: PathBuf,

    /// Start of the data area on the member, in 512-byte sectors
    #[serde(default)]
    pub data_offset_sectors: u64,
}

fn default_flush_interval() -> String {
    "5s".to_string()
}

/// Flush scheduler section of the volume description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushSection {
    /// Interval between drains, e.g. `"5s"` or `"1m30s"`
    #[serde(default = "default_flush_interval")]
    pub interval: String,
}

impl Default for FlushSection {
    fn default() -> Self {
        Self {
            interval: default_flush_interval(),
        }
    }
}

/// YAML volume description loaded by the binary.
///
/// ```yaml
/// array:
///   level: raid5
///   raid_disks: 4
///   chunk_sectors: 128
///   layout: right-symmetric
///   array_size: 201326592
/// members:
///   - path: /var/lib/stripecache/disk0.img
///     data_offset_sectors: 2048
/// flush:
///   interval: 5s
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfigFile {
    pub array: ArrayConfig,

    #[serde(default)]
    pub members: Vec<MemberSpec>,

    #[serde(default)]
    pub flush: FlushSection,
}

impl VolumeConfigFile {
    /// Parse a volume description from YAML text.
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let file: Self = serde_yaml::from_str(s)?;
        file.validate()?;
        Ok(file)
    }

    /// Load a volume description from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Check the array geometry and that the member list matches it.
    pub fn validate(&self) -> Result<()> {
        self.array.validate()?;
        if !self.members.is_empty() && self.members.len() != self.array.raid_disks {
            return Err(Error::Config(format!(
                "{} members listed for a {}-disk array",
                self.members.len(),
                self.array.raid_disks
            )));
        }
        parse_duration(&self.flush.interval)?;
        Ok(())
    }
}

// =============================================================================
// Duration Parsing
// =============================================================================

/// Parse a duration string like "5s", "1m30s" or "2h".
///
/// A trailing bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        num_buf.clear();

        let multiplier = match c {
            'h' | 'H' => 3600,
            'm' | 'M' => 60,
            's' | 'S' => 1,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit: {}",
                    c
                )))
            }
        };

        total_secs += num * multiplier;
    }

    if !num_buf.is_empty() {
        let num: u64 = num_buf
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", s)))?;
        total_secs += num;
    }

    if total_secs == 0 {
        return Err(Error::DurationParse(format!("duration must be > 0: {}", s)));
    }

    Ok(Duration::from_secs(total_secs))
}

// =============================================================================
// Tests
// =============================================================================
