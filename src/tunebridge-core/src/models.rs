use crate::codec::Record;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::sequence::Close;
use std::fmt;
use std::time::Duration;

/// Number of hex digits in a full persistent identifier.
pub const PERSISTENT_ID_DIGITS: usize = 16;

/// The host's persistent identifier for a track or playlist.
///
/// Values read back from the host are kept verbatim. Values supplied by callers
/// go through [`PersistentId::parse`], which requires 1 to 16 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PersistentId(String);

impl PersistentId {
    /// Validate a caller-supplied identifier.
    pub fn parse(value: &str) -> BridgeResult<Self> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.len() > PERSISTENT_ID_DIGITS {
            return Err(BridgeError::invalid_argument(format!(
                "persistent id {value:?} must be 1 to {PERSISTENT_ID_DIGITS} hex digits"
            )));
        }
        if !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(BridgeError::invalid_argument(format!(
                "persistent id {value:?} is not hexadecimal"
            )));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// Wrap an identifier exactly as the host reported it.
    pub fn from_host(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Build the identifier from the object model's 32-bit halves.
    pub fn from_halves(high: u32, low: u32) -> Self {
        Self(format!("{:016X}", (u64::from(high) << 32) | u64::from(low)))
    }

    /// Split into high/low 32-bit halves. Fails for identifiers that are not
    /// hexadecimal.
    pub fn halves(&self) -> BridgeResult<(u32, u32)> {
        let value = u64::from_str_radix(&self.0, 16).map_err(|_| {
            BridgeError::invalid_argument(format!("persistent id {:?} is not hexadecimal", self.0))
        })?;
        Ok(((value >> 32) as u32, value as u32))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersistentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PersistentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Image encoding of a track artwork.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtworkFormat {
    #[default]
    Unknown,
    Jpeg,
    Png,
    Bmp,
}

impl ArtworkFormat {
    /// Parse the host's description ("JPEG picture", "PNG", ...) by its first
    /// word.
    pub fn from_description(description: &str) -> Self {
        let word = description.split_whitespace().next().unwrap_or("");
        match word.to_ascii_uppercase().as_str() {
            "JPEG" | "JPG" => Self::Jpeg,
            "PNG" => Self::Png,
            "BMP" => Self::Bmp,
            _ => Self::Unknown,
        }
    }

    /// Object-model format code.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Jpeg,
            2 => Self::Png,
            3 => Self::Bmp,
            _ => Self::Unknown,
        }
    }

    /// File extension including the dot, empty when unknown.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
            Self::Bmp => ".bmp",
        }
    }
}

impl fmt::Display for ArtworkFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::Bmp => "BMP",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerState {
    #[default]
    Stopped,
    Playing,
    FastForward,
    Rewind,
}

impl PlayerState {
    pub fn from_code(code: i64) -> BridgeResult<Self> {
        match code {
            0 => Ok(Self::Stopped),
            1 => Ok(Self::Playing),
            2 => Ok(Self::FastForward),
            3 => Ok(Self::Rewind),
            other => Err(BridgeError::decode(format!("unknown player state code {other}"))),
        }
    }

    /// Script hosts report states as words; "paused" counts as stopped.
    pub fn from_name(name: &str) -> BridgeResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "playing" => Ok(Self::Playing),
            "paused" | "stopped" => Ok(Self::Stopped),
            "fast forwarding" => Ok(Self::FastForward),
            "rewinding" => Ok(Self::Rewind),
            other => Err(BridgeError::decode(format!("unknown player state {other:?}"))),
        }
    }
}

/// Sound volume in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Volume(u8);

impl Volume {
    pub const MAX: u8 = 100;

    pub fn new(percent: u8) -> BridgeResult<Self> {
        if percent > Self::MAX {
            return Err(BridgeError::invalid_argument(format!(
                "volume {percent} is outside 0..={}",
                Self::MAX
            )));
        }
        Ok(Self(percent))
    }

    pub fn percent(&self) -> u8 {
        self.0
    }
}

/// Parse a whole-second or fractional position reported by the host.
pub fn position_from_seconds(seconds: f64) -> BridgeResult<Duration> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(BridgeError::decode(format!("invalid player position {seconds}")));
    }
    Ok(Duration::from_secs_f64(seconds))
}

/// Snapshot of a track's attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub persistent_id: PersistentId,
    pub name: String,
    pub artist: String,
    pub album: String,
}

impl TrackInfo {
    /// Fields: persistent id, album, artist, name. `None` when the record is
    /// absent; missing trailing fields become empty strings.
    pub fn from_record(record: &Record) -> Option<Self> {
        if record.is_empty() {
            return None;
        }
        Some(Self {
            persistent_id: PersistentId::from_host(record.field(0)),
            album: record.field(1).to_string(),
            artist: record.field(2).to_string(),
            name: record.field(3).to_string(),
        })
    }
}

/// Snapshot of a playlist's attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistInfo {
    pub persistent_id: PersistentId,
    pub name: String,
}

impl PlaylistInfo {
    /// Fields: persistent id, name.
    pub fn from_record(record: &Record) -> Option<Self> {
        if record.is_empty() {
            return None;
        }
        Some(Self {
            persistent_id: PersistentId::from_host(record.field(0)),
            name: record.field(1).to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtworkInfo {
    pub track_id: PersistentId,
    /// 1-based position among the track's artworks.
    pub index: usize,
    pub format: ArtworkFormat,
}

#[derive(Debug)]
pub struct Track {
    info: TrackInfo,
    handle: Handle,
}

impl Track {
    pub fn new(info: TrackInfo, handle: Handle) -> Self {
        Self { info, handle }
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn persistent_id(&self) -> &PersistentId {
        &self.info.persistent_id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn artist(&self) -> &str {
        &self.info.artist
    }

    pub fn album(&self) -> &str {
        &self.info.album
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

#[derive(Debug)]
pub struct Playlist {
    info: PlaylistInfo,
    handle: Handle,
}

impl Playlist {
    pub fn new(info: PlaylistInfo, handle: Handle) -> Self {
        Self { info, handle }
    }

    pub fn info(&self) -> &PlaylistInfo {
        &self.info
    }

    pub fn persistent_id(&self) -> &PersistentId {
        &self.info.persistent_id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

/// One artwork of a track. Its handle is a child of the track's handle, so the
/// track cannot finish closing while an artwork is still open.
#[derive(Debug)]
pub struct Artwork {
    info: ArtworkInfo,
    handle: Handle,
}

impl Artwork {
    pub fn new(info: ArtworkInfo, handle: Handle) -> Self {
        Self { info, handle }
    }

    pub fn info(&self) -> &ArtworkInfo {
        &self.info
    }

    pub fn track_id(&self) -> &PersistentId {
        &self.info.track_id
    }

    pub fn index(&self) -> usize {
        self.info.index
    }

    pub fn format(&self) -> ArtworkFormat {
        self.info.format
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn close(&self) {
        self.handle.close();
    }
}

impl Close for Track {
    fn close(&self) {
        Track::close(self);
    }
}

impl Close for Playlist {
    fn close(&self) {
        Playlist::close(self);
    }
}

impl Close for Artwork {
    fn close(&self) {
        Artwork::close(self);
    }
}

impl Close for Record {
    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode;

    #[test]
    fn parse_accepts_short_and_full_ids() {
        assert_eq!(PersistentId::parse("1a").unwrap().as_str(), "1A");
        let full = PersistentId::parse("8a3f00112233aabb").unwrap();
        assert_eq!(full.halves().unwrap(), (0x8A3F_0011, 0x2233_AABB));
    }

    #[test]
    fn parse_rejects_bad_ids() {
        for bad in ["", "   ", "8A3F00112233AABBCC", "not-hex", "12 34"] {
            assert!(
                matches!(PersistentId::parse(bad), Err(BridgeError::InvalidArgument { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn halves_round_trip_through_display() {
        let id = PersistentId::from_halves(0x0000_00AB, 0x0000_0001);
        assert_eq!(id.as_str(), "000000AB00000001");
        assert_eq!(id.halves().unwrap(), (0xAB, 1));
    }

    #[test]
    fn host_ids_are_opaque() {
        let id = PersistentId::from_host("id1");
        assert_eq!(id.to_string(), "id1");
        assert!(id.halves().is_err());
    }

    #[test]
    fn sparse_record_builds_track_with_blank_fields() {
        let record = decode("!id2,,ArtistB").unwrap();
        let info = TrackInfo::from_record(&record).unwrap();
        assert_eq!(info.persistent_id.as_str(), "id2");
        assert_eq!(info.album, "");
        assert_eq!(info.artist, "ArtistB");
        assert_eq!(info.name, "");
    }

    #[test]
    fn absent_record_builds_nothing() {
        assert!(TrackInfo::from_record(&Record::empty()).is_none());
        assert!(PlaylistInfo::from_record(&Record::empty()).is_none());
    }

    #[test]
    fn artwork_format_from_host_values() {
        assert_eq!(ArtworkFormat::from_description("JPEG picture"), ArtworkFormat::Jpeg);
        assert_eq!(ArtworkFormat::from_description("png"), ArtworkFormat::Png);
        assert_eq!(ArtworkFormat::from_description("TIFF picture"), ArtworkFormat::Unknown);
        assert_eq!(ArtworkFormat::from_code(3), ArtworkFormat::Bmp);
        assert_eq!(ArtworkFormat::Png.extension(), ".png");
        assert_eq!(ArtworkFormat::Unknown.extension(), "");
    }

    #[test]
    fn volume_is_bounded() {
        assert_eq!(Volume::new(100).unwrap().percent(), 100);
        assert!(matches!(Volume::new(150), Err(BridgeError::InvalidArgument { .. })));
    }

    #[test]
    fn player_state_names_and_codes() {
        assert_eq!(PlayerState::from_name("paused").unwrap(), PlayerState::Stopped);
        assert_eq!(PlayerState::from_name("fast forwarding").unwrap(), PlayerState::FastForward);
        assert_eq!(PlayerState::from_code(3).unwrap(), PlayerState::Rewind);
        assert!(PlayerState::from_code(9).is_err());
    }

    #[test]
    fn closing_entity_closes_handle() {
        let record = decode("!id1,AlbumA,ArtistA,Name1").unwrap();
        let track = Track::new(
            TrackInfo::from_record(&record).unwrap(),
            Handle::detached("track id1"),
        );
        Close::close(&track);
        assert!(track.handle().is_closed());
    }
}
