//! Library and player backed by the subprocess transport.

use crate::runner::{InterpreterConfig, ScriptRunner};
use crate::scripts::{ScriptOp, ScriptSet, ScriptValue};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tunebridge_core::{
    artwork_path, position_from_seconds, Artwork, ArtworkFormat, ArtworkInfo, BridgeError,
    BridgeResult, Handle, Library, PersistentId, Player, PlayerState, Playlist, PlaylistInfo,
    Record, ScriptTransportConfig, Sequence, Track, TrackInfo, Volume,
};

/// Host session reached by running one script per operation.
///
/// Tracks and playlists are addressed by persistent id, so their handles own
/// no backend resource. Enumerations stream straight from the interpreter.
#[derive(Debug)]
pub struct ScriptLibrary {
    runner: ScriptRunner,
    scripts: ScriptSet,
    root: Handle,
}

impl ScriptLibrary {
    pub fn new(runner: ScriptRunner, scripts: ScriptSet) -> Self {
        Self {
            runner,
            scripts,
            root: Handle::detached("script library"),
        }
    }

    /// Library with the default iTunes vocabulary.
    pub fn from_config(config: &ScriptTransportConfig) -> Self {
        Self::new(
            ScriptRunner::new(InterpreterConfig::from(config)),
            ScriptSet::itunes(),
        )
    }

    fn run(&self, op: ScriptOp, params: &[(&str, ScriptValue)]) -> BridgeResult<Record> {
        let _bracket = self.root.acquire()?;
        let script = self.scripts.script(op, params)?;
        tracing::trace!(operation = ?op, "running script");
        self.runner.run_once(&script)
    }

    fn run_on(
        &self,
        handle: &Handle,
        op: ScriptOp,
        params: &[(&str, ScriptValue)],
    ) -> BridgeResult<Record> {
        let _bracket = handle.acquire()?;
        self.run(op, params)
    }

    fn command(&self, op: ScriptOp, params: &[(&str, ScriptValue)]) -> BridgeResult<()> {
        self.run(op, params).map(|_| ())
    }

    /// First field of the reply. Absent, `null` and `undefined` replies are
    /// reported as missing.
    fn value(&self, op: ScriptOp, params: &[(&str, ScriptValue)], what: &str) -> BridgeResult<String> {
        let record = self.run(op, params)?;
        present(record, what)
    }

    fn number<T: FromStr>(&self, op: ScriptOp, params: &[(&str, ScriptValue)], what: &str) -> BridgeResult<T> {
        let value = self.value(op, params, what)?;
        parse_value(&value, what)
    }

    fn lookup_track(&self, record: Record, what: impl FnOnce() -> String) -> BridgeResult<Track> {
        TrackInfo::from_record(&record)
            .map(track_from)
            .ok_or_else(|| BridgeError::not_found(what()))
    }

    fn stream_tracks(
        &self,
        owners: &[&Handle],
        op: ScriptOp,
        params: &[(&str, ScriptValue)],
        name: &str,
    ) -> BridgeResult<Sequence<Track>> {
        let script = self.scripts.script(op, params)?;
        self.runner.stream(&script, owners, name, |record| {
            Ok(TrackInfo::from_record(&record).map(track_from))
        })
    }
}

fn track_from(info: TrackInfo) -> Track {
    let handle = Handle::detached(format!("track {}", info.persistent_id));
    Track::new(info, handle)
}

fn playlist_from(info: PlaylistInfo) -> Playlist {
    let handle = Handle::detached(format!("playlist {}", info.persistent_id));
    Playlist::new(info, handle)
}

fn present(record: Record, what: &str) -> BridgeResult<String> {
    if record.is_empty() {
        return Err(BridgeError::not_found(what));
    }
    match record.field(0) {
        "null" | "undefined" => Err(BridgeError::not_found(what)),
        value => Ok(value.to_string()),
    }
}

fn parse_value<T: FromStr>(value: &str, what: &str) -> BridgeResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::decode(format!("{what} {value:?} is not a number")))
}

fn id_param(id: &PersistentId) -> ScriptValue {
    ScriptValue::text(id.as_str())
}

fn index_param(index: usize) -> BridgeResult<ScriptValue> {
    i64::try_from(index)
        .map(ScriptValue::Int)
        .map_err(|_| BridgeError::invalid_argument(format!("index {index} is too large")))
}

impl Library for ScriptLibrary {
    fn current_track(&self) -> BridgeResult<Option<Track>> {
        let record = self.run(ScriptOp::CurrentTrack, &[])?;
        Ok(TrackInfo::from_record(&record).map(track_from))
    }

    fn track_count(&self) -> BridgeResult<usize> {
        self.number(ScriptOp::TrackCount, &[], "track count")
    }

    fn tracks(&self) -> BridgeResult<Sequence<Track>> {
        self.stream_tracks(&[&self.root], ScriptOp::Tracks, &[], "tracks")
    }

    fn track(&self, index: usize) -> BridgeResult<Track> {
        let record = self.run(ScriptOp::TrackAt, &[("index", index_param(index)?)])?;
        self.lookup_track(record, || format!("track at {index}"))
    }

    fn find_track(&self, persistent_id: &str) -> BridgeResult<Track> {
        let id = PersistentId::parse(persistent_id)?;
        let record = self.run(ScriptOp::FindTrack, &[("id", id_param(&id))])?;
        self.lookup_track(record, || format!("track {id}"))
    }

    fn play_track(&self, track: &Track) -> BridgeResult<()> {
        self.run_on(
            track.handle(),
            ScriptOp::PlayTrack,
            &[("id", id_param(track.persistent_id()))],
        )
        .map(|_| ())
    }

    fn artworks(&self, track: &Track) -> BridgeResult<Sequence<Artwork>> {
        let script = self
            .scripts
            .script(ScriptOp::Artworks, &[("id", id_param(track.persistent_id()))])?;
        let parent = track.handle().clone();
        let track_id = track.persistent_id().clone();
        let mut index = 0;
        self.runner.stream(&script, &[&self.root, track.handle()], "artworks", move |record| {
            if record.is_empty() {
                return Ok(None);
            }
            index += 1;
            let format = ArtworkFormat::from_description(record.field(0));
            let handle = parent.spawn_child(format!("artwork {index} of {track_id}"), None)?;
            Ok(Some(Artwork::new(
                ArtworkInfo {
                    track_id: track_id.clone(),
                    index,
                    format,
                },
                handle,
            )))
        })
    }

    fn save_artwork(&self, artwork: &Artwork, directory: &Path, name: &str) -> BridgeResult<PathBuf> {
        let path = artwork_path(artwork, directory, name)?;
        let target = path.to_str().ok_or_else(|| {
            BridgeError::invalid_argument(format!("{} is not valid UTF-8", path.display()))
        })?;
        self.run_on(
            artwork.handle(),
            ScriptOp::SaveArtwork,
            &[
                ("id", id_param(artwork.track_id())),
                ("index", index_param(artwork.index())?),
                ("path", ScriptValue::text(target)),
            ],
        )?;
        tracing::debug!(path = %path.display(), format = %artwork.format(), "artwork saved");
        Ok(path)
    }

    fn playlists(&self) -> BridgeResult<Sequence<Playlist>> {
        let script = self.scripts.script(ScriptOp::Playlists, &[])?;
        self.runner.stream(&script, &[&self.root], "playlists", |record| {
            Ok(PlaylistInfo::from_record(&record).map(playlist_from))
        })
    }

    fn find_playlist(&self, persistent_id: &str) -> BridgeResult<Playlist> {
        let id = PersistentId::parse(persistent_id)?;
        let record = self.run(ScriptOp::FindPlaylist, &[("id", id_param(&id))])?;
        PlaylistInfo::from_record(&record)
            .map(playlist_from)
            .ok_or_else(|| BridgeError::not_found(format!("playlist {id}")))
    }

    fn playlist_track_count(&self, playlist: &Playlist) -> BridgeResult<usize> {
        let _bracket = playlist.handle().acquire()?;
        self.number(
            ScriptOp::PlaylistTrackCount,
            &[("id", id_param(playlist.persistent_id()))],
            "playlist track count",
        )
    }

    fn playlist_tracks(&self, playlist: &Playlist) -> BridgeResult<Sequence<Track>> {
        self.stream_tracks(
            &[&self.root, playlist.handle()],
            ScriptOp::PlaylistTracks,
            &[("id", id_param(playlist.persistent_id()))],
            "playlist-tracks",
        )
    }

    fn playlist_track(&self, playlist: &Playlist, index: usize) -> BridgeResult<Track> {
        let record = self.run_on(
            playlist.handle(),
            ScriptOp::PlaylistTrackAt,
            &[
                ("id", id_param(playlist.persistent_id())),
                ("index", index_param(index)?),
            ],
        )?;
        self.lookup_track(record, || {
            format!("track at {index} of playlist {}", playlist.persistent_id())
        })
    }

    fn play_playlist(&self, playlist: &Playlist) -> BridgeResult<()> {
        self.run_on(
            playlist.handle(),
            ScriptOp::PlayPlaylist,
            &[("id", id_param(playlist.persistent_id()))],
        )
        .map(|_| ())
    }

    fn add_to_playlist(&self, playlist: &Playlist, track: &Track) -> BridgeResult<Track> {
        let _playlist = playlist.handle().acquire()?;
        let _track = track.handle().acquire()?;
        let added = self.value(
            ScriptOp::AddToPlaylist,
            &[
                ("track_id", id_param(track.persistent_id())),
                ("playlist_id", id_param(playlist.persistent_id())),
            ],
            "added track",
        )?;
        self.find_track(&added)
    }

    fn delete_playlist(&self, playlist: &Playlist) -> BridgeResult<()> {
        self.run_on(
            playlist.handle(),
            ScriptOp::DeletePlaylist,
            &[("id", id_param(playlist.persistent_id()))],
        )
        .map(|_| ())
    }

    fn handle(&self) -> &Handle {
        &self.root
    }

    fn close(&self) {
        self.root.close();
    }
}

impl Player for ScriptLibrary {
    fn play(&self) -> BridgeResult<()> {
        self.command(ScriptOp::Play, &[])
    }

    fn pause(&self) -> BridgeResult<()> {
        self.command(ScriptOp::Pause, &[])
    }

    fn stop(&self) -> BridgeResult<()> {
        self.command(ScriptOp::Stop, &[])
    }

    fn play_pause(&self) -> BridgeResult<()> {
        self.command(ScriptOp::PlayPause, &[])
    }

    fn resume(&self) -> BridgeResult<()> {
        self.command(ScriptOp::Resume, &[])
    }

    fn back_track(&self) -> BridgeResult<()> {
        self.command(ScriptOp::BackTrack, &[])
    }

    fn previous_track(&self) -> BridgeResult<()> {
        self.command(ScriptOp::PreviousTrack, &[])
    }

    fn next_track(&self) -> BridgeResult<()> {
        self.command(ScriptOp::NextTrack, &[])
    }

    fn fast_forward(&self) -> BridgeResult<()> {
        self.command(ScriptOp::FastForward, &[])
    }

    fn rewind(&self) -> BridgeResult<()> {
        self.command(ScriptOp::Rewind, &[])
    }

    fn player_state(&self) -> BridgeResult<PlayerState> {
        let state = self.value(ScriptOp::PlayerState, &[], "player state")?;
        PlayerState::from_name(&state)
    }

    fn player_position(&self) -> BridgeResult<Duration> {
        let seconds: f64 = self.number(ScriptOp::PlayerPosition, &[], "player position")?;
        position_from_seconds(seconds)
    }

    fn set_player_position(&self, position: Duration) -> BridgeResult<()> {
        self.command(
            ScriptOp::SetPlayerPosition,
            &[("seconds", ScriptValue::Float(position.as_secs_f64()))],
        )
    }

    fn sound_volume(&self) -> BridgeResult<u8> {
        let volume: u8 = self.number(ScriptOp::SoundVolume, &[], "sound volume")?;
        Ok(Volume::new(volume)
            .map_err(|_| BridgeError::decode(format!("host reported volume {volume}")))?
            .percent())
    }

    fn apply_sound_volume(&self, volume: Volume) -> BridgeResult<()> {
        self.command(
            ScriptOp::SetSoundVolume,
            &[("volume", ScriptValue::Int(i64::from(volume.percent())))],
        )
    }

    fn is_muted(&self) -> BridgeResult<bool> {
        let muted = self.value(ScriptOp::Mute, &[], "mute")?;
        match muted.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(BridgeError::decode(format!("mute {other:?} is not a boolean"))),
        }
    }

    fn set_muted(&self, muted: bool) -> BridgeResult<()> {
        self.command(ScriptOp::SetMute, &[("muted", ScriptValue::Bool(muted))])
    }
}
