//! Library and player backed by the host's object model.

use crate::object::{enter, AutomationObject, ObjectRef, Scoped, Variant};
use crate::runtime::AutomationRuntime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tunebridge_core::{
    artwork_path, Artwork, ArtworkFormat, ArtworkInfo, AutomationConfig, BridgeError,
    BridgeResult, Close, Handle, Library, PersistentId, Player, PlayerState, Playlist,
    PlaylistInfo, Sequence, Track, TrackInfo, Volume,
};

type ObjectArc = Arc<dyn AutomationObject>;

/// Builds entities from object references, reading persistent ids through
/// the application object. Every read brackets the application handle, so
/// once the session starts closing they fail with `Closed`.
#[derive(Clone)]
struct Assembler {
    app: Handle,
}

impl Assembler {
    fn persistent_id(&self, object: &ObjectArc) -> BridgeResult<PersistentId> {
        let (_bracket, app) = enter(&self.app)?;
        let target = [Variant::Object(object.clone())];
        let high = app
            .get_property("ITObjectPersistentIDHigh", &target)?
            .as_id_half()?;
        let low = app
            .get_property("ITObjectPersistentIDLow", &target)?
            .as_id_half()?;
        Ok(PersistentId::from_halves(high, low))
    }

    fn track(&self, object: ObjectArc) -> BridgeResult<Track> {
        let info = self.track_info(&object).inspect_err(|_| release_quietly(&object))?;
        let handle = Handle::new(
            format!("track {}", info.persistent_id),
            Some(ObjectRef::resource(object)),
        );
        Ok(Track::new(info, handle))
    }

    fn track_info(&self, object: &ObjectArc) -> BridgeResult<TrackInfo> {
        Ok(TrackInfo {
            persistent_id: self.persistent_id(object)?,
            name: text_property(object, "Name")?,
            artist: text_property(object, "Artist")?,
            album: text_property(object, "Album")?,
        })
    }

    fn playlist(&self, object: ObjectArc) -> BridgeResult<Playlist> {
        let info = self
            .playlist_info(&object)
            .inspect_err(|_| release_quietly(&object))?;
        let handle = Handle::new(
            format!("playlist {}", info.persistent_id),
            Some(ObjectRef::resource(object)),
        );
        Ok(Playlist::new(info, handle))
    }

    fn playlist_info(&self, object: &ObjectArc) -> BridgeResult<PlaylistInfo> {
        Ok(PlaylistInfo {
            persistent_id: self.persistent_id(object)?,
            name: text_property(object, "Name")?,
        })
    }
}

/// Empty text properties come back as `Empty` on some hosts.
fn text_property(object: &ObjectArc, name: &str) -> BridgeResult<String> {
    match object.get_property(name, &[])? {
        Variant::Empty => Ok(String::new()),
        value => Ok(value.as_text()?.to_string()),
    }
}

fn count_property(object: &ObjectArc) -> BridgeResult<usize> {
    let count = object.get_property("Count", &[])?.as_int()?;
    usize::try_from(count).map_err(|_| BridgeError::decode(format!("negative count {count}")))
}

fn release_quietly(object: &ObjectArc) {
    if let Err(err) = object.release() {
        tracing::warn!(error = %err, "failed to release object");
    }
}

fn object_property(object: &ObjectArc, name: &str) -> BridgeResult<ObjectArc> {
    object
        .get_property(name, &[])?
        .into_object()?
        .ok_or_else(|| BridgeError::not_found(name))
}

fn one_based(index: usize) -> BridgeResult<Variant> {
    index
        .checked_add(1)
        .and_then(|index| i64::try_from(index).ok())
        .map(Variant::Int)
        .ok_or_else(|| BridgeError::invalid_argument(format!("index {index} is too large")))
}

fn id_args(id: &PersistentId) -> BridgeResult<[Variant; 2]> {
    let (high, low) = id.halves()?;
    Ok([Variant::Int(i64::from(high)), Variant::Int(i64::from(low))])
}

/// Where an indexed enumeration gets its collection object.
enum Collection {
    /// Collection owned by a handle; borrowed for the worker's lifetime.
    Borrowed(ObjectArc),
    /// Intermediate collection released when the worker ends.
    Owned(Scoped),
}

impl Collection {
    fn object(&self) -> &ObjectArc {
        match self {
            Collection::Borrowed(object) => object,
            Collection::Owned(scoped) => scoped.object(),
        }
    }
}

/// Walk `Item(1..=count)` on a worker bracketing every handle in `owners`.
/// The count is read once, up front. An empty item ends the sequence early.
fn enumerate<T, F>(
    owners: &[&Handle],
    collection: Collection,
    name: &str,
    mut assemble: F,
) -> BridgeResult<Sequence<T>>
where
    T: Close + Send + 'static,
    F: FnMut(usize, ObjectArc) -> BridgeResult<T> + Send + 'static,
{
    let count = count_property(collection.object())?;
    if count == 0 {
        return Ok(Sequence::empty(name));
    }
    tracing::debug!(sequence = name, count, "enumerating collection");

    Sequence::spawn_owned(name, owners, move |emitter| {
        let collection = collection;
        for index in 1..=count {
            if emitter.is_cancelled() {
                return Ok(());
            }
            let item = collection
                .object()
                .get_property("Item", &[Variant::Int(index as i64)])?
                .into_object()?;
            let Some(item) = item else {
                tracing::debug!(index, count, "collection ended early");
                return Ok(());
            };
            if !emitter.emit(assemble(index, item)?) {
                return Ok(());
            }
        }
        Ok(())
    })
}

/// Host session reached through the object model.
pub struct AutomationLibrary {
    assembler: Assembler,
    app: Handle,
    library_playlist: Handle,
    tracks: Handle,
}

impl AutomationLibrary {
    /// Create the application object and its library collections.
    pub fn connect(runtime: &dyn AutomationRuntime, config: &AutomationConfig) -> BridgeResult<Self> {
        let app_object = runtime.create_object(&config.prog_id)?;
        let app = Handle::new("application", Some(ObjectRef::resource(app_object.clone())));

        let children = object_property(&app_object, "LibraryPlaylist")
            .and_then(|playlist_object| {
                let library_playlist = app.spawn_child(
                    "library playlist",
                    Some(ObjectRef::resource(playlist_object.clone())),
                )?;
                let tracks = object_property(&playlist_object, "Tracks").and_then(|tracks_object| {
                    library_playlist
                        .spawn_child("library tracks", Some(ObjectRef::resource(tracks_object)))
                });
                match tracks {
                    Ok(tracks) => Ok((library_playlist, tracks)),
                    Err(err) => {
                        library_playlist.close();
                        Err(err)
                    }
                }
            });

        match children {
            Ok((library_playlist, tracks)) => {
                tracing::info!(prog_id = %config.prog_id, "connected to automation host");
                Ok(Self {
                    assembler: Assembler { app: app.clone() },
                    app,
                    library_playlist,
                    tracks,
                })
            }
            Err(err) => {
                tracing::warn!(prog_id = %config.prog_id, error = %err, "automation host setup failed");
                app.close();
                Err(err)
            }
        }
    }

    fn call(&self, method: &str) -> BridgeResult<()> {
        let (_bracket, app) = enter(&self.app)?;
        app.call_method(method, &[]).map(|_| ())
    }

    fn property(&self, name: &str) -> BridgeResult<Variant> {
        let (_bracket, app) = enter(&self.app)?;
        app.get_property(name, &[])
    }

    fn put(&self, name: &str, value: Variant) -> BridgeResult<()> {
        let (_bracket, app) = enter(&self.app)?;
        app.put_property(name, value)
    }

    fn playlists_collection(&self, app: &ObjectArc) -> BridgeResult<Scoped> {
        let source = Scoped::new(object_property(app, "LibrarySource")?);
        Ok(Scoped::new(object_property(source.object(), "Playlists")?))
    }

    fn tracks_of(&self, playlist: &ObjectArc) -> BridgeResult<Scoped> {
        Ok(Scoped::new(object_property(playlist, "Tracks")?))
    }

    fn track_from_item(&self, item: Variant, what: impl FnOnce() -> String) -> BridgeResult<Track> {
        match item.into_object()? {
            Some(object) => self.assembler.track(object),
            None => Err(BridgeError::not_found(what())),
        }
    }
}

impl Library for AutomationLibrary {
    fn current_track(&self) -> BridgeResult<Option<Track>> {
        match self.property("CurrentTrack")?.into_object()? {
            Some(object) => self.assembler.track(object).map(Some),
            None => Ok(None),
        }
    }

    fn track_count(&self) -> BridgeResult<usize> {
        let (_bracket, tracks) = enter(&self.tracks)?;
        count_property(&tracks)
    }

    fn tracks(&self) -> BridgeResult<Sequence<Track>> {
        let (_bracket, tracks) = enter(&self.tracks)?;
        let assembler = self.assembler.clone();
        enumerate(
            &[&self.app, &self.tracks],
            Collection::Borrowed(tracks),
            "tracks",
            move |_, item| assembler.track(item),
        )
    }

    fn track(&self, index: usize) -> BridgeResult<Track> {
        let (_bracket, tracks) = enter(&self.tracks)?;
        let item = tracks.get_property("Item", &[one_based(index)?])?;
        self.track_from_item(item, || format!("track at {index}"))
    }

    fn find_track(&self, persistent_id: &str) -> BridgeResult<Track> {
        let id = PersistentId::parse(persistent_id)?;
        let (_bracket, tracks) = enter(&self.tracks)?;
        let item = tracks.get_property("ItemByPersistentID", &id_args(&id)?)?;
        self.track_from_item(item, || format!("track {id}"))
    }

    fn play_track(&self, track: &Track) -> BridgeResult<()> {
        let (_bracket, object) = enter(track.handle())?;
        object.call_method("Play", &[]).map(|_| ())
    }

    fn artworks(&self, track: &Track) -> BridgeResult<Sequence<Artwork>> {
        let (_bracket, object) = enter(track.handle())?;
        let collection = Scoped::new(object_property(&object, "Artworks")?);
        let parent = track.handle().clone();
        let track_id = track.persistent_id().clone();
        enumerate(
            &[&self.app, track.handle()],
            Collection::Owned(collection),
            "artworks",
            move |index, item| {
                let format = match item.get_property("Format", &[]).and_then(|v| v.as_int()) {
                    Ok(code) => ArtworkFormat::from_code(code),
                    Err(err) => {
                        release_quietly(&item);
                        return Err(err);
                    }
                };
                let handle = parent
                    .spawn_child(
                        format!("artwork {index} of {track_id}"),
                        Some(ObjectRef::resource(item.clone())),
                    )
                    .inspect_err(|_| release_quietly(&item))?;
                Ok(Artwork::new(
                    ArtworkInfo {
                        track_id: track_id.clone(),
                        index,
                        format,
                    },
                    handle,
                ))
            },
        )
    }

    fn save_artwork(&self, artwork: &Artwork, directory: &Path, name: &str) -> BridgeResult<PathBuf> {
        let path = artwork_path(artwork, directory, name)?;
        let target = path.to_str().ok_or_else(|| {
            BridgeError::invalid_argument(format!("{} is not valid UTF-8", path.display()))
        })?;
        let (_bracket, object) = enter(artwork.handle())?;
        object.call_method("SaveArtworkToFile", &[Variant::Text(target.to_string())])?;
        tracing::debug!(path = %path.display(), format = %artwork.format(), "artwork saved");
        Ok(path)
    }

    fn playlists(&self) -> BridgeResult<Sequence<Playlist>> {
        let (_bracket, app) = enter(&self.app)?;
        let collection = self.playlists_collection(&app)?;
        let assembler = self.assembler.clone();
        enumerate(
            &[&self.app],
            Collection::Owned(collection),
            "playlists",
            move |_, item| assembler.playlist(item),
        )
    }

    fn find_playlist(&self, persistent_id: &str) -> BridgeResult<Playlist> {
        let id = PersistentId::parse(persistent_id)?;
        let (_bracket, app) = enter(&self.app)?;
        let playlists = self.playlists_collection(&app)?;
        let item = playlists
            .object()
            .get_property("ItemByPersistentID", &id_args(&id)?)?;
        match item.into_object()? {
            Some(object) => self.assembler.playlist(object),
            None => Err(BridgeError::not_found(format!("playlist {id}"))),
        }
    }

    fn playlist_track_count(&self, playlist: &Playlist) -> BridgeResult<usize> {
        let (_bracket, object) = enter(playlist.handle())?;
        let tracks = self.tracks_of(&object)?;
        count_property(tracks.object())
    }

    fn playlist_tracks(&self, playlist: &Playlist) -> BridgeResult<Sequence<Track>> {
        let (_bracket, object) = enter(playlist.handle())?;
        let tracks = self.tracks_of(&object)?;
        let assembler = self.assembler.clone();
        enumerate(
            &[&self.app, playlist.handle()],
            Collection::Owned(tracks),
            "playlist-tracks",
            move |_, item| assembler.track(item),
        )
    }

    fn playlist_track(&self, playlist: &Playlist, index: usize) -> BridgeResult<Track> {
        let (_bracket, object) = enter(playlist.handle())?;
        let tracks = self.tracks_of(&object)?;
        let item = tracks.object().get_property("Item", &[one_based(index)?])?;
        self.track_from_item(item, || {
            format!("track at {index} of playlist {}", playlist.persistent_id())
        })
    }

    fn play_playlist(&self, playlist: &Playlist) -> BridgeResult<()> {
        let (_bracket, object) = enter(playlist.handle())?;
        object.call_method("PlayFirstTrack", &[]).map(|_| ())
    }

    fn add_to_playlist(&self, playlist: &Playlist, track: &Track) -> BridgeResult<Track> {
        let (_playlist, playlist_object) = enter(playlist.handle())?;
        let (_track, track_object) = enter(track.handle())?;
        let added = playlist_object.call_method("AddTrack", &[Variant::Object(track_object)])?;
        self.track_from_item(added, || format!("copy of track {}", track.persistent_id()))
    }

    fn delete_playlist(&self, playlist: &Playlist) -> BridgeResult<()> {
        let (_bracket, object) = enter(playlist.handle())?;
        object.call_method("Delete", &[]).map(|_| ())
    }

    fn shuffle(&self, playlist: &Playlist) -> BridgeResult<bool> {
        let (_bracket, object) = enter(playlist.handle())?;
        object.get_property("Shuffle", &[])?.as_bool()
    }

    fn set_shuffle(&self, playlist: &Playlist, enabled: bool) -> BridgeResult<()> {
        let (_bracket, object) = enter(playlist.handle())?;
        object.put_property("Shuffle", Variant::Bool(enabled))
    }

    fn handle(&self) -> &Handle {
        &self.app
    }

    fn close(&self) {
        self.tracks.close();
        self.library_playlist.close();
        self.app.close();
        tracing::info!("automation host session closed");
    }
}

impl Player for AutomationLibrary {
    fn play(&self) -> BridgeResult<()> {
        self.call("Play")
    }

    fn pause(&self) -> BridgeResult<()> {
        self.call("Pause")
    }

    fn stop(&self) -> BridgeResult<()> {
        self.call("Stop")
    }

    fn play_pause(&self) -> BridgeResult<()> {
        self.call("PlayPause")
    }

    fn resume(&self) -> BridgeResult<()> {
        self.call("Resume")
    }

    fn back_track(&self) -> BridgeResult<()> {
        self.call("BackTrack")
    }

    fn previous_track(&self) -> BridgeResult<()> {
        self.call("PreviousTrack")
    }

    fn next_track(&self) -> BridgeResult<()> {
        self.call("NextTrack")
    }

    fn fast_forward(&self) -> BridgeResult<()> {
        self.call("FastForward")
    }

    fn rewind(&self) -> BridgeResult<()> {
        self.call("Rewind")
    }

    fn player_state(&self) -> BridgeResult<PlayerState> {
        PlayerState::from_code(self.property("PlayerState")?.as_int()?)
    }

    /// Whole seconds.
    fn player_position(&self) -> BridgeResult<Duration> {
        let seconds = self.property("PlayerPosition")?.as_int()?;
        u64::try_from(seconds)
            .map(Duration::from_secs)
            .map_err(|_| BridgeError::decode(format!("invalid player position {seconds}")))
    }

    fn set_player_position(&self, position: Duration) -> BridgeResult<()> {
        let seconds = i64::try_from(position.as_secs()).map_err(|_| {
            BridgeError::invalid_argument(format!("position {position:?} is too large"))
        })?;
        self.put("PlayerPosition", Variant::Int(seconds))
    }

    fn sound_volume(&self) -> BridgeResult<u8> {
        let volume = self.property("SoundVolume")?.as_int()?;
        u8::try_from(volume)
            .ok()
            .and_then(|volume| Volume::new(volume).ok())
            .map(|volume| volume.percent())
            .ok_or_else(|| BridgeError::decode(format!("host reported volume {volume}")))
    }

    fn apply_sound_volume(&self, volume: Volume) -> BridgeResult<()> {
        self.put("SoundVolume", Variant::Int(i64::from(volume.percent())))
    }

    fn is_muted(&self) -> BridgeResult<bool> {
        self.property("Mute")?.as_bool()
    }

    fn set_muted(&self, muted: bool) -> BridgeResult<()> {
        self.put("Mute", Variant::Bool(muted))
    }
}
