use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::models::{Artwork, PlayerState, Playlist, Track, Volume};
use crate::sequence::Sequence;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Collections and entity operations exposed by a host application.
///
/// Every entity returned here must be closed by the caller. Sequences are lazy
/// and single-use; dropping one early cancels its worker.
pub trait Library: Send + Sync {
    /// The track currently loaded in the player, `None` when there is none.
    fn current_track(&self) -> BridgeResult<Option<Track>>;

    fn track_count(&self) -> BridgeResult<usize>;

    /// All library tracks in host order.
    fn tracks(&self) -> BridgeResult<Sequence<Track>>;

    /// Library track at a 0-based position.
    fn track(&self, index: usize) -> BridgeResult<Track>;

    fn find_track(&self, persistent_id: &str) -> BridgeResult<Track>;

    fn play_track(&self, track: &Track) -> BridgeResult<()>;

    /// Artworks of `track`. Each artwork keeps `track` from finishing its close
    /// until the artwork itself is closed.
    fn artworks(&self, track: &Track) -> BridgeResult<Sequence<Artwork>>;

    /// Ask the host to write the artwork's bytes to `directory/name.<ext>`.
    /// Returns the absolute path written.
    fn save_artwork(&self, artwork: &Artwork, directory: &Path, name: &str)
        -> BridgeResult<PathBuf>;

    fn playlists(&self) -> BridgeResult<Sequence<Playlist>>;

    fn find_playlist(&self, persistent_id: &str) -> BridgeResult<Playlist>;

    fn playlist_track_count(&self, playlist: &Playlist) -> BridgeResult<usize>;

    fn playlist_tracks(&self, playlist: &Playlist) -> BridgeResult<Sequence<Track>>;

    fn playlist_track(&self, playlist: &Playlist, index: usize) -> BridgeResult<Track>;

    fn play_playlist(&self, playlist: &Playlist) -> BridgeResult<()>;

    /// Add `track` to `playlist`, returning the playlist's copy of the track.
    fn add_to_playlist(&self, playlist: &Playlist, track: &Track) -> BridgeResult<Track>;

    fn delete_playlist(&self, playlist: &Playlist) -> BridgeResult<()>;

    fn shuffle(&self, _playlist: &Playlist) -> BridgeResult<bool> {
        Err(BridgeError::unsupported("shuffle"))
    }

    fn set_shuffle(&self, _playlist: &Playlist, _enabled: bool) -> BridgeResult<()> {
        Err(BridgeError::unsupported("set_shuffle"))
    }

    /// Root handle of the session. Every enumeration holds a bracket on it
    /// while its worker runs.
    fn handle(&self) -> &Handle;

    /// Close the session. Enumerations rooted at it stop producing.
    fn close(&self);
}

/// Player transport controls of a host application session.
pub trait Player: Send + Sync {
    fn play(&self) -> BridgeResult<()>;
    fn pause(&self) -> BridgeResult<()>;
    fn stop(&self) -> BridgeResult<()>;
    fn play_pause(&self) -> BridgeResult<()>;
    fn resume(&self) -> BridgeResult<()>;
    fn back_track(&self) -> BridgeResult<()>;
    fn previous_track(&self) -> BridgeResult<()>;
    fn next_track(&self) -> BridgeResult<()>;
    fn fast_forward(&self) -> BridgeResult<()>;
    fn rewind(&self) -> BridgeResult<()>;

    fn player_state(&self) -> BridgeResult<PlayerState>;

    fn player_position(&self) -> BridgeResult<Duration>;

    /// Seek within the current track.
    fn set_player_position(&self, position: Duration) -> BridgeResult<()>;

    fn sound_volume(&self) -> BridgeResult<u8>;

    /// Set the volume in percent. Out-of-range values fail before the host is
    /// contacted.
    fn set_sound_volume(&self, percent: u8) -> BridgeResult<()> {
        let volume = Volume::new(percent)?;
        self.apply_sound_volume(volume)
    }

    /// Write an already validated volume to the host.
    fn apply_sound_volume(&self, volume: Volume) -> BridgeResult<()>;

    fn is_muted(&self) -> BridgeResult<bool>;

    fn set_muted(&self, muted: bool) -> BridgeResult<()>;
}

/// Resolve the destination of an artwork export.
pub fn artwork_path(artwork: &Artwork, directory: &Path, name: &str) -> BridgeResult<PathBuf> {
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(BridgeError::invalid_argument(format!(
            "artwork file name {name:?} must be a bare name"
        )));
    }
    let directory = std::fs::canonicalize(directory).map_err(|err| {
        BridgeError::invalid_argument(format!(
            "artwork directory {} is not usable: {err}",
            directory.display()
        ))
    })?;
    if !directory.is_dir() {
        return Err(BridgeError::invalid_argument(format!(
            "{} is not a directory",
            directory.display()
        )));
    }
    Ok(directory.join(format!("{name}{}", artwork.format().extension())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtworkFormat, ArtworkInfo, PersistentId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn artwork(format: ArtworkFormat) -> Artwork {
        Artwork::new(
            ArtworkInfo {
                track_id: PersistentId::from_host("8A3F"),
                index: 1,
                format,
            },
            Handle::detached("artwork 1"),
        )
    }

    #[test]
    fn artwork_path_appends_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = artwork_path(&artwork(ArtworkFormat::Png), dir.path(), "cover").unwrap();
        assert!(path.is_absolute());
        assert_eq!(path.file_name().unwrap(), "cover.png");
    }

    #[test]
    fn artwork_path_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = artwork_path(&artwork(ArtworkFormat::Jpeg), &missing, "cover").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument { .. }));
    }

    #[test]
    fn artwork_path_rejects_nested_name() {
        let dir = tempfile::tempdir().unwrap();
        let err = artwork_path(&artwork(ArtworkFormat::Jpeg), dir.path(), "../cover").unwrap_err();
        assert!(matches!(err, BridgeError::InvalidArgument { .. }));
    }

    struct CountingPlayer {
        writes: AtomicUsize,
    }

    impl Player for CountingPlayer {
        fn play(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn pause(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn stop(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn play_pause(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn resume(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn back_track(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn previous_track(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn next_track(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn fast_forward(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn rewind(&self) -> BridgeResult<()> {
            Ok(())
        }
        fn player_state(&self) -> BridgeResult<PlayerState> {
            Ok(PlayerState::Stopped)
        }
        fn player_position(&self) -> BridgeResult<Duration> {
            Ok(Duration::ZERO)
        }
        fn set_player_position(&self, _position: Duration) -> BridgeResult<()> {
            Ok(())
        }
        fn sound_volume(&self) -> BridgeResult<u8> {
            Ok(0)
        }
        fn apply_sound_volume(&self, _volume: Volume) -> BridgeResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn is_muted(&self) -> BridgeResult<bool> {
            Ok(false)
        }
        fn set_muted(&self, _muted: bool) -> BridgeResult<()> {
            Ok(())
        }
    }

    #[test]
    fn out_of_range_volume_never_reaches_backend() {
        let player = CountingPlayer {
            writes: AtomicUsize::new(0),
        };
        assert!(matches!(
            player.set_sound_volume(150),
            Err(BridgeError::InvalidArgument { .. })
        ));
        assert_eq!(player.writes.load(Ordering::SeqCst), 0);
        player.set_sound_volume(42).unwrap();
        assert_eq!(player.writes.load(Ordering::SeqCst), 1);
    }
}
