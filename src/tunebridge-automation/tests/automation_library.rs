use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tunebridge_automation::{
    AutomationLibrary, AutomationObject, AutomationRuntime, RuntimeSession, Variant,
};
use tunebridge_core::{
    run_library_contract, ArtworkFormat, AutomationConfig, BridgeError, BridgeResult, Library,
    LibraryContractExpectations, Player, PlayerState,
};

const FIRST: &str = "00008A3F00000001";
const SECOND: &str = "00008A3F00000002";
const THIRD: &str = "00008A3F00000003";

/// Counts object references handed to the library and released by it.
#[derive(Default)]
struct Ledger {
    handed_out: AtomicUsize,
    released: AtomicUsize,
    used_after_release: AtomicUsize,
}

impl Ledger {
    fn outstanding(&self) -> usize {
        self.handed_out.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }
}

struct FakeObject {
    label: String,
    ledger: Arc<Ledger>,
    id: (u32, u32),
    props: Mutex<HashMap<String, Variant>>,
    children: HashMap<String, Arc<FakeObject>>,
    items: Vec<Arc<FakeObject>>,
    calls: Mutex<Vec<String>>,
    released: AtomicBool,
}

impl FakeObject {
    fn new(ledger: &Arc<Ledger>, label: &str) -> Self {
        Self {
            label: label.to_string(),
            ledger: ledger.clone(),
            id: (0, 0),
            props: Mutex::new(HashMap::new()),
            children: HashMap::new(),
            items: Vec::new(),
            calls: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        }
    }

    fn id(mut self, high: u32, low: u32) -> Self {
        self.id = (high, low);
        self
    }

    fn prop(self, name: &str, value: Variant) -> Self {
        self.props.lock().unwrap().insert(name.to_string(), value);
        self
    }

    fn child(mut self, name: &str, child: Arc<FakeObject>) -> Self {
        self.children.insert(name.to_string(), child);
        self
    }

    fn items(mut self, items: Vec<Arc<FakeObject>>) -> Self {
        self.items = items;
        self
    }

    fn hand_out(&self, object: Arc<dyn AutomationObject>) -> Variant {
        self.ledger.handed_out.fetch_add(1, Ordering::SeqCst);
        Variant::Object(object)
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn scalar(&self, name: &str) -> Option<Variant> {
        self.props.lock().unwrap().get(name).cloned()
    }
}

fn int_arg(args: &[Variant], index: usize) -> BridgeResult<i64> {
    args.get(index)
        .ok_or_else(|| BridgeError::host("missing argument"))?
        .as_int()
}

impl AutomationObject for FakeObject {
    fn get_property(&self, name: &str, args: &[Variant]) -> BridgeResult<Variant> {
        match name {
            "Item" => {
                let index = int_arg(args, 0)?;
                Ok(usize::try_from(index - 1)
                    .ok()
                    .and_then(|i| self.items.get(i))
                    .map(|item| self.hand_out(item.clone()))
                    .unwrap_or(Variant::Empty))
            }
            "ItemByPersistentID" => {
                let wanted = (int_arg(args, 0)? as u32, int_arg(args, 1)? as u32);
                Ok(self
                    .items
                    .iter()
                    .find(|item| item.id == wanted)
                    .map(|item| self.hand_out(item.clone()))
                    .unwrap_or(Variant::Empty))
            }
            "ITObjectPersistentIDHigh" | "ITObjectPersistentIDLow" => {
                if self.released.load(Ordering::SeqCst) {
                    self.ledger.used_after_release.fetch_add(1, Ordering::SeqCst);
                    return Err(BridgeError::host(format!("{} used after release", self.label)));
                }
                let target = args
                    .first()
                    .cloned()
                    .unwrap_or_default()
                    .into_object()?
                    .ok_or_else(|| BridgeError::host("no object"))?;
                let half = if name.ends_with("High") { "IdHigh" } else { "IdLow" };
                target.get_property(half, &[])
            }
            "IdHigh" => Ok(Variant::Int(i64::from(self.id.0))),
            "IdLow" => Ok(Variant::Int(i64::from(self.id.1))),
            "Count" => Ok(self
                .scalar("Count")
                .unwrap_or(Variant::Int(self.items.len() as i64))),
            _ => {
                if let Some(child) = self.children.get(name) {
                    return Ok(self.hand_out(child.clone()));
                }
                self.scalar(name).ok_or_else(|| {
                    BridgeError::host(format!("{} has no property {name}", self.label))
                })
            }
        }
    }

    fn put_property(&self, name: &str, value: Variant) -> BridgeResult<()> {
        self.props.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }

    fn call_method(&self, name: &str, args: &[Variant]) -> BridgeResult<Variant> {
        self.calls.lock().unwrap().push(name.to_string());
        match name {
            "AddTrack" => {
                let track = args
                    .first()
                    .cloned()
                    .unwrap_or_default()
                    .into_object()?
                    .ok_or_else(|| BridgeError::host("no track"))?;
                Ok(self.hand_out(track))
            }
            "SaveArtworkToFile" => {
                let path = args.first().cloned().unwrap_or_default();
                std::fs::write(path.as_text()?, b"image")
                    .map_err(|err| BridgeError::host(err.to_string()))?;
                Ok(Variant::Empty)
            }
            _ => Ok(Variant::Empty),
        }
    }

    fn release(&self) -> BridgeResult<()> {
        self.released.store(true, Ordering::SeqCst);
        self.ledger.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeRuntime {
    app: Arc<FakeObject>,
    initialized: AtomicUsize,
}

impl AutomationRuntime for FakeRuntime {
    fn initialize(&self) -> BridgeResult<()> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn uninitialize(&self) {
        self.initialized.fetch_sub(1, Ordering::SeqCst);
    }

    fn create_object(&self, prog_id: &str) -> BridgeResult<Arc<dyn AutomationObject>> {
        if prog_id != "iTunes.Application" {
            return Err(BridgeError::not_found(prog_id));
        }
        Ok(self.app.hand_out(self.app.clone()).into_object()?.unwrap())
    }
}

struct FakeHost {
    ledger: Arc<Ledger>,
    app: Arc<FakeObject>,
    playlist: Arc<FakeObject>,
}

fn track(
    ledger: &Arc<Ledger>,
    low: u32,
    name: &str,
    artist: &str,
    album: Option<&str>,
    formats: &[i64],
) -> Arc<FakeObject> {
    let artworks = formats
        .iter()
        .enumerate()
        .map(|(i, code)| {
            let artwork = FakeObject::new(ledger, &format!("artwork {}", i + 1));
            Arc::new(artwork.prop("Format", Variant::Int(*code)))
        })
        .collect();
    let collection = Arc::new(FakeObject::new(ledger, "artworks").items(artworks));
    Arc::new(
        FakeObject::new(ledger, name)
            .id(0x8A3F, low)
            .prop("Name", Variant::Text(name.into()))
            .prop("Artist", Variant::Text(artist.into()))
            .prop(
                "Album",
                album.map(|a| Variant::Text(a.into())).unwrap_or(Variant::Empty),
            )
            .child("Artworks", collection),
    )
}

/// `members` are the library positions placed in the "Road Trip" playlist.
fn fake_host(track_count: Option<i64>, with_library: bool, members: &[usize]) -> FakeHost {
    let ledger = Arc::new(Ledger::default());
    let tracks = vec![
        track(&ledger, 1, "Name1", "ArtistA", Some("AlbumA"), &[1, 2]),
        track(&ledger, 2, "Name2", "ArtistB", None, &[]),
        track(&ledger, 3, "Name3", "", Some("AlbumC"), &[]),
    ];

    let mut library_tracks = FakeObject::new(&ledger, "library tracks").items(tracks.clone());
    if let Some(count) = track_count {
        library_tracks = library_tracks.prop("Count", Variant::Int(count));
    }
    let library_playlist = Arc::new(
        FakeObject::new(&ledger, "library playlist").child("Tracks", Arc::new(library_tracks)),
    );

    let members = members.iter().map(|&i| tracks[i].clone()).collect();
    let playlist_tracks = Arc::new(FakeObject::new(&ledger, "road trip tracks").items(members));
    let playlist = Arc::new(
        FakeObject::new(&ledger, "Road Trip")
            .id(0, 0xFF)
            .prop("Name", Variant::Text("Road Trip".into()))
            .prop("Shuffle", Variant::Bool(false))
            .child("Tracks", playlist_tracks),
    );
    let playlists = Arc::new(FakeObject::new(&ledger, "playlists").items(vec![playlist.clone()]));
    let source = Arc::new(FakeObject::new(&ledger, "library source").child("Playlists", playlists));

    let mut app = FakeObject::new(&ledger, "application")
        .child("LibrarySource", source)
        .prop("CurrentTrack", Variant::Empty)
        .prop("PlayerState", Variant::Int(1))
        .prop("PlayerPosition", Variant::Int(42))
        .prop("SoundVolume", Variant::Int(35))
        .prop("Mute", Variant::Bool(false));
    app = if with_library {
        app.child("LibraryPlaylist", library_playlist)
    } else {
        app.prop("LibraryPlaylist", Variant::Empty)
    };

    FakeHost {
        ledger,
        app: Arc::new(app),
        playlist,
    }
}

impl FakeHost {
    fn runtime(&self) -> FakeRuntime {
        FakeRuntime {
            app: self.app.clone(),
            initialized: AtomicUsize::new(0),
        }
    }

    fn connect(&self) -> AutomationLibrary {
        AutomationLibrary::connect(&self.runtime(), &AutomationConfig::default()).unwrap()
    }
}

#[test]
fn contract_holds_for_automation_library() {
    let host = fake_host(None, true, &[1]);
    let runtime = Arc::new(host.runtime());
    let session = RuntimeSession::begin(runtime.clone()).unwrap();
    assert_eq!(runtime.initialized.load(Ordering::SeqCst), 1);

    let library =
        AutomationLibrary::connect(session.runtime(), &AutomationConfig::default()).unwrap();
    let expectations = LibraryContractExpectations {
        expected_track_ids: vec![FIRST.into(), SECOND.into(), THIRD.into()],
        lookup_id: SECOND.to_ascii_lowercase(),
        missing_id: "DEADBEEF".into(),
    };
    let result = run_library_contract(&library, &expectations);
    assert!(result.is_ok(), "expected contract to pass: {result:?}");

    library.close();
    assert_eq!(host.ledger.outstanding(), 0);
    drop(session);
    assert_eq!(runtime.initialized.load(Ordering::SeqCst), 0);
}

#[test]
fn tracks_keep_sparse_attributes() {
    let host = fake_host(None, true, &[1]);
    let library = host.connect();
    let tracks = library.tracks().unwrap().into_vec().unwrap();
    let summary: Vec<(&str, &str, &str, &str)> = tracks
        .iter()
        .map(|t| (t.persistent_id().as_str(), t.album(), t.artist(), t.name()))
        .collect();
    assert_eq!(
        summary,
        vec![
            (FIRST, "AlbumA", "ArtistA", "Name1"),
            (SECOND, "", "ArtistB", "Name2"),
            (THIRD, "AlbumC", "", "Name3"),
        ]
    );
    for track in &tracks {
        track.close();
    }
    library.close();
    assert_eq!(host.ledger.outstanding(), 0);
}

#[test]
fn empty_item_ends_enumeration_early() {
    let host = fake_host(Some(5), true, &[1]);
    let library = host.connect();
    let mut tracks = library.tracks().unwrap();
    let ids: Vec<String> = tracks
        .by_ref()
        .map(|t| {
            t.close();
            t.persistent_id().to_string()
        })
        .collect();
    assert_eq!(ids, vec![FIRST, SECOND, THIRD]);
    assert!(tracks.take_error().is_none());
    library.close();
    assert_eq!(host.ledger.outstanding(), 0);
}

#[test]
fn closing_library_stops_running_enumeration() {
    let host = fake_host(None, true, &[1]);
    let library = host.connect();
    let mut tracks = library.tracks().unwrap();
    let first = tracks.next().unwrap();
    first.close();

    library.close();
    assert!(tracks.next().is_none());
    assert!(tracks.take_error().is_none());
    assert!(matches!(library.track_count(), Err(BridgeError::Closed { .. })));
    assert_eq!(host.ledger.outstanding(), 0);
}

#[test]
fn closing_library_stops_playlist_enumeration_before_releasing_application() {
    let host = fake_host(None, true, &[0, 1, 2]);
    let library = host.connect();
    let playlist = library.find_playlist("ff").unwrap();
    let mut tracks = library.playlist_tracks(&playlist).unwrap();
    let first = tracks.next().unwrap();
    assert_eq!(first.persistent_id().as_str(), FIRST);
    first.close();

    library.close();
    assert!(library.handle().is_closed());
    assert!(tracks.next().is_none());
    assert!(matches!(
        tracks.take_error(),
        None | Some(BridgeError::Closed { .. })
    ));
    assert!(matches!(
        library.playlist_track(&playlist, 1),
        Err(BridgeError::Closed { .. })
    ));
    assert_eq!(host.ledger.used_after_release.load(Ordering::SeqCst), 0);

    playlist.close();
    assert_eq!(host.ledger.outstanding(), 0);
}

#[test]
fn artworks_are_children_of_their_track() {
    let host = fake_host(None, true, &[1]);
    let library = host.connect();
    let track = library.find_track(FIRST).unwrap();
    let artworks = library.artworks(&track).unwrap().into_vec().unwrap();
    assert_eq!(artworks.len(), 2);
    assert_eq!(artworks[0].format(), ArtworkFormat::Jpeg);
    assert_eq!(artworks[1].format(), ArtworkFormat::Png);
    assert_eq!(artworks[1].index(), 2);
    assert_eq!(track.handle().pending(), 2);

    let dir = tempfile::tempdir().unwrap();
    let saved = library.save_artwork(&artworks[0], dir.path(), "cover").unwrap();
    assert!(saved.ends_with("cover.jpg"));
    assert_eq!(std::fs::read(&saved).unwrap(), b"image");

    let closer = {
        let handle = track.handle().clone();
        thread::spawn(move || handle.close())
    };
    thread::sleep(Duration::from_millis(50));
    assert!(!track.handle().is_closed());
    for artwork in &artworks {
        artwork.close();
    }
    closer.join().unwrap();
    assert!(track.handle().is_closed());

    library.close();
    assert_eq!(host.ledger.outstanding(), 0);
}

#[test]
fn playlist_operations() {
    let host = fake_host(None, true, &[1]);
    let library = host.connect();

    let playlists = library.playlists().unwrap().into_vec().unwrap();
    assert_eq!(playlists.len(), 1);
    assert_eq!(playlists[0].name(), "Road Trip");
    assert_eq!(playlists[0].persistent_id().as_str(), "00000000000000FF");
    playlists[0].close();

    let playlist = library.find_playlist("ff").unwrap();
    assert_eq!(library.playlist_track_count(&playlist).unwrap(), 1);

    let tracks = library.playlist_tracks(&playlist).unwrap().into_vec().unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].persistent_id().as_str(), SECOND);
    tracks[0].close();

    let second = library.playlist_track(&playlist, 0).unwrap();
    assert_eq!(second.name(), "Name2");
    second.close();
    assert!(library.playlist_track(&playlist, 5).unwrap_err().is_not_found());

    assert!(!library.shuffle(&playlist).unwrap());
    library.set_shuffle(&playlist, true).unwrap();
    assert!(library.shuffle(&playlist).unwrap());

    let first = library.find_track(FIRST).unwrap();
    let added = library.add_to_playlist(&playlist, &first).unwrap();
    assert_eq!(added.persistent_id().as_str(), FIRST);
    added.close();
    first.close();

    library.play_playlist(&playlist).unwrap();
    library.delete_playlist(&playlist).unwrap();
    assert_eq!(host.playlist.calls(), vec!["AddTrack", "PlayFirstTrack", "Delete"]);
    playlist.close();

    assert!(library.find_playlist("DEADBEEF").unwrap_err().is_not_found());
    library.close();
    assert_eq!(host.ledger.outstanding(), 0);
}

#[test]
fn player_controls_reach_application_object() {
    let host = fake_host(None, true, &[1]);
    let library = host.connect();

    assert_eq!(library.player_state().unwrap(), PlayerState::Playing);
    assert_eq!(library.player_position().unwrap(), Duration::from_secs(42));
    assert_eq!(library.sound_volume().unwrap(), 35);
    assert!(library.current_track().unwrap().is_none());

    assert!(matches!(
        library.set_sound_volume(150),
        Err(BridgeError::InvalidArgument { .. })
    ));
    assert_eq!(library.sound_volume().unwrap(), 35);
    library.set_sound_volume(60).unwrap();
    assert_eq!(library.sound_volume().unwrap(), 60);

    library.set_muted(true).unwrap();
    assert!(library.is_muted().unwrap());
    library.set_player_position(Duration::from_millis(90_500)).unwrap();
    assert_eq!(library.player_position().unwrap(), Duration::from_secs(90));

    library.play().unwrap();
    library.next_track().unwrap();
    library.play_pause().unwrap();
    assert_eq!(host.app.calls(), vec!["Play", "NextTrack", "PlayPause"]);

    library.close();
    assert!(matches!(library.play(), Err(BridgeError::Closed { .. })));
    assert_eq!(host.ledger.outstanding(), 0);
}

#[test]
fn failed_connect_releases_application() {
    let host = fake_host(None, false, &[1]);
    let err = AutomationLibrary::connect(&host.runtime(), &AutomationConfig::default())
        .err()
        .unwrap();
    assert!(err.is_not_found(), "{err:?}");
    assert_eq!(host.ledger.outstanding(), 0);

    let config = AutomationConfig {
        prog_id: "Music.Application".into(),
    };
    assert!(AutomationLibrary::connect(&host.runtime(), &config).is_err());
}
