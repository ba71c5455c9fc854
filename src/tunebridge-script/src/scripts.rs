//! Script vocabulary for the subprocess transport.
//!
//! A [`ScriptSet`] maps every library operation to a [`ScriptTemplate`] in one
//! of two dialects. Templates name their inputs with `{name}` placeholders,
//! which are filled with dialect literals built from [`ScriptValue`]s, so
//! caller data never reaches the interpreter as raw script text.

use std::collections::BTreeMap;
use std::fmt;
use tunebridge_core::{encode_field, BridgeError, BridgeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    JavaScript,
    AppleScript,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::JavaScript => f.write_str("javascript"),
            Dialect::AppleScript => f.write_str("applescript"),
        }
    }
}

/// A complete program ready to be written to the interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub dialect: Dialect,
    pub text: String,
}

impl Script {
    pub fn new(dialect: Dialect, text: impl Into<String>) -> Self {
        Self {
            dialect,
            text: text.into(),
        }
    }
}

/// A parameter value substituted into a template.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ScriptValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Render as a literal of `dialect`.
    pub fn literal(&self, dialect: Dialect) -> BridgeResult<String> {
        match self {
            ScriptValue::Text(text) => Ok(match dialect {
                Dialect::JavaScript => format!("decodeURIComponent(\"{}\")", encode_field(text)),
                Dialect::AppleScript => quote_applescript(text),
            }),
            ScriptValue::Int(value) => Ok(value.to_string()),
            ScriptValue::Float(value) if value.is_finite() => Ok(value.to_string()),
            ScriptValue::Float(value) => Err(BridgeError::invalid_argument(format!(
                "{value} cannot be passed to a script"
            ))),
            ScriptValue::Bool(value) => Ok(value.to_string()),
        }
    }
}

fn quote_applescript(text: &str) -> String {
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for ch in text.chars() {
        match ch {
            '\\' => quoted.push_str("\\\\"),
            '"' => quoted.push_str("\\\""),
            other => quoted.push(other),
        }
    }
    quoted.push('"');
    quoted
}

/// Operation body in one dialect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptTemplate {
    dialect: Dialect,
    body: String,
}

impl ScriptTemplate {
    pub fn new(dialect: Dialect, body: impl Into<String>) -> Self {
        Self {
            dialect,
            body: body.into(),
        }
    }

    pub fn javascript(body: impl Into<String>) -> Self {
        Self::new(Dialect::JavaScript, body)
    }

    pub fn applescript(body: impl Into<String>) -> Self {
        Self::new(Dialect::AppleScript, body)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Substitute `{name}` placeholders. Braces that do not enclose a plain
    /// identifier are copied through untouched.
    pub fn render(&self, params: &[(&str, ScriptValue)]) -> BridgeResult<String> {
        let body = self.body.as_str();
        let mut out = String::with_capacity(body.len());
        let mut rest = body;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match placeholder(after) {
                Some(name) => {
                    let value = params
                        .iter()
                        .find(|(key, _)| *key == name)
                        .map(|(_, value)| value)
                        .ok_or_else(|| {
                            BridgeError::invalid_argument(format!(
                                "script template needs a value for {{{name}}}"
                            ))
                        })?;
                    out.push_str(&value.literal(self.dialect)?);
                    rest = &after[name.len() + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn placeholder(text: &str) -> Option<&str> {
    let end = text.find('}')?;
    let name = &text[..end];
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(name)
    } else {
        None
    }
}

/// Every operation the subprocess library can ask the host to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScriptOp {
    CurrentTrack,
    TrackCount,
    Tracks,
    TrackAt,
    FindTrack,
    PlayTrack,
    Artworks,
    SaveArtwork,
    Playlists,
    FindPlaylist,
    PlaylistTrackCount,
    PlaylistTracks,
    PlaylistTrackAt,
    PlayPlaylist,
    AddToPlaylist,
    DeletePlaylist,
    Play,
    Pause,
    Stop,
    PlayPause,
    Resume,
    BackTrack,
    PreviousTrack,
    NextTrack,
    FastForward,
    Rewind,
    PlayerState,
    PlayerPosition,
    SetPlayerPosition,
    SoundVolume,
    SetSoundVolume,
    Mute,
    SetMute,
}

/// Preludes plus one template per operation.
#[derive(Debug, Clone, Default)]
pub struct ScriptSet {
    javascript_prelude: String,
    applescript_prelude: String,
    templates: BTreeMap<ScriptOp, ScriptTemplate>,
}

impl ScriptSet {
    /// A set with the given preludes and no operations.
    pub fn new(javascript_prelude: impl Into<String>, applescript_prelude: impl Into<String>) -> Self {
        Self {
            javascript_prelude: javascript_prelude.into(),
            applescript_prelude: applescript_prelude.into(),
            templates: BTreeMap::new(),
        }
    }

    pub fn with_template(mut self, op: ScriptOp, template: ScriptTemplate) -> Self {
        self.templates.insert(op, template);
        self
    }

    pub fn template(&self, op: ScriptOp) -> Option<&ScriptTemplate> {
        self.templates.get(&op)
    }

    /// Build the full program for `op`: dialect prelude followed by the
    /// rendered body.
    pub fn script(&self, op: ScriptOp, params: &[(&str, ScriptValue)]) -> BridgeResult<Script> {
        let template = self
            .templates
            .get(&op)
            .ok_or_else(|| BridgeError::unsupported(format!("{op:?}")))?;
        let body = template.render(params)?;
        let prelude = match template.dialect() {
            Dialect::JavaScript => &self.javascript_prelude,
            Dialect::AppleScript => &self.applescript_prelude,
        };
        let mut text = String::with_capacity(prelude.len() + body.len() + 1);
        text.push_str(prelude);
        if !prelude.is_empty() && !prelude.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&body);
        text.push('\n');
        Ok(Script::new(template.dialect(), text))
    }

    /// Vocabulary for the iTunes scripting dictionary through `osascript`.
    pub fn itunes() -> Self {
        use ScriptOp::*;

        let set = Self::new(ITUNES_JAVASCRIPT_PRELUDE, ITUNES_APPLESCRIPT_PRELUDE);
        let js = [
            (CurrentTrack, "logTrack(currentTrack());"),
            (TrackCount, "p(app.tracks.length);"),
            (Tracks, "app.tracks().forEach(logTrack);"),
            (TrackAt, "logTrack(trackAt(app.tracks(), {index}));"),
            (FindTrack, "logTrack(findTrackByPersistentId({id}));"),
            (Playlists, "app.playlists().forEach(logPlaylist);"),
            (FindPlaylist, "logPlaylist(findPlaylistByPersistentId({id}));"),
            (
                PlaylistTrackCount,
                "var pl = findPlaylistByPersistentId({id});\nif (pl != null) p(pl.tracks.length);",
            ),
            (
                PlaylistTracks,
                "var pl = findPlaylistByPersistentId({id});\nif (pl != null) pl.tracks().forEach(logTrack);",
            ),
            (
                PlaylistTrackAt,
                "var pl = findPlaylistByPersistentId({id});\nif (pl != null) logTrack(trackAt(pl.tracks(), {index}));",
            ),
            (PlayPlaylist, "app.play(requirePlaylist({id}));"),
            (DeletePlaylist, "requirePlaylist({id}).delete();"),
            (Play, "app.play();"),
            (Pause, "app.pause();"),
            (Stop, "app.stop();"),
            (PlayPause, "app.playpause();"),
            (Resume, "app.resume();"),
            (BackTrack, "app.backTrack();"),
            (PreviousTrack, "app.previousTrack();"),
            (NextTrack, "app.nextTrack();"),
            (FastForward, "app.fastForward();"),
            (Rewind, "app.rewind();"),
            (PlayerState, "p(app.playerState());"),
            (PlayerPosition, "p(app.playerPosition());"),
            (SetPlayerPosition, "app.playerPosition = {seconds};"),
            (SoundVolume, "p(app.soundVolume());"),
            (SetSoundVolume, "app.soundVolume = {volume};"),
            (Mute, "p(app.mute());"),
            (SetMute, "app.mute = {muted};"),
        ];
        let applescript = [
            (PlayTrack, ITUNES_PLAY_TRACK),
            (Artworks, ITUNES_ARTWORKS),
            (SaveArtwork, "SaveArtworkToFile({id}, {index}, {path}) of me"),
            (AddToPlaylist, "P(AddTrackToPlaylist({track_id}, {playlist_id}) of me) of me"),
        ];

        let set = js.into_iter().fold(set, |set, (op, body)| {
            set.with_template(op, ScriptTemplate::javascript(body))
        });
        applescript.into_iter().fold(set, |set, (op, body)| {
            set.with_template(op, ScriptTemplate::applescript(body))
        })
    }
}

const ITUNES_JAVASCRIPT_PRELUDE: &str = r#"var app = Application("iTunes");

function p() {
    var fields = Array.prototype.slice.call(arguments);
    console.log("!" + fields.map(function (f) { return encodeURIComponent(String(f)); }).join(","));
}

function logTrack(track) {
    if (track != null) {
        p(track.persistentID(), track.album(), track.artist(), track.name());
    }
}

function logPlaylist(playlist) {
    if (playlist != null) {
        p(playlist.persistentID(), playlist.name());
    }
}

function currentTrack() {
    try {
        var track = app.currentTrack();
        track.persistentID();
        return track;
    } catch (e) {
        return null;
    }
}

function trackAt(tracks, index) {
    return index < tracks.length ? tracks[index] : null;
}

function findTrackByPersistentId(persistentId) {
    var index = app.tracks.persistentID().indexOf(persistentId);
    return index < 0 ? null : app.tracks[index];
}

function findPlaylistByPersistentId(persistentId) {
    var index = app.playlists.persistentID().indexOf(persistentId);
    return index < 0 ? null : app.playlists[index];
}

function requirePlaylist(persistentId) {
    var playlist = findPlaylistByPersistentId(persistentId);
    if (playlist == null) {
        throw new Error("playlist not found: " + persistentId);
    }
    return playlist;
}
"#;

const ITUNES_APPLESCRIPT_PRELUDE: &str = r#"on P(o)
    log "!" & o
end P

on FindTrackByPersistentID(persistentID)
    tell application "iTunes"
        try
            return some track whose persistent ID is persistentID
        on error
            return null
        end try
    end tell
end FindTrackByPersistentID

on FindPlaylistByPersistentID(persistentID)
    tell application "iTunes"
        try
            return some playlist whose persistent ID is persistentID
        on error
            return null
        end try
    end tell
end FindPlaylistByPersistentID

on SaveArtworkToFile(persistentID, artworkIndex, filePath)
    set fp to POSIX file filePath
    tell application "iTunes"
        set t to FindTrackByPersistentID(persistentID) of me
        if t is null then error "track not found: " & persistentID
        set d to raw data of artwork artworkIndex of t
    end tell
    set f to open for access fp with write permission
    set eof f to 0
    write d to f
    close access f
end SaveArtworkToFile

on AddTrackToPlaylist(trackID, playlistID)
    tell application "iTunes"
        set t to FindTrackByPersistentID(trackID) of me
        if t is null then error "track not found: " & trackID
        set pl to FindPlaylistByPersistentID(playlistID) of me
        if pl is null then error "playlist not found: " & playlistID
        set added to duplicate t to pl
        return persistent ID of added
    end tell
end AddTrackToPlaylist
"#;

const ITUNES_PLAY_TRACK: &str = r#"tell application "iTunes"
    set t to FindTrackByPersistentID({id}) of me
    if t is null then error "track not found: " & {id}
    play t
end tell"#;

const ITUNES_ARTWORKS: &str = r#"tell application "iTunes"
    set t to FindTrackByPersistentID({id}) of me
    if t is not null then
        repeat with a in artworks of t
            P(format of a as text) of me
        end repeat
    end if
end tell"#;
