pub mod cancel;
pub mod codec;
pub mod config;
pub mod contract;
pub mod error;
pub mod handle;
pub mod library;
pub mod logging;
pub mod models;
pub mod paths;
pub mod sequence;

pub use cancel::CancelToken;
pub use codec::{decode, encode, encode_field, Record};
pub use config::{
    AutomationConfig, Config, ConfigError, LogLevel, LoggingConfig, ScriptTransportConfig,
    ValidationError,
};
pub use contract::{run_library_contract, LibraryContractError, LibraryContractExpectations};
pub use error::{BridgeError, BridgeResult};
pub use handle::{Handle, OperationGuard, Resource};
pub use library::{artwork_path, Library, Player};
pub use logging::{init_logging, LoggingError, LoggingGuard};
pub use models::{
    position_from_seconds, Artwork, ArtworkFormat, ArtworkInfo, PersistentId, PlayerState,
    Playlist, PlaylistInfo, Track, TrackInfo, Volume, PERSISTENT_ID_DIGITS,
};
pub use paths::{AppDirs, DirsError};
pub use sequence::{Close, Emitter, Sequence};

pub const APP_NAME: &str = "tunebridge";
pub const APP_AUTHOR: &str = "Tunebridge";
pub const APP_QUALIFIER: &str = "io";
