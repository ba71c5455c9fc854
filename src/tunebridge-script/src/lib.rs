//! Subprocess transport for Tunebridge.
//!
//! This crate provides:
//! - A runner that feeds scripts to an external interpreter (`osascript` by
//!   default) and reads the line protocol back from its stderr
//! - The default script vocabulary for the iTunes scripting dictionary
//! - A [`ScriptLibrary`] that implements `Library` and `Player` on top of both
//!
//! # Wire protocol
//!
//! The interpreter reports each result on its own line:
//!
//! ```text
//! !<field0>,<field1>,...     success, fields percent-escaped
//! <anything else>            host error message
//! <blank>                    ignored
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use tunebridge_core::{Config, Library};
//! use tunebridge_script::ScriptLibrary;
//!
//! let config = Config::default();
//! let library = ScriptLibrary::from_config(&config.script);
//! for track in library.tracks()? {
//!     println!("{} - {}", track.artist(), track.name());
//!     track.close();
//! }
//! library.close();
//! ```

mod library;
mod runner;
pub mod scripts;

pub use library::ScriptLibrary;
pub use runner::{InterpreterConfig, ScriptError, ScriptRunner};
pub use scripts::{Dialect, Script, ScriptOp, ScriptSet, ScriptTemplate, ScriptValue};
