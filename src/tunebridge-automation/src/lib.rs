//! Object-model transport for Tunebridge.
//!
//! Hosts that publish a late-bound object model (a COM-style `iTunes.Application`
//! object, for example) are driven through the [`AutomationObject`] interface.
//! A platform binding supplies an [`AutomationRuntime`]; everything above it is
//! platform independent.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tunebridge_automation::{AutomationLibrary, RuntimeSession};
//! use tunebridge_core::{Config, Library};
//!
//! let session = RuntimeSession::begin(Arc::new(platform_runtime()))?;
//! let library = AutomationLibrary::connect(session.runtime(), &Config::default().automation)?;
//! println!("{} tracks", library.track_count()?);
//! library.close();
//! ```

mod library;
mod object;
mod runtime;

pub use library::AutomationLibrary;
pub use object::{AutomationObject, Variant};
pub use runtime::{AutomationRuntime, RuntimeSession};
