//! Multi-vendor map session with a synchronized view and a ground-view bridge.
//!
//! A host page shows several map surfaces (a primary map, a mini map, any
//! mirrors), each backed by a different vendor integration. This crate keeps
//! them on one shared view, opens ground-level panoramas with a heading
//! indicator on the mini map, and runs distance/area measurement on the
//! primary map. Vendor SDKs sit behind [`backend::MapBackend`]; the host
//! forwards their events by calling [`session::MapSession::pump`].
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`session`] | [`session::MapSession`]: routing, commands, backend swaps |
//! | [`sync`] | Canonical view state and echo suppression across surfaces |
//! | [`ground`] | Ground-view lifecycle, marker and heading indicator |
//! | [`measure`] | Distance and area measurement state machine |
//! | [`layers`] | Boundary and route overlays from external services |
//! | [`backend`] | Vendor contract, handles, readiness loader, simulated backend |
//! | [`view`] | Neutral view state and per-vendor zoom scales |
//! | [`geo`] | Geodesic distance, area, pixel radius and label formatting |
//! | [`timers`] | Clock abstraction and the deferred-task queue |
//! | [`config`] | Environment-driven session configuration |
//! | [`error`] | Error types and stable codes |
//! | [`consts`] | Default tunables |

pub mod backend;
pub mod config;
pub mod consts;
pub mod error;
pub mod geo;
pub mod ground;
pub mod layers;
pub mod measure;
pub mod session;
pub mod sync;
pub mod timers;
pub mod view;

pub use config::SessionConfig;
pub use error::{ErrorCode, MapError};
pub use session::{Command, MapSession, SessionEvent};
