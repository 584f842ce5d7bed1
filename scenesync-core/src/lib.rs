//! # scenesync-core: Scene model and operation pipeline
//!
//! Everything that touches scene state lives here; networking lives in
//! `scenesync-collab`.
//!
//! ```text
//! LocalAction ──Encoder──► Operation ──JSON──► Operation
//!                                                 │
//!                                   Transformer (server only)
//!                                                 │
//!                                    FocusManager::apply_isolated
//!                                                 │
//!                                          codec::apply ──► Scene
//! ```
//!
//! ## Modules
//!
//! - [`scene`]: Scene capability traits and the in-memory `MemoryScene`
//! - [`mesh`]: Mesh storage, element selection, primitive templates
//! - [`operation`]: The canonical `Operation` record
//! - [`codec`]: Encoder (with dedup and delete fallback) and `apply`
//! - [`transform`]: Creation-name collision rewrite
//! - [`focus`]: Selection save/restore around remote operations

pub mod codec;
pub mod error;
pub mod focus;
pub mod geometry;
pub mod mesh;
pub mod naming;
pub mod operation;
pub mod scene;
pub mod transform;

// Re-exports for convenience
pub use codec::{apply, Encoder, LocalAction, SelectionSnapshot};
pub use error::{OperationError, SceneError};
pub use focus::{FocusLayer, FocusManager, FocusSnapshot};
pub use geometry::{AxisMask, Quat, Vec3};
pub use mesh::{ElementClass, ElementSelection, Mesh, PrimitiveShape};
pub use operation::{ElementTargets, Operation, OperationKind};
pub use scene::{DeleteScope, EditMode, Entity, Granularity, MemoryScene, Scene, SceneQuery};
pub use transform::Transformer;
