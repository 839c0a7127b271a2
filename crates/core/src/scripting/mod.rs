//! Sandboxed execution of synthesized scene scripts.
//!
//! Provides the [`executor::SceneRenderer`] seam, the shared subprocess
//! runner and the Blender-backed implementation. Nothing here touches the
//! job store; callers pass a cancellation token and receive structured
//! output or a [`executor::ScriptError`].

pub mod blender;
pub mod executor;
pub mod subprocess;
