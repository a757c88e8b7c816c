//! Domain services used by the websocket route.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the cross-component orchestration — which chunks an
//! operation touches, who hears about it, what happens on join and leave —
//! so the route handler stays focused on transport concerns and dispatch.

pub mod canvas;
pub mod persistence;
pub mod rooms;
pub mod spaces;
