//! Concrete protocol implementations (C4–C6): the core `wayland` protocol
//! plus the five extension protocols named in the spec.
//!
//! Each proxy type is a hand-written struct embedding
//! [`crate::interface::ProxyCore`] with an explicit, enumerable opcode
//! dispatch — matching the *shape* of `wayland-backend`'s
//! interface/`ObjectData` split without adopting its XML/scanner code
//! generation, per DESIGN.md.

pub mod cosmic_workspace;
pub mod data_control;
pub mod foreign_toplevel;
pub mod idle_notify;
pub mod virtual_keyboard;
pub mod wayland;
