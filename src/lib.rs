//! Convex-hydro advances hyperbolic systems of conservation laws, like the
//! Euler equations of gas dynamics or the shallow water equations over
//! topography, by explicit steps on an unstructured connectivity graph. Each
//! step blends a low-order graph-viscosity update, which stays inside the
//! invariant domain of the system, with a high-order update through convex
//! limiting, so the result respects local bounds on density, depth and
//! entropy. Stages run data-parallel on a rayon pool and can be distributed
//! over several ranks through a message-passing `Communicator`.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod hydro;
pub mod hyperbolic_module;
pub mod meshing;
pub mod message;
pub mod newton;
pub mod offline_data;
pub mod state;
pub mod storage;
pub mod system;
pub mod thread_pool;

pub use error::{Error, Result};
