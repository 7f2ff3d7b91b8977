//! C11 — text emitters (spec §4.11): each backend exposes `generate(module)
//! -> String`. [`nzsl`] round-trips a resolved module back to source form
//! (modulo whitespace); [`glsl`] and [`wgsl`] transform the AST to match
//! their respective target restrictions.

mod common;

pub mod glsl;
pub mod nzsl;
pub mod wgsl;
