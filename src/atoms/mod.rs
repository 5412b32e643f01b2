// ── Gateway Atoms Layer ─────────────────────────────────────────────────────
// Pure constants, error types, data model and trait definitions — zero side
// effects, no I/O.
// Dependency rule: atoms may only depend on std and external pure crates.
// Nothing here may import from config/, store/, webhook/, or main.rs.

pub mod constants;
pub mod error;
pub mod traits;
pub mod types;
