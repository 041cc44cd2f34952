//! Cordon - Conflict Enforcement for Community Moderation
//!
//! Enforces temporary no-contact orders ("conflicts") between two parties of
//! a community: contact attempts are warned, then removed and escalated into
//! reversible privilege removal, voice proximity is locked out for a while,
//! and unauthorized reversal of enforcement is undone.
//!
//! Key principles:
//! - Every mutation is recorded before it is relied on, and is reversible
//! - Conflict records are deleted only after full reversal
//! - The platform is a collaborator behind [`platform::PlatformClient`]

pub mod config;
pub mod conflict;
pub mod enforcement;
pub mod platform;
pub mod serialization;
