//! Deterministic collaborators for exercising agents without an emulator, a real network or a database.

pub mod recording_telemetry;
