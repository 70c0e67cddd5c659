//! Data types shared by the builder, matcher and command line

/// Match results, prompt guesses and build reports.
pub mod matches;
/// The persisted name → embedding store.
pub mod store;
