// Test doubles for the core traits. Compiled for tests only.

pub mod in_memory;

pub use in_memory::{
    InMemoryDocuments, InMemoryDrive, InMemoryHistory, InMemoryMailer, InMemorySettings,
    InMemorySheet,
};
