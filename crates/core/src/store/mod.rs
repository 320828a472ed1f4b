//! Cache store ports
//!
//! The relational mirror of the CRM is reached exclusively through these
//! traits. The sync executor is the only writer; everything else reads.

pub mod ports;

pub use ports::{
    DealFilter, DealRepository, NoteRepository, PipelineRepository, StageRepository,
    SyncStateRepository,
};
