//! Backup and project records: document model, field encryption flows, and
//! the integrity state evaluator.

pub mod integrity;
pub mod metadata;
pub mod project;
pub mod record;

pub use integrity::{
    IntegrityFinding, evaluate_backup, evaluate_backup_with_transfer, evaluate_shared_backup,
    evaluate_shared_backup_with_transfer,
};
pub use metadata::DecryptedMetadata;
pub use project::{DecryptedProject, ProjectDocument};
pub use record::{BackupDocument, BackupRecord, FieldStatus, StoredField};
