pub mod delete;
pub mod organize;

pub use delete::{
    delete_selected, Completion, DeleteOptions, DeleteReport, DeleteRequest, DeletionStatus,
    GroupOutcome, GroupSelection, SelectionEntry,
};
pub use organize::{organize_files, MovedFile, OrganizeReport};
