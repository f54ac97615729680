//! Form lifecycle state machine.
//!
//! A form starts in `Draft`, is submitted by the school, and is then either
//! approved (terminal) or returned for rework. `Returned -> Submitted` is the
//! only cycle. Archival is record removal, not a status value.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormStatus {
    Draft,
    Submitted,
    Returned,
    Approved,
}

impl fmt::Display for FormStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FormStatus::Draft => "DRAFT",
            FormStatus::Submitted => "SUBMITTED",
            FormStatus::Returned => "RETURNED",
            FormStatus::Approved => "APPROVED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Form cannot be submitted while {0}")]
    SubmitNotAllowed(FormStatus),
    #[error("Only submitted forms can be approved")]
    ApproveNotAllowed(FormStatus),
    #[error("Only submitted forms can be returned")]
    ReturnNotAllowed(FormStatus),
    #[error("Cannot modify entries in submitted or approved forms")]
    EntriesLocked(FormStatus),
}

impl FormStatus {
    /// Entry create/update/delete are legal only while the school still
    /// holds the form.
    pub fn allows_entry_mutation(self) -> bool {
        matches!(self, FormStatus::Draft | FormStatus::Returned)
    }

    pub fn submit(self) -> Result<FormStatus, LifecycleError> {
        match self {
            FormStatus::Draft | FormStatus::Returned => Ok(FormStatus::Submitted),
            other => Err(LifecycleError::SubmitNotAllowed(other)),
        }
    }

    pub fn approve(self) -> Result<FormStatus, LifecycleError> {
        match self {
            FormStatus::Submitted => Ok(FormStatus::Approved),
            other => Err(LifecycleError::ApproveNotAllowed(other)),
        }
    }

    pub fn return_to_school(self) -> Result<FormStatus, LifecycleError> {
        match self {
            FormStatus::Submitted => Ok(FormStatus::Returned),
            other => Err(LifecycleError::ReturnNotAllowed(other)),
        }
    }
}
