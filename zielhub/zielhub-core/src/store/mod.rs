//! Persistent store for target-agreement forms, their entries, and the
//! notifications produced by lifecycle transitions.
//!
//! Records are stored individually on disk as JSON and loaded at startup:
//! one file per form (form plus its entries) under `forms/`, one per
//! notification under `notifications/`. The access-code lookup index is
//! rebuilt from the form files on load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::{code_digest, code_matches, generate_access_code};
use crate::lifecycle::{FormStatus, LifecycleError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Superadmin,
}

/// Half of a school year, serialized as "1" / "2" on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HalfYear {
    #[serde(rename = "1")]
    First,
    #[serde(rename = "2")]
    Second,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Form {
    pub id: Uuid,
    pub school_name: String,
    pub owner: Option<Uuid>,
    pub status: FormStatus,
    /// Digest of the normalized access code. The plaintext code is returned
    /// once at creation and never stored.
    pub code_digest: String,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub review_comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Uuid,
    pub form_id: Uuid,
    pub title: String,
    pub massnahmen: String,
    pub indikatoren: String,
    pub start_year: Option<i32>,
    pub start_half: Option<HalfYear>,
    pub end_year: Option<i32>,
    pub end_half: Option<HalfYear>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial entry payload. Absent keys leave the stored field untouched;
/// present keys replace it wholesale. Used for both create and update, which
/// is what lets the autosave client send the same shape before and after
/// identity promotion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub massnahmen: Option<String>,
    pub indikatoren: Option<String>,
    pub start_year: Option<i32>,
    pub start_half: Option<HalfYear>,
    pub end_year: Option<i32>,
    pub end_half: Option<HalfYear>,
}

impl Entry {
    fn apply(&mut self, patch: EntryPatch, now: DateTime<Utc>) {
        if let Some(v) = patch.title {
            self.title = v;
        }
        if let Some(v) = patch.massnahmen {
            self.massnahmen = v;
        }
        if let Some(v) = patch.indikatoren {
            self.indikatoren = v;
        }
        if let Some(v) = patch.start_year {
            self.start_year = Some(v);
        }
        if let Some(v) = patch.start_half {
            self.start_half = Some(v);
        }
        if let Some(v) = patch.end_year {
            self.end_year = Some(v);
        }
        if let Some(v) = patch.end_half {
            self.end_half = Some(v);
        }
        self.updated_at = now;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationTarget {
    Authority,
    School,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Submitted,
    Approved,
    Returned,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub form_id: Uuid,
    pub target: NotificationTarget,
    pub kind: NotificationKind,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Form not found")]
    FormNotFound,
    #[error("Entry not found")]
    EntryNotFound,
    #[error("Notification not found")]
    NotificationNotFound,
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("storage I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct FormRecord {
    form: Form,
    entries: Vec<Entry>,
}

pub struct FormStore {
    dir: PathBuf,
    forms: HashMap<Uuid, Form>,
    entries: HashMap<Uuid, Entry>,
    /// code digest -> form id
    code_index: HashMap<String, Uuid>,
    notifications: HashMap<Uuid, Notification>,
}

impl FormStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join("forms"))?;
        fs::create_dir_all(dir.join("notifications"))?;

        let mut store = Self {
            dir,
            forms: HashMap::new(),
            entries: HashMap::new(),
            code_index: HashMap::new(),
            notifications: HashMap::new(),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&mut self) -> Result<(), StoreError> {
        for dirent in fs::read_dir(self.dir.join("forms"))? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record: FormRecord = serde_json::from_slice(&fs::read(&path)?)?;
            self.code_index
                .insert(record.form.code_digest.clone(), record.form.id);
            for entry in record.entries {
                self.entries.insert(entry.id, entry);
            }
            self.forms.insert(record.form.id, record.form);
        }
        for dirent in fs::read_dir(self.dir.join("notifications"))? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let notification: Notification = serde_json::from_slice(&fs::read(&path)?)?;
            self.notifications.insert(notification.id, notification);
        }
        Ok(())
    }

    fn form_path(&self, id: Uuid) -> PathBuf {
        self.dir.join("forms").join(format!("{id}.json"))
    }

    fn notification_path(&self, id: Uuid) -> PathBuf {
        self.dir.join("notifications").join(format!("{id}.json"))
    }

    fn save_form(&self, id: Uuid) -> Result<(), StoreError> {
        let form = self.forms.get(&id).ok_or(StoreError::FormNotFound)?;
        let record = FormRecord {
            form: form.clone(),
            entries: self.entries_for(id),
        };
        fs::write(self.form_path(id), serde_json::to_vec_pretty(&record)?)?;
        Ok(())
    }

    fn save_notification(&self, id: Uuid) -> Result<(), StoreError> {
        let notification = self
            .notifications
            .get(&id)
            .ok_or(StoreError::NotificationNotFound)?;
        fs::write(
            self.notification_path(id),
            serde_json::to_vec_pretty(notification)?,
        )?;
        Ok(())
    }

    /// Create a form owned by the given principal. Returns the form together
    /// with the plaintext access code; this is the only time the plaintext
    /// exists outside the caller.
    pub fn create_form(
        &mut self,
        school_name: String,
        owner: Uuid,
    ) -> Result<(Form, String), StoreError> {
        let (code, digest) = loop {
            let code = generate_access_code();
            let digest = code_digest(&code);
            if !self.code_index.contains_key(&digest) {
                break (code, digest);
            }
        };
        let form = Form {
            id: Uuid::new_v4(),
            school_name,
            owner: Some(owner),
            status: FormStatus::Draft,
            code_digest: digest.clone(),
            submitted_at: None,
            approved_at: None,
            review_comment: None,
            created_at: Utc::now(),
        };
        let id = form.id;
        self.code_index.insert(digest, id);
        self.forms.insert(id, form.clone());
        self.save_form(id)?;
        Ok((form, code))
    }

    pub fn form(&self, id: Uuid) -> Option<&Form> {
        self.forms.get(&id)
    }

    /// Resolve a presented access code to its bound form. Malformed and
    /// wrong codes are indistinguishable: both miss the digest index. The
    /// index is only a lookup accelerator; the record's own digest is the
    /// authoritative comparison.
    pub fn form_by_code(&self, candidate: &str) -> Option<&Form> {
        let id = self.code_index.get(&code_digest(candidate))?;
        let form = self.forms.get(id)?;
        code_matches(candidate, &form.code_digest).then_some(form)
    }

    pub fn forms_owned_by(&self, owner: Uuid) -> Vec<Form> {
        let mut forms: Vec<Form> = self
            .forms
            .values()
            .filter(|f| f.owner == Some(owner))
            .cloned()
            .collect();
        forms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        forms
    }

    /// Remove a form with its entries and notifications. This is the
    /// out-of-band archival path and is legal in any status.
    pub fn delete_form(&mut self, id: Uuid) -> Result<(), StoreError> {
        let form = self.forms.remove(&id).ok_or(StoreError::FormNotFound)?;
        self.code_index.remove(&form.code_digest);
        self.entries.retain(|_, e| e.form_id != id);

        let orphaned: Vec<Uuid> = self
            .notifications
            .values()
            .filter(|n| n.form_id == id)
            .map(|n| n.id)
            .collect();
        for nid in &orphaned {
            self.notifications.remove(nid);
            let path = self.notification_path(*nid);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }

        let path = self.form_path(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn gate_entry_mutation(&self, form_id: Uuid) -> Result<(), StoreError> {
        let form = self.forms.get(&form_id).ok_or(StoreError::FormNotFound)?;
        if !form.status.allows_entry_mutation() {
            return Err(LifecycleError::EntriesLocked(form.status).into());
        }
        Ok(())
    }

    pub fn entry(&self, id: Uuid) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn entries_for(&self, form_id: Uuid) -> Vec<Entry> {
        let mut entries: Vec<Entry> = self
            .entries
            .values()
            .filter(|e| e.form_id == form_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        entries
    }

    /// Create an entry in the given form. The status gate runs after the
    /// caller's authorization but before any record is written.
    pub fn create_entry(&mut self, form_id: Uuid, patch: EntryPatch) -> Result<Entry, StoreError> {
        self.gate_entry_mutation(form_id)?;
        let now = Utc::now();
        let mut entry = Entry {
            id: Uuid::new_v4(),
            form_id,
            title: String::new(),
            massnahmen: String::new(),
            indikatoren: String::new(),
            start_year: None,
            start_half: None,
            end_year: None,
            end_half: None,
            created_at: now,
            updated_at: now,
        };
        entry.apply(patch, now);
        self.entries.insert(entry.id, entry.clone());
        self.save_form(form_id)?;
        Ok(entry)
    }

    /// Update an entry through the credential channel bound to `form_id`.
    /// An unknown id and an entry belonging to a different form are the same
    /// failure from the caller's point of view.
    pub fn update_entry(
        &mut self,
        entry_id: Uuid,
        form_id: Uuid,
        patch: EntryPatch,
    ) -> Result<Entry, StoreError> {
        match self.entries.get(&entry_id) {
            Some(entry) if entry.form_id == form_id => {}
            _ => return Err(StoreError::EntryNotFound),
        }
        self.gate_entry_mutation(form_id)?;
        let entry = self
            .entries
            .get_mut(&entry_id)
            .ok_or(StoreError::EntryNotFound)?;
        entry.apply(patch, Utc::now());
        let updated = entry.clone();
        self.save_form(form_id)?;
        Ok(updated)
    }

    pub fn delete_entry(&mut self, entry_id: Uuid, form_id: Uuid) -> Result<(), StoreError> {
        match self.entries.get(&entry_id) {
            Some(entry) if entry.form_id == form_id => {}
            _ => return Err(StoreError::EntryNotFound),
        }
        self.gate_entry_mutation(form_id)?;
        self.entries.remove(&entry_id);
        self.save_form(form_id)?;
        Ok(())
    }

    fn push_notification(
        &mut self,
        form_id: Uuid,
        target: NotificationTarget,
        kind: NotificationKind,
    ) -> Result<Notification, StoreError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            form_id,
            target,
            kind,
            read: false,
            created_at: Utc::now(),
        };
        let id = notification.id;
        self.notifications.insert(id, notification.clone());
        self.save_notification(id)?;
        Ok(notification)
    }

    /// Submit the form for review. Legal from DRAFT or RETURNED; records the
    /// submission timestamp and notifies the authority side.
    pub fn submit_form(&mut self, form_id: Uuid) -> Result<(Form, Notification), StoreError> {
        let form = self.forms.get_mut(&form_id).ok_or(StoreError::FormNotFound)?;
        form.status = form.status.submit()?;
        form.submitted_at = Some(Utc::now());
        let form = form.clone();
        self.save_form(form_id)?;
        let notification = self.push_notification(
            form_id,
            NotificationTarget::Authority,
            NotificationKind::Submitted,
        )?;
        Ok((form, notification))
    }

    /// Approve a submitted form. Terminal; records the approval timestamp
    /// and notifies the school side.
    pub fn approve_form(&mut self, form_id: Uuid) -> Result<(Form, Notification), StoreError> {
        let form = self.forms.get_mut(&form_id).ok_or(StoreError::FormNotFound)?;
        form.status = form.status.approve()?;
        form.approved_at = Some(Utc::now());
        let form = form.clone();
        self.save_form(form_id)?;
        let notification = self.push_notification(
            form_id,
            NotificationTarget::School,
            NotificationKind::Approved,
        )?;
        Ok((form, notification))
    }

    /// Return a submitted form to the school for rework, optionally with a
    /// review comment.
    pub fn return_form(
        &mut self,
        form_id: Uuid,
        message: Option<String>,
    ) -> Result<(Form, Notification), StoreError> {
        let form = self.forms.get_mut(&form_id).ok_or(StoreError::FormNotFound)?;
        form.status = form.status.return_to_school()?;
        if message.is_some() {
            form.review_comment = message;
        }
        let form = form.clone();
        self.save_form(form_id)?;
        let notification = self.push_notification(
            form_id,
            NotificationTarget::School,
            NotificationKind::Returned,
        )?;
        Ok((form, notification))
    }

    pub fn notification(&self, id: Uuid) -> Option<&Notification> {
        self.notifications.get(&id)
    }

    /// Authority-targeted notifications for forms owned by the principal.
    pub fn notifications_for_owner(&self, owner: Uuid) -> Vec<Notification> {
        let mut out: Vec<Notification> = self
            .notifications
            .values()
            .filter(|n| n.target == NotificationTarget::Authority)
            .filter(|n| {
                self.forms
                    .get(&n.form_id)
                    .map(|f| f.owner == Some(owner))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// School-targeted notifications for one form.
    pub fn notifications_for_form(&self, form_id: Uuid) -> Vec<Notification> {
        let mut out: Vec<Notification> = self
            .notifications
            .values()
            .filter(|n| n.target == NotificationTarget::School && n.form_id == form_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub fn mark_notification_read(&mut self, id: Uuid) -> Result<Notification, StoreError> {
        let notification = self
            .notifications
            .get_mut(&id)
            .ok_or(StoreError::NotificationNotFound)?;
        notification.read = true;
        let updated = notification.clone();
        self.save_notification(id)?;
        Ok(updated)
    }
}
