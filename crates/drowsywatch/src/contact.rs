//! The emergency contact that receives SMS alerts.
//!
//! There is exactly one slot. Every form submission overwrites it, it lives as
//! long as the process, and it is shared by every request.

use std::sync::{Arc, OnceLock, RwLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};

fn separators() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s\-().]").expect("separator pattern is valid"))
}

fn phone_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[0-9]{7,15}$").expect("phone pattern is valid"))
}

/// Normalise a phone number: drop spaces, dashes, dots and parentheses.
///
/// # Errors
///
/// Returns an error unless the result is 7-15 digits with an optional leading `+`.
pub fn normalize_phone(raw: &str) -> Result<String> {
    let phone = separators().replace_all(raw.trim(), "").into_owned();
    if phone.is_empty() {
        return Err(Error::invalid_contact("phone number is required"));
    }
    if !phone_shape().is_match(&phone) {
        return Err(Error::invalid_contact(format!(
            "'{}' is not a phone number",
            raw.trim()
        )));
    }
    Ok(phone)
}

/// Who to notify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Display name.
    pub name: String,
    /// Normalised phone number.
    pub phone: String,
    /// When the contact was saved.
    pub saved_at: DateTime<Utc>,
}

impl ContactInfo {
    /// Validate form input into a contact.
    ///
    /// # Errors
    ///
    /// Returns an error if the phone number is missing or malformed.
    pub fn new(name: &str, phone: &str) -> Result<Self> {
        Ok(Self {
            name: name.trim().to_string(),
            phone: normalize_phone(phone)?,
            saved_at: Utc::now(),
        })
    }
}

/// Single-slot contact store shared by the HTTP handlers and the alert path.
#[derive(Debug, Clone, Default)]
pub struct ContactStore {
    slot: Arc<RwLock<Option<ContactInfo>>>,
}

impl ContactStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored contact.
    pub fn save(&self, contact: ContactInfo) {
        info!(name = %contact.name, "Saved emergency contact");
        let mut slot = self.slot.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *slot = Some(contact);
    }

    /// The stored contact, if any.
    #[must_use]
    pub fn get(&self) -> Option<ContactInfo> {
        self.slot
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Remove the stored contact.
    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}
