//! Alert delivery for drowsy frames.
//!
//! The dispatcher fans a single drowsiness event out to every configured
//! channel. There is no debouncing: each drowsy frame is one dispatch.
//! Channel failures are logged and counted but never propagated, so a broken
//! SMS gateway cannot stop the video stream.

pub mod sms;

#[cfg(feature = "sound")]
pub mod sound;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::contact::{ContactInfo, ContactStore};
use crate::error::Result;

pub use sms::TwilioSms;

#[cfg(feature = "sound")]
pub use sound::SoundAlert;

/// A single drowsiness event.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Who to notify, when a contact has been saved.
    pub contact: Option<ContactInfo>,
    /// The average eye aspect ratio that triggered the alert.
    pub ear: f64,
    /// When the drowsy frame was processed.
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Create an alert for `ear` at the current time.
    #[must_use]
    pub fn new(contact: Option<ContactInfo>, ear: f64) -> Self {
        Self {
            contact,
            ear,
            timestamp: Utc::now(),
        }
    }
}

/// A way of telling someone the driver is drowsy.
#[async_trait::async_trait]
pub trait AlertChannel: Send + Sync + std::fmt::Debug {
    /// The name of this channel (for logging).
    fn name(&self) -> &'static str;

    /// Whether this channel can only deliver to a saved contact.
    ///
    /// Channels that return `true` are skipped while the contact store is
    /// empty.
    fn needs_contact(&self) -> bool {
        true
    }

    /// Deliver the alert.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery fails.
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

/// What happened to one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertOutcome {
    /// Channels that delivered.
    pub delivered: Vec<&'static str>,
    /// Channels skipped because no contact was saved.
    pub skipped: Vec<&'static str>,
    /// Channels that failed.
    pub failed: Vec<&'static str>,
}

impl AlertOutcome {
    /// Whether every attempted channel delivered.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sends drowsiness alerts through every configured channel.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    contacts: ContactStore,
    channels: Vec<Arc<dyn AlertChannel>>,
}

impl AlertDispatcher {
    /// A dispatcher with no channels.
    #[must_use]
    pub fn new(contacts: ContactStore) -> Self {
        Self {
            contacts,
            channels: Vec::new(),
        }
    }

    /// Add a channel.
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Build the channels enabled in `config`.
    ///
    /// SMS is added when enabled and fully configured; otherwise a warning is
    /// logged and drowsy frames only reach the local channels.
    ///
    /// # Errors
    ///
    /// Returns an error if a channel cannot be constructed.
    pub fn from_config(config: &Config, contacts: ContactStore) -> Result<Self> {
        let mut dispatcher = Self::new(contacts);

        if config.sms_ready() {
            dispatcher = dispatcher.with_channel(Arc::new(TwilioSms::from_config(&config.sms)?));
        } else if config.sms.enabled {
            warn!("SMS alerts disabled: Twilio account SID, auth token or sender phone not set");
        }

        if config.sound.enabled {
            #[cfg(feature = "sound")]
            {
                dispatcher =
                    dispatcher.with_channel(Arc::new(SoundAlert::new(config.sound.path.clone())));
            }
            #[cfg(not(feature = "sound"))]
            warn!("Sound alerts requested but drowsywatch was built without the `sound` feature");
        }

        info!(
            channels = ?dispatcher.channel_names(),
            "Alert dispatcher ready"
        );
        Ok(dispatcher)
    }

    /// Names of the configured channels.
    #[must_use]
    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// The contact store this dispatcher reads.
    #[must_use]
    pub fn contacts(&self) -> &ContactStore {
        &self.contacts
    }

    /// Send one drowsiness alert for a frame whose average EAR was `ear`.
    pub async fn dispatch(&self, ear: f64) -> AlertOutcome {
        let contact = self.contacts.get();
        let alert = Alert::new(contact, ear);
        let mut outcome = AlertOutcome::default();

        for channel in &self.channels {
            if channel.needs_contact() && alert.contact.is_none() {
                debug!(channel = channel.name(), "No contact saved, skipping alert");
                outcome.skipped.push(channel.name());
                continue;
            }

            match channel.notify(&alert).await {
                Ok(()) => {
                    info!(channel = channel.name(), ear, "Drowsiness alert sent");
                    outcome.delivered.push(channel.name());
                }
                Err(e) => {
                    error!(channel = channel.name(), error = %e, "Failed to send drowsiness alert");
                    outcome.failed.push(channel.name());
                }
            }
        }

        outcome
    }
}
