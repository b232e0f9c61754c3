//! Push payloads and the notifications raised from them.
//!
//! Payloads come from an untrusted server and are parsed into a typed
//! structure. Every field is optional; absent or empty fields take the
//! configured defaults. Unknown fields are ignored, anything that is not a
//! JSON object of the expected shape is rejected with [`PushError`].

use serde::{Deserialize, Serialize};

use crate::error::PushError;

const DEFAULT_TITLE: &str = "New Notification";
const DEFAULT_BODY: &str = "You have a new message.";
const DEFAULT_ICON: &str = "assets/icons/icon-192x192.png";
const DEFAULT_BADGE: &str = "assets/icons/icon-72x72.png";
const DEFAULT_VIBRATE: [u32; 3] = [200, 100, 200];
const DEFAULT_URL: &str = "/";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub badge: Option<String>,
    #[serde(default)]
    pub vibrate: Option<Vec<u32>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub sound: Option<String>,
}

impl PushPayload {
    pub fn parse(body: Option<&[u8]>) -> Result<Self, PushError> {
        let body = body.ok_or(PushError::MissingPayload)?;
        Ok(serde_json::from_slice(body)?)
    }

    /// Apply `defaults` and produce the title and display options.
    pub fn into_notification(self, defaults: &NotificationDefaults) -> (String, NotificationOptions) {
        let title = non_empty(self.title).unwrap_or_else(|| defaults.title.clone());
        let options = NotificationOptions {
            body: non_empty(self.body).unwrap_or_else(|| defaults.body.clone()),
            icon: non_empty(self.icon).unwrap_or_else(|| defaults.icon.clone()),
            badge: non_empty(self.badge).unwrap_or_else(|| defaults.badge.clone()),
            vibrate: self.vibrate.unwrap_or_else(|| defaults.vibrate.clone()),
            data: NotificationData {
                url: non_empty(self.url).unwrap_or_else(|| defaults.url.clone()),
            },
            sound: non_empty(self.sound),
        };
        (title, options)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Fallback values for fields a push payload leaves out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub url: String,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            body: DEFAULT_BODY.to_string(),
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_BADGE.to_string(),
            vibrate: DEFAULT_VIBRATE.to_vec(),
            url: DEFAULT_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
}

/// Options handed to the host alongside the notification title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

/// A notification the host has put on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    pub options: NotificationOptions,
}

impl Notification {
    /// URL to open when the user interacts with the notification.
    pub fn url(&self) -> &str {
        &self.options.data.url
    }
}
