//! Page content and visual snapshots supplied by the host.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on scraped page text.
pub const MAX_PAGE_TEXT_CHARS: usize = 5000;

/// Minimum text length accepted when the page has no screenshot.
pub const MIN_PAGE_TEXT_CHARS: usize = 50;

pub const PAGE_UNREADABLE_MESSAGE: &str = "Could not read page content. The page may be loading or blocked. Try refreshing the page and waiting a moment before starting.";

/// Opaque snapshot of what the student is looking at.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageContent {
    pub title: String,
    pub url: String,
    pub headings: Vec<String>,
    /// Visible text, trimmed by the host
    #[serde(alias = "textContent")]
    pub text_content: String,
    /// Screenshot as a data URL
    pub screenshot: Option<String>,
    #[serde(alias = "hasScreenshot")]
    pub has_screenshot: bool,
}

impl PageContent {
    /// Clamp text to [`MAX_PAGE_TEXT_CHARS`] and reconcile the screenshot flag.
    pub fn normalized(mut self) -> Self {
        self.text_content = truncate_chars(self.text_content.trim(), MAX_PAGE_TEXT_CHARS);
        self.has_screenshot = self
            .screenshot
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        if !self.has_screenshot {
            self.screenshot = None;
        }
        self
    }

    /// A page is usable when it carries a screenshot or enough text to ground answers.
    pub fn is_readable(&self) -> bool {
        self.has_screenshot || self.text_content.chars().count() >= MIN_PAGE_TEXT_CHARS
    }

    /// The screenshot, if any, wrapped as a fresh snapshot.
    pub fn snapshot(&self) -> Option<VisualSnapshot> {
        self.screenshot.clone().map(VisualSnapshot::new)
    }
}

/// One captured image of the endpoint's visible content.
///
/// Every capture gets a new id, so two snapshots of identical pixels are still
/// distinguishable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualSnapshot {
    pub id: Uuid,
    pub image_url: String,
    #[serde(skip, default = "SystemTime::now")]
    pub captured_at: SystemTime,
}

impl VisualSnapshot {
    pub fn new(image_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_url: image_url.into(),
            captured_at: SystemTime::now(),
        }
    }
}

/// Truncate on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
