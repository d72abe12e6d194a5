//! Rate limit policies
//!
//! Each endpoint category has one immutable policy: a fixed window, the number
//! of requests allowed in it and the message returned once it is exhausted.

use super::classifier::method_category;
use crate::security::{PolicyOverride, Result, SecurityError};
use axum::http::Method;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Endpoint classes with distinct quotas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Auth,
    AiGeneration,
    Chat,
    Read,
    Write,
    Upload,
    Webhook,
    Global,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::Auth,
        Category::AiGeneration,
        Category::Chat,
        Category::Read,
        Category::Write,
        Category::Upload,
        Category::Webhook,
        Category::Global,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Auth => "auth",
            Category::AiGeneration => "ai_generation",
            Category::Chat => "chat",
            Category::Read => "read",
            Category::Write => "write",
            Category::Upload => "upload",
            Category::Webhook => "webhook",
            Category::Global => "global",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the bucket key is derived for a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Authenticated user id, else the client IP
    Principal,
    /// First `X-Forwarded-For` entry, else the peer address
    ForwardedFor,
}

#[derive(Debug, Clone, Serialize)]
pub struct Policy {
    pub category: Category,
    #[serde(rename = "window_secs", serialize_with = "serialize_secs")]
    pub window: Duration,
    pub max: u32,
    pub message: &'static str,
    /// Noun used in the human readable limit ("10 uploads per minute")
    pub unit: Option<&'static str>,
    pub skip_in_development: bool,
    pub key_strategy: KeyStrategy,
    /// Violations are logged as security events and reported as blocked
    pub security_event: bool,
    /// Charged instead of the read/write layer rather than after it
    pub replaces_method_layer: bool,
}

fn serialize_secs<S: Serializer>(
    window: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(window.as_secs())
}

impl Policy {
    fn new(category: Category, window: Duration, max: u32, message: &'static str) -> Self {
        Self {
            category,
            window,
            max,
            message,
            unit: None,
            skip_in_development: true,
            key_strategy: KeyStrategy::Principal,
            security_event: false,
            replaces_method_layer: false,
        }
    }

    fn unit(mut self, unit: &'static str) -> Self {
        self.unit = Some(unit);
        self
    }

    /// Human readable limit, e.g. "10 requests per minute"
    pub fn limit_description(&self) -> Option<String> {
        self.unit.map(|unit| {
            format!("{} {} per {}", self.max, unit, describe_window(self.window))
        })
    }

    /// Value of the `RateLimit-Policy` header
    pub fn header_value(&self) -> String {
        format!("{};w={}", self.max, self.window.as_secs())
    }
}

fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    match secs {
        60 => "minute".to_string(),
        3600 => "hour".to_string(),
        s if s % 3600 == 0 => format!("{} hours", s / 3600),
        s if s % 60 == 0 => format!("{} minutes", s / 60),
        1 => "second".to_string(),
        s => format!("{s} seconds"),
    }
}

const MINUTE: Duration = Duration::from_secs(60);
const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

/// The effective policy for every category
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: Vec<Policy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        let mut auth = Policy::new(
            Category::Auth,
            FIFTEEN_MINUTES,
            5,
            "Too many authentication attempts",
        );
        auth.security_event = true;
        auth.replaces_method_layer = true;

        let mut upload = Policy::new(
            Category::Upload,
            MINUTE,
            10,
            "Too many file uploads, please wait before uploading more files.",
        )
        .unit("uploads");
        upload.skip_in_development = false;

        let mut webhook =
            Policy::new(Category::Webhook, MINUTE, 60, "Webhook rate limit exceeded")
                .unit("requests");
        webhook.key_strategy = KeyStrategy::ForwardedFor;
        webhook.replaces_method_layer = true;

        // Same order as Category::ALL
        let policies = vec![
            auth,
            Policy::new(
                Category::AiGeneration,
                MINUTE,
                10,
                "AI generation rate limit exceeded. Please wait before generating more code.",
            )
            .unit("requests"),
            Policy::new(
                Category::Chat,
                MINUTE,
                30,
                "Too many chat messages, please slow down.",
            )
            .unit("messages"),
            Policy::new(
                Category::Read,
                MINUTE,
                100,
                "Too many requests from this user/IP, please try again later.",
            ),
            Policy::new(
                Category::Write,
                MINUTE,
                30,
                "Too many write operations, please slow down.",
            )
            .unit("write requests"),
            upload,
            webhook,
            Policy::new(
                Category::Global,
                FIFTEEN_MINUTES,
                1000,
                "Global rate limit exceeded. You've made too many requests.",
            )
            .unit("requests"),
        ];

        Self { policies }
    }
}

impl PolicyTable {
    pub fn get(&self, category: Category) -> &Policy {
        &self.policies[category.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }

    /// Policies charged for a request, in order: global, the method layer,
    /// then the path category. Policies that replace the method layer skip
    /// the middle step.
    pub fn layers(&self, method: &Method, category: Category) -> impl Iterator<Item = Category> {
        let method_layer = method_category(method);
        let middle = (method_layer != category && !self.get(category).replaces_method_layer)
            .then_some(method_layer);
        [Some(Category::Global), middle, Some(category)]
            .into_iter()
            .flatten()
    }

    /// Replace windows and quotas from configuration
    pub fn apply_overrides(&mut self, overrides: &HashMap<Category, PolicyOverride>) -> Result<()> {
        for (category, change) in overrides {
            if change.max == Some(0) {
                return Err(SecurityError::InvalidConfiguration {
                    message: format!("max for {category} must be greater than 0"),
                });
            }
            if change.window_secs == Some(0) {
                return Err(SecurityError::InvalidConfiguration {
                    message: format!("window for {category} must be greater than 0"),
                });
            }

            let policy = &mut self.policies[category.index()];
            if let Some(max) = change.max {
                policy.max = max;
            }
            if let Some(secs) = change.window_secs {
                policy.window = Duration::from_secs(secs);
            }
        }
        Ok(())
    }
}
