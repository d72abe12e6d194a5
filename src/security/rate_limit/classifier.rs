//! Request classification
//!
//! Maps a request to the policy category that applies to it. Rules are an
//! ordered table and the first matching fragment wins, so `/api/chat/generate`
//! is an AI generation request, not a chat request.

use super::policy::Category;
use axum::http::Method;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "category")]
pub enum Classification {
    /// Never rate limited
    Exempt,
    Limited(Category),
}

/// A path fragment and the category it selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PathRule {
    pub fragment: &'static str,
    pub category: Category,
}

const fn rule(fragment: &'static str, category: Category) -> PathRule {
    PathRule { fragment, category }
}

/// Fragment rules in priority order
pub const DEFAULT_RULES: &[PathRule] = &[
    rule("/auth/", Category::Auth),
    rule("/login", Category::Auth),
    rule("/register", Category::Auth),
    rule("/generate", Category::AiGeneration),
    rule("/ai/", Category::AiGeneration),
    rule("/chat-to-code", Category::AiGeneration),
    rule("/chat/", Category::Chat),
    rule("/messages", Category::Chat),
    rule("/upload", Category::Upload),
    rule("/file", Category::Upload),
    rule("/webhook", Category::Webhook),
];

#[derive(Debug, Clone)]
pub struct PathClassifier {
    exempt_paths: Vec<String>,
    exempt_prefixes: Vec<String>,
    rules: Vec<PathRule>,
}

impl PathClassifier {
    pub fn new(exempt_paths: Vec<String>, exempt_prefixes: Vec<String>) -> Self {
        Self {
            exempt_paths,
            exempt_prefixes,
            rules: DEFAULT_RULES.to_vec(),
        }
    }

    pub fn rules(&self) -> &[PathRule] {
        &self.rules
    }

    /// Health and readiness probes are never limited
    pub fn is_exempt(&self, path: &str) -> bool {
        let exact = self.exempt_paths.iter().any(|exempt| {
            path == exempt
                || path
                    .strip_prefix(exempt.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        });

        exact
            || self
                .exempt_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Category selected by the fragment rules alone
    pub fn path_category(&self, path: &str) -> Option<Category> {
        self.rules
            .iter()
            .find(|rule| path.contains(rule.fragment))
            .map(|rule| rule.category)
    }

    pub fn classify(&self, method: &Method, path: &str) -> Classification {
        if self.is_exempt(path) {
            return Classification::Exempt;
        }

        let category = self
            .path_category(path)
            .unwrap_or_else(|| method_category(method));
        Classification::Limited(category)
    }
}

/// Write verbs get the write policy, everything else the read policy
pub fn method_category(method: &Method) -> Category {
    match *method {
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE => Category::Write,
        _ => Category::Read,
    }
}
