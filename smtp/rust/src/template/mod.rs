//! `{{var}}` placeholder rendering for outbound messages.
//!
//! Only `email`, `name`, `username` and `repository` are recognised. Any
//! other placeholder is copied through verbatim, and a recognised variable
//! without a value renders as the empty string.

use serde::{Deserialize, Serialize};

/// Values available to a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateVars {
    /// Recipient address.
    pub email: Option<String>,
    /// Recipient display name.
    pub name: Option<String>,
    /// Recipient handle on the hosting service.
    pub username: Option<String>,
    /// Repository the address was harvested from.
    pub repository: Option<String>,
}

impl TemplateVars {
    /// Variables for `email` with everything else unset.
    pub fn for_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Default::default()
        }
    }

    /// Sets the display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the handle.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets the repository.
    pub fn repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// `None` for unrecognised names, `Some("")` for unset ones.
    fn lookup(&self, key: &str) -> Option<&str> {
        let value = match key {
            "email" => &self.email,
            "name" => &self.name,
            "username" => &self.username,
            "repository" => &self.repository,
            _ => return None,
        };
        Some(value.as_deref().unwrap_or(""))
    }
}

/// Renders `template`, substituting recognised placeholders.
pub fn render(template: &str, vars: &TemplateVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };

        match vars.lookup(after_open[..close].trim()) {
            Some(value) => {
                out.push_str(value);
                rest = &after_open[close + 2..];
            }
            None => {
                // Unknown names stay verbatim; a later `{{` may still open one.
                out.push_str("{{");
                rest = after_open;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Subject and bodies of a bulk message, each a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    /// Subject line template.
    pub subject: String,
    /// HTML body template.
    pub html: String,
    /// Optional plain-text body template.
    #[serde(default)]
    pub text: Option<String>,
}

/// A template rendered for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    /// Rendered subject.
    pub subject: String,
    /// Rendered HTML body.
    pub html: String,
    /// Rendered text body.
    pub text: Option<String>,
}

impl MessageTemplate {
    /// Creates a template without a text body.
    pub fn new(subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            html: html.into(),
            text: None,
        }
    }

    /// Adds a plain-text body.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Renders every part for one recipient.
    pub fn render(&self, vars: &TemplateVars) -> RenderedMessage {
        RenderedMessage {
            subject: render(&self.subject, vars),
            html: render(&self.html, vars),
            text: self.text.as_deref().map(|t| render(t, vars)),
        }
    }
}
