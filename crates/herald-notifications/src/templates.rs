use std::collections::HashMap;

use crate::error::NotificationError;
use crate::types::RenderedEmail;

pub const BROADCAST_TEMPLATE: &str = "broadcast";
pub const DIGEST_TEMPLATE: &str = "digest";
pub const TEST_EMAIL_TEMPLATE: &str = "test-email";

const BROADCAST_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; }
        .container { max-width: 600px; margin: 0 auto; padding: 20px; }
        .header { background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); color: white; padding: 30px; text-align: center; border-radius: 8px 8px 0 0; }
        .content { background: #f8f9fa; padding: 30px; border-radius: 0 0 8px 8px; }
        .message { background: white; padding: 20px; border-radius: 6px; margin: 20px 0; }
        .footer { text-align: center; margin-top: 20px; color: #666; font-size: 12px; }
    </style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>{{title}}</h1>
        </div>
        <div class="content">
            <p>{{greeting}}</p>
            <div class="message">
                <p>{{body}}</p>
            </div>
            <div class="footer">
                <p>You're receiving this email because you subscribed to notifications.</p>
                <p><a href="{{preferences_url}}">Manage your preferences</a></p>
            </div>
        </div>
    </div>
</body>
</html>"#;

const DIGEST_HTML: &str = r#"<h2>Good morning{{name_suffix}}!</h2>
<p>Here's your daily digest of updates...</p>
<p><a href="{{preferences_url}}">Manage your preferences</a></p>"#;

const TEST_EMAIL_HTML: &str = r#"<h2>Test Email</h2>
<p>This is a test email to verify that email notifications are working correctly!</p>
<p>If you received this, everything is set up properly.</p>"#;

/// Simple template renderer using {{variable}} syntax.
///
/// Values substituted into the HTML body are escaped; the subject is a plain
/// text header and is substituted verbatim.
pub struct TemplateRenderer {
    templates: HashMap<String, Template>,
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: String,
    pub subject: String,
    pub html_body: String,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Renderer preloaded with the broadcast, digest and test-email templates
    pub fn with_defaults() -> Self {
        let mut renderer = Self::new();
        renderer.register(Template {
            id: BROADCAST_TEMPLATE.to_string(),
            subject: "{{title}}".to_string(),
            html_body: BROADCAST_HTML.to_string(),
        });
        renderer.register(Template {
            id: DIGEST_TEMPLATE.to_string(),
            subject: "📬 Your Daily Digest".to_string(),
            html_body: DIGEST_HTML.to_string(),
        });
        renderer.register(Template {
            id: TEST_EMAIL_TEMPLATE.to_string(),
            subject: "Test Email from Your App".to_string(),
            html_body: TEST_EMAIL_HTML.to_string(),
        });
        renderer
    }

    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn get(&self, template_id: &str) -> Option<&Template> {
        self.templates.get(template_id)
    }

    pub fn render(
        &self,
        template_id: &str,
        data: &HashMap<String, serde_json::Value>,
    ) -> Result<RenderedEmail, NotificationError> {
        let template = self.templates.get(template_id).ok_or_else(|| {
            NotificationError::InvalidConfig(format!("Template not found: {}", template_id))
        })?;

        Ok(RenderedEmail {
            subject: render_string(&template.subject, data, false),
            html_body: render_string(&template.html_body, data, true),
        })
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Substitute `{{key}}` placeholders in one left-to-right pass. Inserted
/// values are never scanned again; unknown placeholders are kept verbatim.
fn render_string(
    template: &str,
    data: &HashMap<String, serde_json::Value>,
    escape: bool,
) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        result.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            rest = &rest[open..];
            break;
        };

        let key = &after_open[..close];
        match data.get(key) {
            Some(value) => {
                let replacement = value_to_string(value);
                if escape {
                    result.push_str(&html_escape(&replacement));
                } else {
                    result.push_str(&replacement);
                }
            }
            None => result.push_str(&rest[open..open + close + 4]),
        }
        rest = &after_open[close + 2..];
    }

    result.push_str(rest);
    result
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        _ => value.to_string(),
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
