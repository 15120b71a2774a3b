//! Session-link emails: rendering and delivery.

use std::time::Duration;

use async_trait::async_trait;
use fast_track_core::timefmt::to_iso;
use fast_track_core::{is_valid_session_id, Session};
use minijinja::{context, Environment};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::BrevoConfig;

pub const SESSION_LINKS_SUBJECT: &str = "Your Fast Track Session Links";
const BREVO_ENDPOINT: &str = "https://api.brevo.com/v3/smtp/email";
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

const SESSION_LINKS_TEMPLATE: &str = r#"<html>
  <body style="font-family: -apple-system, 'Segoe UI', Roboto, Arial, sans-serif; color: #1f2937; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="text-align: center;">Fast Track</h1>
    <p style="text-align: center; color: #6b7280;">Your Fasting Sessions</p>
    <p>Here are all your fasting sessions. Click the links below to access them:</p>
    {% for s in sessions %}
    <div style="border: 2px solid {% if s.active %}#10b981{% else %}#e5e7eb{% endif %}; border-radius: 12px; padding: 24px; margin-bottom: 20px;">
      <div style="font-size: 20px; font-weight: 700;">{{ s.name }} <span>{% if s.active %}ACTIVE{% else %}ENDED{% endif %}</span></div>
      <div style="color: #6b7280; font-size: 14px;">
        Started: {{ s.started }}<br>
        Target Duration: {{ s.target_hours }} hours
      </div>
      <div>
        {% if s.edit_url %}<a href="{{ s.edit_url|safe }}">Edit Session</a>{% endif %}
        <a href="{{ s.view_url|safe }}">View Only</a>
      </div>
    </div>
    {% endfor %}
    <p style="text-align: center;"><a href="{{ base_url|safe }}">Create a New Session</a></p>
    <p style="text-align: center; color: #6b7280; font-size: 12px;">Keep your edit links secure. Anyone with an edit link can modify your session.</p>
  </body>
</html>
"#;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("email delivery is not configured")]
    NotConfigured,
    #[error("failed to render email: {0}")]
    Template(#[from] minijinja::Error),
    #[error("email request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("email provider rejected the message: {status} body={body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

#[derive(Serialize)]
struct LinkRow {
    name: String,
    active: bool,
    started: String,
    target_hours: f64,
    edit_url: Option<String>,
    view_url: String,
}

/// Editor link when the session has a token, read-only link always.
///
/// Link URLs are emitted unescaped, so only slug ids and alphanumeric tokens
/// make it into them.
pub fn render_session_links(sessions: &[Session], base_url: &str) -> Result<String, MailError> {
    let base_url = base_url.trim_end_matches('/');
    let rows: Vec<LinkRow> = sessions
        .iter()
        .filter(|s| is_valid_session_id(&s.id))
        .map(|s| LinkRow {
            name: s.name.clone(),
            active: s.is_active,
            started: to_iso(&s.start_time),
            target_hours: s.target_duration,
            edit_url: s
                .edit_token
                .as_ref()
                .filter(|token| !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric()))
                .map(|token| format!("{base_url}/session/{token}/{}", s.id)),
            view_url: format!("{base_url}/view/{}", s.id),
        })
        .collect();

    let mut env = Environment::new();
    env.add_template("session_links.html", SESSION_LINKS_TEMPLATE)?;
    let html = env
        .get_template("session_links.html")?
        .render(context! { sessions => rows, base_url => base_url })?;
    Ok(html)
}

#[derive(Serialize)]
struct BrevoAddress<'a> {
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BrevoRequest<'a> {
    sender: BrevoAddress<'a>,
    to: Vec<BrevoAddress<'a>>,
    subject: &'a str,
    html_content: &'a str,
}

/// Brevo transactional email API.
pub struct BrevoMailer {
    http: Client,
    config: BrevoConfig,
}

impl BrevoMailer {
    pub fn new(config: BrevoConfig) -> Result<Self, MailError> {
        let http = Client::builder().timeout(SEND_TIMEOUT).build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl Mailer for BrevoMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(MailError::NotConfigured);
        };
        let body = BrevoRequest {
            sender: BrevoAddress {
                email: &self.config.from_email,
                name: Some(&self.config.from_name),
            },
            to: vec![BrevoAddress {
                email: &email.to,
                name: None,
            }],
            subject: &email.subject,
            html_content: &email.html,
        };
        let res = self
            .http
            .post(BREVO_ENDPOINT)
            .header("api-key", api_key)
            .json(&body)
            .send()
            .await?;
        if res.status().is_success() {
            debug!(to = %email.to, "email accepted by provider");
            Ok(())
        } else {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            error!(status, body = %body, "email provider error");
            Err(MailError::Rejected { status, body })
        }
    }
}
