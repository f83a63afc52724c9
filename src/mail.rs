use crate::config::{LoadedConfig, MailConfig, MailMode};
use crate::model::RawDigest;
use anyhow::{Context, Result, anyhow, bail};
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const UNREAD_LABEL: &str = "UNREAD";

/// Gmail emits URL-safe base64 with or without padding.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub trait MailSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn list_unread(&self) -> Result<Vec<String>>;
    fn fetch(&self, id: &str) -> Result<RawDigest>;
    fn mark_read(&self, id: &str) -> Result<()>;
}

pub fn build_mail_source(loaded: &LoadedConfig) -> Result<Box<dyn MailSource>> {
    let mail = &loaded.config.mail;
    match mail.mode {
        MailMode::Gmail => Ok(Box::new(GmailSource::from_config(mail)?)),
        MailMode::Directory => {
            let inbox = mail
                .inbox_dir
                .as_ref()
                .context("mail.inbox_dir missing for directory mode")?;
            let inbox = loaded.resolve(inbox)?;
            Ok(Box::new(DirectorySource::new(inbox, &mail.read_dir_name)))
        }
    }
}

pub struct GmailSource {
    client: Client,
    api_base: String,
    user_id: String,
    query: String,
    token: String,
    retry_attempts: u8,
    retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

impl GmailSource {
    pub fn from_config(mail: &MailConfig) -> Result<Self> {
        let token = std::env::var(&mail.token_env)
            .with_context(|| format!("access token env var {} is not set", mail.token_env))?;

        let mut headers = HeaderMap::new();
        if let Some(user_agent) = &mail.user_agent {
            headers.insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(mail.timeout_secs))
            .default_headers(headers)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            api_base: mail.api_base.trim_end_matches('/').to_string(),
            user_id: mail.user_id.clone(),
            query: mail.query.clone(),
            token,
            retry_attempts: mail.retry_attempts,
            retry_backoff_ms: mail.retry_backoff_ms,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/users/{}/messages", self.api_base, self.user_id)
    }

    fn send_with_retries(
        &self,
        what: &str,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let attempts = self.retry_attempts.max(1);

        for attempt in 1..=attempts {
            match build().bearer_auth(&self.token).send() {
                Ok(resp) => {
                    if resp.status().is_success() {
                        return Ok(resp);
                    }
                    let status = resp.status();
                    if attempt == attempts {
                        bail!("{what} failed with status {status}");
                    }
                    warn!(what, %status, attempt, "mail request failed; retrying");
                }
                Err(err) => {
                    if attempt == attempts {
                        return Err(err).with_context(|| format!("{what} failed"));
                    }
                    warn!(what, attempt, error = %err, "mail request errored; retrying");
                }
            }

            std::thread::sleep(Duration::from_millis(self.retry_backoff_ms));
        }

        bail!("{what} failed after retries")
    }
}

impl MailSource for GmailSource {
    fn name(&self) -> &'static str {
        "gmail"
    }

    fn list_unread(&self) -> Result<Vec<String>> {
        let url = self.messages_url();
        let list: MessageList = self
            .send_with_retries("list messages", || {
                self.client.get(&url).query(&[("q", self.query.as_str())])
            })?
            .json()
            .context("failed to decode message list")?;

        let ids: Vec<String> = list.messages.into_iter().map(|m| m.id).collect();
        info!(messages = ids.len(), query = %self.query, "listed unread messages");
        Ok(ids)
    }

    fn fetch(&self, id: &str) -> Result<RawDigest> {
        let url = format!("{}/{id}", self.messages_url());
        let message: GmailMessage = self
            .send_with_retries("get message", || {
                self.client.get(&url).query(&[("format", "full")])
            })?
            .json()
            .with_context(|| format!("failed to decode message {id}"))?;

        let payload = message
            .payload
            .as_ref()
            .with_context(|| format!("message {id} has no payload"))?;
        let body_text = decode_text_body(payload)
            .with_context(|| format!("message {id} has no decodable text part"))?;

        debug!(message = %message.id, bytes = body_text.len(), "fetched message body");
        Ok(RawDigest {
            is_unread: message.label_ids.iter().any(|l| l == UNREAD_LABEL),
            id: message.id,
            body_text,
        })
    }

    fn mark_read(&self, id: &str) -> Result<()> {
        let url = format!("{}/{id}/modify", self.messages_url());
        let body = serde_json::json!({ "removeLabelIds": [UNREAD_LABEL] });
        self.send_with_retries("modify message", || self.client.post(&url).json(&body))?;
        debug!(message = %id, "marked message read");
        Ok(())
    }
}

fn decode_text_body(payload: &MessagePart) -> Option<String> {
    let part = find_plain_part(payload)
        .or_else(|| payload.parts.first())
        .unwrap_or(payload);
    let data = part.body.as_ref()?.data.as_deref()?;
    let bytes = BODY_ENGINE.decode(data.trim()).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn find_plain_part(part: &MessagePart) -> Option<&MessagePart> {
    if part.mime_type.eq_ignore_ascii_case("text/plain")
        && part.body.as_ref().is_some_and(|b| b.data.is_some())
    {
        return Some(part);
    }
    part.parts.iter().find_map(find_plain_part)
}

/// Files directly inside `inbox` are unread; reading moves them aside.
pub struct DirectorySource {
    inbox: PathBuf,
    read_dir: PathBuf,
}

impl DirectorySource {
    pub fn new(inbox: PathBuf, read_dir_name: &str) -> Self {
        let read_dir = inbox.join(read_dir_name);
        Self { inbox, read_dir }
    }

    fn message_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || Path::new(id).file_name().and_then(|s| s.to_str()) != Some(id) {
            bail!("invalid message id {id:?}");
        }
        Ok(self.inbox.join(id))
    }
}

impl MailSource for DirectorySource {
    fn name(&self) -> &'static str {
        "directory"
    }

    fn list_unread(&self) -> Result<Vec<String>> {
        if !self.inbox.exists() {
            bail!("inbox dir does not exist: {}", self.inbox.display());
        }

        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.inbox).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        ids.sort();

        info!(messages = ids.len(), inbox = %self.inbox.display(), "listed unread messages");
        Ok(ids)
    }

    fn fetch(&self, id: &str) -> Result<RawDigest> {
        let path = self.message_path(id)?;
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read message {}", path.display()))?;
        Ok(RawDigest {
            id: id.to_string(),
            body_text: String::from_utf8_lossy(&bytes).into_owned(),
            is_unread: true,
        })
    }

    fn mark_read(&self, id: &str) -> Result<()> {
        let path = self.message_path(id)?;
        std::fs::create_dir_all(&self.read_dir)
            .with_context(|| format!("failed to create read dir {}", self.read_dir.display()))?;
        let target = self.read_dir.join(id);
        std::fs::rename(&path, &target).with_context(|| {
            format!("failed to move {} to {}", path.display(), target.display())
        })?;
        debug!(message = %id, "marked message read");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySource {
    messages: Mutex<BTreeMap<String, RawDigest>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, id: impl Into<String>, body_text: impl Into<String>) -> Result<()> {
        let id = id.into();
        let digest = RawDigest {
            id: id.clone(),
            body_text: body_text.into(),
            is_unread: true,
        };
        self.lock()?.insert(id, digest);
        Ok(())
    }

    pub fn reset_unread(&self) -> Result<()> {
        for digest in self.lock()?.values_mut() {
            digest.is_unread = true;
        }
        Ok(())
    }

    pub fn is_unread(&self, id: &str) -> Result<bool> {
        Ok(self.lock()?.get(id).is_some_and(|d| d.is_unread))
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, RawDigest>>> {
        self.messages
            .lock()
            .map_err(|_| anyhow!("memory mailbox lock poisoned"))
    }
}

impl MailSource for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn list_unread(&self) -> Result<Vec<String>> {
        Ok(self
            .lock()?
            .values()
            .filter(|d| d.is_unread)
            .map(|d| d.id.clone())
            .collect())
    }

    fn fetch(&self, id: &str) -> Result<RawDigest> {
        self.lock()?
            .get(id)
            .cloned()
            .with_context(|| format!("unknown message {id}"))
    }

    fn mark_read(&self, id: &str) -> Result<()> {
        let mut messages = self.lock()?;
        let digest = messages
            .get_mut(id)
            .with_context(|| format!("unknown message {id}"))?;
        digest.is_unread = false;
        Ok(())
    }
}
