//! In-memory fakes for the ports, shared by unit tests here and in the adapter crates.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI32, AtomicI64, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::{
    domain::{ChatId, Coordinates, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, InlineKeyboard, MessagingCapabilities},
    },
    ports::{Embedder, GeocodingBackend, LanguageModel, MessageSink, Place},
    schemas::{EventType, Incident, NewIncident, TelegramMessage},
    Result,
};

pub const LOD: (f64, f64) = (31.9514, 34.8917);

static NEXT_MESSAGE_ID: AtomicI64 = AtomicI64::new(1);

/// Stored-incident input at the centre of Lod, one minute old.
pub fn new_incident(summary: &str, city: &str, event_type: EventType, severity: i64) -> NewIncident {
    NewIncident {
        summary: summary.to_string(),
        raw_text: summary.to_string(),
        timestamp: Utc::now() - Duration::minutes(1),
        severity,
        event_type,
        location: Coordinates::new(LOD.0, LOD.1),
        city: city.to_string(),
        street: String::new(),
        neighborhood: String::new(),
        source_channel: "Test Channel".to_string(),
        message_id: NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed),
    }
}

pub fn incident(
    id: &str,
    event_type: EventType,
    severity: i64,
    lat: f64,
    lon: f64,
    timestamp: DateTime<Utc>,
) -> Incident {
    Incident {
        incident_id: id.to_string(),
        summary: format!("{event_type} {id}"),
        timestamp,
        severity_score: severity,
        event_type,
        lat,
        lon,
        city: "Lod".to_string(),
        street: String::new(),
        neighborhood: String::new(),
        source_channel: "Test Channel".to_string(),
        message_id: 1,
        raw_text: String::new(),
        distance_km: None,
    }
}

pub fn channel_message(message_id: i64, text: &str) -> TelegramMessage {
    TelegramMessage {
        message_id,
        channel_id: -1001234567890,
        channel_name: "Test Channel".to_string(),
        text: text.to_string(),
        timestamp: Utc::now(),
        has_media: false,
        media_type: None,
        reply_to_message_id: None,
    }
}

/// Bag-of-words embedding: each lower-cased word is hashed (FNV-1a) into one of 256 buckets.
pub struct FakeEmbedder;

pub const FAKE_EMBEDDING_DIM: usize = 256;

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf29ce484222325u64, |h, b| {
        (h ^ u64::from(b)).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; FAKE_EMBEDDING_DIM];
        for word in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[(fnv1a(word) % FAKE_EMBEDDING_DIM as u64) as usize] += 1.0;
        }
        Ok(v)
    }
}

/// Language model scripted by prompt substrings; the first matching rule answers.
#[derive(Default)]
pub struct FakeModel {
    rules: Mutex<Vec<(String, std::result::Result<String, String>)>>,
    prompts: Mutex<Vec<(String, f32)>>,
}

impl FakeModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_when(self, needle: &str, response: &str) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), Ok(response.to_string())));
        self
    }

    pub fn fail_when(self, needle: &str, error: &str) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), Err(error.to_string())));
        self
    }

    pub fn prompts(&self) -> Vec<(String, f32)> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), temperature));
        let rules = self.rules.lock().unwrap();
        match rules.iter().find(|(needle, _)| prompt.contains(needle.as_str())) {
            Some((_, Ok(text))) => Ok(text.clone()),
            Some((_, Err(e))) => Err(Error::External(e.clone())),
            None => Err(Error::External("no scripted response".to_string())),
        }
    }
}

#[derive(Default)]
pub struct FakeGeocodingBackend {
    geocode: Mutex<HashMap<String, Vec<Place>>>,
    places: Mutex<HashMap<String, Vec<Place>>>,
    geocode_calls: Mutex<Vec<String>>,
}

impl FakeGeocodingBackend {
    pub fn add_geocode(&self, query: &str, lat: f64, lon: f64, address: &str) {
        self.geocode.lock().unwrap().insert(
            query.to_string(),
            vec![Place {
                name: None,
                formatted_address: address.to_string(),
                latitude: lat,
                longitude: lon,
            }],
        );
    }

    pub fn add_place(&self, query: &str, name: Option<&str>, lat: f64, lon: f64, address: &str) {
        self.places.lock().unwrap().insert(
            query.to_string(),
            vec![Place {
                name: name.map(str::to_string),
                formatted_address: address.to_string(),
                latitude: lat,
                longitude: lon,
            }],
        );
    }

    pub fn geocode_calls(&self) -> Vec<String> {
        self.geocode_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GeocodingBackend for FakeGeocodingBackend {
    async fn geocode(&self, address: &str) -> Result<Vec<Place>> {
        self.geocode_calls.lock().unwrap().push(address.to_string());
        Ok(self
            .geocode
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn text_search(&self, query: &str) -> Result<Vec<Place>> {
        Ok(self
            .places
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default())
    }
}

/// What a [`FakeMessenger`] was asked to do, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Html { chat_id: i64, text: String },
    Edit { message_id: i32, text: String },
    Keyboard { chat_id: i64, text: String, keyboard: InlineKeyboard },
    EditKeyboard { message_id: i32, text: String, keyboard: InlineKeyboard },
    Typing { chat_id: i64 },
    CallbackAnswer { callback_id: String, text: Option<String> },
}

impl Sent {
    pub fn text(&self) -> &str {
        match self {
            Sent::Html { text, .. }
            | Sent::Edit { text, .. }
            | Sent::Keyboard { text, .. }
            | Sent::EditKeyboard { text, .. } => text,
            Sent::CallbackAnswer { text, .. } => text.as_deref().unwrap_or(""),
            Sent::Typing { .. } => "",
        }
    }

    pub fn keyboard(&self) -> Option<&InlineKeyboard> {
        match self {
            Sent::Keyboard { keyboard, .. } | Sent::EditKeyboard { keyboard, .. } => Some(keyboard),
            _ => None,
        }
    }
}

#[derive(Default)]
pub struct FakeMessenger {
    next_id: AtomicI32,
    sent: Mutex<Vec<Sent>>,
}

impl FakeMessenger {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// The last message that carried text.
    pub fn last_text(&self) -> String {
        self.sent()
            .iter()
            .rev()
            .find(|s| !s.text().is_empty())
            .map(|s| s.text().to_string())
            .unwrap_or_default()
    }

    fn record(&self, s: Sent) {
        self.sent.lock().unwrap().push(s);
    }

    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: MessageId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
        }
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_inline_keyboards: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.record(Sent::Html {
            chat_id: chat_id.0,
            text: html.to_string(),
        });
        Ok(self.alloc(chat_id))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.record(Sent::Edit {
            message_id: msg.message_id.0,
            text: html.to_string(),
        });
        Ok(())
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.record(Sent::Keyboard {
            chat_id: chat_id.0,
            text: html.to_string(),
            keyboard,
        });
        Ok(self.alloc(chat_id))
    }

    async fn edit_inline_keyboard(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<()> {
        self.record(Sent::EditKeyboard {
            message_id: msg.message_id.0,
            text: html.to_string(),
            keyboard,
        });
        Ok(())
    }

    async fn send_chat_action(&self, chat_id: ChatId, _action: ChatAction) -> Result<()> {
        self.record(Sent::Typing { chat_id: chat_id.0 });
        Ok(())
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.record(Sent::CallbackAnswer {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
        });
        Ok(())
    }
}

/// Collects delivered messages; optionally fails every delivery.
#[derive(Default)]
pub struct FakeSink {
    pub delivered: Mutex<Vec<TelegramMessage>>,
    pub fail: bool,
}

impl FakeSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn delivered(&self) -> Vec<TelegramMessage> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageSink for FakeSink {
    async fn deliver(&self, message: TelegramMessage) -> Result<()> {
        if self.fail {
            return Err(Error::External("sink closed".to_string()));
        }
        self.delivered.lock().unwrap().push(message);
        Ok(())
    }
}
