use std::{sync::Arc, time::Duration};

use tempfile::TempDir;
use watch_core::{
    config::Config,
    domain::{ChatId, MessageId, MessageRef, UserId},
    geocoder::Geocoder,
    messaging::types::CallbackQuery as Callback,
    pipeline::AnalystPipeline,
    preferences::PreferencesStore,
    schemas::EventType,
    store::IncidentStore,
    testing::{new_incident, FakeEmbedder, FakeMessenger, FakeModel, Sent},
};

use super::{on_callback, on_text, IncomingText};
use crate::router::AppState;

const USER: i64 = 42;

struct Harness {
    state: AppState,
    messenger: Arc<FakeMessenger>,
    _dir: TempDir,
}

fn harness(model: FakeModel, vars: &[(&str, &str)]) -> Harness {
    let mut all = vec![("GOOGLE_API_KEY", "k")];
    all.extend_from_slice(vars);
    let cfg = Config::from_lookup(|k| {
        all.iter()
            .find(|(name, _)| *name == k)
            .map(|(_, v)| v.to_string())
    })
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(model);
    let store = IncidentStore::open_in_memory("bot", Arc::new(FakeEmbedder)).unwrap();
    let analyst = AnalystPipeline::new(
        model.clone(),
        Arc::new(Geocoder::offline()),
        Arc::new(store),
    );
    let prefs = PreferencesStore::open(dir.path().join("prefs.json"));
    let messenger = Arc::new(FakeMessenger::default());

    let mut state = AppState::new(
        Arc::new(cfg),
        Arc::new(analyst),
        model,
        Arc::new(prefs),
        messenger.clone(),
    );
    state.progress_step = Duration::ZERO;
    Harness {
        state,
        messenger,
        _dir: dir,
    }
}

fn text(t: &str) -> IncomingText {
    IncomingText {
        chat_id: ChatId(USER),
        user_id: UserId(USER),
        is_private: true,
        text: t.to_string(),
    }
}

fn click(data: &str) -> Callback {
    Callback {
        chat_id: ChatId(USER),
        user_id: UserId(USER),
        callback_id: "cb".to_string(),
        data: data.to_string(),
        message: Some(MessageRef {
            chat_id: ChatId(USER),
            message_id: MessageId(1),
        }),
    }
}

fn lod_model() -> FakeModel {
    FakeModel::new()
        .respond_when(
            "Classify this user query",
            r#"{"intent":"safety_status","location":"Lod"}"#,
        )
        .respond_when("Generate response", "All quiet in Lod.")
}

#[tokio::test]
async fn allow_list_rejects_strangers() {
    let h = harness(FakeModel::new(), &[("TELEGRAM_ALLOWED_USERS", "1,2")]);
    on_text(&h.state, text("/start")).await;
    assert_eq!(
        h.messenger.sent(),
        vec![Sent::Html {
            chat_id: USER,
            text: "Unauthorized. Contact the bot owner for access.".to_string()
        }]
    );

    on_callback(&h.state, click("news")).await;
    assert_eq!(h.messenger.last_text(), "Unauthorized");
}

#[tokio::test]
async fn start_and_help_show_welcome() {
    let h = harness(FakeModel::new(), &[]);
    on_text(&h.state, text("/help@TheWatchBot")).await;
    let out = h.messenger.last_text();
    assert!(out.starts_with("👁️ <b>Welcome to The Watch</b>"));
    assert!(out.contains("<code>/safety &lt;location&gt;</code>"));
}

#[tokio::test]
async fn safety_requires_location_then_reports_level() {
    let h = harness(lod_model(), &[]);
    on_text(&h.state, text("/safety")).await;
    assert!(h.messenger.last_text().starts_with("⚠️ אנא ציין מיקום:"));

    on_text(&h.state, text("/safety Lod")).await;
    let sent = h.messenger.sent();
    assert!(sent
        .iter()
        .any(|s| s.text() == "🔍 <b>בודק בטיחות עבור Lod...</b>"));
    assert_eq!(
        sent.last().unwrap(),
        &Sent::Edit {
            message_id: 2,
            text: "✅ MINIMAL <b>MINIMAL</b> (0.0/10)\n\nAll quiet in Lod.".to_string()
        }
    );
}

#[tokio::test]
async fn natural_query_edits_progress_into_answer() {
    let h = harness(lod_model(), &[]);
    on_text(&h.state, text("is lod safe?")).await;

    let sent = h.messenger.sent();
    assert_eq!(sent[0], Sent::Typing { chat_id: USER });
    assert!(sent[1].text().contains("⏳ מחפש במסד הנתונים..."));
    assert!(matches!(sent[2], Sent::Edit { message_id: 1, .. }));
    assert!(matches!(sent[3], Sent::Edit { message_id: 1, .. }));
    let Sent::EditKeyboard {
        message_id,
        text,
        keyboard,
    } = &sent[4]
    else {
        panic!("expected final keyboard edit, got {:?}", sent[4]);
    };
    assert_eq!(*message_id, 1);
    assert_eq!(text, "✅ MINIMAL\n\nAll quiet in Lod.");
    assert_eq!(
        keyboard.rows[0][0].callback_data,
        "refresh:Lod".to_string()
    );
}

#[tokio::test]
async fn group_chatter_is_ignored() {
    let h = harness(lod_model(), &[]);
    let mut msg = text("hello everyone");
    msg.is_private = false;
    on_text(&h.state, msg).await;
    assert!(h.messenger.sent().is_empty());
}

#[tokio::test]
async fn failed_generation_offers_restart() {
    let h = harness(FakeModel::new(), &[]);
    on_text(&h.state, text("what happened?")).await;
    let last = h.messenger.sent().pop().unwrap();
    assert!(last.text().starts_with("❌ <b>הניתוח נכשל</b>"));
    assert_eq!(
        last.keyboard().unwrap().rows[0][0].callback_data,
        "start".to_string()
    );
}

#[tokio::test]
async fn rate_limit_blocks_llm_requests() {
    let h = harness(
        lod_model(),
        &[("RATE_LIMIT_REQUESTS", "1"), ("RATE_LIMIT_WINDOW", "3600")],
    );
    on_text(&h.state, text("is lod safe?")).await;
    let before = h.messenger.sent().len();
    on_text(&h.state, text("and now?")).await;
    let sent = h.messenger.sent();
    assert_eq!(sent.len(), before + 1);
    assert!(sent[before]
        .text()
        .starts_with("⏳ Too many requests. Please wait"));
}

#[tokio::test]
async fn news_without_preferences_offers_setup() {
    let h = harness(FakeModel::new(), &[]);
    on_text(&h.state, text("/news")).await;
    let last = h.messenger.sent().pop().unwrap();
    assert!(last.text().starts_with("<b>Personalized News</b>"));
    let data: Vec<&str> = last
        .keyboard()
        .unwrap()
        .buttons()
        .map(|b| b.callback_data.as_str())
        .collect();
    assert_eq!(data, vec!["set_preferences", "news_all"]);
}

#[tokio::test]
async fn preference_conversation_saves_and_personalizes_news() {
    let model = FakeModel::new().respond_when(
        "USER MESSAGE: I want Lod",
        r#"```json
{"cities": ["Lod"], "streets": [], "neighborhoods": []}
```"#,
    );
    let h = harness(model, &[]);
    h.state
        .analyst
        .store()
        .store_incident(new_incident("Shots fired in Lod.", "Lod", EventType::Shooting, 8))
        .await
        .unwrap();
    h.state
        .analyst
        .store()
        .store_incident(new_incident("Fire in Haifa.", "Haifa", EventType::Arson, 5))
        .await
        .unwrap();

    on_text(&h.state, text("/prefs")).await;
    assert!(h
        .messenger
        .last_text()
        .starts_with("👋 <b>Let's set up your preferences!</b>"));
    assert!(h.state.conversations.is_active(UserId(USER)).await);

    on_text(&h.state, text("I want Lod")).await;
    let proposal = h.messenger.sent().pop().unwrap();
    assert!(proposal.text().contains("🏙️ <b>Cities:</b> Lod"));
    assert_eq!(proposal.keyboard().unwrap().rows.len(), 2);

    on_callback(&h.state, click("save_preferences")).await;
    assert!(h
        .messenger
        .sent()
        .iter()
        .any(|s| s.text().starts_with("✅ <b>Preferences Saved!</b>")));
    assert!(!h.state.conversations.is_active(UserId(USER)).await);
    assert_eq!(
        h.state.prefs.get(UserId(USER)).unwrap().preferred_cities,
        vec!["Lod"]
    );

    on_text(&h.state, text("/news")).await;
    let news = h.messenger.sent().pop().unwrap();
    assert!(matches!(news, Sent::EditKeyboard { .. }));
    assert!(news
        .text()
        .contains("Found <b>1</b> incidents in your areas:\n(Out of 2 total incidents)"));
    assert!(news.text().contains("1. <b>Lod (8/10)</b>\n   Shots fired in Lod."));
    assert!(!news.text().contains("Haifa"));
}

#[tokio::test]
async fn unclear_replies_ask_again_and_cancel_ends_setup() {
    let model = FakeModel::new().respond_when("USER MESSAGE:", r#"{"cities": []}"#);
    let h = harness(model, &[]);
    on_callback(&h.state, click("set_preferences")).await;
    on_text(&h.state, text("hmm")).await;
    assert!(h
        .messenger
        .last_text()
        .starts_with("🤔 <b>I need a bit more information</b>"));

    on_text(&h.state, text("ביטול")).await;
    assert_eq!(h.messenger.last_text(), "❌ Preferences setup cancelled.");
    assert!(!h.state.conversations.is_active(UserId(USER)).await);
}

#[tokio::test]
async fn save_without_proposal_only_answers() {
    let h = harness(FakeModel::new(), &[]);
    on_callback(&h.state, click("save_preferences")).await;
    assert_eq!(
        h.messenger.sent(),
        vec![Sent::CallbackAnswer {
            callback_id: "cb".to_string(),
            text: Some("No pending preferences to save.".to_string()),
        }]
    );
}

#[tokio::test]
async fn callbacks_for_stats_news_all_refresh_and_unknown() {
    let h = harness(lod_model(), &[]);
    h.state
        .analyst
        .store()
        .store_incident(new_incident("Roadblock at the entrance.", "Lod", EventType::Roadblock, 3))
        .await
        .unwrap();

    on_callback(&h.state, click("stats")).await;
    assert!(h
        .messenger
        .last_text()
        .contains("• Total: <b>1</b> incidents"));

    on_callback(&h.state, click("news_all")).await;
    assert!(h
        .messenger
        .last_text()
        .contains("1. <b>Lod (3/10)</b>\n   Roadblock at the entrance."));

    on_callback(&h.state, click("refresh:Lod")).await;
    assert!(h.messenger.sent().contains(&Sent::CallbackAnswer {
        callback_id: "cb".to_string(),
        text: Some("Refreshing Lod...".to_string()),
    }));
    assert!(h.messenger.last_text().ends_with("All quiet in Lod."));

    on_callback(&h.state, click("bogus")).await;
    assert_eq!(h.messenger.last_text(), "Unknown action");
}

#[tokio::test]
async fn clear_preferences_resets_saved_places() {
    let h = harness(FakeModel::new(), &[]);
    h.state
        .prefs
        .set(UserId(USER), Some(vec!["Lod".into()]), None, None)
        .unwrap();
    on_text(&h.state, text("/prefs")).await;
    assert!(h
        .messenger
        .last_text()
        .starts_with("⚙️ <b>Your Current Preferences</b>"));

    on_callback(&h.state, click("clear_preferences")).await;
    assert!(h
        .messenger
        .last_text()
        .starts_with("✅ <b>Preferences Cleared</b>"));
    assert!(!h.state.prefs.get(UserId(USER)).unwrap().has_preferences());
}
