//! Bundled sample data for `--test-pipeline`.

use chrono::Utc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    formatting::truncate_chars,
    pipeline::{AnalystPipeline, ProcessingPipeline},
    schemas::TelegramMessage,
    Result,
};

pub const SAMPLE_CHANNEL_ID: i64 = -1001234567890;
pub const SAMPLE_CHANNEL_NAME: &str = "Test Channel";

pub const SAMPLE_QUERIES: [&str; 3] = [
    "Is Tel Aviv safe right now?",
    "What happened in Kafr Qasim today?",
    "Show me recent incidents in the Triangle region",
];

const RESPONSE_PREVIEW_CHARS: usize = 500;

pub fn sample_messages() -> Vec<TelegramMessage> {
    let texts = [
        (1001, "🚨 דיווח על ירי באום אל פחם ליד המאפייה הישנה. כוחות משטרה במקום."),
        (1002, "מחסום משטרתי בכניסה לכפר קאסם. עיכובים בתנועה."),
        (1003, "תאונת דרכים ליד הכניסה לטמרה. פצועים קל. כוחות הצלה במקום."),
    ];
    let now = Utc::now();
    texts
        .into_iter()
        .map(|(id, text)| TelegramMessage {
            message_id: id,
            channel_id: SAMPLE_CHANNEL_ID,
            channel_name: SAMPLE_CHANNEL_NAME.to_string(),
            text: text.to_string(),
            timestamp: now,
            has_media: false,
            media_type: None,
            reply_to_message_id: None,
        })
        .collect()
}

/// Process the sample messages, then ask the sample questions, reporting to `out`.
pub async fn run_sample_pipeline<W>(
    processing: &ProcessingPipeline,
    analyst: &AnalystPipeline,
    mut out: W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all("🧪 Testing Processing Pipeline...\n\n".as_bytes())
        .await?;
    for (i, msg) in sample_messages().iter().enumerate() {
        let mut block = format!("Test {}: {}\n", i + 1, truncate_chars(&msg.text, 80));
        let result = processing.process_message(msg).await;
        if result.success() {
            block.push_str(&format!(
                "  ✅ Processed:\n     Summary: {}\n     City: {}\n     Type: {}\n     Severity: {}/10\n     Coordinates: ({}, {})\n",
                result.summary,
                result.city,
                result.event_type.map(|t| t.as_str()).unwrap_or("unknown"),
                result.severity,
                result.coordinates.lat,
                result.coordinates.lon,
            ));
        } else {
            block.push_str(&format!(
                "  ❌ Failed: {}\n",
                result.error.as_deref().unwrap_or("Unknown")
            ));
        }
        block.push('\n');
        out.write_all(block.as_bytes()).await?;
    }

    out.write_all("\n🧪 Testing Query Pipeline...\n\n".as_bytes())
        .await?;
    for query in SAMPLE_QUERIES {
        let report = analyst.query_safety_status(query).await;
        let response = if report.response.is_empty() {
            "No response".to_string()
        } else {
            truncate_chars(&report.response, RESPONSE_PREVIEW_CHARS)
        };
        out.write_all(format!("Query: {query}\nResponse:\n  {response}\n\n").as_bytes())
            .await?;
    }

    out.write_all("✅ Pipeline tests complete!\n".as_bytes())
        .await?;
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        geocoder::Geocoder,
        store::IncidentStore,
        testing::{FakeEmbedder, FakeModel},
    };

    #[test]
    fn sample_messages_are_distinct_hebrew_posts() {
        let msgs = sample_messages();
        let ids: Vec<i64> = msgs.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, vec![1001, 1002, 1003]);
        assert!(msgs.iter().all(|m| m.channel_id == SAMPLE_CHANNEL_ID));
        assert!(msgs[1].text.contains("כפר קאסם"));
    }

    #[tokio::test]
    async fn runs_end_to_end_on_fakes() {
        let long_answer = "x".repeat(600);
        let model = Arc::new(
            FakeModel::new()
                .respond_when("Classify this user query", r#"{"intent":"general"}"#)
                .respond_when("Generate response", &long_answer)
                .respond_when(
                    "אום אל פחם",
                    r#"{"summary":"ירי באום אל פחם","city":"אום אל-פחם","event_type":"shooting","severity":7}"#,
                )
                .respond_when(
                    "כפר קאסם. עיכובים",
                    r#"{"summary":"מחסום בכפר קאסם","city":"כפר קאסם","event_type":"roadblock","severity":3}"#,
                )
                .respond_when("טמרה", r#"{"skip": true, "reason": "Traffic accident"}"#),
        );
        let store = Arc::new(IncidentStore::open_in_memory("s", Arc::new(FakeEmbedder)).unwrap());
        let geocoder = Arc::new(Geocoder::offline());
        let processing = ProcessingPipeline::new(model.clone(), geocoder.clone(), store.clone());
        let analyst = AnalystPipeline::new(model, geocoder, store.clone());

        let mut out = Vec::new();
        run_sample_pipeline(&processing, &analyst, &mut out)
            .await
            .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert_eq!(out.matches("✅ Processed:").count(), 2);
        assert!(out.contains("❌ Failed: Skipped: Traffic accident"));
        assert!(out.contains(&format!("  {}...\n", "x".repeat(500))));
        assert!(out.ends_with("✅ Pipeline tests complete!\n"));
        assert_eq!(store.count().unwrap(), 2);
    }
}
