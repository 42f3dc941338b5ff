//! Interactive question loop over stdin/stdout.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{pipeline::AnalystPipeline, store::StoreStats, Result};

pub const PROMPT: &str = "🛡️ Ask about safety > ";
const NEWS_LIMIT: usize = 10;

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Quit,
    Stats,
    News,
    Query(&'a str),
}

fn parse(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(match line.to_lowercase().as_str() {
        "/quit" | "/exit" | "/q" | "exit" | "quit" => Command::Quit,
        "/stats" => Command::Stats,
        "/news" => Command::News,
        _ => Command::Query(line),
    })
}

pub fn format_stats(s: &StoreStats) -> String {
    let mut rows = vec![
        ("Total Incidents", s.total_incidents.to_string()),
        ("Avg Severity", s.avg_severity.to_string()),
        ("Max Severity", s.max_severity.to_string()),
    ];
    if !s.incidents_by_city.is_empty() {
        let top = s
            .incidents_by_city
            .iter()
            .take(5)
            .map(|(c, n)| format!("{c}: {n}"))
            .collect::<Vec<_>>()
            .join(", ");
        rows.push(("Top Cities", top));
    }
    let mut out = String::from("📊 Database Statistics\n");
    for (k, v) in rows {
        out.push_str(&format!("  {k:<16} {v}\n"));
    }
    out
}

/// Run until a quit command or end of input.
pub async fn run<R, W>(pipeline: &AnalystPipeline, input: R, mut out: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    out.write_all(
        "🔍 Starting Analyst CLI Mode...\nType your safety questions. Commands: /stats, /news, /quit\n"
            .as_bytes(),
    )
    .await?;

    loop {
        out.write_all(format!("\n{PROMPT}").as_bytes()).await?;
        out.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let Some(cmd) = parse(&line) else {
            continue;
        };

        let text = match cmd {
            Command::Quit => break,
            Command::Stats => match pipeline.store().get_statistics() {
                Ok(s) => format_stats(&s),
                Err(e) => format!("Error: {e}\n"),
            },
            Command::News => news(pipeline),
            Command::Query(q) => {
                out.write_all(b"\nAnalyzing...\n").await?;
                out.flush().await?;
                answer(pipeline, q).await
            }
        };
        out.write_all(text.as_bytes()).await?;
    }

    out.write_all("\n👋 Analyst CLI closed.\n".as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

fn news(pipeline: &AnalystPipeline) -> String {
    let news = pipeline.get_breaking_news(24);
    let mut out = String::from("\n📰 Breaking News (Last 24 Hours):\n");
    if let Some(e) = news.error {
        out.push_str(&format!("  Error: {e}\n"));
    } else if news.incidents.is_empty() {
        out.push_str("  No recent incidents found\n");
    }
    for inc in news.incidents.iter().take(NEWS_LIMIT) {
        out.push_str(&format!("  • [{}] {}\n", inc.event_type, inc.summary));
        out.push_str(&format!(
            "    {} - Severity: {}/10\n",
            inc.city, inc.severity_score
        ));
    }
    out
}

async fn answer(pipeline: &AnalystPipeline, query: &str) -> String {
    let report = pipeline.query_safety_status(query).await;
    if let Some(e) = report.error {
        return format!("Error: {e}\n");
    }
    let mut out = format!("\n{}\n", report.response);
    if report.risk_assessment.is_some() {
        out.push_str(&format!(
            "\n📍 Location: {}\n📊 Incidents analyzed: {}\n",
            report.location.as_deref().unwrap_or("Unknown"),
            report.incident_count
        ));
    }
    out
}
