//! Prompt templates. Placeholders are `{name}` and are filled by [`render`].

use crate::schemas::EventType;

pub const EXTRACT_INCIDENT: &str = r#"You are an expert analyst extracting CRIME and SECURITY incident information from Israeli emergency service reports (MDA, United Hatzalah) and news channels.

Analyze this message and extract structured information:

MESSAGE:
{raw_text}

SOURCE: {source_channel}

**IMPORTANT - FILTERING RULES:**
- ✅ INCLUDE: Shootings, stabbings, terrorist attacks, violent crimes, security incidents, suspicious objects, active threats
- ❌ EXCLUDE: Regular car accidents, medical emergencies (heart attacks, births), fires without crime, weather events, international news
- ❌ EXCLUDE: If the message is about events OUTSIDE Israel

If the message should be EXCLUDED, return:
{"skip": true, "reason": "Not a crime/security incident"}

Otherwise, extract:
{
    "skip": false,
    "summary": "Brief Hebrew summary (תקציר קצר)",
    "summary_en": "Brief English summary",
    "location_description": "Original location text exactly as written",
    "street": "Street/road name if mentioned (e.g., 'שדרות הציונות', 'רחוב הרצל', 'כביש 6') or null if not specified",
    "neighborhood": "Neighborhood/area name if mentioned (e.g., 'שכונת התקווה', 'עיר עתיקה') or null if not specified",
    "city": "City name in Hebrew (e.g., 'תל אביב', 'ירושלים', 'חיפה', 'אום אל-פחם')",
    "city_en": "City name in English transliteration",
    "event_type": "One of: {event_types}",
    "severity": "Integer 1-10 where: 1=minor, 5=significant, 7=serious injuries, 10=active mass-casualty",
    "confidence": "Your confidence in this extraction (0.0-1.0)"
}

Guidelines:
- Severity: terrorist attacks/mass shootings=9-10, shootings with injuries=7-8, stabbings=6-8, suspicious objects=4-6
- Common cities: Tel Aviv, Jerusalem, Haifa, Beer Sheva, Netanya, Ashdod, Rishon LeZion, Petah Tikva, Nazareth, Kafr Qasim, Rahat
- For MDA/Hatzalah messages: focus on crime-related calls, ignore routine medical

Return ONLY the JSON object, no additional text.
"#;

pub const CLASSIFY_QUERY: &str = r#"Classify this user query about safety/incidents in Israel:

QUERY: {user_query}

Determine:
1. Intent: Is the user asking about:
   - "breaking_news": Latest/current incidents (keywords: now, happening, current, latest, breaking)
   - "safety_status": Safety assessment of a location (keywords: safe, risk, should I go, dangerous)
   - "historical": Past incidents/trends (keywords: history, last month, trend, how many)
   - "general": General question about the system

2. Location: Extract any location/city mentioned (return null if none)

3. Time Range: Relevant time period in days (default 30, use 1 for "today", 7 for "this week")

Return JSON:
{
    "intent": "breaking_news|safety_status|historical|general",
    "location": "City name or null",
    "time_range_days": integer
}

Return ONLY the JSON object.
"#;

pub const GENERATE_RESPONSE: &str = r#"You are The Watch (השומר), a safety intelligence assistant for ALL of Israel.

Generate a response based on the risk assessment data.

USER QUERY: {user_query}
QUERY INTENT: {intent}
LOCATION: {location}

RISK ASSESSMENT:
{risk_summary}

RECENT INCIDENTS:
{incidents_text}

**LANGUAGE RULES:**
- If query is in Hebrew → respond in Hebrew
- If query is in Arabic → respond in Arabic
- If query is in English → respond in English
- Default to Hebrew if unclear

**RESPONSE GUIDELINES:**
- Be direct but compassionate - these are real safety concerns
- For risk levels, use appropriate warnings:
  * CRITICAL (8+): "🚨 אזהרה קריטית" - Strongly advise avoiding the area
  * HIGH (6-8): "⚠️ אזהרה" - Elevated risk, exercise extreme caution
  * MODERATE (4-6): "⚡ שימו לב" - Notable incidents, stay alert
  * LOW/MINIMAL (<4): Normal conditions, general awareness
- **IMPORTANT: Keep summaries SHORT and AGGREGATED**
- Instead of listing every incident, summarize by type: "Street X had 3 violent crimes and 1 murder in the last 7 days"
- Focus on patterns and trends, not individual incident details
- If there are ANY violent incidents in the last 7 days, clearly state the area has recent safety concerns
- Mention data sources (MDA, איחוד הצלה) for credibility
- End with practical safety advice
- Keep response concise - maximum 3-4 sentences for the summary

Generate response:
"#;

/// Substitute `{key}` placeholders. Values are inserted verbatim, so user text
/// containing braces cannot trigger a second substitution.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let hit = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (close, *v))
        });
        match hit {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn extract_incident(raw_text: &str, source_channel: &str) -> String {
    let event_types = EventType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    render(
        EXTRACT_INCIDENT,
        &[
            ("raw_text", raw_text),
            ("source_channel", source_channel),
            ("event_types", &event_types),
        ],
    )
}

pub fn classify_query(user_query: &str) -> String {
    render(CLASSIFY_QUERY, &[("user_query", user_query)])
}

pub fn generate_response(
    user_query: &str,
    intent: &str,
    location: &str,
    risk_summary: &str,
    incidents_text: &str,
) -> String {
    render(
        GENERATE_RESPONSE,
        &[
            ("user_query", user_query),
            ("intent", intent),
            ("location", location),
            ("risk_summary", risk_summary),
            ("incidents_text", incidents_text),
        ],
    )
}
