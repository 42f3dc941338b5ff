//! Bot message bodies, written as Markdown and converted with
//! [`markdown_to_html`](watch_core::formatting::markdown_to_html) at send time.

use watch_core::{
    formatting::{clean_summary, event_emoji, risk_badge},
    messaging::types::{InlineButton, InlineKeyboard},
    pipeline::AnalystReport,
    preferences::{list_or_none, rank_for_news, PreferenceUpdate, UserPreferences},
    schemas::{EventType, Incident},
    store::StoreStats,
};

pub const PERSONALIZED_NEWS_LIMIT: usize = 15;
pub const NEWS_LIST_LIMIT: usize = 10;

pub const WELCOME: &str = "👁️ **Welcome to The Watch**

I'm your safety intelligence assistant for communities in Israel.

**Commands:**
• `/safety <location>` - Check safety status
• `/news` - Breaking news (last 24h)
• `/prefs` - Locations for personalized news
• `/stats` - Database statistics
• `/help` - Show this message

**Or just ask me naturally:**
• \"מה המצב ברחוב הרצל בתל אביב?\"
• \"מה קרה היום בירושלים?\"
• \"האם בטוח ברחוב יפו בחיפה?\"
• \"מה המצב בשדרות רוטשילד?\"

Stay safe! 🙏";

pub const READY: &str = "👁️ **The Watch Ready**

Send me a location or question about safety in Israel.
Example: מה המצב בלוד?";

pub const SAFETY_USAGE: &str = "⚠️ אנא ציין מיקום:
`/safety רחוב הרצל, תל אביב`
`/safety נצרת`";

pub const NEWS_LOADING: &str = "**מביא חדשות מותאמות אישית...**";

pub const NEWS_NEEDS_PREFERENCES: &str = "**Personalized News**

To get news for your preferred locations, please set your preferences first.

You can:
• Set specific cities, streets, or neighborhoods
• Or view all news without filtering

Use `/prefs` to configure your settings.";

pub const PREFS_WELCOME: &str = "👋 **Let's set up your preferences!**

I'll help you configure which locations you want to monitor for news.

**Just tell me naturally, for example:**
• \"I want to monitor Tel Aviv and Jerusalem\"
• \"רחוב הרצל בתל אביב ושדרות רוטשילד\"
• \"תל אביב, ירושלים, וחיפה\"
• \"I'm interested in Herzl Street in Tel Aviv and the Old City in Jerusalem\"

What locations would you like to monitor? 🗺️";

pub const PREFS_RETRY: &str = "✏️ **Let's try again**

Tell me which locations you'd like to monitor.

**Examples:**
• \"תל אביב וירושלים\"
• \"רחוב הרצל בתל אביב\"
• \"Tel Aviv, Jerusalem, and Haifa\"";

pub const PREFS_CLARIFY: &str = "🤔 **I need a bit more information**

Could you tell me which cities, streets, or neighborhoods you'd like to monitor?

**Examples:**
• \"תל אביב וירושלים\"
• \"רחוב הרצל בתל אביב\"
• \"Tel Aviv, Jerusalem, and Haifa\"

Or type 'cancel' to stop.";

pub const PREFS_CANCELLED: &str = "❌ Preferences setup cancelled.";

pub const PREFS_CLEARED: &str = "✅ **Preferences Cleared**

Your preferences have been reset. Use `/prefs` to set new ones.";

pub const UNAUTHORIZED: &str = "Unauthorized. Contact the bot owner for access.";

/// The three stages shown while a natural query runs.
pub const QUERY_PROGRESS: [&str; 3] = [
    "🔍 **מנתח את השאילתה שלך...**\n\n⏳ מחפש במסד הנתונים...\n📍 ממיר כתובת...\n📊 מחשב הערכת סיכון...",
    "🔍 **מנתח את השאילתה שלך...**\n\n✅ מחפש במסד הנתונים...\n📍 ממיר כתובת...\n📊 מחשב הערכת סיכון...",
    "🔍 **מנתח את השאילתה שלך...**\n\n✅ מחפש במסד הנתונים...\n✅ ממיר כתובת...\n📊 מחשב הערכת סיכון...",
];

pub fn rate_limited(retry_after_secs: u64) -> String {
    format!("⏳ Too many requests. Please wait {retry_after_secs}s and try again.")
}

pub fn safety_checking(location: &str) -> String {
    format!("🔍 **בודק בטיחות עבור {location}...**")
}

/// The `/safety` answer: badge, level and score above the response.
pub fn safety_result(report: &AnalystReport) -> String {
    match &report.risk_assessment {
        Some(risk) => format!(
            "{} **{}** ({:.1}/10)\n\n{}",
            risk_badge(risk.risk_score),
            risk.risk_level.as_str().to_uppercase(),
            risk.risk_score,
            report.response
        ),
        None => report.response.clone(),
    }
}

/// Natural-query and refresh answers carry the badge only.
pub fn badged_response(report: &AnalystReport) -> String {
    match &report.risk_assessment {
        Some(risk) => format!("{}\n\n{}", risk_badge(risk.risk_score), report.response),
        None => report.response.clone(),
    }
}

pub fn query_failed(error: &str) -> String {
    let short: String = error.chars().take(100).collect();
    format!(
        "❌ **הניתוח נכשל**\n\nשגיאה: {short}\n\nאנא נסה שוב או השתמש ב-`/help` לפקודות זמינות."
    )
}

fn location_line(inc: &Incident) -> String {
    let street = inc.street.trim();
    let city = if inc.city.trim().is_empty() {
        "Unknown"
    } else {
        inc.city.trim()
    };
    if street.is_empty() || street.eq_ignore_ascii_case("unknown") || street == "לא ידוע" {
        city.to_string()
    } else {
        format!("{city}, {street}")
    }
}

fn news_item(n: usize, inc: &Incident) -> String {
    format!(
        "{n}. **{} ({}/10)**\n   {}\n\n",
        location_line(inc),
        inc.severity_score,
        clean_summary(&inc.summary)
    )
}

pub fn no_preferred_incidents(total: usize, prefs: &UserPreferences) -> String {
    format!(
        "**No incidents in your preferred areas** (Last 24h)\n\n\
         Total incidents found: {total}\n\
         Filtered by your preferences: 0\n\n\
         Your preferences:\n\
         • Cities: {}\n\
         • Streets: {}\n\
         • Neighborhoods: {}\n\n\
         Use `/prefs` to update your settings.",
        list_or_none(&prefs.preferred_cities),
        list_or_none(&prefs.preferred_streets),
        list_or_none(&prefs.preferred_neighborhoods),
    )
}

/// `/news` for a user with preferences; `filtered` is newest first.
pub fn personalized_news(prefs: &UserPreferences, total: usize, filtered: &[Incident]) -> String {
    let mut out = format!(
        "**Personalized News** (Last 24h)\nFound **{}** incidents in your areas:\n(Out of {total} total incidents)\n\n",
        filtered.len()
    );
    for (i, inc) in rank_for_news(prefs, filtered, PERSONALIZED_NEWS_LIMIT)
        .into_iter()
        .enumerate()
    {
        out.push_str(&news_item(i + 1, inc));
    }
    if filtered.len() > PERSONALIZED_NEWS_LIMIT {
        out.push_str(&format!(
            "\n_... and {} more incidents_",
            filtered.len() - PERSONALIZED_NEWS_LIMIT
        ));
    }
    out
}

/// Short list used by the news buttons.
pub fn news_list(title: &str, incidents: &[Incident]) -> String {
    let mut out = format!(
        "**{title}** (Last 24h)\nFound **{}** incidents\n\n",
        incidents.len()
    );
    for (i, inc) in incidents.iter().take(NEWS_LIST_LIMIT).enumerate() {
        out.push_str(&news_item(i + 1, inc));
    }
    out
}

pub fn current_preferences(prefs: &UserPreferences) -> String {
    format!(
        "⚙️ **Your Current Preferences**\n\n\
         🏙️ Cities: {}\n\
         🛣️ Streets: {}\n\
         🏘️ Neighborhoods: {}\n\n\
         Would you like to update your preferences?",
        list_or_none(&prefs.preferred_cities),
        list_or_none(&prefs.preferred_streets),
        list_or_none(&prefs.preferred_neighborhoods),
    )
}

pub fn preferences_understood(update: &PreferenceUpdate) -> String {
    format!(
        "✅ **I understood your preferences:**\n\n\
         🏙️ **Cities:** {}\n\
         🛣️ **Streets:** {}\n\
         🏘️ **Neighborhoods:** {}\n\n\
         Is this correct? I'll save these preferences.",
        list_or_none(&update.cities),
        list_or_none(&update.streets),
        list_or_none(&update.neighborhoods),
    )
}

pub fn preferences_saved(prefs: &UserPreferences) -> String {
    format!(
        "✅ **Preferences Saved!**\n\n\
         🏙️ Cities: {}\n\
         🛣️ Streets: {}\n\
         🏘️ Neighborhoods: {}\n\n\
         Use `/news` to see personalized updates! 📰",
        list_or_none(&prefs.preferred_cities),
        list_or_none(&prefs.preferred_streets),
        list_or_none(&prefs.preferred_neighborhoods),
    )
}

pub fn stats(s: &StoreStats) -> String {
    let mut out = format!(
        "📊 **The Watch Database Statistics**\n\n\
         • Total incidents: **{}**\n\
         • Avg severity: **{}**/10\n\
         • Max severity: **{}**/10\n",
        s.total_incidents, s.avg_severity, s.max_severity
    );
    if !s.incidents_by_city.is_empty() {
        out.push_str("\n**Top Cities:**\n");
        for (city, n) in s.incidents_by_city.iter().take(5) {
            out.push_str(&format!("  • {city}: {n}\n"));
        }
    }
    if !s.incidents_by_type.is_empty() {
        out.push_str("\n**By Type:**\n");
        for (t, n) in &s.incidents_by_type {
            let emoji = event_emoji(EventType::parse_lenient(t));
            out.push_str(&format!("  • {emoji} {t}: {n}\n"));
        }
    }
    out
}

pub fn stats_short(s: &StoreStats) -> String {
    format!(
        "📊 **Database Stats**\n\n• Total: **{}** incidents\n• Avg severity: **{:.1}**/10\n",
        s.total_incidents, s.avg_severity
    )
}

pub fn news_keyboard() -> InlineKeyboard {
    InlineKeyboard::single_column(vec![
        InlineButton::new("⚙️ Update Preferences", "set_preferences"),
        InlineButton::new("🔄 Refresh", "news"),
    ])
}

pub fn needs_preferences_keyboard() -> InlineKeyboard {
    InlineKeyboard::single_column(vec![
        InlineButton::new("⚙️ Set Preferences", "set_preferences"),
        InlineButton::new("📰 Show All News", "news_all"),
    ])
}

pub fn current_preferences_keyboard() -> InlineKeyboard {
    InlineKeyboard::new(vec![vec![
        InlineButton::new("✏️ Update Preferences", "start_preferences_conversation"),
        InlineButton::new("🗑️ Clear", "clear_preferences"),
    ]])
}

pub fn cancel_keyboard() -> InlineKeyboard {
    InlineKeyboard::single_column(vec![InlineButton::new("❌ Cancel", "cancel_preferences")])
}

pub fn confirm_keyboard() -> InlineKeyboard {
    InlineKeyboard::new(vec![
        vec![
            InlineButton::new("✅ Yes, Save", "save_preferences"),
            InlineButton::new("✏️ Edit", "edit_preferences"),
        ],
        vec![InlineButton::new("❌ Cancel", "cancel_preferences")],
    ])
}

/// Follow-ups under a natural-query answer.
pub fn query_keyboard(refresh_target: &str) -> InlineKeyboard {
    InlineKeyboard::new(vec![
        vec![InlineButton::new("🔄 רענון", format!("refresh:{refresh_target}"))],
        vec![
            InlineButton::new("📰 חדשות אחרונות", "news"),
            InlineButton::new("📊 סטטיסטיקות", "stats"),
        ],
    ])
}

pub fn restart_keyboard() -> InlineKeyboard {
    InlineKeyboard::single_column(vec![InlineButton::new("🏠 התחל מחדש", "start")])
}
