use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};

/// Retourne le timestamp courant en UTC, tronque a la precision stockee
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Formate un timestamp ISO 8601 pour SQLite.
/// Precision fixe (microsecondes) pour que l'ordre lexical suive l'ordre temporel.
pub fn to_sqlite(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Parse un timestamp ISO 8601 depuis SQLite
pub fn from_sqlite(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    s.parse::<DateTime<Utc>>()
}

/// Formate une date calendaire (YYYY-MM-DD)
pub fn date_to_sqlite(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// Parse une date calendaire (YYYY-MM-DD)
pub fn date_from_sqlite(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
}

/// Start of the given calendar day, in UTC.
pub fn start_of_day(d: &NaiveDate) -> DateTime<Utc> {
    d.and_time(chrono::NaiveTime::MIN).and_utc()
}
