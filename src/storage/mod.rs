pub mod database;
pub mod disclosures;
pub mod listings;
pub mod manager;
pub mod messages;
pub mod migrations;
pub mod organizations;
pub mod path_utils;

/// Row value that does not parse. Mappers fail the row rather than guess.
pub(crate) fn conversion_failure<E>(e: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into())
}
