use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_DESCRIPTOR_LEN, MAX_NOTES_LEN, MAX_SKILL_TAGS};
use crate::time_utils;
use crate::{ExchangeError, ExchangeResult};

/// What a listing offers or asks for. Closed set; display grouping is a
/// projection over this tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    OfferingStaff,
    RequestingStaff,
    OfferingSpecialSkill,
    OfferingTool,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OfferingStaff => "offering-staff",
            Self::RequestingStaff => "requesting-staff",
            Self::OfferingSpecialSkill => "offering-special-skill",
            Self::OfferingTool => "offering-tool",
        }
    }

    /// Human label used in message subjects and listings tables.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OfferingStaff => "available staff",
            Self::RequestingStaff => "staffing request",
            Self::OfferingSpecialSkill => "special skill",
            Self::OfferingTool => "special tool",
        }
    }

    pub fn accepts_skill_tags(&self) -> bool {
        matches!(self, Self::OfferingSpecialSkill)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offering-staff" | "available_staffing" => Ok(Self::OfferingStaff),
            "requesting-staff" | "want_staffing" => Ok(Self::RequestingStaff),
            "offering-special-skill" | "special_competence" => Ok(Self::OfferingSpecialSkill),
            "offering-tool" | "special_tools" => Ok(Self::OfferingTool),
            _ => Err(format!("Unknown listing category: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceKind {
    Hourly,
    Fixed,
    Negotiable,
}

impl PriceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Fixed => "fixed",
            Self::Negotiable => "negotiable",
        }
    }
}

impl std::str::FromStr for PriceKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Self::Hourly),
            "fixed" => Ok(Self::Fixed),
            "negotiable" => Ok(Self::Negotiable),
            _ => Err(format!("Unknown price kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Open,
    Reserved,
    Closed,
}

impl ReservationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Reserved => "reserved",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReservationState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "reserved" => Ok(Self::Reserved),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("Unknown reservation state: {}", s)),
        }
    }
}

impl Default for ReservationState {
    fn default() -> Self {
        Self::Open
    }
}

/// Calendar validity window `[from, to)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidityWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl ValidityWindow {
    pub fn new(from: NaiveDate, to: NaiveDate) -> ExchangeResult<Self> {
        if from > to {
            return Err(ExchangeError::Validation(format!(
                "validity window starts after it ends ({} > {})",
                from, to
            )));
        }
        Ok(Self { from, to })
    }

    /// Still visible on the marketplace: the window ends at or after `as_of`.
    /// Windows starting in the future are live too.
    pub fn is_live_at(&self, as_of: DateTime<Utc>) -> bool {
        time_utils::start_of_day(&self.to) >= as_of
    }

    pub fn has_elapsed(&self, as_of: DateTime<Utc>) -> bool {
        !self.is_live_at(as_of)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    pub id: String,
    pub owner_org_id: String,
    pub category: Category,
    pub descriptor: String,
    pub window: ValidityWindow,
    pub location: String,
    pub notes: String,
    /// Free-text outreach contact, distinct from the owner's real contact record.
    pub contact_info: String,
    pub skill_tags: Vec<String>,
    pub price: Option<f64>,
    pub price_kind: Option<PriceKind>,
    pub state: ReservationState,
    pub reserved_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Listing {
    pub fn is_owned_by(&self, org_id: &str) -> bool {
        self.owner_org_id == org_id
    }
}

/// Input for `ListingStore::create`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewListing {
    pub category: Category,
    pub descriptor: String,
    pub window: ValidityWindow,
    pub location: String,
    #[serde(default)]
    pub notes: String,
    pub contact_info: String,
    #[serde(default)]
    pub skill_tags: Vec<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub price_kind: Option<PriceKind>,
}

impl NewListing {
    pub fn new(
        category: Category,
        descriptor: &str,
        window: ValidityWindow,
        location: &str,
        contact_info: &str,
    ) -> Self {
        Self {
            category,
            descriptor: descriptor.to_string(),
            window,
            location: location.to_string(),
            notes: String::new(),
            contact_info: contact_info.to_string(),
            skill_tags: vec![],
            price: None,
            price_kind: None,
        }
    }

    /// Checks required fields and category-specific rules, trimming text in place.
    pub fn validate(&mut self) -> ExchangeResult<()> {
        self.window = ValidityWindow::new(self.window.from, self.window.to)?;

        self.descriptor = self.descriptor.trim().to_string();
        self.location = self.location.trim().to_string();
        self.contact_info = self.contact_info.trim().to_string();
        self.notes = self.notes.trim().to_string();

        for (field, value) in [
            ("descriptor", &self.descriptor),
            ("location", &self.location),
            ("contact_info", &self.contact_info),
        ] {
            if value.is_empty() {
                return Err(ExchangeError::Validation(format!("{} is required", field)));
            }
        }
        if self.descriptor.len() > MAX_DESCRIPTOR_LEN {
            return Err(ExchangeError::Validation(format!(
                "descriptor exceeds {} bytes",
                MAX_DESCRIPTOR_LEN
            )));
        }
        if self.notes.len() > MAX_NOTES_LEN {
            return Err(ExchangeError::Validation(format!(
                "notes exceed {} bytes",
                MAX_NOTES_LEN
            )));
        }

        self.skill_tags = self
            .skill_tags
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let mut seen = std::collections::HashSet::new();
        self.skill_tags.retain(|t| seen.insert(t.to_lowercase()));
        if !self.skill_tags.is_empty() && !self.category.accepts_skill_tags() {
            return Err(ExchangeError::Validation(format!(
                "skill tags are only accepted on {} listings",
                Category::OfferingSpecialSkill
            )));
        }
        if self.skill_tags.len() > MAX_SKILL_TAGS {
            return Err(ExchangeError::Validation(format!(
                "at most {} skill tags",
                MAX_SKILL_TAGS
            )));
        }

        if let Some(price) = self.price {
            if !price.is_finite() || price < 0.0 {
                return Err(ExchangeError::Validation(format!(
                    "price must be a non-negative amount, got {}",
                    price
                )));
            }
        }
        Ok(())
    }
}
