use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ScrapeError;

/// Default cap on records returned by a collect-all run
pub const DEFAULT_MAX_RESULTS: usize = 200;

/// Kind of property being searched for
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PropertyCategory {
    #[default]
    Apartment,
    House,
    Commercial,
}

impl PropertyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyCategory::Apartment => "apartment",
            PropertyCategory::House => "house",
            PropertyCategory::Commercial => "commercial",
        }
    }

    /// Path segment used by the classifieds site
    pub fn slug(&self) -> &'static str {
        match self {
            PropertyCategory::Apartment => "kvartiry",
            PropertyCategory::House => "doma-dachi",
            PropertyCategory::Commercial => "kommercheskaya-nedvizhimost",
        }
    }
}

/// Who published the listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SellerType {
    Owner,
    Agent,
    Developer,
}

impl SellerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SellerType::Owner => "owner",
            SellerType::Agent => "agent",
            SellerType::Developer => "developer",
        }
    }

    /// Value of the `das[who]` search parameter
    pub fn code(&self) -> u8 {
        match self {
            SellerType::Owner => 1,
            SellerType::Agent => 2,
            SellerType::Developer => 3,
        }
    }
}

/// Search parameters for one scrape run.
///
/// Ranges are not checked for `min <= max`; callers are expected to pass
/// sensible bounds. Inverted ranges are only reported through
/// [`ListingFilter::inverted_ranges`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ListingFilter {
    pub property_type: PropertyCategory,
    /// City slug or display name (required)
    pub city: String,
    pub district: Option<String>,
    pub rooms: Option<u32>,
    pub price_from: Option<i64>,
    pub price_to: Option<i64>,
    /// Total area in square meters
    pub area_from: Option<u32>,
    pub area_to: Option<u32>,
    pub kitchen_area_from: Option<u32>,
    pub kitchen_area_to: Option<u32>,
    pub floor_from: Option<i32>,
    pub floor_to: Option<i32>,
    /// Number of floors in the building
    pub house_floor_from: Option<u32>,
    pub house_floor_to: Option<u32>,
    /// Construction year
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub has_photo: bool,
    pub new_building: bool,
    pub floor_not_first: bool,
    pub floor_not_last: bool,
    pub seller_type: Option<SellerType>,
    /// Residential complex name
    pub complex: Option<String>,
    pub collect_all_pages: bool,
    pub max_results: usize,
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            property_type: PropertyCategory::default(),
            city: String::new(),
            district: None,
            rooms: None,
            price_from: None,
            price_to: None,
            area_from: None,
            area_to: None,
            kitchen_area_from: None,
            kitchen_area_to: None,
            floor_from: None,
            floor_to: None,
            house_floor_from: None,
            house_floor_to: None,
            year_from: None,
            year_to: None,
            has_photo: false,
            new_building: false,
            floor_not_first: false,
            floor_not_last: false,
            seller_type: None,
            complex: None,
            collect_all_pages: false,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl ListingFilter {
    /// Filter for the given city with everything else unset
    pub fn for_city(city: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            ..Self::default()
        }
    }

    /// Structural checks that must pass before any worker starts
    pub fn validate(&self) -> Result<(), ScrapeError> {
        if self.city.trim().is_empty() {
            return Err(ScrapeError::InvalidFilter("city is required".to_string()));
        }
        Ok(())
    }

    /// Record cap, with zero meaning "use the default"
    pub fn effective_max_results(&self) -> usize {
        if self.max_results == 0 {
            DEFAULT_MAX_RESULTS
        } else {
            self.max_results
        }
    }

    /// Names of ranges whose lower bound exceeds the upper bound
    pub fn inverted_ranges(&self) -> Vec<&'static str> {
        fn inverted<T: PartialOrd>(from: &Option<T>, to: &Option<T>) -> bool {
            matches!((from, to), (Some(a), Some(b)) if a > b)
        }

        let mut names = Vec::new();
        if inverted(&self.price_from, &self.price_to) {
            names.push("price");
        }
        if inverted(&self.area_from, &self.area_to) {
            names.push("area");
        }
        if inverted(&self.kitchen_area_from, &self.kitchen_area_to) {
            names.push("kitchen_area");
        }
        if inverted(&self.floor_from, &self.floor_to) {
            names.push("floor");
        }
        if inverted(&self.house_floor_from, &self.house_floor_to) {
            names.push("total_floors");
        }
        if inverted(&self.year_from, &self.year_to) {
            names.push("build_year");
        }
        names
    }

    /// Filter fields that were actually set, keyed by snake_case parameter name
    pub fn applied_fields(&self) -> Map<String, Value> {
        let mut map = Map::new();

        let mut text = |key: &str, value: Option<&str>| {
            if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
                map.insert(key.to_string(), Value::from(v));
            }
        };
        text("city", Some(self.city.as_str()));
        text("district", self.district.as_deref());
        text("seller_type", self.seller_type.as_ref().map(SellerType::as_str));
        text("residential_complex", self.complex.as_deref());

        map.insert(
            "property_type".to_string(),
            Value::from(self.property_type.as_str()),
        );

        let numbers: [(&str, Option<i64>); 13] = [
            ("rooms", self.rooms.map(i64::from)),
            ("price_min", self.price_from),
            ("price_max", self.price_to),
            ("total_area_from", self.area_from.map(i64::from)),
            ("total_area_to", self.area_to.map(i64::from)),
            ("kitchen_area_from", self.kitchen_area_from.map(i64::from)),
            ("kitchen_area_to", self.kitchen_area_to.map(i64::from)),
            ("floor_from", self.floor_from.map(i64::from)),
            ("floor_to", self.floor_to.map(i64::from)),
            ("total_floors_from", self.house_floor_from.map(i64::from)),
            ("total_floors_to", self.house_floor_to.map(i64::from)),
            ("build_year_from", self.year_from.map(i64::from)),
            ("build_year_to", self.year_to.map(i64::from)),
        ];
        for (key, value) in numbers {
            if let Some(v) = value {
                map.insert(key.to_string(), Value::from(v));
            }
        }

        let flags = [
            ("has_photos", self.has_photo),
            ("is_new_building", self.new_building),
            ("not_first_floor", self.floor_not_first),
            ("not_last_floor", self.floor_not_last),
            ("collect_all_pages", self.collect_all_pages),
        ];
        for (key, set) in flags {
            if set {
                map.insert(key.to_string(), Value::Bool(true));
            }
        }

        if self.collect_all_pages {
            map.insert(
                "max_results".to_string(),
                Value::from(self.effective_max_results()),
            );
        }

        map
    }
}
