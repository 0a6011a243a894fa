use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Property categories understood by the listing site
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Apartment,
    Studio,
    GardenApartment,
    Penthouse,
    Duplex,
    House,
}

impl PropertyType {
    /// Code used in the site's `propertyGroup` parameter
    pub fn site_code(self) -> &'static str {
        match self {
            PropertyType::Apartment => "1",
            PropertyType::GardenApartment => "3",
            PropertyType::Studio => "4",
            PropertyType::Penthouse => "5",
            PropertyType::Duplex => "6",
            PropertyType::House => "7",
        }
    }

    /// Words used when phrasing a free-text search for this type
    pub fn search_terms(self) -> &'static str {
        match self {
            PropertyType::Apartment => "apartment דירה",
            PropertyType::Studio => "studio סטודיו",
            PropertyType::GardenApartment => "garden apartment דירת גן",
            PropertyType::Penthouse => "penthouse פנטהאוז",
            PropertyType::Duplex => "duplex דופלקס",
            PropertyType::House => "house בית",
        }
    }
}

impl FromStr for PropertyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "apartment" | "דירה" => Ok(PropertyType::Apartment),
            "studio" | "סטודיו" => Ok(PropertyType::Studio),
            "garden_apartment" | "garden apartment" | "דירת גן" => {
                Ok(PropertyType::GardenApartment)
            }
            "penthouse" | "פנטהאוז" => Ok(PropertyType::Penthouse),
            "duplex" | "דופלקס" => Ok(PropertyType::Duplex),
            "house" | "בית" | "בית פרטי" => Ok(PropertyType::House),
            other => Err(format!("unknown property type: {}", other)),
        }
    }
}

/// Inclusive range where either bound may be open
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Range<T> {
    pub min: Option<T>,
    pub max: Option<T>,
}

impl<T> Range<T> {
    pub fn new(min: Option<T>, max: Option<T>) -> Self {
        Self { min, max }
    }
}

impl<T: fmt::Display> Range<T> {
    /// `min-max`, `min-` or `-max`, the way the site spells ranges
    fn site_format(&self) -> Option<String> {
        match (&self.min, &self.max) {
            (None, None) => None,
            (Some(min), Some(max)) => Some(format!("{}-{}", min, max)),
            (Some(min), None) => Some(format!("{}-", min)),
            (None, Some(max)) => Some(format!("-{}", max)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocationCriteria {
    pub city: String,
    pub sub_area: Option<String>,
}

/// Structured search filter, immutable once built
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    #[serde(default)]
    price: Range<i64>,
    #[serde(default)]
    rooms: Range<f32>,
    #[serde(default)]
    location: LocationCriteria,
    #[serde(default)]
    property_types: Vec<PropertyType>,
}

impl SearchQuery {
    pub fn new(city: impl Into<String>) -> Self {
        Self {
            location: LocationCriteria {
                city: city.into(),
                sub_area: None,
            },
            ..Self::default()
        }
    }

    pub fn with_price(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.price = Range::new(min, max);
        self
    }

    pub fn with_rooms(mut self, min: Option<f32>, max: Option<f32>) -> Self {
        self.rooms = Range::new(min, max);
        self
    }

    pub fn with_sub_area(mut self, sub_area: impl Into<String>) -> Self {
        self.location.sub_area = Some(sub_area.into());
        self
    }

    pub fn with_property_types(mut self, types: impl IntoIterator<Item = PropertyType>) -> Self {
        self.property_types = types.into_iter().collect();
        self
    }

    pub fn price(&self) -> Range<i64> {
        self.price
    }

    pub fn rooms(&self) -> Range<f32> {
        self.rooms
    }

    pub fn location(&self) -> &LocationCriteria {
        &self.location
    }

    pub fn property_types(&self) -> &[PropertyType] {
        &self.property_types
    }

    /// Numeric city code used by the listing site, if the city is known
    pub fn city_code(&self) -> Option<&'static str> {
        city_code(&self.location.city)
    }

    /// Query parameters for the listing site search page
    pub fn site_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();

        if let Some(min) = self.price.min {
            params.push(("priceMin", min.to_string()));
        }
        if let Some(max) = self.price.max {
            params.push(("priceMax", max.to_string()));
        }
        if let Some(rooms) = self.rooms.site_format() {
            params.push(("rooms", rooms));
        }
        if let Some(code) = self.city_code() {
            params.push(("city", code.to_string()));
        }

        let mut codes: Vec<&str> = self.property_types.iter().map(|t| t.site_code()).collect();
        codes.dedup();
        if !codes.is_empty() {
            params.push(("propertyGroup", codes.join(",")));
        }

        params
    }

    /// `base` with this query's parameters appended
    pub fn site_url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        let params = self.site_params();
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &params {
                pairs.append_pair(key, value);
            }
        }
        url
    }

    /// Free-text phrasing of the query for the search index
    pub fn search_text(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if self.property_types.is_empty() {
            parts.push(PropertyType::Apartment.search_terms().to_string());
        } else {
            parts.extend(self.property_types.iter().map(|t| t.search_terms().to_string()));
        }
        parts.push("rent השכרה".to_string());

        match (self.price.min, self.price.max) {
            (Some(min), Some(max)) => parts.push(format!("{}-{} ₪", min, max)),
            (None, Some(max)) => parts.push(format!("up to {} ₪", max)),
            (Some(min), None) => parts.push(format!("from {} ₪", min)),
            (None, None) => {}
        }
        if let Some(rooms) = self.rooms.site_format() {
            parts.push(format!("{} rooms", rooms.trim_matches('-')));
        }

        parts.join(" ")
    }

    /// City plus optional sub-area, for the search index location filter
    pub fn location_text(&self) -> String {
        match &self.location.sub_area {
            Some(sub) if !sub.is_empty() => format!("{} {}", sub, self.location.city),
            _ => self.location.city.clone(),
        }
    }
}

/// Map a city name (Hebrew or English) to the site's numeric code
pub fn city_code(city: &str) -> Option<&'static str> {
    let code = match city.trim() {
        "תל אביב - יפו" | "תל אביב" | "Tel Aviv" | "Tel Aviv-Yafo" => "5000",
        "ירושלים" | "Jerusalem" => "3000",
        "חיפה" | "Haifa" => "4000",
        "באר שבע" | "Beer Sheva" => "8600",
        "פתח תקווה" | "Petah Tikva" => "7900",
        "רמת גן" | "Ramat Gan" => "8300",
        _ => return None,
    };
    Some(code)
}

/// City names recognised in free text, used as a location fallback
pub const KNOWN_CITIES: &[&str] = &[
    "תל אביב",
    "ירושלים",
    "חיפה",
    "באר שבע",
    "פתח תקווה",
    "רמת גן",
    "Tel Aviv",
    "Jerusalem",
    "Haifa",
    "Beer Sheva",
    "Petah Tikva",
    "Ramat Gan",
];
