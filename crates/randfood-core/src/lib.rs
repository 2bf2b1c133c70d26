//! Core domain model for randfood: restaurants, filter state and the add form.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "randfood-core";

pub const PARAM_DISTRICT: &str = "district";
pub const PARAM_PRICE: &str = "price";
pub const PARAM_FOOD_STYLES: &str = "foodStyles";

/// Label used by pickers for "no constraint on this dimension".
pub const ALL_LABEL: &str = "All";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {input:?}")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub input: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum District {
    Central,
    #[serde(rename = "Wan Chai")]
    WanChai,
    #[serde(rename = "Tsim Sha Tsui")]
    TsimShaTsui,
    #[serde(rename = "Mong Kok")]
    MongKok,
    Shatin,
    #[serde(rename = "Tsuen Wan")]
    TsuenWan,
    #[serde(rename = "Yuen Long")]
    YuenLong,
    #[serde(rename = "Tuen Mun")]
    TuenMun,
}

impl District {
    pub const ALL: [District; 8] = [
        District::Central,
        District::WanChai,
        District::TsimShaTsui,
        District::MongKok,
        District::Shatin,
        District::TsuenWan,
        District::YuenLong,
        District::TuenMun,
    ];

    pub fn label(self) -> &'static str {
        match self {
            District::Central => "Central",
            District::WanChai => "Wan Chai",
            District::TsimShaTsui => "Tsim Sha Tsui",
            District::MongKok => "Mong Kok",
            District::Shatin => "Shatin",
            District::TsuenWan => "Tsuen Wan",
            District::YuenLong => "Yuen Long",
            District::TuenMun => "Tuen Mun",
        }
    }
}

impl fmt::Display for District {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for District {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_label(s, &District::ALL, |d| d.label(), "district")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FoodStyle {
    Chinese,
    Western,
    Japanese,
    Korean,
    Thai,
    Indian,
}

impl FoodStyle {
    pub const ALL: [FoodStyle; 6] = [
        FoodStyle::Chinese,
        FoodStyle::Western,
        FoodStyle::Japanese,
        FoodStyle::Korean,
        FoodStyle::Thai,
        FoodStyle::Indian,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FoodStyle::Chinese => "Chinese",
            FoodStyle::Western => "Western",
            FoodStyle::Japanese => "Japanese",
            FoodStyle::Korean => "Korean",
            FoodStyle::Thai => "Thai",
            FoodStyle::Indian => "Indian",
        }
    }
}

impl fmt::Display for FoodStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FoodStyle {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_label(s, &FoodStyle::ALL, |s| s.label(), "food style")
    }
}

/// Upper bound on price; `All` leaves the dimension unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PriceCeiling {
    #[default]
    All,
    UpTo100,
    UpTo150,
    UpTo200,
    UpTo300,
}

impl PriceCeiling {
    pub const CHOICES: [PriceCeiling; 5] = [
        PriceCeiling::All,
        PriceCeiling::UpTo100,
        PriceCeiling::UpTo150,
        PriceCeiling::UpTo200,
        PriceCeiling::UpTo300,
    ];

    pub fn max_price(self) -> Option<i64> {
        match self {
            PriceCeiling::All => None,
            PriceCeiling::UpTo100 => Some(100),
            PriceCeiling::UpTo150 => Some(150),
            PriceCeiling::UpTo200 => Some(200),
            PriceCeiling::UpTo300 => Some(300),
        }
    }

    /// Value sent as the `price` query parameter, `None` for the sentinel.
    pub fn query_value(self) -> Option<&'static str> {
        match self {
            PriceCeiling::All => None,
            PriceCeiling::UpTo100 => Some("100"),
            PriceCeiling::UpTo150 => Some("150"),
            PriceCeiling::UpTo200 => Some("200"),
            PriceCeiling::UpTo300 => Some("300"),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PriceCeiling::All => ALL_LABEL,
            PriceCeiling::UpTo100 => "≤ $100",
            PriceCeiling::UpTo150 => "≤ $150",
            PriceCeiling::UpTo200 => "≤ $200",
            PriceCeiling::UpTo300 => "≤ $300",
        }
    }
}

impl fmt::Display for PriceCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PriceCeiling {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('≤').trim().trim_start_matches('$');
        PriceCeiling::CHOICES
            .into_iter()
            .find(|c| {
                trimmed.eq_ignore_ascii_case(c.label())
                    || c.query_value().is_some_and(|v| v == trimmed)
            })
            .ok_or_else(|| ParseLabelError {
                kind: "price ceiling",
                input: s.to_string(),
            })
    }
}

fn parse_label<T: Copy>(
    input: &str,
    choices: &[T],
    label: impl Fn(T) -> &'static str,
    kind: &'static str,
) -> Result<T, ParseLabelError> {
    let wanted = input.trim();
    choices
        .iter()
        .copied()
        .find(|c| label(*c).eq_ignore_ascii_case(wanted))
        .ok_or_else(|| ParseLabelError {
            kind,
            input: input.to_string(),
        })
}

/// Immutable snapshot of a restaurant as returned by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RestaurantRecord")]
pub struct Restaurant {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "restaurant")]
    pub name: String,
    pub district: String,
    pub price: i64,
    /// 1-5, or 0 when unrated.
    pub rating: u8,
    #[serde(rename = "foodStyles")]
    pub food_styles: Vec<String>,
}

impl Restaurant {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "-"
        } else {
            &self.name
        }
    }

    pub fn district_kind(&self) -> Option<District> {
        self.district.parse().ok()
    }

    pub fn is_rated(&self) -> bool {
        self.rating > 0
    }
}

/// Lenient wire shape; the service may send `restaurant` or `name` and extra fields.
#[derive(Debug, Deserialize)]
struct RestaurantRecord {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(default)]
    restaurant: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    district: Option<String>,
    #[serde(default)]
    price: Option<i64>,
    #[serde(default)]
    rating: Option<i64>,
    #[serde(rename = "foodStyles", default)]
    food_styles: Option<Vec<String>>,
}

impl From<RestaurantRecord> for Restaurant {
    fn from(record: RestaurantRecord) -> Self {
        let name = record
            .restaurant
            .filter(|n| !n.is_empty())
            .or(record.name.filter(|n| !n.is_empty()))
            .unwrap_or_default();
        let rating = match record.rating {
            Some(r @ 1..=5) => r as u8,
            _ => 0,
        };
        Self {
            id: record.id,
            name,
            district: record.district.unwrap_or_default(),
            price: record.price.unwrap_or_default(),
            rating,
            food_styles: record.food_styles.unwrap_or_default(),
        }
    }
}

/// The batch of restaurants from the most recent applied fetch.
pub type ResultSet = Vec<Restaurant>;

/// User-selected constraints. Transitions return a new value.
///
/// An empty district or style set, `PriceCeiling::All`, and a blank search term
/// all mean "unconstrained".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterState {
    districts: BTreeSet<District>,
    price: PriceCeiling,
    styles: BTreeSet<FoodStyle>,
    search: String,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn districts(&self) -> &BTreeSet<District> {
        &self.districts
    }

    pub fn price(&self) -> PriceCeiling {
        self.price
    }

    pub fn styles(&self) -> &BTreeSet<FoodStyle> {
        &self.styles
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn with_districts(self, districts: impl IntoIterator<Item = District>) -> Self {
        Self {
            districts: districts.into_iter().collect(),
            ..self
        }
    }

    /// Single-selection form used by the random picker; `None` means "All".
    pub fn with_district(self, district: Option<District>) -> Self {
        self.with_districts(district)
    }

    pub fn toggle_district(mut self, district: District) -> Self {
        if !self.districts.remove(&district) {
            self.districts.insert(district);
        }
        self
    }

    pub fn with_price(self, price: PriceCeiling) -> Self {
        Self { price, ..self }
    }

    pub fn with_styles(self, styles: impl IntoIterator<Item = FoodStyle>) -> Self {
        Self {
            styles: styles.into_iter().collect(),
            ..self
        }
    }

    pub fn toggle_style(mut self, style: FoodStyle) -> Self {
        if !self.styles.remove(&style) {
            self.styles.insert(style);
        }
        self
    }

    pub fn with_search(self, search: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            ..self
        }
    }

    pub fn cleared() -> Self {
        Self::default()
    }

    /// True when the two states would produce the same remote query.
    pub fn query_eq(&self, other: &FilterState) -> bool {
        self.districts == other.districts && self.price == other.price && self.styles == other.styles
    }

    pub fn is_unconstrained(&self) -> bool {
        self.districts.is_empty()
            && self.price == PriceCeiling::All
            && self.styles.is_empty()
            && self.search.trim().is_empty()
    }
}

/// Query parameter name to already percent-encoded value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParameters(BTreeMap<String, String>);

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, encoded_value: impl Into<String>) {
        self.0.insert(name.into(), encoded_value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `k=v&k=v`, or an empty string when there are no parameters.
    pub fn to_query_string(&self) -> String {
        self.iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormField {
    Restaurant,
    District,
    Price,
    Rating,
    FoodStyles,
}

pub const MSG_RESTAURANT_REQUIRED: &str = "Restaurant name is required";
pub const MSG_DISTRICT_REQUIRED: &str = "District is required";
pub const MSG_PRICE_REQUIRED: &str = "Price is required";
pub const MSG_RATING_REQUIRED: &str = "Rating is required";
pub const MSG_RATING_RANGE: &str = "Rating must be between 1 and 5";
pub const MSG_STYLES_REQUIRED: &str = "At least one food style is required";

pub fn check_restaurant(name: &str) -> Option<&'static str> {
    name.trim().is_empty().then_some(MSG_RESTAURANT_REQUIRED)
}

pub fn check_district(district: Option<District>) -> Option<&'static str> {
    district.is_none().then_some(MSG_DISTRICT_REQUIRED)
}

pub fn check_price(price: i64) -> Option<&'static str> {
    (price <= 0).then_some(MSG_PRICE_REQUIRED)
}

pub fn check_rating(rating: i64) -> Option<&'static str> {
    match rating {
        0 => Some(MSG_RATING_REQUIRED),
        1..=5 => None,
        _ => Some(MSG_RATING_RANGE),
    }
}

pub fn check_styles(styles: &[FoodStyle]) -> Option<&'static str> {
    styles.is_empty().then_some(MSG_STYLES_REQUIRED)
}

/// Per-field messages from a failed submit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{} field(s) failed validation", .errors.len())]
pub struct ValidationErrors {
    errors: BTreeMap<FormField, String>,
}

impl ValidationErrors {
    pub fn get(&self, field: FormField) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FormField, &str)> {
        self.errors.iter().map(|(f, m)| (*f, m.as_str()))
    }
}

/// Validated payload for `POST /api/add`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRestaurant {
    pub restaurant: String,
    pub district: District,
    pub price: i64,
    pub rating: u8,
    #[serde(rename = "selectedStyles")]
    pub selected_styles: Vec<FoodStyle>,
}

/// Add-form state. Setters refresh the edited field's error but never reject the edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddForm {
    restaurant: String,
    district: Option<District>,
    price: i64,
    rating: i64,
    selected_styles: Vec<FoodStyle>,
    errors: BTreeMap<FormField, String>,
}

impl AddForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restaurant(&self) -> &str {
        &self.restaurant
    }

    pub fn district(&self) -> Option<District> {
        self.district
    }

    pub fn price(&self) -> i64 {
        self.price
    }

    pub fn rating(&self) -> i64 {
        self.rating
    }

    pub fn selected_styles(&self) -> &[FoodStyle] {
        &self.selected_styles
    }

    pub fn error(&self, field: FormField) -> Option<&str> {
        self.errors.get(&field).map(String::as_str)
    }

    pub fn set_restaurant(&mut self, name: impl Into<String>) {
        self.restaurant = name.into();
        self.refresh(FormField::Restaurant, check_restaurant(&self.restaurant));
    }

    /// Focus left the name field.
    pub fn blur_restaurant(&mut self) {
        if let Some(msg) = check_restaurant(&self.restaurant) {
            self.refresh(FormField::Restaurant, Some(msg));
        }
    }

    pub fn set_district(&mut self, district: Option<District>) {
        self.district = district;
        self.refresh(FormField::District, check_district(district));
    }

    pub fn set_price(&mut self, price: i64) {
        self.price = price;
        self.refresh(FormField::Price, check_price(price));
    }

    pub fn set_rating(&mut self, rating: i64) {
        self.rating = rating;
        self.refresh(FormField::Rating, check_rating(rating));
    }

    pub fn toggle_style(&mut self, style: FoodStyle) {
        if let Some(pos) = self.selected_styles.iter().position(|s| *s == style) {
            self.selected_styles.remove(pos);
        } else {
            self.selected_styles.push(style);
        }
        self.refresh(FormField::FoodStyles, check_styles(&self.selected_styles));
    }

    /// Check every field, record all errors, and build the payload when all pass.
    pub fn validate(&mut self) -> Result<NewRestaurant, ValidationErrors> {
        let checks = [
            (FormField::Restaurant, check_restaurant(&self.restaurant)),
            (FormField::District, check_district(self.district)),
            (FormField::Price, check_price(self.price)),
            (FormField::Rating, check_rating(self.rating)),
            (FormField::FoodStyles, check_styles(&self.selected_styles)),
        ];
        for (field, outcome) in checks {
            self.refresh(field, outcome);
        }

        match (self.district, u8::try_from(self.rating)) {
            (Some(district), Ok(rating)) if self.errors.is_empty() => Ok(NewRestaurant {
                restaurant: self.restaurant.trim().to_string(),
                district,
                price: self.price,
                rating,
                selected_styles: self.selected_styles.clone(),
            }),
            _ => Err(ValidationErrors {
                errors: self.errors.clone(),
            }),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn refresh(&mut self, field: FormField, outcome: Option<&'static str>) {
        match outcome {
            Some(msg) => {
                self.errors.insert(field, msg.to_string());
            }
            None => {
                self.errors.remove(&field);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_case_insensitively() {
        assert_eq!("wan chai".parse::<District>().unwrap(), District::WanChai);
        assert_eq!(" Tuen Mun ".parse::<District>().unwrap(), District::TuenMun);
        assert_eq!("thai".parse::<FoodStyle>().unwrap(), FoodStyle::Thai);
        assert!("Kowloon City".parse::<District>().is_err());

        assert_eq!("All".parse::<PriceCeiling>().unwrap(), PriceCeiling::All);
        assert_eq!("150".parse::<PriceCeiling>().unwrap(), PriceCeiling::UpTo150);
        assert_eq!("≤ $200".parse::<PriceCeiling>().unwrap(), PriceCeiling::UpTo200);
        assert!("175".parse::<PriceCeiling>().is_err());
    }

    #[test]
    fn restaurant_record_accepts_both_name_fields_and_extra_keys() {
        let rows: Vec<Restaurant> = serde_json::from_str(
            r#"[
                {"_id":"a1","restaurant":"Sushi House","district":"Central","price":150,"rating":4,"foodStyles":["Japanese"],"__v":0},
                {"name":"Pasta Place","district":"Wan Chai","price":200,"rating":0},
                {"restaurant":"","name":"Fallback"},
                {"rating":9}
            ]"#,
        )
        .expect("parse");

        assert_eq!(rows[0].id.as_deref(), Some("a1"));
        assert_eq!(rows[0].name, "Sushi House");
        assert_eq!(rows[0].district_kind(), Some(District::Central));
        assert_eq!(rows[0].food_styles, vec!["Japanese".to_string()]);
        assert_eq!(rows[1].name, "Pasta Place");
        assert!(!rows[1].is_rated());
        assert!(rows[1].food_styles.is_empty());
        assert_eq!(rows[2].name, "Fallback");
        assert_eq!(rows[3].display_name(), "-");
        assert_eq!(rows[3].rating, 0);
    }

    #[test]
    fn filter_transitions_return_new_values() {
        let base = FilterState::new();
        let next = base
            .clone()
            .with_district(Some(District::Central))
            .with_price(PriceCeiling::UpTo150)
            .toggle_style(FoodStyle::Chinese);

        assert!(base.is_unconstrained());
        assert!(!next.is_unconstrained());
        assert_eq!(next.districts().len(), 1);

        let toggled_off = next.clone().toggle_style(FoodStyle::Chinese);
        assert!(toggled_off.styles().is_empty());

        let searched = next.clone().with_search("sushi");
        assert!(searched.query_eq(&next));
        assert_ne!(searched, next);
        assert_eq!(FilterState::cleared(), base);

        let single = next.with_district(None);
        assert!(single.districts().is_empty());
    }

    #[test]
    fn query_string_joins_pairs() {
        let mut params = QueryParameters::new();
        assert_eq!(params.to_query_string(), "");
        params.insert(PARAM_PRICE, "150");
        params.insert(PARAM_DISTRICT, "Wan%20Chai");
        assert_eq!(params.to_query_string(), "district=Wan%20Chai&price=150");
    }

    #[test]
    fn submit_reports_every_failing_field() {
        let mut form = AddForm::new();
        let errors = form.validate().unwrap_err();

        assert_eq!(errors.len(), 5);
        assert_eq!(errors.get(FormField::Restaurant), Some(MSG_RESTAURANT_REQUIRED));
        assert_eq!(errors.get(FormField::District), Some(MSG_DISTRICT_REQUIRED));
        assert_eq!(errors.get(FormField::Price), Some(MSG_PRICE_REQUIRED));
        assert_eq!(errors.get(FormField::Rating), Some(MSG_RATING_REQUIRED));
        assert_eq!(errors.get(FormField::FoodStyles), Some(MSG_STYLES_REQUIRED));
        assert_eq!(form.error(FormField::Price), Some(MSG_PRICE_REQUIRED));
    }

    #[test]
    fn field_errors_update_as_the_user_edits() {
        let mut form = AddForm::new();
        form.set_restaurant("   ");
        assert_eq!(form.error(FormField::Restaurant), Some(MSG_RESTAURANT_REQUIRED));
        form.set_restaurant("Dim Sum Bar");
        assert_eq!(form.error(FormField::Restaurant), None);

        form.set_rating(7);
        assert_eq!(form.error(FormField::Rating), Some(MSG_RATING_RANGE));
        form.set_rating(300);
        assert_eq!(form.error(FormField::Rating), Some(MSG_RATING_RANGE));
        form.set_rating(-1);
        assert_eq!(form.error(FormField::Rating), Some(MSG_RATING_RANGE));
        form.set_rating(3);
        assert_eq!(form.error(FormField::Rating), None);

        form.toggle_style(FoodStyle::Korean);
        form.toggle_style(FoodStyle::Korean);
        assert_eq!(form.error(FormField::FoodStyles), Some(MSG_STYLES_REQUIRED));
    }

    #[test]
    fn valid_form_builds_payload() {
        let mut form = AddForm::new();
        form.set_restaurant("  Dim Sum Bar ");
        form.set_district(Some(District::MongKok));
        form.set_price(100);
        form.set_rating(5);
        form.toggle_style(FoodStyle::Chinese);
        form.toggle_style(FoodStyle::Thai);

        let payload = form.validate().expect("valid");
        let json = serde_json::to_value(&payload).expect("json");
        assert_eq!(
            json,
            serde_json::json!({
                "restaurant": "Dim Sum Bar",
                "district": "Mong Kok",
                "price": 100,
                "rating": 5,
                "selectedStyles": ["Chinese", "Thai"]
            })
        );

        form.reset();
        assert_eq!(form, AddForm::new());
    }
}
