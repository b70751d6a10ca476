use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Version of the declared category universe. Bump whenever [`Island`] or
/// [`Sex`] gain or lose a variant, since encoded column sets change with it.
pub const CATEGORY_UNIVERSE_VERSION: u32 = 1;

/// Column holding the species label.
pub const LABEL_FIELD: &str = "species";

/// Categorical feature columns, in schema order.
pub const CATEGORICAL_FIELDS: [&str; 2] = ["island", "sex"];

/// Numeric feature columns, in schema order.
pub const NUMERIC_FIELDS: [&str; 4] = [
    "bill_length_mm",
    "bill_depth_mm",
    "flipper_length_mm",
    "body_mass_g",
];

/// Every column a dataset source must provide.
pub const REQUIRED_COLUMNS: [&str; 7] = [
    LABEL_FIELD,
    "island",
    "bill_length_mm",
    "bill_depth_mm",
    "flipper_length_mm",
    "body_mass_g",
    "sex",
];

/// Error raised when a string does not name a variant of a closed enumeration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("`{value}` is not a valid {field}")]
pub struct ParseVariantError {
    /// Field being parsed.
    pub field: &'static str,
    /// Offending input.
    pub value: String,
}

/// Islands of the Palmer archipelago present in the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Island {
    /// Torgersen island.
    Torgersen,
    /// Biscoe island.
    Biscoe,
    /// Dream island.
    Dream,
}

impl Island {
    /// Options in the order the selector presents them.
    pub const ALL: [Self; 3] = [Self::Torgersen, Self::Biscoe, Self::Dream];

    /// Dataset spelling of the island.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Torgersen => "Torgersen",
            Self::Biscoe => "Biscoe",
            Self::Dream => "Dream",
        }
    }
}

impl fmt::Display for Island {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Island {
    type Err = ParseVariantError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|island| island.as_str().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| ParseVariantError {
                field: "island",
                value: raw.to_string(),
            })
    }
}

/// Recorded sex of a penguin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    /// Male.
    Male,
    /// Female.
    Female,
}

impl Sex {
    /// Options in the order the selector presents them.
    pub const ALL: [Self; 2] = [Self::Male, Self::Female];

    /// Dataset spelling of the sex.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sex {
    type Err = ParseVariantError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|sex| sex.as_str().eq_ignore_ascii_case(raw.trim()))
            .ok_or_else(|| ParseVariantError {
                field: "sex",
                value: raw.to_string(),
            })
    }
}

/// The three species the classifier distinguishes, in class-index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Species {
    /// Class index 0.
    Adelie,
    /// Class index 1.
    Chinstrap,
    /// Class index 2.
    Gentoo,
}

impl Species {
    /// All species in class-index order.
    pub const ALL: [Self; 3] = [Self::Adelie, Self::Chinstrap, Self::Gentoo];

    /// Number of classes.
    pub const COUNT: usize = Self::ALL.len();

    /// Dataset spelling of the species.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Adelie => "Adelie",
            Self::Chinstrap => "Chinstrap",
            Self::Gentoo => "Gentoo",
        }
    }

    /// Class index of the species.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Species for a class index, if any.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One dataset row as read from the source.
///
/// Categorical values and the label stay strings; the encoders decide what is
/// acceptable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenguinRecord {
    /// Species label.
    pub species: String,
    /// Island name.
    pub island: String,
    /// Bill length in millimetres.
    pub bill_length_mm: f64,
    /// Bill depth in millimetres.
    pub bill_depth_mm: f64,
    /// Flipper length in millimetres.
    pub flipper_length_mm: f64,
    /// Body mass in grams.
    pub body_mass_g: f64,
    /// Sex.
    pub sex: String,
}

impl PenguinRecord {
    /// Feature subset of the row (everything except the label).
    #[must_use]
    pub fn features(&self) -> FeatureRecord {
        FeatureRecord {
            island: self.island.clone(),
            bill_length_mm: self.bill_length_mm,
            bill_depth_mm: self.bill_depth_mm,
            flipper_length_mm: self.flipper_length_mm,
            body_mass_g: self.body_mass_g,
            sex: self.sex.clone(),
        }
    }
}

/// Feature row describing one penguin, without its label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Island name.
    pub island: String,
    /// Bill length in millimetres.
    pub bill_length_mm: f64,
    /// Bill depth in millimetres.
    pub bill_depth_mm: f64,
    /// Flipper length in millimetres.
    pub flipper_length_mm: f64,
    /// Body mass in grams.
    pub body_mass_g: f64,
    /// Sex.
    pub sex: String,
}

impl FeatureRecord {
    /// Categorical `(field, value)` pairs in [`CATEGORICAL_FIELDS`] order.
    #[must_use]
    pub fn categorical(&self) -> [(&'static str, &str); 2] {
        [
            (CATEGORICAL_FIELDS[0], self.island.as_str()),
            (CATEGORICAL_FIELDS[1], self.sex.as_str()),
        ]
    }

    /// Numeric `(field, value)` pairs in [`NUMERIC_FIELDS`] order.
    #[must_use]
    pub fn numeric(&self) -> [(&'static str, f64); 4] {
        [
            (NUMERIC_FIELDS[0], self.bill_length_mm),
            (NUMERIC_FIELDS[1], self.bill_depth_mm),
            (NUMERIC_FIELDS[2], self.flipper_length_mm),
            (NUMERIC_FIELDS[3], self.body_mass_g),
        ]
    }

    /// Value of a categorical field by name.
    #[must_use]
    pub fn category(&self, field: &str) -> Option<&str> {
        self.categorical()
            .into_iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value)
    }
}
