use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{FeatureRecord, Island, ParseVariantError, Sex};

/// Errors raised while applying a user change to the query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// No control carries this name.
    #[error("unknown input field `{0}`")]
    UnknownField(String),
    /// A selector received an option it does not offer.
    #[error(transparent)]
    Option(#[from] ParseVariantError),
    /// A slider received something that is not a finite number.
    #[error("{field} expects a number, got `{raw}`")]
    NotANumber {
        /// Slider name.
        field: &'static str,
        /// Raw input.
        raw: String,
    },
}

/// Range and starting position of a numeric slider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SliderBounds {
    /// Field the slider controls.
    pub field: &'static str,
    /// Lowest selectable value.
    pub min: f64,
    /// Highest selectable value.
    pub max: f64,
    /// Initial value.
    pub default: f64,
}

impl SliderBounds {
    /// Pins `value` into `[min, max]`.
    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Bill length slider.
pub const BILL_LENGTH_MM: SliderBounds = SliderBounds {
    field: "bill_length_mm",
    min: 32.1,
    max: 59.6,
    default: 43.9,
};

/// Bill depth slider.
pub const BILL_DEPTH_MM: SliderBounds = SliderBounds {
    field: "bill_depth_mm",
    min: 13.1,
    max: 21.5,
    default: 17.2,
};

/// Flipper length slider.
pub const FLIPPER_LENGTH_MM: SliderBounds = SliderBounds {
    field: "flipper_length_mm",
    min: 172.0,
    max: 231.0,
    default: 201.0,
};

/// Body mass slider.
pub const BODY_MASS_G: SliderBounds = SliderBounds {
    field: "body_mass_g",
    min: 2700.0,
    max: 6300.0,
    default: 4207.0,
};

/// All sliders in display order.
pub const SLIDERS: [SliderBounds; 4] = [BILL_LENGTH_MM, BILL_DEPTH_MM, FLIPPER_LENGTH_MM, BODY_MASS_G];

/// Outcome of a single control change.
#[derive(Debug, Clone, PartialEq)]
pub struct InputChange {
    /// Field that changed.
    pub field: &'static str,
    /// Value now held by the control.
    pub value: String,
    /// True when a slider value had to be pinned into its range.
    pub clamped: bool,
}

/// Current state of every input control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInput {
    /// Selected island.
    pub island: Island,
    /// Selected sex.
    pub sex: Sex,
    /// Bill length in millimetres.
    pub bill_length_mm: f64,
    /// Bill depth in millimetres.
    pub bill_depth_mm: f64,
    /// Flipper length in millimetres.
    pub flipper_length_mm: f64,
    /// Body mass in grams.
    pub body_mass_g: f64,
}

impl Default for QueryInput {
    fn default() -> Self {
        Self {
            island: Island::ALL[0],
            sex: Sex::ALL[0],
            bill_length_mm: BILL_LENGTH_MM.default,
            bill_depth_mm: BILL_DEPTH_MM.default,
            flipper_length_mm: FLIPPER_LENGTH_MM.default,
            body_mass_g: BODY_MASS_G.default,
        }
    }
}

impl QueryInput {
    /// Applies a `field = raw` change the way the matching control would.
    /// Slider values outside their range are clamped, not rejected.
    pub fn set(&mut self, field: &str, raw: &str) -> Result<InputChange, InputError> {
        match field.trim() {
            "island" => {
                self.island = raw.parse()?;
                Ok(InputChange {
                    field: "island",
                    value: self.island.to_string(),
                    clamped: false,
                })
            }
            "sex" => {
                self.sex = raw.parse()?;
                Ok(InputChange {
                    field: "sex",
                    value: self.sex.to_string(),
                    clamped: false,
                })
            }
            other => {
                let bounds = SLIDERS
                    .iter()
                    .find(|slider| slider.field == other)
                    .ok_or_else(|| InputError::UnknownField(other.to_string()))?;
                let requested: f64 = raw
                    .trim()
                    .parse()
                    .ok()
                    .filter(|value: &f64| value.is_finite())
                    .ok_or_else(|| InputError::NotANumber {
                        field: bounds.field,
                        raw: raw.to_string(),
                    })?;
                let value = bounds.clamp(requested);
                *self.slot_mut(bounds.field) = value;
                Ok(InputChange {
                    field: bounds.field,
                    value: value.to_string(),
                    clamped: (value - requested).abs() > 0.0,
                })
            }
        }
    }

    /// Applies a slider value directly, clamping it. Returns true when clamped.
    pub fn set_measurement(&mut self, bounds: &SliderBounds, value: f64) -> bool {
        let clamped = bounds.clamp(value);
        *self.slot_mut(bounds.field) = clamped;
        (clamped - value).abs() > 0.0
    }

    fn slot_mut(&mut self, field: &str) -> &mut f64 {
        match field {
            "bill_length_mm" => &mut self.bill_length_mm,
            "bill_depth_mm" => &mut self.bill_depth_mm,
            "flipper_length_mm" => &mut self.flipper_length_mm,
            _ => &mut self.body_mass_g,
        }
    }

    /// Query record fed to the pipeline.
    #[must_use]
    pub fn to_feature_record(&self) -> FeatureRecord {
        FeatureRecord {
            island: self.island.as_str().to_string(),
            bill_length_mm: self.bill_length_mm,
            bill_depth_mm: self.bill_depth_mm,
            flipper_length_mm: self.flipper_length_mm,
            body_mass_g: self.body_mass_g,
            sex: self.sex.as_str().to_string(),
        }
    }
}
