use std::fmt;

use serde::Serialize;

use crate::schema::Species;

const BAR_WIDTH: usize = 24;

/// Probability per species, in class-index order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbabilityTable {
    entries: Vec<(Species, f64)>,
}

impl ProbabilityTable {
    /// Pairs probabilities with species names by position. Values are clamped
    /// to `[0, 1]` for display; missing trailing classes show as zero.
    #[must_use]
    pub fn new(probabilities: &[f64]) -> Self {
        let entries = Species::ALL
            .iter()
            .map(|species| {
                let p = probabilities.get(species.index()).copied().unwrap_or(0.0);
                (*species, if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) })
            })
            .collect();
        Self { entries }
    }

    /// `(species, probability)` pairs in class-index order.
    #[must_use]
    pub fn entries(&self) -> &[(Species, f64)] {
        &self.entries
    }

    /// Probability for a single species.
    #[must_use]
    pub fn probability(&self, species: Species) -> f64 {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == species)
            .map_or(0.0, |(_, p)| *p)
    }
}

impl fmt::Display for ProbabilityTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_width = Species::ALL
            .iter()
            .map(|species| species.as_str().len())
            .max()
            .unwrap_or(0);
        for (species, p) in &self.entries {
            let filled = (p * BAR_WIDTH as f64).round() as usize;
            let mut bar = String::with_capacity(BAR_WIDTH);
            bar.push_str(&"#".repeat(filled.min(BAR_WIDTH)));
            bar.push_str(&" ".repeat(BAR_WIDTH - filled.min(BAR_WIDTH)));
            writeln!(f, "{:<name_width$}  {p:.6}  [{bar}]", species.as_str())?;
        }
        Ok(())
    }
}

/// Headline line announcing the winning species.
#[must_use]
pub fn headline(predicted: Species) -> String {
    format!("Predicted species: {predicted}")
}

/// Renders the full result block: heading, table and headline.
#[must_use]
pub fn render(table: &ProbabilityTable, predicted: Species) -> String {
    format!("Predicted Species\n{table}{}\n", headline(predicted))
}
