//! # Recipe Resolver
//!
//! Maps a sold product to the raw ingredients one unit of it consumes.
//!
//! ```text
//!   Latte ──► [ beans 18.5 g, milk 200 ml, cup 1 pcs ]
//!   Mug   ──► [ ]            (merchandise: no recipe, no stock use)
//! ```
//!
//! A product without a recipe resolves to an empty list rather than an
//! error; untracked products simply consume nothing.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::quantity::Quantity;
use crate::validation::validate_unique;

/// One ingredient requirement of a recipe, per single unit of product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RecipeLine {
    pub ingredient_id: String,
    pub quantity: Quantity,
}

impl RecipeLine {
    pub fn new(ingredient_id: impl Into<String>, quantity: Quantity) -> Self {
        Self {
            ingredient_id: ingredient_id.into(),
            quantity,
        }
    }
}

/// Checks a recipe before it is stored: no negative quantities, and each
/// ingredient at most once.
pub fn validate_recipe(lines: &[RecipeLine]) -> CoreResult<()> {
    if lines.iter().any(|l| l.quantity.is_negative()) {
        return Err(ValidationError::MustNotBeNegative {
            field: "recipe quantity".to_string(),
        }
        .into());
    }
    validate_unique("ingredient", lines.iter().map(|l| l.ingredient_id.as_str()))?;
    Ok(())
}

/// The recipes relevant to one settlement, keyed by product id.
#[derive(Debug, Clone, Default)]
pub struct RecipeBook {
    recipes: HashMap<String, Vec<RecipeLine>>,
}

impl RecipeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the recipe of a product.
    pub fn insert(&mut self, product_id: impl Into<String>, lines: Vec<RecipeLine>) {
        self.recipes.insert(product_id.into(), lines);
    }

    /// Ordered requirements of one unit of `product_id`; empty when the
    /// product has no recipe.
    pub fn resolve(&self, product_id: &str) -> &[RecipeLine] {
        self.recipes
            .get(product_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total ingredient demand of a set of `(product_id, units)` pairs.
    ///
    /// Zero requirements are left out, so every returned entry is positive.
    ///
    /// ## Errors
    /// - `Validation` (`OutOfRange`) when a requirement overflows
    ///
    /// ```rust
    /// use brew_core::recipe::{RecipeBook, RecipeLine};
    /// use brew_core::Quantity;
    ///
    /// let mut book = RecipeBook::new();
    /// book.insert("latte", vec![RecipeLine::new("beans", Quantity::from_milli(18_500))]);
    /// book.insert("espresso", vec![RecipeLine::new("beans", Quantity::from_units(9))]);
    ///
    /// let demand = book.demand([("latte", 2), ("espresso", 1)])?;
    /// assert_eq!(demand["beans"], Quantity::from_units(46));
    /// # Ok::<(), brew_core::CoreError>(())
    /// ```
    pub fn demand<'a>(
        &self,
        items: impl IntoIterator<Item = (&'a str, i64)>,
    ) -> CoreResult<BTreeMap<String, Quantity>> {
        let mut demand: BTreeMap<String, Quantity> = BTreeMap::new();
        for (product_id, units) in items {
            for line in self.resolve(product_id) {
                let needed = line
                    .quantity
                    .checked_times(units)
                    .ok_or_else(|| demand_overflow(&line.ingredient_id))?;
                if needed.is_zero() {
                    continue;
                }
                let total = demand.entry(line.ingredient_id.clone()).or_default();
                *total = total
                    .checked_add(needed)
                    .ok_or_else(|| demand_overflow(&line.ingredient_id))?;
            }
        }
        Ok(demand)
    }

    /// Every ingredient id referenced by the book.
    pub fn ingredient_ids(&self) -> impl Iterator<Item = &str> {
        self.recipes
            .values()
            .flatten()
            .map(|line| line.ingredient_id.as_str())
    }
}

pub(crate) fn demand_overflow(ingredient_id: &str) -> CoreError {
    ValidationError::OutOfRange {
        field: format!("demand for {ingredient_id}"),
        min: 0,
        max: i64::MAX,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> RecipeBook {
        let mut book = RecipeBook::new();
        book.insert(
            "latte",
            vec![
                RecipeLine::new("beans", Quantity::from_milli(18_500)),
                RecipeLine::new("milk", Quantity::from_units(200)),
                RecipeLine::new("cup", Quantity::from_units(1)),
            ],
        );
        book.insert(
            "americano",
            vec![
                RecipeLine::new("beans", Quantity::from_units(18)),
                RecipeLine::new("cup", Quantity::from_units(1)),
                RecipeLine::new("sugar", Quantity::zero()),
            ],
        );
        book
    }

    #[test]
    fn test_resolve_keeps_order() {
        let book = book();
        let ids: Vec<_> = book
            .resolve("latte")
            .iter()
            .map(|l| l.ingredient_id.as_str())
            .collect();
        assert_eq!(ids, ["beans", "milk", "cup"]);
    }

    #[test]
    fn test_unknown_product_resolves_empty() {
        assert!(book().resolve("mug").is_empty());
    }

    #[test]
    fn test_demand_sums_across_lines() {
        let demand = book()
            .demand([("latte", 2), ("americano", 3), ("mug", 5)])
            .unwrap();
        assert_eq!(demand["beans"], Quantity::from_units(91));
        assert_eq!(demand["milk"], Quantity::from_units(400));
        assert_eq!(demand["cup"], Quantity::from_units(5));
        assert!(!demand.contains_key("sugar"));
    }

    #[test]
    fn test_demand_overflow_is_rejected() {
        let mut book = RecipeBook::new();
        book.insert(
            "vat",
            vec![RecipeLine::new("beans", Quantity::from_milli(i64::MAX / 2))],
        );

        let err = book.demand([("vat", 3)]).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Validation(ValidationError::OutOfRange { ref field, .. }) if field == "demand for beans"
        ));

        // Each line fits on its own, the running total does not.
        let err = book.demand([("vat", 1), ("vat", 1), ("vat", 1)]).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_validate_recipe() {
        let ok = vec![RecipeLine::new("beans", Quantity::from_units(9))];
        assert!(validate_recipe(&ok).is_ok());

        let negative = vec![RecipeLine::new("beans", Quantity::from_milli(-1))];
        assert!(validate_recipe(&negative).is_err());

        let duplicate = vec![
            RecipeLine::new("beans", Quantity::from_units(9)),
            RecipeLine::new("beans", Quantity::from_units(1)),
        ];
        assert!(validate_recipe(&duplicate).is_err());
    }
}
