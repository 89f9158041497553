//! # Stock Operations
//!
//! Direct ledger access outside of a sale: restocking, wastage and counts.
//! Same invariants as settlement: an `OUT` never takes stock below zero,
//! and every change writes exactly one movement.

use brew_core::inventory::post_movement;
use brew_core::recipe::validate_recipe;
use brew_core::{CoreError, Ingredient, Quantity, RecipeLine, StockDirection, StockMovement};
use chrono::Utc;
use tracing::info;

use crate::error::EngineResult;
use crate::retry::with_conflict_retry;
use crate::Engine;

impl Engine {
    /// Applies one movement to an ingredient.
    ///
    /// - `IN` adds `quantity`
    /// - `OUT` subtracts it, failing with `InsufficientStock` below zero
    /// - `ADJUST` sets the stock to `quantity` (a stock count)
    ///
    /// Returns the ingredient as committed and the movement written.
    pub async fn adjust_stock(
        &self,
        ingredient_id: &str,
        direction: StockDirection,
        quantity: Quantity,
        reason: Option<String>,
    ) -> EngineResult<(Ingredient, StockMovement)> {
        let reason = &reason;
        let movement = with_conflict_retry(&self.retry, "adjust_stock", move |_| async move {
            let mut uow = self.db.begin().await?;
            let ingredient = uow
                .ingredient(ingredient_id)
                .await?
                .ok_or_else(|| CoreError::IngredientNotFound(ingredient_id.to_string()))?;

            let posting = post_movement(
                &ingredient,
                direction,
                quantity,
                reason.clone(),
                None,
                Utc::now(),
            )?;
            uow.apply_stock_posting(&posting).await?;
            uow.commit().await?;
            Ok(posting.movement)
        })
        .await?;

        info!(
            ingredient_id = %ingredient_id,
            direction = %direction,
            quantity = %quantity,
            stock_after = %movement.stock_after,
            "Stock adjusted"
        );

        let ingredient = self.db.ingredients().get(ingredient_id).await?;
        Ok((ingredient, movement))
    }

    /// Ingredients below their minimum stock.
    pub async fn low_stock(&self) -> EngineResult<Vec<Ingredient>> {
        Ok(self.db.ingredients().list_below_minimum().await?)
    }

    /// Replaces a product's recipe after checking its lines.
    pub async fn set_recipe(&self, product_id: &str, lines: &[RecipeLine]) -> EngineResult<()> {
        validate_recipe(lines)?;
        self.db.recipes().set_recipe(product_id, lines).await?;
        info!(product_id = %product_id, lines = lines.len(), "Recipe replaced");
        Ok(())
    }

    /// The ordered recipe of a product; empty when it has none.
    pub async fn resolve_recipe(&self, product_id: &str) -> EngineResult<Vec<RecipeLine>> {
        Ok(self.db.recipes().resolve(product_id).await?)
    }
}
