//! # Recipe Import
//!
//! Turns a user-submitted recipe form into a validated [`NewRecipe`].
//!
//! Ingredients come one per line as `name | amount | unit`; the unit column
//! is optional. Tags are a free-form list separated by commas or semicolons.
//!
//! ```text
//! Tomato | 3 | pcs
//! Garlic | 2 | clove
//! Salt   | 1
//! ```

use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::errors::{PantryError, Result};
use crate::ingredient_key::{IngredientKey, MAX_NAME_LENGTH, MAX_TAG_LENGTH};
use crate::models::ensure_storable_quantity;
use crate::store::NewRecipe;

lazy_static! {
    static ref TAG_SEPARATOR: Regex = Regex::new(r"[,;]").expect("Tag separator pattern should be valid");
}

/// Raw form fields of a recipe submission
#[derive(Debug, Clone, Default)]
pub struct RecipeForm {
    pub title: String,
    pub description: String,
    pub steps_md: String,
    pub ingredients: String,
    pub tags: String,
}

/// Validate a recipe title: trimmed, non-empty, at most 255 characters
pub fn validate_recipe_title(title: &str) -> Result<String> {
    let trimmed = title.trim();

    if trimmed.is_empty() {
        return Err(PantryError::InvalidIngredient("recipe title is required".to_string()));
    }

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(PantryError::InvalidIngredient(format!(
            "recipe title is longer than {MAX_NAME_LENGTH} characters"
        )));
    }

    Ok(trimmed.to_string())
}

/// Parse `name | amount | unit` lines.
///
/// Blank lines and lines with a blank name are skipped. A named line without
/// an amount, or with an amount that is not a positive number, is rejected
/// with its 1-based line number.
pub fn parse_ingredient_lines(text: &str) -> Result<Vec<(IngredientKey, Decimal)>> {
    let mut ingredients = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let mut columns = line.split('|').map(str::trim);

        let name = columns.next().unwrap_or_default();
        if name.is_empty() {
            continue;
        }

        let amount_text = columns.next().unwrap_or_default();
        if amount_text.is_empty() {
            return Err(PantryError::InvalidIngredient(format!(
                "line {line_no}: amount is required for '{name}'"
            )));
        }
        let amount = parse_amount(amount_text).ok_or_else(|| {
            PantryError::InvalidIngredient(format!("line {line_no}: '{amount_text}' is not a number"))
        })?;
        if amount <= Decimal::ZERO {
            return Err(PantryError::InvalidIngredient(format!(
                "line {line_no}: amount for '{name}' must be positive"
            )));
        }
        ensure_storable_quantity(format_args!("line {line_no}: amount for '{name}'"), amount)?;

        let unit = columns.next().filter(|u| !u.is_empty());
        let key = IngredientKey::normalize(name, unit)?;
        ingredients.push((key, amount));
    }

    Ok(ingredients)
}

/// Split a tag list on `,` or `;`, lower-case, drop blanks and duplicates.
///
/// A tag longer than [`MAX_TAG_LENGTH`] characters is rejected.
pub fn parse_tags(text: &str) -> Result<Vec<String>> {
    let mut tags: Vec<String> = Vec::new();
    for raw in TAG_SEPARATOR.split(text) {
        let tag = raw.trim().to_lowercase();
        if tag.chars().count() > MAX_TAG_LENGTH {
            return Err(PantryError::InvalidIngredient(format!(
                "tag '{tag}' is longer than {MAX_TAG_LENGTH} characters"
            )));
        }
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    Ok(tags)
}

/// Validate a whole form into a recipe ready to store
pub fn build_recipe(form: &RecipeForm, created_by: i64) -> Result<NewRecipe> {
    let title = validate_recipe_title(&form.title)?;
    let ingredients = parse_ingredient_lines(&form.ingredients)?;
    if ingredients.is_empty() {
        return Err(PantryError::InvalidIngredient(
            "a recipe needs at least one ingredient".to_string(),
        ));
    }
    let tags = parse_tags(&form.tags)?;

    Ok(NewRecipe {
        title,
        description: form.description.trim().to_string(),
        steps_md: form.steps_md.trim().to_string(),
        created_by,
        ingredients,
        tags,
    })
}

// Accepts a decimal comma ("1,5") as well as a point.
fn parse_amount(text: &str) -> Option<Decimal> {
    Decimal::from_str(&text.replace(',', ".")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipe_title_validation() {
        assert!(validate_recipe_title("Chocolate Chip Cookies").is_ok());
        assert_eq!(validate_recipe_title("  Mom's Lasagna  ").unwrap(), "Mom's Lasagna");

        assert!(validate_recipe_title("").is_err());
        assert!(validate_recipe_title("   ").is_err());
        assert!(validate_recipe_title(&"a".repeat(256)).is_err());
        assert!(validate_recipe_title(&"a".repeat(255)).is_ok());
    }

    #[test]
    fn test_parse_ingredient_lines() {
        let parsed = parse_ingredient_lines("Tomato | 3 | pcs\n\n  Garlic|2|Clove \nSalt | 0,5").unwrap();

        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[0], (IngredientKey::normalize("tomato", Some("pcs")).unwrap(), Decimal::from(3)));
        assert_eq!(parsed[1].0.unit.as_deref(), Some("clove"));
        assert_eq!(parsed[2], (IngredientKey::normalize("salt", None).unwrap(), Decimal::new(5, 1)));
    }

    #[test]
    fn test_blank_names_are_skipped() {
        let parsed = parse_ingredient_lines(" | 2 | g\nFlour | 200 | g").unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].0.name, "flour");
    }

    #[test]
    fn test_missing_or_bad_amounts_are_rejected() {
        let err = parse_ingredient_lines("Flour | 200 | g\nSugar").unwrap_err();
        assert!(err.to_string().contains("line 2"));

        assert!(parse_ingredient_lines("Sugar | lots").is_err());
        assert!(parse_ingredient_lines("Sugar | 0 | g").is_err());
        assert!(parse_ingredient_lines("Sugar | -1 | g").is_err());
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags("Dessert, quick;dessert ; ,Vegan").unwrap(), vec!["dessert", "quick", "vegan"]);
        assert!(parse_tags("  ").unwrap().is_empty());
    }

    #[test]
    fn test_overlong_tags_are_rejected() {
        let long = "x".repeat(MAX_TAG_LENGTH + 1);
        assert!(matches!(
            parse_tags(&format!("quick, {long}")),
            Err(PantryError::InvalidIngredient(_))
        ));
        assert_eq!(parse_tags(&"x".repeat(MAX_TAG_LENGTH)).unwrap().len(), 1);

        let form = RecipeForm {
            title: "Soup".to_string(),
            ingredients: "Water | 1 | l".to_string(),
            tags: long,
            ..Default::default()
        };
        assert!(matches!(build_recipe(&form, 1), Err(PantryError::InvalidIngredient(_))));
    }

    #[test]
    fn test_amounts_beyond_three_decimals_are_rejected() {
        let err = parse_ingredient_lines("Flour | 200 | g\nSaffron | 0,0004 | g").unwrap_err();
        assert!(matches!(err, PantryError::InvalidIngredient(_)));
        assert!(err.to_string().contains("line 2"));

        let parsed = parse_ingredient_lines("Saffron | 0.0010 | g").unwrap();
        assert_eq!(parsed[0].1, Decimal::new(1, 3));
    }

    #[test]
    fn test_build_recipe() {
        let form = RecipeForm {
            title: " Pasta ".to_string(),
            description: "Weeknight dinner".to_string(),
            steps_md: "1. Boil\n2. Eat".to_string(),
            ingredients: "Pasta | 500 | g\nTomato | 3 | pcs".to_string(),
            tags: "Italian".to_string(),
        };
        let recipe = build_recipe(&form, 42).unwrap();
        assert_eq!(recipe.title, "Pasta");
        assert_eq!(recipe.created_by, 42);
        assert_eq!(recipe.ingredients.len(), 2);
        assert_eq!(recipe.tags, vec!["italian"]);
    }

    #[test]
    fn test_build_recipe_requires_ingredients() {
        let form = RecipeForm {
            title: "Air".to_string(),
            ingredients: "\n  \n".to_string(),
            ..Default::default()
        };
        assert!(matches!(build_recipe(&form, 1), Err(PantryError::InvalidIngredient(_))));
    }
}
