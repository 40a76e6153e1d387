#![allow(dead_code)]

use gelato_core::{Category, Ingredient, Row};

pub fn catalog() -> Vec<Ingredient> {
    vec![
        Ingredient::new("water", "Water", Category::Other).with_water(100.0),
        Ingredient::new("milk", "Whole milk", Category::Dairy)
            .with_water(87.7)
            .with_fat(3.6)
            .with_msnf(8.7),
        Ingredient::new("cream", "Heavy cream", Category::Dairy)
            .with_water(59.5)
            .with_fat(35.0)
            .with_msnf(5.5),
        Ingredient::new("butter", "Unsalted butter", Category::Dairy)
            .with_water(16.0)
            .with_fat(82.0)
            .with_msnf(1.0),
        Ingredient::new("smp", "Skim milk powder", Category::Dairy)
            .with_water(3.5)
            .with_fat(1.0)
            .with_msnf(95.5),
        Ingredient::new("sucrose", "Sucrose", Category::Sugar).with_sugars(100.0, 1.0, 1.0),
        Ingredient::new("dextrose", "Dextrose", Category::Sugar)
            .with_water(8.5)
            .with_sugars(91.5, 0.7, 1.9),
        Ingredient::new("gsp", "Glucose syrup powder", Category::Sugar)
            .with_water(5.0)
            .with_sugars(40.0, 0.5, 0.9)
            .with_other_solids(55.0),
        Ingredient::new("strawberry", "Strawberries", Category::Fruit)
            .with_water(90.0)
            .with_fat(0.2)
            .with_sugars(7.0, 1.0, 1.0)
            .with_other_solids(2.5),
        Ingredient::new("cardamom", "Green cardamom", Category::Flavor)
            .with_water(8.0)
            .with_other_solids(90.0),
        Ingredient::new("vanilla", "Vanilla extract", Category::Flavor)
            .with_water(50.0)
            .with_other_solids(10.0),
        Ingredient::new("cocoa", "Cocoa powder", Category::Flavor)
            .with_water(3.0)
            .with_fat(22.0)
            .with_other_solids(70.0)
            .with_hardening(1.5),
    ]
}

pub fn ingredient(id: &str) -> Ingredient {
    catalog()
        .into_iter()
        .find(|i| i.id == id)
        .unwrap_or_else(|| panic!("no fixture ingredient `{id}`"))
}

pub fn row(id: &str, grams: f64) -> Row {
    Row::new(ingredient(id), grams)
}

/// The five-lever ice-cream base most tests start from.
pub fn ice_cream_base() -> Vec<Row> {
    vec![
        row("milk", 600.0),
        row("cream", 200.0),
        row("smp", 30.0),
        row("sucrose", 150.0),
        row("water", 20.0),
    ]
}

pub fn grams_of(rows: &[Row], id: &str) -> f64 {
    rows.iter()
        .filter(|r| r.ingredient.id == id)
        .map(|r| r.grams)
        .sum()
}
