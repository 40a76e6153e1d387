use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table, presets::UTF8_FULL};
use gelato_core::{
    BalanceOptions, BalanceResult, ConstraintTable, DEFAULT_MAX_ITERATIONS, DEFAULT_TOLERANCE,
    Engine, EssentialRole, FeasibilityReport, Ingredient, Metric, Row, SolveMethod, Targets,
    ThermoConfig, best_candidate, check_db_health, classify_ingredient, mix_fpdt,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing_subscriber::EnvFilter;

const BUNDLED_CATALOG: &str = include_str!("../data/catalog.json");

#[derive(Parser, Debug)]
#[command(
    name = "gelato-cli",
    about = "Balance frozen-dessert recipes and estimate how hard they freeze.",
    version
)]
struct Args {
    /// Product constraint table (TOML); defaults to the bundled one
    #[arg(long, global = true)]
    constraints: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that a catalog offers water, cream/butter and skim milk powder
    Health {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// List product types and their target bands
    Products,
    /// Explain whether a recipe can reach its product's bands
    Diagnose {
        #[arg(long)]
        recipe: PathBuf,
        #[arg(long)]
        product: String,
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Rebalance ingredient masses to hit the product's bands
    Balance {
        #[arg(long)]
        recipe: PathBuf,
        #[arg(long)]
        product: String,
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Batch mass in grams (defaults to the recipe's total)
        #[arg(long)]
        batch: Option<f64>,
        /// Relative tolerance around each target (0.15 = ±15%)
        #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f64,
        #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
        max_iterations: usize,
        /// Skip the linear program and use the iterative solver only
        #[arg(long)]
        no_lp: bool,
        /// Skip the feasibility pre-check
        #[arg(long)]
        no_check: bool,
        /// Add missing essential ingredients from the catalog if needed
        #[arg(long)]
        auto_fix: bool,
        /// Save the result as JSON
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Freezing-point depression and frozen water at serving temperature
    Thermo {
        #[arg(long)]
        recipe: PathBuf,
        #[arg(long)]
        product: String,
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Serving temperature in °C (defaults to the product's)
        #[arg(long, allow_hyphen_values = true)]
        temp: Option<f64>,
        /// Hardening multiplier K (defaults to $GELATO_HARDENING_K, then 1.0)
        #[arg(long)]
        hardening_k: Option<f64>,
    },
}

/// Recipe file: rows reference catalog ingredients by id.
#[derive(Debug, Serialize, Deserialize)]
struct RecipeFile {
    name: String,
    rows: Vec<RecipeLine>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecipeLine {
    ingredient: String,
    grams: f64,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

#[derive(Debug, Serialize)]
struct SavedBalance<'a> {
    generated_at: DateTime<Local>,
    recipe: &'a str,
    product: &'a str,
    options: &'a BalanceOptions,
    result: &'a BalanceResult,
}

fn fmt_g(x: f64) -> String {
    let v = (x * 10.0).round() / 10.0;
    if (v - v.round()).abs() < 1e-9 {
        format!("{:.0} g", v)
    } else {
        format!("{:.1} g", v)
    }
}

fn new_table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            header
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
    table
}

fn load_catalog(path: Option<&Path>) -> Result<Vec<Ingredient>> {
    let text = match path {
        Some(p) => fs::read_to_string(p)
            .with_context(|| format!("failed to read catalog {}", p.display()))?,
        None => BUNDLED_CATALOG.to_string(),
    };
    let catalog: Vec<Ingredient> = serde_json::from_str(&text).context("invalid catalog JSON")?;
    tracing::debug!(ingredients = catalog.len(), bundled = path.is_none(), "catalog loaded");
    Ok(catalog)
}

fn load_constraints(path: Option<&Path>) -> Result<ConstraintTable> {
    match path {
        Some(p) => {
            let text = fs::read_to_string(p)
                .with_context(|| format!("failed to read constraint table {}", p.display()))?;
            Ok(ConstraintTable::from_toml_str(&text)?)
        }
        None => Ok(ConstraintTable::bundled()?),
    }
}

/// Resolves recipe lines against the catalog by ingredient id.
fn resolve_recipe(recipe: &RecipeFile, catalog: &[Ingredient]) -> Result<Vec<Row>> {
    recipe
        .rows
        .iter()
        .map(|line| {
            let Some(ingredient) = catalog.iter().find(|i| i.id == line.ingredient) else {
                bail!(
                    "recipe `{}`: unknown ingredient `{}`",
                    recipe.name,
                    line.ingredient
                );
            };
            if !line.grams.is_finite() || line.grams < 0.0 {
                bail!(
                    "recipe `{}`: {} must weigh a finite, non-negative mass",
                    recipe.name,
                    line.ingredient
                );
            }
            Ok(Row::new(ingredient.clone(), line.grams).with_bounds(line.min, line.max))
        })
        .collect()
}

fn load_recipe(path: &Path, catalog: &[Ingredient]) -> Result<(String, Vec<Row>)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read recipe {}", path.display()))?;
    let recipe: RecipeFile = serde_json::from_str(&text)
        .with_context(|| format!("invalid recipe JSON: {}", path.display()))?;
    let rows = resolve_recipe(&recipe, catalog)?;
    Ok((recipe.name, rows))
}

fn print_report(report: &FeasibilityReport) {
    if report.feasible {
        println!("Feasible.");
    } else {
        println!(
            "Not feasible: {}",
            report.reason.as_deref().unwrap_or("no reason given")
        );
    }
    if !report.catalog_missing.is_empty() {
        let labels: Vec<&str> = report.catalog_missing.iter().map(|r| r.label()).collect();
        println!("Catalog lacks: {}", labels.join("; "));
    }
    if !report.missing.is_empty() {
        let labels: Vec<&str> = report.missing.iter().map(|r| r.label()).collect();
        println!("Recipe lacks: {}", labels.join("; "));
    }
    if !report.suggestions.is_empty() {
        println!("\nSuggestions:");
        for s in &report.suggestions {
            println!("• {s}");
        }
    }
}

fn composition_table(result: &BalanceResult, targets: &Targets, tolerance: f64) -> Table {
    let mut table = new_table(&["Metric", "Value", "Acceptable", "Ideal", ""]);
    for metric in Metric::ALL {
        let value = result.composition.get(metric);
        let (band, ideal, mark) = match targets.get(metric) {
            Some(t) => {
                let met = t.is_met(value, tolerance);
                (
                    format!("{}%", t.range),
                    format!("{:.1}%", t.ideal),
                    if met {
                        Cell::new("ok").fg(Color::Green)
                    } else {
                        Cell::new("off").fg(Color::Red)
                    },
                )
            }
            None => (String::new(), String::new(), Cell::new("")),
        };
        table.add_row(vec![
            Cell::new(metric.label()),
            Cell::new(format!("{value:.1}%")),
            Cell::new(band),
            Cell::new(ideal),
            mark,
        ]);
    }
    if let Some(t) = targets.fpdt_target() {
        let fpdt = mix_fpdt(&result.rows);
        table.add_row(vec![
            Cell::new("FPDT"),
            Cell::new(format!("{fpdt:.2} °C")),
            Cell::new(format!("{} °C", t.range)),
            Cell::new(format!("{:.2} °C", t.ideal)),
            if t.is_met(fpdt, tolerance) {
                Cell::new("ok").fg(Color::Green)
            } else {
                Cell::new("off").fg(Color::Red)
            },
        ]);
    }
    table.add_row(vec![
        Cell::new("PAC"),
        Cell::new(format!("{:.1}", result.composition.pac)),
        Cell::new(""),
        Cell::new(""),
        Cell::new(""),
    ]);
    table.add_row(vec![
        Cell::new("POD"),
        Cell::new(format!("{:.1}", result.composition.pod)),
        Cell::new(""),
        Cell::new(""),
        Cell::new(""),
    ]);
    table
}

fn run_health(catalog: &[Ingredient]) {
    let health = check_db_health(catalog);
    let mut table = new_table(&["Role", "Present", "Best candidate"]);
    for role in EssentialRole::ALL {
        let best = best_candidate(catalog, role);
        table.add_row(vec![
            Cell::new(role.label()),
            if best.is_some() {
                Cell::new("yes").fg(Color::Green)
            } else {
                Cell::new("no").fg(Color::Red)
            },
            Cell::new(best.map(|i| i.name.as_str()).unwrap_or("-")),
        ]);
    }
    println!("\n=== Catalog health ({} ingredients) ===", catalog.len());
    println!("{table}");
    if health.healthy {
        println!("Catalog is ready for balancing.");
    } else {
        println!("Catalog is missing essential levers; balancing will be refused.");
    }
}

fn run_products(engine: &Engine) {
    let mut table = new_table(&["Product", "Mode", "Fat", "MSNF", "Sugars", "Solids", "FPDT"]);
    for (key, p) in engine.constraints().iter() {
        let band = |metric: Metric| {
            let b = p.band(metric);
            format!("{} ({})", b.optimal, b.acceptable)
        };
        table.add_row(vec![
            Cell::new(key),
            Cell::new(p.mode.to_string()),
            Cell::new(band(Metric::Fat)),
            Cell::new(band(Metric::Msnf)),
            Cell::new(band(Metric::TotalSugars)),
            Cell::new(band(Metric::TotalSolids)),
            Cell::new(p.fpdt.map(|r| r.to_string()).unwrap_or_default()),
        ]);
    }
    println!("\n=== Products: optimal (acceptable), % of batch ===");
    println!("{table}");
}

fn run_balance(
    engine: &Engine,
    recipe_name: &str,
    product: &str,
    rows: &[Row],
    catalog: &[Ingredient],
    opts: &BalanceOptions,
    save: Option<&Path>,
) -> Result<()> {
    let result = engine.balance(product, rows, catalog, opts)?;
    let targets = engine.targets(product)?;

    let mut table = new_table(&["Ingredient", "Before", "After", "Role"]);
    for (i, row) in result.rows.iter().enumerate() {
        let before = rows.get(i).map(|r| fmt_g(r.grams)).unwrap_or_else(|| "added".into());
        table.add_row(vec![
            Cell::new(&row.ingredient.name),
            Cell::new(before),
            Cell::new(fmt_g(row.grams)),
            Cell::new(format!("{:?}", classify_ingredient(&row.ingredient)).to_lowercase()),
        ]);
    }

    println!("\n=== {recipe_name} → {product} ===");
    match (result.success, result.method) {
        (true, Some(SolveMethod::Lp)) => println!("Balanced (linear program)."),
        (true, _) => println!("Balanced (iterative solver)."),
        (false, _) => println!("Could not balance; recipe left unchanged."),
    }
    println!("{table}");
    println!("{}", composition_table(&result, &targets, opts.tolerance));
    if let Some(report) = &result.feasibility_report {
        println!();
        print_report(report);
    }

    if let Some(path) = save {
        let saved = SavedBalance {
            generated_at: Local::now(),
            recipe: recipe_name,
            product,
            options: opts,
            result: &result,
        };
        fs::write(path, serde_json::to_string_pretty(&saved)?)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("\nSaved to {}", path.display());
    }
    Ok(())
}

fn run_thermo(engine: &Engine, product: &str, rows: &[Row], temp: Option<f64>) -> Result<()> {
    let m = engine.thermo(product, rows, temp)?;
    let mut table = new_table(&["", "Base", "Adjusted"]);
    table.add_row(vec![
        Cell::new("SE per 100 g water"),
        Cell::new(format!("{:.1}", m.base.se_per_100g_water)),
        Cell::new(format!("{:.1}", m.adjusted.se_per_100g_water)),
    ]);
    table.add_row(vec![
        Cell::new("FPDT"),
        Cell::new(format!("{:.2} °C", m.base.fpdt)),
        Cell::new(format!("{:.2} °C", m.adjusted.fpdt)),
    ]);
    table.add_row(vec![
        Cell::new("Frozen water"),
        Cell::new(format!("{:.1}%", m.base.water_frozen_pct)),
        Cell::new(format!("{:.1}%", m.adjusted.water_frozen_pct)),
    ]);

    println!("\n=== Thermo at {:.1} °C ===", m.serve_temp_c);
    println!("{table}");
    println!(
        "Water {} | sugars {} | hardening effect {:.1} (K = {})",
        fmt_g(m.base.total_water),
        fmt_g(m.base.total_sugars),
        m.adjusted.hardening_effect,
        engine.thermo_config().hardening_k
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let constraints = load_constraints(args.constraints.as_deref())?;

    match args.command {
        Command::Health { catalog } => {
            run_health(&load_catalog(catalog.as_deref())?);
        }
        Command::Products => {
            run_products(&Engine::new(constraints, ThermoConfig::from_env()));
        }
        Command::Diagnose {
            recipe,
            product,
            catalog,
        } => {
            let engine = Engine::new(constraints, ThermoConfig::from_env());
            let catalog = load_catalog(catalog.as_deref())?;
            let (name, rows) = load_recipe(&recipe, &catalog)?;
            let report = engine.diagnose(&product, &rows, &catalog)?;
            println!("\n=== {name} → {product} ===");
            print_report(&report);
        }
        Command::Balance {
            recipe,
            product,
            catalog,
            batch,
            tolerance,
            max_iterations,
            no_lp,
            no_check,
            auto_fix,
            save,
        } => {
            if !(tolerance > 0.0) {
                bail!("--tolerance must be > 0");
            }
            if batch.is_some_and(|b| !(b > 0.0)) {
                bail!("--batch must be > 0");
            }
            let engine = Engine::new(constraints, ThermoConfig::from_env());
            let catalog = load_catalog(catalog.as_deref())?;
            let (name, rows) = load_recipe(&recipe, &catalog)?;
            let opts = BalanceOptions {
                max_iterations,
                tolerance,
                enable_feasibility_check: !no_check,
                use_lp_solver: !no_lp,
                auto_fix,
                batch_mass: batch,
                ..Default::default()
            };
            run_balance(&engine, &name, &product, &rows, &catalog, &opts, save.as_deref())?;
        }
        Command::Thermo {
            recipe,
            product,
            catalog,
            temp,
            hardening_k,
        } => {
            let thermo = match hardening_k {
                Some(k) if k.is_finite() && k >= 0.0 => ThermoConfig { hardening_k: k },
                Some(_) => bail!("--hardening-k must be a finite, non-negative number"),
                None => ThermoConfig::from_env(),
            };
            let engine = Engine::new(constraints, thermo);
            let catalog = load_catalog(catalog.as_deref())?;
            let (_, rows) = load_recipe(&recipe, &catalog)?;
            run_thermo(&engine, &product, &rows, temp)?;
        }
    }
    Ok(())
}
