use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use std::env;
use std::sync::Arc;
use tracing::info;

use pantrywise::config::CoreConfig;
use pantrywise::db::{init_database_schema, PgStore};
use pantrywise::recipe_import::RecipeForm;
use pantrywise::store::RecipeQuery;
use pantrywise::PantryService;

#[derive(Parser)]
#[command(name = "pantrywise")]
#[command(about = "Pantry, recipe matching and shopping list manager", long_about = None)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// User the command acts for
    #[arg(long, short = 'u', global = true, default_value_t = 1)]
    user: i64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database tables
    Init,

    /// Show expiring items and recommended recipes
    Home {
        /// Reference date (default: today)
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// List pantry items
    Pantry,

    /// Add stock to the pantry
    Add {
        name: String,
        quantity: Decimal,
        #[arg(long)]
        unit: Option<String>,
        /// Expiry date (YYYY-MM-DD)
        #[arg(long)]
        expires: Option<NaiveDate>,
    },

    /// Import a recipe; ingredient lines are read from a file as `name | amount | unit`
    ImportRecipe {
        title: String,
        /// File with one ingredient per line
        ingredients_file: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        tags: String,
    },

    /// Search recipes ranked by pantry match
    Search {
        text: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },

    /// Show the have/missing breakdown for one recipe
    Match { recipe_id: i64 },

    /// Add the missing ingredients of a recipe to the shopping list
    AddMissing { recipe_id: i64 },

    /// Greedy weekly meal plan
    Plan {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        today: Option<NaiveDate>,
    },

    /// List the shopping list
    Shopping,

    /// Flip the purchased flag of a shopping entry
    Toggle { entry_id: i64 },

    /// Move purchased shopping entries into the pantry (all of them without ids)
    Transfer { entry_ids: Vec<i64> },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pantrywise=info"));

    let json = env::var("PANTRYWISE_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    let config = CoreConfig::from_env()?;

    info!("Connecting to database");
    let store = PgStore::connect(&cli.database_url, config.max_connections).await?;

    if let Commands::Init = cli.command {
        init_database_schema(store.pool()).await?;
        return Ok(());
    }

    let service = PantryService::new(Arc::new(store), config);
    let user = cli.user;
    let today = |date: Option<NaiveDate>| date.unwrap_or_else(|| Local::now().date_naive());

    match cli.command {
        Commands::Init => {}
        Commands::Home { today: date } => print_json(&service.home(user, today(date)).await?)?,
        Commands::Pantry => print_json(&service.pantry(user).await?)?,
        Commands::Add {
            name,
            quantity,
            unit,
            expires,
        } => print_json(
            &service
                .add_pantry_item(user, &name, unit.as_deref(), quantity, expires)
                .await?,
        )?,
        Commands::ImportRecipe {
            title,
            ingredients_file,
            description,
            tags,
        } => {
            let ingredients = std::fs::read_to_string(&ingredients_file)
                .with_context(|| format!("Failed to read {ingredients_file}"))?;
            let form = RecipeForm {
                title,
                description,
                ingredients,
                tags,
                ..Default::default()
            };
            print_json(&service.create_recipe(user, &form).await?)?
        }
        Commands::Search { text, tag } => {
            print_json(&service.search_ranked(user, &RecipeQuery { text, tag }).await?)?
        }
        Commands::Match { recipe_id } => print_json(&service.match_for_user(user, recipe_id).await?)?,
        Commands::AddMissing { recipe_id } => {
            print_json(&service.add_missing_for_recipe(user, recipe_id).await?)?
        }
        Commands::Plan { limit, today: date } => {
            print_json(&service.weekly_plan(user, today(date), limit).await?)?
        }
        Commands::Shopping => print_json(&service.shopping().entries(user).await?)?,
        Commands::Toggle { entry_id } => print_json(&service.shopping().toggle_done(user, entry_id).await?)?,
        Commands::Transfer { entry_ids } => {
            let report = if entry_ids.is_empty() {
                service.shopping().transfer_all_done(user).await?
            } else {
                service.shopping().transfer_to_pantry(user, &entry_ids).await?
            };
            print_json(&report)?
        }
    }

    Ok(())
}
