use std::str::FromStr;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use randfood_client::RestaurantClient;
use randfood_core::{
    AddForm, District, FilterState, FoodStyle, ParseLabelError, PriceCeiling, Restaurant, ALL_LABEL,
};
use randfood_engine::{submit_add, AddOutcome, AppConfig, BrowseSession, FetchApplied, RandomSession};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "randfood")]
#[command(about = "Browse, add and randomly pick restaurants")]
struct Cli {
    /// Restaurant service base URL (overrides RANDFOOD_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pick one restaurant at random
    Random(RandomArgs),
    /// List restaurants page by page
    List(ListArgs),
    /// Add a restaurant
    Add(AddArgs),
}

/// A district label, or `All` for no constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DistrictChoice(Option<District>);

impl FromStr for DistrictChoice {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case(ALL_LABEL) {
            Ok(Self(None))
        } else {
            s.parse().map(|d| Self(Some(d)))
        }
    }
}

#[derive(Debug, Args)]
struct RandomArgs {
    #[arg(long)]
    district: Option<DistrictChoice>,
    #[arg(long, default_value = "All")]
    price: PriceCeiling,
    #[arg(long = "style", value_delimiter = ',')]
    styles: Vec<FoodStyle>,
}

impl RandomArgs {
    fn filter(&self) -> FilterState {
        FilterState::new()
            .with_district(self.district.and_then(|d| d.0))
            .with_price(self.price)
            .with_styles(self.styles.iter().copied())
    }
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(long = "district", value_delimiter = ',')]
    districts: Vec<DistrictChoice>,
    #[arg(long, default_value = "All")]
    price: PriceCeiling,
    #[arg(long = "style", value_delimiter = ',')]
    styles: Vec<FoodStyle>,
    #[arg(long, default_value = "")]
    search: String,
    #[arg(long, default_value_t = 1)]
    page: usize,
    /// Overrides RANDFOOD_PAGE_SIZE
    #[arg(long)]
    page_size: Option<usize>,
}

impl ListArgs {
    fn filter(&self) -> FilterState {
        FilterState::new()
            .with_districts(self.districts.iter().filter_map(|d| d.0))
            .with_price(self.price)
            .with_styles(self.styles.iter().copied())
            .with_search(self.search.clone())
    }
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long, default_value = "")]
    name: String,
    #[arg(long)]
    district: Option<District>,
    #[arg(long, default_value_t = 0)]
    price: i64,
    #[arg(long, default_value_t = 0)]
    rating: i64,
    #[arg(long = "style", value_delimiter = ',')]
    styles: Vec<FoodStyle>,
}

impl AddArgs {
    fn form(&self) -> AddForm {
        let mut form = AddForm::new();
        form.set_restaurant(self.name.clone());
        form.set_district(self.district);
        form.set_price(self.price);
        form.set_rating(self.rating);
        for style in &self.styles {
            form.toggle_style(*style);
        }
        form
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }
    tracing::debug!(base_url = %config.base_url, page_size = config.page_size, "configured");
    let client = RestaurantClient::new(config.base_url.clone(), config.http_client_config())?;

    match cli.command {
        Commands::Random(args) => {
            let mut session = RandomSession::new();
            session.set_filter(args.filter());
            let mut rng = rand::thread_rng();
            let message = session
                .pick(&client, &mut rng)
                .await
                .map(|outcome| outcome.message().to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("Result: {message}");
        }
        Commands::List(args) => {
            let page_size = args.page_size.unwrap_or(config.page_size);
            let mut session = BrowseSession::with_filter(page_size, args.filter());
            if let FetchApplied::Failed = session.refresh(&client).await {
                eprintln!("Could not reach {}; showing no results.", client.base_url());
            }
            session.go_to_page(args.page);

            let page = session.visible_page();
            if page.items.is_empty() {
                println!("No restaurants found.");
            }
            for restaurant in &page.items {
                println!("{}", render_card(restaurant));
            }
            println!(
                "Page {} / {} ({} restaurants)",
                page.page, page.total_pages, page.filtered_count
            );
        }
        Commands::Add(args) => {
            let mut form = args.form();
            match submit_add(&mut form, &client).await {
                AddOutcome::Added => println!("{}", randfood_engine::MSG_ADDED),
                AddOutcome::Invalid(errors) => {
                    for (_, message) in errors.iter() {
                        eprintln!("{message}");
                    }
                    bail!("restaurant not saved");
                }
                other => bail!("{}", other.message().unwrap_or_default()),
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn render_card(restaurant: &Restaurant) -> String {
    let rating = if restaurant.is_rated() {
        (1..=5)
            .map(|i| if i <= restaurant.rating { '★' } else { '☆' })
            .collect::<String>()
    } else {
        "-".to_string()
    };
    let styles = if restaurant.food_styles.is_empty() {
        "-".to_string()
    } else {
        restaurant.food_styles.join(", ")
    };
    format!(
        "{}\n  District: {}\n  Price: ${}\n  Rating: {}\n  Food Styles: {}",
        restaurant.display_name(),
        restaurant.district,
        restaurant.price,
        rating,
        styles
    )
}
