//! Life Vault command line
//!
//! ## Usage
//!
//! ```bash
//! # Record a win in a pouch
//! life-vault add growth "Read a chapter"
//!
//! # Pouch tiers and widget snapshot
//! life-vault pouches
//! life-vault widget
//!
//! # Community feed, following new posts as they arrive
//! LIFE_VAULT_BACKEND_URL=https://<project>.supabase.co LIFE_VAULT_API_KEY=... \
//!     life-vault feed --watch
//!
//! # Pro plan
//! life-vault pro purchase annual
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use life_vault::community::{format_wan, CommunityFeed, FALLBACK_MESSAGE};
use life_vault::config::{default_config_path, Config};
use life_vault::entitlement::{PurchaseOutcome, ANNUAL_ID, MONTHLY_ID};
use life_vault::{App, Category, FeedState, RemotePost};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "life-vault")]
#[command(about = "Success journal with pouch tiers and a community feed")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "LIFE_VAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Community backend URL
    #[arg(long, env = "LIFE_VAULT_BACKEND_URL")]
    backend_url: Option<String>,

    /// Community backend API key
    #[arg(long, env = "LIFE_VAULT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save a new entry
    Add {
        category: Category,
        text: String,
        /// Also publish it to the community feed
        #[arg(long)]
        public: bool,
    },
    /// List entries, newest first
    List {
        #[arg(long)]
        category: Option<Category>,
    },
    /// Change an entry's text and pouch
    Edit {
        id: Uuid,
        text: String,
        #[arg(long)]
        category: Option<Category>,
    },
    Delete { id: Uuid },
    /// Publish an entry to the community feed
    Share { id: Uuid },
    /// Stop showing an entry as public. The community post stays
    Private { id: Uuid },
    /// Pouch tiers and progress
    Pouches,
    /// Print the widget snapshot
    Widget,
    /// Show the community feed
    Feed {
        /// Keep running and print new posts as they arrive
        #[arg(long)]
        watch: bool,
    },
    Like { post_id: Uuid },
    Favorite { post_id: Uuid },
    /// Saved favorites
    Favorites {
        /// Remove a favorite by post id
        #[arg(long)]
        remove: Option<String>,
    },
    /// Pro plan status and purchases
    Pro {
        #[command(subcommand)]
        action: ProAction,
    },
}

#[derive(Subcommand, Debug)]
enum ProAction {
    Status,
    Restore,
    Purchase { plan: Plan },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Plan {
    Monthly,
    Annual,
}

impl Plan {
    fn product_id(self) -> &'static str {
        match self {
            Plan::Monthly => MONTHLY_ID,
            Plan::Annual => ANNUAL_ID,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("life_vault=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load_or_default(&config_path)?;

    // Apply CLI overrides
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if args.backend_url.is_some() {
        config.backend_url = args.backend_url;
    }
    if args.api_key.is_some() {
        config.api_key = args.api_key;
    }

    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let mut app = App::open(config)?;
    app.gate_mut().spawn_listener();
    app.gate().reconcile().await;

    match args.command {
        Command::Add { category, text, public } => {
            let entry = if public {
                app.save_and_share(&text, category).await?
            } else {
                app.save_entry(&text, category)?
            };
            println!("{}  {}  {}", entry.id, entry.category.display_name(), entry.content);
        }
        Command::List { category } => {
            for entry in app.entries(category)? {
                let public = if entry.is_public { " [public]" } else { "" };
                println!(
                    "{}  {}  {:<8} {}{}",
                    entry.id,
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.category,
                    entry.content,
                    public
                );
            }
        }
        Command::Edit { id, text, category } => {
            let current = app
                .library()
                .get_entry(id)?
                .ok_or(life_vault::VaultError::EntryNotFound(id))?;
            app.edit_entry(id, &text, category.unwrap_or(current.category))?;
        }
        Command::Delete { id } => app.delete_entry(id)?,
        Command::Share { id } => {
            app.share_entry(id).await?;
            println!("Shared to the community");
        }
        Command::Private { id } => app.make_private(id)?,
        Command::Pouches => {
            for pouch in app.pouch_summaries()? {
                let lock = if pouch.locked { "  (upgrade to pro to reach LV4)" } else { "" };
                println!(
                    "{:<18} {:<18} {:>4}  {}  {:>3.0}%{}",
                    pouch.category.display_name(),
                    pouch.category.subtitle(),
                    pouch.count,
                    pouch.level,
                    pouch.progress * 100.0,
                    lock
                );
            }
        }
        Command::Widget => match app.snapshot() {
            Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
            None => println!("No widget snapshot published yet"),
        },
        Command::Feed { watch } => {
            let mut feed = app.community_feed();
            feed.load_all().await;
            print_feed(&feed);
            if watch {
                feed.subscribe_to_new_posts();
                loop {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        next = feed.next_insert() => match next {
                            Some(post) => print_post(&post, false, false),
                            None => {
                                warn!("Realtime subscription ended");
                                break;
                            }
                        },
                    }
                }
                feed.unsubscribe();
            }
        }
        Command::Like { post_id } => {
            let mut feed = app.community_feed();
            feed.load_all().await;
            if feed.like(post_id) {
                println!("Liked");
            } else {
                println!("Already liked");
            }
            feed.flush_writes().await;
        }
        Command::Favorite { post_id } => {
            let mut feed = app.community_feed();
            feed.load_all().await;
            let Some(post) = feed.post(post_id).cloned() else {
                println!("No post {post_id} in the feed");
                return Ok(());
            };
            if feed.favorite(post_id, &post) {
                println!("Saved to favorites");
            } else {
                println!(
                    "Free plan keeps {} favorites. Upgrade to pro for unlimited favorites",
                    feed.favorites().limit()
                );
            }
            feed.flush_writes().await;
        }
        Command::Favorites { remove } => {
            let mut feed = app.community_feed();
            if let Some(id) = remove {
                if !feed.remove_favorite(&id) {
                    println!("Not in favorites: {id}");
                }
            }
            for fav in feed.favorites().entries() {
                println!("{}  {}  {}: {}", fav.id, fav.pouch_name, fav.author, fav.content);
            }
        }
        Command::Pro { action } => match action {
            ProAction::Status => {
                app.gate_mut().load_products().await;
                println!("Pro: {}", if app.is_pro() { "active" } else { "inactive" });
                for product in app.gate().products() {
                    println!("  {}  {}", product.display_name, product.display_price);
                }
            }
            ProAction::Restore => {
                let is_pro = app.gate_mut().restore_purchases().await?;
                println!("Pro: {}", if is_pro { "restored" } else { "no purchase found" });
            }
            ProAction::Purchase { plan } => {
                match app.gate_mut().purchase(plan.product_id()).await? {
                    PurchaseOutcome::Purchased => println!("Welcome to pro"),
                    PurchaseOutcome::Cancelled => println!("Purchase cancelled"),
                    PurchaseOutcome::Pending => println!("Purchase pending approval"),
                }
            }
        },
    }

    app.gate_mut().stop_listener();
    Ok(())
}

fn print_feed(feed: &CommunityFeed) {
    if feed.state() == FeedState::LoadedWithFallback {
        println!("{}", feed.error_message().unwrap_or(FALLBACK_MESSAGE));
    }
    let total_likes: u64 = feed.posts().iter().map(|p| p.like_count.max(0) as u64).sum();
    println!("{} posts, {} likes", feed.posts().len(), format_wan(total_likes));
    for post in feed.posts() {
        print_post(post, feed.is_liked(post.id), feed.is_favorited(post.id));
    }
}

fn print_post(post: &RemotePost, liked: bool, favorited: bool) {
    let marks = match (liked, favorited) {
        (true, true) => " ♥★",
        (true, false) => " ♥",
        (false, true) => " ★",
        (false, false) => "",
    };
    println!(
        "{}  {} · {}  {} likes{}\n    {}",
        post.id, post.display_name, post.category_label, post.like_count, marks, post.content
    );
}
