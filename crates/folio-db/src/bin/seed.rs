//! # Seed Data Generator
//!
//! Populates the database with a development catalog.
//!
//! ## Usage
//! ```bash
//! # Generate 200 items (default)
//! cargo run -p folio-db --bin seed
//!
//! # Generate custom amount
//! cargo run -p folio-db --bin seed -- --count 1000
//!
//! # Specify database path
//! cargo run -p folio-db --bin seed -- --db ./data/folio.db
//! ```
//!
//! ## Generated Items
//! - Published PDFs across a few subjects, priced ฿29 - ฿499
//! - Item 0 is always free, so free downloads can be tried right away
//! - Storage paths follow `items/{creator}/{id}.pdf`

use chrono::Utc;
use std::env;
use folio_core::{Item, ItemStatus};
use folio_db::{Database, DbConfig};
use uuid::Uuid;

/// Subjects and titles for realistic test data
const SUBJECTS: &[(&str, &[&str])] = &[
    (
        "MATH",
        &[
            "Calculus Summary Notes",
            "Linear Algebra Exercises",
            "Probability Cheat Sheet",
            "Discrete Math Past Papers",
            "Statistics Formula Booklet",
        ],
    ),
    (
        "LANG",
        &[
            "Thai Grammar Workbook",
            "English Essay Templates",
            "Japanese N5 Vocabulary",
            "IELTS Writing Samples",
        ],
    ),
    (
        "SCI",
        &[
            "Organic Chemistry Reactions",
            "Physics Mechanics Problems",
            "Biology Lab Manual",
            "Thermodynamics Lecture Slides",
        ],
    ),
    (
        "CS",
        &[
            "Rust Ownership Illustrated",
            "Algorithms Interview Prep",
            "Database Normalization Guide",
            "Networking Fundamentals",
        ],
    ),
];

/// Price points in satang
const PRICES: &[i64] = &[2_900, 4_900, 9_900, 14_900, 19_900, 29_900, 49_900];

const CREATORS: &[&str] = &["creator-ann", "creator-somchai", "creator-lee"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 200;
    let mut db_path = String::from("./folio_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(200);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Folio Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of items to generate (default: 200)");
                println!("  -d, --db <PATH>    Database file path (default: ./folio_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Folio Seed Data Generator");
    println!("============================");
    println!("Database: {}", db_path);
    println!("Items:    {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.items().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} items", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    println!();
    println!("Generating items...");

    let titles: Vec<(&str, &str)> = SUBJECTS
        .iter()
        .flat_map(|(subject, titles)| titles.iter().map(move |title| (*subject, *title)))
        .collect();

    let mut generated = 0;
    let start = std::time::Instant::now();

    for seed in 0..count {
        let (subject, title) = titles[seed % titles.len()];
        let item = generate_item(subject, title, seed);

        if let Err(e) = db.items().insert(&item).await {
            eprintln!("Failed to insert {}: {}", item.title, e);
            continue;
        }

        generated += 1;
        if generated % 100 == 0 {
            println!("  Generated {} items...", generated);
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("✓ Generated {} items in {:?}", generated, elapsed);

    let tiers = db.tiers().list().await?;
    println!();
    println!("Bundle discount tiers:");
    for tier in tiers {
        println!("  {}+ items: {:.1}%", tier.min_item_count, tier.percentage());
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

/// Generates a single published item.
fn generate_item(subject: &str, title: &str, seed: usize) -> Item {
    let now = Utc::now();
    let id = Uuid::new_v4().to_string();
    let creator = CREATORS[seed % CREATORS.len()];

    // The first item is free
    let price_cents = if seed == 0 { 0 } else { PRICES[(seed * 7) % PRICES.len()] };

    // Every fifth item carries bonus material
    let bonus_url = (seed % 5 == 0).then(|| format!("https://bonus.example.test/{}", id));

    let volume = seed / (SUBJECTS.len() * 4) + 1;

    Item {
        storage_path: format!("items/{}/{}.pdf", creator, id),
        id,
        title: format!("[{}] {} Vol. {}", subject, title, volume),
        creator_id: creator.to_string(),
        price_cents,
        status: ItemStatus::Published,
        bonus_url,
        purchase_count: 0,
        created_at: now,
        updated_at: now,
    }
}
