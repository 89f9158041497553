//! # Seed Data Generator
//!
//! Populates a database with a small coffee-shop menu for development.
//!
//! ## Usage
//! ```bash
//! # Seed ./brew_dev.db
//! cargo run -p brew-db --bin seed
//!
//! # Specify database path
//! cargo run -p brew-db --bin seed -- --db ./data/brew.db
//! ```
//!
//! ## Generated Data
//! - Ingredients with opening stock (beans, milk, syrup, cups, pastries)
//! - Drinks and pastries, each with a recipe
//! - Promotions: 10% off, happy hour, 30 off over 200, buy 2 get 1 pastry
//! - Coupons `WELCOME20` and `SAVE30`
//! - A purchase point rule (100 spent → 1 point, Gold/Platinum x1.5)
//! - Two rewards and two members

use std::env;

use brew_core::loyalty::register_member;
use brew_core::{
    Coupon, Ingredient, LoyaltyPolicy, Money, NewMember, PointRule, PointRuleKind, Product,
    Promotion, PromotionKind, PromotionStatus, Quantity, Rate, RecipeLine, Reward, Tier,
    TimeWindow,
};
use brew_db::{Database, DbConfig};
use chrono::{DateTime, NaiveTime, Utc};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// (id, name, unit, cost per unit in cents, opening units, minimum units)
const INGREDIENTS: &[(&str, &str, &str, i64, i64, i64)] = &[
    ("beans", "Espresso beans", "g", 3, 5_000, 1_000),
    ("milk", "Whole milk", "ml", 1, 20_000, 4_000),
    ("oat-milk", "Oat milk", "ml", 2, 8_000, 2_000),
    ("choc", "Chocolate syrup", "ml", 2, 3_000, 500),
    ("cup-12", "Cup 12oz", "pcs", 150, 500, 100),
    ("croissant", "Butter croissant", "pcs", 2_500, 40, 10),
];

/// (id, name, category, price in major units, recipe)
const MENU: &[(&str, &str, &str, i64, &[(&str, i64)])] = &[
    ("americano", "Americano", "Coffee", 60, &[("beans", 18), ("cup-12", 1)]),
    ("latte", "Cafe Latte", "Coffee", 75, &[("beans", 18), ("milk", 200), ("cup-12", 1)]),
    (
        "oat-latte",
        "Oat Latte",
        "Coffee",
        85,
        &[("beans", 18), ("oat-milk", 200), ("cup-12", 1)],
    ),
    (
        "mocha",
        "Mocha",
        "Coffee",
        85,
        &[("beans", 18), ("milk", 180), ("choc", 30), ("cup-12", 1)],
    ),
    ("croissant", "Croissant", "Bakery", 55, &[("croissant", 1)]),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./brew_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Brew POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./brew_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("Brew POS Seed Data Generator");
    println!("============================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    if db.products().get_by_id(MENU[0].0).await?.is_some() {
        println!("⚠ Database already has a menu");
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let now = Utc::now();

    for &(id, name, unit, cost, opening, minimum) in INGREDIENTS {
        db.ingredients()
            .create(&Ingredient {
                id: id.to_string(),
                name: name.to_string(),
                unit: unit.to_string(),
                cost_per_unit: Money::from_cents(cost),
                current_stock: Quantity::from_units(opening),
                min_stock: Quantity::from_units(minimum),
                max_stock: None,
                supplier: None,
                version: 0,
                created_at: now,
                updated_at: now,
            })
            .await?;
    }
    println!("✓ {} ingredients", INGREDIENTS.len());

    for &(id, name, category, price, recipe) in MENU {
        db.products()
            .create(&Product {
                id: id.to_string(),
                name: name.to_string(),
                category: Some(category.to_string()),
                price: Money::from_major(price),
                is_available: true,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let lines: Vec<RecipeLine> = recipe
            .iter()
            .map(|&(ingredient, units)| RecipeLine::new(ingredient, Quantity::from_units(units)))
            .collect();
        db.recipes().set_recipe(id, &lines).await?;
    }
    println!("✓ {} products with recipes", MENU.len());

    seed_promotions(&db, now).await?;
    println!("✓ Promotions and coupons");

    db.point_rules()
        .create(&PointRule {
            id: "purchase".to_string(),
            name: "1 point per 100 spent".to_string(),
            kind: PointRuleKind::Purchase,
            spend_amount: Money::from_major(100),
            earn_points: 1,
            bonus_multiplier: Some(Rate::from_bps(15_000)),
            applicable_tiers: vec![Tier::Gold, Tier::Platinum],
            priority: 0,
            is_active: true,
            starts_at: None,
            ends_at: None,
            created_at: now,
        })
        .await?;

    for (id, name, cost, tier) in [
        ("free-americano", "Free Americano", 50, None),
        ("free-latte", "Free Latte", 80, Some(Tier::Silver)),
    ] {
        db.rewards()
            .create(&Reward {
                id: id.to_string(),
                name: name.to_string(),
                description: None,
                point_cost: cost,
                required_tier: tier,
                is_active: true,
                starts_at: None,
                ends_at: None,
                usage_limit: None,
                redemption_count: 0,
                created_at: now,
            })
            .await?;
    }
    println!("✓ Point rule and rewards");

    let policy = LoyaltyPolicy::default();
    for (name, phone) in [("Somchai", "0811111111"), ("Nok", "0822222222")] {
        let (member, welcome) = register_member(
            &NewMember {
                name: name.to_string(),
                phone: Some(phone.to_string()),
                email: None,
                date_of_birth: None,
            },
            &policy,
            now,
        )?;
        let mut uow = db.begin().await?;
        uow.insert_member(&member, welcome.as_ref()).await?;
        uow.commit().await?;
        println!("  Member {} → {}", name, member.member_number);
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

async fn seed_promotions(db: &Database, now: DateTime<Utc>) -> Result<(), Box<dyn std::error::Error>> {
    let promotion = |id: &str, name: &str, code: Option<&str>, kind: PromotionKind| Promotion {
        id: id.to_string(),
        name: name.to_string(),
        code: code.map(str::to_string),
        description: None,
        kind,
        status: PromotionStatus::Active,
        starts_at: None,
        ends_at: None,
        usage_limit: None,
        usage_count: 0,
        per_customer: false,
        created_at: now,
        updated_at: now,
    };

    let happy_hour = TimeWindow::new(
        NaiveTime::from_hms_opt(14, 0, 0).ok_or("invalid happy hour start")?,
        NaiveTime::from_hms_opt(16, 0, 0).ok_or("invalid happy hour end")?,
    );

    let promotions = [
        promotion(
            "welcome",
            "Welcome 20%",
            Some("WELCOME20"),
            PromotionKind::Percentage {
                rate: Rate::from_percent(20),
                max_discount: Some(Money::from_major(50)),
            },
        ),
        promotion(
            "save30",
            "30 off over 200",
            Some("SAVE30"),
            PromotionKind::FixedAmount {
                amount: Money::from_major(30),
                min_spend: Some(Money::from_major(200)),
            },
        ),
        promotion(
            "happy-hour",
            "Happy hour 15%",
            None,
            PromotionKind::HappyHour {
                rate: Rate::from_percent(15),
                window: happy_hour,
                max_discount: None,
            },
        ),
        promotion(
            "pastry-3for2",
            "Buy 2 croissants, get 1 free",
            None,
            PromotionKind::BuyXGetY {
                buy_quantity: 2,
                get_quantity: 1,
                applicable_products: vec!["croissant".to_string()],
            },
        ),
    ];

    for promo in &promotions {
        db.promotions().create(promo).await?;
    }

    for (code, promotion_id) in [("WELCOME20", "welcome"), ("SAVE30", "save30")] {
        db.promotions()
            .create_coupon(&Coupon {
                id: Uuid::new_v4().to_string(),
                code: code.to_string(),
                promotion_id: promotion_id.to_string(),
                is_used: false,
                used_at: None,
                used_by: None,
                order_id: None,
                created_at: now,
            })
            .await?;
    }

    Ok(())
}
