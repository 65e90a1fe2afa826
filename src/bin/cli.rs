use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use mailpilot::{
    config::AppConfig,
    db,
    services::{
        budget_service::{BudgetChanges, BudgetSummary},
        user_service::RegisterRequest,
    },
    AppState,
};

#[derive(Parser)]
#[command(name = "mailpilot-cli")]
#[command(about = "Operator tool for the mailpilot backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// User management commands
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Connected mailbox commands
    Accounts {
        #[command(subcommand)]
        command: AccountCommands,
    },

    /// Pull new mail for one account or every account of a user
    Sync {
        /// Account id
        #[arg(short, long, conflicts_with = "user")]
        account: Option<i64>,

        /// User id
        #[arg(short, long)]
        user: Option<i64>,
    },

    /// Monthly AI budget commands
    Budget {
        #[command(subcommand)]
        command: BudgetCommands,
    },

    /// Apply pending database migrations
    Migrate,
}

#[derive(Subcommand)]
enum UserCommands {
    /// List users
    List {
        /// Maximum number of users to display
        #[arg(short, long, default_value_t = 100)]
        limit: i64,

        /// Offset for pagination
        #[arg(short = 'o', long, default_value_t = 0)]
        offset: i64,
    },

    /// Create a new user
    Create {
        /// Email address
        #[arg(short, long)]
        email: String,

        /// Password (will prompt if not provided)
        #[arg(short, long)]
        password: Option<String>,

        /// Display name
        #[arg(short = 'n', long)]
        full_name: Option<String>,
    },

    /// Block a user from logging in
    Deactivate {
        /// Email address of the user
        #[arg(short, long)]
        email: String,
    },

    /// Re-enable a deactivated user
    Activate {
        /// Email address of the user
        #[arg(short, long)]
        email: String,
    },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// List the mailboxes of a user
    List {
        /// User id
        #[arg(short, long)]
        user: i64,
    },
}

#[derive(Subcommand)]
enum BudgetCommands {
    /// Show the current month's usage
    Show {
        /// User id
        #[arg(short, long)]
        user: i64,
    },

    /// Change the monthly limit
    SetLimit {
        /// User id
        #[arg(short, long)]
        user: i64,

        /// New limit in cents
        #[arg(short, long)]
        cents: i64,
    },
}

fn read_password(prompt: &str) -> anyhow::Result<String> {
    use std::io::{self, Write};
    print!("{}: ", prompt);
    io::stdout().flush()?;
    Ok(rpassword::read_password()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let pool = db::create_pool()
        .await
        .context("Failed to open database")?;
    db::run_migrations(&pool).await?;

    if let Commands::Migrate = cli.command {
        println!("✅ Migrations applied");
        return Ok(());
    }

    let config = AppConfig::from_env()?;
    let state = AppState::new(pool, config)?;

    match cli.command {
        Commands::Users { command } => run_users(&state, command).await,
        Commands::Accounts { command } => run_accounts(&state, command).await,
        Commands::Sync { account, user } => run_sync(&state, account, user).await,
        Commands::Budget { command } => run_budget(&state, command).await,
        Commands::Migrate => Ok(()),
    }
}

async fn run_users(state: &AppState, command: UserCommands) -> anyhow::Result<()> {
    match command {
        UserCommands::List { limit, offset } => {
            let users = state
                .user_service
                .list_users(Some(limit), Some(offset))
                .await?;
            if users.is_empty() {
                println!("No users found.");
                return Ok(());
            }
            println!(
                "{:<5} {:<40} {:<8} {:<20}",
                "ID", "Email", "Active", "Last login"
            );
            println!("{}", "-".repeat(75));
            for user in users {
                println!(
                    "{:<5} {:<40} {:<8} {:<20}",
                    user.id,
                    user.email,
                    if user.is_active { "Yes" } else { "No" },
                    user.last_login.as_deref().unwrap_or("never")
                );
            }
        }

        UserCommands::Create {
            email,
            password,
            full_name,
        } => {
            let password = match password {
                Some(pw) => pw,
                None => {
                    let pw = read_password("Password")?;
                    if pw != read_password("Confirm password")? {
                        bail!("Passwords do not match");
                    }
                    pw
                }
            };

            let user = state
                .user_service
                .create_user(RegisterRequest {
                    email,
                    password,
                    full_name,
                })
                .await
                .context("Failed to create user")?;
            state.budget_service.current(user.id).await?;

            println!("✅ User created successfully!");
            println!("  ID: {}", user.id);
            println!("  Email: {}", user.email);
        }

        UserCommands::Deactivate { email } => set_active(state, &email, false).await?,
        UserCommands::Activate { email } => set_active(state, &email, true).await?,
    }
    Ok(())
}

async fn set_active(state: &AppState, email: &str, active: bool) -> anyhow::Result<()> {
    let email = email.trim().to_lowercase();
    let Some(user) = state.user_repository.find_by_email(&email).await? else {
        bail!("User '{}' not found", email);
    };
    state.user_service.set_active(user.id, active).await?;
    println!(
        "✅ User '{}' {}",
        email,
        if active { "activated" } else { "deactivated" }
    );
    Ok(())
}

async fn run_accounts(state: &AppState, command: AccountCommands) -> anyhow::Result<()> {
    match command {
        AccountCommands::List { user } => {
            let accounts = state.account_repository.list_for_user(user, false).await?;
            if accounts.is_empty() {
                println!("No accounts found for user {}.", user);
                return Ok(());
            }
            println!(
                "{:<5} {:<10} {:<36} {:<12} {:<8} {:<20}",
                "ID", "Provider", "Address", "Status", "Active", "Last sync"
            );
            println!("{}", "-".repeat(95));
            for account in accounts {
                println!(
                    "{:<5} {:<10} {:<36} {:<12} {:<8} {:<20}",
                    account.id,
                    account.provider,
                    account.email_address,
                    account.connection_status,
                    if account.is_active { "Yes" } else { "No" },
                    account.last_sync_at.as_deref().unwrap_or("never")
                );
            }
        }
    }
    Ok(())
}

async fn run_sync(state: &AppState, account: Option<i64>, user: Option<i64>) -> anyhow::Result<()> {
    match (account, user) {
        (Some(account_id), _) => {
            let count = state.sync_service.sync_account(account_id).await?;
            println!("✅ Synced {} new email(s) for account {}", count, account_id);
        }
        (None, Some(user_id)) => {
            let results = state.sync_service.sync_user(user_id).await?;
            if results.is_empty() {
                println!("No syncable accounts for user {}.", user_id);
            }
            for result in results {
                match (result.success, result.count, result.error) {
                    (true, Some(count), _) => {
                        println!("✅ {}: {} new email(s)", result.email, count)
                    }
                    (_, _, error) => eprintln!(
                        "❌ {}: {}",
                        result.email,
                        error.unwrap_or_else(|| "sync failed".to_string())
                    ),
                }
            }
        }
        (None, None) => bail!("Pass --account <id> or --user <id>"),
    }
    Ok(())
}

async fn run_budget(state: &AppState, command: BudgetCommands) -> anyhow::Result<()> {
    let usage = match command {
        BudgetCommands::Show { user } => state.budget_service.current(user).await?,
        BudgetCommands::SetLimit { user, cents } => {
            if cents < 0 {
                bail!("Budget limit must be positive");
            }
            let usage = state
                .budget_service
                .update(
                    user,
                    BudgetChanges {
                        budget_limit_cents: Some(cents),
                        is_paused: None,
                    },
                )
                .await?;
            println!("✅ Budget limit updated");
            usage
        }
    };

    let summary = BudgetSummary::from(&usage);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
