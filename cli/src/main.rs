use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use warband_cli::commands;
use warband_types::LocalConfig;

#[derive(Parser)]
#[command(version, about = "warband guild raid tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available boss definitions
    Bosses {
        #[arg(short, long)]
        boss_dir: Option<String>,
    },
    /// Run one deterministic battle and print the transcript summary
    Simulate {
        #[arg(short, long)]
        boss: Option<String>,
        #[arg(short, long, default_value = "local-seed")]
        seed: String,
        #[arg(short, long, default_value_t = 4)]
        members: usize,
        #[arg(long)]
        max_rounds: Option<u32>,
        #[arg(long)]
        boss_dir: Option<String>,
    },
    /// Full ticket + challenge round trip against an in-memory store
    Demo {
        #[arg(short = 'u', long, default_value = "demo-member")]
        member: String,
        /// Extra party member ids fighting alongside
        #[arg(short, long)]
        party: Vec<String>,
        /// Run this many concurrent ticket+challenge round trips instead
        #[arg(short, long, default_value_t = 1)]
        challengers: usize,
        #[arg(short, long)]
        guild: Option<String>,
        #[arg(short, long)]
        boss: Option<String>,
        #[arg(short, long)]
        seed: Option<String>,
        #[arg(long)]
        boss_dir: Option<String>,
    },
    /// Verify a stored transcript signature, or replay a seed twice and
    /// require identical transcripts
    Verify {
        /// Stored transcript; omit to run the replay check instead
        #[arg(long)]
        path: Option<String>,
        #[arg(short, long)]
        boss: Option<String>,
        #[arg(short, long, default_value = "local-seed")]
        seed: String,
        #[arg(short, long, default_value_t = 4)]
        members: usize,
        #[arg(long)]
        boss_dir: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config: LocalConfig = confy::load("warband", None).map_err(|e| e.to_string())?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Bosses { boss_dir } => {
            commands::list_bosses(boss_dir.or_else(|| config.boss_dir.clone()).as_deref())
        }
        Commands::Simulate {
            boss,
            seed,
            members,
            max_rounds,
            boss_dir,
        } => commands::run_simulation(
            boss_dir.or_else(|| config.boss_dir.clone()).as_deref(),
            boss.as_deref(),
            &seed,
            members,
            max_rounds,
        ),
        Commands::Demo {
            member,
            party,
            challengers,
            guild,
            boss,
            seed,
            boss_dir,
        } => {
            let guild = guild.unwrap_or_else(|| config.default_guild.clone());
            commands::run_demo(
                &guild,
                &member,
                &party,
                challengers,
                boss_dir.or_else(|| config.boss_dir.clone()).as_deref(),
                boss.as_deref(),
                seed.as_deref(),
            )
            .await
        }
        Commands::Verify {
            path,
            boss,
            seed,
            members,
            boss_dir,
        } => match path {
            Some(path) => commands::verify_battle(&path),
            None => commands::verify_replay(
                boss_dir.or_else(|| config.boss_dir.clone()).as_deref(),
                boss.as_deref(),
                &seed,
                members,
            ),
        },
    }
}
